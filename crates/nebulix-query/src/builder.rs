//! Logical graph operations rendered as nGQL statements.
//!
//! Builders never touch the network. Vertex ids and property values are
//! escaped into the statement text; numeric knobs (depth, limits) travel as
//! `$name` parameters and are substituted by the runner.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::escape::{escape_string, escape_value, quote_identifier};
use crate::query::{Params, Query};

/// A vertex to insert: id plus tag properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexSpec {
    pub vid: String,
    pub properties: Params,
}

impl VertexSpec {
    #[must_use]
    pub fn new(vid: impl Into<String>) -> Self {
        Self {
            vid: vid.into(),
            properties: Params::new(),
        }
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// An edge to insert between two vertex ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSpec {
    pub src: String,
    pub dst: String,
    pub rank: Option<i64>,
    pub properties: Params,
}

impl EdgeSpec {
    #[must_use]
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            rank: None,
            properties: Params::new(),
        }
    }

    #[must_use]
    pub fn rank(mut self, rank: i64) -> Self {
        self.rank = Some(rank);
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    fn endpoint(&self) -> String {
        let mut out = format!("{}->{}", escape_string(&self.src), escape_string(&self.dst));
        if let Some(rank) = self.rank {
            out.push('@');
            out.push_str(&rank.to_string());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalDirection {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

impl TraversalDirection {
    fn clause(self) -> &'static str {
        match self {
            Self::Outgoing => "",
            Self::Incoming => " REVERSELY",
            Self::Both => " BIDIRECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathKind {
    #[default]
    Shortest,
    All,
    NoLoop,
}

impl PathKind {
    fn keyword(self) -> &'static str {
        match self {
            Self::Shortest => "SHORTEST",
            Self::All => "ALL",
            Self::NoLoop => "NOLOOP",
        }
    }
}

fn vid_list(vids: &[String]) -> String {
    vids.iter()
        .map(|v| escape_string(v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn over_clause(edge_types: &[String]) -> String {
    if edge_types.is_empty() {
        "*".into()
    } else {
        edge_types
            .iter()
            .map(|e| quote_identifier(e))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Property columns shared by a batch: the sorted union of every item's keys.
fn property_columns<'a>(props: impl Iterator<Item = &'a Params>) -> Vec<String> {
    props
        .flat_map(|p| p.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_tuple(columns: &[String], props: &Params) -> String {
    let values: Vec<String> = columns
        .iter()
        .map(|c| props.get(c).map_or_else(|| "NULL".into(), escape_value))
        .collect();
    format!("({})", values.join(", "))
}

fn schema_columns(properties: &[(&str, &str)]) -> String {
    properties
        .iter()
        .map(|(name, ty)| {
            let ty: String = ty
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')'))
                .collect();
            format!("{} {ty}", quote_identifier(name))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stateless constructors for every logical graph operation.
pub struct QueryBuilder;

impl QueryBuilder {
    #[must_use]
    pub fn use_space(space: &str) -> Query {
        Query::new(format!("USE {}", quote_identifier(space)))
    }

    #[must_use]
    pub fn create_space(space: &str, partition_num: u32, replica_factor: u32, vid_len: u32) -> Query {
        Query::new(format!(
            "CREATE SPACE IF NOT EXISTS {}(partition_num={partition_num}, \
             replica_factor={replica_factor}, vid_type=FIXED_STRING({vid_len}))",
            quote_identifier(space)
        ))
    }

    /// `properties` are `(name, nGQL type)` pairs, e.g. `("line", "int")`.
    #[must_use]
    pub fn create_tag(tag: &str, properties: &[(&str, &str)]) -> Query {
        Query::new(format!(
            "CREATE TAG IF NOT EXISTS {}({})",
            quote_identifier(tag),
            schema_columns(properties)
        ))
    }

    #[must_use]
    pub fn create_edge_type(edge_type: &str, properties: &[(&str, &str)]) -> Query {
        Query::new(format!(
            "CREATE EDGE IF NOT EXISTS {}({})",
            quote_identifier(edge_type),
            schema_columns(properties)
        ))
    }

    #[must_use]
    pub fn insert_vertex(tag: &str, vertex: &VertexSpec) -> Query {
        let columns = property_columns(std::iter::once(&vertex.properties));
        Query::new(format!(
            "INSERT VERTEX {}({}) VALUES {}:{}",
            quote_identifier(tag),
            column_list(&columns),
            escape_string(&vertex.vid),
            value_tuple(&columns, &vertex.properties)
        ))
    }

    /// Multi-row insert; properties missing on a vertex are written as `NULL`.
    /// Returns `None` for an empty batch.
    #[must_use]
    pub fn batch_insert_vertices(tag: &str, vertices: &[VertexSpec]) -> Option<Query> {
        if vertices.is_empty() {
            return None;
        }
        let columns = property_columns(vertices.iter().map(|v| &v.properties));
        let rows: Vec<String> = vertices
            .iter()
            .map(|v| format!("{}:{}", escape_string(&v.vid), value_tuple(&columns, &v.properties)))
            .collect();
        Some(Query::new(format!(
            "INSERT VERTEX {}({}) VALUES {}",
            quote_identifier(tag),
            column_list(&columns),
            rows.join(", ")
        )))
    }

    #[must_use]
    pub fn insert_edge(edge_type: &str, edge: &EdgeSpec) -> Query {
        let columns = property_columns(std::iter::once(&edge.properties));
        Query::new(format!(
            "INSERT EDGE {}({}) VALUES {}:{}",
            quote_identifier(edge_type),
            column_list(&columns),
            edge.endpoint(),
            value_tuple(&columns, &edge.properties)
        ))
    }

    /// Returns `None` for an empty batch.
    #[must_use]
    pub fn batch_insert_edges(edge_type: &str, edges: &[EdgeSpec]) -> Option<Query> {
        if edges.is_empty() {
            return None;
        }
        let columns = property_columns(edges.iter().map(|e| &e.properties));
        let rows: Vec<String> = edges
            .iter()
            .map(|e| format!("{}:{}", e.endpoint(), value_tuple(&columns, &e.properties)))
            .collect();
        Some(Query::new(format!(
            "INSERT EDGE {}({}) VALUES {}",
            quote_identifier(edge_type),
            column_list(&columns),
            rows.join(", ")
        )))
    }

    #[must_use]
    pub fn update_vertex(tag: &str, vid: &str, properties: &Params) -> Query {
        let assignments: Vec<String> = properties
            .iter()
            .map(|(k, v)| format!("{} = {}", quote_identifier(k), escape_value(v)))
            .collect();
        Query::new(format!(
            "UPDATE VERTEX ON {} {} SET {}",
            quote_identifier(tag),
            escape_string(vid),
            assignments.join(", ")
        ))
    }

    #[must_use]
    pub fn delete_vertices(vids: &[String], with_edge: bool) -> Query {
        let suffix = if with_edge { " WITH EDGE" } else { "" };
        Query::new(format!("DELETE VERTEX {}{suffix}", vid_list(vids)))
    }

    #[must_use]
    pub fn delete_edge(edge_type: &str, src: &str, dst: &str) -> Query {
        Query::new(format!(
            "DELETE EDGE {} {}->{}",
            quote_identifier(edge_type),
            escape_string(src),
            escape_string(dst)
        ))
    }

    /// Fetch vertex properties; `tag = None` fetches across all tags.
    #[must_use]
    pub fn fetch_vertex(tag: Option<&str>, vid: &str) -> Query {
        let on = tag.map_or_else(|| "*".to_owned(), quote_identifier);
        Query::new(format!(
            "FETCH PROP ON {on} {} YIELD id(vertex) AS id, properties(vertex) AS props",
            escape_string(vid)
        ))
    }

    #[must_use]
    pub fn count_nodes(tag: Option<&str>) -> Query {
        let label = tag.map(|t| format!(":{}", quote_identifier(t))).unwrap_or_default();
        Query::new(format!("MATCH (v{label}) RETURN count(v) AS total"))
    }

    #[must_use]
    pub fn count_edges(edge_type: Option<&str>) -> Query {
        let label = edge_type
            .map(|t| format!(":{}", quote_identifier(t)))
            .unwrap_or_default();
        Query::new(format!("MATCH ()-[e{label}]->() RETURN count(e) AS total"))
    }

    /// Index lookup of vertices whose `property` equals `value`.
    #[must_use]
    pub fn search_nodes(tag: &str, property: &str, value: &Value, limit: usize) -> Query {
        let tag_q = quote_identifier(tag);
        Query::new(format!(
            "LOOKUP ON {tag_q} WHERE {tag_q}.{} == {} \
             YIELD id(vertex) AS id, properties(vertex) AS props | LIMIT $limit",
            quote_identifier(property),
            escape_value(value)
        ))
        .param("limit", limit)
    }

    #[must_use]
    pub fn find_path(source: &str, target: &str, max_depth: u32) -> Query {
        Self::find_paths(PathKind::Shortest, source, target, &[], max_depth)
    }

    #[must_use]
    pub fn find_paths(
        kind: PathKind,
        source: &str,
        target: &str,
        edge_types: &[String],
        max_depth: u32,
    ) -> Query {
        Query::new(format!(
            "FIND {} PATH FROM {} TO {} OVER {} UPTO $maxDepth STEPS YIELD path AS p",
            kind.keyword(),
            escape_string(source),
            escape_string(target),
            over_clause(edge_types)
        ))
        .param("maxDepth", max_depth)
    }

    #[must_use]
    pub fn subgraph(vid: &str, steps: u32) -> Query {
        Query::new(format!(
            "GET SUBGRAPH $steps STEPS FROM {} YIELD VERTICES AS nodes, EDGES AS relationships",
            escape_string(vid)
        ))
        .param("steps", steps)
    }

    #[must_use]
    pub fn go_from(vids: Vec<String>) -> GoBuilder {
        GoBuilder {
            start: vids,
            edge_types: Vec::new(),
            direction: TraversalDirection::Outgoing,
            min_steps: 1,
            max_steps: 1,
            limit: None,
        }
    }
}

/// Fluent builder for `GO` traversals.
#[derive(Debug, Clone)]
pub struct GoBuilder {
    start: Vec<String>,
    edge_types: Vec<String>,
    direction: TraversalDirection,
    min_steps: u32,
    max_steps: u32,
    limit: Option<usize>,
}

impl GoBuilder {
    #[must_use]
    pub fn over(mut self, edge_type: impl Into<String>) -> Self {
        self.edge_types.push(edge_type.into());
        self
    }

    #[must_use]
    pub fn steps(mut self, min: u32, max: u32) -> Self {
        self.min_steps = min;
        self.max_steps = max.max(min);
        self
    }

    #[must_use]
    pub fn direction(mut self, direction: TraversalDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    #[must_use]
    pub fn build(self) -> Query {
        let mut text = format!(
            "GO $minSteps TO $maxSteps STEPS FROM {} OVER {}{} \
             YIELD DISTINCT id($$) AS id, type(edge) AS edge_type",
            vid_list(&self.start),
            over_clause(&self.edge_types),
            self.direction.clause()
        );
        let mut query = Query::new(String::new())
            .param("minSteps", self.min_steps)
            .param("maxSteps", self.max_steps);
        if let Some(limit) = self.limit {
            text.push_str(" | LIMIT $limit");
            query = query.param("limit", limit);
        }
        query.text = text;
        query
    }
}
