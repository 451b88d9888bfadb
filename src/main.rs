use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use nebulix_core::Config;
use nebulix_query::builder::{PathKind, TraversalDirection};
use nebulix_query::escape::{classify_query, collapse_whitespace, interpolate, validate_query};
use nebulix_query::{Query, QueryBuilder, QueryCache};
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "nebulix", version)]
#[command(about = "Build, check and inspect nGQL queries", long_about = None)]
struct Cli {
    /// Config file (defaults to $NEBULIX_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a generated query and its parameters as JSON
    Build {
        #[command(subcommand)]
        operation: Operation,
    },
    /// Validate, classify and fingerprint a query
    Check {
        query: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum Operation {
    UseSpace {
        space: String,
    },
    Fetch {
        vid: String,
        #[arg(long)]
        tag: Option<String>,
    },
    CountNodes {
        #[arg(long)]
        tag: Option<String>,
    },
    CountEdges {
        #[arg(long)]
        edge_type: Option<String>,
    },
    Search {
        tag: String,
        property: String,
        /// JSON value; bare words are taken as strings
        value: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    FindPath {
        source: String,
        target: String,
        #[arg(long, value_enum, default_value_t = PathArg::Shortest)]
        kind: PathArg,
        #[arg(long = "over")]
        edge_types: Vec<String>,
        #[arg(long, default_value_t = 5)]
        max_depth: u32,
    },
    Go {
        #[arg(required = true)]
        vids: Vec<String>,
        #[arg(long = "over")]
        edge_types: Vec<String>,
        #[arg(long, default_value_t = 1)]
        min_steps: u32,
        #[arg(long, default_value_t = 1)]
        max_steps: u32,
        #[arg(long, value_enum, default_value_t = DirectionArg::Out)]
        direction: DirectionArg,
        #[arg(long)]
        limit: Option<usize>,
    },
    Subgraph {
        vid: String,
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    Delete {
        #[arg(required = true)]
        vids: Vec<String>,
        #[arg(long)]
        with_edge: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Out,
    In,
    Both,
}

impl From<DirectionArg> for TraversalDirection {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Out => Self::Outgoing,
            DirectionArg::In => Self::Incoming,
            DirectionArg::Both => Self::Both,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PathArg {
    Shortest,
    All,
    Noloop,
}

impl From<PathArg> for PathKind {
    fn from(k: PathArg) -> Self {
        match k {
            PathArg::Shortest => Self::Shortest,
            PathArg::All => Self::All,
            PathArg::Noloop => Self::NoLoop,
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let output = match cli.command {
        Command::Build { operation } => render(&build(operation)),
        Command::Check { query, params } => check(&config, &query, params.as_deref())?,
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config).context("failed to render config")?);
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn build(operation: Operation) -> Query {
    match operation {
        Operation::UseSpace { space } => QueryBuilder::use_space(&space),
        Operation::Fetch { vid, tag } => QueryBuilder::fetch_vertex(tag.as_deref(), &vid),
        Operation::CountNodes { tag } => QueryBuilder::count_nodes(tag.as_deref()),
        Operation::CountEdges { edge_type } => QueryBuilder::count_edges(edge_type.as_deref()),
        Operation::Search {
            tag,
            property,
            value,
            limit,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            QueryBuilder::search_nodes(&tag, &property, &value, limit)
        }
        Operation::FindPath {
            source,
            target,
            kind,
            edge_types,
            max_depth,
        } => QueryBuilder::find_paths(kind.into(), &source, &target, &edge_types, max_depth),
        Operation::Go {
            vids,
            edge_types,
            min_steps,
            max_steps,
            direction,
            limit,
        } => {
            let mut go = QueryBuilder::go_from(vids)
                .steps(min_steps, max_steps)
                .direction(direction.into());
            for edge_type in edge_types {
                go = go.over(edge_type);
            }
            if let Some(n) = limit {
                go = go.limit(n);
            }
            go.build()
        }
        Operation::Subgraph { vid, steps } => QueryBuilder::subgraph(&vid, steps),
        Operation::Delete { vids, with_edge } => QueryBuilder::delete_vertices(&vids, with_edge),
    }
}

fn render(query: &Query) -> Value {
    json!({
        "query": query.text,
        "parameters": query.parameters,
        "interpolated": interpolate(&query.text, &query.parameters),
    })
}

fn check(config: &Config, query: &str, params: Option<&str>) -> anyhow::Result<Value> {
    let params = match params {
        Some(raw) => serde_json::from_str(raw).context("--params must be a JSON object")?,
        None => nebulix_query::Params::new(),
    };
    let cache = QueryCache::new(&config.cache);
    let verdict = validate_query(query);
    if let Err(e) = &verdict {
        tracing::warn!(error = %e, "query rejected");
    }

    Ok(json!({
        "valid": verdict.is_ok(),
        "error": verdict.err().map(|e| e.to_string()),
        "queryType": format!("{:?}", classify_query(query)),
        "normalized": collapse_whitespace(query),
        "interpolated": interpolate(query, &params),
        "cacheKey": cache.key_for(query, &params),
    }))
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("NEBULIX_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
