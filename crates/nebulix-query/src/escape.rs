//! Value escaping, parameter interpolation, query validation and
//! statement classification.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::query::Params;

const TRUNCATE_AT: usize = 100;

/// Piece of query text: either executable code or a quoted literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Code(&'a str),
    /// Includes the surrounding quote characters.
    Literal(&'a str),
}

/// Split a query into code and quoted sections (`"..."`, `'...'`, `` `...` ``).
///
/// Backslash escapes are honored inside string literals but not inside
/// backtick identifiers. An unterminated literal runs to the end of input.
fn segments(query: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in query.char_indices() {
        match quote {
            None => {
                if matches!(c, '"' | '\'' | '`') {
                    if start < i {
                        out.push(Segment::Code(&query[start..i]));
                    }
                    start = i;
                    quote = Some(c);
                }
            }
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    let end = i + c.len_utf8();
                    out.push(Segment::Literal(&query[start..end]));
                    start = end;
                    quote = None;
                }
            }
        }
    }

    if start < query.len() {
        let rest = &query[start..];
        out.push(if quote.is_some() {
            Segment::Literal(rest)
        } else {
            Segment::Code(rest)
        });
    }
    out
}

/// Quote and escape a string so it reads back as exactly `s`.
#[must_use]
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Backtick-quote a schema identifier (space, tag, edge type, property).
///
/// Backticks inside the name cannot be escaped on the wire and are dropped.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| *c != '`' && !c.is_control()).collect();
    format!("`{cleaned}`")
}

/// Render a parameter value as a query literal.
#[must_use]
pub fn escape_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => escape_string(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(escape_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let key = if is_plain_identifier(k) {
                        k.clone()
                    } else {
                        quote_identifier(k)
                    };
                    format!("{key}: {}", escape_value(v))
                })
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn interpolate_code(code: &str, params: &Params, out: &mut String) {
    let mut chars = code.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let name_start = i + 1;
        let mut name_end = name_start;
        while let Some(&(j, n)) = chars.peek() {
            let valid = if j == name_start {
                n.is_ascii_alphabetic() || n == '_'
            } else {
                n.is_ascii_alphanumeric() || n == '_'
            };
            if !valid {
                break;
            }
            name_end = j + n.len_utf8();
            chars.next();
        }
        let name = &code[name_start..name_end];
        match params.get(name) {
            Some(value) if !name.is_empty() => out.push_str(&escape_value(value)),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
    }
}

/// Substitute `$name` placeholders with escaped parameter values.
///
/// Placeholders inside quoted sections and names without a matching
/// parameter (such as `$-`, `$^` or `$$` references) are left as written.
#[must_use]
pub fn interpolate(query: &str, params: &Params) -> String {
    if params.is_empty() {
        return query.to_owned();
    }
    let mut out = String::with_capacity(query.len());
    for segment in segments(query) {
        match segment {
            Segment::Code(code) => interpolate_code(code, params, &mut out),
            Segment::Literal(lit) => out.push_str(lit),
        }
    }
    out
}

/// Collapse whitespace runs outside literals to a single space and trim.
#[must_use]
pub fn collapse_whitespace(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut pending_space = false;
    for segment in segments(query.trim()) {
        match segment {
            Segment::Code(code) => {
                for c in code.chars() {
                    if c.is_whitespace() {
                        pending_space = true;
                    } else {
                        if pending_space && !out.is_empty() {
                            out.push(' ');
                        }
                        pending_space = false;
                        out.push(c);
                    }
                }
            }
            Segment::Literal(lit) => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push_str(lit);
            }
        }
    }
    out
}

/// Cache-key form of a query: whitespace collapsed and code folded to lower
/// case. Quoted literals, backtick identifiers and `$name` placeholders keep
/// their case.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    let collapsed = collapse_whitespace(query);
    let mut out = String::with_capacity(collapsed.len());
    for segment in segments(&collapsed) {
        match segment {
            Segment::Code(code) => {
                let mut in_placeholder = false;
                for c in code.chars() {
                    if c == '$' {
                        in_placeholder = true;
                    } else if !(c.is_alphanumeric() || c == '_') {
                        in_placeholder = false;
                    }
                    if in_placeholder {
                        out.push(c);
                    } else {
                        out.extend(c.to_lowercase());
                    }
                }
            }
            Segment::Literal(lit) => out.push_str(lit),
        }
    }
    out
}

fn without_literals(query: &str) -> String {
    segments(query)
        .into_iter()
        .map(|s| match s {
            Segment::Code(code) => code,
            Segment::Literal(_) => "\"\"",
        })
        .collect()
}

static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)(^|;)\s*DROP\s+SPACE\s*(IF\s+EXISTS\s*)?(\*|;|$)",
            "DROP SPACE requires an explicit space name",
        ),
        (
            r"(?i)(^|;)\s*CLEAR\s+SPACE\s*(IF\s+EXISTS\s*)?(\*|;|$)",
            "CLEAR SPACE requires an explicit space name",
        ),
        (r"(?i)\bTRUNCATE\b", "TRUNCATE is not allowed"),
        (
            r"(?i);\s*(DROP|CLEAR)\s+(SPACE|TAG|EDGE|INDEX|USER)\b",
            "chained destructive statement",
        ),
        (
            r"(?i)\bDELETE\s+(VERTEX|EDGE)\s+\*",
            "unscoped DELETE of all vertices or edges",
        ),
    ]
    .into_iter()
    .map(|(re, reason)| (Regex::new(re).unwrap(), reason))
    .collect()
});

/// Reject empty statements and known destructive patterns.
///
/// Content of quoted literals is ignored, so user data mentioning
/// `TRUNCATE` does not trip the check.
///
/// # Errors
///
/// Returns `EngineError::Rejected` naming the violated rule.
pub fn validate_query(query: &str) -> Result<(), EngineError> {
    if query.trim().is_empty() {
        return Err(EngineError::Rejected("query must not be empty".into()));
    }
    let code = without_literals(query);
    for (re, reason) in DANGEROUS_PATTERNS.iter() {
        if re.is_match(&code) {
            return Err(EngineError::Rejected((*reason).to_owned()));
        }
    }
    Ok(())
}

/// Statement category derived from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Read,
    Write,
    Ddl,
    Admin,
    Use,
    Other,
}

/// Counter bucket used by runner statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsBucket {
    Read,
    Write,
    Use,
    Other,
}

impl QueryType {
    #[must_use]
    pub fn bucket(self) -> StatsBucket {
        match self {
            Self::Read => StatsBucket::Read,
            Self::Write => StatsBucket::Write,
            Self::Use => StatsBucket::Use,
            Self::Ddl | Self::Admin | Self::Other => StatsBucket::Other,
        }
    }
}

/// Classify a statement for metrics. Never used for authorization.
#[must_use]
pub fn classify_query(query: &str) -> QueryType {
    let keyword = query
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    match keyword.as_str() {
        "MATCH" | "GO" | "FETCH" | "LOOKUP" | "FIND" | "GET" | "YIELD" | "RETURN" | "WITH"
        | "UNWIND" | "OPTIONAL" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "PROFILE" => {
            QueryType::Read
        }
        "INSERT" | "UPDATE" | "UPSERT" | "DELETE" => QueryType::Write,
        "CREATE" | "ALTER" | "DROP" | "REBUILD" | "CLEAR" | "TRUNCATE" => QueryType::Ddl,
        "SUBMIT" | "BALANCE" | "KILL" | "ADD" | "SIGN" | "GRANT" | "REVOKE" | "CHANGE"
        | "STOP" | "RESTORE" | "DOWNLOAD" | "INGEST" => QueryType::Admin,
        "USE" => QueryType::Use,
        _ => QueryType::Other,
    }
}

/// Shorten query text for logs and error context.
#[must_use]
pub fn truncate_query(query: &str) -> String {
    if query.chars().count() <= TRUNCATE_AT {
        return query.to_owned();
    }
    let mut out: String = query.chars().take(TRUNCATE_AT).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    /// Read back a double-quoted literal produced by `escape_string`.
    fn parse_string_literal(lit: &str) -> Option<String> {
        let inner = lit.strip_prefix('"')?.strip_suffix('"')?;
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next()? {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    other => out.push(other),
                },
                '"' => return None,
                other => out.push(other),
            }
        }
        Some(out)
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        let escaped = escape_string(r#"it's a "quoted" \path"#);
        assert_eq!(escaped, r#""it\'s a \"quoted\" \\path""#);
        assert_eq!(
            parse_string_literal(&escaped).unwrap(),
            r#"it's a "quoted" \path"#
        );
    }

    #[test]
    fn escaped_literal_forms_single_segment() {
        let value = escape_string("a\"; DROP SPACE; \\");
        let query = format!("INSERT VERTEX t(v) VALUES \"x\":({value})");
        let literals: Vec<_> = segments(&query)
            .into_iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .collect();
        assert_eq!(literals.len(), 2);
        assert!(validate_query(&query).is_ok());
    }

    #[test]
    fn scalar_and_nested_values() {
        assert_eq!(escape_value(&json!(42)), "42");
        assert_eq!(escape_value(&json!(1.5)), "1.5");
        assert_eq!(escape_value(&json!(true)), "true");
        assert_eq!(escape_value(&Value::Null), "NULL");
        assert_eq!(escape_value(&json!(["a", 1])), r#"["a", 1]"#);
        assert_eq!(
            escape_value(&json!({"name": "x", "has space": 2})),
            r#"{`has space`: 2, name: "x"}"#
        );
    }

    #[test]
    fn interpolation_replaces_known_placeholders_only() {
        let mut params = Params::new();
        params.insert("name".into(), json!("o'brien"));
        params.insert("depth".into(), json!(3));
        let out = interpolate(
            "GO $depth STEPS FROM $name OVER calls YIELD $$.fn.name, $-.id, $missing",
            &params,
        );
        assert_eq!(
            out,
            r#"GO 3 STEPS FROM "o\'brien" OVER calls YIELD $$.fn.name, $-.id, $missing"#
        );
    }

    #[test]
    fn interpolation_skips_literals() {
        let mut params = Params::new();
        params.insert("x".into(), json!(1));
        let out = interpolate(r#"YIELD "$x" AS a, $x AS b"#, &params);
        assert_eq!(out, r#"YIELD "$x" AS a, 1 AS b"#);
    }

    #[test]
    fn interpolation_prefers_longest_name() {
        let mut params = Params::new();
        params.insert("id".into(), json!(1));
        params.insert("ids".into(), json!([1, 2]));
        assert_eq!(interpolate("$ids $id", &params), "[1, 2] 1");
    }

    #[test]
    fn collapse_keeps_literal_spacing() {
        assert_eq!(
            collapse_whitespace("  MATCH   (v)\n\tWHERE v.name == \"a   b\"  RETURN v "),
            "MATCH (v) WHERE v.name == \"a   b\" RETURN v"
        );
    }

    #[test]
    fn normalize_folds_code_only() {
        assert_eq!(
            normalize_query("MATCH (v:`Person`)  WHERE v.Name == \"Tom\" AND id(v) == $Vid RETURN v"),
            "match (v:`Person`) where v.name == \"Tom\" and id(v) == $Vid return v"
        );
    }

    #[test]
    fn validation_rules() {
        assert!(validate_query("   ").is_err());
        assert!(validate_query("DROP SPACE").is_err());
        assert!(validate_query("drop space;").is_err());
        assert!(validate_query("DROP SPACE IF EXISTS").is_err());
        assert!(validate_query("TRUNCATE TABLE x").is_err());
        assert!(validate_query("USE s; DROP SPACE code").is_err());
        assert!(validate_query("DELETE VERTEX *").is_err());
        assert!(validate_query("DROP SPACE code_graph").is_ok());
        assert!(validate_query("DROP TAG function").is_ok());
        assert!(validate_query("INSERT VERTEX t(d) VALUES \"1\":(\"truncate me\")").is_ok());
        assert!(validate_query("MATCH (v) RETURN v").is_ok());
    }

    #[test]
    fn classification_by_leading_keyword() {
        assert_eq!(classify_query("  match (v) return v"), QueryType::Read);
        assert_eq!(classify_query("GO FROM \"a\" OVER e"), QueryType::Read);
        assert_eq!(classify_query("(MATCH (v) RETURN v)"), QueryType::Read);
        assert_eq!(classify_query("INSERT VERTEX x() VALUES \"a\":()"), QueryType::Write);
        assert_eq!(classify_query("CREATE TAG IF NOT EXISTS f()"), QueryType::Ddl);
        assert_eq!(classify_query("SUBMIT JOB COMPACT"), QueryType::Admin);
        assert_eq!(classify_query("USE code_graph"), QueryType::Use);
        assert_eq!(classify_query("USE;"), QueryType::Use);
        assert_eq!(classify_query(""), QueryType::Other);
        assert_eq!(QueryType::Ddl.bucket(), StatsBucket::Other);
        assert_eq!(QueryType::Read.bucket(), StatsBucket::Read);
    }

    #[test]
    fn truncation() {
        let short = "SHOW SPACES";
        assert_eq!(truncate_query(short), short);
        let long = "x".repeat(150);
        let t = truncate_query(&long);
        assert_eq!(t.len(), 103);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn identifiers_are_backticked() {
        assert_eq!(quote_identifier("function"), "`function`");
        assert_eq!(quote_identifier("bad`name"), "`badname`");
    }

    proptest! {
        #[test]
        fn escape_round_trips(s in "\\PC*") {
            let escaped = escape_string(&s);
            prop_assert_eq!(parse_string_literal(&escaped), Some(s));
        }

        #[test]
        fn escaped_string_is_one_literal(s in "[a-z\"'\\\\; ]{0,40}") {
            let escaped = escape_string(&s);
            let segs = segments(&escaped);
            prop_assert_eq!(segs, vec![Segment::Literal(escaped.as_str())]);
        }
    }
}
