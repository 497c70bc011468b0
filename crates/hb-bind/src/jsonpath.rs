//! kubectl-style field path queries over JSON objects
//!
//! Supports the subset bind templates use to read Service fields:
//! `{.spec.clusterIP}`, `{.spec.ports[0].port}`, `{.metadata.labels['app']}`.
//! The surrounding braces and a leading `$` are optional.

use serde_json::Value;

use hb_common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Evaluate `path` against `value` and render the result as a string.
///
/// Strings are returned verbatim, other scalars in their JSON form, and
/// objects or arrays as compact JSON. A missing or null field is not found.
pub fn query(value: &Value, path: &str) -> Result<String> {
    let segments = parse(path)?;

    let mut current = value;
    for segment in &segments {
        let next = match segment {
            Segment::Field(name) => current.get(name.as_str()),
            Segment::Index(i) => current.get(*i),
        };
        current = match next {
            Some(Value::Null) | None => return Err(Error::not_found("field", path)),
            Some(v) => v,
        };
    }

    Ok(match current {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(current)?,
        other => other.to_string(),
    })
}

fn parse(path: &str) -> Result<Vec<Segment>> {
    let invalid = |msg: &str| Error::validation_for_field("jsonpath", format!("{msg} in '{path}'"));

    let mut expr = path.trim();
    if let Some(inner) = expr.strip_prefix('{').and_then(|e| e.strip_suffix('}')) {
        expr = inner.trim();
    }
    expr = expr.strip_prefix('$').unwrap_or(expr);
    if expr.is_empty() {
        return Err(invalid("empty path"));
    }

    let mut segments = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' || c == '[' {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(invalid("empty field name"));
                }
                segments.push(Segment::Field(name));
            }
            '[' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(c) => inner.push(c),
                        None => return Err(invalid("unclosed '['")),
                    }
                }
                let inner = inner.trim();
                let quoted = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
                match quoted {
                    Some(key) => segments.push(Segment::Field(key.to_string())),
                    None => {
                        let index = inner
                            .parse::<usize>()
                            .map_err(|_| invalid("unsupported index expression"))?;
                        segments.push(Segment::Index(index));
                    }
                }
            }
            _ => return Err(invalid("expected '.' or '['")),
        }
    }

    Ok(segments)
}
