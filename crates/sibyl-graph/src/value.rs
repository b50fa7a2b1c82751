//! Conversions between Cypher-ish query parameters / FalkorDB's RESP
//! result shape and plain JSON rows, mirroring `GraphClient.normalize_result`
//! in the source implementation.

use std::collections::HashMap;

use redis::Value as RedisValue;
use serde_json::Value as JsonValue;

pub type GraphRow = HashMap<String, JsonValue>;

/// Render a `CYPHER k=v ... query` parameter prefix, FalkorDB's supported
/// parameter-binding syntax for `GRAPH.QUERY`/`GRAPH.RO_QUERY`.
pub fn bind_params(query: &str, params: &[(&str, JsonValue)]) -> String {
    if params.is_empty() {
        return query.to_string();
    }
    let mut prefix = String::from("CYPHER ");
    for (key, value) in params {
        prefix.push_str(key);
        prefix.push('=');
        prefix.push_str(&cypher_literal(value));
        prefix.push(' ');
    }
    format!("{prefix}{query}")
}

fn cypher_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => format!("{s:?}"),
        JsonValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(cypher_literal).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Best-effort conversion of a raw RESP value into JSON, then group the
/// outer array into per-row maps using `columns` as field names. FalkorDB
/// returns `[header, rows, stats]`; callers pass the `rows` element here
/// along with the header names extracted from `header`.
pub fn normalize_result(columns: &[String], rows: RedisValue) -> Vec<GraphRow> {
    let rows = redis_to_json(rows);
    let JsonValue::Array(rows) = rows else {
        return Vec::new();
    };
    rows.into_iter()
        .filter_map(|row| {
            let JsonValue::Array(cells) = row else {
                return None;
            };
            let mut map = GraphRow::new();
            for (name, cell) in columns.iter().zip(cells.into_iter()) {
                map.insert(name.clone(), cell);
            }
            Some(map)
        })
        .collect()
}

fn redis_to_json(value: RedisValue) -> JsonValue {
    match value {
        RedisValue::Nil => JsonValue::Null,
        RedisValue::Int(i) => JsonValue::from(i),
        RedisValue::Double(d) => serde_json::Number::from_f64(d).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        RedisValue::Boolean(b) => JsonValue::Bool(b),
        RedisValue::BulkString(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        RedisValue::SimpleString(s) => JsonValue::String(s),
        RedisValue::Array(items) | RedisValue::Set(items) => {
            JsonValue::Array(items.into_iter().map(redis_to_json).collect())
        }
        RedisValue::Map(pairs) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in pairs {
                if let JsonValue::String(key) = redis_to_json(k) {
                    obj.insert(key, redis_to_json(v));
                }
            }
            JsonValue::Object(obj)
        }
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_params_renders_cypher_prefix() {
        let rendered = bind_params(
            "MATCH (n:Entity {id: $id}) RETURN n",
            &[("id", JsonValue::String("task_1".into()))],
        );
        assert!(rendered.starts_with("CYPHER id=\"task_1\" "));
        assert!(rendered.ends_with("RETURN n"));
    }

    #[test]
    fn bind_params_passthrough_when_empty() {
        let rendered = bind_params("RETURN 1", &[]);
        assert_eq!(rendered, "RETURN 1");
    }

    #[test]
    fn normalize_result_groups_cells_by_column() {
        let rows = RedisValue::Array(vec![RedisValue::Array(vec![
            RedisValue::BulkString(b"task_1".to_vec()),
            RedisValue::Int(3),
        ])]);
        let out = normalize_result(&["id".to_string(), "count".to_string()], rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("id").unwrap(), &JsonValue::String("task_1".into()));
        assert_eq!(out[0].get("count").unwrap(), &JsonValue::from(3));
    }

    #[test]
    fn normalize_result_empty_on_non_array() {
        let out = normalize_result(&["id".to_string()], RedisValue::Nil);
        assert!(out.is_empty());
    }
}
