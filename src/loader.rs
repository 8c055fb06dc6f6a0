//! Reading test documents and normalizing their node shapes

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::CompileError;

/// Read a YAML or JSON test document; anything not ending in `.json` is parsed as YAML
pub fn read_test_file(path: &Path) -> Result<Value, CompileError> {
    let content = std::fs::read_to_string(path).map_err(|e| CompileError::FileRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        _ => parse_yaml_str(&content),
    };

    parsed.map_err(|message| CompileError::FileParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse YAML text into a JSON value tree; an empty document is an empty sequence
pub fn parse_yaml_str(content: &str) -> Result<Value, String> {
    if content.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string())
}

/// Split a node into its single key (lowercased) and value
pub fn single_key_node(node: &Value) -> Result<(String, &Value), CompileError> {
    match node.as_object() {
        Some(map) if map.len() == 1 => map
            .iter()
            .next()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .ok_or_else(|| CompileError::MalformedNode(node.to_string())),
        _ => Err(CompileError::MalformedNode(format!(
            "each node must be a mapping with exactly one key, got {}",
            node
        ))),
    }
}

/// Accept a mapping, or a list of single-key mappings, as one mapping.
/// Later entries replace earlier ones; keys are kept as written.
pub fn flatten_mapping(value: &Value, kind: &'static str) -> Result<Map<String, Value>, CompileError> {
    let mut flattened = Map::new();
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                flattened.insert(key.clone(), item.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                let map = item
                    .as_object()
                    .ok_or_else(|| CompileError::invalid(kind, format!("list entries must be mappings, got {}", item)))?;
                for (key, item) in map {
                    flattened.insert(key.clone(), item.clone());
                }
            }
        }
        Value::Null => {}
        other => {
            return Err(CompileError::invalid(kind, format!("expected a mapping, got {}", other)));
        }
    }
    Ok(flattened)
}

/// Like [`flatten_mapping`] but with lowercased keys, for `test` and `config` fields
pub fn flatten_fields(value: &Value, kind: &'static str) -> Result<Map<String, Value>, CompileError> {
    Ok(flatten_mapping(value, kind)?
        .into_iter()
        .map(|(key, item)| (key.to_ascii_lowercase(), item))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_preserves_key_order() {
        let value = parse_yaml_str("- test:\n    url: /a\n    name: first\n    method: GET\n").unwrap();
        let test = value[0]["test"].as_object().unwrap();
        let keys: Vec<&String> = test.keys().collect();
        assert_eq!(keys, vec!["url", "name", "method"]);
    }

    #[test]
    fn test_read_json_and_yaml_files() {
        let dir = TempDir::new().unwrap();
        let json_path = dir.path().join("suite.json");
        std::fs::write(&json_path, r#"[{"url": "/health"}]"#).unwrap();
        assert_eq!(read_test_file(&json_path).unwrap(), json!([{"url": "/health"}]));

        let yaml_path = dir.path().join("suite.yaml");
        std::fs::write(&yaml_path, "- url: /health\n").unwrap();
        assert_eq!(read_test_file(&yaml_path).unwrap(), json!([{"url": "/health"}]));

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "- test: [unclosed\n").unwrap();
        assert!(matches!(read_test_file(&broken), Err(CompileError::FileParse { .. })));
        assert!(matches!(
            read_test_file(&dir.path().join("missing.yaml")),
            Err(CompileError::FileRead { .. })
        ));
    }

    #[test]
    fn test_flatten_accepts_list_form() {
        let fields = flatten_fields(&json!([{"URL": "/a"}, {"method": "POST"}, {"url": "/b"}]), "test").unwrap();
        assert_eq!(Value::Object(fields), json!({"url": "/b", "method": "POST"}));

        let binds = flatten_mapping(&json!([{"userId": 1}, {"Token": "t"}]), "variable_binds").unwrap();
        assert_eq!(Value::Object(binds), json!({"userId": 1, "Token": "t"}));
        assert!(flatten_mapping(&json!("scalar"), "test").is_err());
    }

    #[test]
    fn test_single_key_node() {
        let node = json!({"URL": "/x"});
        let (key, value) = single_key_node(&node).unwrap();
        assert_eq!(key, "url");
        assert_eq!(value, &json!("/x"));
        assert!(single_key_node(&json!({"url": "/x", "test": {}})).is_err());
    }
}
