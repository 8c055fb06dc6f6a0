//! Extractors derive a value from a response for binding or validation

use jsonpath_rust::JsonPathQuery;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::context::{render_scalar, Context};
use crate::error::{CompileError, ExtractError};
use crate::transport::{header_value, Headers};

/// Strategy that reads one value out of a response
pub trait Extractor: Send + Sync + fmt::Debug {
    /// Registry type key
    fn kind(&self) -> &str;

    /// Human readable form used in failure messages
    fn describe(&self) -> String;

    /// Body extractors need a response; the rest may run before the request
    fn is_body_extractor(&self) -> bool {
        true
    }

    fn extract(&self, body: &[u8], headers: &Headers, context: &Context) -> Result<Value, ExtractError>;
}

/// Parses the configuration value found under an extractor's type key
pub type ExtractorParser = Arc<dyn Fn(&Value) -> Result<Arc<dyn Extractor>, CompileError> + Send + Sync>;

/// Built-in extractor parsers keyed by type
pub fn builtin_parsers() -> Vec<(&'static str, ExtractorParser)> {
    vec![
        ("jsonpath_mini", Arc::new(parse_jsonpath_mini) as ExtractorParser),
        ("jsonpath", Arc::new(parse_jsonpath) as ExtractorParser),
        ("header", Arc::new(parse_header) as ExtractorParser),
        ("raw_body", Arc::new(parse_raw_body) as ExtractorParser),
        ("constant", Arc::new(parse_constant) as ExtractorParser),
        ("env", Arc::new(parse_env) as ExtractorParser),
    ]
}

/// Accepts either a bare string or `{template: "..."}`
fn query_string(config: &Value, kind: &'static str) -> Result<String, CompileError> {
    let config = match config {
        Value::Object(map) if map.len() == 1 && map.contains_key("template") => &map["template"],
        other => other,
    };
    match config {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::Number(_) => Ok(render_scalar(config)),
        _ => Err(CompileError::invalid(kind, format!("expected a query string, got {}", config))),
    }
}

pub(crate) fn parse_json_body(body: &[u8]) -> Result<Value, ExtractError> {
    serde_json::from_slice(body).map_err(|e| ExtractError::InvalidJson(e.to_string()))
}

/// Dotted path lookup: `a.b.0.c`, integer segments index arrays
#[derive(Debug, Clone)]
pub struct MiniJsonPathExtractor {
    query: String,
}

impl MiniJsonPathExtractor {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into() }
    }

    fn walk<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(value, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
                _ => None,
            })
    }
}

impl Extractor for MiniJsonPathExtractor {
    fn kind(&self) -> &str {
        "jsonpath_mini"
    }

    fn describe(&self) -> String {
        format!("jsonpath_mini '{}'", self.query)
    }

    fn extract(&self, body: &[u8], _headers: &Headers, context: &Context) -> Result<Value, ExtractError> {
        let query = context.render_bound(&self.query)?;
        let json = parse_json_body(body)?;
        Ok(Self::walk(&json, &query).cloned().unwrap_or(Value::Null))
    }
}

fn parse_jsonpath_mini(config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
    Ok(Arc::new(MiniJsonPathExtractor::new(query_string(config, "jsonpath_mini")?)))
}

/// Full JSONPath expression evaluated with `jsonpath-rust`
#[derive(Debug, Clone)]
pub struct JsonPathExtractor {
    query: String,
}

impl Extractor for JsonPathExtractor {
    fn kind(&self) -> &str {
        "jsonpath"
    }

    fn describe(&self) -> String {
        format!("jsonpath '{}'", self.query)
    }

    fn extract(&self, body: &[u8], _headers: &Headers, context: &Context) -> Result<Value, ExtractError> {
        let query = context.render_bound(&self.query)?;
        let json = parse_json_body(body)?;
        match json.path(&query) {
            // Matches come back as an array; a single match is unwrapped
            Ok(Value::Array(mut matches)) if matches.len() == 1 => Ok(matches.remove(0)),
            Ok(result) => Ok(result),
            Err(message) => Err(ExtractError::InvalidQuery { query, message }),
        }
    }
}

fn parse_jsonpath(config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
    Ok(Arc::new(JsonPathExtractor {
        query: query_string(config, "jsonpath")?,
    }))
}

/// Last value of a response header, `null` when absent
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    name: String,
}

impl Extractor for HeaderExtractor {
    fn kind(&self) -> &str {
        "header"
    }

    fn describe(&self) -> String {
        format!("header '{}'", self.name)
    }

    fn extract(&self, _body: &[u8], headers: &Headers, context: &Context) -> Result<Value, ExtractError> {
        let name = context.render_bound(&self.name)?;
        Ok(header_value(headers, &name)
            .map(|value| Value::String(value.to_string()))
            .unwrap_or(Value::Null))
    }
}

fn parse_header(config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
    Ok(Arc::new(HeaderExtractor {
        name: query_string(config, "header")?,
    }))
}

#[derive(Debug, Clone)]
pub struct RawBodyExtractor;

impl Extractor for RawBodyExtractor {
    fn kind(&self) -> &str {
        "raw_body"
    }

    fn describe(&self) -> String {
        "raw_body".to_string()
    }

    fn extract(&self, body: &[u8], _headers: &Headers, _context: &Context) -> Result<Value, ExtractError> {
        Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
    }
}

fn parse_raw_body(_config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
    Ok(Arc::new(RawBodyExtractor))
}

/// Fixed value, resolved against the context at extraction time
#[derive(Debug, Clone)]
pub struct ConstantExtractor {
    value: Value,
}

impl Extractor for ConstantExtractor {
    fn kind(&self) -> &str {
        "constant"
    }

    fn describe(&self) -> String {
        format!("constant {}", self.value)
    }

    fn is_body_extractor(&self) -> bool {
        false
    }

    fn extract(&self, _body: &[u8], _headers: &Headers, context: &Context) -> Result<Value, ExtractError> {
        Ok(context.resolve_bound(&self.value)?)
    }
}

fn parse_constant(config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
    let value = match config {
        Value::Object(map) if map.len() == 1 && map.contains_key("template") => map["template"].clone(),
        other => other.clone(),
    };
    Ok(Arc::new(ConstantExtractor { value }))
}

#[derive(Debug, Clone)]
pub struct EnvExtractor {
    variable_name: String,
}

impl Extractor for EnvExtractor {
    fn kind(&self) -> &str {
        "env"
    }

    fn describe(&self) -> String {
        format!("env '{}'", self.variable_name)
    }

    fn is_body_extractor(&self) -> bool {
        false
    }

    fn extract(&self, _body: &[u8], _headers: &Headers, context: &Context) -> Result<Value, ExtractError> {
        let name = context.render_bound(&self.variable_name)?;
        std::env::var(&name)
            .map(Value::String)
            .map_err(|_| ExtractError::MissingEnvironment(name))
    }
}

fn parse_env(config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
    Ok(Arc::new(EnvExtractor {
        variable_name: query_string(config, "env")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BODY: &[u8] = br#"{"id": 7, "user": {"name": "ada", "roles": ["admin", "dev"]}, "items": [{"sku": "a1"}, {"sku": "b2"}]}"#;

    fn no_headers() -> Headers {
        Vec::new()
    }

    #[test]
    fn test_jsonpath_mini_walks_objects_and_arrays() {
        let context = Context::new();
        let extractor = parse_jsonpath_mini(&json!("user.roles.1")).unwrap();
        assert_eq!(extractor.extract(BODY, &no_headers(), &context).unwrap(), json!("dev"));

        let missing = parse_jsonpath_mini(&json!("user.email")).unwrap();
        assert_eq!(missing.extract(BODY, &no_headers(), &context).unwrap(), Value::Null);
    }

    #[test]
    fn test_jsonpath_mini_query_is_templated() {
        let mut context = Context::new();
        context.bind("index", json!(1));
        let extractor = parse_jsonpath_mini(&json!({"template": "items.{{index}}.sku"})).unwrap();
        assert_eq!(extractor.extract(BODY, &no_headers(), &context).unwrap(), json!("b2"));
    }

    #[test]
    fn test_jsonpath_single_match_unwrapped() {
        let context = Context::new();
        let extractor = parse_jsonpath(&json!("$.user.name")).unwrap();
        assert_eq!(extractor.extract(BODY, &no_headers(), &context).unwrap(), json!("ada"));

        let many = parse_jsonpath(&json!("$.items[*].sku")).unwrap();
        assert_eq!(many.extract(BODY, &no_headers(), &context).unwrap(), json!(["a1", "b2"]));
    }

    #[test]
    fn test_invalid_json_body() {
        let context = Context::new();
        let extractor = parse_jsonpath_mini(&json!("id")).unwrap();
        let err = extractor.extract(b"<html>", &no_headers(), &context).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidJson(_)));
    }

    #[test]
    fn test_header_extractor() {
        let context = Context::new();
        let headers = vec![("location".to_string(), "/users/7".to_string())];
        let extractor = parse_header(&json!("Location")).unwrap();
        assert_eq!(extractor.extract(b"", &headers, &context).unwrap(), json!("/users/7"));
        let missing = parse_header(&json!("etag")).unwrap();
        assert_eq!(missing.extract(b"", &headers, &context).unwrap(), Value::Null);
    }

    #[test]
    fn test_constant_is_not_a_body_extractor() {
        let mut context = Context::new();
        context.bind("count", json!(3));
        let extractor = parse_constant(&json!("{{count}}")).unwrap();
        assert!(!extractor.is_body_extractor());
        assert_eq!(extractor.extract(b"", &no_headers(), &context).unwrap(), json!(3));
        assert!(parse_raw_body(&Value::Null).unwrap().is_body_extractor());
    }

    #[test]
    fn test_env_extractor_missing_variable() {
        let context = Context::new();
        let extractor = parse_env(&json!("RESTTEST_EXTRACTOR_SURELY_UNSET")).unwrap();
        assert_eq!(
            extractor.extract(b"", &no_headers(), &context).unwrap_err(),
            ExtractError::MissingEnvironment("RESTTEST_EXTRACTOR_SURELY_UNSET".to_string())
        );
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(parse_jsonpath_mini(&json!("")).is_err());
        assert!(parse_header(&json!({"name": "x"})).is_err());
    }
}
