//! The `Test` entity: one HTTP call with its validators and extractors

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{render_scalar, ResolvePass};
use crate::error::{CompileError, TemplateError};
use crate::extractors::Extractor;
use crate::loader::{flatten_fields, flatten_mapping};
use crate::registry::Registry;
use crate::transport::{BasicAuth, HttpMethod, HttpRequest};
use crate::validators::Validator;

pub const DEFAULT_GROUP: &str = "Default";

const BASE_URL_VARIABLE: &str = "default_base_url";

/// One compiled HTTP test. Fields holding templates are resolved per execution.
#[derive(Clone)]
pub struct Test {
    pub name: String,
    pub url: Value,
    pub method: HttpMethod,
    pub headers: Map<String, Value>,
    pub body: Option<Value>,
    pub expected_status: Vec<u16>,
    pub validators: Vec<Arc<dyn Validator>>,
    pub extractors_before: Vec<(String, Arc<dyn Extractor>)>,
    pub extractors_after: Vec<(String, Arc<dyn Extractor>)>,
    pub generator_binds: Vec<(String, String)>,
    pub variable_binds: Map<String, Value>,
    pub stop_on_failure: bool,
    pub group: String,
    pub delay: Option<Duration>,
    pub auth_username: Option<Value>,
    pub auth_password: Option<Value>,
}

impl Test {
    /// Minimal GET test for the `url:` shorthand
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: url.clone(),
            url: Value::String(url),
            method: HttpMethod::GET,
            headers: Map::new(),
            body: None,
            expected_status: Vec::new(),
            validators: Vec::new(),
            extractors_before: Vec::new(),
            extractors_after: Vec::new(),
            generator_binds: Vec::new(),
            variable_binds: Map::new(),
            stop_on_failure: false,
            group: DEFAULT_GROUP.to_string(),
            delay: None,
            auth_username: None,
            auth_password: None,
        }
    }

    /// Compile a `test:` node (a mapping or a list of single-key mappings)
    pub fn compile(node: &Value, registry: &Registry) -> Result<Self, CompileError> {
        let fields = flatten_fields(node, "test")?;
        let url = fields
            .get("url")
            .map(unwrap_template)
            .ok_or_else(|| CompileError::invalid("test", "'url' is required"))?;
        if !(url.is_string() || url.is_number()) {
            return Err(CompileError::invalid("test", format!("'url' must be a string, got {}", url)));
        }

        let mut test = Test::from_url(render_scalar(&url));
        test.name = "Unnamed".to_string();

        for (key, value) in &fields {
            match key.as_str() {
                "url" => {}
                "name" => test.name = render_scalar(value),
                "method" => {
                    test.method = render_scalar(value)
                        .parse()
                        .map_err(|e: String| CompileError::invalid("test", e))?;
                }
                "headers" => test.headers = flatten_mapping(&unwrap_template(value), "headers")?,
                "body" => test.body = Some(unwrap_template(value)).filter(|body| !body.is_null()),
                "expected_status" => test.expected_status = parse_status_codes(value)?,
                "validators" => test.validators = parse_validators(value, registry)?,
                "extractors" | "extract_binds" => {
                    let extractors = parse_extractors(value, registry)?;
                    test.extractors_after.extend(extractors);
                }
                "extractors_before" => {
                    let extractors = parse_extractors(value, registry)?;
                    if let Some((name, _)) = extractors.iter().find(|(_, extractor)| extractor.is_body_extractor()) {
                        return Err(CompileError::invalid(
                            "test",
                            format!("extractor '{}' reads the response body and cannot run before the request", name),
                        ));
                    }
                    test.extractors_before = extractors;
                }
                "generator_binds" => {
                    test.generator_binds = flatten_mapping(value, "generator_binds")?
                        .into_iter()
                        .map(|(variable, generator)| (variable, render_scalar(&generator)))
                        .collect();
                }
                "variable_binds" => test.variable_binds = flatten_mapping(value, "variable_binds")?,
                "stop_on_failure" => test.stop_on_failure = parse_bool(value, "stop_on_failure")?,
                "group" => test.group = render_scalar(value),
                "delay" => {
                    let seconds = value
                        .as_f64()
                        .filter(|s| s.is_finite() && *s >= 0.0)
                        .ok_or_else(|| CompileError::invalid("test", "'delay' must be a non-negative number of seconds"))?;
                    test.delay = Some(Duration::from_secs_f64(seconds));
                }
                "auth_username" => test.auth_username = Some(value.clone()),
                "auth_password" => test.auth_password = Some(value.clone()),
                other => return Err(CompileError::invalid("test", format!("unknown test key '{}'", other))),
            }
        }

        Ok(test)
    }

    /// Empty `expected_status` accepts any 2xx code
    pub fn expects_status(&self, status_code: u16) -> bool {
        if self.expected_status.is_empty() {
            (200..300).contains(&status_code)
        } else {
            self.expected_status.contains(&status_code)
        }
    }

    /// True if running this test can change the context seen by later steps
    pub fn writes_context(&self) -> bool {
        !self.extractors_before.is_empty() || !self.extractors_after.is_empty() || !self.generator_binds.is_empty()
    }

    /// Resolve url, headers, body and auth within one pass
    pub fn resolve_request(&self, pass: &mut ResolvePass<'_>) -> Result<HttpRequest, TemplateError> {
        let mut url = pass.resolve_string(&render_scalar(&self.url))?;
        if !url.contains("://") {
            if let Some(base) = pass.variable(BASE_URL_VARIABLE) {
                url = join_url(&render_scalar(base), &url);
            }
        }

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        for (name, template) in &self.headers {
            headers.push((name.clone(), render_scalar(&pass.resolve(template)?)));
        }

        let body = match &self.body {
            None => None,
            Some(template) => match pass.resolve(template)? {
                Value::String(text) => Some(text.into_bytes()),
                structured @ (Value::Object(_) | Value::Array(_)) => {
                    if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type")) {
                        headers.push(("content-type".to_string(), "application/json".to_string()));
                    }
                    Some(structured.to_string().into_bytes())
                }
                Value::Null => None,
                scalar => Some(render_scalar(&scalar).into_bytes()),
            },
        };

        let auth = match &self.auth_username {
            Some(username) => {
                let username = render_scalar(&pass.resolve(username)?);
                let password = match &self.auth_password {
                    Some(password) => render_scalar(&pass.resolve(password)?),
                    None => String::new(),
                };
                Some(BasicAuth { username, password })
            }
            None => None,
        };

        Ok(HttpRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
            auth,
        })
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("group", &self.group)
            .field("expected_status", &self.expected_status)
            .field("validators", &self.validators.len())
            .field("extractors_before", &self.extractors_before.len())
            .field("extractors_after", &self.extractors_after.len())
            .field("stop_on_failure", &self.stop_on_failure)
            .finish()
    }
}

fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) if !path.is_empty() => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// `{template: X}` marks X as templated; every field is templated anyway
fn unwrap_template(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key("template") => map["template"].clone(),
        other => other.clone(),
    }
}

fn parse_bool(value: &Value, field: &str) -> Result<bool, CompileError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(CompileError::invalid("test", format!("'{}' must be a boolean, got '{}'", field, s))),
        },
        other => Err(CompileError::invalid("test", format!("'{}' must be a boolean, got {}", field, other))),
    }
}

fn parse_status_code(value: &Value) -> Result<u16, CompileError> {
    let code = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    code.filter(|code| (100..=599).contains(code))
        .map(|code| code as u16)
        .ok_or_else(|| CompileError::invalid("test", format!("invalid expected status code {}", value)))
}

fn parse_status_codes(value: &Value) -> Result<Vec<u16>, CompileError> {
    match value {
        Value::Array(codes) => codes.iter().map(parse_status_code).collect(),
        single => Ok(vec![parse_status_code(single)?]),
    }
}

fn parse_validators(value: &Value, registry: &Registry) -> Result<Vec<Arc<dyn Validator>>, CompileError> {
    match value {
        Value::Array(nodes) => nodes.iter().map(|node| registry.parse_validator_node(node)).collect(),
        Value::Object(map) => map
            .iter()
            .map(|(key, config)| registry.parse_validator(key, config))
            .collect(),
        other => Err(CompileError::invalid("test", format!("'validators' must be a list, got {}", other))),
    }
}

fn parse_extractors(value: &Value, registry: &Registry) -> Result<Vec<(String, Arc<dyn Extractor>)>, CompileError> {
    flatten_mapping(value, "extractors")?
        .into_iter()
        .map(|(name, node)| Ok((name, registry.parse_extractor_node(&node)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::generators::SequenceFactory;
    use serde_json::json;

    fn compile(node: Value) -> Result<Test, CompileError> {
        Test::compile(&node, &Registry::with_builtins())
    }

    #[test]
    fn test_compile_full_test() {
        let test = compile(json!({
            "name": "Create user",
            "url": "/users",
            "method": "post",
            "headers": {"X-Token": "{{token}}"},
            "body": {"name": "{{user}}"},
            "expected_status": [201, 202],
            "validators": [{"compare": {"jsonpath_mini": "id", "comparator": "gt", "expected": 0}}],
            "extract_binds": {"user_id": {"jsonpath_mini": "id"}},
            "group": "Users",
            "stop_on_failure": true
        }))
        .unwrap();

        assert_eq!(test.name, "Create user");
        assert_eq!(test.method, HttpMethod::POST);
        assert_eq!(test.expected_status, vec![201, 202]);
        assert_eq!(test.validators.len(), 1);
        assert_eq!(test.extractors_after[0].0, "user_id");
        assert_eq!(test.group, "Users");
        assert!(test.stop_on_failure);
        assert!(test.writes_context());
    }

    #[test]
    fn test_list_form_and_single_status() {
        let test = compile(json!([{"url": "/a"}, {"expected_status": "404"}])).unwrap();
        assert_eq!(test.expected_status, vec![404]);
        assert!(test.expects_status(404));
        assert!(!test.expects_status(200));
    }

    #[test]
    fn test_default_status_is_any_2xx() {
        let test = Test::from_url("/health");
        assert!(test.expects_status(200));
        assert!(test.expects_status(204));
        assert!(!test.expects_status(301));
        assert!(!test.expects_status(500));
        assert_eq!(test.group, DEFAULT_GROUP);
    }

    #[test]
    fn test_compile_errors() {
        assert!(compile(json!({"method": "GET"})).is_err());
        assert!(compile(json!({"url": "/a", "validators": [{"json_schema": {}}]})).is_err());
        assert!(compile(json!({"url": "/a", "extractors": {"x": {"xpath": "//a"}}})).is_err());
        assert!(compile(json!({"url": "/a", "expected_status": 42})).is_err());
        assert!(compile(json!({"url": "/a", "colour": "blue"})).is_err());
        assert!(compile(json!({"url": "/a", "extractors_before": {"x": {"jsonpath_mini": "id"}}})).is_err());
        assert!(compile(json!({"url": "/a", "extractors_before": {"x": {"constant": 1}}})).is_ok());
    }

    #[test]
    fn test_resolve_request_in_one_pass() {
        let test = compile(json!({
            "url": "/items/{{seq}}",
            "method": "PUT",
            "headers": {"X-Request": "req-{{seq}}"},
            "body": {"id": "{{seq}}", "owner": "{{owner}}"}
        }))
        .unwrap();

        let mut context = Context::new();
        context.bind("owner", json!("ada"));
        context.bind("default_base_url", json!("http://localhost:8080/"));
        context.add_generator("seq", &SequenceFactory::new(5, 1));

        let request = test.resolve_request(&mut context.pass()).unwrap();
        assert_eq!(request.url, "http://localhost:8080/items/5");
        assert!(request.headers.contains(&("X-Request".to_string(), "req-5".to_string())));
        assert!(request.headers.contains(&("content-type".to_string(), "application/json".to_string())));
        let body: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"id": 5, "owner": "ada"}));

        let second = test.resolve_request(&mut context.pass()).unwrap();
        assert_eq!(second.url, "http://localhost:8080/items/6");
    }

    #[test]
    fn test_resolve_request_unbound_variable() {
        let test = compile(json!({"url": "/users/{{missing}}"})).unwrap();
        let mut context = Context::new();
        let err = test.resolve_request(&mut context.pass()).unwrap_err();
        assert_eq!(err, TemplateError::UnboundVariable("missing".to_string()));
    }

    #[test]
    fn test_basic_auth_is_templated() {
        let test = compile(json!({"url": "http://h/x", "auth_username": "{{user}}", "auth_password": "secret"})).unwrap();
        let mut context = Context::new();
        context.bind("user", json!("ada"));
        let request = test.resolve_request(&mut context.pass()).unwrap();
        assert_eq!(
            request.auth,
            Some(BasicAuth {
                username: "ada".to_string(),
                password: "secret".to_string()
            })
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h/", "/a"), "http://h/a");
        assert_eq!(join_url("http://h", "a"), "http://h/a");
        assert_eq!(join_url("http://h", "/a"), "http://h/a");
    }
}
