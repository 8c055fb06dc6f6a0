//! Validators, comparators and the structured `Failure` record

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::context::{render_scalar, Context};
use crate::error::CompileError;
use crate::extractors::Extractor;
use crate::registry::Registry;
use crate::transport::Headers;

/// Classification of one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    InvalidResponse,
    Transport,
    Timeout,
    ValidatorFailed,
    ValidatorException,
    ExtractorException,
    TestException,
    OperationFailed,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureType::InvalidResponse => "Invalid HTTP Response Code",
            FailureType::Transport => "Transport Error",
            FailureType::Timeout => "Request Timeout",
            FailureType::ValidatorFailed => "Validator Failed",
            FailureType::ValidatorException => "Validator Exception",
            FailureType::ExtractorException => "Extractor Exception",
            FailureType::TestException => "Test Exception",
            FailureType::OperationFailed => "Operation Failed",
        };
        f.write_str(label)
    }
}

/// Structured record describing one validation or runtime failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub details: Option<String>,
    pub validator: Option<String>,
    pub failure_type: FailureType,
}

impl Failure {
    pub fn new(message: impl Into<String>, failure_type: FailureType) -> Self {
        Self {
            message: message.into(),
            details: None,
            validator: None,
            failure_type,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_validator(mut self, validator: &dyn Validator) -> Self {
        self.validator = Some(format!("{}: {}", validator.kind(), validator.describe()));
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.failure_type, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Strategy that inspects a response and yields pass or a [`Failure`]
pub trait Validator: Send + Sync + fmt::Debug {
    /// Registry type key
    fn kind(&self) -> &str;

    fn describe(&self) -> String;

    fn validate(&self, body: &[u8], headers: &Headers, context: &Context) -> Result<(), Failure>;
}

/// Parses the configuration value found under a validator's type key
pub type ValidatorParser =
    Arc<dyn Fn(&Value, &Registry) -> Result<Arc<dyn Validator>, CompileError> + Send + Sync>;

/// Built-in validator parsers keyed by type
pub fn builtin_parsers() -> Vec<(&'static str, ValidatorParser)> {
    vec![
        ("contains", Arc::new(parse_contains) as ValidatorParser),
        ("not_contains", Arc::new(parse_not_contains) as ValidatorParser),
        ("extract_test", Arc::new(parse_extract_test) as ValidatorParser),
        ("comparator", Arc::new(parse_comparator) as ValidatorParser),
        ("compare", Arc::new(parse_comparator) as ValidatorParser),
        ("assert_true", Arc::new(parse_assert_true) as ValidatorParser),
    ]
}

/// Truthy means not null, false, zero or an empty string/array/object
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Binary comparison applied as `comparator(actual, expected)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    ContainedBy,
    CountEq,
    Regex,
    Type,
    StrEq,
}

impl Comparator {
    pub fn parse(name: &str) -> Option<Self> {
        let comparator = match name.trim().to_ascii_lowercase().as_str() {
            "eq" | "equals" | "==" => Comparator::Eq,
            "ne" | "not_equals" | "!=" => Comparator::Ne,
            "lt" | "less_than" | "<" => Comparator::Lt,
            "le" | "less_than_or_equal" | "<=" => Comparator::Le,
            "gt" | "greater_than" | ">" => Comparator::Gt,
            "ge" | "greater_than_or_equal" | ">=" => Comparator::Ge,
            "contains" => Comparator::Contains,
            "contained_by" => Comparator::ContainedBy,
            "count_eq" | "length_eq" => Comparator::CountEq,
            "regex" => Comparator::Regex,
            "type" => Comparator::Type,
            "str_eq" => Comparator::StrEq,
            _ => return None,
        };
        Some(comparator)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Lt => "lt",
            Comparator::Le => "le",
            Comparator::Gt => "gt",
            Comparator::Ge => "ge",
            Comparator::Contains => "contains",
            Comparator::ContainedBy => "contained_by",
            Comparator::CountEq => "count_eq",
            Comparator::Regex => "regex",
            Comparator::Type => "type",
            Comparator::StrEq => "str_eq",
        }
    }

    /// Apply the comparison; `Err` means the operands cannot be compared this way
    pub fn apply(&self, actual: &Value, expected: &Value) -> Result<bool, String> {
        match self {
            Comparator::Eq => Ok(values_equal(actual, expected)),
            Comparator::Ne => Ok(!values_equal(actual, expected)),
            Comparator::Lt => order(actual, expected).map(|o| o.is_lt()),
            Comparator::Le => order(actual, expected).map(|o| o.is_le()),
            Comparator::Gt => order(actual, expected).map(|o| o.is_gt()),
            Comparator::Ge => order(actual, expected).map(|o| o.is_ge()),
            Comparator::Contains => contains(actual, expected),
            Comparator::ContainedBy => contains(expected, actual),
            Comparator::CountEq => {
                let count = match actual {
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    Value::String(s) => s.chars().count(),
                    other => return Err(format!("cannot count elements of {}", other)),
                };
                let wanted = match expected {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse::<u64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| format!("expected count must be a non-negative integer, got {}", expected))?;
                Ok(count as u64 == wanted)
            }
            Comparator::Regex => {
                let pattern = render_scalar(expected);
                let regex = Regex::new(&pattern).map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
                Ok(regex.is_match(&render_scalar(actual)))
            }
            Comparator::Type => {
                let name = expected
                    .as_str()
                    .ok_or_else(|| format!("type name must be a string, got {}", expected))?;
                type_matches(actual, name)
            }
            Comparator::StrEq => Ok(render_scalar(actual) == render_scalar(expected)),
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        // 1 and 1.0 compare equal
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

fn order(actual: &Value, expected: &Value) -> Result<std::cmp::Ordering, String> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| format!("cannot order {} and {}", actual, expected)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(format!("cannot order {} and {}", actual, expected)),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match container {
        Value::String(text) => Ok(text.contains(&render_scalar(item))),
        Value::Array(items) => Ok(items.iter().any(|candidate| values_equal(candidate, item))),
        Value::Object(map) => Ok(map.contains_key(&render_scalar(item))),
        other => Err(format!("{} is not a container", other)),
    }
}

fn type_matches(value: &Value, name: &str) -> Result<bool, String> {
    let matches = match name.to_ascii_lowercase().as_str() {
        "null" | "none" => value.is_null(),
        "str" | "string" => value.is_string(),
        "int" | "integer" => value.is_i64() || value.is_u64(),
        "float" => value.is_f64(),
        "number" => value.is_number(),
        "bool" | "boolean" => value.is_boolean(),
        "list" | "array" => value.is_array(),
        "dict" | "map" | "object" => value.is_object(),
        "scalar" => !(value.is_array() || value.is_object()),
        "collection" => value.is_array() || value.is_object(),
        other => return Err(format!("unknown type name '{}'", other)),
    };
    Ok(matches)
}

/// Named unary checks used by `extract_test`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTest {
    Exists,
    NotExists,
    IsDict,
    IsList,
    IsStr,
    IsInt,
    IsFloat,
    IsBool,
    IsNull,
    Truthy,
}

impl ValueTest {
    pub fn parse(name: &str) -> Option<Self> {
        let test = match name.trim().to_ascii_lowercase().as_str() {
            "exists" => ValueTest::Exists,
            "not_exists" => ValueTest::NotExists,
            "is_dict" => ValueTest::IsDict,
            "is_list" => ValueTest::IsList,
            "is_str" | "is_string" => ValueTest::IsStr,
            "is_int" => ValueTest::IsInt,
            "is_float" => ValueTest::IsFloat,
            "is_bool" | "is_boolean" => ValueTest::IsBool,
            "is_null" | "is_none" => ValueTest::IsNull,
            "truthy" => ValueTest::Truthy,
            _ => return None,
        };
        Some(test)
    }

    pub fn check(&self, value: &Value) -> bool {
        match self {
            ValueTest::Exists => !value.is_null(),
            ValueTest::NotExists => value.is_null(),
            ValueTest::IsDict => value.is_object(),
            ValueTest::IsList => value.is_array(),
            ValueTest::IsStr => value.is_string(),
            ValueTest::IsInt => value.is_i64() || value.is_u64(),
            ValueTest::IsFloat => value.is_f64(),
            ValueTest::IsBool => value.is_boolean(),
            ValueTest::IsNull => value.is_null(),
            ValueTest::Truthy => is_truthy(value),
        }
    }
}

const RESERVED_KEYS: &[&str] = &["comparator", "expected", "test", "message"];

fn validator_map<'a>(config: &'a Value, kind: &'static str) -> Result<&'a Map<String, Value>, CompileError> {
    config
        .as_object()
        .ok_or_else(|| CompileError::invalid(kind, "configuration must be a mapping"))
}

/// Find the single extractor declared inside a validator configuration
fn embedded_extractor(
    map: &Map<String, Value>,
    registry: &Registry,
    kind: &'static str,
) -> Result<Arc<dyn Extractor>, CompileError> {
    let mut found = None;
    for (key, value) in map {
        let key = key.to_ascii_lowercase();
        if RESERVED_KEYS.contains(&key.as_str()) || !registry.has_extractor(&key) {
            continue;
        }
        if found.is_some() {
            return Err(CompileError::invalid(kind, "only one extractor may be declared"));
        }
        found = Some(registry.parse_extractor(&key, value)?);
    }
    found.ok_or_else(|| CompileError::invalid(kind, "an extractor is required"))
}

fn run_extractor(
    validator: &dyn Validator,
    extractor: &dyn Extractor,
    body: &[u8],
    headers: &Headers,
    context: &Context,
) -> Result<Value, Failure> {
    extractor.extract(body, headers, context).map_err(|e| {
        Failure::new(
            format!("Extractor {} failed: {}", extractor.describe(), e),
            FailureType::ValidatorException,
        )
        .with_validator(validator)
    })
}

fn text_config(config: &Value, kind: &'static str) -> Result<String, CompileError> {
    let config = match config {
        Value::Object(map) if map.len() == 1 && map.contains_key("template") => &map["template"],
        other => other,
    };
    match config {
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(CompileError::invalid(kind, format!("expected text, got {}", config)))
        }
        scalar => Ok(render_scalar(scalar)),
    }
}

/// Body must (or must not) contain a substring
#[derive(Debug, Clone)]
pub struct ContainsValidator {
    needle: String,
    negate: bool,
}

impl Validator for ContainsValidator {
    fn kind(&self) -> &str {
        if self.negate {
            "not_contains"
        } else {
            "contains"
        }
    }

    fn describe(&self) -> String {
        format!("'{}'", self.needle)
    }

    fn validate(&self, body: &[u8], _headers: &Headers, context: &Context) -> Result<(), Failure> {
        let needle = context.render_bound(&self.needle).map_err(|e| {
            Failure::new(format!("Cannot resolve search text: {}", e), FailureType::ValidatorException)
                .with_validator(self)
        })?;
        let text = String::from_utf8_lossy(body);
        if text.contains(needle.as_str()) != self.negate {
            return Ok(());
        }
        let message = if self.negate {
            format!("Response body contains forbidden text '{}'", needle)
        } else {
            format!("Response body does not contain '{}'", needle)
        };
        Err(Failure::new(message, FailureType::ValidatorFailed).with_validator(self))
    }
}

fn parse_contains(config: &Value, _registry: &Registry) -> Result<Arc<dyn Validator>, CompileError> {
    Ok(Arc::new(ContainsValidator {
        needle: text_config(config, "contains")?,
        negate: false,
    }))
}

fn parse_not_contains(config: &Value, _registry: &Registry) -> Result<Arc<dyn Validator>, CompileError> {
    Ok(Arc::new(ContainsValidator {
        needle: text_config(config, "not_contains")?,
        negate: true,
    }))
}

/// Extract a value and apply a named unary test to it
#[derive(Debug, Clone)]
pub struct ExtractTestValidator {
    extractor: Arc<dyn Extractor>,
    test: ValueTest,
    test_name: String,
}

impl Validator for ExtractTestValidator {
    fn kind(&self) -> &str {
        "extract_test"
    }

    fn describe(&self) -> String {
        format!("{} {}", self.extractor.describe(), self.test_name)
    }

    fn validate(&self, body: &[u8], headers: &Headers, context: &Context) -> Result<(), Failure> {
        let value = run_extractor(self, self.extractor.as_ref(), body, headers, context)?;
        if self.test.check(&value) {
            Ok(())
        } else {
            Err(Failure::new(
                format!("Extract test '{}' failed on {}", self.test_name, self.extractor.describe()),
                FailureType::ValidatorFailed,
            )
            .with_details(format!("extracted value: {}", value))
            .with_validator(self))
        }
    }
}

fn parse_extract_test(config: &Value, registry: &Registry) -> Result<Arc<dyn Validator>, CompileError> {
    let map = validator_map(config, "extract_test")?;
    let test_name = map
        .get("test")
        .and_then(Value::as_str)
        .ok_or_else(|| CompileError::invalid("extract_test", "'test' is required"))?;
    let test = ValueTest::parse(test_name)
        .ok_or_else(|| CompileError::invalid("extract_test", format!("unknown test '{}'", test_name)))?;
    Ok(Arc::new(ExtractTestValidator {
        extractor: embedded_extractor(map, registry, "extract_test")?,
        test,
        test_name: test_name.to_string(),
    }))
}

/// Where a comparator's expected value comes from
#[derive(Debug, Clone)]
enum Expected {
    Literal(Value),
    Template(Value),
    Extracted(Arc<dyn Extractor>),
}

/// Extract a value and compare it against an expected value
#[derive(Debug, Clone)]
pub struct ComparatorValidator {
    extractor: Arc<dyn Extractor>,
    comparator: Comparator,
    expected: Expected,
}

impl ComparatorValidator {
    fn expected_value(&self, body: &[u8], headers: &Headers, context: &Context) -> Result<Value, Failure> {
        match &self.expected {
            Expected::Literal(value) => Ok(value.clone()),
            Expected::Template(template) => context.resolve_bound(template).map_err(|e| {
                Failure::new(format!("Cannot resolve expected value: {}", e), FailureType::ValidatorException)
                    .with_validator(self)
            }),
            Expected::Extracted(extractor) => run_extractor(self, extractor.as_ref(), body, headers, context),
        }
    }
}

impl Validator for ComparatorValidator {
    fn kind(&self) -> &str {
        "comparator"
    }

    fn describe(&self) -> String {
        let expected = match &self.expected {
            Expected::Literal(value) | Expected::Template(value) => value.to_string(),
            Expected::Extracted(extractor) => extractor.describe(),
        };
        format!("{} {} {}", self.extractor.describe(), self.comparator.name(), expected)
    }

    fn validate(&self, body: &[u8], headers: &Headers, context: &Context) -> Result<(), Failure> {
        let actual = run_extractor(self, self.extractor.as_ref(), body, headers, context)?;
        let expected = self.expected_value(body, headers, context)?;
        match self.comparator.apply(&actual, &expected) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Failure::new(
                format!(
                    "Comparison failed: {} {} {}",
                    actual,
                    self.comparator.name(),
                    expected
                ),
                FailureType::ValidatorFailed,
            )
            .with_details(format!("extracted with {}", self.extractor.describe()))
            .with_validator(self)),
            Err(message) => Err(Failure::new(
                format!("Comparator '{}' raised an error", self.comparator.name()),
                FailureType::ValidatorException,
            )
            .with_details(message)
            .with_validator(self)),
        }
    }
}

fn parse_comparator(config: &Value, registry: &Registry) -> Result<Arc<dyn Validator>, CompileError> {
    let map = validator_map(config, "comparator")?;
    let comparator_name = map.get("comparator").and_then(Value::as_str).unwrap_or("eq");
    let comparator = Comparator::parse(comparator_name)
        .ok_or_else(|| CompileError::unknown("comparator", comparator_name))?;

    let expected = match map.get("expected") {
        None => return Err(CompileError::invalid("comparator", "'expected' is required")),
        Some(Value::Object(inner)) if inner.len() == 1 && inner.contains_key("template") => {
            Expected::Template(inner["template"].clone())
        }
        Some(Value::Object(inner))
            if inner.len() == 1 && inner.keys().all(|key| registry.has_extractor(&key.to_ascii_lowercase())) =>
        {
            Expected::Extracted(embedded_extractor(inner, registry, "comparator")?)
        }
        Some(Value::String(text)) if crate::context::is_template(text) => Expected::Template(Value::String(text.clone())),
        Some(value) => Expected::Literal(value.clone()),
    };

    Ok(Arc::new(ComparatorValidator {
        extractor: embedded_extractor(map, registry, "comparator")?,
        comparator,
        expected,
    }))
}

/// Extracted value must be truthy
#[derive(Debug, Clone)]
pub struct AssertTrueValidator {
    extractor: Arc<dyn Extractor>,
    message: Option<String>,
}

impl Validator for AssertTrueValidator {
    fn kind(&self) -> &str {
        "assert_true"
    }

    fn describe(&self) -> String {
        self.extractor.describe()
    }

    fn validate(&self, body: &[u8], headers: &Headers, context: &Context) -> Result<(), Failure> {
        let value = run_extractor(self, self.extractor.as_ref(), body, headers, context)?;
        if is_truthy(&value) {
            return Ok(());
        }
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("Validator returned a falsy value for {}", self.extractor.describe()));
        Err(Failure::new(message, FailureType::ValidatorFailed)
            .with_details(format!("extracted value: {}", value))
            .with_validator(self))
    }
}

fn parse_assert_true(config: &Value, registry: &Registry) -> Result<Arc<dyn Validator>, CompileError> {
    let map = validator_map(config, "assert_true")?;
    Ok(Arc::new(AssertTrueValidator {
        extractor: embedded_extractor(map, registry, "assert_true")?,
        message: map.get("message").map(render_scalar),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BODY: &[u8] = br#"{"id": 7, "name": "ada", "tags": ["a", "b"], "active": false, "score": 7.0}"#;

    fn validator(registry: &Registry, kind: &str, config: Value) -> Arc<dyn Validator> {
        registry.parse_validator(kind, &config).unwrap()
    }

    #[test]
    fn test_truthiness() {
        for value in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&value), "{} should be falsy", value);
        }
        for value in [json!(true), json!(1), json!("x"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&value), "{} should be truthy", value);
        }
    }

    #[test]
    fn test_comparators() {
        assert!(Comparator::Eq.apply(&json!(7), &json!(7.0)).unwrap());
        assert!(Comparator::Ne.apply(&json!("a"), &json!("b")).unwrap());
        assert!(Comparator::Lt.apply(&json!(1), &json!(2)).unwrap());
        assert!(Comparator::Ge.apply(&json!("b"), &json!("a")).unwrap());
        assert!(Comparator::Gt.apply(&json!(1), &json!("a")).is_err());
        assert!(Comparator::Contains.apply(&json!(["x", "y"]), &json!("y")).unwrap());
        assert!(Comparator::ContainedBy.apply(&json!("ell"), &json!("hello")).unwrap());
        assert!(Comparator::CountEq.apply(&json!([1, 2, 3]), &json!(3)).unwrap());
        assert!(Comparator::Regex.apply(&json!("user-42"), &json!(r"^user-\d+$")).unwrap());
        assert!(Comparator::Type.apply(&json!({"a": 1}), &json!("dict")).unwrap());
        assert!(Comparator::StrEq.apply(&json!(5), &json!("5")).unwrap());
        assert_eq!(Comparator::parse("equals"), Some(Comparator::Eq));
        assert_eq!(Comparator::parse("almost"), None);
    }

    #[test]
    fn test_contains_and_not_contains() {
        let registry = Registry::with_builtins();
        let context = Context::new();
        assert!(validator(&registry, "contains", json!("ada")).validate(BODY, &vec![], &context).is_ok());
        let failure = validator(&registry, "not_contains", json!("ada"))
            .validate(BODY, &vec![], &context)
            .unwrap_err();
        assert_eq!(failure.failure_type, FailureType::ValidatorFailed);
        assert_eq!(failure.validator.as_deref(), Some("not_contains: 'ada'"));
    }

    #[test]
    fn test_extract_test_validator() {
        let registry = Registry::with_builtins();
        let context = Context::new();
        let exists = validator(&registry, "extract_test", json!({"jsonpath_mini": "id", "test": "exists"}));
        assert!(exists.validate(BODY, &vec![], &context).is_ok());
        let is_list = validator(&registry, "extract_test", json!({"jsonpath_mini": "name", "test": "is_list"}));
        let failure = is_list.validate(BODY, &vec![], &context).unwrap_err();
        assert_eq!(failure.failure_type, FailureType::ValidatorFailed);
        assert!(registry
            .parse_validator("extract_test", &json!({"jsonpath_mini": "id", "test": "is_purple"}))
            .is_err());
    }

    #[test]
    fn test_comparator_expected_forms() {
        let registry = Registry::with_builtins();
        let mut context = Context::new();
        context.bind("wanted", json!(7));

        let literal = validator(&registry, "compare", json!({"jsonpath_mini": "id", "expected": 7}));
        assert!(literal.validate(BODY, &vec![], &context).is_ok());

        let templated = validator(
            &registry,
            "comparator",
            json!({"jsonpath_mini": "id", "comparator": "eq", "expected": "{{wanted}}"}),
        );
        assert!(templated.validate(BODY, &vec![], &context).is_ok());

        let extracted = validator(
            &registry,
            "comparator",
            json!({"jsonpath_mini": "id", "comparator": "eq", "expected": {"jsonpath_mini": "score"}}),
        );
        assert!(extracted.validate(BODY, &vec![], &context).is_ok());

        let failing = validator(&registry, "compare", json!({"jsonpath_mini": "tags", "comparator": "count_eq", "expected": 3}));
        let failure = failing.validate(BODY, &vec![], &context).unwrap_err();
        assert_eq!(failure.failure_type, FailureType::ValidatorFailed);
    }

    #[test]
    fn test_comparator_errors() {
        let registry = Registry::with_builtins();
        let context = Context::new();
        assert!(registry.parse_validator("compare", &json!({"expected": 1})).is_err());
        assert!(registry
            .parse_validator("compare", &json!({"jsonpath_mini": "id", "comparator": "near", "expected": 1}))
            .is_err());

        let bad_json = validator(&registry, "compare", json!({"jsonpath_mini": "id", "expected": 7}));
        let failure = bad_json.validate(b"not json", &vec![], &context).unwrap_err();
        assert_eq!(failure.failure_type, FailureType::ValidatorException);
    }

    #[test]
    fn test_assert_true_uses_truthiness() {
        let registry = Registry::with_builtins();
        let context = Context::new();
        let active = validator(&registry, "assert_true", json!({"jsonpath_mini": "active"}));
        let failure = active.validate(BODY, &vec![], &context).unwrap_err();
        assert_eq!(failure.failure_type, FailureType::ValidatorFailed);
        let id = validator(&registry, "assert_true", json!({"jsonpath_mini": "id"}));
        assert!(id.validate(BODY, &vec![], &context).is_ok());
    }
}
