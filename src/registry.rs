//! Registry of the pluggable validator, extractor, generator and operation kinds

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::CompileError;
use crate::extractors::{self, Extractor, ExtractorParser};
use crate::generators::{self, GeneratorFactory, GeneratorParser};
use crate::operations::{self, Operation, OperationParser};
use crate::validators::{self, Validator, ValidatorParser};

/// Type keys mapped to parser functions. Keys are lowercased; registering a key
/// that already exists replaces the previous parser.
#[derive(Clone, Default)]
pub struct Registry {
    validators: HashMap<String, ValidatorParser>,
    extractors: HashMap<String, ExtractorParser>,
    generators: HashMap<String, GeneratorParser>,
    operations: HashMap<String, OperationParser>,
}

impl Registry {
    /// An empty registry with no kinds at all
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (key, parser) in validators::builtin_parsers() {
            registry.register_validator(key, parser);
        }
        for (key, parser) in extractors::builtin_parsers() {
            registry.register_extractor(key, parser);
        }
        for (key, parser) in generators::builtin_parsers() {
            registry.register_generator(key, parser);
        }
        for (key, parser) in operations::builtin_parsers() {
            registry.register_operation(key, parser);
        }
        registry
    }

    pub fn register_validator(&mut self, key: &str, parser: ValidatorParser) {
        insert_parser(&mut self.validators, "validator", key, parser);
    }

    pub fn register_extractor(&mut self, key: &str, parser: ExtractorParser) {
        insert_parser(&mut self.extractors, "extractor", key, parser);
    }

    pub fn register_generator(&mut self, key: &str, parser: GeneratorParser) {
        insert_parser(&mut self.generators, "generator", key, parser);
    }

    pub fn register_operation(&mut self, key: &str, parser: OperationParser) {
        insert_parser(&mut self.operations, "operation", key, parser);
    }

    pub fn has_validator(&self, key: &str) -> bool {
        self.validators.contains_key(&key.to_ascii_lowercase())
    }

    pub fn has_extractor(&self, key: &str) -> bool {
        self.extractors.contains_key(&key.to_ascii_lowercase())
    }

    pub fn has_generator(&self, key: &str) -> bool {
        self.generators.contains_key(&key.to_ascii_lowercase())
    }

    pub fn has_operation(&self, key: &str) -> bool {
        self.operations.contains_key(&key.to_ascii_lowercase())
    }

    pub fn validator_parser(&self, key: &str) -> Option<ValidatorParser> {
        self.validators.get(&key.to_ascii_lowercase()).cloned()
    }

    pub fn extractor_parser(&self, key: &str) -> Option<ExtractorParser> {
        self.extractors.get(&key.to_ascii_lowercase()).cloned()
    }

    pub fn generator_parser(&self, key: &str) -> Option<GeneratorParser> {
        self.generators.get(&key.to_ascii_lowercase()).cloned()
    }

    pub fn operation_parser(&self, key: &str) -> Option<OperationParser> {
        self.operations.get(&key.to_ascii_lowercase()).cloned()
    }

    pub fn parse_validator(&self, key: &str, config: &Value) -> Result<Arc<dyn Validator>, CompileError> {
        let parser = self
            .validator_parser(key)
            .ok_or_else(|| CompileError::unknown("validator", key))?;
        parser(config, self)
    }

    pub fn parse_extractor(&self, key: &str, config: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
        let parser = self
            .extractor_parser(key)
            .ok_or_else(|| CompileError::unknown("extractor", key))?;
        parser(config)
    }

    pub fn parse_generator(
        &self,
        key: &str,
        config: &Value,
        binds: &Map<String, Value>,
    ) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
        let parser = self
            .generator_parser(key)
            .ok_or_else(|| CompileError::unknown("generator", key))?;
        parser(config, binds)
    }

    pub fn parse_operation(&self, key: &str, config: &Map<String, Value>) -> Result<Arc<dyn Operation>, CompileError> {
        let parser = self
            .operation_parser(key)
            .ok_or_else(|| CompileError::unknown("operation", key))?;
        parser(config)
    }

    /// Parse a `{type: config}` extractor mapping with exactly one entry
    pub fn parse_extractor_node(&self, node: &Value) -> Result<Arc<dyn Extractor>, CompileError> {
        let (key, config) = single_entry(node, "extractor")?;
        self.parse_extractor(key, config)
    }

    /// Parse a `{type: config}` validator mapping with exactly one entry
    pub fn parse_validator_node(&self, node: &Value) -> Result<Arc<dyn Validator>, CompileError> {
        let (key, config) = single_entry(node, "validator")?;
        self.parse_validator(key, config)
    }
}

fn insert_parser<P>(map: &mut HashMap<String, P>, kind: &str, key: &str, parser: P) {
    let key = key.to_ascii_lowercase();
    if map.insert(key.clone(), parser).is_some() {
        log::debug!("Replacing registered {} '{}'", kind, key);
    } else {
        log::trace!("Registered {} '{}'", kind, key);
    }
}

fn single_entry<'a>(node: &'a Value, kind: &'static str) -> Result<(&'a str, &'a Value), CompileError> {
    match node.as_object() {
        Some(map) if map.len() == 1 => {
            let (key, value) = map.iter().next().ok_or_else(|| CompileError::invalid(kind, "empty mapping"))?;
            Ok((key.as_str(), value))
        }
        _ => Err(CompileError::invalid(
            kind,
            format!("expected a mapping with exactly one type key, got {}", node),
        )),
    }
}

fn sorted_keys<P>(map: &HashMap<String, P>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("validators", &sorted_keys(&self.validators))
            .field("extractors", &sorted_keys(&self.extractors))
            .field("generators", &sorted_keys(&self.generators))
            .field("operations", &sorted_keys(&self.operations))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use serde_json::json;

    #[test]
    fn test_builtins_present() {
        let registry = Registry::with_builtins();
        for key in ["contains", "compare", "comparator", "extract_test", "assert_true"] {
            assert!(registry.has_validator(key), "missing validator {}", key);
        }
        for key in ["jsonpath_mini", "jsonpath", "header", "raw_body", "constant", "env"] {
            assert!(registry.has_extractor(key), "missing extractor {}", key);
        }
        assert!(registry.has_generator("NUMBER_SEQUENCE"));
        assert!(registry.has_operation("bind"));
        assert!(!Registry::new().has_validator("contains"));
    }

    #[test]
    fn test_unknown_type_is_compile_error() {
        let registry = Registry::with_builtins();
        let err = registry.parse_validator("json_schema", &json!({})).unwrap_err();
        assert!(matches!(err, CompileError::UnknownType { kind: "validator", .. }));
        assert!(registry.parse_extractor_node(&json!({"a": 1, "b": 2})).is_err());
    }

    #[test]
    fn test_reregistering_overwrites() {
        let mut registry = Registry::with_builtins();
        let constant = registry.extractor_parser("constant").unwrap();
        registry.register_extractor("jsonpath_mini", constant);

        let extractor = registry.parse_extractor("jsonpath_mini", &json!("fixed")).unwrap();
        assert_eq!(extractor.kind(), "constant");
        let value = extractor.extract(b"{}", &vec![], &Context::new()).unwrap();
        assert_eq!(value, json!("fixed"));
    }
}
