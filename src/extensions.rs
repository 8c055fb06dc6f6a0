//! Declarative extensions loaded from a directory of manifests
//!
//! A manifest is a YAML or JSON document with up to four sections:
//!
//! ```yaml
//! validators:
//!   has_id: {type: extract_test, jsonpath_mini: id, test: exists}
//! extractors:
//!   user_id: {type: jsonpath_mini, config: user.id}
//! generators:
//!   even_numbers: {type: number_sequence, start: 0, increment: 2}
//! operations:
//!   short_pause: {type: delay, milliseconds: 200}
//! ```
//!
//! Every entry registers an alias for an already registered kind. The alias
//! preset (the `config` value if present, otherwise the remaining keys) is merged
//! with whatever configuration the test file supplies; the test file wins.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SettingsError;
use crate::extractors::ExtractorParser;
use crate::generators::GeneratorParser;
use crate::operations::OperationParser;
use crate::registry::Registry;
use crate::validators::ValidatorParser;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtensionManifest {
    #[serde(default)]
    validators: Map<String, Value>,
    #[serde(default)]
    extractors: Map<String, Value>,
    #[serde(default)]
    generators: Map<String, Value>,
    #[serde(default)]
    operations: Map<String, Value>,
}

impl ExtensionManifest {
    fn is_empty(&self) -> bool {
        self.validators.is_empty() && self.extractors.is_empty() && self.generators.is_empty() && self.operations.is_empty()
    }
}

/// One alias declaration: the kind it builds on and its preset configuration
struct AliasEntry {
    name: String,
    base: String,
    preset: Value,
}

/// Loads extension manifests into a [`Registry`]
#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    directory: PathBuf,
}

impl ExtensionLoader {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Load every manifest in `directory` into `registry` and return it
    pub fn load<P: AsRef<Path>>(directory: P, mut registry: Registry) -> Result<Registry, SettingsError> {
        Self::new(directory).load_into(&mut registry)?;
        Ok(registry)
    }

    /// Manifest files in the directory, sorted by file name
    pub fn discover(&self) -> Result<Vec<PathBuf>, SettingsError> {
        if !self.directory.is_dir() {
            return Err(SettingsError::FileNotFound {
                path: self.directory.display().to_string(),
            });
        }

        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.is_file() && is_manifest_file(&path) {
                manifests.push(path);
            }
        }
        manifests.sort();
        Ok(manifests)
    }

    /// Register every alias found; returns the registered names in load order
    pub fn load_into(&self, registry: &mut Registry) -> Result<Vec<String>, SettingsError> {
        let mut registered = Vec::new();
        for path in self.discover()? {
            log::info!("Loading extension manifest {}", path.display());
            let manifest = read_manifest(&path)?;
            if manifest.is_empty() {
                return Err(invalid(&path, "manifest declares no validators, extractors, generators or operations"));
            }

            for alias in alias_entries(&path, &manifest.validators)? {
                let base = registry
                    .validator_parser(&alias.base)
                    .ok_or_else(|| unknown_base(&path, "validator", &alias))?;
                let preset = alias.preset;
                let parser: ValidatorParser = Arc::new(move |config: &Value, registry: &Registry| base(&merge_config(&preset, config), registry));
                registry.register_validator(&alias.name, parser);
                registered.push(alias.name);
            }

            for alias in alias_entries(&path, &manifest.extractors)? {
                let base = registry
                    .extractor_parser(&alias.base)
                    .ok_or_else(|| unknown_base(&path, "extractor", &alias))?;
                let preset = alias.preset;
                let parser: ExtractorParser = Arc::new(move |config: &Value| base(&merge_config(&preset, config)));
                registry.register_extractor(&alias.name, parser);
                registered.push(alias.name);
            }

            for alias in alias_entries(&path, &manifest.generators)? {
                let base = registry
                    .generator_parser(&alias.base)
                    .ok_or_else(|| unknown_base(&path, "generator", &alias))?;
                let preset = alias.preset;
                let parser: GeneratorParser = Arc::new(move |config: &Value, binds: &Map<String, Value>| base(&merge_config(&preset, config), binds));
                registry.register_generator(&alias.name, parser);
                registered.push(alias.name);
            }

            for alias in alias_entries(&path, &manifest.operations)? {
                let base = registry
                    .operation_parser(&alias.base)
                    .ok_or_else(|| unknown_base(&path, "operation", &alias))?;
                let preset = alias.preset;
                let parser: OperationParser = Arc::new(move |config: &Map<String, Value>| {
                    let merged = merge_config(&preset, &Value::Object(config.clone()));
                    match merged {
                        Value::Object(map) => base(&map),
                        _ => base(config),
                    }
                });
                registry.register_operation(&alias.name, parser);
                registered.push(alias.name);
            }
        }

        log::info!("Registered {} extension aliases", registered.len());
        Ok(registered)
    }
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

fn read_manifest(path: &Path) -> Result<ExtensionManifest, SettingsError> {
    let content = std::fs::read_to_string(path)?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| invalid(path, message))
}

fn alias_entries(path: &Path, section: &Map<String, Value>) -> Result<Vec<AliasEntry>, SettingsError> {
    section
        .iter()
        .map(|(name, declaration)| {
            let mut declaration = declaration
                .as_object()
                .cloned()
                .ok_or_else(|| invalid(path, format!("'{}' must be a mapping", name)))?;
            let base = match declaration.remove("type") {
                Some(Value::String(base)) => base.to_ascii_lowercase(),
                _ => return Err(invalid(path, format!("'{}' needs a string 'type'", name))),
            };
            let preset = match declaration.remove("config") {
                Some(config) => config,
                None => Value::Object(declaration),
            };
            Ok(AliasEntry {
                name: name.to_ascii_lowercase(),
                base,
                preset,
            })
        })
        .collect()
}

/// Merge call-site configuration over a preset; mappings merge key by key
fn merge_config(preset: &Value, call_site: &Value) -> Value {
    match (preset, call_site) {
        (_, Value::Null) => preset.clone(),
        (Value::Object(preset), Value::Object(call_site)) => {
            let mut merged = preset.clone();
            for (key, value) in call_site {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => call_site.clone(),
    }
}

fn invalid(path: &Path, message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidExtension {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn unknown_base(path: &Path, kind: &str, alias: &AliasEntry) -> SettingsError {
    invalid(
        path,
        format!("{} '{}' refers to unknown {} type '{}'", kind, alias.name, kind, alias.base),
    )
}
