//! Turns raw test documents into [`TestSet`]s
//!
//! A document is a sequence of single-key nodes (`import`, `url`, `test`,
//! `config`/`configuration`, `operation`) and compiles to one test set. Every
//! test keeps a snapshot of the configuration in effect where it was declared,
//! so a config node never applies retroactively. A config node that follows
//! earlier steps also becomes a [`Step::Configure`] carrying the bindings and
//! generators it introduced into the running context. Imports are compiled with
//! the importing document's configuration as their starting point and appended
//! as sibling test sets. Each file is compiled at most once per top-level compile.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::render_scalar;
use crate::error::CompileError;
use crate::loader::{read_test_file, single_key_node};
use crate::registry::Registry;
use crate::test_case::Test;
use crate::test_set::{Step, TestConfig, TestSet};

/// Compiles test documents against one registry
pub struct TestSetCompiler<'r> {
    registry: &'r Registry,
    visited: HashSet<PathBuf>,
    initial_variables: Map<String, Value>,
}

impl<'r> TestSetCompiler<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            visited: HashSet::new(),
            initial_variables: Map::new(),
        }
    }

    /// Variables bound before any document configuration (e.g. from `--vars`)
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.initial_variables = variables;
        self
    }

    fn initial_config(&self) -> TestConfig {
        TestConfig {
            variable_binds: self.initial_variables.clone(),
            ..TestConfig::default()
        }
    }

    /// Compile a test file; relative imports resolve against its directory
    pub fn compile_file(&mut self, path: &Path) -> Result<Vec<TestSet>, CompileError> {
        let canonical = canonical_path(path)?;
        self.visited.insert(canonical.clone());
        let document = read_test_file(&canonical)?;
        let base_dir = parent_dir(&canonical);
        let config = self.initial_config();
        self.compile_document(&document, &base_dir, config, Some(&canonical))
    }

    /// Compile an in-memory document; relative imports resolve against `base_dir`
    pub fn compile(&mut self, structure: &Value, base_dir: &Path) -> Result<Vec<TestSet>, CompileError> {
        let config = self.initial_config();
        self.compile_document(structure, base_dir, config, None)
    }

    /// Files compiled so far, canonicalized
    pub fn visited(&self) -> &HashSet<PathBuf> {
        &self.visited
    }

    fn compile_document(
        &mut self,
        structure: &Value,
        base_dir: &Path,
        mut config: TestConfig,
        source: Option<&Path>,
    ) -> Result<Vec<TestSet>, CompileError> {
        let nodes = match structure {
            Value::Array(nodes) => nodes.as_slice(),
            Value::Null => &[],
            other => {
                return Err(CompileError::MalformedNode(format!(
                    "a test document must be a list of nodes, got {}",
                    other
                )))
            }
        };

        let mut test_sets = Vec::new();
        let mut steps: Vec<Step> = Vec::new();
        let mut set_config: Option<TestConfig> = None;
        let mut snapshot = Arc::new(config.clone());

        for node in nodes {
            let (key, value) = single_key_node(node)?;
            match key.as_str() {
                "import" => {
                    let imported = self.compile_import(value, base_dir, &config)?;
                    test_sets.extend(imported);
                    continue;
                }
                "config" | "configuration" => {
                    let change = config.merge_node(value, self.registry)?;
                    snapshot = Arc::new(config.clone());
                    if !steps.is_empty() && !change.is_empty() {
                        steps.push(Step::Configure(change));
                    }
                    continue;
                }
                _ => {}
            }

            let step = match key.as_str() {
                "url" => {
                    let url = match value {
                        Value::String(_) | Value::Number(_) => render_scalar(value),
                        other => {
                            return Err(CompileError::MalformedNode(format!("'url' must be a string, got {}", other)))
                        }
                    };
                    Step::test(Test::from_url(url), snapshot.clone())
                }
                "test" => Step::test(Test::compile(value, self.registry)?, snapshot.clone()),
                "operation" => {
                    let declaration = value
                        .as_object()
                        .ok_or_else(|| CompileError::invalid("operation", "an operation must be a mapping"))?;
                    let kind = declaration
                        .get("type")
                        .and_then(Value::as_str)
                        .ok_or_else(|| CompileError::invalid("operation", "'type' is required"))?;
                    Step::Operation(self.registry.parse_operation(kind, declaration)?)
                }
                other => {
                    return Err(CompileError::MalformedNode(format!("unknown node type '{}'", other)));
                }
            };
            if set_config.is_none() {
                set_config = Some(config.clone());
            }
            steps.push(step);
        }

        if let Some(set_config) = set_config {
            let test_set = TestSet::new(steps, set_config);
            test_sets.push(match source {
                Some(path) => test_set.with_source(path),
                None => test_set,
            });
        }

        Ok(test_sets)
    }

    fn compile_import(
        &mut self,
        value: &Value,
        base_dir: &Path,
        config: &TestConfig,
    ) -> Result<Vec<TestSet>, CompileError> {
        let relative = value
            .as_str()
            .ok_or_else(|| CompileError::MalformedNode(format!("'import' must be a path, got {}", value)))?;
        let canonical = canonical_path(&base_dir.join(relative))?;

        if !self.visited.insert(canonical.clone()) {
            log::debug!("Skipping already imported file {}", canonical.display());
            return Ok(Vec::new());
        }

        log::debug!("Importing {}", canonical.display());
        let document = read_test_file(&canonical)?;
        let imported_base = parent_dir(&canonical);
        self.compile_document(&document, &imported_base, config.clone(), Some(&canonical))
    }
}

fn canonical_path(path: &Path) -> Result<PathBuf, CompileError> {
    path.canonicalize().map_err(|e| CompileError::FileRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn urls(test_set: &TestSet) -> Vec<String> {
        test_set.tests().map(|test| render_scalar(&test.url)).collect()
    }

    #[test]
    fn test_document_compiles_to_one_set() {
        let registry = Registry::with_builtins();
        let sets = TestSetCompiler::new(&registry)
            .compile(&json!([{"url": "/a"}, {"test": {"url": "/b", "name": "b"}}]), Path::new("."))
            .unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(urls(&sets[0]), vec!["/a", "/b"]);
    }

    #[test]
    fn test_config_is_not_retroactive() {
        let registry = Registry::with_builtins();
        let sets = TestSetCompiler::new(&registry)
            .compile(
                &json!([
                    {"config": {"timeout": 5}},
                    {"url": "/a"},
                    {"config": {"timeout": 1, "variable_binds": {"x": 1}}},
                    {"url": "/b"}
                ]),
                Path::new("."),
            )
            .unwrap();
        assert_eq!(sets.len(), 1);
        let set = &sets[0];
        assert_eq!(set.config.timeout, Duration::from_secs(5));
        assert!(set.config.variable_binds.get("x").is_none());

        let snapshots: Vec<&TestConfig> = set.test_steps().map(|(_, config)| config).collect();
        assert_eq!(snapshots[0].timeout, Duration::from_secs(5));
        assert!(snapshots[0].variable_binds.get("x").is_none());
        assert_eq!(snapshots[1].timeout, Duration::from_secs(1));
        assert_eq!(snapshots[1].variable_binds.get("x"), Some(&json!(1)));

        assert_eq!(set.steps.len(), 3);
        match &set.steps[1] {
            Step::Configure(change) => assert_eq!(change.variables.get("x"), Some(&json!(1))),
            other => panic!("expected a configure step, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_only_config_adds_no_step() {
        let registry = Registry::with_builtins();
        let sets = TestSetCompiler::new(&registry)
            .compile(
                &json!([{"url": "/a"}, {"config": {"retries": 2}}, {"url": "/b"}]),
                Path::new("."),
            )
            .unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].steps.len(), 2);
        let retries: Vec<u32> = sets[0].test_steps().map(|(_, config)| config.retries).collect();
        assert_eq!(retries, vec![0, 2]);
    }

    #[test]
    fn test_config_only_document_produces_nothing() {
        let registry = Registry::with_builtins();
        let sets = TestSetCompiler::new(&registry)
            .compile(&json!([{"config": {"timeout": 5}}]), Path::new("."))
            .unwrap();
        assert!(sets.is_empty());
    }

    #[test]
    fn test_malformed_nodes_are_fatal() {
        let registry = Registry::with_builtins();
        let mut compiler = TestSetCompiler::new(&registry);
        assert!(compiler.compile(&json!({"url": "/a"}), Path::new(".")).is_err());
        assert!(compiler.compile(&json!([{"url": "/a", "test": {}}]), Path::new(".")).is_err());
        assert!(compiler.compile(&json!([{"benchmark": {}}]), Path::new(".")).is_err());
        assert!(compiler
            .compile(&json!([{"operation": {"type": "teleport"}}]), Path::new("."))
            .is_err());
    }

    #[test]
    fn test_import_dedupe_and_inheritance() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.yaml"), "- url: /b\n").unwrap();
        std::fs::write(dir.path().join("nested/c.yaml"), "- import: ../b.yaml\n- url: /c\n").unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "- config:\n    timeout: 3\n    variable_binds: {host: example}\n\
             - import: b.yaml\n\
             - import: nested/c.yaml\n\
             - url: /a\n",
        )
        .unwrap();

        let registry = Registry::with_builtins();
        let mut compiler = TestSetCompiler::new(&registry);
        let sets = compiler.compile_file(&dir.path().join("a.yaml")).unwrap();

        let all: Vec<Vec<String>> = sets.iter().map(urls).collect();
        assert_eq!(all, vec![vec!["/b"], vec!["/c"], vec!["/a"]]);
        for set in &sets {
            assert_eq!(set.config.timeout, Duration::from_secs(3));
            assert_eq!(set.config.variable_binds.get("host"), Some(&json!("example")));
            assert!(set.test_steps().all(|(_, config)| config.timeout == Duration::from_secs(3)));
        }
        assert_eq!(compiler.visited().len(), 3);
    }

    #[test]
    fn test_import_cycle_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "- import: b.yaml\n- url: /a\n").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "- import: a.yaml\n- url: /b\n").unwrap();

        let registry = Registry::with_builtins();
        let sets = TestSetCompiler::new(&registry)
            .compile_file(&dir.path().join("a.yaml"))
            .unwrap();
        let all: Vec<Vec<String>> = sets.iter().map(urls).collect();
        assert_eq!(all, vec![vec!["/b"], vec!["/a"]]);
    }

    #[test]
    fn test_missing_import_is_fatal() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::with_builtins();
        let err = TestSetCompiler::new(&registry)
            .compile(&json!([{"import": "nope.yaml"}]), dir.path())
            .unwrap_err();
        assert!(matches!(err, CompileError::FileRead { .. }));
    }

    #[test]
    fn test_initial_variables_are_overridden_by_config() {
        let registry = Registry::with_builtins();
        let vars = json!({"env": "cli", "keep": true}).as_object().unwrap().clone();
        let sets = TestSetCompiler::new(&registry)
            .with_variables(vars)
            .compile(
                &json!([{"config": {"variable_binds": {"env": "file"}}}, {"url": "/a"}]),
                Path::new("."),
            )
            .unwrap();
        let binds = &sets[0].config.variable_binds;
        assert_eq!(binds.get("env"), Some(&json!("file")));
        assert_eq!(binds.get("keep"), Some(&json!(true)));
    }

    #[test]
    fn test_operation_steps() {
        let registry = Registry::with_builtins();
        let sets = TestSetCompiler::new(&registry)
            .compile(
                &json!([{"operation": {"type": "bind", "variables": {"x": 1}}}, {"url": "/a"}]),
                Path::new("."),
            )
            .unwrap();
        assert_eq!(sets[0].steps.len(), 2);
        assert!(matches!(sets[0].steps[0], Step::Operation(_)));
        assert!(!sets[0].is_independent());
    }
}
