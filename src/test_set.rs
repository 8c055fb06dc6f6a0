//! Test sets and their shared configuration

use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{render_scalar, Context};
use crate::error::CompileError;
use crate::generators::GeneratorFactory;
use crate::loader::{flatten_fields, flatten_mapping};
use crate::operations::Operation;
use crate::registry::Registry;
use crate::test_case::Test;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration shared by every step of a test set
#[derive(Clone)]
pub struct TestConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub print_bodies: bool,
    pub print_headers: bool,
    pub variable_binds: Map<String, Value>,
    pub generators: Vec<(String, Arc<dyn GeneratorFactory>)>,
    pub ssl_insecure: bool,
    pub verbose: bool,
    pub skip_term_colors: bool,
    pub test_parallel: bool,
    pub interactive: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            print_bodies: false,
            print_headers: false,
            variable_binds: Map::new(),
            generators: Vec::new(),
            ssl_insecure: false,
            verbose: false,
            skip_term_colors: false,
            test_parallel: false,
            interactive: false,
        }
    }
}

impl TestConfig {
    /// Merge a `config:` node. Bindings are applied before generators so that
    /// generator configuration can reference them regardless of key order.
    ///
    /// Returns the bindings and generators the node touched, for test sets that
    /// are already running when the node is reached.
    pub fn merge_node(&mut self, node: &Value, registry: &Registry) -> Result<ConfigChange, CompileError> {
        let fields = flatten_fields(node, "config")?;
        let mut touched: Vec<String> = Vec::new();

        for (key, value) in &fields {
            match key.as_str() {
                "timeout" => {
                    let seconds = value
                        .as_f64()
                        .filter(|s| s.is_finite() && *s > 0.0)
                        .ok_or_else(|| CompileError::invalid("config", "'timeout' must be a positive number of seconds"))?;
                    self.timeout = Duration::from_secs_f64(seconds);
                }
                "retries" => {
                    self.retries = value
                        .as_u64()
                        .and_then(|r| u32::try_from(r).ok())
                        .ok_or_else(|| CompileError::invalid("config", "'retries' must be a non-negative integer"))?;
                }
                "print_bodies" => self.print_bodies = config_bool(value, key)?,
                "print_headers" => self.print_headers = config_bool(value, key)?,
                "ssl_insecure" => self.ssl_insecure = config_bool(value, key)?,
                "verbose" => self.verbose = config_bool(value, key)?,
                "skip_term_colors" => self.skip_term_colors = config_bool(value, key)?,
                "test_parallel" => self.test_parallel = config_bool(value, key)?,
                "interactive" => self.interactive = config_bool(value, key)?,
                "variable_binds" => {
                    let binds = flatten_mapping(value, "variable_binds")?;
                    deep_merge(&mut self.variable_binds, &binds);
                    touched.extend(binds.keys().cloned());
                }
                "default_base_url" => {
                    self.variable_binds
                        .insert("default_base_url".to_string(), Value::String(render_scalar(value)));
                    touched.push("default_base_url".to_string());
                }
                "generators" => {}
                other => return Err(CompileError::invalid("config", format!("unknown config key '{}'", other))),
            }
        }

        let mut change = ConfigChange::default();
        for name in touched {
            if let Some(value) = self.variable_binds.get(&name) {
                change.variables.insert(name, value.clone());
            }
        }

        if let Some(generators) = fields.get("generators") {
            for (name, declaration) in flatten_mapping(generators, "generators")? {
                let kind = declaration
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CompileError::invalid("generator", format!("'{}' needs a string 'type'", name)))?;
                let factory = registry.parse_generator(kind, &declaration, &self.variable_binds)?;
                change.generators.push((name.clone(), factory.clone()));
                self.set_generator(name, factory);
            }
        }

        Ok(change)
    }

    /// Declare or replace a generator
    pub fn set_generator(&mut self, name: impl Into<String>, factory: Arc<dyn GeneratorFactory>) {
        let name = name.into();
        match self.generators.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = factory,
            None => self.generators.push((name, factory)),
        }
    }

    /// Fresh context for one run: bindings plus newly instantiated generators
    pub fn new_context(&self) -> Context {
        let mut context = Context::new().with_variables(&self.variable_binds);
        for (name, factory) in &self.generators {
            context.add_generator(name.clone(), factory.as_ref());
        }
        context
    }
}

impl fmt::Debug for TestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generators: Vec<String> = self
            .generators
            .iter()
            .map(|(name, factory)| format!("{}: {}", name, factory.kind()))
            .collect();
        f.debug_struct("TestConfig")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("print_bodies", &self.print_bodies)
            .field("print_headers", &self.print_headers)
            .field("variable_binds", &self.variable_binds)
            .field("generators", &generators)
            .field("ssl_insecure", &self.ssl_insecure)
            .field("verbose", &self.verbose)
            .field("skip_term_colors", &self.skip_term_colors)
            .field("test_parallel", &self.test_parallel)
            .field("interactive", &self.interactive)
            .finish()
    }
}

/// Bindings and generators introduced by a config node part way through a set
#[derive(Clone, Default)]
pub struct ConfigChange {
    pub variables: Map<String, Value>,
    pub generators: Vec<(String, Arc<dyn GeneratorFactory>)>,
}

impl ConfigChange {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.generators.is_empty()
    }

    /// Bind the variables into a running context and restart the named generators
    pub fn apply(&self, context: &mut Context) {
        context.bind_all(&self.variables);
        for (name, factory) in &self.generators {
            context.add_generator(name.clone(), factory.as_ref());
        }
    }
}

impl fmt::Debug for ConfigChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generators: Vec<&str> = self.generators.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("ConfigChange")
            .field("variables", &self.variables)
            .field("generators", &generators)
            .finish()
    }
}

fn config_bool(value: &Value, key: &str) -> Result<bool, CompileError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(CompileError::invalid("config", format!("'{}' must be a boolean, got {}", key, other))),
    }
}

/// Recursively merge `source` into `target`; later keys win, nested mappings merge
pub fn deep_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) = (target.get_mut(key), value) {
            deep_merge(existing, incoming);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// One entry of a test set
#[derive(Debug, Clone)]
pub enum Step {
    /// A test and the configuration in effect where it was declared
    Test { test: Test, config: Arc<TestConfig> },
    Operation(Arc<dyn Operation>),
    /// A config node reached after earlier steps of the same set
    Configure(ConfigChange),
}

impl Step {
    pub fn test(test: Test, config: Arc<TestConfig>) -> Self {
        Step::Test { test, config }
    }
}

/// Ordered steps of one document, run against a single context
#[derive(Debug, Clone)]
pub struct TestSet {
    pub steps: Vec<Step>,
    /// Configuration when the set's first step was declared; seeds the context
    pub config: TestConfig,
    pub source: Option<PathBuf>,
}

impl TestSet {
    pub fn new(steps: Vec<Step>, config: TestConfig) -> Self {
        Self {
            steps,
            config,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn tests(&self) -> impl Iterator<Item = &Test> {
        self.test_steps().map(|(test, _)| test)
    }

    /// Tests paired with their configuration snapshots
    pub fn test_steps(&self) -> impl Iterator<Item = (&Test, &TestConfig)> {
        self.steps.iter().filter_map(|step| match step {
            Step::Test { test, config } => Some((test, config.as_ref())),
            Step::Operation(_) | Step::Configure(_) => None,
        })
    }

    /// Apply `update` to the set configuration and every test snapshot
    pub fn update_configs(&mut self, mut update: impl FnMut(&mut TestConfig)) {
        update(&mut self.config);
        for step in &mut self.steps {
            if let Step::Test { config, .. } = step {
                update(Arc::make_mut(config));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Label for logs: the source file when known
    pub fn name(&self) -> String {
        self.source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string())
    }

    /// True when no step can affect another, so tests may be sent concurrently
    pub fn is_independent(&self) -> bool {
        self.steps.iter().all(|step| match step {
            Step::Operation(_) | Step::Configure(_) => false,
            Step::Test { test, config } => {
                !config.interactive && !test.writes_context() && !test.stop_on_failure && test.delay.is_none()
            }
        })
    }

    /// True when any test pauses for the user before sending
    pub fn is_interactive(&self) -> bool {
        self.test_steps().any(|(_, config)| config.interactive)
    }
}
