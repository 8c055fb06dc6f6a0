//! Value generators for parameterized tests
//!
//! Configuration is parsed once into a [`GeneratorFactory`]; every test set run
//! creates its own [`Generator`] from the factory, so two runs of the same
//! configuration observe the same deterministic sequence.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::context::{render_scalar, Context};
use crate::error::{CompileError, GeneratorError};

/// Stateful producer of a lazy value stream; each pull advances it
pub trait Generator: Send {
    fn next_value(&mut self) -> Result<Value, GeneratorError>;
}

/// Parsed generator configuration, instantiated once per test set run
pub trait GeneratorFactory: Send + Sync + fmt::Debug {
    /// Registry type key this factory was parsed from
    fn kind(&self) -> &str;

    fn create(&self) -> Box<dyn Generator>;
}

/// Parses a generator configuration node given the variables bound so far
pub type GeneratorParser =
    Arc<dyn Fn(&Value, &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> + Send + Sync>;

/// Built-in generator parsers keyed by type
pub fn builtin_parsers() -> Vec<(&'static str, GeneratorParser)> {
    vec![
        ("number_sequence", Arc::new(parse_number_sequence) as GeneratorParser),
        ("doubling", Arc::new(parse_doubling) as GeneratorParser),
        ("fixed_sequence", Arc::new(parse_fixed_sequence) as GeneratorParser),
        ("choice_sequence", Arc::new(parse_choice_sequence) as GeneratorParser),
        ("env_variable", Arc::new(parse_env_variable) as GeneratorParser),
        ("env_string", Arc::new(parse_env_string) as GeneratorParser),
    ]
}

/// Resolve `{{name}}` references in a generator configuration against bound variables
pub fn resolve_config(config: &Value, binds: &Map<String, Value>) -> Result<Value, CompileError> {
    let context = Context::new().with_variables(binds);
    Ok(context.resolve_bound(config)?)
}

fn config_map<'a>(config: &'a Value, kind: &'static str) -> Result<&'a Map<String, Value>, CompileError> {
    config
        .as_object()
        .ok_or_else(|| CompileError::invalid(kind, "generator configuration must be a mapping"))
}

fn integer_field(config: &Map<String, Value>, field: &str, default: i64, kind: &'static str) -> Result<i64, CompileError> {
    match config.get(field) {
        None => Ok(default),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| CompileError::invalid(kind, format!("'{}' must be an integer", field))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| CompileError::invalid(kind, format!("'{}' must be an integer, got '{}'", field, s))),
        Some(other) => Err(CompileError::invalid(kind, format!("'{}' must be an integer, got {}", field, other))),
    }
}

fn values_field(config: &Map<String, Value>, kind: &'static str) -> Result<Vec<Value>, CompileError> {
    match config.get("values") {
        Some(Value::Array(values)) if !values.is_empty() => Ok(values.clone()),
        Some(Value::Array(_)) => Err(CompileError::invalid(kind, "'values' must not be empty")),
        _ => Err(CompileError::invalid(kind, "'values' list is required")),
    }
}

/// Arithmetic sequence: start, start + increment, ...
#[derive(Debug, Clone)]
pub struct SequenceFactory {
    start: i64,
    increment: i64,
}

impl SequenceFactory {
    pub fn new(start: i64, increment: i64) -> Self {
        Self { start, increment }
    }
}

struct SequenceGenerator {
    next: i64,
    increment: i64,
}

impl Generator for SequenceGenerator {
    fn next_value(&mut self) -> Result<Value, GeneratorError> {
        let value = self.next;
        self.next = self.next.saturating_add(self.increment);
        Ok(Value::from(value))
    }
}

impl GeneratorFactory for SequenceFactory {
    fn kind(&self) -> &str {
        "number_sequence"
    }

    fn create(&self) -> Box<dyn Generator> {
        Box::new(SequenceGenerator {
            next: self.start,
            increment: self.increment,
        })
    }
}

fn parse_number_sequence(config: &Value, binds: &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
    let config = resolve_config(config, binds)?;
    let map = config_map(&config, "number_sequence")?;
    let start = integer_field(map, "start", 1, "number_sequence")?;
    let increment = integer_field(map, "increment", 1, "number_sequence")?;
    Ok(Arc::new(SequenceFactory::new(start, increment)))
}

/// Doubling sequence: start, 2 * start, 4 * start, ...
#[derive(Debug, Clone)]
pub struct DoublingFactory {
    start: i64,
}

struct DoublingGenerator {
    next: i64,
}

impl Generator for DoublingGenerator {
    fn next_value(&mut self) -> Result<Value, GeneratorError> {
        let value = self.next;
        self.next = self.next.saturating_mul(2);
        Ok(Value::from(value))
    }
}

impl GeneratorFactory for DoublingFactory {
    fn kind(&self) -> &str {
        "doubling"
    }

    fn create(&self) -> Box<dyn Generator> {
        Box::new(DoublingGenerator { next: self.start })
    }
}

fn parse_doubling(config: &Value, binds: &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
    let config = resolve_config(config, binds)?;
    let map = config_map(&config, "doubling")?;
    let start = integer_field(map, "start", 1, "doubling")?;
    Ok(Arc::new(DoublingFactory { start }))
}

/// Replays a fixed list once, or forever when `cycle` is set
#[derive(Debug, Clone)]
pub struct ListFactory {
    values: Vec<Value>,
    cycle: bool,
}

impl ListFactory {
    pub fn fixed(values: Vec<Value>) -> Self {
        Self { values, cycle: false }
    }

    pub fn cycling(values: Vec<Value>) -> Self {
        Self { values, cycle: true }
    }
}

struct ListGenerator {
    values: Arc<[Value]>,
    position: usize,
    cycle: bool,
}

impl Generator for ListGenerator {
    fn next_value(&mut self) -> Result<Value, GeneratorError> {
        if self.position >= self.values.len() {
            if !self.cycle || self.values.is_empty() {
                return Err(GeneratorError::Exhausted {
                    produced: self.position,
                });
            }
            self.position = 0;
        }
        let value = self.values[self.position].clone();
        self.position += 1;
        Ok(value)
    }
}

impl GeneratorFactory for ListFactory {
    fn kind(&self) -> &str {
        if self.cycle {
            "choice_sequence"
        } else {
            "fixed_sequence"
        }
    }

    fn create(&self) -> Box<dyn Generator> {
        Box::new(ListGenerator {
            values: self.values.clone().into(),
            position: 0,
            cycle: self.cycle,
        })
    }
}

fn parse_fixed_sequence(config: &Value, binds: &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
    let config = resolve_config(config, binds)?;
    let values = values_field(config_map(&config, "fixed_sequence")?, "fixed_sequence")?;
    Ok(Arc::new(ListFactory::fixed(values)))
}

fn parse_choice_sequence(config: &Value, binds: &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
    let config = resolve_config(config, binds)?;
    let values = values_field(config_map(&config, "choice_sequence")?, "choice_sequence")?;
    Ok(Arc::new(ListFactory::cycling(values)))
}

/// Repeats the value of one environment variable
#[derive(Debug, Clone)]
pub struct EnvVariableFactory {
    variable_name: String,
    default: Option<Value>,
}

struct EnvVariableGenerator {
    variable_name: String,
    default: Option<Value>,
}

impl Generator for EnvVariableGenerator {
    fn next_value(&mut self) -> Result<Value, GeneratorError> {
        match std::env::var(&self.variable_name) {
            Ok(value) => Ok(Value::String(value)),
            Err(_) => self
                .default
                .clone()
                .ok_or_else(|| GeneratorError::MissingEnvironment(self.variable_name.clone())),
        }
    }
}

impl GeneratorFactory for EnvVariableFactory {
    fn kind(&self) -> &str {
        "env_variable"
    }

    fn create(&self) -> Box<dyn Generator> {
        Box::new(EnvVariableGenerator {
            variable_name: self.variable_name.clone(),
            default: self.default.clone(),
        })
    }
}

fn parse_env_variable(config: &Value, binds: &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
    let config = resolve_config(config, binds)?;
    let map = config_map(&config, "env_variable")?;
    let variable_name = map
        .get("variable_name")
        .and_then(Value::as_str)
        .ok_or_else(|| CompileError::invalid("env_variable", "'variable_name' is required"))?
        .to_string();
    Ok(Arc::new(EnvVariableFactory {
        variable_name,
        default: map.get("default").cloned(),
    }))
}

/// Renders `{{VAR}}` environment references in a string on every pull
#[derive(Debug, Clone)]
pub struct EnvStringFactory {
    template: String,
}

struct EnvStringGenerator {
    template: String,
}

impl Generator for EnvStringGenerator {
    fn next_value(&mut self) -> Result<Value, GeneratorError> {
        let mut environment = Context::new();
        for name in crate::context::referenced_names(&Value::String(self.template.clone())) {
            let value = std::env::var(&name).map_err(|_| GeneratorError::MissingEnvironment(name.clone()))?;
            environment.bind(name, Value::String(value));
        }
        let rendered = environment
            .render_bound(&self.template)
            .map_err(|e| GeneratorError::MissingEnvironment(e.to_string()))?;
        Ok(Value::String(rendered))
    }
}

impl GeneratorFactory for EnvStringFactory {
    fn kind(&self) -> &str {
        "env_string"
    }

    fn create(&self) -> Box<dyn Generator> {
        Box::new(EnvStringGenerator {
            template: self.template.clone(),
        })
    }
}

fn parse_env_string(config: &Value, _binds: &Map<String, Value>) -> Result<Arc<dyn GeneratorFactory>, CompileError> {
    // The string is left unresolved here: its references name environment variables
    let map = config_map(config, "env_string")?;
    let template = map
        .get("string")
        .map(render_scalar)
        .ok_or_else(|| CompileError::invalid("env_string", "'string' is required"))?;
    Ok(Arc::new(EnvStringFactory { template }))
}
