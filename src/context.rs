//! Run-scoped variable store and `{{name}}` template resolution
//!
//! A [`Context`] holds the variables bound for one test set run together with the
//! generators declared by its configuration. Templates are resolved in *passes*:
//! a generator referenced anywhere within one pass is pulled exactly once and the
//! same value is reused for every reference in that pass.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::{GeneratorError, TemplateError};
use crate::generators::{Generator, GeneratorFactory};

fn template_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}")
            .expect("template pattern is a valid regex")
    })
}

/// Returns true if the string contains at least one `{{name}}` reference
pub fn is_template(text: &str) -> bool {
    template_pattern().is_match(text)
}

/// Names referenced by `{{name}}` placeholders anywhere inside a nested value
pub fn referenced_names(value: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_names(value, &mut names);
    names
}

fn collect_names(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for captures in template_pattern().captures_iter(text) {
                let name = captures[1].to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_names(item, names)),
        Value::Object(map) => map.values().for_each(|item| collect_names(item, names)),
        _ => {}
    }
}

/// Render a value the way it appears when spliced into a larger string
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Source of values for template names
trait Lookup {
    fn lookup(&mut self, name: &str) -> Result<Value, TemplateError>;
}

/// Mutable variable and generator store shared by every step of one test set run
pub struct Context {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    variables: Map<String, Value>,
    generators: HashMap<String, Box<dyn Generator>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            variables: Map::new(),
            generators: HashMap::new(),
        }
    }

    pub fn with_variables(mut self, variables: &Map<String, Value>) -> Self {
        self.bind_all(variables);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Bind a variable, replacing any previous value of the same name
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        log::trace!("Binding variable {} = {}", name, value);
        self.variables.insert(name, value);
    }

    pub fn bind_all(&mut self, variables: &Map<String, Value>) {
        for (name, value) in variables {
            self.bind(name.clone(), value.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Instantiate a generator from its factory and register it under `name`
    pub fn add_generator(&mut self, name: impl Into<String>, factory: &dyn GeneratorFactory) {
        let name = name.into();
        log::debug!("Adding generator {} ({})", name, factory.kind());
        self.generators.insert(name, factory.create());
    }

    pub fn has_generator(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    /// Pull the next value from a named generator
    pub fn next_generated(&mut self, name: &str) -> Result<Value, GeneratorError> {
        let generator = self
            .generators
            .get_mut(name)
            .ok_or_else(|| GeneratorError::NotFound(name.to_string()))?;
        generator.next_value()
    }

    /// Pull the next value from `generator` and bind it as `variable`
    pub fn bind_generator_next(&mut self, variable: &str, generator: &str) -> Result<Value, GeneratorError> {
        let value = self.next_generated(generator)?;
        self.bind(variable.to_string(), value.clone());
        Ok(value)
    }

    /// Start a resolution pass; generator pulls are memoized for the pass lifetime
    pub fn pass(&mut self) -> ResolvePass<'_> {
        ResolvePass {
            context: self,
            pulled: HashMap::new(),
        }
    }

    /// Resolve a value in a pass of its own
    pub fn resolve(&mut self, value: &Value) -> Result<Value, TemplateError> {
        self.pass().resolve(value)
    }

    /// Resolve against bound variables only; generator names count as unbound
    pub fn resolve_bound(&self, value: &Value) -> Result<Value, TemplateError> {
        let mut lookup = BoundOnly {
            variables: &self.variables,
        };
        resolve_with(value, &mut lookup)
    }

    /// Resolve a string against bound variables and render the result as a string
    pub fn render_bound(&self, text: &str) -> Result<String, TemplateError> {
        let resolved = self.resolve_bound(&Value::String(text.to_string()))?;
        Ok(render_scalar(&resolved))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut generator_names: Vec<&String> = self.generators.keys().collect();
        generator_names.sort();
        f.debug_struct("Context")
            .field("run_id", &self.run_id)
            .field("variables", &self.variables)
            .field("generators", &generator_names)
            .finish()
    }
}

/// One template resolution pass over a context
pub struct ResolvePass<'a> {
    context: &'a mut Context,
    pulled: HashMap<String, Value>,
}

impl ResolvePass<'_> {
    pub fn resolve(&mut self, value: &Value) -> Result<Value, TemplateError> {
        resolve_with(value, self)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.context.variables.get(name)
    }

    /// Resolve a string and render the result as a string
    pub fn resolve_string(&mut self, text: &str) -> Result<String, TemplateError> {
        let resolved = self.resolve(&Value::String(text.to_string()))?;
        Ok(render_scalar(&resolved))
    }
}

impl Lookup for ResolvePass<'_> {
    fn lookup(&mut self, name: &str) -> Result<Value, TemplateError> {
        if let Some(value) = self.context.variables.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.pulled.get(name) {
            return Ok(value.clone());
        }
        if self.context.has_generator(name) {
            let value = self
                .context
                .next_generated(name)
                .map_err(|source| TemplateError::Generator {
                    name: name.to_string(),
                    source,
                })?;
            self.pulled.insert(name.to_string(), value.clone());
            return Ok(value);
        }
        Err(TemplateError::UnboundVariable(name.to_string()))
    }
}

struct BoundOnly<'a> {
    variables: &'a Map<String, Value>,
}

impl Lookup for BoundOnly<'_> {
    fn lookup(&mut self, name: &str) -> Result<Value, TemplateError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::UnboundVariable(name.to_string()))
    }
}

fn resolve_with<L: Lookup>(value: &Value, lookup: &mut L) -> Result<Value, TemplateError> {
    match value {
        Value::String(text) => resolve_string(text, lookup),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_with(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_with(item, lookup)?);
            }
            Ok(Value::Object(resolved))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn resolve_string<L: Lookup>(text: &str, lookup: &mut L) -> Result<Value, TemplateError> {
    let pattern = template_pattern();

    // A lone reference keeps the bound value's type
    let trimmed = text.trim();
    if let Some(captures) = pattern.captures(trimmed) {
        let whole = captures.get(0).map(|m| m.as_str().len()).unwrap_or(0);
        if whole == trimmed.len() {
            return lookup.lookup(&captures[1]);
        }
    } else {
        return Ok(Value::String(text.to_string()));
    }

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for captures in pattern.captures_iter(text) {
        let Some(whole) = captures.get(0) else { continue };
        rendered.push_str(&text[last..whole.start()]);
        rendered.push_str(&render_scalar(&lookup.lookup(&captures[1])?));
        last = whole.end();
    }
    rendered.push_str(&text[last..]);
    Ok(Value::String(rendered))
}
