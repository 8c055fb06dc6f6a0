//! Operation steps run between tests against the shared context

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{render_scalar, Context};
use crate::error::{CompileError, OperationError};

/// A non-HTTP step; may read and bind context variables
#[async_trait]
pub trait Operation: Send + Sync + fmt::Debug {
    /// Registry type key
    fn kind(&self) -> &str;

    fn describe(&self) -> String;

    async fn run(&self, context: &mut Context) -> Result<(), OperationError>;
}

/// Parses an `operation` node (the whole mapping, including `type`)
pub type OperationParser = Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Operation>, CompileError> + Send + Sync>;

pub fn builtin_parsers() -> Vec<(&'static str, OperationParser)> {
    vec![
        ("print", Arc::new(parse_print) as OperationParser),
        ("delay", Arc::new(parse_delay) as OperationParser),
        ("bind", Arc::new(parse_bind) as OperationParser),
    ]
}

/// Print a templated message to stdout
#[derive(Debug, Clone)]
pub struct PrintOperation {
    message: Value,
}

#[async_trait]
impl Operation for PrintOperation {
    fn kind(&self) -> &str {
        "print"
    }

    fn describe(&self) -> String {
        format!("print {}", self.message)
    }

    async fn run(&self, context: &mut Context) -> Result<(), OperationError> {
        let message = context.pass().resolve(&self.message)?;
        println!("{}", render_scalar(&message));
        Ok(())
    }
}

fn parse_print(config: &Map<String, Value>) -> Result<Arc<dyn Operation>, CompileError> {
    let message = config
        .get("message")
        .cloned()
        .ok_or_else(|| CompileError::invalid("print operation", "'message' is required"))?;
    Ok(Arc::new(PrintOperation { message }))
}

/// Pause the test set
#[derive(Debug, Clone)]
pub struct DelayOperation {
    duration: Duration,
}

#[async_trait]
impl Operation for DelayOperation {
    fn kind(&self) -> &str {
        "delay"
    }

    fn describe(&self) -> String {
        format!("delay {:?}", self.duration)
    }

    async fn run(&self, _context: &mut Context) -> Result<(), OperationError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

fn parse_delay(config: &Map<String, Value>) -> Result<Arc<dyn Operation>, CompileError> {
    let seconds = match (config.get("seconds"), config.get("milliseconds")) {
        (Some(seconds), _) => seconds.as_f64(),
        (None, Some(millis)) => millis.as_f64().map(|ms| ms / 1000.0),
        (None, None) => None,
    }
    .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
    .ok_or_else(|| {
        CompileError::invalid("delay operation", "'seconds' or 'milliseconds' must be a non-negative number")
    })?;
    Ok(Arc::new(DelayOperation {
        duration: Duration::from_secs_f64(seconds),
    }))
}

/// Bind templated values into the context
#[derive(Debug, Clone)]
pub struct BindOperation {
    variables: Map<String, Value>,
}

#[async_trait]
impl Operation for BindOperation {
    fn kind(&self) -> &str {
        "bind"
    }

    fn describe(&self) -> String {
        let names: Vec<&str> = self.variables.keys().map(String::as_str).collect();
        format!("bind {}", names.join(", "))
    }

    async fn run(&self, context: &mut Context) -> Result<(), OperationError> {
        // Resolve everything first so a failure binds nothing
        let mut pass = context.pass();
        let mut resolved = Vec::with_capacity(self.variables.len());
        for (name, template) in &self.variables {
            resolved.push((name.clone(), pass.resolve(template)?));
        }
        drop(pass);
        for (name, value) in resolved {
            context.bind(name, value);
        }
        Ok(())
    }
}

fn parse_bind(config: &Map<String, Value>) -> Result<Arc<dyn Operation>, CompileError> {
    let variables = config
        .get("variables")
        .and_then(Value::as_object)
        .filter(|variables| !variables.is_empty())
        .cloned()
        .ok_or_else(|| CompileError::invalid("bind operation", "'variables' must be a non-empty mapping"))?;
    Ok(Arc::new(BindOperation { variables }))
}
