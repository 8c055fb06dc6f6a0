use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error type for the test engine
#[derive(Error, Debug)]
pub enum ResttestError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while substituting `{{name}}` references
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Unbound variable in template: {0}")]
    UnboundVariable(String),

    #[error("Generator '{name}' failed during template resolution: {source}")]
    Generator {
        name: String,
        #[source]
        source: GeneratorError,
    },
}

/// Errors raised by value generators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Generator exhausted after {produced} values")]
    Exhausted { produced: usize },

    #[error("Generator not found: {0}")]
    NotFound(String),

    #[error("Environment variable not set: {0}")]
    MissingEnvironment(String),
}

/// Fatal errors raised while turning raw configuration into test sets
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Malformed node: {0}")]
    MalformedNode(String),

    #[error("Unknown {kind} type: {key}")]
    UnknownType { kind: &'static str, key: String },

    #[error("Invalid {kind} configuration: {message}")]
    InvalidConfiguration { kind: &'static str, message: String },

    #[error("Failed to read test file {path}: {message}")]
    FileRead { path: PathBuf, message: String },

    #[error("Failed to parse test file {path}: {message}")]
    FileParse { path: PathBuf, message: String },

    #[error("Template error in configuration: {0}")]
    Template(#[from] TemplateError),
}

impl CompileError {
    pub fn invalid(kind: &'static str, message: impl Into<String>) -> Self {
        CompileError::InvalidConfiguration {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(kind: &'static str, key: impl Into<String>) -> Self {
        CompileError::UnknownType {
            kind,
            key: key.into(),
        }
    }
}

/// Network-level failures from the HTTP transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Connection and network errors are worth another attempt, malformed requests are not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Network(_) | TransportError::Timeout { .. }
        )
    }
}

/// Errors raised by extractors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("Response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid query '{query}': {message}")]
    InvalidQuery { query: String, message: String },

    #[error("Environment variable not set: {0}")]
    MissingEnvironment(String),

    #[error("Template error in extractor query: {0}")]
    Template(#[from] TemplateError),
}

/// Errors raised by operation steps
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Operation failed: {0}")]
    Failed(String),

    #[error("Template error in operation: {0}")]
    Template(#[from] TemplateError),
}

/// Errors raised while loading run settings and extensions
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid settings format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid extension manifest {path}: {message}")]
    InvalidExtension { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ResttestError>;
