//! Declarative HTTP test automation
//!
//! Test sets are written as YAML or JSON documents, compiled against a
//! [`Registry`] of validators, extractors, generators and operations, and run
//! against a [`Transport`] by the [`Runner`], which reports per-group results.

pub mod error;
pub mod context;
pub mod generators;
pub mod extractors;
pub mod validators;
pub mod operations;
pub mod registry;
pub mod extensions;
pub mod loader;
pub mod test_case;
pub mod test_set;
pub mod compiler;
pub mod transport;
pub mod runner;
pub mod settings;
pub mod cli;

// Re-export commonly used types
pub use error::{
    CompileError, ExtractError, GeneratorError, OperationError, Result, ResttestError, SettingsError,
    TemplateError, TransportError,
};
pub use context::{Context, ResolvePass};
pub use generators::{Generator, GeneratorFactory};
pub use extractors::Extractor;
pub use validators::{Comparator, Failure, FailureType, Validator};
pub use operations::Operation;
pub use registry::Registry;
pub use extensions::ExtensionLoader;
pub use test_case::Test;
pub use test_set::{ConfigChange, Step, TestConfig, TestSet};
pub use compiler::TestSetCompiler;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, SendOptions, Transport};
pub use runner::{Prompt, RetryPolicy, RunOptions, RunReport, Runner, StdinPrompt, TestResult, TestSetOutcome};
pub use settings::RunSettings;

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
