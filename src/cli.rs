use clap::Parser;
use std::path::PathBuf;

use crate::error::SettingsError;
use crate::settings::{parse_vars, RunSettings};

/// Declarative HTTP test runner for YAML/JSON test sets
#[derive(Parser, Debug)]
#[command(name = "resttest")]
#[command(about = "Run declarative HTTP tests described in YAML or JSON files")]
#[command(version = crate::VERSION)]
pub struct Cli {
    /// Test file to run
    #[arg(value_name = "TEST_FILE", required_unless_present = "test")]
    pub test_file: Option<PathBuf>,

    /// Test file to run (alternative to the positional argument)
    #[arg(long, conflicts_with = "test_file")]
    pub test: Option<PathBuf>,

    /// Variables to set, as a YAML mapping
    #[arg(long)]
    pub vars: Option<String>,

    /// Print all response bodies
    #[arg(long)]
    pub print_bodies: bool,

    /// Print all response headers
    #[arg(long)]
    pub print_headers: bool,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log: Option<String>,

    /// Verbose transport output for debugging
    #[arg(long)]
    pub verbose: bool,

    /// Disable TLS host and certificate verification
    #[arg(long)]
    pub ssl_insecure: bool,

    /// Show each request and wait for ENTER before sending it
    #[arg(long)]
    pub interactive: bool,

    /// Turn off terminal colors in the summary
    #[arg(long, alias = "skip_term_colors")]
    pub skip_term_colors: bool,

    /// Directory of extension manifests to load
    #[arg(long, alias = "import_extensions")]
    pub ext_dir: Option<PathBuf>,

    /// Base URL prepended to relative test URLs
    #[arg(long)]
    pub default_base_url: Option<String>,

    /// Settings file (defaults to resttest.yaml/.yml/.json in the working directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Run test sets concurrently
    #[arg(long)]
    pub concurrent_testsets: bool,
}

impl Cli {
    /// The test file, whichever way it was given
    pub fn test_path(&self) -> Option<&PathBuf> {
        self.test.as_ref().or(self.test_file.as_ref())
    }

    /// Settings layer for the flags that were passed; absent flags stay `None`
    pub fn to_settings(&self) -> Result<RunSettings, SettingsError> {
        let flag = |set: bool| if set { Some(true) } else { None };
        Ok(RunSettings {
            print_bodies: flag(self.print_bodies),
            print_headers: flag(self.print_headers),
            ssl_insecure: flag(self.ssl_insecure),
            verbose: flag(self.verbose),
            skip_term_colors: flag(self.skip_term_colors),
            interactive: flag(self.interactive),
            concurrent_testsets: flag(self.concurrent_testsets),
            default_base_url: self.default_base_url.clone(),
            ext_dir: self.ext_dir.clone(),
            log_level: self.log.clone(),
            vars: self.vars.as_deref().map(parse_vars).transpose()?,
            ..RunSettings::default()
        })
    }
}
