use anyhow::{Context as _, Result};
use clap::Parser;
use resttest::cli::Cli;
use resttest::{ReqwestTransport, RunOptions, RunSettings, Runner};
use std::path::Path;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = load_settings(&cli)?;
    init_logging(settings.log_level.as_deref());

    let test_path = cli
        .test_path()
        .cloned()
        .context("A test file is required, either positionally or via --test")?;

    let registry = settings.registry().context("Failed to load extensions")?;
    let test_sets = settings
        .compile_suite(&registry, &test_path)
        .with_context(|| format!("Failed to compile {}", test_path.display()))?;
    log::info!("Compiled {} test sets from {}", test_sets.len(), test_path.display());

    let transport = ReqwestTransport::new().context("Failed to create HTTP transport")?;
    let runner = Runner::new(Arc::new(transport)).with_options(RunOptions {
        concurrent_testsets: settings.concurrent_testsets.unwrap_or(false),
        skip_term_colors: settings.skip_term_colors,
        ..RunOptions::default()
    });

    let report = runner.run_testsets(&test_sets).await;
    Ok(report.exit_code())
}

/// Defaults, then the settings file, then `RESTTEST_*` variables, then flags
fn load_settings(cli: &Cli) -> Result<RunSettings> {
    let file = match &cli.settings {
        Some(path) => Some(path.clone()),
        None => RunSettings::discover(Path::new(".")),
    };

    let mut settings = RunSettings::default();
    if let Some(path) = file {
        settings = settings.merge(
            RunSettings::load(&path).with_context(|| format!("Failed to load settings {}", path.display()))?,
        );
    }
    settings = settings.merge(RunSettings::from_env().context("Invalid RESTTEST_* environment settings")?);
    settings = settings.merge(cli.to_settings().context("Invalid command line arguments")?);
    Ok(settings)
}

fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.format_timestamp_millis().init();
}
