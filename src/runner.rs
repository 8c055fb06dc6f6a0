//! Execution engine: runs test sets against a transport and aggregates results

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colored::Colorize;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::context::{render_scalar, Context};
use crate::error::{OperationError, TransportError};
use crate::operations::Operation;
use crate::test_case::Test;
use crate::test_set::{Step, TestConfig, TestSet};
use crate::transport::{Headers, HttpRequest, HttpResponse, SendOptions, Transport};
use crate::validators::{Failure, FailureType};

/// Group name used for failed operation steps
pub const OPERATIONS_GROUP: &str = "Operations";

const SEPARATOR: &str = "===================================";

/// Pauses an interactive run before each request is sent
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn pause(&self, message: &str);
}

/// Waits for ENTER on standard input
pub struct StdinPrompt;

#[async_trait]
impl Prompt for StdinPrompt {
    async fn pause(&self, message: &str) {
        println!("{}", message);
        let mut line = String::new();
        if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            log::warn!("Could not read from stdin, continuing: {}", e);
        }
    }
}

/// Backoff between transport retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run test sets concurrently; tests inside one set stay ordered
    pub concurrent_testsets: bool,
    /// Overrides every test set's `skip_term_colors` when set
    pub skip_term_colors: Option<bool>,
    pub print_summary: bool,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrent_testsets: false,
            skip_term_colors: None,
            print_summary: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one executed test (or failed operation step)
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_name: String,
    pub url: String,
    pub group: String,
    pub passed: bool,
    pub response_code: Option<u16>,
    pub response_headers: Headers,
    pub failures: Vec<Failure>,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl TestResult {
    fn failed(test: &Test, url: String, failure: Failure, started_at: DateTime<Utc>) -> Self {
        Self {
            test_name: test.name.clone(),
            url,
            group: test.group.clone(),
            passed: false,
            response_code: None,
            response_headers: Vec::new(),
            failures: vec![failure],
            duration: Duration::ZERO,
            started_at,
        }
    }
}

/// Lifecycle of one test set run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    Summarized,
}

/// Everything one test set run produced, including its final context
#[derive(Debug)]
pub struct TestSetOutcome {
    pub name: String,
    pub results: Vec<TestResult>,
    pub context: Context,
    pub stopped_early: bool,
    pub state: RunState,
    pub skip_term_colors: bool,
}

impl TestSetOutcome {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| !result.passed).count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub passed: usize,
    pub total: usize,
}

impl GroupSummary {
    pub fn failed(&self) -> usize {
        self.total - self.passed
    }
}

/// Aggregated results of a whole run
#[derive(Debug)]
pub struct RunReport {
    pub groups: BTreeMap<String, GroupSummary>,
    pub outcomes: Vec<TestSetOutcome>,
    pub total_failures: usize,
}

impl RunReport {
    pub fn from_outcomes(outcomes: Vec<TestSetOutcome>) -> Self {
        let mut groups: BTreeMap<String, GroupSummary> = BTreeMap::new();
        for result in outcomes.iter().flat_map(|outcome| outcome.results.iter()) {
            let summary = groups.entry(result.group.clone()).or_default();
            summary.total += 1;
            if result.passed {
                summary.passed += 1;
            }
        }
        let total_failures = groups.values().map(GroupSummary::failed).sum();
        Self {
            groups,
            outcomes,
            total_failures,
        }
    }

    /// Process exit code: the failure count, clamped to 255
    pub fn exit_code(&self) -> i32 {
        self.total_failures.min(255) as i32
    }

    /// One line per group, sorted by group name
    pub fn summary_lines(&self, colors: bool) -> Vec<String> {
        self.groups
            .iter()
            .map(|(group, summary)| {
                let verdict = if summary.failed() == 0 { "SUCCEEDED:" } else { "FAILED:" };
                let line = format!(
                    "Test Group {} {} {}/{} Tests Passed!",
                    group, verdict, summary.passed, summary.total
                );
                match (colors, summary.failed() == 0) {
                    (false, _) => line,
                    (true, true) => line.green().to_string(),
                    (true, false) => line.red().to_string(),
                }
            })
            .collect()
    }
}

/// Drives compiled test sets through a [`Transport`]
pub struct Runner {
    transport: Arc<dyn Transport>,
    options: RunOptions,
    prompt: Arc<dyn Prompt>,
}

impl Runner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: RunOptions::default(),
            prompt: Arc::new(StdinPrompt),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the pause used by interactive tests
    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Run every test set, print the group summary and return the report
    pub async fn run_testsets(&self, test_sets: &[TestSet]) -> RunReport {
        log::info!(
            "Running {} test sets via {} transport",
            test_sets.len(),
            self.transport.name()
        );

        let outcomes = if self.options.concurrent_testsets {
            join_all(test_sets.iter().map(|test_set| self.run_testset(test_set))).await
        } else {
            let mut outcomes = Vec::with_capacity(test_sets.len());
            for test_set in test_sets {
                outcomes.push(self.run_testset(test_set).await);
            }
            outcomes
        };

        let skip_colors = self
            .options
            .skip_term_colors
            .unwrap_or_else(|| outcomes.iter().any(|outcome| outcome.skip_term_colors));
        let report = RunReport::from_outcomes(outcomes);

        if self.options.print_summary {
            if test_sets.iter().any(TestSet::is_interactive) {
                println!("{}", SEPARATOR);
            }
            for line in report.summary_lines(!skip_colors) {
                println!("{}", line);
            }
        }

        report
    }

    /// Run one test set with a single context shared by all its steps
    pub async fn run_testset(&self, test_set: &TestSet) -> TestSetOutcome {
        let config = &test_set.config;
        let mut outcome = TestSetOutcome {
            name: test_set.name(),
            results: Vec::new(),
            context: config.new_context(),
            stopped_early: false,
            state: RunState::Init,
            skip_term_colors: config.skip_term_colors,
        };

        log::debug!(
            "Starting test set {} (run {}) with {} steps",
            outcome.name,
            outcome.context.run_id(),
            test_set.steps.len()
        );
        outcome.state = RunState::Running;

        if config.test_parallel && test_set.is_independent() {
            log::debug!("Test set {} is independent, sending tests concurrently", outcome.name);
            let tests: Vec<(&Test, &TestConfig)> = test_set.test_steps().collect();
            outcome.results = self.run_parallel(&tests, &mut outcome.context).await;
        } else {
            if config.test_parallel {
                log::debug!("Test set {} shares context between steps, running sequentially", outcome.name);
            }
            for step in &test_set.steps {
                match step {
                    Step::Operation(operation) => {
                        if let Err(e) = operation.run(&mut outcome.context).await {
                            let result = operation_failure(operation.as_ref(), e);
                            log_result(&result);
                            outcome.results.push(result);
                        }
                    }
                    Step::Configure(change) => {
                        log::debug!("Applying {:?} to test set {}", change, outcome.name);
                        change.apply(&mut outcome.context);
                    }
                    Step::Test { test, config } => {
                        let result = self.run_test(test, config, &mut outcome.context).await;
                        let stop = !result.passed && test.stop_on_failure;
                        outcome.results.push(result);
                        if stop {
                            log::warn!("STOP ON FAILURE! stopping test set execution, continuing with other test sets");
                            outcome.stopped_early = true;
                            break;
                        }
                        if let Some(delay) = test.delay {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        outcome.state = RunState::Summarized;
        log::debug!(
            "Finished test set {}: {} results, {} failed",
            outcome.name,
            outcome.results.len(),
            outcome.failures()
        );
        outcome
    }

    /// Run a single test against the context, mutating it on success
    pub async fn run_test(&self, test: &Test, config: &TestConfig, context: &mut Context) -> TestResult {
        let started_at = Utc::now();
        let request = match prepare(test, context) {
            Ok(request) => request,
            Err(failure) => {
                let result = TestResult::failed(test, render_scalar(&test.url), failure, started_at);
                log_result(&result);
                return result;
            }
        };

        if config.interactive {
            print_request(test, &request);
            self.prompt.pause("Press ENTER when ready").await;
        }

        let start = Instant::now();
        let response = self.dispatch(&request, config).await;
        let result = evaluate(test, config, &request, response, context, started_at, start.elapsed());
        log_result(&result);
        result
    }

    /// Resolve sequentially, send concurrently, evaluate in declared order
    async fn run_parallel(&self, tests: &[(&Test, &TestConfig)], context: &mut Context) -> Vec<TestResult> {
        let prepared: Vec<(DateTime<Utc>, Result<HttpRequest, Failure>)> = tests
            .iter()
            .map(|(test, _)| (Utc::now(), prepare(test, context)))
            .collect();

        let sends = prepared.iter().zip(tests).map(|((_, request), (_, config))| async move {
            match request {
                Ok(request) => {
                    let start = Instant::now();
                    let response = self.dispatch(request, config).await;
                    Some((response, start.elapsed()))
                }
                Err(_) => None,
            }
        });
        let responses = join_all(sends).await;

        let mut results = Vec::with_capacity(tests.len());
        for ((&(test, config), (started_at, request)), response) in tests.iter().zip(prepared).zip(responses) {
            let result = match (request, response) {
                (Ok(request), Some((response, elapsed))) => {
                    evaluate(test, config, &request, response, context, started_at, elapsed)
                }
                (Err(failure), _) => TestResult::failed(test, render_scalar(&test.url), failure, started_at),
                (Ok(request), None) => TestResult::failed(
                    test,
                    request.url,
                    Failure::new("Request was not dispatched", FailureType::TestException),
                    started_at,
                ),
            };
            log_result(&result);
            results.push(result);
        }
        results
    }

    /// Send with an engine-level timeout, retrying transport failures
    async fn dispatch(&self, request: &HttpRequest, config: &TestConfig) -> Result<HttpResponse, TransportError> {
        let options = SendOptions {
            timeout: config.timeout,
            ssl_insecure: config.ssl_insecure,
            verbose: config.verbose,
        };
        let policy = &self.options.retry;
        let mut attempt = 0;
        let mut delay = policy.initial_delay;

        loop {
            let sent = tokio::time::timeout(config.timeout, self.transport.send(request, &options)).await;
            let error = match sent {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout {
                    timeout: config.timeout,
                },
            };

            attempt += 1;
            if attempt > config.retries || !error.is_retryable() {
                return Err(error);
            }

            log::warn!(
                "{} {} failed ({}), retry {}/{}",
                request.method,
                request.url,
                error,
                attempt,
                config.retries
            );
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay.mul_f64(policy.backoff_multiplier), policy.max_delay);
        }
    }
}

/// Apply per-test binds and pre-request extractors, then resolve the request in one pass
fn prepare(test: &Test, context: &mut Context) -> Result<HttpRequest, Failure> {
    for (name, template) in &test.variable_binds {
        let value = context.resolve(template).map_err(test_exception)?;
        context.bind(name.clone(), value);
    }

    for (variable, generator) in &test.generator_binds {
        context.bind_generator_next(variable, generator).map_err(|e| {
            Failure::new(
                format!("Generator '{}' failed while binding '{}'", generator, variable),
                FailureType::TestException,
            )
            .with_details(e.to_string())
        })?;
    }

    for (name, extractor) in &test.extractors_before {
        let value = extractor
            .extract(&[], &Vec::new(), context)
            .map_err(|e| extractor_exception(name, e))?;
        context.bind(name.clone(), value);
    }

    test.resolve_request(&mut context.pass()).map_err(test_exception)
}

fn test_exception(error: crate::error::TemplateError) -> Failure {
    Failure::new("Failed to resolve test fields", FailureType::TestException).with_details(error.to_string())
}

fn extractor_exception(name: &str, error: crate::error::ExtractError) -> Failure {
    Failure::new(
        format!("Extractor for '{}' failed", name),
        FailureType::ExtractorException,
    )
    .with_details(error.to_string())
}

fn evaluate(
    test: &Test,
    config: &TestConfig,
    request: &HttpRequest,
    response: Result<HttpResponse, TransportError>,
    context: &mut Context,
    started_at: DateTime<Utc>,
    elapsed: Duration,
) -> TestResult {
    let response = match response {
        Ok(response) => response,
        Err(error) => {
            let failure_type = match &error {
                TransportError::Timeout { .. } => FailureType::Timeout,
                _ => FailureType::Transport,
            };
            let failure = Failure::new(format!("Transport error: {}", error), failure_type);
            return TestResult {
                duration: elapsed,
                ..TestResult::failed(test, request.url.clone(), failure, started_at)
            };
        }
    };

    let mut failures = Vec::new();
    if !test.expects_status(response.status_code) {
        let expected = if test.expected_status.is_empty() {
            "2xx".to_string()
        } else {
            test.expected_status
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        failures.push(Failure::new(
            format!(
                "Invalid HTTP response code: response code {} not in expected codes [{}]",
                response.status_code, expected
            ),
            FailureType::InvalidResponse,
        ));
    } else {
        for validator in &test.validators {
            if let Err(failure) = validator.validate(&response.body, &response.headers, context) {
                failures.push(failure);
            }
        }
    }

    if failures.is_empty() {
        for (name, extractor) in &test.extractors_after {
            match extractor.extract(&response.body, &response.headers, context) {
                Ok(value) => context.bind(name.clone(), value),
                Err(e) => {
                    failures.push(extractor_exception(name, e));
                    break;
                }
            }
        }
    }

    let passed = failures.is_empty();
    if prints_body(config, passed) {
        if config.interactive {
            println!("RESPONSE:");
        }
        println!("{}", String::from_utf8_lossy(&response.body));
    }
    if prints_headers(config, passed) {
        if config.interactive {
            println!("RESPONSE HEADERS:");
        }
        for (name, value) in &response.headers {
            println!("{}: {}", name, value);
        }
    }

    // Body is dropped here; only headers are kept on the result
    TestResult {
        test_name: test.name.clone(),
        url: request.url.clone(),
        group: test.group.clone(),
        passed,
        response_code: Some(response.status_code),
        response_headers: response.headers,
        failures,
        duration: elapsed,
        started_at,
    }
}

/// Failed tests always show the body they received
fn prints_body(config: &TestConfig, passed: bool) -> bool {
    config.print_bodies || !passed
}

/// Failed tests always show the headers they received
fn prints_headers(config: &TestConfig, passed: bool) -> bool {
    config.print_headers || !passed
}

fn print_request(test: &Test, request: &HttpRequest) {
    println!("{}", SEPARATOR);
    println!("{}", test.name);
    println!("-----------------------------------");
    println!("REQUEST:");
    println!("{} {}", request.method, request.url);
    println!("HEADERS:");
    for (name, value) in &request.headers {
        println!("{}: {}", name, value);
    }
    if let Some(body) = &request.body {
        println!("\n{}", String::from_utf8_lossy(body));
    }
}

fn operation_failure(operation: &dyn Operation, error: OperationError) -> TestResult {
    TestResult {
        test_name: operation.describe(),
        url: String::new(),
        group: OPERATIONS_GROUP.to_string(),
        passed: false,
        response_code: None,
        response_headers: Vec::new(),
        failures: vec![Failure::new(
            format!("Operation '{}' failed", operation.kind()),
            FailureType::OperationFailed,
        )
        .with_details(error.to_string())],
        duration: Duration::ZERO,
        started_at: Utc::now(),
    }
}

fn log_result(result: &TestResult) {
    let status = result
        .response_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "none".to_string());
    if result.passed {
        log::info!(
            "Test Succeeded: {} URL={} Group={} HTTP Status Code: {}",
            result.test_name,
            result.url,
            result.group,
            status
        );
        return;
    }

    log::error!(
        "Test Failed: {} URL={} Group={} HTTP Status Code: {}",
        result.test_name,
        result.url,
        result.group,
        status
    );
    for failure in &result.failures {
        log::error!("  {}", failure);
        if let Some(validator) = &failure.validator {
            log::error!("    validator: {}", validator);
        }
    }
}
