#![warn(missing_docs)]
//! opbench CLI Library
//!
//! Command-line front end for the opcode executor. Each `--subject` becomes
//! one isolated PHP run; the results are printed as a single JSON document.
//!
//! ```text
//! opbench --class SampleBench --file bench/SampleBench.php --subject run --revs 3 --warmup 1
//! ```

mod config;

pub use config::*;

use anyhow::Context;
use clap::Parser;
use opbench_core::{
    ExecutionConfig, ExecutionContext, ExecutionError, ExecutionResults, OpcodeExecutor,
    ParameterSet,
};
use opbench_remote::{IniValue, PhpConfig};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// opbench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "opbench")]
#[command(author, version, about = "opbench - opcode, time and memory benchmarks for PHP")]
pub struct Cli {
    /// Benchmark class name
    #[arg(long, required_unless_present = "print_config")]
    pub class: Option<String>,

    /// File declaring the benchmark class
    #[arg(long, required_unless_present = "print_config")]
    pub file: Option<PathBuf>,

    /// Subject method to run; repeat for several subjects
    #[arg(long = "subject", required_unless_present = "print_config")]
    pub subjects: Vec<String>,

    /// Timed invocations per subject
    #[arg(long, default_value = "1")]
    pub revs: u64,

    /// Untimed invocations before measurement
    #[arg(long, default_value = "0")]
    pub warmup: u64,

    /// Method run once before the subject; repeatable
    #[arg(long = "before")]
    pub before_methods: Vec<String>,

    /// Method run once after the subject; repeatable
    #[arg(long = "after")]
    pub after_methods: Vec<String>,

    /// Parameter as key=<json>; non-JSON values are taken as strings
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Wall-clock limit per subject (e.g. "30s"; a bare number is seconds, 0 for none)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Ini override as key=value; repeatable
    #[arg(long = "php-config", value_parser = parse_ini)]
    pub php_config: Vec<(String, IniValue)>,

    /// Pass parameters as PHP serialize() strings
    #[arg(long)]
    pub safe_parameters: bool,

    /// PHP binary
    #[arg(long)]
    pub php_binary: Option<String>,

    /// Command prefix for the PHP binary (e.g. "nice -n 5")
    #[arg(long)]
    pub php_wrapper: Option<String>,

    /// Ignore php.ini files
    #[arg(long)]
    pub php_disable_ini: bool,

    /// File required before the benchmark file
    #[arg(long)]
    pub bootstrap: Option<PathBuf>,

    /// Template to render instead of the bundled one
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Configuration file (default: discover opbench.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of subjects run concurrently
    #[arg(long, default_value = "1")]
    pub jobs: usize,

    /// Print a commented default opbench.toml and exit
    #[arg(long)]
    pub print_config: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn split_assignment(s: &str) -> Result<(&str, &str), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(format!("expected key=value, got `{}`", s)),
    }
}

fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, value) = split_assignment(s)?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_ini(s: &str) -> Result<(String, IniValue), String> {
    let (key, value) = split_assignment(s)?;
    let value = match value.parse::<i64>() {
        Ok(number) => IniValue::Int(number),
        Err(_) => IniValue::from(value),
    };
    Ok((key.to_string(), value))
}

/// Outcome of one subject
#[derive(Debug)]
pub struct SubjectOutcome {
    /// Subject method
    pub subject: String,
    /// Metrics, or why there are none
    pub result: Result<ExecutionResults, ExecutionError>,
}

/// Outcome of a whole run, in subject order
#[derive(Debug, Default)]
pub struct RunReport {
    /// One entry per requested subject
    pub outcomes: Vec<SubjectOutcome>,
}

impl RunReport {
    /// Whether any subject failed
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_err())
    }

    /// JSON document mapping each subject to its metrics or its error
    pub fn to_json(&self) -> Value {
        let mut subjects = Map::new();
        for outcome in &self.outcomes {
            let entry = match &outcome.result {
                Ok(results) => json!({
                    "time": {
                        "net": results.time().net_time(),
                        "revs": results.time().revs(),
                        "per_revolution": results.time().time_per_revolution(),
                    },
                    "memory": results.memory(),
                    "opcodes": results.opcodes().count,
                }),
                Err(error) => json!({
                    "error": {
                        "kind": error_kind(error),
                        "message": error.to_string(),
                    }
                }),
            };
            subjects.insert(outcome.subject.clone(), entry);
        }
        Value::Object(subjects)
    }
}

fn error_kind(error: &ExecutionError) -> &'static str {
    match error {
        ExecutionError::Timeout(_) => "timeout",
        ExecutionError::Script { .. } => "script",
        ExecutionError::Protocol(_) => "protocol",
        ExecutionError::Launch(_) => "launch",
        ExecutionError::InvalidContext(_) | ExecutionError::InvalidConfig(_) => "invalid",
        ExecutionError::MissingMetric(_) | ExecutionError::DuplicateMetric(_) => "results",
    }
}

/// Run the opbench CLI with the process arguments.
/// This is the main entry point for the `opbench` binary.
///
/// Exits with status 1 when any subject fails.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the opbench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if cli.print_config {
        print!("{}", OpbenchConfig::default_toml());
        return Ok(());
    }

    // Logs go to stderr so stdout stays machine-readable
    let filter = if cli.verbose { "opbench=debug" } else { "opbench=info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => OpbenchConfig::load(path)?,
        None => OpbenchConfig::discover()?.unwrap_or_default(),
    };

    let report = run_subjects(&cli, &config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &report.to_json())?;
    writeln!(out)?;
    out.flush()?;

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

/// Execute every subject named on the command line.
///
/// CLI flags override `config`. Setup problems (bad config, bad flags) are
/// errors; per-subject failures are recorded in the report.
pub fn run_subjects(cli: &Cli, config: &OpbenchConfig) -> anyhow::Result<RunReport> {
    let executor = build_executor(cli, config);
    let execution_config = build_execution_config(cli, config)?;
    let contexts = build_contexts(cli, config)?;
    let jobs = cli.jobs.max(1);

    tracing::info!(
        class = cli.class.as_deref().unwrap_or_default(),
        subjects = contexts.len(),
        jobs,
        php = executor.launcher().php_binary(),
        "running subjects"
    );
    let start = Instant::now();

    let pool = ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("Failed to build worker pool")?;

    let outcomes: Vec<SubjectOutcome> = pool.install(|| {
        contexts
            .par_iter()
            .map(|context| {
                let result = executor.execute(context, &execution_config);
                match &result {
                    Ok(results) => tracing::info!(
                        subject = %context.subject_label(),
                        net_us = results.time().net_time(),
                        opcodes = results.opcodes().count,
                        "subject finished"
                    ),
                    Err(error) => tracing::warn!(
                        subject = %context.subject_label(),
                        %error,
                        "subject failed"
                    ),
                }
                SubjectOutcome {
                    subject: context.method_name().to_string(),
                    result,
                }
            })
            .collect()
    });

    tracing::debug!(elapsed = ?start.elapsed(), "run complete");
    Ok(RunReport { outcomes })
}

fn build_executor(cli: &Cli, config: &OpbenchConfig) -> OpcodeExecutor {
    let mut launcher_config = config.launcher.clone();
    if let Some(binary) = &cli.php_binary {
        launcher_config.php_binary = binary.clone();
    }
    if cli.php_wrapper.is_some() {
        launcher_config.php_wrapper = cli.php_wrapper.clone();
    }
    if cli.bootstrap.is_some() {
        launcher_config.bootstrap = cli.bootstrap.clone();
    }
    launcher_config.php_disable_ini |= cli.php_disable_ini;

    let executor = OpcodeExecutor::new(launcher_config.to_launcher());
    match &cli.template {
        Some(template) => executor.with_template(template.clone()),
        None => executor,
    }
}

fn build_execution_config(cli: &Cli, config: &OpbenchConfig) -> anyhow::Result<ExecutionConfig> {
    let mut execution = config.execution_config()?;
    execution
        .php_config
        .extend(cli.php_config.iter().cloned().collect::<PhpConfig>());
    execution.safe_parameters |= cli.safe_parameters;
    Ok(execution)
}

fn build_contexts(cli: &Cli, config: &OpbenchConfig) -> anyhow::Result<Vec<ExecutionContext>> {
    let class = cli.class.as_deref().context("--class is required")?;
    let file = cli.file.as_deref().context("--file is required")?;
    if cli.subjects.is_empty() {
        anyhow::bail!("at least one --subject is required");
    }
    // Results are keyed by subject name.
    for (index, subject) in cli.subjects.iter().enumerate() {
        if cli.subjects[..index].contains(subject) {
            anyhow::bail!("subject `{}` given more than once", subject);
        }
    }

    let timeout = match &cli.timeout {
        Some(timeout) => Some(OpbenchConfig::parse_duration(timeout)?),
        None => config.launcher.timeout()?,
    };
    let parameters = ParameterSet::new("default", cli.params.iter().cloned().collect());

    Ok(cli
        .subjects
        .iter()
        .map(|subject| {
            ExecutionContext::new(class, file, subject)
                .with_revolutions(cli.revs)
                .with_warmup(cli.warmup)
                .with_before_methods(cli.before_methods.clone())
                .with_after_methods(cli.after_methods.clone())
                .with_parameter_set(parameters.clone())
                .with_timeout(timeout)
        })
        .collect())
}
