//! Experimenter CLI
//!
//! The `experimenter` command records experiments as annotated git tags.
//!
//! ## Commands
//!
//! - `run`: capture the code state, run a command and keep the tag on success
//! - `list`: list recorded experiments
//! - `show`: print one experiment record
//! - `record`: replace the results of an existing experiment
//! - `delete`: remove experiment tags

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use experimenter_core::{
    CollisionPolicy, ExperimentConfig, ExperimentEntry, Experimenter, ListFilter, Parameters,
    TagPrefix, DEFAULT_TAG_PREFIX, METRICS,
};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "experimenter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Record experiment parameters, code state and results as git tags", long_about = None)]
struct Cli {
    /// Any directory inside the repository
    #[arg(long, global = true, env = "EXPERIMENTER_DIR", default_value = ".")]
    repo: PathBuf,

    /// Tag namespace for experiments
    #[arg(long, global = true, env = "EXPERIMENTER_TAG_PREFIX", default_value = DEFAULT_TAG_PREFIX)]
    tag_prefix: TagPrefix,

    /// What to do when a tag name is already taken (suffix or fail)
    #[arg(long, global = true, env = "EXPERIMENTER_ON_COLLISION", default_value = "suffix")]
    on_collision: CollisionPolicy,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the code state, run a command and record its results
    ///
    /// The experiment is kept only if the command exits successfully.
    Run {
        /// Experiment name
        #[arg(short, long)]
        name: String,

        /// Parameter as key=value (value parsed as JSON when possible)
        #[arg(short, long = "param", value_parser = parse_key_value)]
        params: Vec<(String, Value)>,

        /// JSON object file with parameters (merged before --param)
        #[arg(long)]
        params_file: Option<PathBuf>,

        /// Free-text description
        #[arg(short, long)]
        description: Option<String>,

        /// JSON object file the command writes its results to
        #[arg(long)]
        results_file: Option<PathBuf>,

        /// Command to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List recorded experiments
    List {
        /// Only experiments captured at this revision
        #[arg(long)]
        commit: Option<String>,

        /// Only experiments that have results
        #[arg(long)]
        with_results: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print one experiment record as JSON
    Show {
        /// Tag name, full or relative to the prefix
        name: String,
    },

    /// Replace the results of an existing experiment
    Record {
        /// Tag name, full or relative to the prefix
        name: String,

        /// Result as key=value (value parsed as JSON when possible)
        #[arg(short, long = "result", value_parser = parse_key_value)]
        results: Vec<(String, Value)>,

        /// JSON object file with results (merged before --result)
        #[arg(long)]
        results_file: Option<PathBuf>,
    },

    /// Delete experiments
    Delete {
        /// Tag names, full or relative to the prefix
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Log to stderr so stdout stays parseable; `RUST_LOG` overrides `-v`.
fn init_logging(json: bool, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.ok();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.json, cli.verbose);

    let config = ExperimentConfig {
        repo_dir: cli.repo,
        tag_prefix: cli.tag_prefix,
        collision: cli.on_collision,
    };
    let experimenter = Experimenter::open(&config).with_context(|| {
        format!(
            "Failed to open a git repository at {}",
            config.repo_dir.display()
        )
    })?;

    let code = match cli.command {
        Commands::Run {
            name,
            params,
            params_file,
            description,
            results_file,
            command,
        } => {
            let parameters = collect_map(params_file.as_deref(), params)?;
            cmd_run(
                &experimenter,
                &name,
                parameters,
                description,
                results_file.as_deref(),
                &command,
            )
            .await
            .map(ExitCode::from)?
        }
        Commands::List {
            commit,
            with_results,
            format,
        } => {
            let filter = ListFilter {
                commit,
                require_results: with_results,
            };
            cmd_list(&experimenter, &filter, format)?;
            ExitCode::SUCCESS
        }
        Commands::Show { name } => {
            cmd_show(&experimenter, &name)?;
            ExitCode::SUCCESS
        }
        Commands::Record {
            name,
            results,
            results_file,
        } => {
            let results = collect_map(results_file.as_deref(), results)?;
            cmd_record(&experimenter, &name, results)?;
            ExitCode::SUCCESS
        }
        Commands::Delete { names } => {
            cmd_delete(&experimenter, &names)?;
            ExitCode::SUCCESS
        }
    };

    METRICS.flush();
    Ok(code)
}

/// Parse `key=value`, reading the value as JSON and falling back to a string.
fn parse_key_value(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Read a JSON object file.
fn read_json_object(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as JSON", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!(
            "{} must contain a JSON object, found {}",
            path.display(),
            json_kind(&other)
        ),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The file's object (if any) overlaid with `pairs`.
fn collect_map(file: Option<&Path>, pairs: Vec<(String, Value)>) -> Result<Map<String, Value>> {
    let mut map = match file {
        Some(path) => read_json_object(path)?,
        None => Map::new(),
    };
    map.extend(pairs);
    Ok(map)
}

enum ChildOutcome {
    Exited(std::process::ExitStatus),
    Interrupted,
}

/// Capture, run `command`, and record results when it succeeds.
///
/// Returns the process exit code: 0 when results were recorded.
async fn cmd_run(
    experimenter: &Experimenter,
    name: &str,
    parameters: Parameters,
    description: Option<String>,
    results_file: Option<&Path>,
    command: &[String],
) -> Result<u8> {
    let (program, args) = command.split_first().context("No command given")?;

    let mut handle = experimenter
        .start(name, parameters, description)
        .context("Failed to capture experiment")?;
    println!("Started experiment {}", handle.name());
    println!("Commit:  {}", handle.commit());

    let started = Instant::now();
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("Failed to run {program}"))?;

    let outcome = tokio::select! {
        status = child.wait() => ChildOutcome::Exited(status.context("Failed to wait for command")?),
        _ = tokio::signal::ctrl_c() => ChildOutcome::Interrupted,
    };
    let duration = started.elapsed();

    match outcome {
        ChildOutcome::Exited(status) if status.success() => {
            let results = match results_file {
                Some(path) => read_json_object(path)?,
                None => default_results(0, duration.as_secs_f64()),
            };
            handle
                .record_results(results)
                .context("Failed to record results")?;
            let tag = handle.name().to_string();
            handle.finish()?;
            info!(tag = %tag, duration_secs = duration.as_secs_f64(), "command succeeded");
            println!("Recorded results for {tag}");
            Ok(0)
        }
        ChildOutcome::Exited(status) => {
            let tag = handle.name().to_string();
            handle.cancel()?;
            eprintln!("Experiment {tag} cancelled: command exited with {status}");
            let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(code.max(1))
        }
        ChildOutcome::Interrupted => {
            child.kill().await.ok();
            let tag = handle.name().to_string();
            handle.cancel()?;
            eprintln!("Experiment {tag} cancelled: interrupted");
            Ok(130)
        }
    }
}

fn default_results(exit_code: i32, duration_secs: f64) -> Map<String, Value> {
    let mut results = Map::new();
    results.insert("exit_code".to_string(), Value::from(exit_code));
    results.insert("duration_secs".to_string(), Value::from(duration_secs));
    results
}

fn render_entry(entry: &ExperimentEntry) -> String {
    let started = entry
        .record
        .started_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| entry.record.started.to_string());
    let results = if entry.record.has_results() {
        Value::Object(entry.record.results.clone()).to_string()
    } else {
        "-".to_string()
    };
    format!(
        "{}  {}  {}  params={}  results={}",
        entry.name,
        entry.target.short(),
        started,
        Value::Object(entry.record.parameters.clone()),
        results
    )
}

/// List experiments
fn cmd_list(experimenter: &Experimenter, filter: &ListFilter, format: OutputFormat) -> Result<()> {
    let entries = experimenter
        .catalog()
        .entries(filter)
        .context("Failed to list experiments")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text if entries.is_empty() => println!("No experiments found"),
        OutputFormat::Text => {
            for entry in &entries {
                println!("{}", render_entry(entry));
            }
        }
    }
    Ok(())
}

/// Show one experiment record
fn cmd_show(experimenter: &Experimenter, name: &str) -> Result<()> {
    let entry = experimenter
        .catalog()
        .get(name)
        .with_context(|| format!("Experiment not found: {name}"))?;
    println!("{}", serde_json::to_string_pretty(&entry.record)?);
    Ok(())
}

/// Replace the results of an experiment
fn cmd_record(experimenter: &Experimenter, name: &str, results: Map<String, Value>) -> Result<()> {
    if results.is_empty() {
        bail!("No results given; use --result key=value or --results-file");
    }
    let record = experimenter
        .catalog()
        .record_results(name, results)
        .with_context(|| format!("Failed to record results for {name}"))?;
    println!(
        "Recorded {} result(s) for {}",
        record.results.len(),
        experimenter.prefix().qualify(name)
    );
    Ok(())
}

/// Delete experiments, reporting missing ones
fn cmd_delete(experimenter: &Experimenter, names: &[String]) -> Result<()> {
    let catalog = experimenter.catalog();
    for name in names {
        let tag = catalog.prefix().qualify(name);
        if catalog
            .delete(name)
            .with_context(|| format!("Failed to delete {tag}"))?
        {
            println!("Deleted {tag}");
        } else {
            eprintln!("No experiment named {tag}");
        }
    }
    Ok(())
}
