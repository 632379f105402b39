//! yaml-db-sync CLI - run configuration-driven MySQL sync tasks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use yaml_db_sync::{Config, Orchestrator, RunReport, SyncError};

#[derive(Parser)]
#[command(name = "yaml-db-sync")]
#[command(about = "Configuration-driven MySQL sync with checksum-based upserts")]
#[command(version)]
struct Cli {
    /// Path to YAML or JSON configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Inline YAML configuration content, used instead of --config
    #[arg(long, value_name = "TEXT", conflicts_with = "config")]
    config_yaml: Option<String>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled task group
    Run,

    /// Validate the configuration and show the execution plan
    Validate,

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Returns whether the command succeeded.
async fn run() -> Result<bool, SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = match cli.config_yaml.as_deref() {
        Some(text) => {
            let config = Config::from_yaml(text)?;
            info!("Loaded inline configuration");
            config
        }
        None => {
            let config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);
            config
        }
    };

    match cli.command {
        Commands::Run => {
            let report = Orchestrator::new(config).run().await;
            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_summary(&report);
            }
            Ok(report.success)
        }

        Commands::Validate => {
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_plan(&config);
            }
            Ok(true)
        }

        Commands::HealthCheck => {
            let result = Orchestrator::new(config).health_check().await;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  {}: {} ({}ms)",
                    result.target,
                    if result.healthy { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
            }
            Ok(result.healthy)
        }
    }
}

fn print_summary(report: &RunReport) {
    println!(
        "\nRun {}!",
        if report.success { "completed" } else { "failed" }
    );
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration);
    println!(
        "  Tasks: {}/{} succeeded",
        report.successful_tasks, report.total_tasks
    );
    for group in &report.task_group_results {
        println!(
            "  [{}] {} ({}, {}/{} succeeded{})",
            if group.success { "OK" } else { "FAILED" },
            group.name,
            group.execution_mode,
            group.successful_tasks,
            group.total_tasks,
            if group.stopped_early { ", stopped early" } else { "" }
        );
        for task in group.task_results.iter().filter(|t| !t.success) {
            println!("      {}: {}", task.task_name, task.message);
        }
    }
    if let Some(ref err) = report.error {
        println!("  Error: {}", err);
    }
}

fn print_plan(config: &Config) {
    println!("Configuration is valid");
    println!("  Connection: {} ({})", config.connection.identifier, config.connection.region);
    println!("  Hash: {}", config.hash());
    for group in &config.task_groups {
        let workers = match group.max_workers {
            Some(n) => format!(", max_workers={}", n),
            None => String::new(),
        };
        println!(
            "  Group '{}' [{}{}]{}",
            group.name,
            group.execution_mode,
            workers,
            if group.enabled { "" } else { " (disabled)" }
        );
        for task in &group.tasks {
            println!(
                "    - {} ({}){}",
                task.name,
                task.kind.type_name(),
                if task.enabled { "" } else { " (disabled)" }
            );
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json keeps stdout parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
