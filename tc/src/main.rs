//! threadconnect - cross-thread handoff coordinator
//!
//! CLI entry point for the handoff demo and configuration inspection.

use clap::Parser;
use diagcontext::DiagnosticFormat;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use threadconnect::cli::{Cli, Command, OutputFormat};
use threadconnect::config::Config;
use threadconnect::demo::{DemoOptions, DemoReport, run_demo};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // stdout carries the report, logs go to stderr
    // Lines are masked after formatting, so escape codes would be masked too
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_ansi(false)
        .event_format(DiagnosticFormat::new(tracing_subscriber::fmt::format().with_thread_names(true)))
        .try_init()
        .map_err(|e| eyre::eyre!("{}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Demo {
            branches,
            fail,
            inline,
            request_id,
            mask,
            format,
        } => {
            let options = DemoOptions {
                branches,
                fail,
                inline,
                request_id,
                mask,
            };
            cmd_demo(&config, &options, format)
        }
        Command::Config => cmd_config(&config),
    }
}

fn cmd_demo(config: &Config, options: &DemoOptions, format: OutputFormat) -> Result<()> {
    debug!(?options, %format, "cmd_demo: called");
    let report = run_demo(config, options).context("Demo failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &DemoReport) {
    println!("Request:     {}", report.request_id.cyan());
    println!("Transaction: {}", report.transaction.cyan());
    println!();

    for branch in &report.branches {
        match (&branch.observed, &branch.error) {
            (Some(observed), _) => {
                println!("{} branch {} on {}", "✓".green(), branch.branch, observed.thread.yellow());
                println!(
                    "    request_id={} transaction={}",
                    observed.request_id.as_deref().unwrap_or("-"),
                    observed.transaction.as_deref().unwrap_or("-")
                );
                println!("    masked: {}", observed.masked.dimmed());
            }
            (None, error) => {
                println!(
                    "{} branch {}: {}",
                    "✗".red(),
                    branch.branch,
                    error.as_deref().unwrap_or("unknown failure")
                );
            }
        }
    }

    if !report.events.is_empty() {
        println!();
        println!("Observer events:");
        for event in &report.events {
            println!(
                "  #{} {} on {}",
                event.handoff,
                event.kind.call_name().cyan(),
                event.thread.dimmed()
            );
        }
    }

    println!();
    let outcome = if report.committed {
        "committed".green()
    } else {
        "rolled back".red()
    };
    println!(
        "Transaction {} ({})",
        outcome,
        if report.transaction_resumed {
            "resumed on caller"
        } else {
            "not resumed"
        }
    );
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to render configuration")?);
    Ok(())
}
