mod config;
mod error;
mod health;
mod packages;
mod platform;
mod secrets;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crate::config::{ConfigManager, DoctorConfig};
use crate::health::{HealthReport, RemediationOutcome, SystemHealth};
use crate::packages::PipManager;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(
    name = "crisap",
    version,
    about = "CRISAP - environment diagnostics and self-healing for the climate risk platform"
)]
struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Application root (defaults to the current directory)
    #[arg(long, global = true)]
    base_path: Option<PathBuf>,

    /// Config file (defaults to <base>/crisap.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run self-diagnostics and print the health report
    Diagnose {
        /// Only report; do not create directories, install packages or write templates
        #[arg(long)]
        no_fix: bool,
    },
    /// Diagnose, then repair directories and dependencies
    Heal {
        /// Re-run diagnostics after healing
        #[arg(long)]
        recheck: bool,
    },
    /// Write the .env template with placeholders for every required key
    InitEnv {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show system info (version, platform, paths)
    Info,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the effective configuration to <base>/crisap.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// JSON envelope for non-interactive output
fn json_output(success: bool, data: serde_json::Value, error: Option<&str>) -> String {
    serde_json::json!({
        "success": success,
        "data": data,
        "error": error,
    })
    .to_string()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match ConfigManager::load(cli.config.as_deref(), cli.base_path.as_deref()) {
        Ok(manager) => manager,
        Err(e) => {
            if cli.json {
                println!("{}", json_output(false, serde_json::Value::Null, Some(&e.to_string())));
                std::process::exit(1);
            }
            return Err(e.into());
        }
    };

    init_logging(cli.json, manager.get());

    let command = cli.command.unwrap_or(Commands::Diagnose { no_fix: false });
    run_command(command, manager, cli.json).await
}

fn init_logging(json_mode: bool, config: &DoctorConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crisap=info"));

    let console = if json_mode {
        // In JSON mode: send logs to stderr with no ANSI colors
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    } else if std::env::var("CRISAP_LOG_JSON").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .compact()
            .boxed()
    };

    let file = config.log_file_path().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();
}

fn build_health(config: DoctorConfig) -> Result<SystemHealth> {
    let packages = PipManager::new(
        &config.interpreter,
        Duration::from_secs(config.install_timeout_secs),
    )?;

    Ok(SystemHealth::new(config, Arc::new(packages), platform::current()))
}

// ============================================================================
// Non-Interactive Command Runner
// ============================================================================

async fn run_command(command: Commands, manager: ConfigManager, json_mode: bool) -> Result<()> {
    match command {
        Commands::Diagnose { no_fix } => {
            let mut health = build_health(manager.into_inner())?;
            let report = if no_fix {
                health.inspect().await
            } else {
                health.run_self_diagnostics().await
            };

            print_report(report, json_mode)?;
            if !report.overall() {
                std::process::exit(1);
            }
        }
        Commands::Heal { recheck } => {
            let mut health = build_health(manager.into_inner())?;
            let outcome = health.perform_self_healing().await;

            let verdict = if recheck {
                Some(health.run_self_diagnostics().await)
            } else {
                None
            };

            print_outcome(&outcome, verdict, json_mode)?;
            if !outcome.succeeded() || verdict.is_some_and(|r| !r.overall()) {
                std::process::exit(1);
            }
        }
        Commands::InitEnv { force } => {
            let config = manager.get();
            let path = config.env_file_path();

            if path.exists() && !force {
                if json_mode {
                    println!("{}", json_output(false, serde_json::json!({
                        "path": path.to_string_lossy(),
                    }), Some("file already exists")));
                } else {
                    eprintln!("{} already exists (use --force to overwrite)", path.display());
                }
                std::process::exit(1);
            }

            secrets::write_env_template(&path, &config.base_path, &config.required_keys)?;
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({
                    "path": path.to_string_lossy(),
                    "keys": config.required_keys,
                }), None));
            } else {
                println!("Template written to {}", path.display());
                println!("  Fill in: {}", config.required_keys.join(", "));
            }
        }
        Commands::Info => {
            let version = env!("CARGO_PKG_VERSION");
            let config = manager.get();
            let host = platform::current();
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({
                    "version": version,
                    "os": std::env::consts::OS,
                    "platform": host.name(),
                    "base_path": config.base_path.to_string_lossy(),
                    "config_path": manager.config_path().to_string_lossy(),
                    "interpreter": config.interpreter,
                }), None));
            } else {
                println!("CRISAP v{}", version);
                println!("Platform: {} ({})", std::env::consts::OS, host.name());
                println!("Base path: {}", config.base_path.display());
                println!("Config: {}", manager.config_path().display());
                println!("Interpreter: {}", config.interpreter);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                if json_mode {
                    println!("{}", json_output(true, serde_json::to_value(manager.get())?, None));
                } else {
                    print!("{}", manager.to_toml()?);
                }
            }
            ConfigAction::Init { force } => {
                let target = ConfigManager::from_config(manager.into_inner());
                let path = target.config_path().to_path_buf();

                if path.exists() && !force {
                    if json_mode {
                        println!("{}", json_output(false, serde_json::Value::Null, Some("config file already exists")));
                    } else {
                        eprintln!("{} already exists (use --force to overwrite)", path.display());
                    }
                    std::process::exit(1);
                }

                target.save()?;
                if json_mode {
                    println!("{}", json_output(true, serde_json::json!({
                        "path": path.to_string_lossy(),
                    }), None));
                } else {
                    println!("Configuration written to {}", path.display());
                }
            }
        },
    }

    Ok(())
}

fn print_report(report: &HealthReport, json_mode: bool) -> Result<()> {
    if json_mode {
        println!("{}", json_output(report.overall(), serde_json::to_value(report)?, None));
        return Ok(());
    }

    println!("CRISAP health report ({})", report.generated_at().format("%Y-%m-%d %H:%M:%S UTC"));
    for check in report.checks() {
        let mark = if check.passed { "✓" } else { "✗" };
        println!("  {} {:<20} {}", mark, check.name.as_str(), check.summary);
        for failure in &check.failures {
            println!("      - {}", failure);
        }
        for note in &check.notes {
            println!("      · {}", note);
        }
        if !check.passed && !check.name.is_remediable() {
            println!("      (manual action required)");
        }
    }
    let failing = report.failing();
    if failing.is_empty() {
        println!("Overall: HEALTHY");
    } else {
        let names: Vec<&str> = failing.iter().map(|n| n.as_str()).collect();
        println!("Overall: FAILED ({})", names.join(", "));
    }
    Ok(())
}

fn print_outcome(
    outcome: &RemediationOutcome,
    verdict: Option<&HealthReport>,
    json_mode: bool,
) -> Result<()> {
    if json_mode {
        let report = match verdict {
            Some(r) => serde_json::to_value(r)?,
            None => serde_json::Value::Null,
        };
        let success = outcome.succeeded() && verdict.is_none_or(|r| r.overall());
        println!("{}", json_output(success, serde_json::json!({
            "fixed": outcome.fixed,
            "failed": outcome.failed,
            "report": report,
        }), None));
        return Ok(());
    }

    if !outcome.attempted() {
        println!("Nothing to heal");
    }
    for name in &outcome.fixed {
        println!("  ✓ fixed {}", name);
    }
    for name in &outcome.failed {
        println!("  ✗ could not fix {}", name);
    }

    if let Some(report) = verdict {
        print_report(report, false)?;
    }
    Ok(())
}
