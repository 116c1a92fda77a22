//! labnet command-line tool
//!
//! - `serve`: host a simulated module from the configuration
//! - `check`: resolve a script's dependencies without running it
//! - `launch`: run the built-in monitor script through the launcher
//! - `call`: one-shot remote call
//! - `control`: pause, resume or stop a running script

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use labnet_launcher::{Config, ConfigError, LaunchError, Launcher, resolve_config_path};
use labnet_rpc::{Arguments, ClientError, ClientOptions, RpcClient, bind};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod control;
mod modules;
mod monitor;

use control::ScriptControlClient;
use monitor::MonitorScript;

/// Exit code for a launch or check whose dependencies could not be resolved
const EXIT_UNRESOLVED: u8 = 2;

/// labnet - instrument servers, clients and script launcher
#[derive(Parser)]
#[command(name = "labnet")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Examples:
  labnet serve wavemeter1              Host the simulated wavemeter1 module
  labnet serve counter1 --probe        Host on a random free port
  labnet check monitor                 Show how monitor's dependencies resolve
  labnet launch monitor                Run the monitor script
  labnet call wavemeter1 get_wavelength '[1, \"Wavelength (nm)\"]'
  labnet call wavemeter1 _describe     Show a module's operations
  labnet control 7000 pause            Pause a script serving control on port 7000
")]
struct Cli {
    /// Configuration file (defaults to `<config dir>/labnet/config.json`)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a simulated module from the configuration
    Serve {
        /// Configured module name
        module: String,
        /// Pick a random free port instead of the configured one
        #[arg(long)]
        probe: bool,
    },

    /// Resolve a script's dependencies and report, without running it
    Check {
        /// Configured script name
        script: String,
    },

    /// Run the built-in monitor script for a configured script entry
    Launch {
        /// Configured script name
        script: String,
    },

    /// Call one operation on a configured module
    Call {
        /// Configured module name
        module: String,
        /// Operation name
        operation: String,
        /// JSON arguments: a list, an object, or a single value
        args: Option<String>,
        /// Call timeout in milliseconds (defaults to the configured one)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Send a control command to a running script
    Control {
        /// Port of the script's control server
        port: u16,
        action: ControlAction,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ControlAction {
    Pause,
    Resume,
    Stop,
    Status,
}

/// Filter directive used when `RUST_LOG` is unset.
fn default_directive() -> &'static str {
    if cfg!(debug_assertions) {
        "labnet=debug"
    } else {
        "labnet=info"
    }
}

/// Logs always go to stderr, keeping stdout for command output (`call`,
/// `check`, `control`). Debug builds also write a timestamped file.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive()));

    if !cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return;
    }

    let log_dir = std::env::temp_dir();
    let log_name = format!(
        "labnet-{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, &log_name));
    // Logging lasts for the whole process
    std::mem::forget(guard);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_line_number(true),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_line_number(true))
        .with(filter)
        .init();

    eprintln!("Logging to: {} (and stderr)", log_dir.join(log_name).display());
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Serve { module, probe } => run_serve(cli.config, &module, probe).await,
        Commands::Check { script } => run_check(cli.config, &script).await,
        Commands::Launch { script } => run_launch(cli.config, &script).await,
        Commands::Call {
            module,
            operation,
            args,
            timeout_ms,
        } => run_call(cli.config, &module, &operation, args.as_deref(), timeout_ms).await,
        Commands::Control { port, action, host } => run_control(&host, port, action).await,
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let path = resolve_config_path(explicit)?;
    Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn run_serve(config: Option<PathBuf>, module: &str, probe: bool) -> Result<ExitCode> {
    let config = load_config(config)?;
    let entry = config
        .module(module)
        .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))?;

    match modules::serve(entry, probe).await {
        None => bail!(
            "No simulation for module type '{}' (supported: {})",
            entry.module_type,
            modules::MODULE_TYPES.join(", ")
        ),
        Some(outcome) => {
            outcome.with_context(|| format!("Server '{}' failed", entry.name))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_check(config: Option<PathBuf>, script: &str) -> Result<ExitCode> {
    let config = load_config(config)?;
    let mut launcher = Launcher::from_config(config, script)?;

    match launcher.resolve().await {
        Ok(resolved) => {
            println!("{script}: all dependencies resolved");
            for entry in resolved.iter() {
                println!(
                    "  {} ({}) -> {} at {}",
                    entry.requested,
                    entry.module_type,
                    entry.bound,
                    entry.client.peer()
                );
            }
            if let Some(gui) = &launcher.spec().gui {
                println!("  gui {gui} -> connected");
            }
            launcher.release().await;
            Ok(ExitCode::SUCCESS)
        }
        Err(LaunchError::Resolve(err)) => {
            print_missing(script, &err);
            Ok(ExitCode::from(EXIT_UNRESOLVED))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_missing(script: &str, err: &labnet_launcher::ResolveError) {
    let missing = err.missing();
    eprintln!("{script}: cannot start, unresolved dependencies:");
    for dependency in &missing {
        eprintln!("  {dependency}");
    }
}

async fn run_launch(config: Option<PathBuf>, script: &str) -> Result<ExitCode> {
    let config = load_config(config)?;
    let grace_period = config.grace_period();
    let mut launcher = Launcher::from_config(config, script)?;

    let stop = launcher.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping script");
            stop.cancel();
        }
    });

    match launcher.run(&mut MonitorScript::default()).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(LaunchError::Resolve(err)) => {
            print_missing(script, &err);
            eprintln!("Exiting in {}s", grace_period.as_secs());
            tokio::time::sleep(grace_period).await;
            Ok(ExitCode::from(EXIT_UNRESOLVED))
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse command-line JSON into call arguments.
/// Lists are positional, objects are named, anything else is one positional value.
fn parse_args(raw: Option<&str>) -> Result<Arguments> {
    let Some(raw) = raw else {
        return Ok(Arguments::none());
    };
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("Arguments are not valid JSON: {raw}"))?;
    Ok(match value {
        Value::Array(values) => Arguments::Positional(values),
        Value::Object(map) => Arguments::Named(map),
        other => Arguments::positional([other]),
    })
}

async fn run_call(
    config: Option<PathBuf>,
    module: &str,
    operation: &str,
    args: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<ExitCode> {
    let config = load_config(config)?;
    let entry = config
        .module(module)
        .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))?;
    let args = parse_args(args)?;
    let options = timeout_ms.map_or_else(
        || config.client_options(),
        |ms| ClientOptions::with_timeout(Duration::from_millis(ms)),
    );

    let client = RpcClient::connect(&entry.host, entry.port, options)
        .await
        .with_context(|| format!("Is '{}' running?", entry.name))?;

    let outcome = client.call(operation, args).await;
    client.close().await;

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(ClientError::Remote(remote)) => {
            eprintln!(
                "{} error in '{}': {}",
                remote.kind,
                remote.operation.as_deref().unwrap_or(operation),
                remote.message
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).with_context(|| format!("Call to {}.{} failed", entry.name, operation)),
    }
}

async fn run_control(host: &str, port: u16, action: ControlAction) -> Result<ExitCode> {
    let client = RpcClient::connect(host, port, ClientOptions::default())
        .await
        .context("Is the script running?")?;
    let control: ScriptControlClient = bind(&client).await?;

    let state = match action {
        ControlAction::Pause => control.pause().await?,
        ControlAction::Resume => control.resume().await?,
        ControlAction::Stop => control.stop().await?,
        ControlAction::Status => control.status().await?,
    };
    client.close().await;

    println!("{state}");
    Ok(ExitCode::SUCCESS)
}
