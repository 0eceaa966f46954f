//! Sockbridge CLI - runs a Lua script against the socket bridge.
//!
//! This is the main binary entry point. See the `sockbridge` library for
//! the core functionality.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sockbridge::{Config, RunOutcome, ScriptRuntime, TlsSettings};

#[derive(Parser)]
#[command(name = "sockbridge")]
#[command(version)]
#[command(about = "Drive raw TCP/TLS sockets from Lua scripts")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lua script until its connections finish
    Run {
        /// Path to the Lua script
        script: PathBuf,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn run_script(config: Config, script: &Path, timeout: Option<u64>) -> Result<ExitCode> {
    let runtime = ScriptRuntime::new(config, TlsSettings::default())?;

    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, runtime.shutdown_flag())?;
    flag::register(SIGTERM, runtime.shutdown_flag())?;

    runtime
        .exec_file(script)
        .with_context(|| format!("Script {} failed", script.display()))?;

    let outcome = runtime.run(timeout.map(Duration::from_secs))?;
    log::info!("Script finished: {:?}", outcome);
    runtime.shutdown();

    Ok(match outcome {
        RunOutcome::Idle | RunOutcome::Shutdown => ExitCode::SUCCESS,
        RunOutcome::TimedOut => ExitCode::from(2),
    })
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { script, timeout } => run_script(config, &script, timeout),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
