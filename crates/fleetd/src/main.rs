//! fleetd — the fleetscale daemon.
//!
//! Assembles the reconciler and its surfaces:
//! - Remote compute API client (HTTP, or the in-memory fake when simulating)
//! - Reconciliation manager with its refresh poll loop
//! - Credential rotation
//! - API call metrics (Prometheus, optional telemetry push)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetscale/fleetscale.toml --port 8470
//! fleetd simulate --seed cluster.json
//! fleetd template --config fleetscale.toml --group asg-1
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::daemon::{Backend, DaemonOptions};

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetscale autoscaling reconciler", version)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile against the remote compute API and serve the REST API.
    Run {
        /// Path to fleetscale.toml.
        #[arg(long)]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8470")]
        port: u16,

        /// How often the refresh loop wakes up, in seconds. The registry
        /// itself refreshes at most once per configured refresh interval.
        #[arg(long, default_value = "10")]
        poll_interval: u64,
    },

    /// Run the same stack against an in-memory cluster seeded from JSON.
    Simulate {
        /// JSON file with `enabled`, `groups` and `nodes`.
        #[arg(long)]
        seed: PathBuf,

        /// Optional fleetscale.toml; a built-in simulation config is used otherwise.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "8470")]
        port: u16,

        #[arg(long, default_value = "10")]
        poll_interval: u64,
    },

    /// Print the template node of a group as JSON and exit.
    Template {
        #[arg(long)]
        config: PathBuf,

        /// Group id.
        #[arg(long)]
        group: String,

        /// Read groups from a seed file instead of the remote API.
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Command::Run {
            config,
            port,
            poll_interval,
        } => {
            let config = daemon::load_config(Some(&config))?;
            daemon::run(DaemonOptions {
                config,
                backend: Backend::Remote,
                port,
                poll_interval,
            })
            .await
        }
        Command::Simulate {
            seed,
            config,
            port,
            poll_interval,
        } => {
            let config = daemon::load_config(config.as_deref())?;
            let seed = daemon::load_seed(&seed)?;
            daemon::run(DaemonOptions {
                config,
                backend: Backend::Simulated(seed),
                port,
                poll_interval,
            })
            .await
        }
        Command::Template {
            config,
            group,
            seed,
        } => {
            let config = daemon::load_config(Some(&config))?;
            let backend = match seed {
                Some(path) => Backend::Simulated(daemon::load_seed(&path)?),
                None => Backend::Remote,
            };
            let template = daemon::template(&config, backend, &group).await?;
            println!("{template}");
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "fleetd failed");
    }
    result
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetscale=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
