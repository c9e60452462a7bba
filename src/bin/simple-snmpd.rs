//! Daemon wrapper: configuration loading, logging, signal handling.
//!
//! Exit codes: 0 on clean shutdown, 1 for configuration or
//! initialization errors, 2 for runtime failures.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use simple_snmpd::{Agent, AgentConfig};

#[derive(Debug, Parser)]
#[command(name = "simple-snmpd", version, about = "SNMP v1/v2c/v3 agent daemon")]
struct Args {
    /// Configuration file (TOML).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run in the foreground (the default; kept for init compatibility).
    #[arg(short = 'f', long = "foreground")]
    foreground: bool,

    /// Validate the configuration and exit.
    #[arg(short = 't', long = "test-config")]
    test_config: bool,

    /// Raise log verbosity to debug.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<AgentConfig, String> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            toml::from_str(&text).map_err(|e| format!("cannot parse {}: {}", path.display(), e))
        }
        None => Ok(AgentConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("simple-snmpd: {}", error);
            return ExitCode::from(1);
        }
    };

    if let Err(error) = config.validate() {
        eprintln!("simple-snmpd: {}", error);
        return ExitCode::from(1);
    }

    if args.test_config {
        println!("configuration OK");
        return ExitCode::SUCCESS;
    }

    let filter = if args.verbose {
        "debug"
    } else {
        config.log_level.as_filter()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if !args.foreground {
        // Daemonization is delegated to the service manager; the process
        // always runs attached.
        tracing::debug!("running in the foreground; use a service manager to daemonize");
    }

    let cancel = CancellationToken::new();
    let agent = match Agent::builder(config).cancel(cancel.clone()).build().await {
        Ok(agent) => agent,
        Err(error) => {
            tracing::error!(error = %error, "initialization failed");
            return ExitCode::from(1);
        }
    };

    // SIGINT/SIGTERM stop the agent; SIGHUP reloads configuration.
    // SIGPIPE is ignored by default under tokio.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("cannot install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("stop signal received");
            cancel.cancel();
        });
    }

    {
        let agent = agent.clone();
        let config_path = args.config.clone();
        tokio::spawn(async move {
            let mut sighup =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                    .expect("cannot install SIGHUP handler");
            while sighup.recv().await.is_some() {
                tracing::info!("SIGHUP received, reloading configuration");
                match load_config(config_path.as_ref()) {
                    Ok(config) => {
                        if let Err(error) = agent.reload(&config) {
                            tracing::error!(error = %error, "reload failed, keeping previous tables");
                        }
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "reload failed, keeping previous tables");
                    }
                }
            }
        });
    }

    match agent.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "runtime failure");
            ExitCode::from(2)
        }
    }
}
