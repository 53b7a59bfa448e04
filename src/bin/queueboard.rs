//! queueboard – runs the board service or prints its effective config.
//
//  $ queueboard start --config queueboard.toml
//  $ queueboard config
use std::time::Duration;

use clap::{Parser, Subcommand};
use queueboard::api::{rest, AppState};
use queueboard::app::{build_provider, App};
use queueboard::config::DEFAULT_CONFIG_PATH;
use queueboard::{load_config, Config};
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Upper bound on letting pending transitions play out after Ctrl-C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "queueboard", version, about = "Standard vs FIFO queue lifecycle board")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start consumers, lifecycle engine and HTTP server.
    Start {
        /// Path to config TOML (env QUEUEBOARD_CONFIG overrides)
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Print the effective configuration after env overrides.
    Config {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
}

fn resolve_config(path: String) -> anyhow::Result<Config> {
    let cfg_path: String = std::env::var("QUEUEBOARD_CONFIG").unwrap_or(path);
    let mut cfg: Config = if std::path::Path::new(&cfg_path).exists() {
        load_config(&cfg_path)?
    } else {
        Config::default()
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Start { config } => {
            queueboard::logging::init_logging()?;
            let cfg = resolve_config(config)?;
            run(cfg).await?;
        }
        Command::Config { config } => {
            let cfg = resolve_config(config)?;
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }
    Ok(())
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let provider = build_provider(&cfg).await?;
    let app = App::start(&cfg, provider);
    let state = AppState {
        engine: app.engine.clone(),
        producer: app.producer.clone(),
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn({
        let bind_addr = cfg.server.bind_addr.clone();
        async move {
            rest::start_server(state, &bind_addr, async {
                let _ = stop_rx.await;
            })
            .await
        }
    });

    let served = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(target: "queueboard::app", "Ctrl-C received, shutting down");
            // Open event streams keep the server alive; cut them off after a grace period.
            let _ = stop_tx.send(());
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
        joined = &mut server => joined,
    };

    let result = match served {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = &result {
        warn!(target: "queueboard::app", error = %e, "HTTP server stopped with error");
    }

    if tokio::time::timeout(DRAIN_TIMEOUT, app.shutdown()).await.is_err() {
        warn!(target: "queueboard::app", "Pending transitions dropped at shutdown");
    }
    result
}
