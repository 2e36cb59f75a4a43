use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use webpage_screenshot::{setup_logging, Cli, CliRunner, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    info!("Starting webpage-screenshot v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await?;

    // Ctrl-C / SIGTERM cancel the running capture; its browser is still torn down
    let shutdown = CancellationToken::new();
    let _shutdown_handler = setup_shutdown_handler(shutdown.clone());

    let cli_runner = CliRunner::new(config, shutdown);

    if let Err(e) = cli_runner.run(args.command).await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("webpage-screenshot stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        // Load from file
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        // Use default configuration
        Config::default()
    };

    // Override with CLI arguments
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = chrome_path.clone();
    }

    if let Some(deadline) = args.deadline {
        config.deadline = Duration::from_secs(deadline);
    }

    info!("Configuration loaded successfully");
    info!("Chrome executable: {}", config.chrome_path.display());
    info!("Capture deadline: {:?}", config.deadline);

    Ok(config)
}

fn setup_shutdown_handler(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let (mut sigint, mut sigterm) = match (
                signal::unix::signal(signal::unix::SignalKind::interrupt()),
                signal::unix::signal(signal::unix::SignalKind::terminate()),
            ) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            info!("Received Ctrl-C");
        }

        shutdown.cancel();
    })
}
