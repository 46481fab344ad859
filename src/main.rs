use anyhow::Context;
use clap::Parser;
use screenshot_share::{
    apply_cli_overrides, apply_env_overrides, install_prometheus_recorder, read_config_file, setup_logging,
    validate_config_file, Cli, CliRunner, Commands, Config,
};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting screenshot-share v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Validate = args.command {
        let path = args.config.as_deref().context("validate requires --config <file>")?;
        return validate_config_file(path).await;
    }

    // Handles created after this point report to the exporter
    let prometheus = if args.metrics {
        Some(install_prometheus_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let config = load_config(&args).await?;
    let json = args.json;
    let cli_runner = CliRunner::new(config, json).await?;

    let result = tokio::select! {
        result = cli_runner.run(args.command) => result,
        signal_name = shutdown_signal() => {
            info!("Received {}, cancelling in-flight captures", signal_name);
            Err(anyhow::anyhow!("interrupted by {signal_name}"))
        }
    };

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("screenshot-share stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path).await?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    apply_cli_overrides(&mut config, args);

    config.validate().context("invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("Max concurrent sessions: {}", config.max_concurrent_sessions);
    info!("Navigation timeout: {:?}", config.navigation_timeout);
    info!("Storage root: {}", config.storage_root.display());

    Ok(config)
}

/// Resolves with the name of the first termination signal received.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        _ => {
            error!("Failed to install signal handlers, falling back to Ctrl-C");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl-C"
}
