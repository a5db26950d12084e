use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use dock_line::{
    cli, config::Config, error::Error, logging, serial::port::NativeSerial,
    supervisor::Supervisor,
};

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, Level};

fn bail(error: Error) -> ! {
    error!("Fatal: {error}");
    logging::shutdown();
    std::process::exit(error.exit_code());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(
        Level::INFO,
        cli.log_dir.clone().map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    let config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)
    } else {
        debug!("Default config");
        Ok(Config::default())
    };

    let config = match config.and_then(|config| config.merge_cli(&cli)) {
        Ok(config) => config,
        Err(error) => bail(error),
    };

    info!(
        "Forwarding {} device(s) to {}:{}",
        config.devices.len(),
        config.dockserver.host,
        config.dockserver.port
    );

    let supervisor = match Supervisor::new(config, Arc::new(NativeSerial::default())) {
        Ok(supervisor) => supervisor,
        Err(error) => bail(error),
    };

    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup.recv() => {
            info!("Told to hang up, quitting")
        }
        result = supervisor.run() => match result {
            Ok(()) => {
                error!("Forwarder returned");
                return Err(color_eyre::eyre::eyre!("Forwarder stopped unexpectedly"));
            }
            Err(error) => bail(error),
        }
    }

    logging::shutdown();

    Ok(())
}
