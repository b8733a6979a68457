use std::{error::Error, process::exit};

use config::EngineConfig;
use controller::main_controller;
use kube::Client;
use log::{error, info, warn};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
};

mod config;
mod controller;
mod dispatcher;
mod engine;
mod error;
mod queue;
mod subscription;

#[tokio::main()]
async fn main() -> Result<(), Box<dyn Error>> {
    configure_logger();

    let config = get_config();
    let client = create_client().await;
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutting down...");
        stop_tx.send_replace(true);
    });

    if let Err(err) = main_controller(client, config, stop_rx).await {
        error!("Controller failed! {err}");
        exit(8)
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => (),
                _ = terminate.recv() => (),
            }
        }
        Err(err) => {
            warn!("Couldn't listen for SIGTERM! {err:?}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

fn get_config() -> EngineConfig {
    match EngineConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("Couldn't read configuration! {error:?}");
            exit(7)
        }
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
