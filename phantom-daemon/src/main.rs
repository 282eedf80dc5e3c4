use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use phantom_daemon::{Config, Environment, SharedModel, SimController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "phantomd=info,phantom_daemon=info,phantom_sched=info,\
                 phantom_net=info,phantom_control=info",
            )
        }))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::default(),
    };

    let model: SharedModel = Arc::new(Mutex::new(SimController::new()));
    let (mut environment, waiter) = Environment::new(config, model);
    environment
        .initialize()
        .await
        .context("initializing environment")?;

    info!(
        "phantomd ready: control {:?}, command {:?}, link {:?}, low-energy {:?}",
        environment.control_addr(),
        environment.command_addr(),
        environment.link_addr(),
        environment.low_energy_addr(),
    );

    waiter.wait().await;
    info!("termination requested, exiting");
    environment.close();
    Ok(())
}
