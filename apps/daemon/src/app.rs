//! Application orchestrator: wires the bridge, the connection and the host
//! sampler together.

use std::sync::Arc;

use printlink_bridge::{Bridge, Config, MachineEvent};
use printlink_connection::{ConnectionManager, InfoStore};
use printlink_telemetry::ProcSampler;

use crate::host;

/// Runs the bridge until ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // -- Persistence --
    let store = Arc::new(InfoStore::in_dir(&config.data_dir)?);
    tracing::info!(path = %store.path().display(), "printer info loaded");

    // -- Connection + bridge --
    let conn = Arc::new(ConnectionManager::new(config.endpoint_settings(&store)));
    let (bridge, handle) = Bridge::new(Arc::clone(&conn), store, host::standalone());
    let bridge_task = tokio::spawn(bridge.run());

    // -- Host sampler --
    let sampler_handle = handle.clone();
    let sampler = ProcSampler::new(Box::new(move |stats| {
        sampler_handle.try_send(MachineEvent::ProcStats(stats));
    }));
    sampler.start(config.sample_interval_secs).await;

    let connect_task = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            if !conn.start().await {
                tracing::info!("initial connect failed, retrying in the background");
            }
        })
    };

    tracing::info!("printlink ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    // -- Graceful shutdown --
    sampler.stop().await;
    connect_task.abort();
    handle.shutdown().await;
    bridge_task.await?;

    Ok(())
}
