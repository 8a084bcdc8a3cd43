//! hopsyncd — mesh prefix-sync daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use hopsync_core::config::{HopsyncConfig, ToggleState};
use hopsync_services::{
    Controller, ControllerState, Forwarder, Gateway, MemoryForwarder, MeshContext, PeerRegistry,
    ProbeSettings, TransportKind,
};

mod ifaddrs;
mod ndnpeek;
mod nfdc;
mod wpa_cli;

use ifaddrs::IfAddrsResolver;
use ndnpeek::NdnpeekTransport;
use nfdc::NfdcForwarder;
use wpa_cli::WpaCliPlatform;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = HopsyncConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = HopsyncConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HopsyncConfig::default()
    });
    tracing::info!(
        interface_prefix = %config.network.interface_prefix,
        backend = %config.forwarder.backend,
        "hopsyncd starting"
    );

    config.validate()?;

    let transport: TransportKind = config
        .network
        .transport
        .parse()
        .context("invalid network.transport")?;

    let forwarder: Arc<dyn Forwarder> = match config.forwarder.backend.as_str() {
        "nfdc" => Arc::new(NfdcForwarder::new(config.forwarder.nfdc_path.clone())),
        "memory" => Arc::new(MemoryForwarder::new()),
        other => anyhow::bail!("unknown forwarder backend '{}'", other),
    };

    // Shared state
    let ctx = MeshContext {
        registry: PeerRegistry::new(config.peers.capacity),
        gateway: Gateway::new(forwarder),
        state: ControllerState::shared(),
        platform: Arc::new(WpaCliPlatform::new(
            config.platform.wpa_cli_path.clone(),
            config.platform.interface.clone(),
        )),
        resolver: Arc::new(IfAddrsResolver::new(config.network.interface_prefix.clone())),
        transport,
        local_endpoint: config.forwarder.local_endpoint,
    };

    let state_path = HopsyncConfig::state_path();
    let controller = Arc::new(
        Controller::new(
            ctx,
            Arc::new(NdnpeekTransport::new(config.transport.ndnpeek_path.clone())),
            ProbeSettings::default(),
        )
        .with_toggle_path(state_path.clone()),
    );

    let toggle = ToggleState::load(&state_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load toggle state, starting disabled");
        ToggleState::default()
    });
    if toggle.enabled {
        if let Err(e) = controller.start().await {
            tracing::warn!(error = %e, "discovery failed to start");
        }
    } else {
        tracing::info!("disabled; enable through /api/enable");
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let api_task = {
        let state = hopsync_api::ApiState {
            controller: controller.clone(),
            transport,
        };
        let port = config.network.api_port;
        tokio::spawn(async move {
            if let Err(e) = hopsync_api::serve(state, port).await {
                tracing::error!(error = %e, "api server failed");
            }
        })
    };

    let peer_printer = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let peers = controller.peers().await;
                tracing::info!(count = peers.len(), "peer table snapshot");
                for p in peers {
                    tracing::info!(
                        link = p.link_addr.as_deref().unwrap_or("-"),
                        addr = ?p.network_addr,
                        endpoint = ?p.endpoint,
                        timeouts = p.probe_timeouts,
                        "  peer"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = api_task           => tracing::error!("api task exited: {:?}", r),
        r = peer_printer       => tracing::error!("peer printer exited: {:?}", r),
    }

    controller.stop().await;
    Ok(())
}
