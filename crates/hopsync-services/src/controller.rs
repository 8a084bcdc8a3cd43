//! Controller: the one object the outside world talks to.
//!
//! Owns the registry, the controller state, the membership coordinator, the
//! probe engine and the responder, and exposes what the operator surface
//! needs: start, stop, clean up, lookups, counts, notifications, probes.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use hopsync_core::config::{ConfigError, ToggleState};

use crate::engine::{ProbeEngine, ProbeSettings};
use crate::membership::{MembershipChange, MembershipCoordinator};
use crate::peer::Peer;
use crate::platform::{ConnectivityInfo, DeviceInfo, PlatformError};
use crate::responder::{Responder, ResponderError};
use crate::routes::RouteAdmin;
use crate::state::{GroupRole, MeshContext};
use crate::transport::RequestTransport;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Toggle(#[from] ConfigError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub own_addr: Option<IpAddr>,
    pub owner_addr: Option<IpAddr>,
    pub role: GroupRole,
    pub local_prefix_registered: bool,
    pub peers: usize,
    pub members: usize,
    pub capacity: usize,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Controller {
    ctx: MeshContext,
    membership: MembershipCoordinator,
    engine: ProbeEngine,
    responder: Responder,
    routes: RouteAdmin,
    running: Mutex<Option<Running>>,
    toggle_path: Option<PathBuf>,
}

impl Controller {
    pub fn new(
        ctx: MeshContext,
        transport: Arc<dyn RequestTransport>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            membership: MembershipCoordinator::new(ctx.clone()),
            engine: ProbeEngine::new(ctx.clone(), transport, settings),
            responder: Responder::new(ctx.clone()),
            routes: RouteAdmin::new(ctx.gateway.clone()),
            running: Mutex::new(None),
            toggle_path: None,
            ctx,
        }
    }

    /// Persist the on/off toggle at `path` whenever it changes.
    pub fn with_toggle_path(mut self, path: PathBuf) -> Self {
        self.toggle_path = Some(path);
        self
    }

    pub fn routes(&self) -> &RouteAdmin {
        &self.routes
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start discovery and the probe engine. Starting twice is a no-op.
    ///
    /// The engine runs even if discovery fails to start.
    pub async fn start(&self) -> Result<(), PlatformError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(self.engine.clone().run(rx));
        *running = Some(Running { shutdown, task });
        drop(running);

        tracing::info!("controller started");
        self.membership.start().await
    }

    /// Stop the probe timer and discovery. Returns once in-flight probes
    /// have completed; a concurrent `start` waits for that.
    pub async fn stop(&self) {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "probe engine task failed");
        }
        drop(guard);
        if let Err(e) = self.membership.stop().await {
            tracing::warn!(error = %e, "failed to stop discovery");
        }
        tracing::info!("controller stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Full reset: stop, withdraw everything this device set up, forget the group.
    pub async fn clean_up(&self) {
        self.stop().await;
        let local_prefix = {
            let mut state = self.ctx.state.lock().await;
            let prefix = state.local_prefix.take();
            state.reset();
            prefix
        };
        if let Some(prefix) = local_prefix {
            self.ctx.unregister_local_prefix(prefix).await;
        }
        for peer in self.ctx.registry.clear().await {
            self.ctx.release_endpoint(&peer).await;
        }
        tracing::info!("controller state cleaned up");
    }

    /// Flip the persisted toggle and start or stop accordingly.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), ControllerError> {
        if let Some(path) = &self.toggle_path {
            ToggleState { enabled }.store(path)?;
        }
        if enabled {
            self.start().await?;
        } else {
            self.stop().await;
        }
        Ok(())
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    pub async fn peer_by_network_addr(&self, addr: &IpAddr) -> Option<Peer> {
        self.ctx.registry.lookup_by_network_addr(addr).await
    }

    pub async fn peer_by_link_addr(&self, link_addr: &str) -> Option<Peer> {
        self.ctx.registry.lookup_by_link_addr(link_addr).await
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.ctx.registry.all().await
    }

    pub async fn peer_count(&self) -> usize {
        self.ctx.registry.len().await
    }

    pub async fn member_count(&self) -> usize {
        self.ctx.registry.member_count().await
    }

    /// Network addresses of every peer we are in contact with.
    pub async fn logged_addrs(&self) -> Vec<IpAddr> {
        self.ctx.registry.network_addrs().await
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.ctx.state.lock().await.clone();
        ControllerStatus {
            running: self.is_running().await,
            own_addr: state.own_addr,
            owner_addr: state.owner_addr,
            role: state.role,
            local_prefix_registered: state.local_prefix_registered(),
            peers: self.ctx.registry.len().await,
            members: self.ctx.registry.member_count().await,
            capacity: self.ctx.registry.capacity().await,
        }
    }

    // ── Notifications and probes ──────────────────────────────────────────────

    pub async fn on_peers_changed(&self, devices: Vec<DeviceInfo>) -> MembershipChange {
        self.membership.on_peers_changed(devices).await
    }

    pub async fn on_connectivity_changed(&self, info: ConnectivityInfo) {
        self.membership.on_connectivity_changed(info).await
    }

    pub async fn on_connect_failed(&self, link_addr: &str) -> Option<Peer> {
        self.membership.on_connect_failed(link_addr).await
    }

    /// Answer an incoming probe with the encoded advertisement.
    pub async fn respond(&self, name: &str) -> Result<String, ResponderError> {
        self.responder.respond_encoded(name).await
    }
}
