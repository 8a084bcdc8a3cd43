//! Process-wide controller state.
//!
//! One instance per controller, shared by the membership coordinator, the
//! probe engine and the responder. Replaces global statics with an explicit
//! context object and an explicit [`ControllerState::reset`].

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use hopsync_core::wire::EndpointId;

use crate::gateway::{Gateway, RouteOptions, TransportKind};
use crate::peer::{Peer, PeerRegistry};
use crate::platform::{AddressResolver, GroupPlatform};

/// Shared controller state.
pub type SharedState = Arc<Mutex<ControllerState>>;

/// This device's role in the current group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    #[default]
    Unset,
    Owner,
    Client,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerState {
    /// This device's address in the group; `None` outside a group.
    pub own_addr: Option<IpAddr>,
    /// The group owner's address; `None` when we are the owner or not grouped.
    pub owner_addr: Option<IpAddr>,
    pub role: GroupRole,
    /// The own discovery prefix, once registered.
    pub local_prefix: Option<String>,
}

impl ControllerState {
    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn local_prefix_registered(&self) -> bool {
        self.local_prefix.is_some()
    }

    /// Forget everything learned about the current group.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── Shared context ────────────────────────────────────────────────────────────

/// Everything the coordinator, the probe engine and the responder share.
#[derive(Clone)]
pub struct MeshContext {
    pub registry: PeerRegistry,
    pub gateway: Gateway,
    pub state: SharedState,
    pub platform: Arc<dyn GroupPlatform>,
    pub resolver: Arc<dyn AddressResolver>,
    /// Transport kind for endpoints toward peers.
    pub transport: TransportKind,
    /// Endpoint the own discovery prefix is registered toward.
    pub local_endpoint: EndpointId,
}

impl MeshContext {
    /// Register the own discovery prefix toward the local endpoint.
    pub async fn register_local_prefix(&self, prefix: String) -> bool {
        let endpoint = self.local_endpoint;
        let name = prefix.clone();
        match self
            .gateway
            .run(move |gw| gw.register_prefix(endpoint, &name, RouteOptions::PEER))
            .await
        {
            Ok(()) => {
                tracing::info!(prefix = %prefix, "own discovery prefix registered");
                true
            }
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "failed to register own discovery prefix");
                false
            }
        }
    }

    /// Withdraw the own discovery prefix. Best effort.
    pub async fn unregister_local_prefix(&self, prefix: String) {
        let endpoint = self.local_endpoint;
        let name = prefix.clone();
        if let Err(e) = self
            .gateway
            .run(move |gw| gw.unregister_prefix(endpoint, &name))
            .await
        {
            tracing::warn!(prefix = %prefix, error = %e, "failed to unregister own discovery prefix");
        }
    }

    /// Destroy the endpoint toward a departed peer, if it had one. Best effort.
    pub async fn release_endpoint(&self, peer: &Peer) {
        if let Some(endpoint) = peer.endpoint {
            self.destroy_endpoint(endpoint, peer.network_addr).await;
        }
    }

    /// Destroy `endpoint`, built toward `toward`. Best effort.
    pub async fn destroy_endpoint(&self, endpoint: EndpointId, toward: Option<IpAddr>) {
        if let Err(e) = self.gateway.run(move |gw| gw.destroy_endpoint(endpoint)).await {
            tracing::warn!(
                peer = ?toward,
                endpoint,
                error = %e,
                "failed to destroy endpoint"
            );
        }
    }

    /// Restart platform discovery. Best effort.
    pub async fn resume_discovery(&self) {
        if let Err(e) = self.platform.start_discovery().await {
            tracing::warn!(error = %e, "failed to start discovery");
        }
    }
}
