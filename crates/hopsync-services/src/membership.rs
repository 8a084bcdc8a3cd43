//! Group membership coordinator.
//!
//! Consumes the platform's membership and connectivity notifications. Keeps
//! the admitted set in line with the latest membership refresh, asks the
//! platform to connect to each newly admitted device, and on group
//! formation makes this device probeable (own discovery prefix) and, as a
//! client, makes the owner probeable from here (endpoint plus discovery
//! route toward it).
//!
//! Disconnection is not handled here. The probe engine notices the lost
//! address on its next cycle.

use std::collections::BTreeSet;

use serde::Serialize;

use hopsync_core::wire::discovery_prefix;

use crate::gateway::RouteOptions;
use crate::peer::{AdmitError, LinkAddr, Peer};
use crate::platform::{ConnectivityInfo, DeviceInfo, PlatformError};
use crate::state::{GroupRole, MeshContext};

/// What one membership refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub admitted: Vec<LinkAddr>,
    pub removed: Vec<LinkAddr>,
    /// Reported devices turned away because the admitted set is full.
    pub refused: Vec<LinkAddr>,
}

#[derive(Clone)]
pub struct MembershipCoordinator {
    ctx: MeshContext,
}

impl MembershipCoordinator {
    pub fn new(ctx: MeshContext) -> Self {
        Self { ctx }
    }

    pub async fn start(&self) -> Result<(), PlatformError> {
        self.ctx.platform.start_discovery().await?;
        tracing::info!("discovery started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), PlatformError> {
        self.ctx.platform.stop_discovery().await?;
        tracing::info!("discovery stopped");
        Ok(())
    }

    // ── Membership ────────────────────────────────────────────────────────────

    /// Apply a membership refresh listing every device currently reported.
    ///
    /// New devices are admitted in report order; the first report of a
    /// link address wins over later duplicates.
    pub async fn on_peers_changed(&self, devices: Vec<DeviceInfo>) -> MembershipChange {
        let mut seen: BTreeSet<LinkAddr> = BTreeSet::new();
        let reported: Vec<DeviceInfo> = devices
            .into_iter()
            .filter(|d| seen.insert(d.link_addr.clone()))
            .collect();
        let current = self.ctx.registry.member_link_addrs().await;
        let mut change = MembershipChange::default();

        for link in current.iter().filter(|l| !seen.contains(*l)) {
            if let Some(peer) = self.ctx.registry.remove(link).await {
                tracing::info!(peer = %link, "device left, removed");
                self.ctx.release_endpoint(&peer).await;
                change.removed.push(link.clone());
            }
        }

        for device in &reported {
            let link = &device.link_addr;
            if current.contains(link) {
                self.bind_address(device).await;
                continue;
            }
            match self.ctx.registry.admit(link, &device.name).await {
                Ok(_) => {
                    tracing::info!(peer = %link, name = %device.name, "device admitted");
                    self.bind_address(device).await;
                    if self.connect(link).await {
                        change.admitted.push(link.clone());
                    }
                }
                Err(AdmitError::CapacityExceeded(capacity)) => {
                    tracing::debug!(peer = %link, capacity, "admitted set full, device refused");
                    change.refused.push(link.clone());
                }
                Err(AdmitError::AlreadyAdmitted(_)) => {}
            }
        }
        change
    }

    async fn bind_address(&self, device: &DeviceInfo) {
        let Some(addr) = device.network_addr else {
            return;
        };
        match self.ctx.registry.bind_network_addr(&device.link_addr, addr).await {
            Ok(binding) => {
                if let Some(stale) = binding.stale_endpoint {
                    tracing::info!(
                        peer = %device.link_addr,
                        %addr,
                        endpoint = stale,
                        "address changed, dropping old endpoint"
                    );
                    self.ctx.destroy_endpoint(stale, None).await;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %device.link_addr, %addr, error = %e, "cannot bind address");
            }
        }
    }

    /// Ask the platform to connect; a refused attempt drops the peer.
    async fn connect(&self, link: &str) -> bool {
        match self.ctx.platform.connect(link).await {
            Ok(()) => {
                tracing::debug!(peer = %link, "connection requested");
                true
            }
            Err(e) => {
                tracing::warn!(peer = %link, error = %e, "connection attempt failed");
                self.drop_peer(link).await;
                false
            }
        }
    }

    /// The platform reported that connecting to `link` failed.
    pub async fn on_connect_failed(&self, link: &str) -> Option<Peer> {
        tracing::info!(peer = %link, "connection failed");
        self.drop_peer(link).await
    }

    async fn drop_peer(&self, link: &str) -> Option<Peer> {
        let peer = self.ctx.registry.remove(link).await?;
        self.ctx.release_endpoint(&peer).await;
        Some(peer)
    }

    // ── Connectivity ──────────────────────────────────────────────────────────

    pub async fn on_connectivity_changed(&self, info: ConnectivityInfo) {
        if !info.group_formed {
            tracing::debug!("connectivity changed without a formed group, ignoring");
            return;
        }
        let Some(own) = self.ctx.resolver.local_address() else {
            tracing::warn!("group formed but no local address yet");
            return;
        };
        tracing::info!(addr = %own, owner = info.is_owner, "group formed");

        let needs_local_prefix = {
            let mut state = self.ctx.state.lock().await;
            state.own_addr = Some(own);
            if info.is_owner {
                state.role = GroupRole::Owner;
                state.owner_addr = None;
            } else {
                state.role = GroupRole::Client;
                state.owner_addr = info.owner_addr;
            }
            !state.local_prefix_registered()
        };

        if needs_local_prefix {
            let prefix = discovery_prefix(&own);
            if self.ctx.register_local_prefix(prefix.clone()).await {
                self.ctx.state.lock().await.local_prefix = Some(prefix);
            }
        } else {
            tracing::debug!("own discovery prefix already registered");
        }

        if info.is_owner {
            tracing::info!("acting as group owner, waiting for probes");
            return;
        }
        match info.owner_addr {
            Some(owner) => self.reach_owner(owner).await,
            None => tracing::warn!("client without a group owner address"),
        }
    }

    /// Create an endpoint toward the owner and route its discovery prefix
    /// over it, so the probe engine finds the owner.
    async fn reach_owner(&self, owner: std::net::IpAddr) {
        if self.ctx.registry.endpoint_for(&owner).await.is_some() {
            tracing::debug!(%owner, "endpoint toward owner exists");
            return;
        }

        let kind = self.ctx.transport;
        let endpoint = match self
            .ctx
            .gateway
            .run(move |gw| gw.create_endpoint(owner, kind))
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(%owner, error = %e, "cannot create endpoint toward owner");
                return;
            }
        };

        self.ctx.registry.track(owner, "group owner").await;
        if let Err(e) = self.ctx.registry.attach_endpoint(owner, endpoint).await {
            tracing::warn!(%owner, error = %e, "cannot record owner endpoint");
            return;
        }

        let prefix = discovery_prefix(&owner);
        let name = prefix.clone();
        match self
            .ctx
            .gateway
            .run(move |gw| gw.register_prefix(endpoint, &name, RouteOptions::PEER))
            .await
        {
            Ok(()) => tracing::info!(%owner, endpoint, prefix = %prefix, "owner reachable"),
            Err(e) => tracing::warn!(%owner, error = %e, "cannot register owner discovery prefix"),
        }
    }
}
