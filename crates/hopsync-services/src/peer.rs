//! Peer registry: who is in the group and how each peer is doing.
//!
//! The registry is the sole owner of peer records. Records sit under an
//! internal slot index and are reachable through two keys: the link-layer
//! address (membership) and the network address (protocol). Nothing outside
//! holds a record; callers keep an address and re-resolve, so a completion
//! that arrives after eviction is a plain lookup miss.
//!
//! Every operation takes the single registry lock, so no caller ever sees a
//! half-built record.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use hopsync_core::wire::EndpointId;

/// Link-layer (MAC) address of a group member, e.g. "02:1a:11:f0:3c:4d".
pub type LinkAddr = String;

/// A directly connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    /// Set at admission; `None` for peers known only by network address
    /// (the group owner seen from a client, or a client that probed us).
    pub link_addr: Option<LinkAddr>,
    /// Assigned once the group connection gives the peer an address.
    pub network_addr: Option<IpAddr>,
    /// Human-readable device name.
    pub name: String,
    /// Forwarder endpoint toward the peer. Only ever set alongside
    /// `network_addr`.
    pub endpoint: Option<EndpointId>,
    /// Consecutive probe timeouts since the last response.
    pub probe_timeouts: u32,
}

impl Peer {
    fn member(link_addr: LinkAddr, name: String) -> Self {
        Self {
            link_addr: Some(link_addr),
            network_addr: None,
            name,
            endpoint: None,
            probe_timeouts: 0,
        }
    }

    fn remote(network_addr: IpAddr, name: String) -> Self {
        Self {
            link_addr: None,
            network_addr: Some(network_addr),
            name,
            endpoint: None,
            probe_timeouts: 0,
        }
    }
}

/// Result of counting one probe timeout against a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// No peer with that address is tracked.
    Untracked,
    /// Counter incremented to the contained value; peer kept.
    Counted(u32),
    /// Threshold reached; the peer was removed and is returned.
    Evicted(Peer),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("peer {0} is already admitted")]
    AlreadyAdmitted(LinkAddr),
    #[error("peer capacity of {0} reached")]
    CapacityExceeded(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no peer tracked for {0}")]
    UnknownPeer(String),
    #[error("address {0} already belongs to another member")]
    AddressInUse(IpAddr),
}

/// Result of [`PeerRegistry::bind_network_addr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub peer: Peer,
    /// Endpoint toward the member's previous address, no longer referenced
    /// by any record.
    pub stale_endpoint: Option<EndpointId>,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Shared by the membership coordinator, the probe engine, the responder
/// and the API.
#[derive(Clone)]
pub struct PeerRegistry {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    capacity: usize,
    next_slot: u64,
    records: HashMap<u64, Peer>,
    by_link: HashMap<LinkAddr, u64>,
    by_net: HashMap<IpAddr, u64>,
}

impl Inner {
    fn insert(&mut self, peer: Peer) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        if let Some(link) = &peer.link_addr {
            self.by_link.insert(link.clone(), slot);
        }
        if let Some(addr) = peer.network_addr {
            self.by_net.insert(addr, slot);
        }
        self.records.insert(slot, peer);
        slot
    }

    fn take(&mut self, slot: u64) -> Option<Peer> {
        let peer = self.records.remove(&slot)?;
        if let Some(link) = &peer.link_addr {
            self.by_link.remove(link);
        }
        if let Some(addr) = &peer.network_addr {
            self.by_net.remove(addr);
        }
        Some(peer)
    }

    fn by_net_mut(&mut self, addr: &IpAddr) -> Option<&mut Peer> {
        let slot = self.by_net.get(addr)?;
        self.records.get_mut(slot)
    }
}

impl PeerRegistry {
    /// Create an empty registry admitting at most `capacity` group members.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                next_slot: 0,
                records: HashMap::new(),
                by_link: HashMap::new(),
                by_net: HashMap::new(),
            })),
        }
    }

    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.capacity
    }

    /// Admit a group member, first come first served up to capacity.
    pub async fn admit(&self, link_addr: &str, name: &str) -> Result<Peer, AdmitError> {
        let mut inner = self.inner.lock().await;
        if inner.by_link.contains_key(link_addr) {
            return Err(AdmitError::AlreadyAdmitted(link_addr.to_string()));
        }
        if inner.by_link.len() >= inner.capacity {
            return Err(AdmitError::CapacityExceeded(inner.capacity));
        }
        let peer = Peer::member(link_addr.to_string(), name.to_string());
        inner.insert(peer.clone());
        Ok(peer)
    }

    /// Get or create the record for a peer known by network address.
    ///
    /// Such records do not count against the admission capacity.
    pub async fn track(&self, network_addr: IpAddr, name: &str) -> Peer {
        let mut inner = self.inner.lock().await;
        if let Some(peer) = inner.by_net_mut(&network_addr) {
            return peer.clone();
        }
        let peer = Peer::remote(network_addr, name.to_string());
        inner.insert(peer.clone());
        peer
    }

    /// Attach a network address to an admitted member.
    ///
    /// A record previously tracked only by that address is folded into the
    /// member, keeping its endpoint and counter. An endpoint built for the
    /// member's old address comes back as `stale_endpoint`; the caller owns
    /// destroying it.
    pub async fn bind_network_addr(
        &self,
        link_addr: &str,
        network_addr: IpAddr,
    ) -> Result<Binding, RegistryError> {
        let mut inner = self.inner.lock().await;
        let slot = *inner
            .by_link
            .get(link_addr)
            .ok_or_else(|| RegistryError::UnknownPeer(link_addr.to_string()))?;

        let mut folded = None;
        if let Some(&other) = inner.by_net.get(&network_addr) {
            if other != slot {
                let other_is_member = inner
                    .records
                    .get(&other)
                    .map(|p| p.link_addr.is_some())
                    .unwrap_or(false);
                if other_is_member {
                    return Err(RegistryError::AddressInUse(network_addr));
                }
                folded = inner.take(other);
            }
        }

        let previous = inner.records.get(&slot).and_then(|p| p.network_addr);
        if let Some(prev) = previous {
            if prev != network_addr {
                inner.by_net.remove(&prev);
            }
        }
        inner.by_net.insert(network_addr, slot);

        let peer = inner
            .records
            .get_mut(&slot)
            .ok_or_else(|| RegistryError::UnknownPeer(link_addr.to_string()))?;
        let stale_endpoint = if previous != Some(network_addr) {
            // A new address invalidates an endpoint built for the old one.
            peer.endpoint.take()
        } else {
            None
        };
        peer.network_addr = Some(network_addr);
        if let Some(folded) = folded {
            peer.endpoint = folded.endpoint;
            peer.probe_timeouts = folded.probe_timeouts;
        }
        Ok(Binding {
            peer: peer.clone(),
            stale_endpoint,
        })
    }

    /// Record the forwarder endpoint toward the peer at `network_addr`.
    ///
    /// Keyed by network address, so an endpoint can never sit on a record
    /// without one. Returns the endpoint it replaced, if any.
    pub async fn attach_endpoint(
        &self,
        network_addr: IpAddr,
        endpoint: EndpointId,
    ) -> Result<Option<EndpointId>, RegistryError> {
        let mut inner = self.inner.lock().await;
        let peer = inner
            .by_net_mut(&network_addr)
            .ok_or_else(|| RegistryError::UnknownPeer(network_addr.to_string()))?;
        Ok(peer.endpoint.replace(endpoint))
    }

    pub async fn lookup_by_network_addr(&self, network_addr: &IpAddr) -> Option<Peer> {
        let inner = self.inner.lock().await;
        let slot = inner.by_net.get(network_addr)?;
        inner.records.get(slot).cloned()
    }

    pub async fn lookup_by_link_addr(&self, link_addr: &str) -> Option<Peer> {
        let inner = self.inner.lock().await;
        let slot = inner.by_link.get(link_addr)?;
        inner.records.get(slot).cloned()
    }

    /// Endpoint toward the peer at `network_addr`, if one exists.
    pub async fn endpoint_for(&self, network_addr: &IpAddr) -> Option<EndpointId> {
        self.lookup_by_network_addr(network_addr)
            .await
            .and_then(|p| p.endpoint)
    }

    /// Remove a member by link-layer address.
    pub async fn remove(&self, link_addr: &str) -> Option<Peer> {
        let mut inner = self.inner.lock().await;
        let slot = *inner.by_link.get(link_addr)?;
        inner.take(slot)
    }

    /// Remove whichever record owns `network_addr`.
    pub async fn remove_by_network_addr(&self, network_addr: &IpAddr) -> Option<Peer> {
        let mut inner = self.inner.lock().await;
        let slot = *inner.by_net.get(network_addr)?;
        inner.take(slot)
    }

    /// Count one probe timeout; evict once `threshold` is reached.
    pub async fn record_timeout(&self, network_addr: &IpAddr, threshold: u32) -> TimeoutOutcome {
        let mut inner = self.inner.lock().await;
        let Some(&slot) = inner.by_net.get(network_addr) else {
            return TimeoutOutcome::Untracked;
        };
        let Some(peer) = inner.records.get_mut(&slot) else {
            return TimeoutOutcome::Untracked;
        };

        let count = peer.probe_timeouts + 1;
        if count >= threshold {
            match inner.take(slot) {
                Some(mut evicted) => {
                    evicted.probe_timeouts = count;
                    TimeoutOutcome::Evicted(evicted)
                }
                None => TimeoutOutcome::Untracked,
            }
        } else {
            peer.probe_timeouts = count;
            TimeoutOutcome::Counted(count)
        }
    }

    /// Reset the timeout counter after a response. Returns false if untracked.
    pub async fn reset_timeouts(&self, network_addr: &IpAddr) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.by_net_mut(network_addr) {
            Some(peer) => {
                peer.probe_timeouts = 0;
                true
            }
            None => false,
        }
    }

    /// Consistent snapshot of every record.
    pub async fn all(&self) -> Vec<Peer> {
        let inner = self.inner.lock().await;
        let mut peers: Vec<Peer> = inner.records.values().cloned().collect();
        peers.sort_by(|a, b| {
            (a.network_addr, &a.link_addr).cmp(&(b.network_addr, &b.link_addr))
        });
        peers
    }

    /// Link-layer addresses of admitted members.
    pub async fn member_link_addrs(&self) -> BTreeSet<LinkAddr> {
        self.inner.lock().await.by_link.keys().cloned().collect()
    }

    /// Network addresses of every tracked peer.
    pub async fn network_addrs(&self) -> Vec<IpAddr> {
        let mut addrs: Vec<IpAddr> = self.inner.lock().await.by_net.keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// Every endpoint that leads to a tracked peer.
    pub async fn endpoints(&self) -> BTreeSet<EndpointId> {
        self.inner
            .lock()
            .await
            .records
            .values()
            .filter_map(|p| p.endpoint)
            .collect()
    }

    /// Total number of records.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of admitted members.
    pub async fn member_count(&self) -> usize {
        self.inner.lock().await.by_link.len()
    }

    /// Drop every record. Returns what was removed.
    pub async fn clear(&self) -> Vec<Peer> {
        let mut inner = self.inner.lock().await;
        inner.by_link.clear();
        inner.by_net.clear();
        inner.records.drain().map(|(_, p)| p).collect()
    }
}
