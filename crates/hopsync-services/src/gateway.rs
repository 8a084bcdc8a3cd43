//! Route registration gateway, the only path to the forwarding daemon.
//!
//! A thin, stateless facade. Every call opens its own management session,
//! uses it, and releases it on every exit path (the guard closes it on
//! drop). No session outlives a call, so callers must expect each call to
//! fail on its own. Nothing here retries.
//!
//! Calls block. Async callers go through [`Gateway::run`], which moves the
//! call onto the blocking pool.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use hopsync_core::wire::{EndpointId, PEER_ROUTE_COST};

/// One forwarding-table entry: a prefix and the endpoints it leads to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FibEntry {
    pub prefix: String,
    pub next_hops: BTreeSet<EndpointId>,
}

/// Per-route registration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOptions {
    pub cost: u64,
    pub child_inherit: bool,
    pub capture: bool,
}

impl RouteOptions {
    /// Options for every prefix learned from a peer: never shadows local routes.
    pub const PEER: RouteOptions = RouteOptions {
        cost: PEER_ROUTE_COST,
        child_inherit: true,
        capture: false,
    };
}

/// Transport kind of an endpoint toward a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp4,
    Tcp4,
    Udp6,
    Tcp6,
}

impl TransportKind {
    fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Udp4 => "udp4",
            TransportKind::Tcp4 => "tcp4",
            TransportKind::Udp6 => "udp6",
            TransportKind::Tcp6 => "tcp6",
        }
    }

    /// Canonical endpoint URI for `addr`, e.g. `udp4://192.168.49.1:6363`.
    pub fn endpoint_uri(&self, addr: &IpAddr) -> Result<String, GatewayError> {
        match (self, addr) {
            (TransportKind::Udp4 | TransportKind::Tcp4, IpAddr::V4(v4)) => {
                Ok(format!("{}://{}:6363", self.scheme(), v4))
            }
            (TransportKind::Udp6 | TransportKind::Tcp6, IpAddr::V6(v6)) => {
                Ok(format!("{}://[{}]:6363", self.scheme(), v6))
            }
            _ => Err(GatewayError::Transport(format!(
                "cannot canonize {} for {}",
                addr,
                self.scheme()
            ))),
        }
    }
}

impl FromStr for TransportKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" | "udp4" => Ok(TransportKind::Udp4),
            "tcp" | "tcp4" => Ok(TransportKind::Tcp4),
            "udp6" => Ok(TransportKind::Udp6),
            "tcp6" => Ok(TransportKind::Tcp6),
            other => Err(GatewayError::Transport(format!(
                "unsupported transport kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("registration of {prefix} failed: {reason}")]
    Registration { prefix: String, reason: String },
    #[error("forwarding table query failed: {0}")]
    Query(String),
    #[error("management session failed: {0}")]
    Session(String),
}

// ── Forwarder seam ────────────────────────────────────────────────────────────

/// One open management session with the forwarding daemon.
pub trait ManagementSession: Send {
    /// Create an endpoint toward `uri`; returns the existing id if one exists.
    fn create_face(&mut self, uri: &str) -> Result<EndpointId, GatewayError>;

    fn destroy_face(&mut self, endpoint: EndpointId) -> Result<(), GatewayError>;

    fn register(
        &mut self,
        prefix: &str,
        endpoint: EndpointId,
        options: RouteOptions,
    ) -> Result<(), GatewayError>;

    fn unregister(&mut self, prefix: &str, endpoint: EndpointId) -> Result<(), GatewayError>;

    fn fib_list(&mut self) -> Result<Vec<FibEntry>, GatewayError>;

    /// Release the session. Called exactly once, by the gateway.
    fn close(&mut self);
}

/// Something that can open management sessions.
pub trait Forwarder: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn ManagementSession>, GatewayError>;
}

/// Closes the wrapped session when dropped.
struct SessionGuard(Box<dyn ManagementSession>);

impl Deref for SessionGuard {
    type Target = dyn ManagementSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Gateway {
    forwarder: Arc<dyn Forwarder>,
}

impl Gateway {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> Self {
        Self { forwarder }
    }

    fn session(&self) -> Result<SessionGuard, GatewayError> {
        self.forwarder.open_session().map(SessionGuard)
    }

    pub fn create_endpoint(
        &self,
        remote: IpAddr,
        kind: TransportKind,
    ) -> Result<EndpointId, GatewayError> {
        let uri = kind.endpoint_uri(&remote)?;
        let id = self.session()?.create_face(&uri)?;
        tracing::debug!(%remote, %kind, endpoint = id, "endpoint created");
        Ok(id)
    }

    pub fn destroy_endpoint(&self, endpoint: EndpointId) -> Result<(), GatewayError> {
        self.session()?.destroy_face(endpoint)?;
        tracing::debug!(endpoint, "endpoint destroyed");
        Ok(())
    }

    pub fn register_prefix(
        &self,
        endpoint: EndpointId,
        prefix: &str,
        options: RouteOptions,
    ) -> Result<(), GatewayError> {
        self.session()?.register(prefix, endpoint, options)?;
        tracing::debug!(prefix, endpoint, cost = options.cost, "prefix registered");
        Ok(())
    }

    pub fn unregister_prefix(&self, endpoint: EndpointId, prefix: &str) -> Result<(), GatewayError> {
        self.session()?.unregister(prefix, endpoint)?;
        tracing::debug!(prefix, endpoint, "prefix unregistered");
        Ok(())
    }

    pub fn list_forwarding_entries(&self) -> Result<Vec<FibEntry>, GatewayError> {
        self.session()?.fib_list()
    }

    /// Run a blocking gateway call on the blocking pool.
    pub async fn run<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&Gateway) -> Result<T, GatewayError> + Send + 'static,
        T: Send + 'static,
    {
        let gateway = self.clone();
        tokio::task::spawn_blocking(move || call(&gateway))
            .await
            .map_err(|e| GatewayError::Session(format!("gateway task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryForwarder;

    fn gateway(forwarder: &MemoryForwarder) -> Gateway {
        Gateway::new(Arc::new(forwarder.clone()))
    }

    #[test]
    fn every_call_releases_its_session() {
        let forwarder = MemoryForwarder::new();
        let gw = gateway(&forwarder);

        let id = gw
            .create_endpoint("192.168.49.1".parse().unwrap(), TransportKind::Udp4)
            .unwrap();
        gw.register_prefix(id, "/news", RouteOptions::PEER).unwrap();
        gw.list_forwarding_entries().unwrap();
        // Fails: no such endpoint. The session must still be released.
        assert!(gw.register_prefix(9999, "/nope", RouteOptions::PEER).is_err());

        assert_eq!(forwarder.sessions_opened(), 4);
        assert_eq!(forwarder.sessions_closed(), 4);
    }

    #[test]
    fn unreachable_daemon_fails_each_call() {
        let forwarder = MemoryForwarder::new();
        forwarder.set_unreachable(true);
        let gw = gateway(&forwarder);

        assert!(matches!(
            gw.list_forwarding_entries(),
            Err(GatewayError::Session(_))
        ));
        forwarder.set_unreachable(false);
        assert!(gw.list_forwarding_entries().is_ok());
    }

    #[test]
    fn address_family_mismatch_is_a_transport_error() {
        let forwarder = MemoryForwarder::new();
        let gw = gateway(&forwarder);
        let err = gw
            .create_endpoint("fe80::1".parse().unwrap(), TransportKind::Udp4)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(forwarder.sessions_opened(), 0);
    }

    #[test]
    fn endpoint_uris() {
        assert_eq!(
            TransportKind::Udp4
                .endpoint_uri(&"192.168.49.1".parse().unwrap())
                .unwrap(),
            "udp4://192.168.49.1:6363"
        );
        assert_eq!(
            TransportKind::Tcp6
                .endpoint_uri(&"fe80::1".parse().unwrap())
                .unwrap(),
            "tcp6://[fe80::1]:6363"
        );
        assert_eq!("UDP".parse::<TransportKind>().unwrap(), TransportKind::Udp4);
        assert!("ether".parse::<TransportKind>().is_err());
    }

    #[tokio::test]
    async fn run_moves_calls_off_the_async_thread() {
        let forwarder = MemoryForwarder::new();
        let gw = gateway(&forwarder);
        let entries = gw.run(|g| g.list_forwarding_entries()).await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(forwarder.sessions_closed(), 1);
    }
}
