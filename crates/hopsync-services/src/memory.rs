//! In-process forwarder keeping its forwarding table in memory.
//!
//! Backs dry runs of the daemon (`forwarder.backend = "memory"`) and the
//! tests. Behaves like NFD where it matters to hopsync: creating an endpoint
//! toward a known URI returns the existing id, routes toward unknown
//! endpoints are refused, and destroying an endpoint drops its routes.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use hopsync_core::wire::EndpointId;

use crate::gateway::{FibEntry, Forwarder, GatewayError, ManagementSession, RouteOptions};

/// First id handed out; NFD reserves the ids below for internal faces.
const FIRST_FACE_ID: EndpointId = 256;

/// A mutating call observed by the forwarder, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwarderOp {
    CreateFace(String, EndpointId),
    DestroyFace(EndpointId),
    Register(String, EndpointId, RouteOptions),
    Unregister(String, EndpointId),
}

#[derive(Default)]
struct MemoryState {
    faces: DashMap<EndpointId, String>,
    fib: DashMap<String, BTreeSet<EndpointId>>,
    next_face: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    unreachable: AtomicBool,
    ops: Mutex<Vec<ForwarderOp>>,
}

#[derive(Clone, Default)]
pub struct MemoryForwarder {
    state: Arc<MemoryState>,
}

impl MemoryForwarder {
    pub fn new() -> Self {
        let forwarder = Self::default();
        forwarder.state.next_face.store(FIRST_FACE_ID, Ordering::SeqCst);
        forwarder
    }

    /// Seed an endpoint with a fixed id.
    pub fn add_face(&self, endpoint: EndpointId, uri: &str) {
        self.state.faces.insert(endpoint, uri.to_string());
    }

    /// Seed a route without recording an operation.
    pub fn add_route(&self, prefix: &str, endpoint: EndpointId) {
        self.state
            .fib
            .entry(prefix.to_string())
            .or_default()
            .insert(endpoint);
    }

    /// Prefixes whose next hops include `endpoint`.
    pub fn routes_for(&self, endpoint: EndpointId) -> BTreeSet<String> {
        self.state
            .fib
            .iter()
            .filter(|e| e.value().contains(&endpoint))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn has_face(&self, endpoint: EndpointId) -> bool {
        self.state.faces.contains_key(&endpoint)
    }

    pub fn face_count(&self) -> usize {
        self.state.faces.len()
    }

    /// Every mutating call so far.
    pub fn ops(&self) -> Vec<ForwarderOp> {
        self.state
            .ops
            .lock()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Make every session open fail, as if the daemon were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn record(&self, op: ForwarderOp) {
        if let Ok(mut ops) = self.state.ops.lock() {
            ops.push(op);
        }
    }
}

impl Forwarder for MemoryForwarder {
    fn open_session(&self) -> Result<Box<dyn ManagementSession>, GatewayError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Session("forwarder unreachable".into()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            forwarder: self.clone(),
            closed: false,
        }))
    }
}

struct MemorySession {
    forwarder: MemoryForwarder,
    closed: bool,
}

impl MemorySession {
    fn state(&self) -> &MemoryState {
        &self.forwarder.state
    }

    fn endpoint_known(&self, endpoint: EndpointId) -> bool {
        // 0 addresses the face the command arrived on.
        endpoint == 0 || self.state().faces.contains_key(&endpoint)
    }
}

impl ManagementSession for MemorySession {
    fn create_face(&mut self, uri: &str) -> Result<EndpointId, GatewayError> {
        let existing = self
            .state()
            .faces
            .iter()
            .find(|f| f.value() == uri)
            .map(|f| *f.key());
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = self.state().next_face.fetch_add(1, Ordering::SeqCst);
        self.state().faces.insert(id, uri.to_string());
        self.forwarder
            .record(ForwarderOp::CreateFace(uri.to_string(), id));
        Ok(id)
    }

    fn destroy_face(&mut self, endpoint: EndpointId) -> Result<(), GatewayError> {
        if self.state().faces.remove(&endpoint).is_none() {
            return Err(GatewayError::Transport(format!("no endpoint {endpoint}")));
        }
        for mut entry in self.state().fib.iter_mut() {
            entry.value_mut().remove(&endpoint);
        }
        self.state().fib.retain(|_, hops| !hops.is_empty());
        self.forwarder.record(ForwarderOp::DestroyFace(endpoint));
        Ok(())
    }

    fn register(
        &mut self,
        prefix: &str,
        endpoint: EndpointId,
        options: RouteOptions,
    ) -> Result<(), GatewayError> {
        if !self.endpoint_known(endpoint) {
            return Err(GatewayError::Registration {
                prefix: prefix.to_string(),
                reason: format!("no endpoint {endpoint}"),
            });
        }
        self.forwarder.add_route(prefix, endpoint);
        self.forwarder.record(ForwarderOp::Register(
            prefix.to_string(),
            endpoint,
            options,
        ));
        Ok(())
    }

    fn unregister(&mut self, prefix: &str, endpoint: EndpointId) -> Result<(), GatewayError> {
        let mut emptied = false;
        if let Some(mut hops) = self.state().fib.get_mut(prefix) {
            hops.remove(&endpoint);
            emptied = hops.is_empty();
        }
        if emptied {
            self.state().fib.remove(prefix);
        }
        self.forwarder
            .record(ForwarderOp::Unregister(prefix.to_string(), endpoint));
        Ok(())
    }

    fn fib_list(&mut self) -> Result<Vec<FibEntry>, GatewayError> {
        let mut entries: Vec<FibEntry> = self
            .state()
            .fib
            .iter()
            .map(|e| FibEntry {
                prefix: e.key().clone(),
                next_hops: e.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        Ok(entries)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state().closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
