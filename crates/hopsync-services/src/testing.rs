//! Test doubles for the platform and transport collaborators.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use hopsync_core::wire::ProbeName;

use crate::gateway::{Gateway, TransportKind};
use crate::memory::MemoryForwarder;
use crate::peer::PeerRegistry;
use crate::platform::{AddressResolver, GroupPlatform, PlatformError};
use crate::state::{ControllerState, MeshContext};
use crate::transport::{ProbeOutcome, RequestTransport};

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[derive(Default)]
pub struct StaticResolver {
    addr: Mutex<Option<IpAddr>>,
}

impl StaticResolver {
    pub fn new(addr: Option<IpAddr>) -> Arc<Self> {
        Arc::new(Self {
            addr: Mutex::new(addr),
        })
    }

    pub fn set(&self, addr: Option<IpAddr>) {
        *self.addr.lock().unwrap() = addr;
    }
}

impl AddressResolver for StaticResolver {
    fn local_address(&self) -> Option<IpAddr> {
        *self.addr.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub discovery_starts: AtomicUsize,
    pub discovery_stops: AtomicUsize,
    connects: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, link_addr: &str) {
        self.refused.lock().unwrap().insert(link_addr.to_string());
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.discovery_starts.load(Ordering::SeqCst)
    }
}

impl GroupPlatform for RecordingPlatform {
    fn start_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>> {
        self.discovery_starts.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }

    fn stop_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>> {
        self.discovery_stops.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }

    fn connect(&self, link_addr: &str) -> BoxFuture<'static, Result<(), PlatformError>> {
        self.connects.lock().unwrap().push(link_addr.to_string());
        let refused = self.refused.lock().unwrap().contains(link_addr);
        let link = link_addr.to_string();
        async move {
            if refused {
                Err(PlatformError::ConnectRefused(link))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

/// Answers probes from a script keyed by target address.
///
/// Unscripted targets time out at once; targets scripted with `None` never
/// answer at all.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<HashMap<IpAddr, Option<ProbeOutcome>>>,
    delays: Mutex<HashMap<IpAddr, Duration>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, target: IpAddr, payload: &str) {
        self.script.lock().unwrap().insert(
            target,
            Some(ProbeOutcome::Response(payload.to_string().into())),
        );
    }

    /// Like [`answer`](Self::answer), but the response takes `delay`.
    pub fn answer_after(&self, target: IpAddr, payload: &str, delay: Duration) {
        self.answer(target, payload);
        self.delays.lock().unwrap().insert(target, delay);
    }

    pub fn hang(&self, target: IpAddr) {
        self.script.lock().unwrap().insert(target, None);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl RequestTransport for ScriptedTransport {
    fn express(&self, name: String, _lifetime: Duration) -> BoxFuture<'static, ProbeOutcome> {
        let target = ProbeName::parse(&name).map(|p| p.target).ok();
        self.sent.lock().unwrap().push(name);
        let scripted = target.and_then(|t| self.script.lock().unwrap().get(&t).cloned());
        let delay = target.and_then(|t| self.delays.lock().unwrap().get(&t).copied());
        match scripted {
            Some(Some(outcome)) => async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
            .boxed(),
            Some(None) => futures::future::pending().boxed(),
            None => async { ProbeOutcome::Timeout }.boxed(),
        }
    }
}

pub fn context(
    forwarder: &MemoryForwarder,
    resolver: Arc<StaticResolver>,
    platform: Arc<RecordingPlatform>,
) -> MeshContext {
    MeshContext {
        registry: PeerRegistry::new(4),
        gateway: Gateway::new(Arc::new(forwarder.clone())),
        state: ControllerState::shared(),
        platform,
        resolver,
        transport: TransportKind::Udp4,
        local_endpoint: 0,
    }
}
