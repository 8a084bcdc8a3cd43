//! hopsync integration test harness.
//!
//! Runs several controllers in one process. Each device gets its own
//! in-memory forwarder; probes travel through a shared hub that hands the
//! request name to the target device's responder, the way the forwarder
//! would deliver it on a real group link.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;

use hopsync_core::wire::ProbeName;
use hopsync_services::{
    AddressResolver, ConnectivityInfo, Controller, ControllerState, DeviceInfo, Gateway,
    GroupPlatform, MemoryForwarder, MeshContext, PeerRegistry, PlatformError, ProbeOutcome,
    ProbeSettings, RequestTransport, TransportKind,
};

mod convergence;
mod disconnection;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const OWNER: &str = "192.168.49.1";
pub const CLIENT: &str = "192.168.49.20";

pub fn ip(text: &str) -> IpAddr {
    text.parse().unwrap()
}

/// Routes probe requests to whichever device owns the target address.
#[derive(Clone, Default)]
pub struct Hub {
    devices: Arc<DashMap<IpAddr, Arc<Controller>>>,
}

impl Hub {
    pub fn attach(&self, addr: IpAddr, controller: Arc<Controller>) {
        self.devices.insert(addr, controller);
    }

    /// The device stops answering, as if it walked out of range.
    pub fn detach(&self, addr: &IpAddr) {
        self.devices.remove(addr);
    }
}

impl RequestTransport for Hub {
    fn express(&self, name: String, _lifetime: Duration) -> BoxFuture<'static, ProbeOutcome> {
        let target = ProbeName::parse(&name)
            .ok()
            .and_then(|probe| self.devices.get(&probe.target).map(|c| c.value().clone()));
        async move {
            let Some(controller) = target else {
                return ProbeOutcome::Timeout;
            };
            match controller.respond(&name).await {
                Ok(payload) => ProbeOutcome::Response(Bytes::from(payload)),
                Err(_) => ProbeOutcome::Timeout,
            }
        }
        .boxed()
    }
}

/// Address on the group interface, switchable to simulate leaving it.
pub struct Interface(Mutex<Option<IpAddr>>);

impl Interface {
    pub fn up(addr: IpAddr) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(addr))))
    }

    pub fn down(&self) {
        *self.0.lock().unwrap() = None;
    }
}

impl AddressResolver for Interface {
    fn local_address(&self) -> Option<IpAddr> {
        *self.0.lock().unwrap()
    }
}

/// Platform that accepts every request.
pub struct Radio;

impl GroupPlatform for Radio {
    fn start_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>> {
        async { Ok(()) }.boxed()
    }

    fn stop_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>> {
        async { Ok(()) }.boxed()
    }

    fn connect(&self, _link_addr: &str) -> BoxFuture<'static, Result<(), PlatformError>> {
        async { Ok(()) }.boxed()
    }
}

pub struct Device {
    pub addr: IpAddr,
    pub forwarder: MemoryForwarder,
    pub interface: Arc<Interface>,
    pub controller: Arc<Controller>,
}

pub fn fast_settings() -> ProbeSettings {
    ProbeSettings {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(500),
        max_timeouts: 5,
    }
}

/// Build a device at `addr` that serves `local_prefixes` from an app face.
pub fn device(hub: &Hub, addr: &str, app_face: u64, local_prefixes: &[&str]) -> Device {
    let addr = ip(addr);
    let forwarder = MemoryForwarder::new();
    forwarder.add_face(app_face, "internal://");
    for prefix in local_prefixes {
        forwarder.add_route(prefix, app_face);
    }
    let interface = Interface::up(addr);
    let ctx = MeshContext {
        registry: PeerRegistry::new(7),
        gateway: Gateway::new(Arc::new(forwarder.clone())),
        state: ControllerState::shared(),
        platform: Arc::new(Radio),
        resolver: interface.clone(),
        transport: TransportKind::Udp4,
        local_endpoint: 0,
    };
    let controller = Arc::new(Controller::new(ctx, Arc::new(hub.clone()), fast_settings()));
    hub.attach(addr, controller.clone());
    Device {
        addr,
        forwarder,
        interface,
        controller,
    }
}

/// Form a group: `owner` admits `client`, both see the group come up.
pub async fn form_group(owner: &Device, client: &Device) {
    owner
        .controller
        .on_peers_changed(vec![DeviceInfo {
            link_addr: "02:00:00:00:00:20".into(),
            name: "client".into(),
            network_addr: Some(client.addr),
        }])
        .await;
    owner
        .controller
        .on_connectivity_changed(ConnectivityInfo {
            group_formed: true,
            is_owner: true,
            owner_addr: Some(owner.addr),
        })
        .await;
    client
        .controller
        .on_connectivity_changed(ConnectivityInfo {
            group_formed: true,
            is_owner: false,
            owner_addr: Some(owner.addr),
        })
        .await;
}

/// Prefixes `device` routes toward the peer at `peer`, or empty if it has
/// no endpoint to it.
pub async fn routes_toward(device: &Device, peer: IpAddr) -> Vec<String> {
    match device
        .controller
        .peer_by_network_addr(&peer)
        .await
        .and_then(|p| p.endpoint)
    {
        Some(endpoint) => device.forwarder.routes_for(endpoint).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Poll `check` until it holds or `attempts` × 50 ms pass.
pub async fn wait_until<F, Fut>(attempts: u32, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..attempts {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("condition not reached after {} attempts", attempts)
}
