//! Advertisement responder. Answers probes addressed to this device.
//!
//! A probe also tells us who is asking. A requester without an endpoint is
//! learned on the spot: endpoint, registry record, and a discovery route so
//! our own probe engine probes it back. This is how a group owner finds its
//! clients.

use std::net::IpAddr;

use hopsync_core::wire::{discovery_prefix, is_local_scope, Advertisement, ProbeName, WireError};

use crate::gateway::{GatewayError, RouteOptions};
use crate::state::MeshContext;

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("probe targets {0}, not this device")]
    NotForUs(IpAddr),
    #[error("not in a group")]
    NoAddress,
    #[error("cannot build advertisement: {0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Clone)]
pub struct Responder {
    ctx: MeshContext,
}

impl Responder {
    pub fn new(ctx: MeshContext) -> Self {
        Self { ctx }
    }

    /// Answer the probe `name` with this device's advertisement.
    pub async fn respond(&self, name: &str) -> Result<Advertisement, ResponderError> {
        let probe = ProbeName::parse(name)?;
        let own = self
            .ctx
            .resolver
            .local_address()
            .ok_or(ResponderError::NoAddress)?;
        if probe.target != own {
            return Err(ResponderError::NotForUs(probe.target));
        }

        self.learn_requester(probe.requester).await;
        let advertisement = self.local_advertisement().await?;
        tracing::debug!(
            requester = %probe.requester,
            prefixes = advertisement.len(),
            "probe answered"
        );
        Ok(advertisement)
    }

    /// Like [`respond`](Self::respond), in wire form.
    pub async fn respond_encoded(&self, name: &str) -> Result<String, ResponderError> {
        Ok(self.respond(name).await?.encode()?)
    }

    /// Prefixes served from this device: every non-local entry with a next
    /// hop that does not lead to a peer. Learned routes are never passed on.
    pub async fn local_advertisement(&self) -> Result<Advertisement, GatewayError> {
        let entries = self.ctx.gateway.run(|gw| gw.list_forwarding_entries()).await?;
        let peer_endpoints = self.ctx.registry.endpoints().await;

        let mut prefixes: Vec<String> = entries
            .into_iter()
            .filter(|e| !is_local_scope(&e.prefix))
            .filter(|e| e.next_hops.iter().any(|hop| !peer_endpoints.contains(hop)))
            .map(|e| e.prefix)
            .collect();
        prefixes.sort();
        prefixes.dedup();
        Ok(Advertisement::new(prefixes))
    }

    async fn learn_requester(&self, requester: IpAddr) {
        if self.ctx.registry.endpoint_for(&requester).await.is_some() {
            return;
        }

        let kind = self.ctx.transport;
        let prefix = discovery_prefix(&requester);
        let route = prefix.clone();
        let learned = self
            .ctx
            .gateway
            .run(move |gw| {
                let endpoint = gw.create_endpoint(requester, kind)?;
                gw.register_prefix(endpoint, &route, RouteOptions::PEER)?;
                Ok(endpoint)
            })
            .await;

        match learned {
            Ok(endpoint) => {
                self.ctx
                    .registry
                    .track(requester, &requester.to_string())
                    .await;
                if let Err(e) = self.ctx.registry.attach_endpoint(requester, endpoint).await {
                    tracing::warn!(%requester, error = %e, "cannot record requester endpoint");
                    return;
                }
                tracing::info!(%requester, endpoint, prefix = %prefix, "requester learned");
            }
            Err(e) => tracing::warn!(%requester, error = %e, "cannot reach requester"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::memory::MemoryForwarder;
    use crate::testing::{context, ip, RecordingPlatform, StaticResolver};

    const OWN: &str = "192.168.49.1";
    const CLIENT: &str = "192.168.49.20";

    fn responder(forwarder: &MemoryForwarder) -> (Responder, MeshContext) {
        let ctx = context(
            forwarder,
            StaticResolver::new(Some(ip(OWN))),
            RecordingPlatform::new(),
        );
        (Responder::new(ctx.clone()), ctx)
    }

    fn probe_from(requester: &str) -> String {
        ProbeName::new(ip(OWN), ip(requester), 99).to_string()
    }

    #[tokio::test]
    async fn advertises_local_prefixes_only() {
        let forwarder = MemoryForwarder::new();
        let (responder, ctx) = responder(&forwarder);
        forwarder.add_face(7, "udp4://192.168.49.9:6363");
        ctx.registry.track(ip("192.168.49.9"), "peer").await;
        ctx.registry.attach_endpoint(ip("192.168.49.9"), 7).await.unwrap();

        forwarder.add_route("/news", 300);
        forwarder.add_route("/sports", 7);
        forwarder.add_route("/mixed", 7);
        forwarder.add_route("/mixed", 301);
        forwarder.add_route("/localhop/wifidirect/192.168.49.1", 0);
        forwarder.add_route("/localhost/nfd", 1);

        let ad = responder.local_advertisement().await.unwrap();
        assert_eq!(ad.prefixes(), ["/mixed", "/news"]);
    }

    #[tokio::test]
    async fn probe_teaches_us_the_requester() {
        let forwarder = MemoryForwarder::new();
        let (responder, ctx) = responder(&forwarder);
        forwarder.add_route("/news", 300);

        let payload = responder.respond_encoded(&probe_from(CLIENT)).await.unwrap();
        assert_eq!(payload, "1\n/news\n");

        let endpoint = ctx.registry.endpoint_for(&ip(CLIENT)).await.unwrap();
        assert!(forwarder
            .routes_for(endpoint)
            .contains("/localhop/wifidirect/192.168.49.20"));

        // Known requester: nothing new is created.
        responder.respond(&probe_from(CLIENT)).await.unwrap();
        assert_eq!(forwarder.face_count(), 1);
    }

    #[tokio::test]
    async fn probes_for_someone_else_are_refused() {
        let forwarder = MemoryForwarder::new();
        let (responder, ctx) = responder(&forwarder);
        let name = ProbeName::new(ip("192.168.49.77"), ip(CLIENT), 1).to_string();

        assert!(matches!(
            responder.respond(&name).await,
            Err(ResponderError::NotForUs(_))
        ));
        assert!(matches!(
            responder.respond("/news/today").await,
            Err(ResponderError::Wire(_))
        ));
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn outside_a_group_nothing_is_answered() {
        let forwarder = MemoryForwarder::new();
        let ctx = context(&forwarder, StaticResolver::new(None), RecordingPlatform::new());
        let responder = Responder::new(ctx);
        assert!(matches!(
            responder.respond(&probe_from(CLIENT)).await,
            Err(ResponderError::NoAddress)
        ));
    }
}
