//! Route administration for the operator surface.
//!
//! Every call resolves to a value or a human-readable error string; there
//! are no structured error codes at this boundary.

use std::net::IpAddr;

use hopsync_core::wire::EndpointId;

use crate::gateway::{FibEntry, Gateway, GatewayError, RouteOptions, TransportKind};

fn forwarder_error(e: GatewayError) -> String {
    format!("Error communicating with forwarder ({e})")
}

#[derive(Clone)]
pub struct RouteAdmin {
    gateway: Gateway,
}

impl RouteAdmin {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn list(&self) -> Result<Vec<FibEntry>, String> {
        self.gateway
            .run(|gw| gw.list_forwarding_entries())
            .await
            .map_err(forwarder_error)
    }

    /// Create an endpoint toward `remote` and route `prefix` over it.
    pub async fn create(
        &self,
        prefix: String,
        remote: IpAddr,
        kind: TransportKind,
    ) -> Result<EndpointId, String> {
        let endpoint = self
            .gateway
            .run(move |gw| gw.create_endpoint(remote, kind))
            .await
            .map_err(|e| format!("Error creating endpoint ({e})"))?;

        let name = prefix.clone();
        self.gateway
            .run(move |gw| gw.register_prefix(endpoint, &name, RouteOptions::PEER))
            .await
            .map_err(forwarder_error)?;
        tracing::info!(prefix = %prefix, %remote, endpoint, "route created");
        Ok(endpoint)
    }

    /// Unregister `prefix` from each of `endpoints`. Stops at the first failure.
    pub async fn remove(&self, prefix: String, endpoints: Vec<EndpointId>) -> Result<(), String> {
        let name = prefix.clone();
        self.gateway
            .run(move |gw| {
                for endpoint in &endpoints {
                    gw.unregister_prefix(*endpoint, &name)?;
                }
                Ok(())
            })
            .await
            .map_err(forwarder_error)?;
        tracing::info!(prefix = %prefix, "route removed");
        Ok(())
    }
}
