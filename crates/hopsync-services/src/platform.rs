//! Platform collaborators: group discovery and local address lookup.

use std::net::IpAddr;

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::peer::LinkAddr;

/// A device reported by a membership refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceInfo {
    pub link_addr: LinkAddr,
    #[serde(default)]
    pub name: String,
    /// Present when the platform already knows the device's address.
    #[serde(default)]
    pub network_addr: Option<IpAddr>,
}

/// A connectivity-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConnectivityInfo {
    pub group_formed: bool,
    pub is_owner: bool,
    #[serde(default)]
    pub owner_addr: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("platform command failed: {0}")]
    Command(String),
    #[error("connection to {0} refused")]
    ConnectRefused(LinkAddr),
}

/// Group formation on the local wireless link.
pub trait GroupPlatform: Send + Sync {
    fn start_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>>;

    fn stop_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>>;

    /// Ask the platform to connect to `link_addr`. Completion is reported
    /// later through a connectivity or connect-failed notification.
    fn connect(&self, link_addr: &str) -> BoxFuture<'static, Result<(), PlatformError>>;
}

/// This device's address on the group interface, if a group is up.
pub trait AddressResolver: Send + Sync {
    fn local_address(&self) -> Option<IpAddr>;
}
