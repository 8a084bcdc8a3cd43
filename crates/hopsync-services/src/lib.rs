pub mod controller;
pub mod engine;
pub mod gateway;
pub mod membership;
pub mod memory;
pub mod peer;
pub mod platform;
pub mod reconcile;
pub mod responder;
pub mod routes;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use controller::{Controller, ControllerError, ControllerStatus};
pub use engine::{Completion, CycleReport, ProbeEngine, ProbeSettings};
pub use gateway::{
    FibEntry, Forwarder, Gateway, GatewayError, ManagementSession, RouteOptions, TransportKind,
};
pub use membership::{MembershipChange, MembershipCoordinator};
pub use memory::{ForwarderOp, MemoryForwarder};
pub use peer::{AdmitError, Binding, LinkAddr, Peer, PeerRegistry, RegistryError, TimeoutOutcome};
pub use platform::{AddressResolver, ConnectivityInfo, DeviceInfo, GroupPlatform, PlatformError};
pub use reconcile::{prefixes_served_by, reconcile, Reconciliation};
pub use responder::{Responder, ResponderError};
pub use routes::RouteAdmin;
pub use state::{ControllerState, GroupRole, MeshContext, SharedState};
pub use transport::{ProbeOutcome, RequestTransport};
