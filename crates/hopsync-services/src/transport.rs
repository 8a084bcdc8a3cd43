//! Named request/response transport used for probes.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

/// How one outstanding request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Response payload, as received.
    Response(Bytes),
    Timeout,
}

/// Sends one fresh (never cache-satisfied) named request.
///
/// The returned future resolves once; implementations map every failure
/// that is not a response to [`ProbeOutcome::Timeout`].
pub trait RequestTransport: Send + Sync {
    fn express(&self, name: String, lifetime: Duration) -> BoxFuture<'static, ProbeOutcome>;
}
