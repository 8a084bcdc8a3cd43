//! Probe transport backed by `ndnpeek`.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use hopsync_services::{ProbeOutcome, RequestTransport};

pub struct NdnpeekTransport {
    path: PathBuf,
}

impl NdnpeekTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RequestTransport for NdnpeekTransport {
    fn express(&self, name: String, lifetime: Duration) -> BoxFuture<'static, ProbeOutcome> {
        let path = self.path.clone();
        async move {
            let output = tokio::process::Command::new(&path)
                .arg("--fresh")
                .arg("--payload")
                .arg("--lifetime")
                .arg(lifetime.as_millis().to_string())
                .arg(&name)
                .kill_on_drop(true)
                .output()
                .await;

            match output {
                Ok(output) if output.status.success() => {
                    ProbeOutcome::Response(Bytes::from(output.stdout))
                }
                Ok(output) => {
                    tracing::debug!(
                        name = %name,
                        code = output.status.code().unwrap_or(-1),
                        "ndnpeek returned no data"
                    );
                    ProbeOutcome::Timeout
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to spawn ndnpeek");
                    ProbeOutcome::Timeout
                }
            }
        }
        .boxed()
    }
}
