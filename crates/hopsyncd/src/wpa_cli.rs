//! Group platform driving wpa_supplicant's P2P commands through `wpa_cli`.
//!
//! Membership and connectivity notifications flow the other way, from a
//! wpa_cli action script posting to `/api/events/*`.

use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;

use hopsync_services::{GroupPlatform, PlatformError};

pub struct WpaCliPlatform {
    path: PathBuf,
    interface: String,
}

impl WpaCliPlatform {
    pub fn new(path: PathBuf, interface: String) -> Self {
        Self { path, interface }
    }

    fn run(&self, args: Vec<String>) -> BoxFuture<'static, Result<String, PlatformError>> {
        let path = self.path.clone();
        let interface = self.interface.clone();
        async move {
            let output = tokio::process::Command::new(&path)
                .arg("-i")
                .arg(&interface)
                .args(&args)
                .output()
                .await
                .map_err(|e| {
                    PlatformError::Command(format!("failed to spawn '{}': {}", path.display(), e))
                })?;
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(PlatformError::Command(format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
                )));
            }
            Ok(stdout)
        }
        .boxed()
    }

    fn command(&self, args: &[&str]) -> BoxFuture<'static, Result<(), PlatformError>> {
        let command = args.join(" ");
        let reply = self.run(args.iter().map(|a| a.to_string()).collect());
        async move {
            let reply = reply.await?;
            parse_reply(&reply).map_err(|r| PlatformError::Command(format!("{command}: {r}")))
        }
        .boxed()
    }
}

impl GroupPlatform for WpaCliPlatform {
    fn start_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>> {
        self.command(&["p2p_find"])
    }

    fn stop_discovery(&self) -> BoxFuture<'static, Result<(), PlatformError>> {
        self.command(&["p2p_stop_find"])
    }

    fn connect(&self, link_addr: &str) -> BoxFuture<'static, Result<(), PlatformError>> {
        let link_addr = link_addr.to_string();
        let reply = self.run(vec!["p2p_connect".into(), link_addr.clone(), "pbc".into()]);
        async move {
            let reply = reply.await?;
            parse_reply(&reply).map_err(|r| {
                tracing::debug!(link_addr = %link_addr, reply = %r, "p2p_connect refused");
                PlatformError::ConnectRefused(link_addr)
            })
        }
        .boxed()
    }
}

/// wpa_cli answers control commands with `OK` or `FAIL[-reason]`.
fn parse_reply(reply: &str) -> Result<(), String> {
    let reply = reply.trim();
    match reply.lines().last().map(str::trim) {
        Some("OK") => Ok(()),
        Some(other) => Err(other.to_string()),
        None => Err("empty reply".to_string()),
    }
}
