//! Forwarder backend driving a local NFD through the `nfdc` tool.
//!
//! nfdc keeps no connection between invocations, so a session is just the
//! binary path; every management call is one process run.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;

use hopsync_core::wire::EndpointId;
use hopsync_services::{FibEntry, Forwarder, GatewayError, ManagementSession, RouteOptions};

pub struct NfdcForwarder {
    path: PathBuf,
}

impl NfdcForwarder {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Forwarder for NfdcForwarder {
    fn open_session(&self) -> Result<Box<dyn ManagementSession>, GatewayError> {
        Ok(Box::new(NfdcSession {
            path: self.path.clone(),
        }))
    }
}

struct NfdcSession {
    path: PathBuf,
}

impl NfdcSession {
    /// Run nfdc; Ok(stdout) on success, Err(reason) otherwise.
    fn nfdc(&self, args: &[&str]) -> Result<String, GatewayError> {
        let output = Command::new(&self.path)
            .args(args)
            .output()
            .map_err(|e| {
                GatewayError::Session(format!("failed to spawn '{}': {}", self.path.display(), e))
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(GatewayError::Session(reason))
        }
    }
}

fn reason(e: GatewayError) -> String {
    match e {
        GatewayError::Session(reason) => reason,
        other => other.to_string(),
    }
}

impl ManagementSession for NfdcSession {
    fn create_face(&mut self, uri: &str) -> Result<EndpointId, GatewayError> {
        let out = self
            .nfdc(&["face", "create", "remote", uri])
            .map_err(|e| GatewayError::Transport(reason(e)))?;
        parse_face_id(&out)
            .ok_or_else(|| GatewayError::Transport(format!("unexpected nfdc output: {}", out.trim())))
    }

    fn destroy_face(&mut self, endpoint: EndpointId) -> Result<(), GatewayError> {
        let id = endpoint.to_string();
        self.nfdc(&["face", "destroy", id.as_str()])
            .map(|_| ())
            .map_err(|e| GatewayError::Transport(reason(e)))
    }

    fn register(
        &mut self,
        prefix: &str,
        endpoint: EndpointId,
        options: RouteOptions,
    ) -> Result<(), GatewayError> {
        let nexthop = endpoint.to_string();
        let cost = options.cost.to_string();
        let mut args: Vec<&str> = vec![
            "route",
            "add",
            "prefix",
            prefix,
            "nexthop",
            nexthop.as_str(),
            "cost",
            cost.as_str(),
        ];
        if !options.child_inherit {
            args.push("no-inherit");
        }
        if options.capture {
            args.push("capture");
        }
        self.nfdc(&args)
            .map(|_| ())
            .map_err(|e| GatewayError::Registration {
                prefix: prefix.to_string(),
                reason: reason(e),
            })
    }

    fn unregister(&mut self, prefix: &str, endpoint: EndpointId) -> Result<(), GatewayError> {
        let nexthop = endpoint.to_string();
        self.nfdc(&["route", "remove", "prefix", prefix, "nexthop", nexthop.as_str()])
            .map(|_| ())
            .map_err(|e| GatewayError::Registration {
                prefix: prefix.to_string(),
                reason: reason(e),
            })
    }

    fn fib_list(&mut self) -> Result<Vec<FibEntry>, GatewayError> {
        let out = self
            .nfdc(&["fib", "list"])
            .map_err(|e| GatewayError::Query(reason(e)))?;
        Ok(parse_fib_list(&out))
    }

    fn close(&mut self) {}
}

// ── Output parsing ────────────────────────────────────────────────────────────

/// Face id from `face-created id=262 local=... remote=...` (or `face-exists`).
fn parse_face_id(output: &str) -> Option<EndpointId> {
    output
        .split_whitespace()
        .find_map(|token| token.strip_prefix("id="))
        .and_then(|id| id.parse().ok())
}

/// Parse `nfdc fib list`:
///
/// ```text
/// FIB:
///   /localhost/nfd nexthops={faceid=1 (cost=0)}
///   /news nexthops={faceid=262 (cost=10), faceid=263 (cost=10)}
/// ```
fn parse_fib_list(output: &str) -> Vec<FibEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (prefix, hops) = line.split_once(" nexthops=")?;
            if !prefix.starts_with('/') {
                return None;
            }
            let next_hops: BTreeSet<EndpointId> = hops
                .split("faceid=")
                .skip(1)
                .filter_map(|rest| {
                    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                    digits.parse().ok()
                })
                .collect();
            Some(FibEntry {
                prefix: prefix.to_string(),
                next_hops,
            })
        })
        .collect()
}
