//! hopsync wire format: the names and payloads devices exchange.
//!
//! Two things cross the air between devices:
//!   1. Probe request names, `/localhop/wifidirect/<target>/<requester>/probe?<ts>`
//!   2. Advertisement payloads, `{count}\n{prefix}\n...`
//!
//! Everything else a device learns about its neighbours comes from its own
//! forwarding table. Changing anything here breaks interop with deployed
//! devices.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

// ── Reserved namespaces ───────────────────────────────────────────────────────

/// Discovery scope. A device is probeable at `PROBE_PREFIX/<its address>`.
pub const PROBE_PREFIX: &str = "/localhop/wifidirect";

/// Scopes that never take part in prefix reachability bookkeeping.
pub const LOCAL_SCOPES: [&str; 2] = ["/localhop", "/localhost"];

/// Name component marking a probe request.
pub const PROBE_COMPONENT: &str = "probe";

/// Separator between records of an advertisement payload.
pub const RECORD_SEPARATOR: char = '\n';

// ── Protocol constants ────────────────────────────────────────────────────────

/// Seconds between probe cycles.
pub const PROBE_INTERVAL_SECS: u64 = 5;

/// Lifetime of a single probe request in milliseconds.
pub const PROBE_TIMEOUT_MS: u64 = 4_000;

/// Consecutive probe timeouts after which a peer is evicted.
pub const MAX_PROBE_TIMEOUTS: u32 = 5;

/// Route cost for every prefix learned from a peer.
pub const PEER_ROUTE_COST: u64 = 10;

/// Forwarder-assigned identifier of a transport endpoint (an NFD face id).
pub type EndpointId = u64;

// ── Prefix helpers ────────────────────────────────────────────────────────────

/// Is `prefix` equal to `scope` or nested below it?
///
/// Component-aware: `/localhop` covers `/localhop/x` but not `/localhopper`.
pub fn is_under(prefix: &str, scope: &str) -> bool {
    match prefix.strip_prefix(scope) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Is `prefix` inside one of the local scopes?
pub fn is_local_scope(prefix: &str) -> bool {
    LOCAL_SCOPES.iter().any(|scope| is_under(prefix, scope))
}

/// The discovery prefix a device with address `addr` is probeable at.
pub fn discovery_prefix(addr: &IpAddr) -> String {
    format!("{}/{}", PROBE_PREFIX, addr)
}

/// Trailing address component of a discovery prefix.
///
/// Returns `None` for prefixes outside the discovery scope, for the scope
/// itself, and for deeper names such as probe requests.
pub fn discovery_addr(prefix: &str) -> Option<&str> {
    let rest = prefix.strip_prefix(PROBE_PREFIX)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

// ── Probe names ───────────────────────────────────────────────────────────────

/// A probe request name.
///
/// `target` is the probed device, `requester` the device asking, and
/// `timestamp` makes every request unique so no cache can answer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeName {
    pub target: IpAddr,
    pub requester: IpAddr,
    pub timestamp: u64,
}

impl ProbeName {
    pub fn new(target: IpAddr, requester: IpAddr, timestamp: u64) -> Self {
        Self {
            target,
            requester,
            timestamp,
        }
    }

    /// Parse a probe name in URI form.
    ///
    /// The `?` before the timestamp may arrive percent-encoded (`%3F`) once
    /// the name has been through a named-data URI round trip.
    pub fn parse(name: &str) -> Result<Self, WireError> {
        let rest = name
            .strip_prefix(PROBE_PREFIX)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| WireError::NotAProbe(name.to_string()))?;

        let mut parts = rest.split('/');
        let (target, requester, last) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(t), Some(r), Some(l), None) => (t, r, l),
            _ => return Err(WireError::NotAProbe(name.to_string())),
        };

        let target = target
            .parse()
            .map_err(|_| WireError::BadAddress(target.to_string()))?;
        let requester = requester
            .parse()
            .map_err(|_| WireError::BadAddress(requester.to_string()))?;

        let stamp = last
            .strip_prefix(PROBE_COMPONENT)
            .and_then(|s| {
                s.strip_prefix('?')
                    .or_else(|| s.strip_prefix("%3F"))
                    .or_else(|| s.strip_prefix("%3f"))
            })
            .ok_or_else(|| WireError::NotAProbe(name.to_string()))?;
        let timestamp = stamp
            .parse()
            .map_err(|_| WireError::BadTimestamp(stamp.to_string()))?;

        Ok(Self {
            target,
            requester,
            timestamp,
        })
    }
}

impl fmt::Display for ProbeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}?{}",
            discovery_prefix(&self.target),
            self.requester,
            PROBE_COMPONENT,
            self.timestamp
        )
    }
}

// ── Advertisement payload ─────────────────────────────────────────────────────

/// The prefixes a device claims it can serve, in probe-response form.
///
/// Wire form is newline-delimited text: line 1 holds the decimal count `N`,
/// lines 2..=N+1 one prefix each. Lines past `N` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    prefixes: Vec<String>,
}

impl Advertisement {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// The advertised prefixes as a set, duplicates collapsed.
    pub fn to_set(&self) -> BTreeSet<String> {
        self.prefixes.iter().cloned().collect()
    }

    /// Encode to the wire form. Fails if a prefix contains the separator.
    pub fn encode(&self) -> Result<String, WireError> {
        let mut out = format!("{}{}", self.prefixes.len(), RECORD_SEPARATOR);
        for prefix in &self.prefixes {
            if prefix.contains(RECORD_SEPARATOR) {
                return Err(WireError::SeparatorInPrefix(prefix.clone()));
            }
            out.push_str(prefix);
            out.push(RECORD_SEPARATOR);
        }
        Ok(out)
    }

    /// Decode from the wire form.
    pub fn decode(payload: &str) -> Result<Self, WireError> {
        let mut lines = payload.split(RECORD_SEPARATOR);
        let count_line = lines.next().unwrap_or_default().trim();
        let count: usize = count_line
            .parse()
            .map_err(|_| WireError::BadCount(count_line.to_string()))?;

        let prefixes: Vec<String> = lines
            .take(count)
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        if prefixes.len() < count {
            return Err(WireError::Truncated {
                expected: count,
                found: prefixes.len(),
            });
        }
        Ok(Self { prefixes })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("not a probe name: {0}")]
    NotAProbe(String),

    #[error("invalid address component: {0}")]
    BadAddress(String),

    #[error("invalid probe timestamp: {0}")]
    BadTimestamp(String),

    #[error("invalid prefix count: {0:?}")]
    BadCount(String),

    #[error("payload announces {expected} prefixes but carries {found}")]
    Truncated { expected: usize, found: usize },

    #[error("prefix contains the record separator: {0:?}")]
    SeparatorInPrefix(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn probe_name_formats_like_the_protocol() {
        let name = ProbeName::new(ip("192.168.49.1"), ip("192.168.49.23"), 1700000000123);
        assert_eq!(
            name.to_string(),
            "/localhop/wifidirect/192.168.49.1/192.168.49.23/probe?1700000000123"
        );
        assert_eq!(ProbeName::parse(&name.to_string()).unwrap(), name);
    }

    #[test]
    fn probe_name_accepts_percent_encoded_query() {
        let parsed =
            ProbeName::parse("/localhop/wifidirect/192.168.49.1/192.168.49.23/probe%3F42").unwrap();
        assert_eq!(parsed.target, ip("192.168.49.1"));
        assert_eq!(parsed.requester, ip("192.168.49.23"));
        assert_eq!(parsed.timestamp, 42);
    }

    #[test]
    fn probe_name_rejects_foreign_names() {
        assert!(matches!(
            ProbeName::parse("/ndn/news/today"),
            Err(WireError::NotAProbe(_))
        ));
        assert!(matches!(
            ProbeName::parse("/localhop/wifidirect/192.168.49.1"),
            Err(WireError::NotAProbe(_))
        ));
        assert!(matches!(
            ProbeName::parse("/localhop/wifidirect/not-an-ip/192.168.49.2/probe?1"),
            Err(WireError::BadAddress(_))
        ));
        assert!(matches!(
            ProbeName::parse("/localhop/wifidirect/192.168.49.1/192.168.49.2/probe?soon"),
            Err(WireError::BadTimestamp(_))
        ));
    }

    #[test]
    fn decodes_advertisement_payload() {
        let ad = Advertisement::decode("2\n/news\n/weather\n").unwrap();
        assert_eq!(ad.prefixes(), ["/news", "/weather"]);
        assert_eq!(ad.encode().unwrap(), "2\n/news\n/weather\n");
    }

    #[test]
    fn empty_advertisement() {
        let ad = Advertisement::decode("0\n").unwrap();
        assert!(ad.is_empty());
        assert_eq!(Advertisement::default().encode().unwrap(), "0\n");
    }

    #[test]
    fn ignores_lines_past_the_count() {
        let ad = Advertisement::decode("1\n/a\n/b\n").unwrap();
        assert_eq!(ad.prefixes(), ["/a"]);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            Advertisement::decode(""),
            Err(WireError::BadCount(_))
        ));
        assert!(matches!(
            Advertisement::decode("two\n/a\n/b"),
            Err(WireError::BadCount(_))
        ));
        assert_eq!(
            Advertisement::decode("3\n/a\n/b"),
            Err(WireError::Truncated {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn separator_inside_prefix_cannot_be_encoded() {
        let ad = Advertisement::new(vec!["/a\n/b".into()]);
        assert!(matches!(ad.encode(), Err(WireError::SeparatorInPrefix(_))));
    }

    #[test]
    fn local_scope_is_component_aware() {
        assert!(is_local_scope("/localhop"));
        assert!(is_local_scope("/localhop/wifidirect/10.0.0.1"));
        assert!(is_local_scope("/localhost/nfd"));
        assert!(!is_local_scope("/localhopper"));
        assert!(!is_local_scope("/news"));
    }

    #[test]
    fn discovery_addr_only_matches_one_component() {
        assert_eq!(
            discovery_addr("/localhop/wifidirect/192.168.49.1"),
            Some("192.168.49.1")
        );
        assert_eq!(discovery_addr("/localhop/wifidirect"), None);
        assert_eq!(discovery_addr("/localhop/wifidirect/1.2.3.4/5.6.7.8"), None);
        assert_eq!(discovery_addr("/localhop/other/1.2.3.4"), None);
    }
}
