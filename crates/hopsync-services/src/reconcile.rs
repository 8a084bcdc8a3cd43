//! Prefix reconciliation.
//!
//! Turns "what a peer advertises" and "what we route toward it" into the
//! register and unregister calls that make the two agree. Pure set
//! arithmetic; the probe engine does all I/O around it.

use std::collections::BTreeSet;

use hopsync_core::wire::{is_local_scope, EndpointId};

use crate::gateway::FibEntry;

/// Changes that bring a peer's routes in line with its advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_register: BTreeSet<String>,
    pub to_unregister: BTreeSet<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_register.is_empty() && self.to_unregister.is_empty()
    }
}

/// `(advertised − registered, registered − advertised)`.
pub fn reconcile(advertised: &BTreeSet<String>, registered: &BTreeSet<String>) -> Reconciliation {
    Reconciliation {
        to_register: advertised.difference(registered).cloned().collect(),
        to_unregister: registered.difference(advertised).cloned().collect(),
    }
}

/// Prefixes currently routed toward `endpoint`, local scopes excluded.
pub fn prefixes_served_by(entries: &[FibEntry], endpoint: EndpointId) -> BTreeSet<String> {
    entries
        .iter()
        .filter(|e| e.next_hops.contains(&endpoint))
        .filter(|e| !is_local_scope(&e.prefix))
        .map(|e| e.prefix.clone())
        .collect()
}
