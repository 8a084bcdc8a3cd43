//! Probe engine.
//!
//! On a fixed interval, probes every peer whose discovery prefix sits in the
//! forwarding table. Each probe runs as its own task and reports exactly one
//! [`Completion`] to a single completion task, which applies completions one
//! at a time: a response reconciles the peer's routes against its
//! advertisement, a timeout counts toward eviction.
//!
//! Stopping ends the timer loop. Probes already in flight still report, and
//! `run` returns only once the completion task has drained them, so a
//! restarted engine never shares peers with a previous completion task.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use hopsync_core::wire::{
    discovery_addr, is_local_scope, Advertisement, EndpointId, ProbeName, MAX_PROBE_TIMEOUTS,
    PROBE_INTERVAL_SECS, PROBE_TIMEOUT_MS,
};

use crate::gateway::{GatewayError, RouteOptions};
use crate::peer::TimeoutOutcome;
use crate::reconcile::{prefixes_served_by, reconcile, Reconciliation};
use crate::state::MeshContext;
use crate::transport::{ProbeOutcome, RequestTransport};

/// Outcome of one probe request, tagged with the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub probe: ProbeName,
    pub outcome: ProbeOutcome,
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReport {
    /// Not in a group, and never was since the last reset.
    Idle,
    /// Address loss observed; group state was reset.
    Disconnected,
    /// The forwarding table could not be read.
    ForwarderUnavailable,
    /// This many probes were issued.
    Probed(usize),
}

/// Slack on top of the request lifetime before the engine gives up on a
/// transport, which needs time of its own to start and report.
const COMPLETION_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_timeouts: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(PROBE_INTERVAL_SECS),
            timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
            max_timeouts: MAX_PROBE_TIMEOUTS,
        }
    }
}

/// Strictly increasing millisecond timestamps for probe names.
#[derive(Default)]
struct ProbeClock {
    last: AtomicU64,
}

impl ProbeClock {
    fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(current + 1);
            match self
                .last
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Clone)]
pub struct ProbeEngine {
    ctx: MeshContext,
    transport: Arc<dyn RequestTransport>,
    settings: ProbeSettings,
    clock: Arc<ProbeClock>,
}

impl ProbeEngine {
    pub fn new(
        ctx: MeshContext,
        transport: Arc<dyn RequestTransport>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            ctx,
            transport,
            settings,
            clock: Arc::new(ProbeClock::default()),
        }
    }

    /// Run cycles until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(self.clone().process_completions(rx));

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("probe engine shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let report = self.cycle(&tx).await;
                    tracing::debug!(?report, "probe cycle");
                }
            }
        }

        // In-flight probes hold their own senders and finish within
        // timeout + grace.
        drop(tx);
        if let Err(e) = drain.await {
            tracing::warn!(error = %e, "completion task failed");
        }
    }

    /// Apply completions until every sender is gone.
    pub async fn process_completions(self, mut rx: mpsc::UnboundedReceiver<Completion>) {
        while let Some(completion) = rx.recv().await {
            self.apply(completion).await;
        }
        tracing::debug!("completion channel closed");
    }

    // ── Cycle ─────────────────────────────────────────────────────────────────

    /// Run one probe cycle. Issued probes report on `completions`.
    pub async fn cycle(&self, completions: &mpsc::UnboundedSender<Completion>) -> CycleReport {
        let Some(own) = self.ctx.resolver.local_address() else {
            return self.observe_no_address().await;
        };
        self.ctx.state.lock().await.own_addr = Some(own);

        let entries = match self.ctx.gateway.run(|gw| gw.list_forwarding_entries()).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list forwarding entries, skipping cycle");
                return CycleReport::ForwarderUnavailable;
            }
        };

        let own_text = own.to_string();
        let targets: BTreeSet<IpAddr> = entries
            .iter()
            .filter_map(|e| discovery_addr(&e.prefix))
            .filter(|addr| *addr != own_text)
            .filter_map(|addr| addr.parse().ok())
            .collect();

        for target in &targets {
            self.issue(ProbeName::new(*target, own, self.clock.next()), completions);
        }
        CycleReport::Probed(targets.len())
    }

    fn issue(&self, probe: ProbeName, completions: &mpsc::UnboundedSender<Completion>) {
        let lifetime = self.settings.timeout;
        tracing::trace!(name = %probe, "sending probe");
        let request = self.transport.express(probe.to_string(), lifetime);
        let tx = completions.clone();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(lifetime + COMPLETION_GRACE, request)
                .await
                .unwrap_or(ProbeOutcome::Timeout);
            let _ = tx.send(Completion { probe, outcome });
        });
    }

    /// No address: either a disconnection just happened or we are idle.
    async fn observe_no_address(&self) -> CycleReport {
        let local_prefix = {
            let mut state = self.ctx.state.lock().await;
            if state.own_addr.is_none() {
                tracing::trace!("no group address, skipping cycle");
                return CycleReport::Idle;
            }
            let prefix = state.local_prefix.take();
            state.reset();
            prefix
        };
        tracing::info!("disconnection detected, resetting group state");

        if let Some(prefix) = local_prefix {
            self.ctx.unregister_local_prefix(prefix).await;
        }
        for peer in self.ctx.registry.clear().await {
            self.ctx.release_endpoint(&peer).await;
        }
        self.ctx.resume_discovery().await;
        CycleReport::Disconnected
    }

    // ── Completions ───────────────────────────────────────────────────────────

    pub async fn apply(&self, completion: Completion) {
        let target = completion.probe.target;
        match completion.outcome {
            ProbeOutcome::Response(payload) => self.on_response(target, &payload).await,
            ProbeOutcome::Timeout => self.on_timeout(target).await,
        }
    }

    async fn on_response(&self, target: IpAddr, payload: &[u8]) {
        let Some(peer) = self.ctx.registry.lookup_by_network_addr(&target).await else {
            tracing::debug!(peer = %target, "response from untracked peer");
            return;
        };
        // It answered; decode or reconciliation failures do not count against it.
        self.ctx.registry.reset_timeouts(&target).await;

        let advertisement = match std::str::from_utf8(payload)
            .map_err(|e| e.to_string())
            .and_then(|text| Advertisement::decode(text).map_err(|e| e.to_string()))
        {
            Ok(ad) => ad,
            Err(e) => {
                tracing::warn!(peer = %target, error = %e, "malformed advertisement");
                return;
            }
        };

        let Some(endpoint) = peer.endpoint else {
            tracing::warn!(peer = %target, "no endpoint toward peer, cannot reconcile");
            return;
        };

        let advertised: BTreeSet<String> = advertisement
            .to_set()
            .into_iter()
            .filter(|p| !is_local_scope(p))
            .collect();

        match self.reconcile_peer(endpoint, advertised).await {
            Ok(plan) if plan.is_empty() => {
                tracing::trace!(peer = %target, "routes already in sync");
            }
            Ok(plan) => {
                tracing::info!(
                    peer = %target,
                    endpoint,
                    registered = plan.to_register.len(),
                    unregistered = plan.to_unregister.len(),
                    "routes reconciled"
                );
            }
            Err(e) => {
                tracing::warn!(peer = %target, error = %e, "reconciliation aborted");
            }
        }
    }

    async fn reconcile_peer(
        &self,
        endpoint: EndpointId,
        advertised: BTreeSet<String>,
    ) -> Result<Reconciliation, GatewayError> {
        self.ctx
            .gateway
            .run(move |gw| {
                let entries = gw.list_forwarding_entries()?;
                let plan = reconcile(&advertised, &prefixes_served_by(&entries, endpoint));
                for prefix in &plan.to_register {
                    gw.register_prefix(endpoint, prefix, RouteOptions::PEER)?;
                }
                for prefix in &plan.to_unregister {
                    gw.unregister_prefix(endpoint, prefix)?;
                }
                Ok(plan)
            })
            .await
    }

    async fn on_timeout(&self, target: IpAddr) {
        match self
            .ctx
            .registry
            .record_timeout(&target, self.settings.max_timeouts)
            .await
        {
            TimeoutOutcome::Untracked => {
                tracing::debug!(peer = %target, "timeout for untracked peer");
            }
            TimeoutOutcome::Counted(count) => {
                tracing::debug!(peer = %target, count, "probe timed out");
            }
            TimeoutOutcome::Evicted(peer) => {
                tracing::info!(peer = %target, name = %peer.name, "peer unresponsive, evicted");
                self.ctx.release_endpoint(&peer).await;
            }
        }
    }
}
