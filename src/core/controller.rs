//! Controller
//!
//! Top-level orchestrator: owns the session's graphs, queue and node
//! pool, drives dispatch, and fans change notifications out to
//! subscribers. All scheduling state lives behind one `&mut self`; the
//! event channel serializes external stimuli onto that single context.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::core::event::BuildEvent;
use crate::core::graph::BuildGraphs;
use crate::core::pool::{NodeId, NodePool, NodeState};
use crate::core::queue::BuildQueue;
use crate::core::scc::{ContractedGraph, SccAnalysis};
use crate::core::stage::BuildStage;
use crate::error::{BuildError, BuildyardError, StateError};
use crate::infra::cluster::{Cluster, EventReceiver, NodeProxy};
use crate::infra::pkgbase::PackageSource;

/// Controller FSM state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// No session
    Off,
    /// Graphs are being computed
    Computing,
    /// Session ready; dispatch is gated by the valve
    Idle,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Computing => write!(f, "computing"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Notification scope, so subscribers can skip unaffected views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Everything may have changed
    All,
    /// FSM state, valve or error flag
    State,
    /// Queue contents
    BuildQueue,
    /// Building set
    BuildingSet,
    /// Node states
    Nodes,
}

/// Receives `(source, domain)` change notifications
pub trait Notify: Send + Sync {
    /// Called after the named domain changed on `source`
    fn notify(&self, source: &str, domain: Domain);
}

/// Receives human-readable progress text
pub trait LogHandler: Send + Sync {
    /// Called with a message; `flush` marks a natural display boundary
    fn log(&self, message: &str, flush: bool);
}

/// Point-in-time copy of scheduler state for status readers
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// FSM state
    pub state: ControllerState,
    /// Architecture tag
    pub arch: String,
    /// Whether dispatch is gated open
    pub valve: bool,
    /// Whether a build error is pending
    pub error: bool,
    /// Queued packages in dequeue order
    pub queue: Vec<String>,
    /// Packages not yet dispatched or completed
    pub remaining: Vec<String>,
    /// Packages currently bound to a node
    pub building: Vec<String>,
    /// Completed packages
    pub done: Vec<String>,
    /// Failed packages
    pub failed: Vec<String>,
    /// Number of strongly connected components
    pub components: usize,
    /// Node states keyed by `host:slot`
    pub nodes: Vec<(String, NodeState)>,
}

impl SessionSnapshot {
    /// Serialize to pretty JSON for status endpoints and tooling
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Per-session structures, created by `start` and discarded by `stop`
struct Session<N> {
    graphs: BuildGraphs,
    scc: SccAnalysis,
    contracted: ContractedGraph,
    queue: BuildQueue,
    pool: NodePool,
    proxies: HashMap<NodeId, N>,
    failures: Vec<BuildError>,
}

/// The build farm controller
pub struct Controller<P: PackageSource, C: Cluster> {
    config: SessionConfig,
    pkgbase: P,
    cluster: C,
    events: EventReceiver,
    arch: String,
    state: ControllerState,
    valve: bool,
    error: bool,
    session: Option<Session<C::Node>>,
    subscribers: Vec<Arc<dyn Notify>>,
    log_handlers: Vec<Arc<dyn LogHandler>>,
}

impl<P: PackageSource, C: Cluster> Controller<P, C> {
    /// A controller in the Off state
    pub fn new(config: SessionConfig, pkgbase: P, cluster: C, events: EventReceiver) -> Self {
        let arch = config.arch.clone();
        Self {
            config,
            pkgbase,
            cluster,
            events,
            arch,
            state: ControllerState::Off,
            valve: false,
            error: false,
            session: None,
            subscribers: Vec::new(),
            log_handlers: Vec::new(),
        }
    }

    /// Current FSM state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Whether the dispatch valve is open
    pub fn valve_open(&self) -> bool {
        self.valve
    }

    /// Whether a build error is pending
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Architecture tag of the current session
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe a change receiver; re-adding one is a no-op
    pub fn subscribe(&mut self, subscriber: Arc<dyn Notify>) {
        if !self.subscribers.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
            self.subscribers.push(subscriber);
        }
    }

    /// Unsubscribe a change receiver; removing an absent one is a no-op
    pub fn unsubscribe(&mut self, subscriber: &Arc<dyn Notify>) {
        self.subscribers.retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Register a log handler; re-registering one is a no-op
    pub fn register_log_handler(&mut self, handler: Arc<dyn LogHandler>) {
        if !self.log_handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            self.log_handlers.push(handler);
        }
    }

    /// Deregister a log handler; removing an absent one is a no-op
    pub fn deregister_log_handler(&mut self, handler: &Arc<dyn LogHandler>) {
        self.log_handlers.retain(|h| !Arc::ptr_eq(h, handler));
    }

    fn notify(&self, domain: Domain) {
        for subscriber in &self.subscribers {
            subscriber.notify("controller", domain);
        }
    }

    fn log(&self, message: &str, flush: bool) {
        tracing::info!("{message}");
        for handler in &self.log_handlers {
            handler.log(message, flush);
        }
    }

    /// Start a session for `arch`
    ///
    /// Only valid from Off. Builds graphs, runs the SCC pass, seeds the
    /// queue and populates the node pool; any failure rolls back fully to
    /// Off and is reported once through the log handlers.
    pub async fn start(&mut self, arch: &str) -> Result<(), BuildyardError> {
        if self.state != ControllerState::Off {
            return Err(
                StateError::new("start", format!("the controller is {}", self.state)).into(),
            );
        }
        self.arch = arch.to_string();
        self.state = ControllerState::Computing;
        self.notify(Domain::State);

        match self.build_session().await {
            Ok(session) => {
                self.log(
                    &format!(
                        "session ready for {arch}: {} packages, {} components, {} nodes",
                        session.graphs.len(),
                        session.scc.count(),
                        session.pool.len(),
                    ),
                    true,
                );
                self.session = Some(session);
                self.state = ControllerState::Idle;
                self.notify(Domain::All);
                Ok(())
            }
            Err(error) => {
                self.session = None;
                self.valve = false;
                self.error = false;
                self.state = ControllerState::Off;
                self.log(&format!("start failed: {error}"), true);
                self.notify(Domain::State);
                Err(error)
            }
        }
    }

    async fn build_session(&self) -> Result<Session<C::Node>, BuildyardError> {
        // The consistency guard spans every package base read the graphs
        // are built from.
        let guard = self.pkgbase.lock().await;

        let packages = self.pkgbase.get_packages(&guard).await;
        let cdeps = join_all(
            packages
                .iter()
                .map(|(name, _)| self.pkgbase.get_cdeps(&guard, name)),
        )
        .await;

        let graphs = BuildGraphs::build(
            packages
                .iter()
                .cloned()
                .zip(cdeps)
                .map(|((name, version), deps)| (name, version, deps)),
        )?;

        let scc = SccAnalysis::analyze(&graphs);
        let contracted = ContractedGraph::build(&graphs, &scc);
        scc.reject_cycles()?;

        let mut already_built = BTreeSet::new();
        for (name, _) in &packages {
            if self.pkgbase.get_next_stage(&guard, name).await.is_none() {
                already_built.insert(name.clone());
            }
        }
        drop(guard);

        let queue = BuildQueue::seed(&graphs, &already_built);

        let mut pool = NodePool::new();
        let mut proxies = HashMap::new();
        for node in self.cluster.get_build_nodes().await {
            pool.insert(node.id().clone());
            proxies.insert(node.id().clone(), node);
        }

        Ok(Session {
            graphs,
            scc,
            contracted,
            queue,
            pool,
            proxies,
            failures: Vec::new(),
        })
    }

    /// Discard the session and return to Off
    ///
    /// Only valid from Idle. Already-dispatched remote builds are not
    /// awaited; their late events are dropped as stray.
    pub fn stop(&mut self) -> Result<(), BuildyardError> {
        if self.state != ControllerState::Idle {
            return Err(
                StateError::new("stop", format!("the controller is {}", self.state)).into(),
            );
        }
        self.session = None;
        self.valve = false;
        self.error = false;
        self.state = ControllerState::Off;
        self.log("session stopped", true);
        self.notify(Domain::All);
        Ok(())
    }

    /// Open the dispatch valve and schedule immediately
    pub async fn open(&mut self) -> Result<(), BuildyardError> {
        if self.state == ControllerState::Off {
            return Err(StateError::new("open", "the controller is off").into());
        }
        if self.error {
            return Err(StateError::new("open", "a build error is pending").into());
        }
        if self.valve {
            return Err(StateError::new("open", "the valve is already open").into());
        }
        self.valve = true;
        self.notify(Domain::State);
        self.schedule().await;
        Ok(())
    }

    /// Close the dispatch valve
    ///
    /// Ready packages keep accumulating in the queue; already-dispatched
    /// builds are not preempted.
    pub fn close(&mut self) -> Result<(), BuildyardError> {
        if !self.valve {
            return Err(StateError::new("close", "the valve is already closed").into());
        }
        self.valve = false;
        self.notify(Domain::State);
        Ok(())
    }

    /// Pop ready packages and bind them to idle nodes while both last
    async fn schedule(&mut self) {
        if !self.valve {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut dispatched = Vec::new();
        while !session.queue.is_empty() {
            let Some(node) = session.pool.select_idle() else {
                break;
            };
            let Some(entry) = session.queue.pop() else {
                break;
            };
            if let Err(error) = session.pool.start_build(&node, &entry.package) {
                tracing::warn!(%node, %error, "selected node refused build");
                break;
            }
            session.queue.mark_building(&entry.package);
            dispatched.push((node, entry.package));
        }

        if dispatched.is_empty() {
            return;
        }
        for (node, package) in &dispatched {
            if let Some(proxy) = self.session.as_ref().and_then(|s| s.proxies.get(node)) {
                proxy.start_build(package).await;
            }
            self.log(&format!("building {package} on {node}"), false);
        }
        self.notify(Domain::BuildQueue);
        self.notify(Domain::BuildingSet);
        self.notify(Domain::Nodes);
    }

    /// Apply one externally produced event
    ///
    /// Stray events (a node we no longer track, a transition the node's
    /// state forbids, an event for a discarded session) are logged and
    /// dropped rather than propagated.
    pub async fn handle_event(&mut self, event: BuildEvent) {
        match event {
            BuildEvent::NodeReady { node } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(error) = session.pool.ready(&node) {
                    tracing::warn!(%node, %error, "dropping stray ready event");
                    return;
                }
                self.notify(Domain::Nodes);
                self.schedule().await;
            }
            BuildEvent::BuildSucceeded { node, package } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(error) = session.pool.finish(&node) {
                    tracing::warn!(%node, %error, "dropping stray success event");
                    return;
                }
                let unblocked = session.queue.complete(&session.graphs, &package);
                let drained = session.queue.is_drained();
                let reset_ok = session.pool.reset(&node).is_ok();
                if reset_ok {
                    if let Some(proxy) = session.proxies.get(&node) {
                        proxy.reset().await;
                    }
                }

                self.log(&format!("built {package} on {node}"), false);
                if !unblocked.is_empty() {
                    self.notify(Domain::BuildQueue);
                }
                self.notify(Domain::BuildingSet);
                self.notify(Domain::Nodes);
                if drained {
                    self.log("all builds complete", true);
                }
                // Unblocked packages can go to nodes that are already
                // idle; the completing node joins in once it reports
                // ready.
                self.schedule().await;
            }
            BuildEvent::BuildFailed {
                node,
                package,
                reason,
            } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(error) = session.pool.fail(&node, reason.clone()) {
                    tracing::warn!(%node, %error, "dropping stray failure event");
                    return;
                }
                session.queue.fail(&package);
                self.error = true;
                let failure = BuildError::BuildFailed {
                    package,
                    node: node.to_string(),
                    reason,
                };
                let message = failure.to_string();
                session.failures.push(failure);
                let reset_ok = session.pool.reset(&node).is_ok();
                if reset_ok {
                    if let Some(proxy) = session.proxies.get(&node) {
                        proxy.reset().await;
                    }
                }

                self.log(&message, true);
                self.notify(Domain::State);
                self.notify(Domain::BuildingSet);
                self.notify(Domain::Nodes);
            }
        }
    }

    /// Await and apply the next event; `false` when the channel is closed
    pub async fn run_once(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Apply every event already queued, without waiting
    pub async fn drain_pending(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }
    }

    /// Deliberately terminate the in-flight build of `package`
    ///
    /// The outcome arrives later as a node-abort failure event.
    pub async fn abort_build(&mut self, package: &str) -> Result<(), BuildyardError> {
        let Some(session) = self.session.as_ref() else {
            return Err(StateError::new("abort build", "the controller is off").into());
        };
        let building = session.pool.nodes().find(|node| {
            matches!(node.state(), NodeState::Building(pkg) if pkg == package)
        });
        let Some(node) = building else {
            return Err(StateError::new(
                "abort build",
                format!("package {package} is not building"),
            )
            .into());
        };
        if let Some(proxy) = session.proxies.get(node.id()) {
            proxy.abort_build().await;
        }
        Ok(())
    }

    /// Invalidate `package` back to `stage` and cascade the invalidation
    /// transitively to dependents
    pub async fn outdate(&self, package: &str, stage: BuildStage) -> Result<(), BuildyardError> {
        let Some(session) = self.session.as_ref() else {
            return Err(StateError::new("outdate", "the controller is off").into());
        };

        let mut visited: BTreeSet<(String, BuildStage)> = BTreeSet::new();
        let mut work = vec![(package.to_string(), stage)];
        while let Some((pkg, stage)) = work.pop() {
            self.pkgbase.outdate_package(&pkg, stage).await;
            if let Some(child_stage) = self.pkgbase.compute_child_outdate(stage) {
                for dependent in session.graphs.dependents(&pkg) {
                    if visited.insert((dependent.clone(), child_stage)) {
                        work.push((dependent.clone(), child_stage));
                    }
                }
            }
        }
        Ok(())
    }

    /// Contracted component DAG of the current session
    pub fn contracted(&self) -> Option<&ContractedGraph> {
        self.session.as_ref().map(|s| &s.contracted)
    }

    /// Build failures recorded this session, in arrival order
    pub fn build_failures(&self) -> &[BuildError] {
        self.session.as_ref().map_or(&[], |s| s.failures.as_slice())
    }

    /// Point-in-time copy of scheduler state; `None` while Off
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let session = self.session.as_ref()?;
        Some(SessionSnapshot {
            state: self.state,
            arch: self.arch.clone(),
            valve: self.valve,
            error: self.error,
            queue: session.queue.queued(),
            remaining: session.queue.remaining().iter().cloned().collect(),
            building: session.queue.building().iter().cloned().collect(),
            done: session.queue.done().iter().cloned().collect(),
            failed: session.queue.failed().iter().cloned().collect(),
            components: session.scc.count(),
            nodes: session
                .pool
                .nodes()
                .map(|node| (node.id().to_string(), node.state().clone()))
                .collect(),
        })
    }
}
