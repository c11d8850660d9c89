//! Build cluster access
//!
//! The [`Cluster`] trait abstracts the message transport to remote build
//! workers. [`LocalCluster`] is the in-process implementation: each node
//! is a simulated worker whose lifecycle is driven by spawned monitor
//! tasks, with outcomes injected through [`LocalCluster::report`]. All
//! progress reaches the scheduling core as [`BuildEvent`]s on one
//! channel, keeping state mutation on a single context.

#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::SessionConfig;
use crate::core::event::BuildEvent;
use crate::core::pool::NodeId;
use crate::error::FailureReason;

/// Sender half of the event channel feeding the controller
pub type EventSender = mpsc::UnboundedSender<BuildEvent>;
/// Receiver half of the event channel feeding the controller
pub type EventReceiver = mpsc::UnboundedReceiver<BuildEvent>;

/// Create the serialized event stream shared by cluster and controller
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What a worker itself reports when its build process exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReport {
    /// The build completed successfully
    Finished,
    /// The build failed for this reason
    Failed(FailureReason),
}

/// Proxy to one remote build worker
pub trait NodeProxy {
    /// Node identity
    fn id(&self) -> &NodeId;

    /// Issue a build request; returns immediately, the outcome arrives
    /// later as an event
    async fn start_build(&self, package: &str);

    /// Deliberately terminate the in-flight build; resolves to a
    /// node-abort failure rather than the worker-reported outcome
    async fn abort_build(&self);

    /// Ask the node to reset toward idle
    async fn reset(&self);
}

/// A pool of build workers reachable over some transport
pub trait Cluster {
    /// Concrete node proxy type
    type Node: NodeProxy;

    /// Enumerate the build nodes available to a session
    async fn get_build_nodes(&self) -> Vec<Self::Node>;
}

/// An in-flight simulated build
struct Inflight {
    package: String,
    /// Worker exit signal; abort and natural exit both land here
    exit_tx: oneshot::Sender<WorkerReport>,
    /// Sentinel distinguishing deliberate termination from natural exit
    aborted: Arc<AtomicBool>,
}

/// Proxy to one simulated worker
#[derive(Clone)]
pub struct LocalNode {
    id: NodeId,
    ready_delay: Duration,
    events: EventSender,
    inflight: Arc<Mutex<Option<Inflight>>>,
}

impl LocalNode {
    fn new(id: NodeId, ready_delay: Duration, events: EventSender) -> Self {
        Self {
            id,
            ready_delay,
            events,
            inflight: Arc::new(Mutex::new(None)),
        }
    }

    fn send_ready_after_delay(&self) {
        let id = self.id.clone();
        let events = self.events.clone();
        let delay = self.ready_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = events.send(BuildEvent::NodeReady { node: id });
        });
    }

    /// Inject the worker's exit report for the in-flight build
    pub async fn report(&self, report: WorkerReport) {
        if let Some(inflight) = self.inflight.lock().await.take() {
            let _ = inflight.exit_tx.send(report);
        }
    }
}

impl NodeProxy for LocalNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn start_build(&self, package: &str) {
        let (exit_tx, exit_rx) = oneshot::channel();
        let aborted = Arc::new(AtomicBool::new(false));
        *self.inflight.lock().await = Some(Inflight {
            package: package.to_string(),
            exit_tx,
            aborted: Arc::clone(&aborted),
        });
        self.send_ready_after_delay();

        // Monitor: both deliberate termination and natural exit converge
        // on the same completion signal; the sentinel resolves which
        // outcome to report.
        let id = self.id.clone();
        let events = self.events.clone();
        let package = package.to_string();
        tokio::spawn(async move {
            let report = exit_rx.await.unwrap_or(WorkerReport::Failed(FailureReason::NodeAbort));
            let event = if aborted.load(Ordering::SeqCst) {
                BuildEvent::BuildFailed {
                    node: id,
                    package,
                    reason: FailureReason::NodeAbort,
                }
            } else {
                match report {
                    WorkerReport::Finished => BuildEvent::BuildSucceeded { node: id, package },
                    WorkerReport::Failed(reason) => BuildEvent::BuildFailed {
                        node: id,
                        package,
                        reason,
                    },
                }
            };
            let _ = events.send(event);
        });
    }

    async fn abort_build(&self) {
        if let Some(inflight) = self.inflight.lock().await.take() {
            inflight.aborted.store(true, Ordering::SeqCst);
            tracing::info!(node = %self.id, package = %inflight.package, "aborting build");
            // Kill the worker; its exit converges on the monitor.
            let _ = inflight.exit_tx.send(WorkerReport::Failed(FailureReason::Package));
        }
    }

    async fn reset(&self) {
        self.inflight.lock().await.take();
        self.send_ready_after_delay();
    }
}

/// In-process simulated build cluster
///
/// Clones share the underlying nodes, so a test can keep a handle for
/// injecting worker reports after handing the cluster to a controller.
#[derive(Clone)]
pub struct LocalCluster {
    nodes: HashMap<NodeId, LocalNode>,
}

impl LocalCluster {
    /// Build a cluster with `config.slots_per_host` nodes on each host
    pub fn new(config: &SessionConfig, hosts: &[&str], events: EventSender) -> Self {
        let ready_delay = Duration::from_millis(config.node_ready_delay_ms);
        let mut nodes = HashMap::new();
        for host in hosts {
            for slot in 0..config.slots_per_host {
                let id = NodeId::new(*host, slot);
                nodes.insert(id.clone(), LocalNode::new(id, ready_delay, events.clone()));
            }
        }
        Self { nodes }
    }

    /// Inject a worker exit report for whatever `node` is building
    pub async fn report(&self, node: &NodeId, report: WorkerReport) {
        if let Some(node) = self.nodes.get(node) {
            node.report(report).await;
        }
    }

    /// The package a node is currently building, if any
    pub async fn inflight_package(&self, node: &NodeId) -> Option<String> {
        let node = self.nodes.get(node)?;
        let inflight = node.inflight.lock().await;
        inflight.as_ref().map(|build| build.package.clone())
    }

    /// Proxy for a given node
    pub fn node(&self, id: &NodeId) -> Option<&LocalNode> {
        self.nodes.get(id)
    }
}

impl Cluster for LocalCluster {
    type Node = LocalNode;

    async fn get_build_nodes(&self) -> Vec<Self::Node> {
        let mut nodes: Vec<LocalNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}
