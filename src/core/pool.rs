//! Build node pool
//!
//! State machines for remote build workers and the pool that owns them.
//! Transitions are validated: an action a state does not permit raises a
//! [`StateError`] and leaves the node untouched. Every applied change is
//! fanned out to pool observers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FailureReason, StateError};

/// Identity of one build slot on a host, rendered as `host:slot`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Host name
    pub host: String,
    /// Slot number on the host
    pub slot: u32,
}

impl NodeId {
    /// Build an id from host and slot
    pub fn new(host: impl Into<String>, slot: u32) -> Self {
        Self {
            host: host.into(),
            slot,
        }
    }

    /// Parse a `host:slot` string
    pub fn parse(identity: &str) -> Option<Self> {
        let (host, slot) = identity.rsplit_once(':')?;
        Some(Self {
            host: host.to_string(),
            slot: slot.parse().ok()?,
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.slot)
    }
}

/// Where a transitional busy node is headed once it reports ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusyTarget {
    /// Accepting a build for this package
    Building(String),
    /// Resetting back to idle
    Idle,
}

/// State of one build node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Ready for work
    Idle,
    /// Transitional: a request was issued, the node has not confirmed yet
    Busy(BusyTarget),
    /// Building this package
    Building(String),
    /// Last build failed
    Failed {
        package: String,
        reason: FailureReason,
    },
    /// Last build finished successfully
    Finished(String),
    /// Withdrawn from scheduling
    Maintenance,
}

impl NodeState {
    /// Whether the node counts against its host's load
    pub fn is_occupied(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Building(_))
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy(_) => "busy",
            Self::Building(_) => "building",
            Self::Failed { .. } => "failed",
            Self::Finished(_) => "finished",
            Self::Maintenance => "in maintenance",
        }
    }
}

/// One build node: identity plus validated state
#[derive(Debug, Clone)]
pub struct BuildNode {
    id: NodeId,
    state: NodeState,
}

impl BuildNode {
    /// A fresh idle node
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            state: NodeState::Idle,
        }
    }

    /// Node identity
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> &NodeState {
        &self.state
    }

    fn invalid(&self, action: &str) -> StateError {
        StateError::new(action, format!("node {} is {}", self.id, self.state.describe()))
    }

    /// Issue a build request: `Idle -> Busy(toward Building)`
    pub fn start_build(&mut self, package: &str) -> Result<(), StateError> {
        match self.state {
            NodeState::Idle => {
                self.state = NodeState::Busy(BusyTarget::Building(package.to_string()));
                Ok(())
            }
            _ => Err(self.invalid("start build")),
        }
    }

    /// The node confirmed the pending request: leave the transitional state
    pub fn ready(&mut self) -> Result<(), StateError> {
        match &self.state {
            NodeState::Busy(BusyTarget::Building(package)) => {
                self.state = NodeState::Building(package.clone());
                Ok(())
            }
            NodeState::Busy(BusyTarget::Idle) => {
                self.state = NodeState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("confirm readiness")),
        }
    }

    /// The build finished: `Building -> Finished`
    ///
    /// A result can outrun the node's ready confirmation, so the pending
    /// `Busy(toward Building)` state is accepted and collapsed too.
    pub fn finish(&mut self) -> Result<String, StateError> {
        match &self.state {
            NodeState::Building(package)
            | NodeState::Busy(BusyTarget::Building(package)) => {
                let package = package.clone();
                self.state = NodeState::Finished(package.clone());
                Ok(package)
            }
            _ => Err(self.invalid("finish build")),
        }
    }

    /// The build failed: `Building -> Failed`
    ///
    /// Accepts `Busy(toward Building)` for the same reason as [`Self::finish`].
    pub fn fail(&mut self, reason: FailureReason) -> Result<String, StateError> {
        match &self.state {
            NodeState::Building(package)
            | NodeState::Busy(BusyTarget::Building(package)) => {
                let package = package.clone();
                self.state = NodeState::Failed {
                    package: package.clone(),
                    reason,
                };
                Ok(package)
            }
            _ => Err(self.invalid("fail build")),
        }
    }

    /// Reset toward idle: `Finished | Failed | Idle -> Busy(toward Idle)`
    pub fn reset(&mut self) -> Result<(), StateError> {
        match self.state {
            NodeState::Finished(_) | NodeState::Failed { .. } | NodeState::Idle => {
                self.state = NodeState::Busy(BusyTarget::Idle);
                Ok(())
            }
            _ => Err(self.invalid("reset")),
        }
    }

    /// Withdraw from scheduling: `Idle -> Maintenance`
    pub fn enable_maintenance(&mut self) -> Result<(), StateError> {
        match self.state {
            NodeState::Idle => {
                self.state = NodeState::Maintenance;
                Ok(())
            }
            _ => Err(self.invalid("enable maintenance")),
        }
    }

    /// Return to scheduling: `Maintenance -> Idle`
    pub fn disable_maintenance(&mut self) -> Result<(), StateError> {
        match self.state {
            NodeState::Maintenance => {
                self.state = NodeState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("disable maintenance")),
        }
    }
}

/// Receives `(node, new state)` after every applied transition
pub trait NodeObserver: Send + Sync {
    /// Called with the node's identity and its new state
    fn node_changed(&self, node: &NodeId, state: &NodeState);
}

/// The pool of build nodes for one session
#[derive(Default)]
pub struct NodePool {
    nodes: BTreeMap<NodeId, BuildNode>,
    observers: Vec<Arc<dyn NodeObserver>>,
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("nodes", &self.nodes)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl NodePool {
    /// An empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an idle node
    pub fn insert(&mut self, id: NodeId) {
        self.nodes.insert(id.clone(), BuildNode::new(id));
    }

    /// Look up a node
    pub fn get(&self, id: &NodeId) -> Option<&BuildNode> {
        self.nodes.get(id)
    }

    /// All nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
        self.nodes.values()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Subscribe an observer; adding one already present is a no-op
    pub fn subscribe(&mut self, observer: Arc<dyn NodeObserver>) {
        if !self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            self.observers.push(observer);
        }
    }

    /// Unsubscribe an observer; removing an absent one is a no-op
    pub fn unsubscribe(&mut self, observer: &Arc<dyn NodeObserver>) {
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
    }

    fn apply(
        &mut self,
        id: &NodeId,
        action: &str,
        transition: impl FnOnce(&mut BuildNode) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StateError::new(action, format!("node {id} is unknown")))?;
        transition(node)?;
        let state = node.state().clone();
        for observer in &self.observers {
            observer.node_changed(id, &state);
        }
        Ok(())
    }

    /// Issue a build request to a node
    pub fn start_build(&mut self, id: &NodeId, package: &str) -> Result<(), StateError> {
        self.apply(id, "start build", |node| node.start_build(package))
    }

    /// A node confirmed its pending request
    pub fn ready(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.apply(id, "confirm readiness", BuildNode::ready)
    }

    /// A node reported build success; returns the package
    pub fn finish(&mut self, id: &NodeId) -> Result<String, StateError> {
        let mut package = String::new();
        self.apply(id, "finish build", |node| {
            package = node.finish()?;
            Ok(())
        })?;
        Ok(package)
    }

    /// A node reported build failure; returns the package
    pub fn fail(&mut self, id: &NodeId, reason: FailureReason) -> Result<String, StateError> {
        let mut package = String::new();
        self.apply(id, "fail build", |node| {
            package = node.fail(reason.clone())?;
            Ok(())
        })?;
        Ok(package)
    }

    /// Reset a node toward idle
    pub fn reset(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.apply(id, "reset", BuildNode::reset)
    }

    /// Withdraw a node from scheduling
    pub fn enable_maintenance(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.apply(id, "enable maintenance", BuildNode::enable_maintenance)
    }

    /// Return a node to scheduling
    pub fn disable_maintenance(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.apply(id, "disable maintenance", BuildNode::disable_maintenance)
    }

    /// Ids of all idle nodes
    pub fn idle_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| *node.state() == NodeState::Idle)
            .map(|node| node.id().clone())
            .collect()
    }

    /// Pick the best idle node: the one on the least-loaded host
    ///
    /// Load is the occupied/total ratio per host; ties break on host name
    /// then slot. Returns `None` when no node is idle, never a sentinel
    /// index.
    pub fn select_idle(&self) -> Option<NodeId> {
        let mut load: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
        for node in self.nodes.values() {
            let entry = load.entry(node.id().host.as_str()).or_insert((0, 0));
            entry.1 += 1;
            if node.state().is_occupied() {
                entry.0 += 1;
            }
        }

        self.idle_nodes()
            .into_iter()
            .min_by(|a, b| {
                let ratio = |id: &NodeId| {
                    let (occupied, total) = load[id.host.as_str()];
                    f64::from(occupied) / f64::from(total)
                };
                ratio(a)
                    .total_cmp(&ratio(b))
                    .then_with(|| a.cmp(b))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_node_id_round_trip() {
        let id = NodeId::new("builder1", 3);
        assert_eq!(id.to_string(), "builder1:3");
        assert_eq!(NodeId::parse("builder1:3"), Some(id));
        assert_eq!(NodeId::parse("garbage"), None);
    }

    #[test]
    fn test_build_lifecycle() {
        let mut node = BuildNode::new(NodeId::new("h", 0));
        node.start_build("pkg").unwrap();
        assert!(matches!(node.state(), NodeState::Busy(_)));
        node.ready().unwrap();
        assert_eq!(node.state(), &NodeState::Building("pkg".to_string()));
        assert_eq!(node.finish().unwrap(), "pkg");
        assert_eq!(node.state(), &NodeState::Finished("pkg".to_string()));
    }

    #[test]
    fn test_reset_goes_through_busy() {
        let mut node = BuildNode::new(NodeId::new("h", 0));
        node.start_build("pkg").unwrap();
        node.ready().unwrap();
        node.fail(FailureReason::Package).unwrap();
        node.reset().unwrap();
        assert_eq!(node.state(), &NodeState::Busy(BusyTarget::Idle));
        node.ready().unwrap();
        assert_eq!(node.state(), &NodeState::Idle);
    }

    #[test]
    fn test_result_before_ready_collapses_busy() {
        let mut node = BuildNode::new(NodeId::new("h", 0));
        node.start_build("pkg").unwrap();
        // The worker's result outruns the ready confirmation.
        assert_eq!(node.finish().unwrap(), "pkg");
        assert_eq!(node.state(), &NodeState::Finished("pkg".to_string()));

        let mut node = BuildNode::new(NodeId::new("h", 1));
        node.start_build("pkg").unwrap();
        assert_eq!(node.fail(FailureReason::Package).unwrap(), "pkg");
        assert!(matches!(node.state(), NodeState::Failed { .. }));
    }

    #[test]
    fn test_invalid_transition_preserves_state() {
        let mut node = BuildNode::new(NodeId::new("h", 0));
        node.start_build("pkg").unwrap();
        let err = node.start_build("other").unwrap_err();
        assert!(err.to_string().contains("busy"));
        assert_eq!(
            node.state(),
            &NodeState::Busy(BusyTarget::Building("pkg".to_string()))
        );
    }

    #[test]
    fn test_maintenance_only_from_idle() {
        let mut node = BuildNode::new(NodeId::new("h", 0));
        node.enable_maintenance().unwrap();
        assert!(node.start_build("pkg").is_err());
        node.disable_maintenance().unwrap();
        node.start_build("pkg").unwrap();
    }

    #[test]
    fn test_selection_prefers_less_loaded_host() {
        let mut pool = NodePool::new();
        pool.insert(NodeId::new("hosta", 0));
        pool.insert(NodeId::new("hosta", 1));
        pool.insert(NodeId::new("hostb", 0));
        // hosta: 1 of 2 occupied, hostb: 0 of 1.
        pool.start_build(&NodeId::new("hosta", 0), "pkg").unwrap();

        assert_eq!(pool.select_idle(), Some(NodeId::new("hostb", 0)));
    }

    #[test]
    fn test_selection_none_when_no_idle_node() {
        let mut pool = NodePool::new();
        pool.insert(NodeId::new("h", 0));
        pool.start_build(&NodeId::new("h", 0), "pkg").unwrap();
        assert_eq!(pool.select_idle(), None);
    }

    struct Recorder(Mutex<Vec<(NodeId, NodeState)>>);

    impl NodeObserver for Recorder {
        fn node_changed(&self, node: &NodeId, state: &NodeState) {
            self.0.lock().unwrap().push((node.clone(), state.clone()));
        }
    }

    #[test]
    fn test_observers_see_every_transition() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut pool = NodePool::new();
        pool.insert(NodeId::new("h", 0));
        pool.subscribe(recorder.clone());
        // A second subscribe of the same observer is a no-op.
        pool.subscribe(recorder.clone());

        pool.start_build(&NodeId::new("h", 0), "pkg").unwrap();
        pool.ready(&NodeId::new("h", 0)).unwrap();

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, NodeState::Building("pkg".to_string()));
    }

    #[test]
    fn test_unsubscribe_absent_observer_is_noop() {
        let recorder: Arc<dyn NodeObserver> = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut pool = NodePool::new();
        pool.unsubscribe(&recorder);
        pool.subscribe(Arc::clone(&recorder));
        pool.unsubscribe(&recorder);
        pool.unsubscribe(&recorder);
    }
}
