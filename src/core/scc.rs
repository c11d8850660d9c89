//! Strongly connected components
//!
//! Tarjan's algorithm over the forward dependency graph, driven by an
//! explicit work stack rather than recursion, plus the contraction of
//! the transposed graph onto components. Two packages share a component
//! iff they are mutually reachable, i.e. they form a dependency cycle.

use std::collections::{BTreeSet, HashMap};

use crate::core::graph::BuildGraphs;
use crate::error::CycleError;

/// Result of the SCC pass: a package -> component mapping and the
/// component membership partition
#[derive(Debug, Clone, Default)]
pub struct SccAnalysis {
    node_to_scc: HashMap<String, usize>,
    members: Vec<BTreeSet<String>>,
}

/// One depth-first frame: the node and how many of its edges are done
struct Frame {
    node: String,
    edge: usize,
}

impl SccAnalysis {
    /// Run Tarjan's algorithm over the forward graph
    ///
    /// Every package receives exactly one component id. Ids are issued in
    /// completion order: a component finishes only after all components
    /// reachable through its tree descendants have finished, so for an
    /// acyclic graph every component is a singleton and dependency-closed
    /// components get the lower ids. Roots are visited in sorted name
    /// order so the assignment is deterministic. O(V+E).
    pub fn analyze(graphs: &BuildGraphs) -> Self {
        let mut analysis = Self::default();
        let mut discovery: HashMap<String, usize> = HashMap::new();
        let mut lowlink: HashMap<String, usize> = HashMap::new();
        let mut on_stack: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<String> = Vec::new();
        let mut next_discovery = 0usize;

        let mut roots: Vec<&String> = graphs.packages().collect();
        roots.sort();

        for root in roots {
            if discovery.contains_key(root) {
                continue;
            }

            let mut frames = vec![Frame {
                node: root.clone(),
                edge: 0,
            }];
            discovery.insert(root.clone(), next_discovery);
            lowlink.insert(root.clone(), next_discovery);
            next_discovery += 1;
            stack.push(root.clone());
            on_stack.insert(root.clone());

            while let Some(frame) = frames.last_mut() {
                let node = frame.node.clone();
                let deps = graphs.deps(&node);

                if let Some(next) = deps.get(frame.edge) {
                    frame.edge += 1;
                    if let Some(&seen) = discovery.get(next) {
                        // Back or cross edge: only stack members tighten
                        // the low-link.
                        if on_stack.contains(next) {
                            let low = lowlink[&node].min(seen);
                            lowlink.insert(node, low);
                        }
                    } else {
                        discovery.insert(next.clone(), next_discovery);
                        lowlink.insert(next.clone(), next_discovery);
                        next_discovery += 1;
                        stack.push(next.clone());
                        on_stack.insert(next.clone());
                        frames.push(Frame {
                            node: next.clone(),
                            edge: 0,
                        });
                    }
                } else {
                    // All edges done: close the component if this node is
                    // its own low-link root, then propagate the low-link
                    // to the parent frame.
                    if lowlink[&node] == discovery[&node] {
                        let id = analysis.members.len();
                        let mut component = BTreeSet::new();
                        while let Some(member) = stack.pop() {
                            on_stack.remove(&member);
                            analysis.node_to_scc.insert(member.clone(), id);
                            let done = member == node;
                            component.insert(member);
                            if done {
                                break;
                            }
                        }
                        analysis.members.push(component);
                    }
                    frames.pop();
                    if let Some(parent) = frames.last() {
                        let low = lowlink[&parent.node].min(lowlink[&node]);
                        lowlink.insert(parent.node.clone(), low);
                    }
                }
            }
        }

        analysis
    }

    /// Component id of `package`
    pub fn component_of(&self, package: &str) -> Option<usize> {
        self.node_to_scc.get(package).copied()
    }

    /// Members of component `id`
    pub fn members(&self, id: usize) -> Option<&BTreeSet<String>> {
        self.members.get(id)
    }

    /// Number of components
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Whether every component is a singleton
    pub fn is_acyclic(&self) -> bool {
        self.members.iter().all(|component| component.len() == 1)
    }

    /// Fail with a [`CycleError`] for the first multi-member component
    pub fn reject_cycles(&self) -> Result<(), CycleError> {
        for component in &self.members {
            if component.len() > 1 {
                return Err(CycleError {
                    members: component.iter().cloned().collect(),
                });
            }
        }
        Ok(())
    }
}

/// The transposed graph contracted onto components: a DAG over
/// component ids
#[derive(Debug, Clone, Default)]
pub struct ContractedGraph {
    edges: HashMap<usize, BTreeSet<usize>>,
}

impl ContractedGraph {
    /// Collapse GT onto components
    ///
    /// For every edge `(v, u)` of GT, adds `scc(v) -> scc(u)` unless both
    /// ends share a component (self-edges are dropped).
    pub fn build(graphs: &BuildGraphs, scc: &SccAnalysis) -> Self {
        let mut edges: HashMap<usize, BTreeSet<usize>> = HashMap::new();
        for (v, dependents) in graphs.transposed() {
            let Some(from) = scc.component_of(v) else {
                continue;
            };
            for u in dependents {
                let Some(to) = scc.component_of(u) else {
                    continue;
                };
                if from != to {
                    edges.entry(from).or_default().insert(to);
                }
            }
        }
        Self { edges }
    }

    /// Components reachable from `id` via one contracted edge
    pub fn successors(&self, id: usize) -> Option<&BTreeSet<usize>> {
        self.edges.get(&id)
    }

    /// Number of components with at least one outgoing edge
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the contracted graph has no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
