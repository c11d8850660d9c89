//! Build queue
//!
//! Priority-ordered queue of dispatch-ready packages plus the remaining /
//! building / done / failed bookkeeping for one session. Priorities favor
//! packages that unblock the most downstream work: priority = 1/fanout,
//! lower keys dequeue first. Ties break deterministically on package name.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};

use crate::core::graph::BuildGraphs;

/// A queued dispatch-ready package
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// 1 / fanout; lower dequeues first
    pub priority: f64,
    /// Package name; secondary order key
    pub package: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| self.package.cmp(&other.package))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dispatch queue and per-session package bookkeeping
///
/// Invariants: the remaining and building sets are disjoint, and every
/// queued package is in the remaining set.
#[derive(Debug, Default)]
pub struct BuildQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    queued: BTreeSet<String>,
    remaining: BTreeSet<String>,
    building: BTreeSet<String>,
    done: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl BuildQueue {
    /// Seed the queue from freshly built graphs
    ///
    /// Packages in `already_built` (no next stage) count as done without
    /// being dispatched. Everything else is remaining, and a remaining
    /// package whose dependencies are all done is enqueued immediately;
    /// for a fresh package base that is exactly the set with an empty
    /// dependency list.
    pub fn seed(graphs: &BuildGraphs, already_built: &BTreeSet<String>) -> Self {
        let mut queue = Self::default();
        for package in graphs.packages() {
            if already_built.contains(package) {
                queue.done.insert(package.clone());
            } else {
                queue.remaining.insert(package.clone());
            }
        }
        let ready: Vec<String> = queue
            .remaining
            .iter()
            .filter(|package| queue.deps_done(graphs, package))
            .cloned()
            .collect();
        for package in ready {
            queue.enqueue(graphs, &package);
        }
        queue
    }

    fn deps_done(&self, graphs: &BuildGraphs, package: &str) -> bool {
        graphs.deps(package).iter().all(|dep| self.done.contains(dep))
    }

    /// Enqueue a remaining package at priority 1/fanout
    ///
    /// No-op for packages that are not remaining or already queued, so
    /// the queue stays a subset of the remaining set.
    pub fn enqueue(&mut self, graphs: &BuildGraphs, package: &str) {
        if !self.remaining.contains(package) || !self.queued.insert(package.to_string()) {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let priority = 1.0 / graphs.fanout(package) as f64;
        self.heap.push(Reverse(QueueEntry {
            priority,
            package: package.to_string(),
        }));
    }

    /// Pop the lowest-key entry
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let Reverse(entry) = self.heap.pop()?;
        self.queued.remove(&entry.package);
        Some(entry)
    }

    /// Bind a popped package to a node: it leaves the remaining set and
    /// enters the building set
    pub fn mark_building(&mut self, package: &str) {
        self.remaining.remove(package);
        self.building.insert(package.to_string());
    }

    /// Record a successful build and enqueue every direct dependent whose
    /// dependencies are now all done
    ///
    /// Returns the newly enqueued packages.
    pub fn complete(&mut self, graphs: &BuildGraphs, package: &str) -> Vec<String> {
        self.building.remove(package);
        self.done.insert(package.to_string());

        let mut unblocked = Vec::new();
        for dependent in graphs.dependents(package) {
            if self.remaining.contains(dependent)
                && !self.queued.contains(dependent)
                && self.deps_done(graphs, dependent)
            {
                self.enqueue(graphs, dependent);
                unblocked.push(dependent.clone());
            }
        }
        unblocked
    }

    /// Record a failed build
    ///
    /// Dependents are never enqueued; the failed subtree stays blocked
    /// for the rest of the session.
    pub fn fail(&mut self, package: &str) {
        self.building.remove(package);
        self.failed.insert(package.to_string());
    }

    /// Number of queued packages
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued packages in dequeue order
    pub fn queued(&self) -> Vec<String> {
        let mut entries: Vec<&QueueEntry> = self.heap.iter().map(|Reverse(e)| e).collect();
        entries.sort();
        entries.iter().map(|e| e.package.clone()).collect()
    }

    /// Packages not yet dispatched or completed
    pub fn remaining(&self) -> &BTreeSet<String> {
        &self.remaining
    }

    /// Packages currently bound to a node
    pub fn building(&self) -> &BTreeSet<String> {
        &self.building
    }

    /// Successfully completed packages
    pub fn done(&self) -> &BTreeSet<String> {
        &self.done
    }

    /// Failed packages
    pub fn failed(&self) -> &BTreeSet<String> {
        &self.failed
    }

    /// Whether every package has left the remaining and building sets
    pub fn is_drained(&self) -> bool {
        self.remaining.is_empty() && self.building.is_empty()
    }
}
