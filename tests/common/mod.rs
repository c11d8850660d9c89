//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: a farm
//! harness wiring a memory package base and a simulated cluster into a
//! controller, plus recorders for notifications and log output.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::{Mutex, Once};
use std::time::Duration;

use buildyard::core::controller::{Controller, Domain, LogHandler, Notify};
use buildyard::core::graph::CompileDep;
use buildyard::core::pool::{NodeId, NodeState};
use buildyard::core::stage::BuildStage;
use buildyard::infra::cluster::{event_channel, LocalCluster, WorkerReport};
use buildyard::infra::pkgbase::{MemoryPackageSource, PackageSource};
use buildyard::SessionConfig;

static TRACING: Once = Once::new();

/// Install a tracing subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A controller wired to a memory package base and a simulated cluster
pub struct Farm {
    pub controller: Controller<MemoryPackageSource, LocalCluster>,
    pub cluster: LocalCluster,
    pub source: MemoryPackageSource,
}

impl Farm {
    /// Build a farm with the given hosts and one slot per host
    pub fn new(hosts: &[&str]) -> Self {
        Self::with_slots(hosts, 1)
    }

    /// Build a farm with the given hosts and `slots` slots per host
    pub fn with_slots(hosts: &[&str], slots: u32) -> Self {
        init_tracing();
        let config = SessionConfig {
            node_ready_delay_ms: 0,
            slots_per_host: slots,
            ..SessionConfig::default()
        };
        let (tx, rx) = event_channel();
        let cluster = LocalCluster::new(&config, hosts, tx);
        let source = MemoryPackageSource::new();
        let controller = Controller::new(config, source.clone(), cluster.clone(), rx);
        Self {
            controller,
            cluster,
            source,
        }
    }

    /// Add a package needing a full build
    pub async fn add_package(&self, name: &str, deps: &[&str]) {
        self.source
            .add_package(
                name,
                "1.0",
                deps.iter().map(|d| CompileDep::unconstrained(*d)).collect(),
            )
            .await;
    }

    /// The next stage a package needs, read under a consistency guard
    pub async fn next_stage(&self, package: &str) -> Option<BuildStage> {
        let guard = self.source.lock().await;
        self.source.get_next_stage(&guard, package).await
    }

    /// Report a worker outcome for every node currently building
    pub async fn report_building(&self, report: WorkerReport) {
        let Some(snapshot) = self.controller.snapshot() else {
            return;
        };
        for (node, state) in &snapshot.nodes {
            if matches!(state, NodeState::Building(_)) {
                let id = NodeId::parse(node).expect("well-formed node id");
                self.cluster.report(&id, report.clone()).await;
            }
        }
    }

    /// Drive the farm until no package is remaining or building,
    /// acknowledging every build with `report`
    pub async fn drive(&mut self, report: WorkerReport) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                let snapshot = self.controller.snapshot().expect("session present");
                if snapshot.remaining.is_empty() && snapshot.building.is_empty() {
                    break;
                }
                if snapshot.building.is_empty() && snapshot.queue.is_empty() {
                    // Blocked: nothing in flight and nothing ready.
                    break;
                }
                self.report_building(report.clone()).await;
                assert!(self.controller.run_once().await, "event channel closed");
            }
        })
        .await
        .expect("farm did not settle within the deadline");
    }

    /// Drive the farm to completion, acknowledging every build as
    /// successful
    pub async fn build_all(&mut self) {
        self.drive(WorkerReport::Finished).await;
    }
}

/// Records every `(source, domain)` notification
#[derive(Default)]
pub struct NotifyRecorder(pub Mutex<Vec<Domain>>);

impl Notify for NotifyRecorder {
    fn notify(&self, _source: &str, domain: Domain) {
        self.0.lock().unwrap().push(domain);
    }
}

/// Records every log line with its flush flag
#[derive(Default)]
pub struct LogRecorder(pub Mutex<Vec<(String, bool)>>);

impl LogHandler for LogRecorder {
    fn log(&self, message: &str, flush: bool) {
        self.0.lock().unwrap().push((message.to_string(), flush));
    }
}

impl LogRecorder {
    /// Messages captured so far
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }
}
