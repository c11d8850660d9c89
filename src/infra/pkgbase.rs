//! Package base access
//!
//! The [`PackageSource`] trait abstracts the persistent package and
//! attribute storage this engine schedules against. Implementations are
//! selected by construction, never by runtime type inspection.
//! [`MemoryPackageSource`] is the in-process implementation used by the
//! simulated farm and by tests.

#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::core::graph::CompileDep;
use crate::core::stage::BuildStage;
use crate::core::version::Version;

/// Read access to the package base
///
/// `lock` returns a scoped read-consistency guard and every snapshot
/// accessor reads through it, so the graph is built against one
/// consistent view of the package base. Reads never re-acquire the
/// underlying lock; a writer queued behind the guard waits, it does not
/// wedge the reads in front of it.
pub trait PackageSource {
    /// RAII read-consistency guard
    type Guard: Send;

    /// Acquire the read-consistency guard
    async fn lock(&self) -> Self::Guard;

    /// All packages with their selected versions
    async fn get_packages(&self, guard: &Self::Guard) -> Vec<(String, Version)>;

    /// Compile-time dependencies of `package`
    async fn get_cdeps(&self, guard: &Self::Guard, package: &str) -> Vec<CompileDep>;

    /// The next stage `package` needs, or `None` when fully built
    async fn get_next_stage(&self, guard: &Self::Guard, package: &str) -> Option<BuildStage>;

    /// Invalidate `package` back to `stage`
    async fn outdate_package(&self, package: &str, stage: BuildStage);

    /// The stage direct dependents must be invalidated to when a package
    /// is invalidated to `stage`
    fn compute_child_outdate(&self, stage: BuildStage) -> Option<BuildStage>;
}

/// One package base entry; opaque outside this module but visible in
/// the [`MemoryPackageSource`] guard type
#[derive(Debug, Clone)]
pub struct PackageRecord {
    version: Version,
    cdeps: Vec<CompileDep>,
    next_stage: Option<BuildStage>,
}

/// In-memory package base
#[derive(Debug, Clone, Default)]
pub struct MemoryPackageSource {
    records: Arc<RwLock<HashMap<String, PackageRecord>>>,
}

impl MemoryPackageSource {
    /// An empty package base
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package needing a full build
    pub async fn add_package(
        &self,
        name: impl Into<String>,
        version: impl Into<Version>,
        cdeps: Vec<CompileDep>,
    ) {
        self.add_package_at(name, version, cdeps, Some(BuildStage::Configure))
            .await;
    }

    /// Add a package at an explicit next stage (`None` = already built)
    pub async fn add_package_at(
        &self,
        name: impl Into<String>,
        version: impl Into<Version>,
        cdeps: Vec<CompileDep>,
        next_stage: Option<BuildStage>,
    ) {
        self.records.write().await.insert(
            name.into(),
            PackageRecord {
                version: version.into(),
                cdeps,
                next_stage,
            },
        );
    }

    /// Mark a package fully built
    pub async fn mark_built(&self, name: &str) {
        if let Some(record) = self.records.write().await.get_mut(name) {
            record.next_stage = None;
        }
    }
}

impl PackageSource for MemoryPackageSource {
    type Guard = OwnedRwLockReadGuard<HashMap<String, PackageRecord>>;

    async fn lock(&self) -> Self::Guard {
        Arc::clone(&self.records).read_owned().await
    }

    async fn get_packages(&self, guard: &Self::Guard) -> Vec<(String, Version)> {
        let mut packages: Vec<(String, Version)> = guard
            .iter()
            .map(|(name, record)| (name.clone(), record.version.clone()))
            .collect();
        packages.sort();
        packages
    }

    async fn get_cdeps(&self, guard: &Self::Guard, package: &str) -> Vec<CompileDep> {
        guard
            .get(package)
            .map(|record| record.cdeps.clone())
            .unwrap_or_default()
    }

    async fn get_next_stage(&self, guard: &Self::Guard, package: &str) -> Option<BuildStage> {
        guard.get(package)?.next_stage
    }

    async fn outdate_package(&self, package: &str, stage: BuildStage) {
        if let Some(record) = self.records.write().await.get_mut(package) {
            record.next_stage = Some(match record.next_stage {
                Some(current) => current.min(stage),
                None => stage,
            });
        }
    }

    fn compute_child_outdate(&self, stage: BuildStage) -> Option<BuildStage> {
        stage.child_outdate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_packages_listed_in_name_order() {
        let source = MemoryPackageSource::new();
        source.add_package("zlib", "1.3", vec![]).await;
        source.add_package("bash", "5.2", vec![]).await;

        let guard = source.lock().await;
        let names: Vec<String> = source
            .get_packages(&guard)
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["bash", "zlib"]);
    }

    #[tokio::test]
    async fn test_outdate_keeps_earliest_stage() {
        let source = MemoryPackageSource::new();
        source
            .add_package_at("pkg", "1.0", vec![], None)
            .await;

        source.outdate_package("pkg", BuildStage::Build).await;
        let guard = source.lock().await;
        assert_eq!(
            source.get_next_stage(&guard, "pkg").await,
            Some(BuildStage::Build)
        );
        drop(guard);

        source.outdate_package("pkg", BuildStage::Configure).await;
        source.outdate_package("pkg", BuildStage::Finished).await;
        let guard = source.lock().await;
        assert_eq!(
            source.get_next_stage(&guard, "pkg").await,
            Some(BuildStage::Configure)
        );
    }

    #[tokio::test]
    async fn test_guard_reads_proceed_past_queued_writer() {
        let source = MemoryPackageSource::new();
        source.add_package("pkg", "1.0", vec![]).await;

        let guard = source.lock().await;
        // Queue a writer behind the guard. The rwlock is fair, so a
        // read that re-acquired it here would wedge behind the writer.
        let writer = {
            let source = source.clone();
            tokio::spawn(async move {
                source.add_package("late", "1.0", vec![]).await;
            })
        };
        tokio::task::yield_now().await;

        let packages = tokio::time::timeout(
            Duration::from_millis(500),
            source.get_packages(&guard),
        )
        .await
        .expect("guard reads must not wait on the queued writer");
        assert_eq!(packages.len(), 1);
        assert_eq!(source.get_cdeps(&guard, "pkg").await, vec![]);

        drop(guard);
        writer.await.unwrap();
        let guard = source.lock().await;
        assert_eq!(source.get_packages(&guard).await.len(), 2);
    }
}
