//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid package name (lowercase alphanumeric with hyphens)
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a version string, optionally with an alphabetic suffix
    pub fn version_string() -> impl Strategy<Value = String> {
        (1u32..100, 0u32..100, proptest::option::of("[a-z]"))
            .prop_map(|(major, minor, suffix)| match suffix {
                Some(s) => format!("{major}.{minor}{s}"),
                None => format!("{major}.{minor}"),
            })
    }

    /// Generate a valid hostname
    pub fn hostname() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,20}[a-z0-9]?".prop_filter("Hostname must not be empty", |s| !s.is_empty())
    }

    /// Generate a small acyclic adjacency list over numbered packages
    ///
    /// Edges only point from higher-numbered packages to lower-numbered
    /// ones, so the result never contains a cycle.
    pub fn acyclic_package_set() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
        (2usize..12).prop_flat_map(|count| {
            let deps = (0..count)
                .map(|i| proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i))
                .collect::<Vec<_>>();
            deps.prop_map(move |deps| {
                deps.into_iter()
                    .enumerate()
                    .map(|(i, dep_ids)| {
                        (
                            format!("pkg{i}"),
                            dep_ids.into_iter().map(|d| format!("pkg{d}")).collect(),
                        )
                    })
                    .collect()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    use crate::config::defaults::MIN_PROPTEST_ITERATIONS;
    use crate::core::graph::{BuildGraphs, CompileDep};
    use crate::core::queue::BuildQueue;
    use crate::core::scc::SccAnalysis;
    use crate::core::version::Version;

    fn graphs_of(packages: &[(String, Vec<String>)]) -> BuildGraphs {
        BuildGraphs::build(packages.iter().map(|(name, deps)| {
            (
                name.clone(),
                Version::new("1.0"),
                deps.iter().map(|d| CompileDep::unconstrained(d.clone())).collect(),
            )
        }))
        .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(MIN_PROPTEST_ITERATIONS))]

        #[test]
        fn prop_generated_names_are_wellformed(name in package_name()) {
            prop_assert!(name.chars().next().unwrap().is_ascii_lowercase());
        }

        #[test]
        fn prop_versions_totally_ordered(a in version_string(), b in version_string()) {
            let (va, vb) = (Version::new(a), Version::new(b));
            let forward = va.cmp(&vb);
            prop_assert_eq!(vb.cmp(&va), forward.reverse());
        }

        #[test]
        fn prop_acyclic_sets_have_singleton_components(packages in acyclic_package_set()) {
            let graphs = graphs_of(&packages);
            let scc = SccAnalysis::analyze(&graphs);
            prop_assert!(scc.is_acyclic());
            prop_assert_eq!(scc.count(), packages.len());
        }

        #[test]
        fn prop_initial_queue_is_exactly_the_leaves(packages in acyclic_package_set()) {
            let graphs = graphs_of(&packages);
            let queue = BuildQueue::seed(&graphs, &BTreeSet::new());
            let queued: BTreeSet<String> = queue.queued().into_iter().collect();
            let leaves: BTreeSet<String> = packages
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| name.clone())
                .collect();
            prop_assert_eq!(queued, leaves);
        }

        #[test]
        fn prop_transpose_preserves_edge_count(packages in acyclic_package_set()) {
            let graphs = graphs_of(&packages);
            let forward: usize = graphs.forward().values().map(Vec::len).sum();
            let transposed: usize = graphs.transposed().values().map(Vec::len).sum();
            prop_assert_eq!(forward, transposed);
        }
    }
}
