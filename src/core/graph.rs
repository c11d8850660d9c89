//! Dependency graph construction
//!
//! Builds the forward adjacency graph G (package -> dependencies), its
//! exact transpose GT (package -> direct dependents), and the
//! name -> version map for one scheduling session.

use std::collections::HashMap;

use crate::core::version::Version;
use crate::error::GraphError;

/// A compile-time dependency as exposed by the package base
///
/// The caller has already selected one concrete version per package;
/// `constraint`, when present, is only checked against that selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDep {
    /// Required package name
    pub name: String,
    /// Optional version constraint the selected version must satisfy
    pub constraint: Option<String>,
}

impl CompileDep {
    /// A dependency on `name` with no version constraint
    pub fn unconstrained(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }
}

/// Forward graph, transposed graph and version map for a package set
#[derive(Debug, Clone, Default)]
pub struct BuildGraphs {
    /// G: package -> ordered required package names
    forward: HashMap<String, Vec<String>>,
    /// GT: package -> package names that directly depend on it
    transposed: HashMap<String, Vec<String>>,
    /// Selected version per package
    versions: HashMap<String, Version>,
}

impl BuildGraphs {
    /// Build G, GT and the version map from a package enumeration
    ///
    /// `packages` yields `(name, version, cdeps)` triples. Fails with a
    /// configuration error naming both packages if a required name is not
    /// itself in the package set, or if a constrained dependency's
    /// selected version does not satisfy the constraint. O(V+E).
    pub fn build(
        packages: impl IntoIterator<Item = (String, Version, Vec<CompileDep>)>,
    ) -> Result<Self, GraphError> {
        let mut forward = HashMap::new();
        let mut versions = HashMap::new();
        let mut cdeps = Vec::new();

        for (name, version, deps) in packages {
            if versions.insert(name.clone(), version).is_some() {
                return Err(GraphError::DuplicatePackage { name });
            }
            forward.insert(name.clone(), Vec::with_capacity(deps.len()));
            cdeps.push((name, deps));
        }

        let mut transposed: HashMap<String, Vec<String>> = versions
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();

        for (name, deps) in cdeps {
            for dep in deps {
                let Some(version) = versions.get(&dep.name) else {
                    return Err(GraphError::MissingDependency {
                        package: name,
                        dependency: dep.name,
                    });
                };
                if let Some(constraint) = &dep.constraint {
                    if !version.satisfies(constraint) {
                        return Err(GraphError::UnsatisfiedConstraint {
                            package: name,
                            dependency: dep.name,
                            version: version.to_string(),
                            constraint: constraint.clone(),
                        });
                    }
                }
                transposed.entry(dep.name.clone()).or_default().push(name.clone());
                forward.entry(name.clone()).or_default().push(dep.name);
            }
        }

        Ok(Self {
            forward,
            transposed,
            versions,
        })
    }

    /// Dependencies of `package` (G adjacency)
    pub fn deps(&self, package: &str) -> &[String] {
        self.forward.get(package).map_or(&[], Vec::as_slice)
    }

    /// Direct dependents of `package` (GT adjacency)
    pub fn dependents(&self, package: &str) -> &[String] {
        self.transposed.get(package).map_or(&[], Vec::as_slice)
    }

    /// Number of direct dependents of `package`
    pub fn fanout(&self, package: &str) -> usize {
        self.dependents(package).len()
    }

    /// Selected version of `package`
    pub fn version(&self, package: &str) -> Option<&Version> {
        self.versions.get(package)
    }

    /// All package names
    pub fn packages(&self) -> impl Iterator<Item = &String> {
        self.forward.keys()
    }

    /// Number of packages
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the graph is empty
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// The forward adjacency map
    pub fn forward(&self) -> &HashMap<String, Vec<String>> {
        &self.forward
    }

    /// The transposed adjacency map
    pub fn transposed(&self) -> &HashMap<String, Vec<String>> {
        &self.transposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, deps: &[&str]) -> (String, Version, Vec<CompileDep>) {
        (
            name.to_string(),
            Version::new("1.0.0"),
            deps.iter().map(|d| CompileDep::unconstrained(*d)).collect(),
        )
    }

    #[test]
    fn test_chain_graph_and_transpose() {
        let graphs =
            BuildGraphs::build([pkg("a", &["b"]), pkg("b", &["c"]), pkg("c", &[])]).unwrap();

        assert_eq!(graphs.deps("a"), &["b".to_string()]);
        assert_eq!(graphs.deps("b"), &["c".to_string()]);
        assert!(graphs.deps("c").is_empty());

        assert!(graphs.dependents("a").is_empty());
        assert_eq!(graphs.dependents("b"), &["a".to_string()]);
        assert_eq!(graphs.dependents("c"), &["b".to_string()]);
    }

    #[test]
    fn test_missing_dependency_names_both_packages() {
        let err = BuildGraphs::build([pkg("a", &["z"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                package: "a".to_string(),
                dependency: "z".to_string(),
            }
        );
        let message = err.to_string();
        assert!(message.contains('a') && message.contains('z'));
    }

    #[test]
    fn test_unsatisfied_constraint_rejected() {
        let packages = [
            (
                "app".to_string(),
                Version::new("1.0.0"),
                vec![CompileDep {
                    name: "lib".to_string(),
                    constraint: Some(">=2.0.0".to_string()),
                }],
            ),
            ("lib".to_string(), Version::new("1.5.0"), vec![]),
        ];
        let err = BuildGraphs::build(packages).unwrap_err();
        assert!(matches!(err, GraphError::UnsatisfiedConstraint { .. }));
    }

    #[test]
    fn test_fanout_counts_direct_dependents() {
        let graphs = BuildGraphs::build([
            pkg("a", &["lib"]),
            pkg("b", &["lib"]),
            pkg("lib", &[]),
        ])
        .unwrap();
        assert_eq!(graphs.fanout("lib"), 2);
        assert_eq!(graphs.fanout("a"), 0);
    }

    #[test]
    fn test_duplicate_package_rejected() {
        let err = BuildGraphs::build([pkg("a", &[]), pkg("a", &[])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePackage { .. }));
    }
}
