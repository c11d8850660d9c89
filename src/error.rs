//! Error types for buildyard
//!
//! Domain-specific error types using thiserror.

use thiserror::Error;

/// Dependency graph construction errors
///
/// These are configuration errors: they abort the whole scheduling
/// session before any node is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A required dependency is not part of the package set
    #[error("Missing dependency: '{dependency}' required by '{package}'")]
    MissingDependency { package: String, dependency: String },

    /// The selected version of a dependency does not satisfy a constraint
    #[error("Dependency '{dependency}' of '{package}' at version {version} does not satisfy '{constraint}'")]
    UnsatisfiedConstraint {
        package: String,
        dependency: String,
        version: String,
        constraint: String,
    },

    /// A package appears more than once in the package set
    #[error("Duplicate package '{name}' in package set")]
    DuplicatePackage { name: String },
}

/// A dependency cycle that the scheduler refuses to order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dependency cycle among packages: {}", members.join(", "))]
pub struct CycleError {
    /// Members of the offending strongly connected component
    pub members: Vec<String>,
}

/// An action requested in a state that forbids it
///
/// Raised synchronously to the caller; no state mutation occurs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot {action} while {state}")]
pub struct StateError {
    /// The rejected action, e.g. "open"
    pub action: String,
    /// The state that rejected it, e.g. "the valve is already open"
    pub state: String,
}

impl StateError {
    pub(crate) fn new(action: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            state: state.into(),
        }
    }
}

/// Why a build on a node failed
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureReason {
    /// The worker process was killed or crashed
    NodeAbort,
    /// The build logic itself failed
    Package,
    /// A transient node condition; the build may be retried
    NodeTryAgain,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeAbort => write!(f, "node-abort"),
            Self::Package => write!(f, "package"),
            Self::NodeTryAgain => write!(f, "node-try-again"),
        }
    }
}

/// Build errors reported per package
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Build failed on a node
    #[error("Build failed for package '{package}' on node '{node}': {reason}")]
    BuildFailed {
        package: String,
        node: String,
        reason: FailureReason,
    },
}

/// Session configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration parse error
    #[error("Failed to parse configuration: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Top-level buildyard error type
#[derive(Error, Debug)]
pub enum BuildyardError {
    /// Graph construction error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Dependency cycle
    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    State(#[from] StateError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}
