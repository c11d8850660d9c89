//! Build stages
//!
//! A package progresses through named stages. Invalidating a stage
//! ripples forward to dependents; [`BuildStage::child_outdate`] computes
//! the stage a direct dependent must be invalidated to.

use serde::{Deserialize, Serialize};

/// A named step in a package's build progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    /// Source configured against the target
    Configure,
    /// Compilation
    Build,
    /// Build complete, artifacts available
    Finished,
}

impl BuildStage {
    /// The stage after this one, if any
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Configure => Some(Self::Build),
            Self::Build => Some(Self::Finished),
            Self::Finished => None,
        }
    }

    /// The stage a direct dependent must be invalidated to when this
    /// package is invalidated to `self`
    ///
    /// Rebuilding a dependency changes its artifacts, so dependents must
    /// reconfigure from scratch. Invalidating only `Finished` touches no
    /// artifacts and cascades nothing.
    pub fn child_outdate(self) -> Option<Self> {
        match self {
            Self::Configure | Self::Build => Some(Self::Configure),
            Self::Finished => None,
        }
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configure => write!(f, "configure"),
            Self::Build => write!(f, "build"),
            Self::Finished => write!(f, "finished"),
        }
    }
}
