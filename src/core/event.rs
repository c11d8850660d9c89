//! Scheduler events
//!
//! External stimuli such as node confirmations and build outcomes arrive
//! asynchronously and are funneled through one serialized stream into
//! the controller, which applies them on its single dispatch context.

use crate::core::pool::NodeId;
use crate::error::FailureReason;

/// One externally produced event, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A node confirmed its pending transitional request
    NodeReady { node: NodeId },

    /// A node reported a successful build
    BuildSucceeded { node: NodeId, package: String },

    /// A node reported a failed build
    BuildFailed {
        node: NodeId,
        package: String,
        reason: FailureReason,
    },
}
