//! Buildyard - distributed package build farm scheduling engine
//!
//! This library schedules the compilation of interdependent packages
//! across a pool of remote build nodes, respecting compile-time
//! dependency order: dependency-graph construction, strongly-connected
//! component analysis, priority dispatch, load-aware node assignment and
//! the controller/node state machines driving it all asynchronously.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`core`] - Scheduling logic (no I/O operations)
//! - [`infra`] - Collaborator access (package base, build cluster)
//! - [`config`] - Session configuration and defaults
//! - [`error`] - Error types and handling

pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;

pub use crate::config::SessionConfig;
pub use crate::core::controller::{Controller, ControllerState, Domain, LogHandler, Notify};
pub use crate::error::BuildyardError;
pub use crate::infra::cluster::event_channel;
