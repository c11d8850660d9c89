//! Core scheduling logic module
//!
//! This module contains the scheduling engine proper. It performs no
//! I/O - collaborator access lives in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`version`] - Ordered package versions and constraint checks
//! - [`stage`] - Build stage progression and invalidation rules
//! - [`graph`] - Forward/transposed dependency graph construction
//! - [`scc`] - Strongly connected components and the contracted DAG
//! - [`queue`] - Priority build queue and per-session bookkeeping
//! - [`pool`] - Build node state machines and load-aware selection
//! - [`event`] - Serialized external event stream types
//! - [`controller`] - Top-level controller FSM

pub mod controller;
pub mod event;
pub mod graph;
pub mod pool;
pub mod queue;
pub mod scc;
pub mod stage;
pub mod version;
