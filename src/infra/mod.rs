//! Infrastructure layer
//!
//! Collaborator access: the package base and the build cluster. The
//! scheduling core in [`crate::core`] only sees the traits defined here;
//! concrete implementations are selected by construction.

pub mod cluster;
pub mod pkgbase;
