//! Domain model for the experiment lifecycle manager.
//!
//! Pure types and functions shared by every other crate: experiment groups
//! and their members, the retry budget, deterministic storage-key
//! derivation, the usage-cost policy, and submission validation. Nothing in
//! here performs I/O.

pub mod artifacts;
pub mod error;
pub mod experiment;
pub mod submission;
pub mod types;
pub mod usage;
