//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods
//! that accept `&PgPool` as the first argument.

pub mod balance_repo;
pub mod experiment_group_repo;

pub use balance_repo::BalanceRepo;
pub use experiment_group_repo::ExperimentGroupRepo;
