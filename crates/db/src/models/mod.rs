//! Row types mapped from database tables.

pub mod experiment_group;
pub mod user;
