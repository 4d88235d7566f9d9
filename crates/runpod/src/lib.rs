//! REST client for the serverless inference provider.
//!
//! Provides typed request/response payloads, a tagged job-status parser,
//! and the [`InferenceClient`] trait the pipeline depends on, with
//! [`RunPodApi`] as the HTTP implementation.

pub mod api;
pub mod client;
pub mod config;
pub mod messages;

pub use api::{RunPodApi, RunPodApiError};
pub use client::InferenceClient;
pub use config::RunPodConfig;
pub use messages::{Completion, InferenceInput, JobState, JobStatusResponse, SubmitResponse};
