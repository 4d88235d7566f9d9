//! Object store gateway.
//!
//! [`ObjectStore`] is the byte-blob interface the rest of the workspace
//! depends on: single-shot put/get, chunked (multipart) uploads, and
//! presigned retrieval links. [`S3ObjectStore`] implements it on top of
//! the AWS SDK and works against any S3-compatible endpoint.

pub mod config;
pub mod error;
pub mod s3;
pub mod store;

pub use config::S3Config;
pub use error::StorageError;
pub use s3::S3ObjectStore;
pub use store::{ObjectStore, UploadedPart, MIN_MULTIPART_PART_BYTES};
