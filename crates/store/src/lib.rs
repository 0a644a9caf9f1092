//! Object store infrastructure adapters.
//!
//! Implements [`dormancy::ObjectStore`] twice:
//!
//! | Backend | Version token | Conditional writes |
//! |---|---|---|
//! | [`S3Store`] | S3 ETag | `If-None-Match` / `If-Match` headers |
//! | [`LocalDirStore`] | SHA-256 of the contents | checked under an in-process lock |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Request signing, HTTP status mapping, and filesystem
//! access live here. The workflow only sees keys, bytes, versions, and
//! [`dormancy::StoreError`] codes.

pub mod local;
pub mod s3;
mod sigv4;

pub use local::LocalDirStore;
pub use s3::{region_from_env, S3ConfigError, S3Store, DEFAULT_REGION};
pub use sigv4::AwsCredentials;
