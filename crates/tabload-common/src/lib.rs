//! tabload common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pieces shared by every tabload crate:
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Checksums**: SHA-256 verification of downloaded artifacts
//! - **Errors**: [`CommonError`] and the crate [`Result`] alias

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
