//! sectortrace Common - Shared types and utilities
//!
//! This crate provides the storage layout data model, error definitions,
//! and configuration shared by the probe, resolver and scrub crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
