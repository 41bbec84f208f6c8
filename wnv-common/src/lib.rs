//! # WNV Common Library
//!
//! Shared code for the WNV outbreak-mapping tools:
//! - Error type
//! - TOML bootstrap configuration and path resolution
//! - Logging bootstrap

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
