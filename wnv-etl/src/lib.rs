//! wnv-etl library interface
//!
//! Exposes the pipeline for the binary and for integration tests.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{EtlError, EtlResult};
