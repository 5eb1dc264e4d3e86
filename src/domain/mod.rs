//! Domain layer for the Metis learning engine
//!
//! This module contains the core models, errors and storage ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
