//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, with JSON or
//! pretty console output and optional rolling JSON log files.

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
