//! Infrastructure layer
//!
//! Concrete implementations for configuration loading, logging and the
//! HTTP-facing ports.

pub mod config;
pub mod http;
pub mod logging;
