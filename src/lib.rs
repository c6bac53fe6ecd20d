//! chatrelay - streaming chat relay
//!
//! This library provides the core of the relay: configuration, credential
//! acquisition, input normalization, and the upstream-to-SSE stream bridge.

pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
