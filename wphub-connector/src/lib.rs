//! Client for the wphub connector protocol.
//!
//! Every managed WordPress site runs a connector exposing a small JSON API
//! under `/wp-json/wphub/v1/`. This crate provides:
//! - A typed client with one operation per connector endpoint
//! - Bounded timeouts and a single retry on transient network failure
//! - A `ConnectorError` that keeps upstream status and body, and reports a
//!   missing endpoint (HTTP 404) separately from application errors
//! - The `Connector` trait the orchestration layer depends on

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::{Connector, ConnectorClient, ConnectorAction};
pub use config::ConnectorConfig;
pub use error::{ConnectorError, ConnectorResult};
pub use types::*;
