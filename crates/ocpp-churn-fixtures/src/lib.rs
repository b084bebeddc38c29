//! Test fixtures for ocpp-churn end-to-end tests.
//!
//! - [`MockCentralSystem`] - loopback WebSocket server that speaks just enough
//!   OCPP-J to keep simulated devices busy and counts what they send
//! - [`write_config`] - serialize a [`RunConfig`](ocpp_churn::model::RunConfig)
//!   for CLI tests
//!
//! # Example
//!
//! ```ignore
//! use ocpp_churn_fixtures::MockCentralSystem;
//!
//! let csms = MockCentralSystem::start().await?;
//! let config = csms.config().sessions(2).reconnects(3, 3).build();
//! let report = ocpp_churn::run::run_websocket(config).await?;
//! assert_eq!(csms.stats().boot_notifications, 6);
//! ```

// Test fixtures crate - relaxed lints for test utilities
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]
#![allow(missing_docs)]

pub mod csms;
pub mod helpers;

pub use csms::{ConnectionInfo, MockCentralSystem, MockOptions, MockStats};
pub use helpers::write_config;
