//! ocpp-churn: simulated OCPP charging stations for load-testing central systems.
//!
//! Each simulated device runs an independent protocol engine that connects,
//! announces itself, answers server-initiated calls, sends keepalives and then
//! drops the connection after a short randomized delay, repeating until its
//! reconnect budget is spent. The point is to stress a central system's
//! connection-churn handling rather than steady-state messaging.

#![forbid(unsafe_code)]
// Public types carry docs where the meaning is not obvious from the name.
#![allow(missing_docs)]

pub mod actions;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod driver;
pub mod messages;
pub mod model;
pub mod runner;
pub mod session;
pub mod transport;

pub use crate::model::*;

pub mod run {
    //! Convenience entry points for running a load test.

    use super::runner::{run_sessions, RunnerOptions, RunnerResult};
    use super::transport::websocket::WebSocketTransport;
    use super::{RunConfig, RunReport};
    use std::sync::Arc;

    /// Run `config.sessions` simulated devices against a real WebSocket endpoint.
    pub async fn run_websocket(config: RunConfig) -> RunnerResult<RunReport> {
        run_websocket_with_options(config, RunnerOptions::default()).await
    }

    pub async fn run_websocket_with_options(
        config: RunConfig,
        options: RunnerOptions,
    ) -> RunnerResult<RunReport> {
        run_sessions(Arc::new(WebSocketTransport::new()), config, options).await
    }
}
