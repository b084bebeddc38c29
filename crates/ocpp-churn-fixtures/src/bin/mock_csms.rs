//! Standalone mock central system.
//!
//! Usage: `ocpp-churn-mock-csms [ADDR]` (default `127.0.0.1:8887`). Prints the
//! bound address, then serves until Ctrl-C and prints the counters.

// Test fixtures require special allowances - they are not production code
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

use ocpp_churn_fixtures::{MockCentralSystem, MockOptions};
use std::io;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> io::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .try_init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8887".to_string());
    let csms = MockCentralSystem::bind(&addr, MockOptions::default()).await?;
    println!("listening on ws://{}", csms.addr());

    tokio::signal::ctrl_c().await?;
    let stats = csms.stats();
    println!(
        "connections={} boots={} heartbeats={} status={} other={} decode_failures={}",
        stats.connections,
        stats.boot_notifications,
        stats.heartbeats,
        stats.status_notifications,
        stats.other_calls,
        stats.decode_failures
    );
    Ok(())
}
