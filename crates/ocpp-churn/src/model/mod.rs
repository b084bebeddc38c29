pub mod config;
pub mod envelope;
pub mod ids;
pub mod metrics;
pub mod report;

pub use config::*;
pub use envelope::*;
pub use ids::{random_token, RequestId, RunId, SessionId, REQUEST_ID_LEN};
pub use metrics::*;
pub use report::*;

/// Version of the `RunReport` JSON layout.
pub const RUN_REPORT_VERSION: u32 = 1;
/// Version of the run configuration file format.
pub const CONFIG_VERSION: u32 = 1;
