use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::model::CONFIG_VERSION;

// =============================================================================
// Protocol Subtype
// =============================================================================

/// OCPP-J protocol variant spoken by a simulated device.
///
/// The variant selects the WebSocket subprotocol, the payload shapes of
/// outbound messages and the table of inbound actions the device answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolSubtype {
    /// OCPP 1.6 (JSON).
    #[default]
    #[serde(rename = "ocpp1.6")]
    Ocpp16,
    /// OCPP 2.0.1.
    #[serde(rename = "ocpp2.0.1")]
    Ocpp201,
    /// OCPP 2.1.
    #[serde(rename = "ocpp2.1")]
    Ocpp21,
}

impl ProtocolSubtype {
    pub const ALL: [Self; 3] = [Self::Ocpp16, Self::Ocpp201, Self::Ocpp21];

    /// Value sent in the `Sec-WebSocket-Protocol` header.
    pub const fn subprotocol(self) -> &'static str {
        match self {
            Self::Ocpp16 => "ocpp1.6",
            Self::Ocpp201 => "ocpp2.0.1",
            Self::Ocpp21 => "ocpp2.1",
        }
    }

    /// Prefix of generated device identifiers.
    pub const fn device_prefix(self) -> &'static str {
        match self {
            Self::Ocpp16 => "CP",
            Self::Ocpp201 | Self::Ocpp21 => "CS",
        }
    }

    /// Whether this variant uses the 2.x message family.
    pub const fn is_v2(self) -> bool {
        matches!(self, Self::Ocpp201 | Self::Ocpp21)
    }
}

impl fmt::Display for ProtocolSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subprotocol())
    }
}

impl FromStr for ProtocolSubtype {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|subtype| subtype.subprotocol() == value)
            .ok_or_else(|| {
                format!("unknown protocol subtype '{value}' (expected ocpp1.6, ocpp2.0.1 or ocpp2.1)")
            })
    }
}

// =============================================================================
// Ranges
// =============================================================================

/// Inclusive integer range used for jitter and budgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub min: u64,
    pub max: u64,
}

impl Span {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub const fn is_valid(self) -> bool {
        self.min <= self.max
    }

    /// Draw a value uniformly from `[min, max]`.
    ///
    /// An inverted span collapses to `min`.
    pub fn sample<R: rand::Rng + ?Sized>(self, rng: &mut R) -> u64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }

    pub fn sample_duration<R: rand::Rng + ?Sized>(self, rng: &mut R) -> Duration {
        Duration::from_millis(self.sample(rng))
    }
}

// =============================================================================
// Run Configuration
// =============================================================================

/// Configuration for one load-test run.
///
/// Every field has a default, so an empty config file is valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Config format version.
    pub config_version: u32,
    /// Number of simulated devices to run concurrently.
    pub sessions: u32,
    /// Central system host name.
    pub transport_host: String,
    /// Central system port.
    pub transport_port: u16,
    /// URL scheme, `ws` or `wss`.
    pub url_scheme: String,
    /// Path inserted between the authority and the device id (e.g. `/ocpp`).
    pub url_path_prefix: String,
    /// Protocol variant spoken by every device in the run.
    pub protocol_subtype: ProtocolSubtype,
    /// Lower bound of the per-session connect/disconnect cycle budget.
    pub reconnect_count_min: u32,
    /// Upper bound of the per-session connect/disconnect cycle budget.
    pub reconnect_count_max: u32,
    /// Lower bound of the time a connection stays open.
    pub disconnect_delay_min_ms: u64,
    /// Upper bound of the time a connection stays open.
    pub disconnect_delay_max_ms: u64,
    /// Lower bound of the pause between cycles.
    pub inter_cycle_sleep_min_ms: u64,
    /// Upper bound of the pause between cycles.
    pub inter_cycle_sleep_max_ms: u64,
    /// Heartbeat period while connected; unset disables keepalive.
    pub keepalive_interval_ms: Option<u64>,
    /// Send a `StatusNotification` right after the boot announcement.
    pub status_notification_on_boot: bool,
    /// Ceiling on a single connection attempt.
    pub open_timeout_ms: u64,
    /// Ceiling on waiting for close confirmation.
    pub close_timeout_ms: u64,
    /// Seed for reproducible jitter; each session derives `seed + index`.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            sessions: 1,
            transport_host: "central-system".to_string(),
            transport_port: 8887,
            url_scheme: "ws".to_string(),
            url_path_prefix: String::new(),
            protocol_subtype: ProtocolSubtype::Ocpp16,
            reconnect_count_min: 3,
            reconnect_count_max: 8,
            disconnect_delay_min_ms: 100,
            disconnect_delay_max_ms: 200,
            inter_cycle_sleep_min_ms: 50,
            inter_cycle_sleep_max_ms: 100,
            keepalive_interval_ms: None,
            status_notification_on_boot: false,
            open_timeout_ms: 5_000,
            close_timeout_ms: 1_000,
            seed: None,
        }
    }
}

impl RunConfig {
    pub fn reconnect_budget(&self) -> Span {
        Span::new(
            u64::from(self.reconnect_count_min),
            u64::from(self.reconnect_count_max),
        )
    }

    pub fn disconnect_delay(&self) -> Span {
        Span::new(self.disconnect_delay_min_ms, self.disconnect_delay_max_ms)
    }

    pub fn inter_cycle_sleep(&self) -> Span {
        Span::new(self.inter_cycle_sleep_min_ms, self.inter_cycle_sleep_max_ms)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms.map(Duration::from_millis)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// `<scheme>://<host>:<port><prefix>` without the trailing device id.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.url_scheme,
            self.transport_host,
            self.transport_port,
            self.url_path_prefix.trim_end_matches('/')
        )
    }

    /// Endpoint a device with `device_id` connects to.
    pub fn url_for(&self, device_id: &str) -> String {
        format!("{}/{device_id}", self.base_url())
    }
}

// =============================================================================
// RunConfigBuilder
// =============================================================================

/// Fluent builder for [`RunConfig`].
///
/// # Example
///
/// ```
/// use ocpp_churn::model::{ProtocolSubtype, RunConfigBuilder};
///
/// let config = RunConfigBuilder::new()
///     .host("127.0.0.1")
///     .port(9000)
///     .subtype(ProtocolSubtype::Ocpp201)
///     .reconnects(3, 3)
///     .disconnect_delay_ms(100, 100)
///     .build();
/// assert_eq!(config.url_for("CS_1_abc"), "ws://127.0.0.1:9000/CS_1_abc");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sessions(mut self, sessions: u32) -> Self {
        self.config.sessions = sessions;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.transport_host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.transport_port = port;
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.url_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.url_path_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn subtype(mut self, subtype: ProtocolSubtype) -> Self {
        self.config.protocol_subtype = subtype;
        self
    }

    #[must_use]
    pub fn reconnects(mut self, min: u32, max: u32) -> Self {
        self.config.reconnect_count_min = min;
        self.config.reconnect_count_max = max;
        self
    }

    #[must_use]
    pub fn disconnect_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.config.disconnect_delay_min_ms = min;
        self.config.disconnect_delay_max_ms = max;
        self
    }

    #[must_use]
    pub fn inter_cycle_sleep_ms(mut self, min: u64, max: u64) -> Self {
        self.config.inter_cycle_sleep_min_ms = min;
        self.config.inter_cycle_sleep_max_ms = max;
        self
    }

    #[must_use]
    pub fn keepalive_ms(mut self, interval: u64) -> Self {
        self.config.keepalive_interval_ms = Some(interval);
        self
    }

    #[must_use]
    pub fn status_notification_on_boot(mut self, enabled: bool) -> Self {
        self.config.status_notification_on_boot = enabled;
        self
    }

    #[must_use]
    pub fn open_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.open_timeout_ms = timeout;
        self
    }

    #[must_use]
    pub fn close_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.close_timeout_ms = timeout;
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn build(self) -> RunConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn default_url_targets_central_system_host() {
        let config = RunConfig::default();
        assert_eq!(
            config.url_for("CP_1_abcdefgh"),
            "ws://central-system:8887/CP_1_abcdefgh"
        );
    }

    #[test]
    fn path_prefix_is_inserted_before_device_id() {
        let config = RunConfigBuilder::new()
            .host("localhost")
            .port(9000)
            .path_prefix("/ocpp/")
            .build();
        assert_eq!(config.url_for("CP_2_x"), "ws://localhost:9000/ocpp/CP_2_x");
    }

    #[test]
    fn subtype_parses_from_subprotocol_name() {
        assert_eq!(
            "ocpp2.0.1".parse::<ProtocolSubtype>(),
            Ok(ProtocolSubtype::Ocpp201)
        );
        assert!("ocpp3".parse::<ProtocolSubtype>().is_err());
    }

    #[test]
    fn subtype_serializes_as_subprotocol_name() {
        let json = serde_json::to_string(&ProtocolSubtype::Ocpp21).unwrap();
        assert_eq!(json, "\"ocpp2.1\"");
    }

    #[test]
    fn degenerate_span_always_samples_its_bound() {
        let mut rng = StdRng::seed_from_u64(1);
        let span = Span::new(100, 100);
        for _ in 0..10 {
            assert_eq!(span.sample(&mut rng), 100);
        }
    }

    #[test]
    fn span_samples_stay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(9);
        let span = Span::new(50, 100);
        for _ in 0..200 {
            let value = span.sample(&mut rng);
            assert!((50..=100).contains(&value));
        }
    }

    #[test]
    fn empty_config_file_deserializes_to_defaults() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
    }
}
