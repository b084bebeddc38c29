//! Payload builders for calls the device initiates.
//!
//! Payload shapes follow the protocol subtype: 1.6 uses flat charge point
//! fields, the 2.x subtypes nest station and EVSE objects.

use crate::model::{random_token, ProtocolSubtype};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::{json, Value};

pub const BOOT_NOTIFICATION: &str = "BootNotification";
pub const HEARTBEAT: &str = "Heartbeat";
pub const STATUS_NOTIFICATION: &str = "StatusNotification";

const BOOT_REASONS: [&str; 9] = [
    "ApplicationReset",
    "FirmwareUpdate",
    "LocalReset",
    "PowerUp",
    "RemoteReset",
    "ScheduledReset",
    "Triggered",
    "Unknown",
    "Watchdog",
];

/// An action name paired with its request payload, ready for the codec.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundCall {
    pub action: &'static str,
    pub payload: Value,
}

impl OutboundCall {
    fn new(action: &'static str, payload: Value) -> Self {
        Self { action, payload }
    }
}

/// Current UTC time as an RFC 3339 timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn firmware_version<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "v{}.{}.{}",
        rng.gen_range(1..=9),
        rng.gen_range(0..=9),
        rng.gen_range(0..=9)
    )
}

/// Announce call sent first on every new connection.
pub fn boot_notification<R: Rng + ?Sized>(
    subtype: ProtocolSubtype,
    device_id: &str,
    rng: &mut R,
) -> OutboundCall {
    let model = format!("Model_{}", random_token(rng, 5));
    let vendor = format!("Vendor_{}", random_token(rng, 5));
    let firmware = firmware_version(rng);
    let iccid = random_token(rng, 20);
    let imsi = random_token(rng, 15);

    let payload = if subtype.is_v2() {
        let reason = BOOT_REASONS
            .get(rng.gen_range(0..BOOT_REASONS.len()))
            .copied()
            .unwrap_or("PowerUp");
        json!({
            "reason": reason,
            "chargingStation": {
                "serialNumber": device_id,
                "model": model,
                "vendorName": vendor,
                "firmwareVersion": firmware,
                "modem": { "iccid": iccid, "imsi": imsi },
            },
        })
    } else {
        json!({
            "chargePointModel": model,
            "chargePointVendor": vendor,
            "chargePointSerialNumber": device_id,
            "firmwareVersion": firmware,
            "iccid": iccid,
            "imsi": imsi,
        })
    };
    OutboundCall::new(BOOT_NOTIFICATION, payload)
}

pub fn heartbeat() -> OutboundCall {
    OutboundCall::new(HEARTBEAT, json!({}))
}

/// Connector status report. On 2.x subtypes the connector sits on EVSE 1.
pub fn status_notification(
    subtype: ProtocolSubtype,
    connector_id: u32,
    status: &str,
) -> OutboundCall {
    let payload = if subtype.is_v2() {
        json!({
            "evse": { "id": 1, "connectorId": connector_id },
            "timestamp": timestamp(),
            "connectorStatus": status,
        })
    } else {
        json!({
            "connectorId": connector_id,
            "errorCode": "NoError",
            "status": status,
            "timestamp": timestamp(),
        })
    };
    OutboundCall::new(STATUS_NOTIFICATION, payload)
}
