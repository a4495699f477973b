//! Ready-made devices and job lists for scenario tests
//!
//! Job lists are produced as JSON in the same shape the migration command
//! reads from disk, so tests exercise the real deserialization path.

use serde_json::{json, Value};

use crate::simulated::SimulatedOlt;

/// Generic ONU, provisioned over the CLI
pub const GENERIC_SERIAL: &str = "ABCD12345678";
/// Second generic ONU on the same PON
pub const SECOND_GENERIC_SERIAL: &str = "ABCE87654321";
/// Nokia ONT, provisioned over TL1
pub const NOKIA_SERIAL: &str = "ALCLB3D4E5F6";

pub const SLOT: u8 = 1;
pub const PON: u8 = 2;
pub const VLAN: u16 = 100;

/// Model in the group01 dispatch set
pub const GROUP01_MODEL: &str = "TX-6610";
/// Model in the group03 dispatch set
pub const GROUP03_MODEL: &str = "AN5506-01-A";
pub const UNKNOWN_MODEL: &str = "UNKNOWN-X";
pub const NOKIA_ROUTER_MODEL: &str = "G-1425G-A";

pub const SUBSCRIBER: &str = "Maria Silva";
pub const WIFI_SSID: &str = "CasaSilva";
pub const WIFI_PASSWORD: &str = "s3nha-forte";
pub const PPPOE_USER: &str = "msilva@isp";
pub const PPPOE_PASSWORD: &str = "pppoe-pass";
pub const REMOTE_PASSWORD: &str = "Abc1234567";

/// One generic ONU waiting on `SLOT/PON`, reporting a group01 model.
pub fn generic_olt() -> SimulatedOlt {
    SimulatedOlt::new()
        .with_unauthorized(GENERIC_SERIAL, SLOT, PON)
        .with_model(GENERIC_SERIAL, GROUP01_MODEL)
}

/// One Nokia ONT waiting on `SLOT/PON`.
pub fn nokia_olt() -> SimulatedOlt {
    SimulatedOlt::new()
        .with_unauthorized(NOKIA_SERIAL, SLOT, PON)
        .with_model(NOKIA_SERIAL, NOKIA_ROUTER_MODEL)
}

/// Bridge job, optionally pinned to a model.
pub fn bridge_job(serial: &str, model: Option<&str>) -> Value {
    let mut job = json!({
        "serial": serial,
        "name": SUBSCRIBER,
        "mode": "bridge",
    });
    if let Some(model) = model {
        job["model"] = json!(model);
    }
    job
}

/// Router job carrying PPPoE and WiFi settings.
pub fn router_job(serial: &str) -> Value {
    json!({
        "serial": serial,
        "name": SUBSCRIBER,
        "mode": "router",
        "model": NOKIA_ROUTER_MODEL,
        "ssid": WIFI_SSID,
        "ssid_password": WIFI_PASSWORD,
        "pppoe_user": PPPOE_USER,
        "pppoe_password": PPPOE_PASSWORD,
    })
}

/// Job list document.
pub fn job_list(jobs: Vec<Value>) -> Value {
    Value::Array(jobs)
}
