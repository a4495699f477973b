//! Validation of operator-supplied values.
//!
//! Everything here runs before a session is opened, so a bad value never
//! leaves a half-applied change on the device.

use gpon_session_common::{OltError, OltResult};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::tables::{DEFAULT_ONU_NAME, MAX_NAME_LEN, REMOTE_PASSWORD_LEN};

static SSID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_ ]{4,32}$").expect("Invalid regex pattern"));

const MIN_WIFI_PASSWORD_LEN: usize = 8;

/// Normalizes a serial: trimmed, upper-cased, `-` and `:` removed.
pub fn serial(raw: &str) -> OltResult<String> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != ':')
        .collect::<String>()
        .to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(OltError::validation("serial", "must not be empty"));
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(OltError::validation(
            "serial",
            format!("'{}' must be alphanumeric", raw.trim()),
        ));
    }
    Ok(normalized)
}

pub fn vlan(vlan: u16) -> OltResult<u16> {
    if !(1..=4094).contains(&vlan) {
        return Err(OltError::validation(
            "vlan",
            format!("{} is outside 1..=4094", vlan),
        ));
    }
    Ok(vlan)
}

/// Parses and range-checks a VLAN given as text.
pub fn parse_vlan(raw: &str) -> OltResult<u16> {
    let value = raw
        .trim()
        .parse::<u16>()
        .map_err(|_| OltError::validation("vlan", format!("'{}' is not a number", raw.trim())))?;
    vlan(value)
}

pub fn ssid(raw: &str) -> OltResult<String> {
    let ssid = raw.trim();
    if !SSID_RE.is_match(ssid) {
        return Err(OltError::validation(
            "ssid",
            "must be 4 to 32 letters, digits, underscores or spaces",
        ));
    }
    Ok(ssid.to_string())
}

pub fn wifi_password(raw: &str) -> OltResult<String> {
    let password = raw.trim();
    if password.chars().count() < MIN_WIFI_PASSWORD_LEN {
        return Err(OltError::validation(
            "wifi password",
            format!("must be at least {} characters", MIN_WIFI_PASSWORD_LEN),
        ));
    }
    Ok(password.to_string())
}

pub fn remote_password(raw: &str) -> OltResult<String> {
    let password = raw.trim();
    if password.chars().count() != REMOTE_PASSWORD_LEN {
        return Err(OltError::validation(
            "remote access password",
            format!("must be exactly {} characters", REMOTE_PASSWORD_LEN),
        ));
    }
    Ok(password.to_string())
}

/// Subscriber name: control characters dropped, trimmed, truncated,
/// defaulted when blank.
pub fn name(raw: &str) -> String {
    let printable: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = printable.trim();
    if trimmed.is_empty() {
        return DEFAULT_ONU_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}
