//! Domain types for ONU provisioning

use gpon_session_common::{OltError, OltResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tables::{MAX_PON_POSITION, NOKIA_SERIAL_PREFIX, RACK, SHELF};
use crate::validate;

/// A PON port on the OLT, addressed as `rack/shelf/slot/pon`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PonPort {
    /// Line card slot
    pub slot: u8,
    /// PON port on the card
    pub pon: u8,
}

impl PonPort {
    pub fn new(slot: u8, pon: u8) -> Self {
        Self { slot, pon }
    }

    /// CLI path, e.g. `1/1/3/7`
    pub fn cli_path(&self) -> String {
        format!("{}/{}/{}/{}", RACK, SHELF, self.slot, self.pon)
    }
}

impl fmt::Display for PonPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cli_path())
    }
}

/// Where an ONU is attached: port plus position on the PON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PonAddress {
    pub slot: u8,
    pub pon: u8,
    /// Position on the PON, in `1..=128`
    pub position: u16,
}

impl PonAddress {
    pub fn new(port: PonPort, position: u16) -> OltResult<Self> {
        if position == 0 || position > MAX_PON_POSITION {
            return Err(OltError::validation(
                "position",
                format!("{} is outside 1..={}", position, MAX_PON_POSITION),
            ));
        }
        Ok(Self {
            slot: port.slot,
            pon: port.pon,
            position,
        })
    }

    pub fn port(&self) -> PonPort {
        PonPort::new(self.slot, self.pon)
    }

    /// CLI path, e.g. `1/1/3/7/12`
    pub fn cli_path(&self) -> String {
        format!("{}/{}", self.port().cli_path(), self.position)
    }

    /// TL1 access identifier suffix, e.g. `1-1-3-7-12`
    pub fn tl1_aid(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            RACK, SHELF, self.slot, self.pon, self.position
        )
    }
}

impl fmt::Display for PonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cli_path())
    }
}

/// ONU vendor, as far as dialect selection is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Serial carries the reserved prefix; provisioned over TL1
    Nokia,
    /// Everything else; provisioned over the CLI
    Generic,
}

/// Case-normalized ONU serial number
///
/// Stored upper-cased with `-` and `:` removed. The CLI form groups the
/// vendor prefix with a colon; the TL1 form is the normalized serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnuSerial(String);

impl OnuSerial {
    pub fn parse(raw: &str) -> OltResult<Self> {
        validate::serial(raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn vendor(&self) -> Vendor {
        if self.0.starts_with(NOKIA_SERIAL_PREFIX) {
            Vendor::Nokia
        } else {
            Vendor::Generic
        }
    }

    /// `ABCD:12345678`: first 12 characters, colon after the vendor prefix
    pub fn cli_form(&self) -> String {
        let head: String = self.0.chars().take(12).collect();
        if head.len() <= 4 {
            return head;
        }
        format!("{}:{}", &head[..4], &head[4..])
    }

    pub fn tl1_form(&self) -> &str {
        &self.0
    }
}

impl FromStr for OnuSerial {
    type Err = OltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnuSerial {
    type Error = OltError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OnuSerial> for String {
    fn from(serial: OnuSerial) -> Self {
        serial.0
    }
}

impl fmt::Display for OnuSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A physical ONU and its subscriber-facing name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnuIdentity {
    pub serial: OnuSerial,
    pub name: String,
}

impl OnuIdentity {
    pub fn new(serial: OnuSerial, name: &str) -> Self {
        Self {
            serial,
            name: validate::name(name),
        }
    }
}

/// Provisioning mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningMode {
    #[default]
    Bridge,
    Router,
}

impl ProvisioningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningMode::Bridge => "bridge",
            ProvisioningMode::Router => "router",
        }
    }
}

impl FromStr for ProvisioningMode {
    type Err = OltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "bridge" => Ok(ProvisioningMode::Bridge),
            "router" => Ok(ProvisioningMode::Router),
            other => Err(OltError::validation(
                "mode",
                format!("'{}' is neither bridge nor router", other),
            )),
        }
    }
}

impl fmt::Display for ProvisioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PPPoE account configured on router-mode ONTs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppoeCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for PppoeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PppoeCredentials")
            .field("user", &self.user)
            .field("password", &"******")
            .finish()
    }
}

/// SSID and passphrase applied to both radio bands
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> OltResult<Self> {
        Ok(Self {
            ssid: validate::ssid(ssid)?,
            password: validate::wifi_password(password)?,
        })
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"******")
            .finish()
    }
}

/// A requested provisioning outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningJob {
    pub onu: OnuIdentity,
    pub port: PonPort,
    /// Fixed position; `None` allocates the lowest free one
    pub position: Option<u16>,
    pub mode: ProvisioningMode,
    pub vlan: u16,
    /// Known model, skipping detection
    pub model: Option<String>,
    pub pppoe: Option<PppoeCredentials>,
    pub wifi: Option<WifiCredentials>,
}

impl ProvisioningJob {
    pub fn bridge(onu: OnuIdentity, port: PonPort, vlan: u16) -> Self {
        Self {
            onu,
            port,
            position: None,
            mode: ProvisioningMode::Bridge,
            vlan,
            model: None,
            pppoe: None,
            wifi: None,
        }
    }

    pub fn router(
        onu: OnuIdentity,
        port: PonPort,
        vlan: u16,
        pppoe: Option<PppoeCredentials>,
        wifi: Option<WifiCredentials>,
    ) -> Self {
        Self {
            mode: ProvisioningMode::Router,
            pppoe,
            wifi,
            ..Self::bridge(onu, port, vlan)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = (!model.trim().is_empty()).then(|| model.trim().to_string());
        self
    }

    pub fn at_position(mut self, position: u16) -> Self {
        self.position = Some(position);
        self
    }

    pub fn serial(&self) -> &OnuSerial {
        &self.onu.serial
    }

    /// Checks operator-supplied values before any device interaction.
    pub fn validate(&self) -> OltResult<()> {
        validate::vlan(self.vlan)?;
        if let Some(position) = self.position {
            PonAddress::new(self.port, position)?;
        }
        if let Some(wifi) = &self.wifi {
            validate::ssid(&wifi.ssid)?;
            validate::wifi_password(&wifi.password)?;
        }
        if let Some(pppoe) = &self.pppoe {
            if pppoe.user.trim().is_empty() || pppoe.password.is_empty() {
                return Err(OltError::validation("pppoe", "user and password are required"));
            }
        }
        Ok(())
    }
}

/// Received optical power and ONU temperature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalReading {
    pub rx_signal_dbm: f64,
    pub temperature_c: f64,
}

/// One row of a per-PON listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnuDetailRecord {
    pub position: Option<u16>,
    pub serial: String,
    pub name: String,
    /// `desc2` as set at provisioning time (Bridge/BRIDGE/ROUTER)
    pub mode: String,
    pub admin_status: String,
    pub oper_status: String,
    pub rx_signal_dbm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub distance_km: Option<f64>,
}

impl OnuDetailRecord {
    pub fn set_optics(&mut self, reading: Option<OpticalReading>) {
        self.rx_signal_dbm = reading.map(|r| r.rx_signal_dbm);
        self.temperature_c = reading.map(|r| r.temperature_c);
    }
}

/// Result of inspecting one provisioned ONU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnuInspection {
    pub serial: OnuSerial,
    pub address: PonAddress,
    pub optics: Option<OpticalReading>,
    pub model: Option<String>,
}

/// Outcome of enabling remote WAN web access on a router ONT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAccessState {
    /// The device accepted the change
    Enabled,
    /// The device refused the change; observed when access was already on
    AlreadyEnabled,
    /// The web password could not be applied
    Failed,
}
