//! Device constants and the model dispatch table

use gpon_session_common::OltError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Rack number in every OLT path
pub const RACK: u8 = 1;

/// Shelf number in every OLT path
pub const SHELF: u8 = 1;

/// Highest position the OLT accepts on a PON
pub const MAX_PON_POSITION: u16 = 128;

/// Serial prefix of ONTs provisioned over TL1
pub const NOKIA_SERIAL_PREFIX: &str = "ALCL";

/// Name used when the operator leaves it blank
pub const DEFAULT_ONU_NAME: &str = "CLIENTE";

/// Longest `desc1` the OLT stores
pub const MAX_NAME_LEN: usize = 63;

/// Length of the ONT web account password
pub const REMOTE_PASSWORD_LEN: usize = 10;

/// `desc2` written by the CLI staging step
pub const CLI_BRIDGE_DESC: &str = "Bridge";

/// `desc2` values written over TL1
pub mod tl1_desc {
    pub const BRIDGE: &str = "BRIDGE";
    pub const ROUTER: &str = "ROUTER";
}

/// Models provisioned through the TL1 router plan
pub const TL1_ROUTER_MODELS: &[&str] = &["G-1425G-A", "G-1425G-B", "G-1426G-A"];

/// TR-069 parameter slots on router ONTs
pub mod tr069 {
    /// A numbered TR-069 parameter slot and the object path it holds
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Param {
        pub index: u8,
        pub name: &'static str,
    }

    pub const WAN_VLAN: Param = Param {
        index: 1,
        name: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.X_CT-COM_WANGponLinkConfig.VLANIDMark",
    };
    pub const PPPOE_USER: Param = Param {
        index: 2,
        name: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Username",
    };
    pub const PPPOE_PASSWORD: Param = Param {
        index: 3,
        name: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.Password",
    };
    pub const WEB_PASSWORD: Param = Param {
        index: 4,
        name: "InternetGatewayDevice.X_Authentication.WebAccount.Password",
    };
    pub const SSID_2G: Param = Param {
        index: 6,
        name: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.SSID",
    };
    pub const PSK_2G: Param = Param {
        index: 7,
        name: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.1.PreSharedKey.1.PreSharedKey",
    };
    pub const SSID_5G: Param = Param {
        index: 8,
        name: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.5.SSID",
    };
    pub const PSK_5G: Param = Param {
        index: 9,
        name: "InternetGatewayDevice.LANDevice.1.WLANConfiguration.5.PreSharedKey.1.PreSharedKey",
    };
    pub const HTTP_DISABLED: Param = Param {
        index: 19,
        name: "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.X_ALU-COM_WanAccessCfg.HttpDisabled",
    };

    /// PPPoE slots, deleted before being set
    pub const PPPOE_SLOTS: [Param; 3] = [WAN_VLAN, PPPOE_USER, PPPOE_PASSWORD];

    /// WiFi slots, deleted before being set
    pub const WIFI_SLOTS: [Param; 4] = [SSID_2G, PSK_2G, SSID_5G, PSK_5G];

    /// Suffix appended to the SSID on the 5 GHz radio
    pub const SSID_5G_SUFFIX: &str = "5Ghz";
}

/// CLI bridge command sequence applied after classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandGroup {
    /// Bridge, ONU-side VLAN tagging
    Group01,
    /// Bridge, OLT-side VLAN tagging
    Group02,
    /// Bridge with downstream queue sharing and shaping, extended MAC limit
    Group03,
}

impl CommandGroup {
    pub const ALL: [CommandGroup; 3] = [
        CommandGroup::Group01,
        CommandGroup::Group02,
        CommandGroup::Group03,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandGroup::Group01 => "group01",
            CommandGroup::Group02 => "group02",
            CommandGroup::Group03 => "group03",
        }
    }

    /// Models that ship in this group
    pub fn builtin_models(&self) -> &'static [&'static str] {
        match self {
            CommandGroup::Group01 => &["TX-6610", "R1v2", "XZ000-G3", "Fiberlink100"],
            CommandGroup::Group02 => &[
                "PON110_V3.0",
                "RTL9602C",
                "DM985-100",
                "HG8310M",
                "110Gb",
                "SH901",
            ],
            CommandGroup::Group03 => &["XZ000-G7", "AN5506-01-A"],
        }
    }
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandGroup {
    type Err = OltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group01" | "01" | "1" => Ok(CommandGroup::Group01),
            "group02" | "02" | "2" => Ok(CommandGroup::Group02),
            "group03" | "03" | "3" => Ok(CommandGroup::Group03),
            other => Err(OltError::config(format!("unknown command group '{}'", other))),
        }
    }
}

/// Model identifier to command group
///
/// Lookups are exact on the trimmed model string. Unknown models are not
/// an error here; the orchestrator rolls them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTable {
    groups: BTreeMap<String, CommandGroup>,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelTable {
    /// Table with only the built-in models.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for group in CommandGroup::ALL {
            for model in group.builtin_models() {
                table.insert(*model, group);
            }
        }
        table
    }

    pub fn empty() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }

    /// Adds or moves a model. Returns the previous group, if any.
    pub fn insert(&mut self, model: impl Into<String>, group: CommandGroup) -> Option<CommandGroup> {
        self.groups.insert(model.into().trim().to_string(), group)
    }

    pub fn lookup(&self, model: &str) -> Option<CommandGroup> {
        self.groups.get(model.trim()).copied()
    }

    pub fn models_in(&self, group: CommandGroup) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, g)| **g == group)
            .map(|(model, _)| model.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
