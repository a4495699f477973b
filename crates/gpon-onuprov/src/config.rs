//! Configuration file support for onuprov
//!
//! Loads and validates configuration from TOML.
//! Default location: /etc/onuprov/onuprov.toml

use gpon_orch_common::RetryPolicy;
use gpon_session_common::{Credentials, OltEndpoint, OltError, OltResult, SshConnector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::tables::{CommandGroup, ModelTable, MAX_PON_POSITION};
use crate::types::PonPort;
use crate::validate;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/onuprov/onuprov.toml";

/// Command timeouts and device settle delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Timeout for ordinary commands
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for slow listings
    #[serde(default = "default_extended_timeout")]
    pub extended_timeout_secs: u64,

    /// Timeout for each login prompt
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,

    /// Off-box configuration time after TL1 ONT authorization
    #[serde(default = "default_tl1_configuration_wait")]
    pub tl1_configuration_wait_secs: u64,

    /// Pause before a command group is applied
    #[serde(default = "default_stabilization_wait")]
    pub stabilization_wait_secs: u64,

    /// Pause after staging, before the ONU reports its model
    #[serde(default = "default_staging_wait")]
    pub staging_wait_secs: u64,

    /// Extra pause before model detection
    #[serde(default = "default_classification_wait")]
    pub classification_wait_secs: u64,

    /// Pause before an incompatible ONU is removed
    #[serde(default = "default_rollback_wait")]
    pub rollback_wait_secs: u64,

    /// Timeout for stale WiFi parameter deletion
    #[serde(default = "default_wifi_delete_timeout")]
    pub wifi_delete_timeout_secs: u64,
}

/// Retry schedule for session opening and inventory refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

/// Per-ONU service limits written by the command groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_pon_capacity")]
    pub pon_capacity: u16,

    #[serde(default = "default_max_unicast_mac")]
    pub max_unicast_mac: u16,

    #[serde(default = "default_max_committed_mac")]
    pub max_committed_mac: u16,

    /// MAC limit for group 03
    #[serde(default = "default_extended_unicast_mac")]
    pub extended_unicast_mac: u16,

    #[serde(default = "default_tl1_max_mac")]
    pub tl1_max_mac: u16,

    #[serde(default = "default_tl1_committed_mac")]
    pub tl1_committed_mac: u16,

    #[serde(default = "default_upstream_profile")]
    pub upstream_profile: String,

    #[serde(default = "default_downstream_profile")]
    pub downstream_profile: String,
}

/// One managed OLT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OltConfig {
    pub name: String,
    pub host: String,

    #[serde(default = "default_cli_port")]
    pub cli_port: u16,

    #[serde(default = "default_tl1_port")]
    pub tl1_port: u16,

    /// Environment variable holding the CLI user
    #[serde(default = "default_cli_user_env")]
    pub cli_user_env: String,

    #[serde(default = "default_cli_password_env")]
    pub cli_password_env: String,

    #[serde(default = "default_tl1_user_env")]
    pub tl1_user_env: String,

    #[serde(default = "default_tl1_password_env")]
    pub tl1_password_env: String,
}

/// VLAN served on a PON port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanEntry {
    pub slot: u8,
    pub pon: u8,
    pub vlan: u16,
}

/// Extra model for the dispatch table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub group: String,
}

/// Complete onuprov configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnuprovConfig {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub olt: Vec<OltConfig>,

    #[serde(default)]
    pub vlan: Vec<VlanEntry>,

    #[serde(default)]
    pub model: Vec<ModelEntry>,
}

// Default functions
fn default_command_timeout() -> u64 {
    10
}

fn default_extended_timeout() -> u64 {
    30
}

fn default_login_timeout() -> u64 {
    10
}

fn default_tl1_configuration_wait() -> u64 {
    90
}

fn default_stabilization_wait() -> u64 {
    3
}

fn default_staging_wait() -> u64 {
    20
}

fn default_classification_wait() -> u64 {
    10
}

fn default_rollback_wait() -> u64 {
    15
}

fn default_wifi_delete_timeout() -> u64 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> u64 {
    30000
}

fn default_pon_capacity() -> u16 {
    MAX_PON_POSITION
}

fn default_max_unicast_mac() -> u16 {
    4
}

fn default_max_committed_mac() -> u16 {
    1
}

fn default_extended_unicast_mac() -> u16 {
    10
}

fn default_tl1_max_mac() -> u16 {
    32
}

fn default_tl1_committed_mac() -> u16 {
    10
}

fn default_upstream_profile() -> String {
    "HSI_1G_UP".to_string()
}

fn default_downstream_profile() -> String {
    "HSI_1G_DOWN".to_string()
}

fn default_cli_port() -> u16 {
    22
}

fn default_tl1_port() -> u16 {
    1023
}

fn default_cli_user_env() -> String {
    "SSH_USER".to_string()
}

fn default_cli_password_env() -> String {
    "SSH_PASSWORD".to_string()
}

fn default_tl1_user_env() -> String {
    "TL1_USER".to_string()
}

fn default_tl1_password_env() -> String {
    "TL1_PASSWORD".to_string()
}

// Default implementations
impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            extended_timeout_secs: default_extended_timeout(),
            login_timeout_secs: default_login_timeout(),
            tl1_configuration_wait_secs: default_tl1_configuration_wait(),
            stabilization_wait_secs: default_stabilization_wait(),
            staging_wait_secs: default_staging_wait(),
            classification_wait_secs: default_classification_wait(),
            rollback_wait_secs: default_rollback_wait(),
            wifi_delete_timeout_secs: default_wifi_delete_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            pon_capacity: default_pon_capacity(),
            max_unicast_mac: default_max_unicast_mac(),
            max_committed_mac: default_max_committed_mac(),
            extended_unicast_mac: default_extended_unicast_mac(),
            tl1_max_mac: default_tl1_max_mac(),
            tl1_committed_mac: default_tl1_committed_mac(),
            upstream_profile: default_upstream_profile(),
            downstream_profile: default_downstream_profile(),
        }
    }
}

impl TimingConfig {
    /// Short timeouts and no settle delays.
    pub fn immediate() -> Self {
        Self {
            command_timeout_secs: 1,
            extended_timeout_secs: 1,
            login_timeout_secs: 1,
            tl1_configuration_wait_secs: 0,
            stabilization_wait_secs: 0,
            staging_wait_secs: 0,
            classification_wait_secs: 0,
            rollback_wait_secs: 0,
            wifi_delete_timeout_secs: 1,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn extended_timeout(&self) -> Duration {
        Duration::from_secs(self.extended_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn tl1_configuration_wait(&self) -> Duration {
        Duration::from_secs(self.tl1_configuration_wait_secs)
    }

    pub fn stabilization_wait(&self) -> Duration {
        Duration::from_secs(self.stabilization_wait_secs)
    }

    pub fn staging_wait(&self) -> Duration {
        Duration::from_secs(self.staging_wait_secs)
    }

    pub fn classification_wait(&self) -> Duration {
        Duration::from_secs(self.classification_wait_secs)
    }

    pub fn rollback_wait(&self) -> Duration {
        Duration::from_secs(self.rollback_wait_secs)
    }

    pub fn wifi_delete_timeout(&self) -> Duration {
        Duration::from_secs(self.wifi_delete_timeout_secs)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts).with_backoff(
            Duration::from_millis(self.initial_backoff_ms),
            self.backoff_multiplier,
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

fn read_env(host: &str, var: &str) -> OltResult<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(OltError::connection(
            host,
            format!("environment variable {} is not set", var),
        )),
    }
}

impl OltConfig {
    pub fn endpoint(&self) -> OltEndpoint {
        OltEndpoint {
            name: self.name.clone(),
            host: self.host.clone(),
            cli_port: self.cli_port,
            tl1_port: self.tl1_port,
        }
    }

    /// CLI credentials from the environment.
    pub fn cli_credentials(&self) -> OltResult<Credentials> {
        Ok(Credentials::new(
            read_env(&self.host, &self.cli_user_env)?,
            read_env(&self.host, &self.cli_password_env)?,
        ))
    }

    /// TL1 credentials from the environment.
    pub fn tl1_credentials(&self) -> OltResult<Credentials> {
        Ok(Credentials::new(
            read_env(&self.host, &self.tl1_user_env)?,
            read_env(&self.host, &self.tl1_password_env)?,
        ))
    }

    /// Builds an ssh connector, resolving credentials now.
    pub fn connector(&self, timing: &TimingConfig) -> OltResult<SshConnector> {
        Ok(SshConnector::new(
            self.endpoint(),
            self.cli_credentials()?,
            self.tl1_credentials()?,
            timing.login_timeout(),
        ))
    }
}

/// VLAN lookup keyed by PON port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VlanTable {
    entries: HashMap<PonPort, u16>,
}

impl VlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: PonPort, vlan: u16) -> Option<u16> {
        self.entries.insert(port, vlan)
    }

    pub fn lookup(&self, port: PonPort) -> Option<u16> {
        self.entries.get(&port).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(PonPort, u16)> for VlanTable {
    fn from_iter<I: IntoIterator<Item = (PonPort, u16)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl OnuprovConfig {
    /// Parses configuration text.
    pub fn from_toml_str(content: &str) -> OltResult<Self> {
        toml::from_str(content)
            .map_err(|e| OltError::config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> OltResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                OltError::config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(OltError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> OltResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn olt(&self, name: &str) -> OltResult<&OltConfig> {
        self.olt
            .iter()
            .find(|olt| olt.name == name)
            .ok_or_else(|| OltError::not_found(format!("OLT '{}'", name)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn vlan_table(&self) -> VlanTable {
        self.vlan
            .iter()
            .map(|entry| (PonPort::new(entry.slot, entry.pon), entry.vlan))
            .collect()
    }

    /// Built-in models plus the configured extras.
    pub fn model_table(&self) -> OltResult<ModelTable> {
        let mut table = ModelTable::builtin();
        for entry in &self.model {
            let group: CommandGroup = entry.group.parse()?;
            table.insert(&entry.name, group);
        }
        Ok(table)
    }

    /// Validate configuration
    pub fn validate(&self) -> OltResult<()> {
        if self.limits.pon_capacity == 0 || self.limits.pon_capacity > MAX_PON_POSITION {
            return Err(OltError::config(format!(
                "pon_capacity must be 1-{}",
                MAX_PON_POSITION
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(OltError::config("max_attempts must be > 0"));
        }

        let mut names = HashSet::new();
        for olt in &self.olt {
            if olt.host.trim().is_empty() {
                return Err(OltError::config(format!("OLT '{}' has an empty host", olt.name)));
            }
            if !names.insert(olt.name.as_str()) {
                return Err(OltError::config(format!("duplicate OLT name '{}'", olt.name)));
            }
        }

        for entry in &self.vlan {
            validate::vlan(entry.vlan).map_err(|e| {
                OltError::config(format!("VLAN for slot {} pon {}: {}", entry.slot, entry.pon, e))
            })?;
        }

        self.model_table()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = OnuprovConfig::default();
        assert_eq!(config.timing.command_timeout_secs, 10);
        assert_eq!(config.timing.tl1_configuration_wait_secs, 90);
        assert_eq!(config.limits.pon_capacity, 128);
        assert_eq!(config.limits.upstream_profile, "HSI_1G_UP");
        assert!(config.olt.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timing_durations() {
        let timing = TimingConfig::default();
        assert_eq!(timing.staging_wait(), Duration::from_secs(20));
        assert_eq!(timing.rollback_wait(), Duration::from_secs(15));
        assert_eq!(TimingConfig::immediate().staging_wait(), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(2));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[timing]
staging_wait_secs = 5

[[olt]]
name = "central"
host = "10.1.1.1"

[[olt]]
name = "north"
host = "10.1.1.2"
cli_port = 2222
tl1_password_env = "NORTH_TL1_PASSWORD"

[[vlan]]
slot = 1
pon = 2
vlan = 100

[[model]]
name = "EG8010H"
group = "group02"
"#;
        let config = OnuprovConfig::from_toml_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.staging_wait_secs, 5);
        // Unspecified values should use defaults
        assert_eq!(config.timing.rollback_wait_secs, 15);

        let north = config.olt("north").unwrap();
        assert_eq!(north.cli_port, 2222);
        assert_eq!(north.tl1_port, 1023);
        assert_eq!(north.tl1_password_env, "NORTH_TL1_PASSWORD");
        assert_eq!(north.cli_user_env, "SSH_USER");
        assert!(config.olt("south").is_err());

        assert_eq!(config.vlan_table().lookup(PonPort::new(1, 2)), Some(100));
        assert_eq!(config.vlan_table().lookup(PonPort::new(1, 3)), None);

        let models = config.model_table().unwrap();
        assert_eq!(models.lookup("EG8010H"), Some(CommandGroup::Group02));
        assert_eq!(models.lookup("TX-6610"), Some(CommandGroup::Group01));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OnuprovConfig::default();
        config.vlan.push(VlanEntry {
            slot: 1,
            pon: 1,
            vlan: 5000,
        });
        assert!(config.validate().is_err());

        let mut config = OnuprovConfig::default();
        config.limits.pon_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = OnuprovConfig::default();
        for _ in 0..2 {
            config.olt.push(OltConfig {
                name: "dup".to_string(),
                host: "h".to_string(),
                cli_port: 22,
                tl1_port: 1023,
                cli_user_env: default_cli_user_env(),
                cli_password_env: default_cli_password_env(),
                tl1_user_env: default_tl1_user_env(),
                tl1_password_env: default_tl1_password_env(),
            });
        }
        assert!(config.validate().is_err());

        let mut config = OnuprovConfig::default();
        config.model.push(ModelEntry {
            name: "X".to_string(),
            group: "group42".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_are_connection_errors() {
        let olt = OltConfig {
            name: "lab".to_string(),
            host: "192.0.2.1".to_string(),
            cli_port: 22,
            tl1_port: 1023,
            cli_user_env: "ONUPROV_TEST_UNSET_USER".to_string(),
            cli_password_env: "ONUPROV_TEST_UNSET_PASSWORD".to_string(),
            tl1_user_env: "ONUPROV_TEST_UNSET_USER".to_string(),
            tl1_password_env: "ONUPROV_TEST_UNSET_PASSWORD".to_string(),
        };
        assert!(matches!(
            olt.cli_credentials(),
            Err(OltError::Connection { .. })
        ));
        assert!(olt.connector(&TimingConfig::default()).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\npon_capacity = 64").unwrap();
        let config = OnuprovConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.limits.pon_capacity, 64);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = OnuprovConfig::load_or_default("/nonexistent/onuprov.toml").unwrap();
        assert_eq!(config, OnuprovConfig::default());
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing\nbroken").unwrap();
        assert!(matches!(
            OnuprovConfig::load_or_default(file.path()),
            Err(OltError::Config { .. })
        ));
    }
}
