//! In-memory OLT that speaks both management dialects
//!
//! The simulator keeps just enough device state to answer the commands the
//! provisioning engine sends: unauthorized ONUs, provisioned ONTs per
//! position, model per serial, TR-069 parameter slots and a log of every
//! command received. Faults can be injected per command fragment.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use gpon_session_common::expect::describe;
use gpon_session_common::session::CLI_INHIBIT_ALARMS;
use gpon_session_common::{
    CliClient, Connector, Credentials, DeviceAddress, Dialect, ExpectBuffer, Match, OltError,
    OltResult, Pattern, Tl1Client, Transport,
};
use serde::Serialize;
use tracing::debug;

pub const SIM_HOST: &str = "sim-olt";
pub const CLI_USER: &str = "isadmin";
pub const CLI_PASSWORD: &str = "cli-secret";
pub const TL1_USER: &str = "SUPERUSER";
pub const TL1_PASSWORD: &str = "tl1-secret";

const CLI_PROMPT: &str = "typ:isadmin>#";
const CLI_NODE_PROMPT: &str = "typ:isadmin>configure$";
const TL1_HEADER: &str = "\r\n\n   SIM-OLT 26-10-16 12:00:00\r\n";

/// Default optics reported by a connected ONU
const RX_SIGNAL_DBM: &str = "-19.52";
const TEMPERATURE_C: &str = "45";

/// What the device does when a command matches an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `Error :` on the CLI, `DENY` on TL1
    Reject,
    /// No answer at all
    Silent,
    /// Connection drops
    Disconnect,
    /// The command runs, but its reply only arrives after the caller's
    /// wait for it has timed out
    Delayed,
}

#[derive(Debug, Clone)]
struct Fault {
    fragment: String,
    kind: FaultKind,
}

/// One command as received by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCommand {
    pub dialect: Dialect,
    pub text: String,
}

/// An ONT entry on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedOnu {
    pub serial: String,
    pub slot: u8,
    pub pon: u8,
    pub position: u16,
    pub name: String,
    pub desc2: String,
    pub admin_up: bool,
    /// Created over TL1
    pub tl1: bool,
}

impl ProvisionedOnu {
    fn cli_path(&self) -> String {
        format!("1/1/{}/{}/{}", self.slot, self.pon, self.position)
    }
}

#[derive(Debug, Default)]
struct OltState {
    unauthorized: BTreeMap<String, (u8, u8)>,
    provisioned: BTreeMap<(u8, u8, u16), ProvisionedOnu>,
    models: HashMap<String, String>,
    offline: BTreeSet<String>,
    params: BTreeMap<((u8, u8, u16), u8), String>,
    reboots: Vec<(u8, u8, u16)>,
    log: Vec<LoggedCommand>,
    faults: Vec<Fault>,
    refused_logins: usize,
    logins_before_refusal: usize,
    host_key_prompt: bool,
    active_sessions: usize,
    max_concurrent: usize,
    sessions_opened: usize,
}

enum Reply {
    Output(String),
    Delayed(String),
    Silent,
    Disconnect,
}

fn normalize(serial: &str) -> String {
    serial
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase()
}

fn cli_serial(serial: &str) -> String {
    if serial.len() > 4 && serial.is_char_boundary(4) {
        format!("{}:{}", &serial[..4], &serial[4..])
    } else {
        serial.to_string()
    }
}

fn parse_numbers(text: &str, sep: char) -> Option<Vec<u16>> {
    text.split(sep).map(|part| part.trim().parse().ok()).collect()
}

/// `1/1/slot/pon`
fn parse_cli_port(text: &str) -> Option<(u8, u8)> {
    match parse_numbers(text, '/')?.as_slice() {
        [1, 1, slot, pon] => Some((u8::try_from(*slot).ok()?, u8::try_from(*pon).ok()?)),
        _ => None,
    }
}

/// `1/1/slot/pon/position`
fn parse_cli_path(text: &str) -> Option<(u8, u8, u16)> {
    match parse_numbers(text, '/')?.as_slice() {
        [1, 1, slot, pon, position] => Some((
            u8::try_from(*slot).ok()?,
            u8::try_from(*pon).ok()?,
            *position,
        )),
        _ => None,
    }
}

/// `1-1-slot-pon-position`
fn parse_aid(text: &str) -> Option<(u8, u8, u16)> {
    match parse_numbers(text, '-')?.as_slice() {
        [1, 1, slot, pon, position] => Some((
            u8::try_from(*slot).ok()?,
            u8::try_from(*pon).ok()?,
            *position,
        )),
        _ => None,
    }
}

/// Text between `key"` and the next quote.
fn quoted_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let rest = text[start..].strip_prefix('"')?;
    rest.split('"').next()
}

/// CLI commands that enter a configuration node answer with `$`.
fn cli_prompt_for(command: &str) -> &'static str {
    const NODE_MARKERS: [&str; 5] = [
        " sernum ",
        " plndnumdataports ",
        " max-unicast-mac ",
        " vlan-id ",
        "ds-queue-sharing",
    ];
    let enters_node = command == "admin-state up"
        || (command.starts_with("configure ")
            && NODE_MARKERS.iter().any(|marker| command.contains(marker)));
    if enters_node {
        CLI_NODE_PROMPT
    } else {
        CLI_PROMPT
    }
}

fn tl1_completed() -> String {
    format!("{}M  0 COMPLD\r\n;\r\n<", TL1_HEADER)
}

fn tl1_denied(code: &str) -> String {
    format!("{}M  0 DENY\r\n   {}\r\n;\r\n<", TL1_HEADER, code)
}

impl OltState {
    fn fault_for(&self, command: &str) -> Option<FaultKind> {
        self.faults
            .iter()
            .find(|fault| command.contains(&fault.fragment))
            .map(|fault| fault.kind)
    }

    fn position_of(&self, serial: &str) -> Option<(u8, u8, u16)> {
        self.provisioned
            .iter()
            .find(|(_, onu)| onu.serial == serial)
            .map(|(key, _)| *key)
    }

    fn create(
        &mut self,
        key: (u8, u8, u16),
        serial: String,
        name: &str,
        desc2: &str,
        tl1: bool,
    ) -> Result<(), &'static str> {
        if self.provisioned.contains_key(&key) {
            return Err("instance already exists");
        }
        if self.position_of(&serial).is_some() {
            return Err("sernum already in use");
        }
        self.unauthorized.remove(&serial);
        let (slot, pon, position) = key;
        self.provisioned.insert(
            key,
            ProvisionedOnu {
                serial,
                slot,
                pon,
                position,
                name: name.to_string(),
                desc2: desc2.to_string(),
                admin_up: false,
                tl1,
            },
        );
        Ok(())
    }

    /// Deletes an ONT; the ONU is still on the fiber and shows up unauthorized again.
    fn remove(&mut self, key: (u8, u8, u16)) -> Result<(), &'static str> {
        let onu = self
            .provisioned
            .remove(&key)
            .ok_or("instance does not exist")?;
        self.params.retain(|(aid, _), _| *aid != key);
        self.unauthorized.insert(onu.serial, (onu.slot, onu.pon));
        Ok(())
    }

    fn set_admin(&mut self, key: (u8, u8, u16), up: bool) -> Result<(), &'static str> {
        let onu = self
            .provisioned
            .get_mut(&key)
            .ok_or("instance does not exist")?;
        onu.admin_up = up;
        Ok(())
    }

    fn respond(&mut self, dialect: Dialect, line: &str) -> Reply {
        let line = line.trim();
        self.log.push(LoggedCommand {
            dialect,
            text: line.to_string(),
        });

        let fault = self.fault_for(line);
        match fault {
            Some(FaultKind::Silent) => return Reply::Silent,
            Some(FaultKind::Disconnect) => return Reply::Disconnect,
            Some(FaultKind::Reject) => {
                return Reply::Output(match dialect {
                    Dialect::Cli => format!("Error : simulated rejection\r\n{}", CLI_PROMPT),
                    Dialect::Tl1 => tl1_denied("SIMULATED"),
                })
            }
            Some(FaultKind::Delayed) | None => {}
        }

        let reply = match dialect {
            Dialect::Cli => Reply::Output(match self.cli_command(line) {
                Ok(output) => format!("{}{}", output, cli_prompt_for(line)),
                Err(message) => format!("Error : {}\r\n{}", message, CLI_PROMPT),
            }),
            Dialect::Tl1 if line.is_empty() => Reply::Output("\r\n<".to_string()),
            Dialect::Tl1 => Reply::Output(match self.tl1_command(line) {
                Ok(()) => tl1_completed(),
                Err(code) => tl1_denied(code),
            }),
        };
        match (fault, reply) {
            (Some(FaultKind::Delayed), Reply::Output(output)) => Reply::Delayed(output),
            (_, reply) => reply,
        }
    }

    fn cli_command(&mut self, line: &str) -> Result<String, &'static str> {
        if line.is_empty()
            || line == "exit"
            || line == "exit all"
            || line == "admin-state up"
            || line == CLI_INHIBIT_ALARMS
        {
            return Ok(String::new());
        }
        if line == "show pon unprovision-onu" {
            return Ok(self.render_unprovisioned());
        }
        if let Some(serial) = line.strip_prefix("show equipment ont status pon | match exact:") {
            let serial = normalize(serial);
            return Ok(self.render_status(|onu| onu.serial == serial));
        }
        if let Some(rest) = line.strip_prefix("show equipment ont status pon ") {
            if let Some(port) = rest.strip_suffix(" xml") {
                let port = parse_cli_port(port).ok_or("invalid token")?;
                return Ok(self.render_xml(port));
            }
            let (slot, pon) = parse_cli_port(rest).ok_or("invalid token")?;
            return Ok(self.render_status(|onu| onu.slot == slot && onu.pon == pon));
        }
        if let Some(path) = line
            .strip_prefix("show equipment ont optics ")
            .and_then(|rest| rest.strip_suffix(" detail"))
        {
            let key = parse_cli_path(path).ok_or("invalid token")?;
            return self.render_optics(key);
        }
        if let Some(path) = line
            .strip_prefix("show equipment ont interface ")
            .and_then(|rest| rest.strip_suffix(" detail"))
        {
            let key = parse_cli_path(path).ok_or("invalid token")?;
            return self.render_interface(key);
        }
        if let Some(rest) = line.strip_prefix("configure equipment ont interface ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            let key = parse_cli_path(path).ok_or("invalid token")?;
            if let Some(after) = rest.split(" sernum ").nth(1) {
                let serial = normalize(after.split_whitespace().next().unwrap_or_default());
                let name = quoted_field(rest, "desc1 ").unwrap_or_default();
                let desc2 = quoted_field(rest, "desc2 ").unwrap_or_default();
                self.create(key, serial, name, desc2, false)?;
                // The follow-up `admin-state up` applies inside this node.
                self.set_admin(key, true)?;
            } else if rest.ends_with(" admin-state down") {
                self.set_admin(key, false)?;
            }
            return Ok(String::new());
        }
        if let Some(path) = line.strip_prefix("configure equipment ont no interface ") {
            let key = parse_cli_path(path).ok_or("invalid token")?;
            self.remove(key)?;
            return Ok(String::new());
        }
        if line.starts_with("configure ") {
            return Ok(String::new());
        }
        Err("invalid token")
    }

    fn render_unprovisioned(&self) -> String {
        let mut out = String::from("unprovision-onu table\r\n");
        out.push_str("alarm-idx  pon-id      sernum        subscriber-locid\r\n");
        out.push_str("---------+-----------+-------------+-----------------\r\n");
        for (idx, (serial, (slot, pon))) in self.unauthorized.iter().enumerate() {
            let _ = write!(
                out,
                "{:<10} {:<11} {:<13} DEFAULT\r\n",
                idx + 1,
                format!("1/1/{}/{}", slot, pon),
                cli_serial(serial)
            );
        }
        let _ = write!(out, "unprovision-onu count : {}\r\n", self.unauthorized.len());
        out
    }

    fn render_status(&self, filter: impl Fn(&ProvisionedOnu) -> bool) -> String {
        let mut out = String::from("ont-status table\r\npon       ont          sernum         admin oper\r\n");
        for onu in self.provisioned.values().filter(|onu| filter(onu)) {
            let oper = if self.offline.contains(&onu.serial) { "down" } else { "up" };
            let admin = if onu.admin_up { "up" } else { "down" };
            let _ = write!(
                out,
                "1/1/{}/{:<5} {:<12} {:<14} {:<5} {}\r\n",
                onu.slot,
                onu.pon,
                onu.cli_path(),
                cli_serial(&onu.serial),
                admin,
                oper
            );
        }
        out
    }

    fn render_xml(&self, (slot, pon): (u8, u8)) -> String {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<runtime-data>\r\n<hierarchy name=\"show\" type=\"static\">\r\n",
        );
        for onu in self
            .provisioned
            .values()
            .filter(|onu| onu.slot == slot && onu.pon == pon)
        {
            let oper = if self.offline.contains(&onu.serial) { "down" } else { "up" };
            let admin = if onu.admin_up { "up" } else { "down" };
            let _ = write!(
                out,
                concat!(
                    "<instance>\r\n",
                    "<res-id name=\"ont\" short-name=\"ont\">{}</res-id>\r\n",
                    "<info name=\"sernum\" short-name=\"sernum\">{}</info>\r\n",
                    "<info name=\"admin-status\" short-name=\"admin-status\">{}</info>\r\n",
                    "<info name=\"oper-status\" short-name=\"oper-status\">{}</info>\r\n",
                    "<info name=\"ont-olt-distance(km)\" short-name=\"distance\">1.2</info>\r\n",
                    "<info name=\"desc1\" short-name=\"desc1\">\"{}\"</info>\r\n",
                    "<info name=\"desc2\" short-name=\"desc2\">\"{}\"</info>\r\n",
                    "</instance>\r\n"
                ),
                onu.cli_path(),
                cli_serial(&onu.serial),
                admin,
                oper,
                xml_escape(&onu.name),
                xml_escape(&onu.desc2),
            );
        }
        out.push_str("</hierarchy>\r\n</runtime-data>\r\n");
        out
    }

    fn render_optics(&self, key: (u8, u8, u16)) -> Result<String, &'static str> {
        let onu = self.provisioned.get(&key).ok_or("instance does not exist")?;
        let (rx, temperature) = if self.offline.contains(&onu.serial) {
            ("unknown", "unknown")
        } else {
            (RX_SIGNAL_DBM, TEMPERATURE_C)
        };
        Ok(format!(
            "optics table\r\nont-idx : {}\r\nrx-signal-level : {}     tx-signal-level : 2.31\r\nont-temperature : {}     laser-bias-curr : 11000\r\n",
            onu.cli_path(),
            rx,
            temperature
        ))
    }

    fn render_interface(&self, key: (u8, u8, u16)) -> Result<String, &'static str> {
        let onu = self.provisioned.get(&key).ok_or("instance does not exist")?;
        let mut out = format!("interface table\r\nont-idx : {}\r\n", onu.cli_path());
        match self.models.get(&onu.serial) {
            Some(model) => {
                let _ = write!(
                    out,
                    "sernum : {}          equip-id : {}\r\n",
                    cli_serial(&onu.serial),
                    model
                );
            }
            None => {
                let _ = write!(out, "sernum : {}\r\n", cli_serial(&onu.serial));
            }
        }
        Ok(out)
    }

    fn tl1_command(&mut self, line: &str) -> Result<(), &'static str> {
        if line == "INH-MSG-ALL::ALL:::;" || line == "LOGOFF;" {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("ENT-ONT::ONT-") {
            let (aid, fields) = rest.split_once("::::").ok_or("ICNV")?;
            let key = parse_aid(aid).ok_or("IIAC")?;
            let serial = fields
                .split("SERNUM=")
                .nth(1)
                .and_then(|s| s.split(',').next())
                .map(normalize)
                .ok_or("IDNV")?;
            let name = quoted_field(fields, "DESC1=").unwrap_or_default();
            let desc2 = quoted_field(fields, "DESC2=").unwrap_or_default();
            return self
                .create(key, serial, name, desc2, true)
                .map_err(|_| "ENEA");
        }
        if let Some(rest) = line.strip_prefix("ED-ONT::ONT-") {
            let (aid, state) = rest.split_once(":::::").ok_or("ICNV")?;
            let key = parse_aid(aid).ok_or("IIAC")?;
            return self
                .set_admin(key, state.trim_end_matches(';') == "IS")
                .map_err(|_| "IENE");
        }
        if let Some(rest) = line.strip_prefix("DLT-ONT::ONT-") {
            let key = parse_aid(rest.trim_end_matches(';')).ok_or("IIAC")?;
            return self.remove(key).map_err(|_| "IENE");
        }
        if let Some(rest) = line.strip_prefix("ENT-HGUTR069-SPARAM::HGUTR069SPARAM-") {
            let (slot, fields) = rest.split_once("::::").ok_or("ICNV")?;
            let (key, index) = parse_param_slot(slot).ok_or("IIAC")?;
            if !self.provisioned.contains_key(&key) {
                return Err("IENE");
            }
            if self.params.contains_key(&(key, index)) {
                return Err("SROF");
            }
            let value = fields
                .split("PARAMVALUE=")
                .nth(1)
                .map(|v| v.trim_end_matches(';').to_string())
                .ok_or("IDNV")?;
            self.params.insert((key, index), value);
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("DLT-HGUTR069-SPARAM::HGUTR069SPARAM-") {
            let (key, index) = parse_param_slot(rest.trim_end_matches(';')).ok_or("IIAC")?;
            return self.params.remove(&(key, index)).map(|_| ()).ok_or("IENE");
        }
        if let Some(rest) = line.strip_prefix("INIT-SYS::ONT-") {
            let aid = rest.split(':').next().unwrap_or_default();
            let key = parse_aid(aid).ok_or("IIAC")?;
            if !self.provisioned.contains_key(&key) {
                return Err("IENE");
            }
            self.reboots.push(key);
            return Ok(());
        }
        const SERVICE_VERBS: [&str; 6] = [
            "ENT-ONTCARD::",
            "ENT-LOGPORT::",
            "ED-ONTVEIP::",
            "SET-QOS-USQUEUE::",
            "SET-VLANPORT::",
            "ENT-VLANEGPORT::",
        ];
        if SERVICE_VERBS.iter().any(|verb| line.starts_with(verb)) {
            return Ok(());
        }
        Err("ICNV")
    }
}

/// `1-1-slot-pon-position-index`
fn parse_param_slot(text: &str) -> Option<((u8, u8, u16), u8)> {
    let (aid, index) = text.rsplit_once('-')?;
    Some((parse_aid(aid)?, index.parse().ok()?))
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Shared handle to one simulated device
#[derive(Debug, Clone, Default)]
pub struct SimulatedOlt {
    state: Arc<Mutex<OltState>>,
}

impl SimulatedOlt {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, OltState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds an ONU waiting for provisioning on `slot/pon`.
    pub fn with_unauthorized(self, serial: &str, slot: u8, pon: u8) -> Self {
        self.add_unauthorized(serial, slot, pon);
        self
    }

    /// Sets the model an ONU reports once staged.
    pub fn with_model(self, serial: &str, model: &str) -> Self {
        self.set_model(serial, model);
        self
    }

    pub fn add_unauthorized(&self, serial: &str, slot: u8, pon: u8) {
        self.state().unauthorized.insert(normalize(serial), (slot, pon));
    }

    pub fn set_model(&self, serial: &str, model: &str) {
        self.state()
            .models
            .insert(normalize(serial), model.to_string());
    }

    /// ONU stops reporting optics.
    pub fn set_offline(&self, serial: &str) {
        self.state().offline.insert(normalize(serial));
    }

    /// Adds an already provisioned ONT.
    pub fn add_provisioned(&self, serial: &str, slot: u8, pon: u8, position: u16, name: &str) {
        let mut state = self.state();
        let serial = normalize(serial);
        state.unauthorized.remove(&serial);
        state.provisioned.insert(
            (slot, pon, position),
            ProvisionedOnu {
                serial,
                slot,
                pon,
                position,
                name: name.to_string(),
                desc2: "Bridge".to_string(),
                admin_up: true,
                tl1: false,
            },
        );
    }

    /// Occupies every position on a PON.
    pub fn fill_pon(&self, slot: u8, pon: u8, capacity: u16) {
        for position in 1..=capacity {
            let serial = format!("FILL{:04}{:04}", pon, position);
            self.add_provisioned(&serial, slot, pon, position, "filler");
        }
    }

    /// Pre-populates a TR-069 parameter slot.
    pub fn set_tl1_param(&self, slot: u8, pon: u8, position: u16, index: u8, value: &str) {
        self.state()
            .params
            .insert(((slot, pon, position), index), value.to_string());
    }

    /// Every command containing `fragment` triggers `kind` until cleared.
    pub fn inject_fault(&self, fragment: &str, kind: FaultKind) {
        self.state().faults.push(Fault {
            fragment: fragment.to_string(),
            kind,
        });
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// The next `count` connection attempts are refused.
    pub fn refuse_logins(&self, count: usize) {
        self.refuse_logins_after(0, count);
    }

    /// Lets `allowed` connections through, then refuses `count`.
    pub fn refuse_logins_after(&self, allowed: usize, count: usize) {
        let mut state = self.state();
        state.logins_before_refusal = allowed;
        state.refused_logins = count;
    }

    /// New sessions ask to confirm an unknown host key first.
    pub fn require_host_key_confirmation(&self) {
        self.state().host_key_prompt = true;
    }

    pub fn unauthorized(&self) -> BTreeMap<String, (u8, u8)> {
        self.state().unauthorized.clone()
    }

    pub fn provisioned(&self) -> Vec<ProvisionedOnu> {
        self.state().provisioned.values().cloned().collect()
    }

    pub fn find_provisioned(&self, serial: &str) -> Option<ProvisionedOnu> {
        let serial = normalize(serial);
        self.state()
            .provisioned
            .values()
            .find(|onu| onu.serial == serial)
            .cloned()
    }

    pub fn occupied_positions(&self, slot: u8, pon: u8) -> BTreeSet<u16> {
        self.state()
            .provisioned
            .keys()
            .filter(|(s, p, _)| *s == slot && *p == pon)
            .map(|(_, _, position)| *position)
            .collect()
    }

    pub fn tl1_param(&self, slot: u8, pon: u8, position: u16, index: u8) -> Option<String> {
        self.state()
            .params
            .get(&((slot, pon, position), index))
            .cloned()
    }

    pub fn reboots(&self) -> Vec<(u8, u8, u16)> {
        self.state().reboots.clone()
    }

    pub fn commands(&self) -> Vec<LoggedCommand> {
        self.state().log.clone()
    }

    pub fn clear_commands(&self) {
        self.state().log.clear();
    }

    pub fn active_sessions(&self) -> usize {
        self.state().active_sessions
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.state().max_concurrent
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    /// Opens a raw connection, or refuses it.
    pub fn open(&self, dialect: Dialect) -> OltResult<SimulatedTransport> {
        let mut state = self.state();
        if state.logins_before_refusal > 0 {
            state.logins_before_refusal -= 1;
        } else if state.refused_logins > 0 {
            state.refused_logins -= 1;
            return Err(OltError::connection(SIM_HOST, "connection refused"));
        }
        state.active_sessions += 1;
        state.sessions_opened += 1;
        state.max_concurrent = state.max_concurrent.max(state.active_sessions);

        let mut buffer = ExpectBuffer::new();
        let phase = if state.host_key_prompt {
            buffer.push("The authenticity of host 'sim-olt' can't be established.\r\nAre you sure you want to continue connecting (yes/no)? ");
            Phase::HostKey
        } else {
            buffer.push(&format!("{}@{}'s password: ", user_for(dialect), SIM_HOST));
            Phase::Password
        };
        debug!(dialect = %dialect, "Simulated session opened");

        Ok(SimulatedTransport {
            state: Arc::clone(&self.state),
            dialect,
            phase,
            buffer,
            late: Vec::new(),
            open: true,
            eof: false,
        })
    }

    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector::new(self.clone())
    }
}

fn user_for(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Cli => CLI_USER,
        Dialect::Tl1 => TL1_USER,
    }
}

fn password_for(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Cli => CLI_PASSWORD,
        Dialect::Tl1 => TL1_PASSWORD,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    HostKey,
    Password,
    Ready,
}

/// In-memory [`Transport`] bound to a [`SimulatedOlt`]
///
/// Replies are produced synchronously when a line is sent, so a wait that
/// finds nothing in the buffer can only time out or hit end of stream.
/// Delayed replies land in the buffer when such a wait times out.
pub struct SimulatedTransport {
    state: Arc<Mutex<OltState>>,
    dialect: Dialect,
    phase: Phase,
    buffer: ExpectBuffer,
    late: Vec<String>,
    open: bool,
    eof: bool,
}

impl SimulatedTransport {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.eof = true;
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active_sessions = state.active_sessions.saturating_sub(1);
        }
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send_line(&mut self, line: &str) -> OltResult<()> {
        if !self.open || self.eof {
            return Err(OltError::EndOfStream {
                waiting_for: "writable session".to_string(),
            });
        }
        match self.phase {
            Phase::HostKey => {
                if line.trim() == "yes" {
                    self.buffer.push(&format!(
                        "yes\r\nWarning: Permanently added '{}' to the list of known hosts.\r\n{}@{}'s password: ",
                        SIM_HOST,
                        user_for(self.dialect),
                        SIM_HOST
                    ));
                    self.phase = Phase::Password;
                } else {
                    self.buffer.push("Host key verification failed.\r\n");
                    self.eof = true;
                }
            }
            Phase::Password => {
                if line == password_for(self.dialect) {
                    match self.dialect {
                        Dialect::Cli => self
                            .buffer
                            .push(&format!("\r\nWelcome to the simulated OLT\r\n{}", CLI_PROMPT)),
                        Dialect::Tl1 => self.buffer.push("\r\nWelcome to ISAM\r\n"),
                    }
                    self.phase = Phase::Ready;
                } else {
                    self.buffer.push("\r\nPermission denied, please try again.\r\n");
                }
            }
            Phase::Ready => {
                let reply = self
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .respond(self.dialect, line);
                self.buffer.push(&format!("{}\r\n", line));
                match reply {
                    Reply::Output(output) => self.buffer.push(&output),
                    Reply::Delayed(output) => self.late.push(output),
                    Reply::Silent => {}
                    Reply::Disconnect => {
                        self.buffer.push("Connection closed by foreign host.\r\n");
                        self.eof = true;
                    }
                }
            }
        }
        Ok(())
    }

    async fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> OltResult<Match> {
        if let Some(m) = self.buffer.try_match(patterns) {
            return Ok(m);
        }
        if self.eof || !self.open {
            return Err(OltError::EndOfStream {
                waiting_for: describe(patterns),
            });
        }
        tokio::time::sleep(timeout).await;
        for output in self.late.drain(..) {
            self.buffer.push(&output);
        }
        Err(OltError::timeout(describe(patterns), timeout))
    }

    async fn close(&mut self) {
        self.release();
    }

    fn is_open(&self) -> bool {
        self.open && !self.eof
    }
}

/// [`Connector`] that logs in to a [`SimulatedOlt`]
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    olt: SimulatedOlt,
    cli_credentials: Credentials,
    tl1_credentials: Credentials,
    login_timeout: Duration,
}

impl SimulatedConnector {
    pub fn new(olt: SimulatedOlt) -> Self {
        Self {
            olt,
            cli_credentials: Credentials::new(CLI_USER, CLI_PASSWORD),
            tl1_credentials: Credentials::new(TL1_USER, TL1_PASSWORD),
            login_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_cli_credentials(mut self, credentials: Credentials) -> Self {
        self.cli_credentials = credentials;
        self
    }

    pub fn with_tl1_credentials(mut self, credentials: Credentials) -> Self {
        self.tl1_credentials = credentials;
        self
    }

    pub fn olt(&self) -> &SimulatedOlt {
        &self.olt
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn open_cli(&self) -> OltResult<CliClient> {
        let address = DeviceAddress::new(SIM_HOST, 22, self.cli_credentials.clone(), Dialect::Cli);
        let transport = self.olt.open(Dialect::Cli)?;
        CliClient::login(Box::new(transport), &address, self.login_timeout).await
    }

    async fn open_tl1(&self) -> OltResult<Tl1Client> {
        let address =
            DeviceAddress::new(SIM_HOST, 1023, self.tl1_credentials.clone(), Dialect::Tl1);
        let transport = self.olt.open(Dialect::Tl1)?;
        Tl1Client::login(Box::new(transport), &address, self.login_timeout).await
    }

    fn olt_name(&self) -> &str {
        SIM_HOST
    }
}
