//! CLI and TL1 command builders
//!
//! CLI steps carry the prompt they leave the device at; TL1 commands are
//! confirmed by `COMPLD` and need no extra annotation.

use gpon_session_common::{quote, Command, Prompt};

use crate::config::LimitsConfig;
use crate::tables::{tl1_desc, tr069, CommandGroup, CLI_BRIDGE_DESC};
use crate::types::{OnuSerial, PonAddress, PonPort};

/// One CLI command and the prompt that confirms it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliStep {
    pub command: Command,
    pub prompt: Prompt,
}

impl CliStep {
    fn hash(text: impl Into<String>) -> Self {
        Self {
            command: Command::new(text),
            prompt: Prompt::Hash,
        }
    }

    fn dollar(text: impl Into<String>) -> Self {
        Self {
            command: Command::new(text),
            prompt: Prompt::Dollar,
        }
    }
}

/// Leaves any configuration node
pub const EXIT_ALL: &str = "exit all";

// ---- CLI queries ----

pub fn build_unprovisioned_cmd() -> Command {
    Command::new("show pon unprovision-onu")
}

pub fn build_locate_cmd(serial: &OnuSerial) -> Command {
    Command::new(format!(
        "show equipment ont status pon | match exact:{}",
        serial.cli_form()
    ))
}

pub fn build_pon_status_cmd(port: PonPort) -> Command {
    Command::new(format!("show equipment ont status pon {}", port.cli_path()))
}

pub fn build_pon_status_xml_cmd(port: PonPort) -> Command {
    Command::new(format!("show equipment ont status pon {} xml", port.cli_path()))
}

pub fn build_optics_cmd(address: &PonAddress) -> Command {
    Command::new(format!("show equipment ont optics {} detail", address.cli_path()))
}

pub fn build_interface_detail_cmd(address: &PonAddress) -> Command {
    Command::new(format!(
        "show equipment ont interface {} detail",
        address.cli_path()
    ))
}

// ---- CLI provisioning ----

/// Creates the ONT entry and brings it up so the ONU reports its model.
pub fn build_stage_steps(address: &PonAddress, serial: &OnuSerial, name: &str) -> Vec<CliStep> {
    vec![
        CliStep::dollar(format!(
            "configure equipment ont interface {} sernum {} sw-ver-pland disabled desc1 {} desc2 {} optics-hist enable",
            address.cli_path(),
            serial.cli_form(),
            quote(name),
            quote(CLI_BRIDGE_DESC),
        )),
        CliStep::dollar("admin-state up"),
        CliStep::hash(EXIT_ALL),
    ]
}

/// Takes the ONT out of service and deletes it, freeing the position.
pub fn build_remove_steps(address: &PonAddress) -> Vec<CliStep> {
    vec![
        CliStep::hash(format!(
            "configure equipment ont interface {} admin-state down",
            address.cli_path()
        )),
        CliStep::hash(format!(
            "configure equipment ont no interface {}",
            address.cli_path()
        )),
        CliStep::hash(EXIT_ALL),
    ]
}

fn uni_path(address: &PonAddress) -> String {
    format!("{}/1/1", address.cli_path())
}

fn card_step(address: &PonAddress) -> CliStep {
    CliStep::dollar(format!(
        "configure equipment ont slot {}/1 plndnumdataports 1 plndnumvoiceports 0 planned-card-type ethernet admin-state up",
        address.cli_path()
    ))
}

fn uni_admin_up_step(address: &PonAddress) -> CliStep {
    CliStep::hash(format!(
        "configure interface port uni:{} admin-up",
        uni_path(address)
    ))
}

fn upstream_qos_step(address: &PonAddress, limits: &LimitsConfig) -> CliStep {
    CliStep::hash(format!(
        "configure qos interface {} upstream-queue 0 bandwidth-profile name:{}",
        uni_path(address),
        limits.upstream_profile
    ))
}

fn vlan_steps(address: &PonAddress, vlan: u16) -> [CliStep; 3] {
    [
        CliStep::dollar(format!(
            "configure bridge port {} vlan-id {} tag untagged",
            uni_path(address),
            vlan
        )),
        CliStep::hash(EXIT_ALL),
        CliStep::hash(format!(
            "configure bridge port {} pvid {}",
            uni_path(address),
            vlan
        )),
    ]
}

/// Bridge service sequence for a classified ONU.
pub fn build_group_steps(
    group: CommandGroup,
    address: &PonAddress,
    vlan: u16,
    limits: &LimitsConfig,
) -> Vec<CliStep> {
    let mut steps = Vec::new();
    match group {
        CommandGroup::Group01 | CommandGroup::Group02 => {
            steps.push(card_step(address));
            steps.push(uni_admin_up_step(address));
            steps.push(upstream_qos_step(address, limits));
            steps.push(CliStep::hash(EXIT_ALL));
            steps.push(CliStep::dollar(format!(
                "configure bridge port {} max-unicast-mac {} max-committed-mac {}",
                uni_path(address),
                limits.max_unicast_mac,
                limits.max_committed_mac
            )));
            steps.extend(vlan_steps(address, vlan));
            let tagging = if group == CommandGroup::Group01 {
                "onu"
            } else {
                "olt"
            };
            steps.push(CliStep::hash(format!(
                "configure bridge port {} pvid-tagging-flag {}",
                uni_path(address),
                tagging
            )));
        }
        CommandGroup::Group03 => {
            steps.push(CliStep::dollar(format!(
                "configure qos interface ont:{} ds-queue-sharing",
                address.cli_path()
            )));
            steps.push(CliStep::hash(EXIT_ALL));
            steps.push(card_step(address));
            steps.push(uni_admin_up_step(address));
            steps.push(upstream_qos_step(address, limits));
            steps.push(CliStep::hash(format!(
                "configure qos interface {} queue 0 shaper-profile name:{}",
                address.cli_path(),
                limits.downstream_profile
            )));
            steps.push(CliStep::hash(EXIT_ALL));
            steps.push(CliStep::dollar(format!(
                "configure bridge port {} max-unicast-mac {}",
                uni_path(address),
                limits.extended_unicast_mac
            )));
            steps.extend(vlan_steps(address, vlan));
        }
    }
    steps
}

// ---- TL1 ----

/// Service plan requested at ONT creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tl1Plan {
    Bridge,
    Router,
}

impl Tl1Plan {
    fn planned_variant(&self) -> &'static str {
        match self {
            Tl1Plan::Bridge => "BRG",
            Tl1Plan::Router => "VEIP_SIP",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tl1Plan::Bridge => tl1_desc::BRIDGE,
            Tl1Plan::Router => tl1_desc::ROUTER,
        }
    }

    /// ONT card slot carrying the service
    fn card(&self) -> u8 {
        match self {
            Tl1Plan::Bridge => 1,
            Tl1Plan::Router => 14,
        }
    }
}

pub fn build_ent_ont_cmd(
    address: &PonAddress,
    serial: &OnuSerial,
    name: &str,
    plan: Tl1Plan,
) -> Command {
    Command::new(format!(
        "ENT-ONT::ONT-{}::::DESC1={},DESC2={},SERNUM={},PLNDVAR={},SWVERPLND=AUTO,DLSW=AUTO,PLNDCFGFILE1=AUTO,DLCFGFILE1=AUTO,OPTICSHIST=ENABLE,VOIPALLOWED=VEIP;",
        address.tl1_aid(),
        quote(name),
        quote(plan.description()),
        serial.tl1_form(),
        plan.planned_variant(),
    ))
}

pub fn build_ont_in_service_cmd(address: &PonAddress) -> Command {
    Command::new(format!("ED-ONT::ONT-{}:::::IS;", address.tl1_aid()))
}

pub fn build_ont_out_of_service_cmd(address: &PonAddress) -> Command {
    Command::new(format!("ED-ONT::ONT-{}:::::OOS;", address.tl1_aid()))
}

pub fn build_dlt_ont_cmd(address: &PonAddress) -> Command {
    Command::new(format!("DLT-ONT::ONT-{};", address.tl1_aid()))
}

pub fn build_reboot_cmd(address: &PonAddress) -> Command {
    Command::new(format!("INIT-SYS::ONT-{}:::6;", address.tl1_aid()))
}

/// Card, logical port, QoS and VLAN setup after the ONT is in service.
pub fn build_tl1_service_cmds(
    address: &PonAddress,
    plan: Tl1Plan,
    vlan: u16,
    limits: &LimitsConfig,
) -> Vec<Command> {
    let aid = address.tl1_aid();
    let card = plan.card();
    let (card_type, transmode) = match plan {
        Tl1Plan::Bridge => ("10_100BASET", "UNTAGGED"),
        Tl1Plan::Router => ("VEIP", "SINGLETAGGED"),
    };
    let uni = format!("ONTL2UNI-{}-{}-1", aid, card);

    let mut cmds = vec![
        Command::new(format!(
            "ENT-ONTCARD::ONTCARD-{}-{}:::{},1,0::IS;",
            aid, card, card_type
        )),
        Command::new(format!("ENT-LOGPORT::{}:::;", uni)),
        Command::new(format!("ED-ONTVEIP::ONTVEIP-{}-{}-1:::::IS;", aid, card)),
        Command::new(format!(
            "SET-QOS-USQUEUE::ONTL2UNIQ-{}-{}-1-0::::USBWPROFNAME={};",
            aid, card, limits.upstream_profile
        )),
        Command::new(format!(
            "SET-VLANPORT::{}:::MAXNUCMACADR={},CMITMAXNUMMACADDR={};",
            uni, limits.tl1_max_mac, limits.tl1_committed_mac
        )),
        Command::new(format!(
            "ENT-VLANEGPORT::{}:::0,{}:PORTTRANSMODE={};",
            uni, vlan, transmode
        )),
    ];
    if plan == Tl1Plan::Bridge {
        cmds.push(Command::new(format!(
            "SET-VLANPORT::{}:::DEFAULTCVLAN={};",
            uni, vlan
        )));
    }
    cmds
}

fn param_aid(address: &PonAddress, param: tr069::Param) -> String {
    format!("HGUTR069SPARAM-{}-{}", address.tl1_aid(), param.index)
}

/// Sets a TR-069 parameter slot. `value` is sent verbatim.
pub fn build_set_param_cmd(address: &PonAddress, param: tr069::Param, value: &str) -> Command {
    Command::new(format!(
        "ENT-HGUTR069-SPARAM::{}::::PARAMNAME={},PARAMVALUE={};",
        param_aid(address, param),
        param.name,
        value
    ))
}

/// Sets a TR-069 parameter slot holding a secret; the value is masked in logs.
pub fn build_set_secret_param_cmd(
    address: &PonAddress,
    param: tr069::Param,
    value: &str,
    secret: &str,
) -> Command {
    build_set_param_cmd(address, param, value).with_secret(secret)
}

pub fn build_dlt_param_cmd(address: &PonAddress, param: tr069::Param) -> Command {
    Command::new(format!(
        "DLT-HGUTR069-SPARAM::{};",
        param_aid(address, param)
    ))
}

/// SSID and passphrase on both radios, in slot order.
pub fn build_wifi_cmds(address: &PonAddress, ssid: &str, password: &str) -> Vec<Command> {
    let ssid_5g = format!("{}{}", ssid, tr069::SSID_5G_SUFFIX);
    vec![
        build_set_param_cmd(address, tr069::SSID_2G, &quote(ssid)),
        build_set_secret_param_cmd(address, tr069::PSK_2G, &quote(password), password),
        build_set_param_cmd(address, tr069::SSID_5G, &quote(&ssid_5g)),
        build_set_secret_param_cmd(address, tr069::PSK_5G, &quote(password), password),
    ]
}

/// WAN VLAN plus PPPoE account, in slot order.
pub fn build_pppoe_cmds(address: &PonAddress, vlan: u16, user: &str, password: &str) -> Vec<Command> {
    vec![
        build_set_param_cmd(address, tr069::WAN_VLAN, &vlan.to_string()),
        build_set_param_cmd(address, tr069::PPPOE_USER, user),
        build_set_secret_param_cmd(address, tr069::PPPOE_PASSWORD, password, password),
    ]
}

pub fn build_enable_wan_http_cmd(address: &PonAddress) -> Command {
    build_set_param_cmd(address, tr069::HTTP_DISABLED, "false")
}

pub fn build_web_password_cmd(address: &PonAddress, password: &str) -> Command {
    build_set_secret_param_cmd(address, tr069::WEB_PASSWORD, password, password)
}
