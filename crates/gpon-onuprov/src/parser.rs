//! Parsers for CLI output.
//!
//! Every function here is pure. Where the device is known to omit data
//! (optics on an offline ONU, a serial not yet provisioned) the result is
//! `None`; only the XML listing, whose absence means the query itself went
//! wrong, reports a parse error.

use gpon_session_common::{OltError, OltResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::tables::{RACK, SHELF};
use crate::types::{OnuDetailRecord, OnuSerial, OpticalReading, PonAddress, PonPort};

static POSITION_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)/(\d+)/(\d+)/(\d+)/(\d+)").expect("Invalid regex pattern")
});

static PORT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)/(\d+)/(\d+)/(\d+)$").expect("Invalid regex pattern"));

static SERIAL_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]{4}:?[A-Za-z0-9]{4,}$").expect("Invalid regex pattern")
});

static OPTICS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)rx-signal-level\s*:\s*(-?\d+(?:\.\d+)?).*?ont-temperature\s*:\s*(-?\d+(?:\.\d+)?)",
    )
    .expect("Invalid regex pattern")
});

static EQUIP_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)equip-id[ \t]*:[ \t]*(\S+(?: \S+)*)").expect("Invalid regex pattern")
});

const XML_START: &str = "<?xml";
const XML_END: &str = "</runtime-data>";
const UNDEFINED_SERIAL: &str = "undefined";

/// Unauthorized ONUs by normalized serial
pub type UnauthorizedInventory = BTreeMap<OnuSerial, PonPort>;

/// Finds the first `rack/shelf/slot/pon/position` path in the output.
pub fn parse_position_path(text: &str) -> Option<PonAddress> {
    for caps in POSITION_PATH_RE.captures_iter(text) {
        let slot = caps[3].parse::<u8>().ok();
        let pon = caps[4].parse::<u8>().ok();
        let position = caps[5].parse::<u16>().ok();
        if let (Some(slot), Some(pon), Some(position)) = (slot, pon, position) {
            if let Ok(address) = PonAddress::new(PonPort::new(slot, pon), position) {
                return Some(address);
            }
        }
    }
    None
}

/// Extracts rx power (dBm) and temperature (°C) from optics detail output.
pub fn parse_optical_reading(text: &str) -> Option<OpticalReading> {
    let caps = OPTICS_RE.captures(text)?;
    Some(OpticalReading {
        rx_signal_dbm: caps[1].parse().ok()?,
        temperature_c: caps[2].parse().ok()?,
    })
}

/// Extracts the self-reported equipment id from interface detail output.
pub fn parse_model_id(text: &str) -> Option<String> {
    let caps = EQUIP_ID_RE.captures(text)?;
    let model = caps[1].trim().trim_matches('"').to_string();
    (!model.is_empty()).then_some(model)
}

fn parse_port_token(token: &str) -> Option<PonPort> {
    let caps = PORT_TOKEN_RE.captures(token)?;
    let rack = caps[1].parse::<u8>().ok()?;
    let shelf = caps[2].parse::<u8>().ok()?;
    if rack != RACK || shelf != SHELF {
        return None;
    }
    let slot = caps[3].parse::<u8>().ok().filter(|s| *s > 0)?;
    let pon = caps[4].parse::<u8>().ok().filter(|p| *p > 0)?;
    Some(PonPort::new(slot, pon))
}

/// Parses `show pon unprovision-onu` output.
///
/// A row counts only when it carries a `1/1/slot/pon` token immediately
/// followed by a serial-shaped token; headers, rulers and footers are
/// skipped.
pub fn parse_unauthorized_inventory(text: &str) -> UnauthorizedInventory {
    let mut inventory = UnauthorizedInventory::new();
    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        for (idx, token) in tokens.iter().enumerate() {
            let Some(port) = parse_port_token(token) else {
                continue;
            };
            let Some(serial_token) = tokens.get(idx + 1) else {
                continue;
            };
            if !SERIAL_TOKEN_RE.is_match(serial_token) {
                continue;
            }
            if let Ok(serial) = OnuSerial::parse(serial_token) {
                inventory.insert(serial, port);
            }
            break;
        }
    }
    inventory
}

/// Renders an inventory in the tabular shape [`parse_unauthorized_inventory`] reads.
pub fn render_unauthorized_inventory(inventory: &UnauthorizedInventory) -> String {
    let mut out = String::from("unprovision-onu table\n");
    out.push_str("alarm-idx  pon-id      sernum\n");
    out.push_str("---------+-----------+--------------\n");
    for (idx, (serial, port)) in inventory.iter().enumerate() {
        let _ = writeln!(out, "{:<10} {:<11} {}", idx + 1, port.cli_path(), serial.cli_form());
    }
    let _ = writeln!(out, "unprovision-onu count : {}", inventory.len());
    out
}

/// Positions in use on `port`, from `show equipment ont status pon <port>` output.
pub fn parse_occupied_positions(text: &str, port: PonPort) -> BTreeSet<u16> {
    let prefix = format!("{}/", port.cli_path());
    text.split_whitespace()
        .filter_map(|token| token.strip_prefix(&prefix))
        .filter_map(|rest| rest.parse::<u16>().ok())
        .collect()
}

fn info_text<'a>(instance: roxmltree::Node<'a, 'a>, tag: &str, name: &str) -> Option<&'a str> {
    instance
        .descendants()
        .find(|n| n.has_tag_name(tag) && n.attribute("name") == Some(name))
        .and_then(|n| n.text())
        .map(str::trim)
}

/// Parses the XML fragment embedded in `show equipment ont status pon <port> xml`.
///
/// Instances without a usable serial are skipped. Optics are left empty.
pub fn parse_onu_detail_xml(text: &str) -> OltResult<Vec<OnuDetailRecord>> {
    let start = text
        .find(XML_START)
        .ok_or_else(|| OltError::parse("ONU listing", "no XML document in output"))?;
    let end = text[start..]
        .find(XML_END)
        .map(|offset| start + offset + XML_END.len())
        .ok_or_else(|| OltError::parse("ONU listing", "XML document is truncated"))?;

    let document = roxmltree::Document::parse(&text[start..end])
        .map_err(|e| OltError::parse("ONU listing", e.to_string()))?;

    let mut records = Vec::new();
    for instance in document.descendants().filter(|n| n.has_tag_name("instance")) {
        let serial = info_text(instance, "info", "sernum")
            .unwrap_or_default()
            .replace(':', "");
        if serial.is_empty() || serial.eq_ignore_ascii_case(UNDEFINED_SERIAL) {
            continue;
        }

        let position = info_text(instance, "res-id", "ont")
            .and_then(|ont| ont.rsplit('/').next())
            .and_then(|last| last.parse::<u16>().ok());
        let field = |name: &str| info_text(instance, "info", name).unwrap_or_default();

        records.push(OnuDetailRecord {
            position,
            serial,
            name: field("desc1").replace('"', ""),
            mode: field("desc2").replace('"', ""),
            admin_status: field("admin-status").to_string(),
            oper_status: field("oper-status").to_string(),
            rx_signal_dbm: None,
            temperature_c: None,
            distance_km: field("ont-olt-distance(km)").parse::<f64>().ok(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const UNPROVISIONED: &str = "\
show pon unprovision-onu\r
===============================================================================\r
unprovision-onu table\r
===============================================================================\r
alarm-idx  pon-id      sernum        subscriber-locid  logical-authid\r
---------+-----------+-------------+-----------------+-----------------\r
1          1/1/1/2     ABCD:12345678 DEFAULT           DEFAULT\r
2          1/1/3/16    ALCL:B3D4E5F6 DEFAULT           DEFAULT\r
3          1/1/3/16    garbage!!     DEFAULT           DEFAULT\r
4          2/1/3/16    TPLG:00000001 DEFAULT           DEFAULT\r
-------------------------------------------------------------------------------\r
unprovision-onu count : 4\r
";

    fn serial(s: &str) -> OnuSerial {
        OnuSerial::parse(s).unwrap()
    }

    #[test]
    fn test_parse_unauthorized_inventory() {
        let inventory = parse_unauthorized_inventory(UNPROVISIONED);
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory[&serial("ABCD12345678")], PonPort::new(1, 2));
        assert_eq!(inventory[&serial("ALCLB3D4E5F6")], PonPort::new(3, 16));
    }

    #[test]
    fn test_unauthorized_inventory_reparse_is_stable() {
        let inventory = parse_unauthorized_inventory(UNPROVISIONED);
        let rendered = render_unauthorized_inventory(&inventory);
        assert_eq!(parse_unauthorized_inventory(&rendered), inventory);
        let again = render_unauthorized_inventory(&parse_unauthorized_inventory(&rendered));
        assert_eq!(again, rendered);
    }

    #[test]
    fn test_empty_inventory() {
        assert!(parse_unauthorized_inventory("unprovision-onu count : 0\r\n").is_empty());
        assert!(parse_unauthorized_inventory("").is_empty());
    }

    #[test]
    fn test_parse_position_path() {
        let out = "ont  1/1/4/9/17  ALCL:B3D4E5F6  up  up  -18.20  3.4\r\n";
        let addr = parse_position_path(out).unwrap();
        assert_eq!(addr, PonAddress::new(PonPort::new(4, 9), 17).unwrap());
        assert_eq!(parse_position_path("no match here"), None);
        assert_eq!(parse_position_path("1/1/4/9/500"), None);
    }

    #[test]
    fn test_parse_optical_reading() {
        let out = "\
optics table\r
ont-idx : 1/1/1/1/3\r
rx-signal-level : -19.52     tx-signal-level : 2.31\r
ont-voltage : 3.30         olt-rx-sig-level : -23.10\r
ont-temperature : 47        laser-bias-curr : 11000\r
";
        let reading = parse_optical_reading(out).unwrap();
        assert_eq!(reading.rx_signal_dbm, -19.52);
        assert_eq!(reading.temperature_c, 47.0);
    }

    #[test]
    fn test_optics_absent_when_offline() {
        let out = "rx-signal-level : unknown\r\nont-temperature : unknown\r\n";
        assert_eq!(parse_optical_reading(out), None);
    }

    #[test]
    fn test_parse_model_id() {
        let out = "\
sernum : ABCD:12345678          equip-id : TX-6610              actual-num-slots : 1\r
";
        assert_eq!(parse_model_id(out), Some("TX-6610".to_string()));

        let out = "equip-id : PON110_V3.0\r\nnext : x";
        assert_eq!(parse_model_id(out), Some("PON110_V3.0".to_string()));

        assert_eq!(parse_model_id("equip-id :\r\n"), None);
        assert_eq!(parse_model_id("nothing"), None);
    }

    #[test]
    fn test_parse_occupied_positions() {
        let out = "\
ont-status table\r
pon       ont          sernum         admin oper\r
1/1/1/2   1/1/1/2/1    ABCD:00000001  up    up\r
1/1/1/2   1/1/1/2/3    ABCD:00000003  up    down\r
1/1/1/2   1/1/1/2/128  ABCD:00000128  up    up\r
1/1/1/20  1/1/1/20/2   ABCD:00000002  up    up\r
";
        let occupied = parse_occupied_positions(out, PonPort::new(1, 2));
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), vec![1, 3, 128]);
    }

    const XML_LISTING: &str = r#"show equipment ont status pon 1/1/1/2 xml
<?xml version="1.0" encoding="UTF-8"?>
<runtime-data>
  <hierarchy name="show" type="static">
    <instance>
      <res-id name="pon" short-name="pon">1/1/1/2</res-id>
      <res-id name="ont" short-name="ont">1/1/1/2/1</res-id>
      <info name="sernum" short-name="sernum">ABCD:00000001</info>
      <info name="admin-status" short-name="admin-status">up</info>
      <info name="oper-status" short-name="oper-status">up</info>
      <info name="ont-olt-distance(km)" short-name="distance">2.3</info>
      <info name="desc1" short-name="desc1">"Maria Silva"</info>
      <info name="desc2" short-name="desc2">"Bridge"</info>
    </instance>
    <instance>
      <res-id name="ont" short-name="ont">1/1/1/2/2</res-id>
      <info name="sernum" short-name="sernum">undefined</info>
    </instance>
    <instance>
      <res-id name="ont" short-name="ont">1/1/1/2/5</res-id>
      <info name="sernum" short-name="sernum">ALCL:B3D4E5F6</info>
      <info name="admin-status" short-name="admin-status">up</info>
      <info name="oper-status" short-name="oper-status">down</info>
      <info name="ont-olt-distance(km)" short-name="distance">undefined</info>
      <info name="desc1" short-name="desc1">"Joao"</info>
      <info name="desc2" short-name="desc2">"ROUTER"</info>
    </instance>
    <instance>
      <res-id name="ont" short-name="ont">1/1/1/2/7</res-id>
      <info name="sernum" short-name="sernum"></info>
    </instance>
  </hierarchy>
</runtime-data>
typ:isadmin>"#;

    #[test]
    fn test_parse_onu_detail_xml() {
        let records = parse_onu_detail_xml(XML_LISTING).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].position, Some(1));
        assert_eq!(records[0].serial, "ABCD00000001");
        assert_eq!(records[0].name, "Maria Silva");
        assert_eq!(records[0].mode, "Bridge");
        assert_eq!(records[0].admin_status, "up");
        assert_eq!(records[0].distance_km, Some(2.3));
        assert_eq!(records[0].rx_signal_dbm, None);

        assert_eq!(records[1].position, Some(5));
        assert_eq!(records[1].serial, "ALCLB3D4E5F6");
        assert_eq!(records[1].oper_status, "down");
        assert_eq!(records[1].distance_km, None);
    }

    #[test]
    fn test_parse_onu_detail_xml_errors() {
        assert!(matches!(
            parse_onu_detail_xml("typ:isadmin>#"),
            Err(OltError::Parse { .. })
        ));
        assert!(matches!(
            parse_onu_detail_xml("<?xml version=\"1.0\"?><runtime-data><instance>"),
            Err(OltError::Parse { .. })
        ));
        assert!(matches!(
            parse_onu_detail_xml("<?xml version=\"1.0\"?><runtime-data><a></runtime-data>"),
            Err(OltError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_onu_detail_xml_empty_listing() {
        let xml = "<?xml version=\"1.0\"?><runtime-data></runtime-data>";
        assert_eq!(parse_onu_detail_xml(xml).unwrap(), vec![]);
    }
}
