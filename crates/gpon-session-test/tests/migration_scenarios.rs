//! Migration scenarios against a simulated OLT
//!
//! Drives the migration scheduler end to end: inventory refresh, position
//! allocation, staging, classification and the service sequence.

use gpon_onuprov::{
    allocate, JsonLinesSink, MigrationJob, MigrationOutcome, MigrationScheduler,
    PonPort, Provisioner, TimingConfig, VlanTable, MAX_PON_POSITION,
};
use gpon_orch_common::{JobCounts, JobStatus, RetryPolicy};
use gpon_session_common::Dialect;
use gpon_session_test::{fixtures::*, OltVerifier, SimulatedConnector, SimulatedOlt};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn provisioner(olt: &SimulatedOlt) -> Provisioner<SimulatedConnector> {
    Provisioner::new(olt.connector())
        .with_timing(TimingConfig::immediate())
        .with_retry(RetryPolicy::no_retry())
}

fn vlans() -> VlanTable {
    let mut table = VlanTable::new();
    table.insert(PonPort::new(SLOT, PON), VLAN);
    table
}

fn jobs(list: Vec<Value>) -> Vec<MigrationJob> {
    serde_json::from_value(job_list(list)).expect("Job list should deserialize")
}

/// Bridge ONU with a group01 model is migrated with the port's VLAN
///
/// Scenario:
/// 1. ABCD12345678 waits on 1/2, the VLAN table maps 1/2 to 100
/// 2. The job does not name a model, so it is read from the device
/// 3. Outcome is migrated at position 1 with VLAN 100
#[tokio::test]
async fn test_bridge_job_is_migrated_with_port_vlan() {
    let olt = generic_olt();
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![bridge_job(GENERIC_SERIAL, None)]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.cycles, 1);
    assert_eq!(
        report.counts,
        JobCounts {
            migrated: 1,
            ..JobCounts::default()
        }
    );
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.serial, GENERIC_SERIAL);
    assert_eq!(outcome.status, JobStatus::Migrated);
    assert_eq!(outcome.vlan, Some(VLAN));
    assert_eq!((outcome.slot, outcome.pon, outcome.position), (Some(SLOT), Some(PON), Some(1)));
    assert_eq!(outcome.name.as_deref(), Some(SUBSCRIBER));
    assert_eq!(recorded, report.outcomes);

    let verifier = OltVerifier::new(&olt);
    let onu = verifier
        .assert_provisioned(GENERIC_SERIAL)
        .expect("ONU should be provisioned");
    assert_eq!(onu.position, 1);
    assert_eq!(onu.name, SUBSCRIBER);
    assert!(onu.admin_up);
    assert!(olt.unauthorized().is_empty());

    verifier
        .assert_sent_in_order(
            Dialect::Cli,
            &[
                "sernum ABCD:12345678",
                "admin-state up",
                "show equipment ont interface 1/1/1/2/1 detail",
                "plndnumdataports 1",
                "vlan-id 100 tag untagged",
                "pvid 100",
                "pvid-tagging-flag onu",
            ],
        )
        .expect("Unexpected CLI sequence");
    verifier.assert_all_sessions_closed().expect("Session leak");
}

/// Unknown model is rolled back and its position freed
///
/// Scenario:
/// 1. Same device as the bridge scenario, job names model UNKNOWN-X
/// 2. The staged ONT is removed and the outcome is error
/// 3. The allocator hands out the same position again
#[tokio::test]
async fn test_unknown_model_is_rolled_back() {
    let olt = generic_olt();
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![bridge_job(GENERIC_SERIAL, Some(UNKNOWN_MODEL))]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.counts.error, 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, JobStatus::Error);
    assert!(outcome
        .error
        .as_deref()
        .unwrap_or_default()
        .contains(UNKNOWN_MODEL));
    assert_eq!(outcome.position, None);

    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_not_provisioned(GENERIC_SERIAL)
        .expect("Rolled back ONU should be gone");
    verifier
        .assert_sent_in_order(
            Dialect::Cli,
            &[
                "sernum ABCD:12345678",
                "configure equipment ont interface 1/1/1/2/1 admin-state down",
                "configure equipment ont no interface 1/1/1/2/1",
            ],
        )
        .expect("Rollback not issued");
    verifier
        .assert_not_sent(Dialect::Cli, "vlan-id")
        .expect("Service configured on an unknown model");

    let occupied = olt.occupied_positions(SLOT, PON);
    assert!(occupied.is_empty());
    assert_eq!(
        allocate(&occupied, MAX_PON_POSITION, PonPort::new(SLOT, PON)).unwrap(),
        1
    );
    assert_eq!(olt.unauthorized().get(GENERIC_SERIAL), Some(&(SLOT, PON)));
}

/// A full PON fails the job before anything is staged
#[tokio::test]
async fn test_full_pon_is_reported_as_error() {
    let olt = generic_olt();
    olt.fill_pon(SLOT, PON, MAX_PON_POSITION);
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![bridge_job(GENERIC_SERIAL, None)]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, JobStatus::Error);
    assert!(outcome
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("No free position"));
    OltVerifier::new(&olt)
        .assert_not_sent(Dialect::Cli, "sernum")
        .expect("Nothing should be staged on a full PON");
}

/// Jobs whose ONU never shows up end as not_found after one idle cycle
#[tokio::test]
async fn test_absent_onu_is_not_found() {
    let olt = generic_olt();
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![bridge_job(SECOND_GENERIC_SERIAL, None)]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.cycles, 1);
    assert_eq!(report.counts.not_found, 1);
    assert_eq!(report.outcomes[0].serial, SECOND_GENERIC_SERIAL);
    assert_eq!(report.outcomes[0].status, JobStatus::NotFound);
    assert!(olt.provisioned().is_empty());
}

/// Mixed batch: every distinct serial gets exactly one outcome
///
/// Scenario:
/// 1. Two generic ONUs on 1/2, one with a group03 model
/// 2. Jobs: both ONUs, one absent serial, one malformed serial, one duplicate
/// 3. Positions are handed out lowest-first, one session at a time
#[tokio::test]
async fn test_mixed_batch_outcomes() {
    let olt = generic_olt()
        .with_unauthorized(SECOND_GENERIC_SERIAL, SLOT, PON)
        .with_model(SECOND_GENERIC_SERIAL, GROUP03_MODEL);
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![
        bridge_job("bad serial!", None),
        bridge_job(GENERIC_SERIAL, None),
        bridge_job("abcd-1234-5678", None),
        bridge_job(SECOND_GENERIC_SERIAL, None),
        bridge_job("ZZZZ00000000", None),
    ]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(
        report.counts,
        JobCounts {
            pending: 0,
            migrated: 2,
            error: 1,
            not_found: 1,
        }
    );
    let summary: Vec<(&str, JobStatus, Option<u16>)> = report
        .outcomes
        .iter()
        .map(|o| (o.serial.as_str(), o.status, o.position))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("bad serial!", JobStatus::Error, None),
            (GENERIC_SERIAL, JobStatus::Migrated, Some(1)),
            (SECOND_GENERIC_SERIAL, JobStatus::Migrated, Some(2)),
            ("ZZZZ00000000", JobStatus::NotFound, None),
        ]
    );

    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_sent(Dialect::Cli, "ont:1/1/1/2/2 ds-queue-sharing")
        .expect("group03 sequence not used");
    assert_eq!(verifier.count(Dialect::Cli, "sernum ABCD:12345678"), 1);
    verifier.assert_max_sessions(1).expect("Sessions overlapped");
    verifier.assert_all_sessions_closed().expect("Session leak");
}

/// Router job on a Nokia ONT goes through TL1 with PPPoE and WiFi
#[tokio::test]
async fn test_router_job_over_tl1() {
    let olt = nokia_olt();
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![router_job(NOKIA_SERIAL)]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.counts.migrated, 1);
    let onu = OltVerifier::new(&olt)
        .assert_provisioned(NOKIA_SERIAL)
        .expect("ONT should be provisioned");
    assert!(onu.tl1);
    assert!(onu.admin_up);
    assert_eq!(onu.desc2, "ROUTER");

    assert_eq!(olt.tl1_param(SLOT, PON, 1, 1).as_deref(), Some("100"));
    assert_eq!(olt.tl1_param(SLOT, PON, 1, 2).as_deref(), Some(PPPOE_USER));
    assert_eq!(olt.tl1_param(SLOT, PON, 1, 3).as_deref(), Some(PPPOE_PASSWORD));
    assert_eq!(
        olt.tl1_param(SLOT, PON, 1, 6).as_deref(),
        Some("\"CasaSilva\"")
    );
    assert_eq!(
        olt.tl1_param(SLOT, PON, 1, 8).as_deref(),
        Some("\"CasaSilva5Ghz\"")
    );

    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_sent_in_order(
            Dialect::Tl1,
            &[
                "ENT-ONT::ONT-1-1-1-2-1",
                "ED-ONT::ONT-1-1-1-2-1:::::IS;",
                "ENT-ONTCARD::ONTCARD-1-1-1-2-1-14",
                "DLT-HGUTR069-SPARAM::HGUTR069SPARAM-1-1-1-2-1-1;",
                "HGUTR069SPARAM-1-1-1-2-1-1::::",
                "DLT-HGUTR069-SPARAM::HGUTR069SPARAM-1-1-1-2-1-6;",
                "HGUTR069SPARAM-1-1-1-2-1-9::::",
                "LOGOFF;",
            ],
        )
        .expect("Unexpected TL1 sequence");
    verifier
        .assert_not_sent(Dialect::Cli, "sernum")
        .expect("Nokia ONT must not be staged over the CLI");
    verifier.assert_all_sessions_closed().expect("Session leak");
}

/// A refused login before anything is staged defers the job to the next cycle
#[tokio::test]
async fn test_connection_failure_defers_job() {
    let olt = generic_olt()
        .with_unauthorized(SECOND_GENERIC_SERIAL, SLOT, PON)
        .with_model(SECOND_GENERIC_SERIAL, GROUP01_MODEL);
    // Inventory login goes through, the first provisioning login is refused.
    olt.refuse_logins_after(1, 1);
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![
        bridge_job(GENERIC_SERIAL, None),
        bridge_job(SECOND_GENERIC_SERIAL, None),
    ]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.cycles, 2);
    assert_eq!(report.counts.migrated, 2);
    let order: Vec<(&str, Option<u16>)> = report
        .outcomes
        .iter()
        .map(|o| (o.serial.as_str(), o.position))
        .collect();
    assert_eq!(
        order,
        vec![(SECOND_GENERIC_SERIAL, Some(1)), (GENERIC_SERIAL, Some(2))]
    );
}

/// A cycle that only defers is retried instead of ending the run
#[tokio::test(start_paused = true)]
async fn test_lone_deferred_job_is_retried() {
    let olt = generic_olt();
    olt.refuse_logins_after(1, 1);
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![bridge_job(GENERIC_SERIAL, None)]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.cycles, 2);
    assert_eq!(
        report.counts,
        JobCounts {
            migrated: 1,
            ..JobCounts::default()
        }
    );
    assert_eq!(report.outcomes[0].position, Some(1));
    OltVerifier::new(&olt)
        .assert_provisioned(GENERIC_SERIAL)
        .expect("ONU not provisioned");
}

/// Inventory that cannot be read stops the run; pending jobs end as error
#[tokio::test]
async fn test_inventory_failure_stops_run() {
    let olt = generic_olt();
    olt.refuse_logins(1);
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![bridge_job(GENERIC_SERIAL, None)]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.counts.error, 1);
    assert!(report.outcomes[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("inventory unavailable"));
    assert!(olt.provisioned().is_empty());
}

/// Job VLAN is used when the table has no entry for the port
#[tokio::test]
async fn test_job_vlan_fallback() {
    let olt = generic_olt();
    let provisioner = provisioner(&olt);
    let mut job = bridge_job(GENERIC_SERIAL, None);
    job["vlan"] = serde_json::json!(300);
    let jobs = jobs(vec![job]);

    let mut recorded: Vec<MigrationOutcome> = Vec::new();
    let report = MigrationScheduler::new(&provisioner, VlanTable::new())
        .run(&jobs, &mut recorded)
        .await
        .expect("Migration run failed");

    assert_eq!(report.outcomes[0].vlan, Some(300));
    OltVerifier::new(&olt)
        .assert_sent(Dialect::Cli, "vlan-id 300 tag untagged")
        .expect("Job VLAN not applied");
}

/// Outcomes written as JSON lines read back as the same records
#[tokio::test]
async fn test_json_lines_sink() {
    let olt = generic_olt();
    let provisioner = provisioner(&olt);
    let jobs = jobs(vec![
        bridge_job(GENERIC_SERIAL, None),
        bridge_job(SECOND_GENERIC_SERIAL, None),
    ]);

    let mut sink = JsonLinesSink::new(Vec::new());
    let report = MigrationScheduler::new(&provisioner, vlans())
        .run(&jobs, &mut sink)
        .await
        .expect("Migration run failed");

    let text = String::from_utf8(sink.into_inner()).expect("Sink output is not UTF-8");
    let lines: Vec<MigrationOutcome> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("Invalid JSON line"))
        .collect();
    assert_eq!(lines, report.outcomes);

    let first: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["status"], "migrated");
    assert_eq!(first["vlan"], 100);
    let second: Value = serde_json::from_str(text.lines().nth(1).unwrap()).unwrap();
    assert_eq!(second["status"], "not_found");
    assert!(second.get("slot").is_none());
}
