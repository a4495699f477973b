//! Single-ONU provisioning against a simulated OLT
//!
//! Covers the state machine paths and failure handling: rejected steps,
//! silent devices, dropped sessions and the rollback of staged entries.

use gpon_onuprov::{
    OnuIdentity, OnuSerial, PonPort, ProvisionState, Provisioner, ProvisioningJob,
    ProvisioningPath, CommandGroup, TimingConfig, WifiCredentials,
};
use gpon_orch_common::RetryPolicy;
use gpon_session_common::{Dialect, OltError};
use gpon_session_test::{fixtures::*, FaultKind, OltVerifier, SimulatedConnector, SimulatedOlt};
use pretty_assertions::assert_eq;

fn provisioner(olt: &SimulatedOlt) -> Provisioner<SimulatedConnector> {
    Provisioner::new(olt.connector())
        .with_timing(TimingConfig::immediate())
        .with_retry(RetryPolicy::no_retry())
}

fn bridge(serial: &str) -> ProvisioningJob {
    let serial = OnuSerial::parse(serial).expect("Invalid serial");
    ProvisioningJob::bridge(
        OnuIdentity::new(serial, SUBSCRIBER),
        PonPort::new(SLOT, PON),
        VLAN,
    )
}

fn named_bridge(serial: &str, name: &str) -> ProvisioningJob {
    let serial = OnuSerial::parse(serial).expect("Invalid serial");
    ProvisioningJob::bridge(OnuIdentity::new(serial, name), PonPort::new(SLOT, PON), VLAN)
}

/// Detected model drives the CLI group and every state is visited in order
#[tokio::test]
async fn test_cli_bridge_state_sequence() {
    let olt = generic_olt();
    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert_eq!(
        report.transitions,
        vec![
            ProvisionState::Idle,
            ProvisionState::Staged,
            ProvisionState::Classified,
            ProvisionState::Provisioned,
        ]
    );
    assert_eq!(report.model.as_deref(), Some(GROUP01_MODEL));
    assert_eq!(report.path, Some(ProvisioningPath::Cli(CommandGroup::Group01)));
    assert_eq!(report.address.map(|a| a.position), Some(1));
    assert!(report.error.is_none());
    assert!(report.into_result().is_ok());
}

/// Positions already in use are skipped
#[tokio::test]
async fn test_lowest_free_position_is_used() {
    let olt = generic_olt();
    olt.add_provisioned(SECOND_GENERIC_SERIAL, SLOT, PON, 1, "vizinho");
    olt.add_provisioned("ABCF00000003", SLOT, PON, 3, "vizinho");

    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert!(report.is_provisioned());
    assert_eq!(report.address.map(|a| a.position), Some(2));
    assert_eq!(
        olt.occupied_positions(SLOT, PON).into_iter().collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

/// A job pinned to a position skips allocation
#[tokio::test]
async fn test_fixed_position() {
    let olt = generic_olt();
    let job = bridge(GENERIC_SERIAL).at_position(40);

    let report = provisioner(&olt).provision(&job).await;

    assert!(report.is_provisioned());
    assert_eq!(report.address.map(|a| a.position), Some(40));
    OltVerifier::new(&olt)
        .assert_not_sent(Dialect::Cli, "show equipment ont status pon 1/1/1/2")
        .expect("Allocation query sent for a fixed position");
}

/// Detection that finds no model fails after staging and removes the entry
#[tokio::test]
async fn test_missing_model_rolls_back_staged_entry() {
    let olt = SimulatedOlt::new().with_unauthorized(GENERIC_SERIAL, SLOT, PON);

    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert_eq!(report.state, ProvisionState::Failed);
    assert!(report.side_effects());
    assert!(matches!(report.error, Some(OltError::Parse { .. })));
    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_not_provisioned(GENERIC_SERIAL)
        .expect("Staged entry left behind");
    verifier
        .assert_sent(Dialect::Cli, "configure equipment ont no interface 1/1/1/2/1")
        .expect("Cleanup not issued");
}

/// Unknown model detected on the device ends rolled back
#[tokio::test]
async fn test_detected_unknown_model() {
    let olt = SimulatedOlt::new()
        .with_unauthorized(GENERIC_SERIAL, SLOT, PON)
        .with_model(GENERIC_SERIAL, UNKNOWN_MODEL);

    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert_eq!(
        report.transitions,
        vec![
            ProvisionState::Idle,
            ProvisionState::Staged,
            ProvisionState::Classified,
            ProvisionState::RolledBack,
        ]
    );
    match report.into_result() {
        Err(OltError::ModelIncompatible { model }) => assert_eq!(model, UNKNOWN_MODEL),
        other => panic!("Expected ModelIncompatible, got {:?}", other.map(|r| r.state)),
    }
    assert!(olt.occupied_positions(SLOT, PON).is_empty());
}

/// A rejected CLI step stops the sequence and triggers cleanup
#[tokio::test]
async fn test_rejected_cli_step_halts_sequence() {
    let olt = generic_olt();
    olt.inject_fault("max-unicast-mac", FaultKind::Reject);

    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert_eq!(report.state, ProvisionState::Failed);
    assert!(matches!(report.error, Some(OltError::CommandRejected { .. })));
    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_not_sent(Dialect::Cli, "vlan-id")
        .expect("Steps after the rejection were sent");
    verifier
        .assert_sent_in_order(
            Dialect::Cli,
            &[
                "max-unicast-mac",
                "admin-state down",
                "no interface 1/1/1/2/1",
            ],
        )
        .expect("Cleanup not issued after rejection");
    verifier
        .assert_not_provisioned(GENERIC_SERIAL)
        .expect("Staged entry left behind");
}

/// TL1 DENY aborts the service sequence; later commands in it are never sent
///
/// Scenario:
/// 1. Nokia ONT provisioned as bridge over TL1
/// 2. The upstream QoS command is denied
/// 3. VLAN commands are not sent, the ONT is taken out of service and deleted
#[tokio::test]
async fn test_tl1_deny_halts_sequence() {
    let olt = nokia_olt();
    olt.inject_fault("SET-QOS-USQUEUE", FaultKind::Reject);

    let report = provisioner(&olt).provision(&bridge(NOKIA_SERIAL)).await;

    assert_eq!(report.state, ProvisionState::Failed);
    assert_eq!(report.path, Some(ProvisioningPath::Tl1Bridge));
    match &report.error {
        Some(OltError::CommandRejected { command, response }) => {
            assert!(command.starts_with("SET-QOS-USQUEUE"));
            assert!(response.contains("DENY"));
        }
        other => panic!("Expected CommandRejected, got {:?}", other),
    }

    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_not_sent(Dialect::Tl1, "SET-VLANPORT")
        .expect("Command after DENY was sent");
    verifier
        .assert_not_sent(Dialect::Tl1, "ENT-VLANEGPORT")
        .expect("Command after DENY was sent");
    verifier
        .assert_sent_in_order(
            Dialect::Tl1,
            &[
                "ENT-ONT::ONT-1-1-1-2-1",
                "ED-ONT::ONT-1-1-1-2-1:::::IS;",
                "SET-QOS-USQUEUE",
                "ED-ONT::ONT-1-1-1-2-1:::::OOS;",
                "DLT-ONT::ONT-1-1-1-2-1;",
                "LOGOFF;",
            ],
        )
        .expect("Unexpected TL1 sequence");
    verifier
        .assert_not_provisioned(NOKIA_SERIAL)
        .expect("Staged ONT left behind");
    verifier.assert_all_sessions_closed().expect("Session leak");
}

/// Reply tokens inside the subscriber name are part of the echoed command
#[tokio::test]
async fn test_tl1_name_containing_reply_tokens() {
    let olt = nokia_olt();
    let job = named_bridge(NOKIA_SERIAL, "DENYSE COMPLD COSTA");

    let report = provisioner(&olt).provision(&job).await;

    assert!(report.is_provisioned(), "{:?}", report.error);
    assert_eq!(report.path, Some(ProvisioningPath::Tl1Bridge));
    OltVerifier::new(&olt)
        .assert_provisioned(NOKIA_SERIAL)
        .expect("ONT not provisioned");
}

/// Prompt characters inside the subscriber name do not end the wait early
#[tokio::test]
async fn test_cli_name_containing_prompt_characters() {
    let olt = generic_olt();
    olt.inject_fault("admin-state up", FaultKind::Reject);

    let report = provisioner(&olt)
        .provision(&named_bridge(GENERIC_SERIAL, "Loja $ Centro #2"))
        .await;

    assert_eq!(report.state, ProvisionState::Failed);
    match &report.error {
        Some(OltError::CommandRejected { command, response }) => {
            assert_eq!(command, "admin-state up");
            assert_eq!(response, "Error : simulated rejection");
        }
        other => panic!("Expected CommandRejected, got {:?}", other),
    }
}

/// A rejected secret-bearing step reports the device reply, never the secret
#[tokio::test]
async fn test_rejected_wifi_step_keeps_password_out_of_error() {
    let olt = nokia_olt();
    olt.inject_fault("WLANConfiguration.1.PreSharedKey", FaultKind::Reject);
    let serial = OnuSerial::parse(NOKIA_SERIAL).unwrap();
    let job = ProvisioningJob::router(
        OnuIdentity::new(serial, SUBSCRIBER),
        PonPort::new(SLOT, PON),
        VLAN,
        None,
        Some(WifiCredentials::new(WIFI_SSID, "DENYpass99").unwrap()),
    );

    let report = provisioner(&olt).provision(&job).await;

    assert_eq!(report.state, ProvisionState::Failed);
    let err = report.error.expect("No error reported");
    assert!(matches!(err, OltError::CommandRejected { .. }));
    for rendered in [format!("{}", err), format!("{:?}", err)] {
        assert!(!rendered.contains("pass99"), "{}", rendered);
        assert!(!rendered.contains("DENYpass"), "{}", rendered);
    }
}

/// A device that stops answering fails the job with a timeout
#[tokio::test(start_paused = true)]
async fn test_silent_step_times_out_and_cleans_up() {
    let olt = generic_olt();
    olt.inject_fault("pvid-tagging-flag", FaultKind::Silent);

    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert_eq!(report.state, ProvisionState::Failed);
    assert!(matches!(report.error, Some(OltError::ProtocolTimeout { .. })));
    OltVerifier::new(&olt)
        .assert_not_provisioned(GENERIC_SERIAL)
        .expect("Staged entry left behind");
}

/// A dropped session cannot be cleaned up; the entry stays and the job fails
#[tokio::test]
async fn test_disconnect_leaves_staged_entry() {
    let olt = generic_olt();
    olt.inject_fault("pvid-tagging-flag", FaultKind::Disconnect);

    let report = provisioner(&olt).provision(&bridge(GENERIC_SERIAL)).await;

    assert_eq!(report.state, ProvisionState::Failed);
    assert!(report.side_effects());
    assert!(report
        .error
        .as_ref()
        .is_some_and(|e| e.is_connection_failure()));
    let verifier = OltVerifier::new(&olt);
    verifier
        .assert_provisioned(GENERIC_SERIAL)
        .expect("Entry should remain after a lost session");
    verifier
        .assert_not_sent(Dialect::Cli, "admin-state down")
        .expect("Cleanup attempted on a closed session");
    verifier.assert_all_sessions_closed().expect("Session leak");
}

/// Invalid jobs fail before any session is opened
#[tokio::test]
async fn test_invalid_job_touches_nothing() {
    let olt = generic_olt();
    let mut job = bridge(GENERIC_SERIAL);
    job.vlan = 0;

    let report = provisioner(&olt).provision(&job).await;

    assert_eq!(report.state, ProvisionState::Failed);
    assert!(matches!(report.error, Some(OltError::Validation { .. })));
    assert!(!report.side_effects());
    assert_eq!(olt.sessions_opened(), 0);
}

/// Wrong CLI credentials surface as a connection error before staging
#[tokio::test]
async fn test_bad_credentials() {
    let olt = generic_olt();
    let connector = SimulatedConnector::new(olt.clone()).with_cli_credentials(
        gpon_session_common::Credentials::new(gpon_session_test::CLI_USER, "wrong"),
    );
    let provisioner = Provisioner::new(connector)
        .with_timing(TimingConfig::immediate())
        .with_retry(RetryPolicy::no_retry());

    let report = provisioner.provision(&bridge(GENERIC_SERIAL)).await;

    assert!(matches!(report.error, Some(OltError::Connection { .. })));
    assert!(!report.side_effects());
    assert_eq!(olt.active_sessions(), 0);
}

/// Retries cover refused logins
#[tokio::test(start_paused = true)]
async fn test_login_retry() {
    let olt = generic_olt();
    olt.refuse_logins(2);
    let provisioner = Provisioner::new(olt.connector())
        .with_timing(TimingConfig::immediate())
        .with_retry(RetryPolicy::new(3));

    let report = provisioner.provision(&bridge(GENERIC_SERIAL)).await;

    assert!(report.is_provisioned());
    assert_eq!(olt.sessions_opened(), 1);
}

/// Router mode on a generic ONU falls back to the CLI bridge path
#[tokio::test]
async fn test_router_mode_on_generic_onu() {
    let olt = generic_olt();
    let serial = OnuSerial::parse(GENERIC_SERIAL).unwrap();
    let job = ProvisioningJob::router(
        OnuIdentity::new(serial, SUBSCRIBER),
        PonPort::new(SLOT, PON),
        VLAN,
        None,
        None,
    );

    let report = provisioner(&olt).provision(&job).await;

    assert!(report.is_provisioned());
    assert_eq!(report.path, Some(ProvisioningPath::Cli(CommandGroup::Group01)));
    OltVerifier::new(&olt)
        .assert_not_sent(Dialect::Tl1, "ENT-ONT")
        .expect("Generic ONU provisioned over TL1");
}
