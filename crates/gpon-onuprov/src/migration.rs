//! Mass migration of unauthorized ONUs
//!
//! Jobs are keyed by normalized serial and driven through convergence
//! cycles. Each cycle refreshes the unauthorized inventory and provisions
//! every pending job whose ONU is present. The run stops at the first
//! cycle that migrates nothing, unless jobs were deferred by a connection
//! failure: those get up to the retry policy's attempt budget of further
//! cycles. Whatever is still pending then becomes `not_found`, or `error`
//! if it was deferred.

use std::collections::HashMap;
use std::io::Write;

use gpon_orch_common::{JobCounts, JobLedger, JobStatus};
use gpon_session_common::{Connector, OltError, OltResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::VlanTable;
use crate::orchestrator::Provisioner;
use crate::types::{
    OnuIdentity, OnuSerial, PonAddress, PonPort, PppoeCredentials, ProvisioningJob,
    ProvisioningMode, WifiCredentials,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One migration request, as read from the job list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub serial: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: ProvisioningMode,
    #[serde(default)]
    pub model: Option<String>,
    /// Used when the VLAN table has no entry for the ONU's port
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub ssid_password: Option<String>,
    #[serde(default)]
    pub pppoe_user: Option<String>,
    #[serde(default)]
    pub pppoe_password: Option<String>,
}

impl MigrationJob {
    pub fn new(serial: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builds the provisioning request for an ONU seen on `port`.
    pub fn to_provisioning(&self, port: PonPort, vlan: u16) -> OltResult<ProvisioningJob> {
        let onu = OnuIdentity::new(OnuSerial::parse(&self.serial)?, &self.name);
        let mut job = match self.mode {
            ProvisioningMode::Bridge => ProvisioningJob::bridge(onu, port, vlan),
            ProvisioningMode::Router => {
                let pppoe = match (&self.pppoe_user, &self.pppoe_password) {
                    (Some(user), Some(password)) if !user.trim().is_empty() => {
                        Some(PppoeCredentials {
                            user: user.trim().to_string(),
                            password: password.clone(),
                        })
                    }
                    _ => None,
                };
                let wifi = match (&self.ssid, &self.ssid_password) {
                    (Some(ssid), Some(password)) if !ssid.trim().is_empty() => {
                        Some(WifiCredentials::new(ssid, password)?)
                    }
                    _ => None,
                };
                ProvisioningJob::router(onu, port, vlan, pppoe, wifi)
            }
        };
        if let Some(model) = &self.model {
            job = job.with_model(model.as_str());
        }
        job.validate()?;
        Ok(job)
    }
}

/// Result of one migration job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub serial: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pon: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

fn now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

impl MigrationOutcome {
    pub fn migrated(serial: &str, address: PonAddress, name: &str, vlan: u16) -> Self {
        Self {
            serial: serial.to_string(),
            status: JobStatus::Migrated,
            slot: Some(address.slot),
            pon: Some(address.pon),
            position: Some(address.position),
            name: Some(name.to_string()),
            vlan: Some(vlan),
            error: None,
            timestamp: now(),
        }
    }

    pub fn failed(serial: &str, status: JobStatus, reason: impl Into<String>) -> Self {
        Self {
            serial: serial.to_string(),
            status,
            slot: None,
            pon: None,
            position: None,
            name: None,
            vlan: None,
            error: Some(reason.into()),
            timestamp: now(),
        }
    }
}

/// Receives outcomes as they are decided.
pub trait OutcomeSink {
    fn record(&mut self, outcome: &MigrationOutcome) -> OltResult<()>;
}

impl OutcomeSink for Vec<MigrationOutcome> {
    fn record(&mut self, outcome: &MigrationOutcome) -> OltResult<()> {
        self.push(outcome.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutcomeSink for JsonLinesSink<W> {
    fn record(&mut self, outcome: &MigrationOutcome) -> OltResult<()> {
        serde_json::to_writer(&mut self.writer, outcome)
            .map_err(|e| OltError::config(format!("Failed to encode outcome: {}", e)))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Summary of a migration run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    /// One outcome per distinct serial, in decision order
    pub outcomes: Vec<MigrationOutcome>,
    pub counts: JobCounts,
    pub cycles: u32,
}

/// Per-run bookkeeping: ledger, decided outcomes and the sink.
struct RunState<'s> {
    ledger: JobLedger<String>,
    outcomes: Vec<MigrationOutcome>,
    sink: &'s mut dyn OutcomeSink,
}

impl RunState<'_> {
    fn decide(&mut self, outcome: MigrationOutcome) -> OltResult<()> {
        self.ledger
            .resolve(&outcome.serial, outcome.status)
            .map_err(|e| OltError::config(e.to_string()))?;
        info!(serial = %outcome.serial, status = %outcome.status, error = ?outcome.error, "Migration outcome");
        self.sink.record(&outcome)?;
        self.outcomes.push(outcome);
        Ok(())
    }
}

/// Drives a batch of migration jobs to a fixed point.
pub struct MigrationScheduler<'p, C> {
    provisioner: &'p Provisioner<C>,
    vlans: VlanTable,
}

impl<'p, C: Connector> MigrationScheduler<'p, C> {
    pub fn new(provisioner: &'p Provisioner<C>, vlans: VlanTable) -> Self {
        Self { provisioner, vlans }
    }

    /// Runs all jobs. Device failures end up in outcomes; only a failing
    /// sink aborts the run.
    #[instrument(skip_all, fields(olt = %self.provisioner.connector().olt_name(), jobs = jobs.len()))]
    pub async fn run(
        &self,
        jobs: &[MigrationJob],
        sink: &mut dyn OutcomeSink,
    ) -> OltResult<MigrationReport> {
        let mut state = RunState {
            ledger: JobLedger::new(),
            outcomes: Vec::new(),
            sink,
        };
        let mut by_serial: HashMap<String, (OnuSerial, &MigrationJob)> = HashMap::new();

        for job in jobs {
            match OnuSerial::parse(&job.serial) {
                Ok(serial) => {
                    let key = serial.as_str().to_string();
                    if state.ledger.track(key.clone()) {
                        by_serial.insert(key, (serial, job));
                    } else {
                        warn!(serial = %key, "Duplicate migration job ignored");
                    }
                }
                Err(e) => {
                    let key = job.serial.trim().to_string();
                    if state.ledger.track(key.clone()) {
                        state.decide(MigrationOutcome::failed(&key, JobStatus::Error, e.to_string()))?;
                    }
                }
            }
        }

        let mut deferred: HashMap<String, String> = HashMap::new();
        let retry = self.provisioner.retry_policy();
        let mut cycles = 0;
        let mut stalled = 0;
        while state.ledger.has_pending() {
            cycles += 1;
            let inventory = match self.provisioner.list_unauthorized().await {
                Ok(inventory) => inventory,
                Err(e) => {
                    warn!(cycle = cycles, error = %e, "Inventory refresh failed, stopping");
                    for key in state.ledger.pending() {
                        deferred
                            .entry(key)
                            .or_insert_with(|| format!("inventory unavailable: {}", e));
                    }
                    break;
                }
            };
            debug!(cycle = cycles, unauthorized = inventory.len(), "Migration cycle started");

            let mut migrated = 0;
            let mut deferred_now = 0;
            for key in state.ledger.pending() {
                let Some((serial, job)) = by_serial.get(&key) else {
                    continue;
                };
                let Some(port) = inventory.get(serial).copied() else {
                    continue;
                };

                let Some(vlan) = self.vlans.lookup(port).or(job.vlan) else {
                    state.decide(MigrationOutcome::failed(
                        &key,
                        JobStatus::Error,
                        format!("no VLAN configured for port {}", port),
                    ))?;
                    continue;
                };

                let request = match job.to_provisioning(port, vlan) {
                    Ok(request) => request,
                    Err(e) => {
                        state.decide(MigrationOutcome::failed(&key, JobStatus::Error, e.to_string()))?;
                        continue;
                    }
                };

                let report = self.provisioner.provision(&request).await;
                match (report.is_provisioned(), report.address) {
                    (true, Some(address)) => {
                        deferred.remove(&key);
                        state.decide(MigrationOutcome::migrated(
                            &key,
                            address,
                            &request.onu.name,
                            vlan,
                        ))?;
                        migrated += 1;
                    }
                    _ => {
                        let reason = report
                            .reason()
                            .unwrap_or_else(|| format!("provisioning ended {}", report.state));
                        let connection_lost = report
                            .error
                            .as_ref()
                            .is_some_and(|e| e.is_connection_failure());
                        if connection_lost && !report.side_effects() {
                            warn!(serial = %key, reason = %reason, "Connection failure, job deferred");
                            deferred.insert(key, reason);
                            deferred_now += 1;
                        } else {
                            state.decide(MigrationOutcome::failed(&key, JobStatus::Error, reason))?;
                        }
                    }
                }
            }

            info!(
                cycle = cycles,
                migrated,
                deferred = deferred_now,
                pending = state.ledger.pending().len(),
                "Migration cycle finished"
            );
            if migrated > 0 {
                stalled = 0;
                continue;
            }
            // Deferred jobs get up to `max_attempts` more cycles without progress.
            stalled += 1;
            if deferred_now == 0 || stalled > retry.max_attempts {
                break;
            }
            let delay = retry.backoff_for(stalled);
            warn!(
                cycle = cycles,
                deferred = deferred_now,
                delay_ms = delay.as_millis() as u64,
                "No progress, retrying deferred jobs"
            );
            tokio::time::sleep(delay).await;
        }

        for key in state.ledger.pending() {
            let outcome = match deferred.remove(&key) {
                Some(reason) => MigrationOutcome::failed(&key, JobStatus::Error, reason),
                None => MigrationOutcome::failed(
                    &key,
                    JobStatus::NotFound,
                    "not present in unauthorized inventory",
                ),
            };
            state.decide(outcome)?;
        }

        let counts = state.ledger.counts();
        info!(
            migrated = counts.migrated,
            error = counts.error,
            not_found = counts.not_found,
            cycles,
            "Migration finished"
        );
        Ok(MigrationReport {
            outcomes: state.outcomes,
            counts,
            cycles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_record_defaults() {
        let job: MigrationJob = serde_json::from_str(r#"{"serial": "abcd12345678"}"#).unwrap();
        assert_eq!(job.mode, ProvisioningMode::Bridge);
        assert_eq!(job.vlan, None);
        assert_eq!(job.name, "");
    }

    #[test]
    fn test_bridge_job_conversion() {
        let mut job = MigrationJob::new("abcd-12345678", "");
        job.model = Some("TX-6610".to_string());
        let request = job.to_provisioning(PonPort::new(1, 2), 100).unwrap();
        assert_eq!(request.serial().as_str(), "ABCD12345678");
        assert_eq!(request.onu.name, "CLIENTE");
        assert_eq!(request.model.as_deref(), Some("TX-6610"));
        assert_eq!(request.mode, ProvisioningMode::Bridge);
        assert_eq!(request.wifi, None);
    }

    #[test]
    fn test_router_job_conversion() {
        let job = MigrationJob {
            mode: ProvisioningMode::Router,
            ssid: Some("Casa Silva".to_string()),
            ssid_password: Some("wifisecret".to_string()),
            pppoe_user: Some("silva@isp".to_string()),
            pppoe_password: Some("ppp".to_string()),
            ..MigrationJob::new("ALCLB3D4E5F6", "Silva")
        };
        let request = job.to_provisioning(PonPort::new(3, 16), 200).unwrap();
        assert_eq!(request.mode, ProvisioningMode::Router);
        assert_eq!(request.pppoe.as_ref().unwrap().user, "silva@isp");
        assert_eq!(request.wifi.as_ref().unwrap().ssid, "Casa Silva");
    }

    #[test]
    fn test_router_job_with_bad_wifi_is_rejected() {
        let job = MigrationJob {
            mode: ProvisioningMode::Router,
            ssid: Some("Casa".to_string()),
            ssid_password: Some("short".to_string()),
            ..MigrationJob::new("ALCLB3D4E5F6", "Silva")
        };
        assert!(matches!(
            job.to_provisioning(PonPort::new(3, 16), 200),
            Err(OltError::Validation { .. })
        ));
    }

    #[test]
    fn test_outcome_serialization_skips_empty_fields() {
        let outcome = MigrationOutcome::failed("ABCD12345678", JobStatus::NotFound, "absent");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "not_found");
        assert_eq!(value["error"], "absent");
        assert!(value.get("slot").is_none());
        assert_eq!(outcome.timestamp.len(), 19);

        let address = PonAddress::new(PonPort::new(1, 2), 5).unwrap();
        let outcome = MigrationOutcome::migrated("ABCD12345678", address, "Maria", 100);
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["vlan"], 100);
        assert_eq!(value["position"], 5);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(&MigrationOutcome::failed("A1B2C3D4", JobStatus::Error, "x"))
            .unwrap();
        sink.record(&MigrationOutcome::failed("A1B2C3D5", JobStatus::Error, "y"))
            .unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: MigrationOutcome = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.serial, "A1B2C3D4");
    }
}
