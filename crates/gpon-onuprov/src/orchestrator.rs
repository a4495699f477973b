//! Provisioner - per-ONU provisioning state machine
//!
//! Flow for one job:
//! 1. Resolve the target position over the CLI (fixed or lowest free)
//! 2. Stage the ONT entry and bring it up
//! 3. Classify: the CLI path queries the model, the TL1 path follows the
//!    requested plan
//! 4. Apply the group or plan command sequence, or remove the entry when
//!    the model is unknown
//!
//! Every session opened here is closed before the call returns. A failure
//! after staging removes the staged entry on a best-effort basis so the
//! position is free for the next attempt.

use std::fmt;
use std::time::Duration;

use gpon_orch_common::RetryPolicy;
use gpon_session_common::{
    countdown, CliClient, Connector, OltError, OltResult, Tl1Client, Tl1Reply,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::allocator;
use crate::commands::{
    build_dlt_ont_cmd, build_dlt_param_cmd, build_ent_ont_cmd, build_group_steps,
    build_interface_detail_cmd, build_ont_in_service_cmd, build_ont_out_of_service_cmd,
    build_pon_status_cmd, build_pppoe_cmds, build_remove_steps, build_set_param_cmd,
    build_stage_steps, build_tl1_service_cmds, build_wifi_cmds, CliStep, Tl1Plan,
};
use crate::config::{LimitsConfig, OnuprovConfig, TimingConfig};
use crate::parser::{parse_model_id, parse_occupied_positions};
use crate::tables::{tr069, CommandGroup, ModelTable};
use crate::types::{
    OnuSerial, PonAddress, ProvisioningJob, ProvisioningMode, Vendor, WifiCredentials,
};

/// Provisioning state of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionState {
    Idle,
    Staged,
    Classified,
    Provisioned,
    RolledBack,
    Failed,
}

impl ProvisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionState::Idle => "idle",
            ProvisionState::Staged => "staged",
            ProvisionState::Classified => "classified",
            ProvisionState::Provisioned => "provisioned",
            ProvisionState::RolledBack => "rolled_back",
            ProvisionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisionState::Provisioned | ProvisionState::RolledBack | ProvisionState::Failed
        )
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command sequence chosen at classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningPath {
    Cli(CommandGroup),
    Tl1Bridge,
    Tl1Router,
}

impl fmt::Display for ProvisioningPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningPath::Cli(group) => write!(f, "cli/{}", group),
            ProvisioningPath::Tl1Bridge => f.write_str("tl1/bridge"),
            ProvisioningPath::Tl1Router => f.write_str("tl1/router"),
        }
    }
}

/// What happened to one provisioning job
#[derive(Debug)]
pub struct ProvisionReport {
    pub serial: OnuSerial,
    pub address: Option<PonAddress>,
    pub model: Option<String>,
    pub path: Option<ProvisioningPath>,
    pub state: ProvisionState,
    /// Every state visited, starting with `Idle`
    pub transitions: Vec<ProvisionState>,
    pub error: Option<OltError>,
    touched: bool,
}

impl ProvisionReport {
    fn new(serial: OnuSerial) -> Self {
        Self {
            serial,
            address: None,
            model: None,
            path: None,
            state: ProvisionState::Idle,
            transitions: vec![ProvisionState::Idle],
            error: None,
            touched: false,
        }
    }

    fn advance(&mut self, state: ProvisionState) {
        debug!(serial = %self.serial, from = %self.state, to = %state, "Provisioning state change");
        self.state = state;
        self.transitions.push(state);
    }

    fn fail(&mut self, error: OltError) {
        self.advance(ProvisionState::Failed);
        self.error = Some(error);
    }

    /// True once a staging command was sent, whether or not it committed.
    pub fn side_effects(&self) -> bool {
        self.touched
    }

    pub fn is_provisioned(&self) -> bool {
        self.state == ProvisionState::Provisioned
    }

    /// Human-readable failure reason, if the job did not provision.
    pub fn reason(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// `Ok` only for a provisioned job.
    pub fn into_result(self) -> OltResult<ProvisionReport> {
        match self.state {
            ProvisionState::Provisioned => Ok(self),
            ProvisionState::RolledBack => Err(self.error.unwrap_or(OltError::ModelIncompatible {
                model: self.model.unwrap_or_default(),
            })),
            state => Err(self.error.unwrap_or_else(|| {
                OltError::config(format!("provisioning stopped in state {}", state))
            })),
        }
    }
}

/// Drives provisioning and lifecycle operations against one OLT.
pub struct Provisioner<C> {
    pub(crate) connector: C,
    pub(crate) models: ModelTable,
    pub(crate) timing: TimingConfig,
    pub(crate) limits: LimitsConfig,
    pub(crate) retry: RetryPolicy,
}

impl<C: Connector> Provisioner<C> {
    /// Creates a provisioner with the built-in model table and default settings
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            models: ModelTable::builtin(),
            timing: TimingConfig::default(),
            limits: LimitsConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Creates a provisioner from a loaded configuration
    pub fn from_config(connector: C, config: &OnuprovConfig) -> OltResult<Self> {
        Ok(Self {
            connector,
            models: config.model_table()?,
            timing: config.timing.clone(),
            limits: config.limits.clone(),
            retry: config.retry_policy(),
        })
    }

    pub fn with_models(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn models(&self) -> &ModelTable {
        &self.models
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) async fn open_cli(&self) -> OltResult<CliClient> {
        self.retry
            .run("open CLI session", |_| self.connector.open_cli())
            .await
    }

    pub(crate) async fn open_tl1(&self) -> OltResult<Tl1Client> {
        self.retry
            .run("open TL1 session", |_| self.connector.open_tl1())
            .await
    }

    pub(crate) async fn run_steps(&self, cli: &mut CliClient, steps: &[CliStep]) -> OltResult<()> {
        let timeout = self.timing.command_timeout();
        for step in steps {
            cli.execute(&step.command, step.prompt, timeout).await?;
        }
        Ok(())
    }

    /// Provisions one ONU. Never panics on device errors; the outcome is in
    /// the returned report.
    #[instrument(skip(self, job), fields(olt = %self.connector.olt_name(), serial = %job.serial(), port = %job.port))]
    pub async fn provision(&self, job: &ProvisioningJob) -> ProvisionReport {
        let mut report = ProvisionReport::new(job.serial().clone());
        if let Err(e) = job.validate() {
            warn!(error = %e, "Rejected provisioning job");
            report.fail(e);
            return report;
        }

        let result = match job.serial().vendor() {
            Vendor::Nokia => self.provision_tl1(job, &mut report).await,
            Vendor::Generic => self.provision_cli(job, &mut report).await,
        };

        match result {
            Ok(()) if report.state == ProvisionState::Provisioned => {
                info!(address = ?report.address, path = ?report.path, "ONU provisioned");
            }
            Ok(()) => {
                warn!(model = ?report.model, "ONU rolled back");
            }
            Err(e) => {
                warn!(error = %e, state = %report.state, "Provisioning failed");
                report.fail(e);
            }
        }
        report
    }

    /// Resolves the job's position, allocating the lowest free one if unset.
    pub(crate) async fn resolve_address(
        &self,
        cli: &mut CliClient,
        job: &ProvisioningJob,
    ) -> OltResult<PonAddress> {
        if let Some(position) = job.position {
            return PonAddress::new(job.port, position);
        }
        let listing = cli
            .query(&build_pon_status_cmd(job.port), self.timing.extended_timeout())
            .await?;
        let occupied = parse_occupied_positions(&listing, job.port);
        let position = allocator::allocate(&occupied, self.limits.pon_capacity, job.port)?;
        debug!(port = %job.port, position, occupied = occupied.len(), "Allocated position");
        PonAddress::new(job.port, position)
    }

    async fn provision_cli(
        &self,
        job: &ProvisioningJob,
        report: &mut ProvisionReport,
    ) -> OltResult<()> {
        if job.mode == ProvisioningMode::Router {
            warn!("Router mode needs a TL1 ONT; provisioning as bridge");
        }

        let mut cli = self.open_cli().await?;
        let result = self.run_cli(&mut cli, job, report).await;
        if result.is_err() && report.side_effects() {
            if let Some(address) = report.address {
                self.cleanup_cli(&mut cli, &address).await;
            }
        }
        cli.close().await;
        result
    }

    async fn run_cli(
        &self,
        cli: &mut CliClient,
        job: &ProvisioningJob,
        report: &mut ProvisionReport,
    ) -> OltResult<()> {
        let address = self.resolve_address(cli, job).await?;
        report.address = Some(address);

        report.touched = true;
        self.run_steps(cli, &build_stage_steps(&address, job.serial(), &job.onu.name))
            .await?;
        report.advance(ProvisionState::Staged);
        countdown("ONU registration", self.timing.staging_wait())
            .await;

        let model = match &job.model {
            Some(model) => model.clone(),
            None => self.detect_model(cli, &address).await?,
        };
        report.model = Some(model.clone());
        report.advance(ProvisionState::Classified);

        match self.models.lookup(&model) {
            Some(group) => {
                info!(model = %model, group = %group, "Model classified");
                report.path = Some(ProvisioningPath::Cli(group));
                countdown("ONU stabilization", self.timing.stabilization_wait())
                    .await;
                self.run_steps(
                    cli,
                    &build_group_steps(group, &address, job.vlan, &self.limits),
                )
                .await?;
                report.advance(ProvisionState::Provisioned);
            }
            None => {
                warn!(model = %model, address = %address, "Unknown model, removing staged ONU");
                countdown("rollback", self.timing.rollback_wait()).await;
                self.run_steps(cli, &build_remove_steps(&address)).await?;
                report.advance(ProvisionState::RolledBack);
                report.error = Some(OltError::ModelIncompatible { model });
            }
        }
        Ok(())
    }

    async fn detect_model(&self, cli: &mut CliClient, address: &PonAddress) -> OltResult<String> {
        countdown("ONU classification", self.timing.classification_wait())
            .await;
        let detail = cli
            .query(&build_interface_detail_cmd(address), self.timing.command_timeout())
            .await?;
        parse_model_id(&detail).ok_or_else(|| {
            OltError::parse(
                "model",
                format!("no equip-id in interface detail for {}", address),
            )
        })
    }

    async fn cleanup_cli(&self, cli: &mut CliClient, address: &PonAddress) {
        if !cli.is_connected() {
            warn!(address = %address, "Session lost, staged ONU may remain on the device");
            return;
        }
        let timeout = self.timing.command_timeout();
        for step in build_remove_steps(address) {
            if let Err(e) = cli.execute(&step.command, step.prompt, timeout).await {
                warn!(address = %address, error = %e, "Cleanup of staged ONU failed");
                return;
            }
        }
        info!(address = %address, "Staged ONU removed after failure");
    }

    async fn provision_tl1(
        &self,
        job: &ProvisioningJob,
        report: &mut ProvisionReport,
    ) -> OltResult<()> {
        // Position lookup is CLI-only; the CLI session is gone before TL1 opens.
        let address = {
            let mut cli = self.open_cli().await?;
            let resolved = self.resolve_address(&mut cli, job).await;
            cli.close().await;
            resolved?
        };
        report.address = Some(address);
        report.model = job.model.clone();

        let mut tl1 = self.open_tl1().await?;
        let result = self.run_tl1(&mut tl1, job, &address, report).await;
        if result.is_err() && report.side_effects() {
            self.cleanup_tl1(&mut tl1, &address).await;
        }
        tl1.close().await;
        result
    }

    async fn run_tl1(
        &self,
        tl1: &mut Tl1Client,
        job: &ProvisioningJob,
        address: &PonAddress,
        report: &mut ProvisionReport,
    ) -> OltResult<()> {
        let plan = match job.mode {
            ProvisioningMode::Bridge => Tl1Plan::Bridge,
            ProvisioningMode::Router => Tl1Plan::Router,
        };
        let timeout = self.timing.command_timeout();

        report.touched = true;
        tl1.execute(
            &build_ent_ont_cmd(address, job.serial(), &job.onu.name, plan),
            self.timing.extended_timeout(),
        )
        .await?;
        tl1.execute(&build_ont_in_service_cmd(address), timeout)
            .await?;
        report.advance(ProvisionState::Staged);

        report.path = Some(match plan {
            Tl1Plan::Bridge => ProvisioningPath::Tl1Bridge,
            Tl1Plan::Router => ProvisioningPath::Tl1Router,
        });
        report.advance(ProvisionState::Classified);

        match plan {
            Tl1Plan::Bridge => {
                countdown("ONT configuration download", self.timing.tl1_configuration_wait())
                    .await;
                for cmd in build_tl1_service_cmds(address, plan, job.vlan, &self.limits) {
                    tl1.execute(&cmd, timeout).await?;
                }
            }
            Tl1Plan::Router => {
                countdown("ONT stabilization", self.timing.stabilization_wait())
                    .await;
                for cmd in build_tl1_service_cmds(address, plan, job.vlan, &self.limits) {
                    tl1.execute(&cmd, timeout).await?;
                }
                self.apply_pppoe(tl1, address, job).await?;
                countdown("ONT configuration download", self.timing.tl1_configuration_wait())
                    .await;
                if let Some(wifi) = &job.wifi {
                    self.apply_wifi(tl1, address, wifi).await?;
                }
            }
        }
        report.advance(ProvisionState::Provisioned);
        Ok(())
    }

    async fn apply_pppoe(
        &self,
        tl1: &mut Tl1Client,
        address: &PonAddress,
        job: &ProvisioningJob,
    ) -> OltResult<()> {
        let timeout = self.timing.command_timeout();
        for param in tr069::PPPOE_SLOTS {
            self.delete_param(tl1, address, param, timeout).await?;
        }
        let cmds = match &job.pppoe {
            Some(pppoe) => build_pppoe_cmds(address, job.vlan, &pppoe.user, &pppoe.password),
            None => vec![build_set_param_cmd(
                address,
                tr069::WAN_VLAN,
                &job.vlan.to_string(),
            )],
        };
        for cmd in cmds {
            tl1.execute(&cmd, timeout).await?;
        }
        Ok(())
    }

    /// Clears the WiFi slots, then writes SSID and passphrase for both radios.
    pub(crate) async fn apply_wifi(
        &self,
        tl1: &mut Tl1Client,
        address: &PonAddress,
        wifi: &WifiCredentials,
    ) -> OltResult<()> {
        for param in tr069::WIFI_SLOTS {
            self.delete_param(tl1, address, param, self.timing.wifi_delete_timeout())
                .await?;
        }
        let timeout = self.timing.command_timeout();
        for cmd in build_wifi_cmds(address, &wifi.ssid, &wifi.password) {
            tl1.execute(&cmd, timeout).await?;
        }
        Ok(())
    }

    /// Deletes a parameter slot; an empty slot is not an error.
    pub(crate) async fn delete_param(
        &self,
        tl1: &mut Tl1Client,
        address: &PonAddress,
        param: tr069::Param,
        timeout: Duration,
    ) -> OltResult<()> {
        match tl1
            .try_execute(&build_dlt_param_cmd(address, param), timeout)
            .await?
        {
            Tl1Reply::Completed(_) => debug!(slot = param.index, "Parameter slot cleared"),
            Tl1Reply::Denied(_) => debug!(slot = param.index, "Parameter slot already empty"),
            Tl1Reply::TimedOut => debug!(slot = param.index, "Parameter slot delete timed out"),
        }
        Ok(())
    }

    async fn cleanup_tl1(&self, tl1: &mut Tl1Client, address: &PonAddress) {
        if !tl1.is_connected() {
            warn!(address = %address, "Session lost, staged ONT may remain on the device");
            return;
        }
        let timeout = self.timing.command_timeout();
        for cmd in [build_ont_out_of_service_cmd(address), build_dlt_ont_cmd(address)] {
            match tl1.try_execute(&cmd, timeout).await {
                Ok(Tl1Reply::Completed(_)) => {}
                Ok(reply) => {
                    warn!(address = %address, command = %cmd, ?reply, "Cleanup of staged ONT refused");
                    return;
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Cleanup of staged ONT failed");
                    return;
                }
            }
        }
        info!(address = %address, "Staged ONT removed after failure");
    }
}
