//! Operator operations on already-provisioned ONUs and on the PON inventory
//!
//! Each operation opens its own sessions and closes them on every exit path.
//! Position lookup always happens over the CLI; TL1-only operations close
//! the CLI session before logging in over TL1.

use gpon_session_common::{
    countdown, CliClient, Connector, OltError, OltResult, Tl1Client, Tl1Reply,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::commands::{
    build_enable_wan_http_cmd, build_interface_detail_cmd, build_locate_cmd, build_optics_cmd,
    build_pon_status_xml_cmd, build_reboot_cmd, build_remove_steps, build_unprovisioned_cmd,
    build_web_password_cmd,
};
use crate::orchestrator::{ProvisioningPath, Provisioner};
use crate::parser::{
    parse_model_id, parse_onu_detail_xml, parse_optical_reading, parse_position_path,
    parse_unauthorized_inventory, UnauthorizedInventory,
};
use crate::tables::{tr069, CommandGroup, TL1_ROUTER_MODELS};
use crate::types::{
    OnuDetailRecord, OnuInspection, OnuSerial, OpticalReading, PonAddress, PonPort,
    RemoteAccessState, WifiCredentials,
};
use crate::validate;

/// A model the provisioner knows how to configure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibleModel {
    pub model: String,
    pub path: ProvisioningPath,
}

impl<C: Connector> Provisioner<C> {
    /// ONUs seen on the PONs but not yet provisioned.
    ///
    /// The whole session (login, query, logout) is retried as one unit.
    #[instrument(skip(self), fields(olt = %self.connector.olt_name()))]
    pub async fn list_unauthorized(&self) -> OltResult<UnauthorizedInventory> {
        let inventory = self
            .retry
            .run("list unauthorized ONUs", |_| self.fetch_unauthorized())
            .await?;
        info!(count = inventory.len(), "Unauthorized ONUs listed");
        Ok(inventory)
    }

    async fn fetch_unauthorized(&self) -> OltResult<UnauthorizedInventory> {
        let mut cli = self.connector.open_cli().await?;
        let result = cli
            .query(&build_unprovisioned_cmd(), self.timing.extended_timeout())
            .await;
        cli.close().await;
        Ok(parse_unauthorized_inventory(&result?))
    }

    /// Position of a provisioned ONU.
    #[instrument(skip(self), fields(olt = %self.connector.olt_name()))]
    pub async fn locate(&self, serial: &OnuSerial) -> OltResult<PonAddress> {
        let mut cli = self.open_cli().await?;
        let result = self.locate_with(&mut cli, serial).await;
        cli.close().await;
        result
    }

    pub(crate) async fn locate_with(
        &self,
        cli: &mut CliClient,
        serial: &OnuSerial,
    ) -> OltResult<PonAddress> {
        let output = cli
            .query(&build_locate_cmd(serial), self.timing.extended_timeout())
            .await?;
        let address = parse_position_path(&output)
            .ok_or_else(|| OltError::not_found(format!("ONU {}", serial)))?;
        debug!(serial = %serial, address = %address, "ONU located");
        Ok(address)
    }

    /// Takes a provisioned ONU out of service and deletes it.
    #[instrument(skip(self), fields(olt = %self.connector.olt_name()))]
    pub async fn deauthorize(&self, serial: &OnuSerial) -> OltResult<PonAddress> {
        let mut cli = self.open_cli().await?;
        let result = self.deauthorize_with(&mut cli, serial).await;
        cli.close().await;
        let address = result?;
        info!(serial = %serial, address = %address, "ONU deauthorized");
        Ok(address)
    }

    /// Position, optics and model of a provisioned ONU.
    #[instrument(skip(self), fields(olt = %self.connector.olt_name()))]
    pub async fn inspect(&self, serial: &OnuSerial) -> OltResult<OnuInspection> {
        let mut cli = self.open_cli().await?;
        let result = self.inspect_with(&mut cli, serial).await;
        cli.close().await;
        result
    }

    async fn deauthorize_with(&self, cli: &mut CliClient, serial: &OnuSerial) -> OltResult<PonAddress> {
        let address = self.locate_with(cli, serial).await?;
        self.run_steps(cli, &build_remove_steps(&address)).await?;
        Ok(address)
    }

    async fn inspect_with(&self, cli: &mut CliClient, serial: &OnuSerial) -> OltResult<OnuInspection> {
        let address = self.locate_with(cli, serial).await?;
        let optics = self.read_optics(cli, &address).await?;
        let detail = cli
            .query(&build_interface_detail_cmd(&address), self.timing.command_timeout())
            .await?;
        Ok(OnuInspection {
            serial: serial.clone(),
            address,
            optics,
            model: parse_model_id(&detail),
        })
    }

    /// Optics of one ONU; absent when the device does not report them.
    async fn read_optics(
        &self,
        cli: &mut CliClient,
        address: &PonAddress,
    ) -> OltResult<Option<OpticalReading>> {
        match cli
            .query(&build_optics_cmd(address), self.timing.command_timeout())
            .await
        {
            Ok(output) => Ok(parse_optical_reading(&output)),
            Err(e) if e.is_connection_failure() => Err(e),
            Err(e) => {
                debug!(address = %address, error = %e, "Optics unavailable");
                Ok(None)
            }
        }
    }

    /// Restarts a provisioned ONT.
    #[instrument(skip(self), fields(olt = %self.connector.olt_name()))]
    pub async fn reboot(&self, serial: &OnuSerial) -> OltResult<PonAddress> {
        let address = self.locate(serial).await?;
        let mut tl1 = self.open_tl1().await?;
        let result = tl1
            .execute(&build_reboot_cmd(&address), self.timing.command_timeout())
            .await;
        tl1.close().await;
        result?;
        info!(serial = %serial, address = %address, "ONT reboot requested");
        Ok(address)
    }

    /// Replaces SSID and passphrase on both radios of a router ONT.
    #[instrument(skip(self, wifi), fields(olt = %self.connector.olt_name(), ssid = %wifi.ssid))]
    pub async fn configure_wifi(
        &self,
        serial: &OnuSerial,
        wifi: &WifiCredentials,
    ) -> OltResult<PonAddress> {
        let wifi = WifiCredentials::new(&wifi.ssid, &wifi.password)?;
        let address = self.locate(serial).await?;
        let mut tl1 = self.open_tl1().await?;
        let result = self.apply_wifi(&mut tl1, &address, &wifi).await;
        tl1.close().await;
        result?;
        info!(serial = %serial, address = %address, "WiFi configured");
        Ok(address)
    }

    /// Enables WAN-side web access and sets the web account password.
    ///
    /// A refused enable is reported as `AlreadyEnabled`; the device answers
    /// that way when access is already on. If the password cannot be set,
    /// its slot is cleared and the password applied once more.
    #[instrument(skip(self, password), fields(olt = %self.connector.olt_name()))]
    pub async fn grant_remote_access(
        &self,
        serial: &OnuSerial,
        password: &str,
    ) -> OltResult<RemoteAccessState> {
        let password = validate::remote_password(password)?;
        let address = self.locate(serial).await?;
        let mut tl1 = self.open_tl1().await?;
        let result = self.remote_access_with(&mut tl1, &address, &password).await;
        tl1.close().await;
        let state = result?;
        info!(serial = %serial, address = %address, ?state, "Remote access processed");
        Ok(state)
    }

    async fn remote_access_with(
        &self,
        tl1: &mut Tl1Client,
        address: &PonAddress,
        password: &str,
    ) -> OltResult<RemoteAccessState> {
        let timeout = self.timing.command_timeout();
        let mut state = match tl1
            .try_execute(&build_enable_wan_http_cmd(address), timeout)
            .await?
        {
            Tl1Reply::Completed(_) => RemoteAccessState::Enabled,
            reply => {
                warn!(address = %address, ?reply, "WAN access change refused, assuming already enabled");
                RemoteAccessState::AlreadyEnabled
            }
        };
        countdown("ONT web service", self.timing.stabilization_wait())
            .await;

        let set_password = build_web_password_cmd(address, password);
        if !tl1.try_execute(&set_password, timeout).await?.is_completed() {
            warn!(address = %address, "Web password rejected, clearing slot and retrying");
            self.delete_param(tl1, address, tr069::WEB_PASSWORD, timeout)
                .await?;
            if !tl1.try_execute(&set_password, timeout).await?.is_completed() {
                warn!(address = %address, "Web password could not be applied");
                state = RemoteAccessState::Failed;
            }
        }
        Ok(state)
    }

    /// Every ONU on a PON with its optics.
    #[instrument(skip(self), fields(olt = %self.connector.olt_name()))]
    pub async fn list_pon(&self, port: PonPort) -> OltResult<Vec<OnuDetailRecord>> {
        let mut cli = self.open_cli().await?;
        let result = self.list_pon_with(&mut cli, port).await;
        cli.close().await;
        let records = result?;
        info!(port = %port, count = records.len(), "PON listed");
        Ok(records)
    }

    async fn list_pon_with(
        &self,
        cli: &mut CliClient,
        port: PonPort,
    ) -> OltResult<Vec<OnuDetailRecord>> {
        let output = cli
            .query(&build_pon_status_xml_cmd(port), self.timing.extended_timeout())
            .await?;
        let mut records = parse_onu_detail_xml(&output)?;
        for record in &mut records {
            let Some(position) = record.position else {
                continue;
            };
            let Ok(address) = PonAddress::new(port, position) else {
                continue;
            };
            record.set_optics(self.read_optics(cli, &address).await?);
        }
        Ok(records)
    }

    /// Models with a known provisioning path, CLI groups first.
    pub fn compatible_models(&self) -> Vec<CompatibleModel> {
        let mut models: Vec<CompatibleModel> = CommandGroup::ALL
            .iter()
            .flat_map(|group| {
                self.models.models_in(*group).into_iter().map(|model| CompatibleModel {
                    model: model.to_string(),
                    path: ProvisioningPath::Cli(*group),
                })
            })
            .collect();
        // Reserved-prefix ONTs go over TL1 in either mode
        models.extend(TL1_ROUTER_MODELS.iter().flat_map(|model| {
            [ProvisioningPath::Tl1Bridge, ProvisioningPath::Tl1Router]
                .into_iter()
                .map(|path| CompatibleModel {
                    model: model.to_string(),
                    path,
                })
        }));
        models
    }
}
