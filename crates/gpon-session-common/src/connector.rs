//! Opening logged-in clients for a configured OLT.

use crate::client::{CliClient, Tl1Client};
use crate::error::OltResult;
use crate::session::{Credentials, DeviceAddress, Dialect};
use crate::transport::SshTransport;
use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

/// Source of authenticated sessions.
///
/// The provisioning layer never builds transports itself; tests swap the
/// ssh implementation for a simulated device.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens and logs in a CLI session.
    async fn open_cli(&self) -> OltResult<CliClient>;

    /// Opens and logs in a TL1 session.
    async fn open_tl1(&self) -> OltResult<Tl1Client>;

    /// Name of the OLT, for logs and reports.
    fn olt_name(&self) -> &str;
}

/// Network identity of one OLT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OltEndpoint {
    pub name: String,
    pub host: String,
    pub cli_port: u16,
    pub tl1_port: u16,
}

impl OltEndpoint {
    pub fn cli_address(&self, credentials: Credentials) -> DeviceAddress {
        DeviceAddress::new(&self.host, self.cli_port, credentials, Dialect::Cli)
    }

    pub fn tl1_address(&self, credentials: Credentials) -> DeviceAddress {
        DeviceAddress::new(&self.host, self.tl1_port, credentials, Dialect::Tl1)
    }
}

/// Connects with the system ssh client.
#[derive(Debug, Clone)]
pub struct SshConnector {
    endpoint: OltEndpoint,
    cli_credentials: Credentials,
    tl1_credentials: Credentials,
    login_timeout: Duration,
}

impl SshConnector {
    pub fn new(
        endpoint: OltEndpoint,
        cli_credentials: Credentials,
        tl1_credentials: Credentials,
        login_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            cli_credentials,
            tl1_credentials,
            login_timeout,
        }
    }

    pub fn endpoint(&self) -> &OltEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self), fields(olt = %self.endpoint.name))]
    async fn open_cli(&self) -> OltResult<CliClient> {
        let address = self.endpoint.cli_address(self.cli_credentials.clone());
        let transport = SshTransport::spawn(&address.host, address.port, &address.credentials.user)?;
        CliClient::login(Box::new(transport), &address, self.login_timeout).await
    }

    #[instrument(skip(self), fields(olt = %self.endpoint.name))]
    async fn open_tl1(&self) -> OltResult<Tl1Client> {
        let address = self.endpoint.tl1_address(self.tl1_credentials.clone());
        let transport = SshTransport::spawn(&address.host, address.port, &address.credentials.user)?;
        Tl1Client::login(Box::new(transport), &address, self.login_timeout).await
    }

    fn olt_name(&self) -> &str {
        &self.endpoint.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_addresses() {
        let endpoint = OltEndpoint {
            name: "central".to_string(),
            host: "10.0.0.1".to_string(),
            cli_port: 22,
            tl1_port: 1023,
        };
        let cli = endpoint.cli_address(Credentials::new("isadmin", "pw"));
        assert_eq!(cli.port, 22);
        assert_eq!(cli.dialect, Dialect::Cli);

        let tl1 = endpoint.tl1_address(Credentials::new("SUPERUSER", "pw"));
        assert_eq!(tl1.port, 1023);
        assert_eq!(tl1.dialect, Dialect::Tl1);
    }
}
