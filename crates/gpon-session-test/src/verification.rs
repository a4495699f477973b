//! Assertions over what a simulated OLT received and holds

use gpon_session_common::Dialect;
use thiserror::Error;

use crate::simulated::{ProvisionedOnu, SimulatedOlt};

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("No {dialect} command containing '{fragment}' was sent")]
    Missing { dialect: Dialect, fragment: String },

    #[error("Unexpected {dialect} command containing '{fragment}': {command}")]
    Unexpected {
        dialect: Dialect,
        fragment: String,
        command: String,
    },

    #[error("'{first}' was not sent before '{second}'")]
    OutOfOrder { first: String, second: String },

    #[error("ONU {serial} is not provisioned")]
    NotProvisioned { serial: String },

    #[error("ONU {serial} is still provisioned at {slot}/{pon}/{position}")]
    StillProvisioned {
        serial: String,
        slot: u8,
        pon: u8,
        position: u16,
    },

    #[error("Expected at most {limit} concurrent sessions, saw {actual}")]
    TooManySessions { limit: usize, actual: usize },

    #[error("{count} sessions left open")]
    SessionsLeftOpen { count: usize },
}

pub type VerifyResult<T> = Result<T, VerificationError>;

/// Checks the command log and device state of a [`SimulatedOlt`].
pub struct OltVerifier<'a> {
    olt: &'a SimulatedOlt,
}

impl<'a> OltVerifier<'a> {
    pub fn new(olt: &'a SimulatedOlt) -> Self {
        Self { olt }
    }

    fn sent(&self, dialect: Dialect) -> Vec<String> {
        self.olt
            .commands()
            .into_iter()
            .filter(|c| c.dialect == dialect)
            .map(|c| c.text)
            .collect()
    }

    /// Number of commands containing `fragment`.
    pub fn count(&self, dialect: Dialect, fragment: &str) -> usize {
        self.sent(dialect)
            .iter()
            .filter(|c| c.contains(fragment))
            .count()
    }

    pub fn assert_sent(&self, dialect: Dialect, fragment: &str) -> VerifyResult<()> {
        if self.count(dialect, fragment) == 0 {
            return Err(VerificationError::Missing {
                dialect,
                fragment: fragment.to_string(),
            });
        }
        Ok(())
    }

    pub fn assert_not_sent(&self, dialect: Dialect, fragment: &str) -> VerifyResult<()> {
        match self.sent(dialect).into_iter().find(|c| c.contains(fragment)) {
            Some(command) => Err(VerificationError::Unexpected {
                dialect,
                fragment: fragment.to_string(),
                command,
            }),
            None => Ok(()),
        }
    }

    /// Every fragment appears, each in a later command than the previous one.
    pub fn assert_sent_in_order(&self, dialect: Dialect, fragments: &[&str]) -> VerifyResult<()> {
        let sent = self.sent(dialect);
        let mut from = 0;
        let mut previous = "<start>";
        for fragment in fragments {
            match sent[from..].iter().position(|c| c.contains(fragment)) {
                Some(offset) => from += offset + 1,
                None if self.count(dialect, fragment) == 0 => {
                    return Err(VerificationError::Missing {
                        dialect,
                        fragment: fragment.to_string(),
                    })
                }
                None => {
                    return Err(VerificationError::OutOfOrder {
                        first: previous.to_string(),
                        second: fragment.to_string(),
                    })
                }
            }
            previous = fragment;
        }
        Ok(())
    }

    /// Nothing was sent on `dialect` after the first command containing `fragment`.
    pub fn assert_last_sent(&self, dialect: Dialect, fragment: &str) -> VerifyResult<()> {
        let sent = self.sent(dialect);
        let index = sent
            .iter()
            .position(|c| c.contains(fragment))
            .ok_or_else(|| VerificationError::Missing {
                dialect,
                fragment: fragment.to_string(),
            })?;
        match sent[index + 1..].first() {
            Some(command) => Err(VerificationError::Unexpected {
                dialect,
                fragment: format!("anything after {}", fragment),
                command: command.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn assert_provisioned(&self, serial: &str) -> VerifyResult<ProvisionedOnu> {
        self.olt
            .find_provisioned(serial)
            .ok_or_else(|| VerificationError::NotProvisioned {
                serial: serial.to_string(),
            })
    }

    pub fn assert_not_provisioned(&self, serial: &str) -> VerifyResult<()> {
        match self.olt.find_provisioned(serial) {
            Some(onu) => Err(VerificationError::StillProvisioned {
                serial: onu.serial,
                slot: onu.slot,
                pon: onu.pon,
                position: onu.position,
            }),
            None => Ok(()),
        }
    }

    pub fn assert_max_sessions(&self, limit: usize) -> VerifyResult<()> {
        let actual = self.olt.max_concurrent_sessions();
        if actual > limit {
            return Err(VerificationError::TooManySessions { limit, actual });
        }
        Ok(())
    }

    pub fn assert_all_sessions_closed(&self) -> VerifyResult<()> {
        match self.olt.active_sessions() {
            0 => Ok(()),
            count => Err(VerificationError::SessionsLeftOpen { count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpon_session_common::{Command, Connector, Prompt};
    use std::time::Duration;

    #[tokio::test]
    async fn test_order_and_presence() {
        let olt = SimulatedOlt::new();
        let mut cli = olt.connector().open_cli().await.unwrap();
        for text in ["configure a", "configure b", "configure c"] {
            cli.execute(&Command::new(text), Prompt::Hash, Duration::from_secs(1))
                .await
                .unwrap();
        }
        cli.close().await;

        let verifier = OltVerifier::new(&olt);
        verifier
            .assert_sent_in_order(Dialect::Cli, &["configure a", "configure c"])
            .unwrap();
        assert!(matches!(
            verifier.assert_sent_in_order(Dialect::Cli, &["configure c", "configure a"]),
            Err(VerificationError::OutOfOrder { .. })
        ));
        assert!(matches!(
            verifier.assert_sent(Dialect::Tl1, "configure a"),
            Err(VerificationError::Missing { .. })
        ));
        verifier.assert_last_sent(Dialect::Cli, "configure c").unwrap();
        assert!(verifier.assert_last_sent(Dialect::Cli, "configure a").is_err());
        verifier.assert_all_sessions_closed().unwrap();
        verifier.assert_max_sessions(1).unwrap();
    }

    #[tokio::test]
    async fn test_sessions_left_open() {
        let olt = SimulatedOlt::new();
        let _cli = olt.connector().open_cli().await.unwrap();
        assert!(matches!(
            OltVerifier::new(&olt).assert_all_sessions_closed(),
            Err(VerificationError::SessionsLeftOpen { count: 1 })
        ));
    }
}
