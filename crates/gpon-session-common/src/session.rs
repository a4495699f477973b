//! Logged-in sessions and the per-dialect login handshake.
//!
//! A [`Session`] only exists after a successful handshake. Every failed
//! branch of the handshake closes the transport and yields
//! [`OltError::Connection`].

use crate::client::{HASH_PROMPT, TL1_COMPLETED};
use crate::error::{OltError, OltResult};
use crate::expect::{Match, Pattern};
use crate::transport::Transport;
use once_cell::sync::Lazy;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static PASSWORD_PROMPT: Lazy<Pattern> =
    Lazy::new(|| Pattern::regex(r"(?i)password:").expect("Invalid regex pattern"));
static HOST_KEY_PROMPT: Lazy<Pattern> =
    Lazy::new(|| Pattern::literal("Are you sure you want to continue connecting"));
static PERMISSION_DENIED: Lazy<Pattern> = Lazy::new(|| Pattern::literal("Permission denied"));

/// CLI banner prompt after authentication.
pub const CLI_BANNER: &str = "typ:isadmin>#";
/// TL1 greeting after authentication.
pub const TL1_BANNER: &str = "Welcome to ISAM";

pub const CLI_INHIBIT_ALARMS: &str = "environment inhibit-alarms";
pub const TL1_INHIBIT_MESSAGES: &str = "INH-MSG-ALL::ALL:::;";

/// Management dialect spoken on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Cli,
    Tl1,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Cli => "cli",
            Dialect::Tl1 => "tl1",
        }
    }

    /// Text that proves authentication succeeded.
    pub fn banner(&self) -> &'static str {
        match self {
            Dialect::Cli => CLI_BANNER,
            Dialect::Tl1 => TL1_BANNER,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Username and password for one dialect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"******")
            .finish()
    }
}

/// Where and how to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub dialect: Dialect,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials, dialect: Dialect) -> Self {
        Self {
            host: host.into(),
            port,
            credentials,
            dialect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    Closed,
}

/// An authenticated session on one dialect.
pub struct Session {
    transport: Box<dyn Transport>,
    dialect: Dialect,
    host: String,
    state: SessionState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Runs the login handshake for `address.dialect` over `transport`.
    #[instrument(skip(transport, address), fields(host = %address.host, dialect = %address.dialect))]
    pub async fn login(
        transport: Box<dyn Transport>,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> OltResult<Session> {
        let mut session = Session {
            transport,
            dialect: address.dialect,
            host: address.host.clone(),
            state: SessionState::Connected,
        };

        match session.handshake(address, timeout).await {
            Ok(()) => {
                info!("Logged in");
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                let reason = match e {
                    OltError::Connection { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(reason = %reason, "Login failed");
                Err(OltError::connection(&address.host, reason))
            }
        }
    }

    async fn handshake(&mut self, address: &DeviceAddress, timeout: Duration) -> OltResult<()> {
        let first = self
            .expect(
                &[
                    PASSWORD_PROMPT.clone(),
                    HOST_KEY_PROMPT.clone(),
                    PERMISSION_DENIED.clone(),
                ],
                timeout,
            )
            .await?;
        match first.index {
            0 => {}
            1 => {
                debug!("Accepting unknown host key");
                self.send("yes").await?;
                self.expect(&[PASSWORD_PROMPT.clone()], timeout).await?;
            }
            _ => return Err(OltError::connection(&self.host, "permission denied")),
        }

        self.send(&address.credentials.password).await?;
        let outcome = self
            .expect(
                &[
                    Pattern::literal(self.dialect.banner()),
                    PERMISSION_DENIED.clone(),
                ],
                timeout,
            )
            .await?;
        if outcome.index != 0 {
            return Err(OltError::connection(&self.host, "invalid credentials"));
        }

        match self.dialect {
            Dialect::Cli => {
                self.send(CLI_INHIBIT_ALARMS).await?;
                self.expect(&[HASH_PROMPT.clone()], timeout).await?;
                self.send("exit").await?;
                self.expect(&[HASH_PROMPT.clone()], timeout).await?;
            }
            Dialect::Tl1 => {
                self.send("").await?;
                self.expect(&[Pattern::literal("<")], timeout).await?;
                self.send(TL1_INHIBIT_MESSAGES).await?;
                self.expect(&[TL1_COMPLETED.clone()], timeout).await?;
            }
        }
        Ok(())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.transport.is_open()
    }

    /// Writes one line.
    pub async fn send(&mut self, line: &str) -> OltResult<()> {
        if self.state == SessionState::Closed {
            return Err(OltError::EndOfStream {
                waiting_for: "open session".to_string(),
            });
        }
        self.transport.send_line(line).await
    }

    /// Waits for one of `patterns`.
    pub async fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> OltResult<Match> {
        if self.state == SessionState::Closed {
            return Err(OltError::EndOfStream {
                waiting_for: crate::expect::describe(patterns),
            });
        }
        self.transport.expect(patterns, timeout).await
    }

    /// Closes the session. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.transport.close().await;
        debug!(host = %self.host, dialect = %self.dialect, "Session closed");
    }
}
