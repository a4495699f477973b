//! CLI and TL1 clients built on a logged-in [`Session`].
//!
//! CLI commands succeed when the expected prompt terminator (`#` or `$`)
//! comes back and fail on the CLI error marker. TL1 commands succeed on
//! `COMPLD` and fail on `DENY`; a timeout or end of stream is always an
//! error unless the caller opts into [`Tl1Client::try_execute`].
//!
//! The device echoes every line it receives, and the echo carries
//! operator data (names, passwords). Prompts and reply tokens are only
//! recognised at the start of a line, where an echoed command never puts
//! them.

use crate::command::Command;
use crate::error::{OltError, OltResult};
use crate::expect::{Match, Pattern};
use crate::session::{DeviceAddress, Dialect, Session};
use crate::transport::Transport;
use once_cell::sync::Lazy;
use std::time::Duration;
use tracing::{debug, info, warn};

fn anchored(source: &str) -> Pattern {
    Pattern::regex(source).expect("Invalid regex pattern")
}

/// `typ:isadmin>#`, or a configuration node such as `typ:isadmin>configure>ont$`
pub(crate) static HASH_PROMPT: Lazy<Pattern> = Lazy::new(|| anchored(r"(?m)^\S*>\S*#[ \t\r]*$"));
static DOLLAR_PROMPT: Lazy<Pattern> = Lazy::new(|| anchored(r"(?m)^\S*>\S*\$[ \t\r]*$"));
static ANY_PROMPT: Lazy<Pattern> = Lazy::new(|| anchored(r"(?m)^\S*>\S*[#$][ \t\r]*$"));
static CLI_REJECTION: Lazy<Pattern> =
    Lazy::new(|| anchored(r"(?im)^[ \t]*(error[ \t]*:|invalid token)"));
pub(crate) static TL1_COMPLETED: Lazy<Pattern> =
    Lazy::new(|| anchored(r"(?m)^[ \t]*M[ \t]+\S+[ \t]+COMPLD"));
static TL1_DENIED: Lazy<Pattern> = Lazy::new(|| anchored(r"(?m)^[ \t]*M[ \t]+\S+[ \t]+DENY"));
/// Closes every TL1 response block
static TL1_TERMINATOR: Lazy<Pattern> = Lazy::new(|| anchored(r"(?m)^[ \t]*;"));

pub const TL1_LOGOFF: &str = "LOGOFF;";
const LOGOFF_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Prompt terminator a CLI command is expected to return.
///
/// Commands that enter a configuration node leave the CLI at a `$` prompt;
/// everything else returns to `#`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prompt {
    Hash,
    Dollar,
}

impl Prompt {
    fn pattern(&self) -> Pattern {
        match self {
            Prompt::Hash => HASH_PROMPT.clone(),
            Prompt::Dollar => DOLLAR_PROMPT.clone(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::Hash => "#",
            Prompt::Dollar => "$",
        }
    }
}

fn require_dialect(address: &DeviceAddress, dialect: Dialect) -> OltResult<()> {
    if address.dialect != dialect {
        return Err(OltError::config(format!(
            "{} client requested for a {} address",
            dialect, address.dialect
        )));
    }
    Ok(())
}

/// The error line as printed by the device: the marker plus the rest of its
/// line. Nothing before the marker is used, so the echoed command never
/// ends up in the error.
fn rejection_context(marker: &Match, rest: Option<&str>) -> String {
    let tail = rest
        .and_then(|text| text.split(['\r', '\n']).next())
        .unwrap_or_default();
    format!("{}{}", marker.matched.trim_start(), tail)
        .trim()
        .to_string()
}

/// Reply lines between the `DENY` token and the block terminator.
fn denial_detail(block: &str) -> String {
    block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drops the echoed command line from query output.
fn strip_echo(output: &str, command: &str) -> String {
    let trimmed = output.trim_start_matches(['\r', '\n']);
    match trimmed.split_once('\n') {
        Some((first, rest)) if first.contains(command) => rest.to_string(),
        None if trimmed.contains(command) => String::new(),
        _ => trimmed.to_string(),
    }
}

/// Waits out a fixed device-side settling period.
///
/// Used where the device needs elapsed time rather than a prompt, so it is
/// kept apart from pattern waits.
pub async fn countdown(reason: &str, duration: Duration) {
    if duration.is_zero() {
        return;
    }
    info!(reason, seconds = duration.as_secs(), "Waiting for device");
    tokio::time::sleep(duration).await;
    debug!(reason, "Wait finished");
}

/// Operator CLI client.
#[derive(Debug)]
pub struct CliClient {
    session: Session,
}

impl CliClient {
    /// Logs in over `transport`.
    pub async fn login(
        transport: Box<dyn Transport>,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> OltResult<Self> {
        require_dialect(address, Dialect::Cli)?;
        let session = Session::login(transport, address, timeout).await?;
        Ok(Self { session })
    }

    pub fn host(&self) -> &str {
        self.session.host()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Sends `command` and waits for `prompt`. Returns the output before it.
    pub async fn execute(
        &mut self,
        command: &Command,
        prompt: Prompt,
        timeout: Duration,
    ) -> OltResult<String> {
        debug!(command = %command, prompt = prompt.as_str(), "Executing CLI command");
        self.session.send(command.text()).await?;
        let m = self
            .session
            .expect(&[prompt.pattern(), CLI_REJECTION.clone()], timeout)
            .await?;

        if m.index == 1 {
            // Consume the prompt that follows the error so the next command
            // starts from a clean buffer.
            let rest = match self.session.expect(&[ANY_PROMPT.clone()], DRAIN_TIMEOUT).await {
                Ok(prompt) => Some(prompt.before),
                Err(e) => {
                    debug!(error = %e, "No prompt after CLI error");
                    None
                }
            };
            let response = rejection_context(&m, rest.as_deref());
            warn!(command = %command, response = %response, "CLI command rejected");
            return Err(OltError::rejected(command.display(), response));
        }
        Ok(m.before)
    }

    /// Runs a read-only command and returns its output without the echo.
    pub async fn query(&mut self, command: &Command, timeout: Duration) -> OltResult<String> {
        let output = self.execute(command, Prompt::Hash, timeout).await?;
        Ok(strip_echo(&output, command.text()))
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }
}

/// Outcome of a TL1 command whose failure is tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tl1Reply {
    Completed(String),
    Denied(String),
    TimedOut,
}

impl Tl1Reply {
    pub fn is_completed(&self) -> bool {
        matches!(self, Tl1Reply::Completed(_))
    }
}

/// TL1 machine-interface client.
#[derive(Debug)]
pub struct Tl1Client {
    session: Session,
    /// A command timed out and its reply may still arrive
    unanswered: bool,
}

impl Tl1Client {
    /// Logs in over `transport`.
    pub async fn login(
        transport: Box<dyn Transport>,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> OltResult<Self> {
        require_dialect(address, Dialect::Tl1)?;
        let session = Session::login(transport, address, timeout).await?;
        Ok(Self {
            session,
            unanswered: false,
        })
    }

    pub fn host(&self) -> &str {
        self.session.host()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Sends `command` and requires `COMPLD`.
    pub async fn execute(&mut self, command: &Command, timeout: Duration) -> OltResult<String> {
        match self.try_execute(command, timeout).await? {
            Tl1Reply::Completed(output) => Ok(output),
            Tl1Reply::Denied(response) => {
                warn!(command = %command, response = %response, "TL1 command denied");
                Err(OltError::rejected(command.display(), response))
            }
            Tl1Reply::TimedOut => Err(OltError::timeout("'COMPLD' | 'DENY'", timeout)),
        }
    }

    /// Sends `command` and reports the reply without failing on `DENY` or a
    /// timeout. End of stream is still an error.
    ///
    /// Every reply is consumed through its `;` terminator. After a timeout
    /// the late reply is drained before the next command goes out, so it
    /// is never taken for the answer to that command.
    pub async fn try_execute(&mut self, command: &Command, timeout: Duration) -> OltResult<Tl1Reply> {
        if self.unanswered {
            self.drain_late_reply().await?;
        }
        debug!(command = %command, "Executing TL1 command");
        self.session.send(command.text()).await?;
        let m = match self
            .session
            .expect(&[TL1_COMPLETED.clone(), TL1_DENIED.clone()], timeout)
            .await
        {
            Ok(m) => m,
            Err(OltError::ProtocolTimeout { .. }) => {
                debug!(command = %command, "TL1 command timed out");
                self.unanswered = true;
                return Ok(Tl1Reply::TimedOut);
            }
            Err(e) => return Err(e),
        };

        let block = match self
            .session
            .expect(&[TL1_TERMINATOR.clone()], DRAIN_TIMEOUT)
            .await
        {
            Ok(rest) => rest.before,
            Err(OltError::ProtocolTimeout { .. }) => {
                debug!(command = %command, "TL1 reply without terminator");
                String::new()
            }
            Err(e) => return Err(e),
        };

        if m.index == 0 {
            return Ok(Tl1Reply::Completed(m.before));
        }
        let detail = denial_detail(&block);
        let response = if detail.is_empty() {
            "DENY".to_string()
        } else {
            format!("DENY {}", detail)
        };
        Ok(Tl1Reply::Denied(response))
    }

    /// Waits for the reply block of a command that timed out.
    async fn drain_late_reply(&mut self) -> OltResult<()> {
        self.unanswered = false;
        match self
            .session
            .expect(&[TL1_TERMINATOR.clone()], DRAIN_TIMEOUT)
            .await
        {
            Ok(_) => debug!("Discarded late TL1 reply"),
            Err(OltError::ProtocolTimeout { .. }) => debug!("No late TL1 reply"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Logs off and closes the session. Idempotent.
    pub async fn close(&mut self) {
        if self.session.is_connected() {
            let logoff = Command::new(TL1_LOGOFF);
            match self.try_execute(&logoff, LOGOFF_TIMEOUT).await {
                Ok(reply) if reply.is_completed() => debug!("TL1 logoff acknowledged"),
                Ok(reply) => debug!(?reply, "TL1 logoff not acknowledged"),
                Err(e) => debug!(error = %e, "TL1 logoff failed"),
            }
        }
        self.session.close().await;
    }
}
