//! Interactive session plumbing for GPON OLTs.
//!
//! An OLT exposes two management dialects over SSH: an operator CLI and
//! the TL1 machine interface. Both are driven the same way, by writing a
//! line and waiting for one of several patterns to show up in the output.
//!
//! - [`transport`]: the byte stream plus the expect primitive
//! - [`session`]: dialect-specific login handshakes
//! - [`client`]: command execution with dialect success/failure markers
//! - [`connector`]: opens logged-in clients for a configured OLT

pub mod client;
pub mod command;
pub mod connector;
pub mod error;
pub mod expect;
pub mod session;
pub mod transport;

pub use client::{countdown, CliClient, Prompt, Tl1Client, Tl1Reply};
pub use command::{quote, Command};
pub use connector::{Connector, OltEndpoint, SshConnector};
pub use error::{OltError, OltResult};
pub use expect::{ExpectBuffer, Match, Pattern};
pub use session::{Credentials, DeviceAddress, Dialect, Session};
pub use transport::{SshTransport, Transport};
