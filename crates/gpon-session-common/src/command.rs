//! Device command text with secret masking.
//!
//! Commands that carry passwords keep a masked rendering which is the only
//! form that reaches logs and error messages.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

const MASK: &str = "******";

/// Characters a device cannot accept inside a quoted value.
static UNQUOTABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["\\\r\n\t]"#).expect("Invalid regex pattern"));

/// Wraps a value in double quotes for CLI and TL1 commands.
///
/// Neither dialect supports escapes inside quoted strings, so characters
/// that would terminate the value are dropped.
///
/// ```
/// use gpon_session_common::quote;
///
/// assert_eq!(quote("Casa 12"), "\"Casa 12\"");
/// assert_eq!(quote("a\"b"), "\"ab\"");
/// ```
pub fn quote(s: &str) -> String {
    format!("\"{}\"", UNQUOTABLE_RE.replace_all(s, ""))
}

/// A single line to send to the device.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    masked: Option<String>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            masked: None,
        }
    }

    /// Marks `secret` as sensitive; it is masked in [`Command::display`].
    pub fn with_secret(mut self, secret: &str) -> Self {
        if !secret.is_empty() {
            let base = self.masked.take().unwrap_or_else(|| self.text.clone());
            self.masked = Some(base.replace(secret, MASK));
        }
        self
    }

    /// Text written to the device.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text safe for logs.
    pub fn display(&self) -> &str {
        self.masked.as_deref().unwrap_or(&self.text)
    }

    pub fn is_sensitive(&self) -> bool {
        self.masked.is_some()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.display()).finish()
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::new(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Command::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("simple"), "\"simple\"");
        assert_eq!(quote(""), "\"\"");
    }

    #[test]
    fn test_quote_strips_terminators() {
        assert_eq!(quote("with\"quote"), "\"withquote\"");
        assert_eq!(quote("back\\slash"), "\"backslash\"");
        assert_eq!(quote("two\nlines"), "\"twolines\"");
    }

    #[test]
    fn test_secret_is_masked() {
        let cmd = Command::new("SET-PASS::PARAMVALUE=hunter22;").with_secret("hunter22");
        assert_eq!(cmd.text(), "SET-PASS::PARAMVALUE=hunter22;");
        assert_eq!(cmd.display(), "SET-PASS::PARAMVALUE=******;");
        assert_eq!(format!("{:?}", cmd), "Command(\"SET-PASS::PARAMVALUE=******;\")");
        assert!(cmd.is_sensitive());
    }

    #[test]
    fn test_multiple_secrets() {
        let cmd = Command::new("user=alice pass=s3cret")
            .with_secret("alice")
            .with_secret("s3cret");
        assert_eq!(cmd.display(), "user=****** pass=******");
    }

    #[test]
    fn test_empty_secret_is_ignored() {
        let cmd = Command::new("exit all").with_secret("");
        assert!(!cmd.is_sensitive());
        assert_eq!(cmd.to_string(), "exit all");
    }
}
