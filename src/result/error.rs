//! Error types for shellpilot

use crate::result::Backend;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classified reason a remote connection could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// The host actively refused the TCP connection.
    Refused,
    /// The name did not resolve or no route to the host exists.
    HostUnreachable,
    /// Connect, handshake, or command did not finish in time.
    Timeout,
    /// The server rejected the supplied credential.
    Authentication,
    /// Private key material could not be read or decoded.
    KeyMaterial,
    /// Anything else from the SSH layer (handshake, channel setup).
    Protocol,
}

impl ConnectionErrorKind {
    /// Operator-facing guidance for this failure class.
    pub fn hint(self) -> &'static str {
        match self {
            Self::Refused => "Connection refused. Verify SSH port and firewall settings.",
            Self::HostUnreachable => "Host not found. Verify IP address or domain.",
            Self::Timeout => "Connection timeout. Verify the host is online and accessible.",
            Self::Authentication => {
                "Authentication failed. Verify username, password, or SSH key."
            }
            Self::KeyMaterial => "SSH key error. Verify key format and permissions.",
            Self::Protocol => "SSH session error. Verify the SSH service on the host.",
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Refused => "connection refused",
            Self::HostUnreachable => "host unreachable",
            Self::Timeout => "timed out",
            Self::Authentication => "authentication failed",
            Self::KeyMaterial => "key error",
            Self::Protocol => "protocol error",
        };
        f.write_str(label)
    }
}

/// Transport-level failure with enough detail to triage it.
#[derive(Error, Debug, Clone)]
#[error("{kind} ({host}:{port}): {message}")]
pub struct ConnectionError {
    /// Classified failure
    pub kind: ConnectionErrorKind,
    /// Target host as supplied by the caller
    pub host: String,
    /// Target port
    pub port: u16,
    /// Raw message from the underlying library or client
    pub message: String,
}

impl ConnectionError {
    /// Build an error for a target
    pub fn new(
        kind: ConnectionErrorKind,
        host: impl Into<String>,
        port: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            message: message.into(),
        }
    }

    /// Operator-facing guidance, see [`ConnectionErrorKind::hint`].
    pub fn hint(&self) -> &'static str {
        self.kind.hint()
    }
}

/// Errors surfaced by account provisioning.
///
/// Transport failures are never retried here; they carry a triage hint via
/// [`ConnectionError::hint`]. The menu outcomes `OperationFailed` and
/// `NoConfirmation` are only produced by [`OperationOutcome::into_result`],
/// since an automation run reports them as a [`Verdict`] rather than an error.
///
/// [`OperationOutcome::into_result`]: crate::OperationOutcome::into_result
/// [`Verdict`]: crate::Verdict
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Could not connect or authenticate.
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),

    /// A remote command or channel failed.
    ///
    /// `message` carries the remote stderr verbatim when there is one.
    #[error("command `{command}` failed: {message}")]
    Exec {
        /// The command line that failed
        command: String,
        /// Remote stderr or channel error
        message: String,
    },

    /// The menu program never showed its banner.
    #[error("menu program did not respond after trying {}", .attempted.join(", "))]
    MenuUnreachable {
        /// Launch commands that were tried, in order
        attempted: Vec<String>,
    },

    /// The remote side reported an error.
    #[error("operation failed: {detail}")]
    OperationFailed {
        /// The matched diagnostic line
        detail: String,
    },

    /// Neither success nor failure could be read from the output.
    #[error("{operation}: no confirmation in output, verify manually")]
    NoConfirmation {
        /// Operation label
        operation: String,
    },

    /// The backend has no way to perform this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Operation label
        operation: String,
        /// Backend that rejected it
        backend: Backend,
    },

    /// Caller supplied a value that cannot be sent safely.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid pattern in configuration.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Local I/O error (interactive channel, PTY, child process).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Stable short label for reports and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Exec { .. } => "exec",
            Self::MenuUnreachable { .. } => "menu_unreachable",
            Self::OperationFailed { .. } => "operation_failed",
            Self::NoConfirmation { .. } => "no_confirmation",
            Self::Unsupported { .. } => "unsupported",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Pattern(_) => "pattern",
            Self::Io(_) => "io",
        }
    }
}

/// Errors related to pattern creation or matching.
#[derive(Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Invalid glob pattern.
    ///
    /// Returned for malformed account exclusion globs.
    #[error("Invalid glob: {0}")]
    InvalidGlob(String),

    /// Empty pattern.
    #[error("Pattern cannot be empty")]
    EmptyPattern,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display_and_hint() {
        let err = ConnectionError::new(
            ConnectionErrorKind::Refused,
            "203.0.113.5",
            22,
            "Connection refused (os error 111)",
        );
        assert_eq!(
            err.to_string(),
            "connection refused (203.0.113.5:22): Connection refused (os error 111)"
        );
        assert!(err.hint().contains("firewall"));
    }

    #[test]
    fn test_menu_unreachable_lists_attempts() {
        let err = ProvisionError::MenuUnreachable {
            attempted: vec!["menu".into(), "adm".into()],
        };
        assert_eq!(
            err.to_string(),
            "menu program did not respond after trying menu, adm"
        );
        assert_eq!(err.category(), "menu_unreachable");
    }
}
