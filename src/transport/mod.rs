//! Remote command and shell channels
//!
//! A [`Connector`] opens a fresh authenticated connection for every call and
//! never pools. It offers two modes: [`Connector::run_once`] for a single
//! non-interactive command, and [`Connector::open_shell`] for a long-lived
//! pseudo-terminal that [`TerminalSession`](crate::TerminalSession) drives.
//!
//! Two implementations ship with the crate: [`SshConnector`] speaks SSH
//! in-process through libssh2, [`OpenSshConnector`] runs the system `ssh`
//! client inside a local pseudo-terminal.

mod openssh;
mod ssh;
pub mod triage;

pub use openssh::OpenSshConnector;
pub use ssh::SshConnector;

use crate::result::ProvisionError;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Authentication material for one call.
///
/// Secrets are wiped from memory on drop and never printed by `Debug`.
#[derive(Clone)]
pub enum Credential {
    /// Password authentication
    Password(Zeroizing<String>),
    /// PEM private key held in memory
    PrivateKey {
        /// Key text
        pem: Zeroizing<String>,
        /// Passphrase, if the key is encrypted
        passphrase: Option<Zeroizing<String>>,
    },
    /// Private key on local disk
    KeyFile {
        /// Path to the key
        path: PathBuf,
        /// Passphrase, if the key is encrypted
        passphrase: Option<Zeroizing<String>>,
    },
    /// Whatever the local SSH agent offers
    Agent,
}

impl Credential {
    /// Password credential
    pub fn password(secret: impl Into<String>) -> Self {
        Credential::Password(Zeroizing::new(secret.into()))
    }

    /// In-memory private key without passphrase
    pub fn private_key(pem: impl Into<String>) -> Self {
        Credential::PrivateKey {
            pem: Zeroizing::new(pem.into()),
            passphrase: None,
        }
    }

    /// Key file without passphrase
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Credential::KeyFile {
            path: path.into(),
            passphrase: None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey { .. } => f.write_str("PrivateKey(<redacted>)"),
            Credential::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish_non_exhaustive()
            }
            Credential::Agent => f.write_str("Agent"),
        }
    }
}

/// Where to connect and as whom.
///
/// Supplied fresh per call; nothing here is cached.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    /// Host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login name
    pub username: String,
    /// Authentication material
    pub credential: Credential,
    /// Overrides the configured connect timeout
    pub timeout: Option<Duration>,
    /// Overrides the configured keepalive interval
    pub keepalive: Option<Duration>,
}

impl RemoteTarget {
    /// Target on the default port with configured timeouts
    pub fn new(host: impl Into<String>, username: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            credential,
            timeout: None,
            keepalive: None,
        }
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect timeout for this target
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the keepalive interval for this target
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    /// `host:port`, for logs
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Captured result of a one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Remote exit status
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, or stdout when stderr is empty
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Pseudo-terminal parameters for an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Terminal type, e.g. `xterm`
    pub term: String,
    /// Columns
    pub cols: u16,
    /// Rows
    pub rows: u16,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm".into(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Byte stream of one interactive shell.
#[async_trait]
pub trait ShellChannel: Send {
    /// Write bytes to the shell's input
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Next chunk of output, `Ok(None)` once the remote end has closed.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses
    /// no data.
    async fn read(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Release the channel and its connection
    async fn close(&mut self) -> io::Result<()>;
}

/// Opens remote channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run one command and capture both streams and the exit status.
    ///
    /// A nonzero exit status is not an error here; callers decide what it
    /// means.
    async fn run_once(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ProvisionError>;

    /// Open a pseudo-terminal running the login shell.
    async fn open_shell(
        &self,
        target: &RemoteTarget,
        pty: &PtyRequest,
    ) -> Result<Box<dyn ShellChannel>, ProvisionError>;
}

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@,+".contains(&b))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts() {
        let debug = format!("{:?}", Credential::password("Xk9#pL2q"));
        assert!(!debug.contains("Xk9"));
        let debug = format!("{:?}", Credential::private_key("-----BEGIN KEY-----"));
        assert!(!debug.contains("BEGIN"));
    }

    #[test]
    fn test_target_builder() {
        let target = RemoteTarget::new("203.0.113.5", "root", Credential::Agent)
            .port(2222)
            .timeout(Duration::from_secs(5));
        assert_eq!(target.label(), "203.0.113.5:2222");
        assert_eq!(target.timeout, Some(Duration::from_secs(5)));
        assert!(target.keepalive.is_none());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("client01"), "client01");
        assert_eq!(shell_quote("2025-12-26"), "2025-12-26");
        assert_eq!(shell_quote("Xk9#pL2q"), "'Xk9#pL2q'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_exec_diagnostic_prefers_stderr() {
        let out = ExecOutput {
            exit_code: 9,
            stdout: "noise\n".into(),
            stderr: "useradd: user 'bob' already exists\n".into(),
        };
        assert_eq!(out.diagnostic(), "useradd: user 'bob' already exists");
        assert!(!out.success());
    }
}
