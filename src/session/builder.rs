//! Session options

use crate::config::{SessionConfig, TransportConfig};
use crate::result::ProvisionError;
use crate::session::TerminalSession;
use crate::transport::{Connector, PtyRequest, RemoteTarget};
use std::time::Duration;

/// Default time a new shell gets to print its prompt (in milliseconds)
const DEFAULT_GRACE_MS: u64 = 1000;

/// Default PTY rows
const DEFAULT_PTY_ROWS: u16 = 24;

/// Default PTY columns
const DEFAULT_PTY_COLS: u16 = 80;

/// Options for opening a [`TerminalSession`].
///
/// # Defaults
///
/// - Grace period: 1 second
/// - ANSI stripping: enabled
/// - Line ending: `\n`
/// - PTY: `xterm`, 24 rows × 80 columns
///
/// # Examples
///
/// ```no_run
/// use shellpilot::{Credential, RemoteTarget, SessionOptions, SshConnector};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = SshConnector::default();
/// let target = RemoteTarget::new("203.0.113.5", "root", Credential::password("secret"));
/// let mut session = SessionOptions::new()
///     .grace(Duration::from_millis(1500))
///     .pty_size(40, 120)
///     .open(&connector, &target)
///     .await?;
/// session.send_line("menu").await?;
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub(crate) grace: Duration,
    pub(crate) strip_ansi: bool,
    pub(crate) line_ending: String,
    pub(crate) pty: PtyRequest,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionOptions {
    /// Options with the defaults listed above.
    pub fn new() -> Self {
        Self {
            grace: Duration::from_millis(DEFAULT_GRACE_MS),
            strip_ansi: true,
            line_ending: "\n".into(),
            pty: PtyRequest {
                term: "xterm".into(),
                cols: DEFAULT_PTY_COLS,
                rows: DEFAULT_PTY_ROWS,
            },
        }
    }

    /// Options taken from configuration sections.
    pub fn from_config(transport: &TransportConfig, session: &SessionConfig) -> Self {
        Self {
            grace: Duration::from_millis(session.grace_ms),
            strip_ansi: session.strip_ansi,
            line_ending: session.line_ending.clone(),
            pty: PtyRequest {
                term: transport.pty_term.clone(),
                cols: transport.pty_cols,
                rows: transport.pty_rows,
            },
        }
    }

    /// Set how long to wait for the initial prompt after the shell opens.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Enable or disable ANSI escape sequence stripping.
    ///
    /// Menu programs color almost every line, so stripping is on by default;
    /// keyword classification would otherwise have to see through escapes.
    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    /// Set what [`TerminalSession::send_line`] appends.
    pub fn line_ending(mut self, ending: impl Into<String>) -> Self {
        self.line_ending = ending.into();
        self
    }

    /// Set the terminal type requested from the server.
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.pty.term = term.into();
        self
    }

    /// Set PTY size (rows × columns).
    pub fn pty_size(mut self, rows: u16, cols: u16) -> Self {
        self.pty.rows = rows;
        self.pty.cols = cols;
        self
    }

    /// Open an interactive session on `target`.
    ///
    /// Returns once the grace period has passed.
    ///
    /// # Errors
    ///
    /// Connection failures, and a shell that hangs up during the grace
    /// period, are reported as [`ProvisionError::Connection`].
    pub async fn open(
        &self,
        connector: &dyn Connector,
        target: &RemoteTarget,
    ) -> Result<TerminalSession, ProvisionError> {
        TerminalSession::open(connector, target, self).await
    }
}
