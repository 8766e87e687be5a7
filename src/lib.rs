//! shellpilot: account provisioning on remote hosts over SSH
//!
//! shellpilot drives the interactive account-management menu installed on
//! VPS hosts the way an operator would: it opens a pseudo-terminal over SSH,
//! types menu options and field values, waits for the menu to redraw, and
//! decides from the captured text whether the operation worked. When the
//! menu is missing or refuses, the same operations run through the standard
//! account tools (`useradd`, `chage`, `usermod`, ...) instead.
//!
//! # Features
//!
//! - **Two transports**: in-process libssh2 ([`SshConnector`]) or the system
//!   `ssh` client inside a local PTY ([`OpenSshConnector`])
//! - **Expect-style sessions**: append-only output buffer, pattern or
//!   fixed-delay waits, where a timeout is an answer rather than an error
//! - **Three-way verdicts**: success, failure with the offending line, or
//!   no confirmation at all
//! - **Fallback**: menu first, one-shot commands when the menu cannot help
//! - **Fleet runs**: one operation over many hosts with bounded concurrency
//! - **Housekeeping**: metrics, log and cache cleanup, disk usage, reboots
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use shellpilot::provisioner::{Operation, Secret, Strategy};
//! use shellpilot::parser::KindTag;
//! use shellpilot::{Credential, EngineConfig, RemoteTarget, SshConnector, Verdict};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let connector = Arc::new(SshConnector::new(config.transport.clone()));
//!     let provisioner = Strategy::MenuFirst.build(connector, &config)?;
//!
//!     let target = RemoteTarget::new("203.0.113.5", "root", Credential::password("secret"));
//!     let outcome = provisioner
//!         .provision(
//!             &target,
//!             &Operation::Create {
//!                 identifier: "client01".into(),
//!                 secret: Secret::new("Xk9#pL2q"),
//!                 days: 30,
//!                 kind: KindTag::ordinary(2, "Xk9#pL2q"),
//!             },
//!         )
//!         .await?;
//!
//!     match outcome.verdict {
//!         Verdict::Success => println!("created via {}", outcome.backend),
//!         Verdict::Failed { line } => println!("menu said: {line}"),
//!         Verdict::NoConfirmation => println!("check the host by hand"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Driving a Session by Hand
//!
//! ```rust,no_run
//! use shellpilot::{Credential, Pattern, RemoteTarget, SessionOptions, SshConnector};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = SshConnector::default();
//! let target = RemoteTarget::new("203.0.113.5", "root", Credential::key_file("/root/.ssh/id_ed25519"));
//! let mut session = SessionOptions::new().open(&connector, &target).await?;
//!
//! let start = session.offset();
//! session.send_line("menu").await?;
//! let banner = Pattern::regex(r"(?i)ingresa una opci")?;
//! let step = session
//!     .await_output_from(start, Duration::from_secs(5), Some(&banner))
//!     .await;
//! println!("matched: {}, got {} bytes", step.matched, step.text.len());
//!
//! // Ctrl-C, then leave
//! session.send_raw(&[0x03]).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Every menu option number, wait, keyword and filter lives in
//! [`EngineConfig`], loadable from TOML:
//!
//! ```rust
//! use shellpilot::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     [menu]
//!     launch_commands = ["menu"]
//!
//!     [timings]
//!     result_wait_ms = 8000
//! "#).unwrap();
//! assert_eq!(config.timings.result_wait_ms, 8000);
//! assert_eq!(config.menu.accounts_option, "1");
//! ```

#![warn(missing_docs)]

mod buffer;
mod config;
mod pattern;
mod result;
mod session;

pub mod checks;
pub mod direct;
pub mod maintenance;
pub mod menu;
pub mod monitor;
pub mod parser;
pub mod provisioner;
pub mod transport;

// Public API exports
pub use config::{
    ConfigError, DirectConfig, EngineConfig, FleetConfig, ListingConfig, MenuLayout, MenuTimings,
    PatternSet, SessionConfig, TransportConfig,
};
pub use buffer::strip_ansi;
pub use pattern::{Match, Matcher, Pattern};
pub use result::{
    Backend, ConnectionError, ConnectionErrorKind, OperationOutcome, PatternError, Payload,
    ProvisionError, PurgeFailure, StepResult, Verdict,
};
pub use session::{SessionOptions, TerminalSession};
pub use transport::{
    Connector, Credential, ExecOutput, OpenSshConnector, PtyRequest, RemoteTarget, ShellChannel,
    SshConnector,
};
