//! The system `ssh` client as a transport
//!
//! Interactive shells run `ssh -tt` inside a local pseudo-terminal; one-shot
//! commands run `ssh` as a plain child process. Only key-file and agent
//! credentials can be used, since the client is started in batch mode.

use super::triage::triage;
use super::{Connector, Credential, ExecOutput, PtyRequest, RemoteTarget, ShellChannel};
use crate::config::TransportConfig;
use crate::result::{ConnectionError, ConnectionErrorKind, ProvisionError};
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Exit status the `ssh` client uses for its own failures
const SSH_CLIENT_FAILURE: i32 = 255;

/// How long a closing shell gets to exit on its own before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Connector that shells out to OpenSSH.
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    program: String,
    transport: TransportConfig,
    extra_options: Vec<String>,
}

impl OpenSshConnector {
    /// Use `ssh` from `PATH`
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            program: "ssh".into(),
            transport,
            extra_options: vec!["StrictHostKeyChecking=accept-new".into()],
        }
    }

    /// Use a specific client binary
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Add a `-o` option passed to every invocation
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }

    /// Arguments up to and including the destination.
    ///
    /// The destination follows `--` and may not start with `-`, so a user or
    /// host name is never read as a client option.
    fn base_args(&self, target: &RemoteTarget) -> Result<Vec<String>, ProvisionError> {
        if target.username.starts_with('-') || target.host.starts_with('-') {
            return Err(ProvisionError::InvalidArgument(format!(
                "user and host may not start with '-': {}",
                target.label()
            )));
        }
        let connect = target
            .timeout
            .unwrap_or_else(|| self.transport.connect_timeout());
        let keepalive = target
            .keepalive
            .unwrap_or_else(|| self.transport.keepalive_interval());

        let mut args = vec![
            "-p".to_string(),
            target.port.to_string(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", connect.as_secs().max(1)),
            "-o".into(),
            format!("ServerAliveInterval={}", keepalive.as_secs().max(1)),
        ];
        for option in &self.extra_options {
            args.push("-o".into());
            args.push(option.clone());
        }

        match &target.credential {
            Credential::KeyFile {
                path,
                passphrase: None,
            } => {
                args.push("-i".into());
                args.push(path.display().to_string());
                args.push("-o".into());
                args.push("IdentitiesOnly=yes".into());
            }
            Credential::Agent => {}
            Credential::KeyFile { .. } => {
                return Err(ProvisionError::InvalidArgument(
                    "the ssh client cannot unlock a key passphrase in batch mode".into(),
                ))
            }
            Credential::Password(_) | Credential::PrivateKey { .. } => {
                return Err(ProvisionError::InvalidArgument(
                    "the ssh client transport accepts key files and agent credentials only".into(),
                ))
            }
        }

        args.push("--".into());
        args.push(format!("{}@{}", target.username, target.host));
        Ok(args)
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn run_once(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ProvisionError> {
        let mut args = self.base_args(target)?;
        args.push(command.to_string());

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        let connect = target
            .timeout
            .unwrap_or_else(|| self.transport.connect_timeout());
        let output = tokio::time::timeout(connect + timeout, child)
            .await
            .map_err(|_| {
                ConnectionError::new(
                    ConnectionErrorKind::Timeout,
                    &target.host,
                    target.port,
                    format!("`{command}` did not finish within {timeout:?}"),
                )
            })??;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if exit_code == SSH_CLIENT_FAILURE {
            let message = stderr.trim().to_string();
            return Err(
                ConnectionError::new(triage(&message), &target.host, target.port, message).into(),
            );
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn open_shell(
        &self,
        target: &RemoteTarget,
        pty: &PtyRequest,
    ) -> Result<Box<dyn ShellChannel>, ProvisionError> {
        let args = self.base_args(target)?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: pty.rows,
                cols: pty.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.program);
        cmd.arg("-tt");
        cmd.args(&args);
        cmd.env("TERM", &pty.term);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| io::Error::other(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| io::Error::other(e.to_string()))?;

        let (tx, output) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("shellpilot-pty".into())
            .spawn(move || pump_reader(reader, tx))?;

        debug!(target = %target.label(), program = %self.program, "ssh client started");
        Ok(Box::new(PtyShell {
            _master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            child: Some(child),
            output,
        }))
    }
}

fn pump_reader(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<io::Result<Vec<u8>>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            // EIO is how a Linux PTY reports that the child hung up
            Err(e) if e.raw_os_error() == Some(5) => return,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

/// `ssh -tt` running in a local pseudo-terminal.
struct PtyShell {
    _master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    output: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
}

#[async_trait]
impl ShellChannel for PtyShell {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let writer = self.writer.clone();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut writer = writer.blocking_lock();
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.output.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        reap(child, EXIT_GRACE).await.map(|_| ())
    }
}

/// Wait up to `grace` for `child` to exit, then kill it. Returns whether it
/// exited on its own.
async fn reap(mut child: Box<dyn Child + Send + Sync>, grace: Duration) -> io::Result<bool> {
    let mut killer = child.clone_killer();
    let waiter = tokio::task::spawn_blocking(move || child.wait().map(|_| ()));

    match tokio::time::timeout(grace, waiter).await {
        Ok(waited) => waited.map_err(io::Error::other)?.map(|_| true),
        Err(_) => {
            debug!(?grace, "ssh client still running, killing it");
            if let Err(e) = killer.kill() {
                debug!(error = %e, "kill failed, client already gone");
            }
            Ok(false)
        }
    }
}

impl Drop for PtyShell {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
        }
    }
}
