//! In-process SSH via libssh2

use super::triage::{triage, triage_io};
use super::{Connector, Credential, ExecOutput, PtyRequest, RemoteTarget, ShellChannel};
use crate::config::TransportConfig;
use crate::result::{ConnectionError, ConnectionErrorKind, ProvisionError};
use async_trait::async_trait;
use ssh2::{Channel, Session};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Pause between polls of a non-blocking channel
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Read chunk size
const READ_CHUNK: usize = 8192;

/// Upper bound for pushing one write through a congested channel
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Timeout for the blocking teardown of a shell
const CLOSE_TIMEOUT_MS: u32 = 2000;

/// Connector backed by the `ssh2` crate.
///
/// Blocking libssh2 calls run on the blocking thread pool for one-shot
/// commands, and on a dedicated thread per interactive shell, so the async
/// scheduler is never stalled by network I/O.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    transport: TransportConfig,
}

impl SshConnector {
    /// Connector using the given defaults
    pub fn new(transport: TransportConfig) -> Self {
        Self { transport }
    }

    fn connect_timeout(&self, target: &RemoteTarget) -> Duration {
        target
            .timeout
            .unwrap_or_else(|| self.transport.connect_timeout())
    }

    fn keepalive(&self, target: &RemoteTarget) -> Duration {
        target
            .keepalive
            .unwrap_or_else(|| self.transport.keepalive_interval())
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn run_once(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ProvisionError> {
        let connect_timeout = self.connect_timeout(target);
        let keepalive = self.keepalive(target);
        let owned_target = target.clone();
        let owned_command = command.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let session = connect(&owned_target, connect_timeout, keepalive)?;
            exec_blocking(&session, &owned_target, &owned_command, timeout)
        });

        match tokio::time::timeout(connect_timeout + timeout, task).await {
            Ok(joined) => joined.map_err(|e| ProvisionError::Io(io::Error::other(e)))?,
            Err(_) => Err(ConnectionError::new(
                ConnectionErrorKind::Timeout,
                &target.host,
                target.port,
                format!("`{command}` did not finish within {timeout:?}"),
            )
            .into()),
        }
    }

    async fn open_shell(
        &self,
        target: &RemoteTarget,
        pty: &PtyRequest,
    ) -> Result<Box<dyn ShellChannel>, ProvisionError> {
        let connect_timeout = self.connect_timeout(target);
        let keepalive = self.keepalive(target);
        let owned_target = target.clone();
        let pty = pty.clone();

        let task = tokio::task::spawn_blocking(move || {
            let session = connect(&owned_target, connect_timeout, keepalive)?;
            let mut channel = session
                .channel_session()
                .map_err(|e| exec_error("shell", e))?;
            channel
                .request_pty(
                    &pty.term,
                    None,
                    Some((u32::from(pty.cols), u32::from(pty.rows), 0, 0)),
                )
                .map_err(|e| exec_error("pty-req", e))?;
            channel.shell().map_err(|e| exec_error("shell", e))?;
            Ok::<_, ProvisionError>((session, channel))
        });

        let (session, channel) = match tokio::time::timeout(connect_timeout, task).await {
            Ok(joined) => joined.map_err(|e| ProvisionError::Io(io::Error::other(e)))??,
            Err(_) => {
                return Err(ConnectionError::new(
                    ConnectionErrorKind::Timeout,
                    &target.host,
                    target.port,
                    format!("no shell within {connect_timeout:?}"),
                )
                .into())
            }
        };

        debug!(target = %target.label(), "interactive shell opened");
        Ok(Box::new(SshShell::spawn(session, channel, keepalive)?))
    }
}

/// Resolve, connect, handshake, and authenticate.
fn connect(
    target: &RemoteTarget,
    connect_timeout: Duration,
    keepalive: Duration,
) -> Result<Session, ConnectionError> {
    let fail = |kind: ConnectionErrorKind, message: String| {
        ConnectionError::new(kind, &target.host, target.port, message)
    };

    let addrs: Vec<_> = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| fail(ConnectionErrorKind::HostUnreachable, e.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(fail(
            ConnectionErrorKind::HostUnreachable,
            format!("{} resolved to no addresses", target.host),
        ));
    }

    let mut last_error = None;
    let mut stream = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, connect_timeout) {
            Ok(tcp) => {
                stream = Some(tcp);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let tcp = match (stream, last_error) {
        (Some(tcp), _) => tcp,
        (None, Some(e)) => return Err(fail(triage_io(&e), e.to_string())),
        (None, None) => {
            return Err(fail(
                ConnectionErrorKind::HostUnreachable,
                "no address to connect to".into(),
            ))
        }
    };

    let mut session =
        Session::new().map_err(|e| fail(ConnectionErrorKind::Protocol, e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(millis_u32(connect_timeout));
    session.handshake().map_err(|e| ssh_failure(target, &e))?;

    authenticate(&session, target)?;

    session.set_keepalive(true, keepalive_secs(keepalive));
    Ok(session)
}

fn authenticate(session: &Session, target: &RemoteTarget) -> Result<(), ConnectionError> {
    let user = target.username.as_str();
    let result = match &target.credential {
        Credential::Password(password) => session.userauth_password(user, password),
        Credential::PrivateKey { pem, passphrase } => {
            let passphrase = passphrase.as_ref().map(|p| p.as_str());
            session.userauth_pubkey_memory(user, None, pem, passphrase)
        }
        Credential::KeyFile { path, passphrase } => {
            let passphrase = passphrase.as_ref().map(|p| p.as_str());
            session.userauth_pubkey_file(user, None, path, passphrase)
        }
        Credential::Agent => session.userauth_agent(user),
    };
    result.map_err(|e| ssh_failure(target, &e))?;

    if !session.authenticated() {
        return Err(ConnectionError::new(
            ConnectionErrorKind::Authentication,
            &target.host,
            target.port,
            "server did not accept the credential",
        ));
    }
    Ok(())
}

/// Run one command to completion, draining stdout and stderr together.
fn exec_blocking(
    session: &Session,
    target: &RemoteTarget,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, ProvisionError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| exec_error(command, e))?;
    channel.exec(command).map_err(|e| exec_error(command, e))?;
    session.set_blocking(false);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut stderr_stream = channel.stderr();
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let mut progressed = false;
        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(exec_io_error(command, e)),
        }
        match stderr_stream.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(exec_io_error(command, e)),
        }

        if channel.eof() && !progressed {
            break;
        }
        if Instant::now() >= deadline {
            return Err(ConnectionError::new(
                ConnectionErrorKind::Timeout,
                &target.host,
                target.port,
                format!("`{command}` did not finish within {timeout:?}"),
            )
            .into());
        }
        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }

    session.set_blocking(true);
    session.set_timeout(CLOSE_TIMEOUT_MS);
    if let Err(e) = channel.wait_close() {
        debug!(error = %e, "channel did not close cleanly");
    }
    let exit_code = channel.exit_status().map_err(|e| exec_error(command, e))?;
    let _ = session.disconnect(None, "done", None);

    Ok(ExecOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn ssh_failure(target: &RemoteTarget, err: &ssh2::Error) -> ConnectionError {
    let message = err.to_string();
    ConnectionError::new(triage(&message), &target.host, target.port, message)
}

fn exec_error(command: &str, err: ssh2::Error) -> ProvisionError {
    ProvisionError::Exec {
        command: command.to_string(),
        message: err.to_string(),
    }
}

fn exec_io_error(command: &str, err: io::Error) -> ProvisionError {
    ProvisionError::Exec {
        command: command.to_string(),
        message: err.to_string(),
    }
}

fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Keepalive interval in whole seconds, at least one
fn keepalive_secs(interval: Duration) -> u32 {
    u32::try_from(interval.as_secs().max(1)).unwrap_or(u32::MAX)
}

enum ShellRequest {
    Write(Vec<u8>, oneshot::Sender<io::Result<()>>),
    Close(oneshot::Sender<io::Result<()>>),
}

/// Interactive shell served by a dedicated thread.
///
/// libssh2 sessions are not safe to drive from several threads at once, so
/// the worker thread owns the session and channel outright; the async side
/// talks to it over channels.
struct SshShell {
    requests: std_mpsc::Sender<ShellRequest>,
    output: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
}

impl SshShell {
    fn spawn(session: Session, channel: Channel, keepalive: Duration) -> io::Result<Self> {
        let (requests, request_rx) = std_mpsc::channel();
        let (output_tx, output) = mpsc::unbounded_channel();
        session.set_blocking(false);

        thread::Builder::new()
            .name("shellpilot-ssh".into())
            .spawn(move || shell_worker(session, channel, keepalive, request_rx, output_tx))?;

        Ok(Self { requests, output })
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<io::Result<()>>) -> ShellRequest,
    ) -> io::Result<()> {
        let (ack, done) = oneshot::channel();
        self.requests
            .send(build(ack))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "shell worker has exited"))?;
        done.await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "shell worker has exited"))?
    }
}

#[async_trait]
impl ShellChannel for SshShell {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let data = data.to_vec();
        self.request(|ack| ShellRequest::Write(data, ack)).await
    }

    async fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.output.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.request(ShellRequest::Close).await {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    }
}

fn shell_worker(
    session: Session,
    mut channel: Channel,
    keepalive: Duration,
    requests: std_mpsc::Receiver<ShellRequest>,
    output: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
) {
    let mut output = Some(output);
    let mut next_keepalive = Instant::now() + keepalive;
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let mut progressed = false;

        match requests.try_recv() {
            Ok(ShellRequest::Write(data, ack)) => {
                let _ = ack.send(write_all_nonblocking(&mut channel, &data));
                progressed = true;
            }
            Ok(ShellRequest::Close(ack)) => {
                let _ = ack.send(teardown(&session, &mut channel));
                return;
            }
            Err(std_mpsc::TryRecvError::Empty) => {}
            Err(std_mpsc::TryRecvError::Disconnected) => {
                if let Err(e) = teardown(&session, &mut channel) {
                    warn!(error = %e, "shell dropped without close; teardown failed");
                }
                return;
            }
        }

        if let Some(tx) = &output {
            match channel.read(&mut buf) {
                Ok(0) if channel.eof() => {
                    debug!("remote shell closed its output");
                    output = None;
                }
                Ok(0) => {}
                Ok(n) => {
                    let _ = tx.send(Ok(buf[..n].to_vec()));
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    let _ = tx.send(Err(e));
                    output = None;
                }
            }
        }

        if Instant::now() >= next_keepalive {
            match session.keepalive_send() {
                Ok(secs) => {
                    next_keepalive = Instant::now() + Duration::from_secs(u64::from(secs.max(1)))
                }
                Err(e) => {
                    debug!(error = %e, "keepalive failed");
                    next_keepalive = Instant::now() + keepalive;
                }
            }
        }

        if !progressed {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn write_all_nonblocking(channel: &mut Channel, mut data: &[u8]) -> io::Result<()> {
    let deadline = Instant::now() + WRITE_DEADLINE;
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "channel closed")),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "write stalled"));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
    loop {
        match channel.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
}

fn teardown(session: &Session, channel: &mut Channel) -> io::Result<()> {
    session.set_blocking(true);
    session.set_timeout(CLOSE_TIMEOUT_MS);
    let _ = channel.send_eof();
    let closed = channel.close().map_err(io::Error::from);
    let _ = session.disconnect(None, "session closed", None);
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_secs_saturates() {
        assert_eq!(keepalive_secs(Duration::from_secs(10)), 10);
        assert_eq!(keepalive_secs(Duration::from_millis(300)), 1);
        assert_eq!(keepalive_secs(Duration::from_secs(u64::from(u32::MAX) + 5)), u32::MAX);
    }

    #[test]
    fn test_millis_saturate() {
        assert_eq!(millis_u32(Duration::from_secs(30)), 30_000);
        assert_eq!(millis_u32(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
