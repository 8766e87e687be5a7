//! Interactive terminal sessions

mod builder;

pub use builder::SessionOptions;

use crate::buffer::OutputBuffer;
use crate::pattern::{Matcher, Pattern};
use crate::result::{ConnectionError, ProvisionError, StepResult};
use crate::transport::triage::triage;
use crate::transport::{Connector, RemoteTarget, ShellChannel};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One live shell plus everything it has printed.
///
/// The output buffer only grows for the life of the session. Every wait
/// records the buffer length when it starts and returns what was appended
/// after that point; callers that need a longer view keep their own offset
/// from [`TerminalSession::offset`].
///
/// A session must be released with [`TerminalSession::close`]. Dropping an
/// open session still tears the channel down, but logs a warning.
///
/// # Examples
///
/// ```no_run
/// use shellpilot::{Credential, Pattern, RemoteTarget, SessionOptions, SshConnector};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = SshConnector::default();
/// let target = RemoteTarget::new("203.0.113.5", "root", Credential::password("secret"));
/// let mut session = SessionOptions::new().open(&connector, &target).await?;
///
/// session.send_line("menu").await?;
/// let banner = Pattern::regex(r"(?i)ingresa una opci")?;
/// let step = session.await_output(Duration::from_secs(5), Some(&banner)).await;
/// if !step.matched {
///     println!("no menu, got: {}", step.text);
/// }
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct TerminalSession {
    channel: Box<dyn ShellChannel>,
    buffer: OutputBuffer,
    alive: bool,
    closed: bool,
    created_at: Instant,
    line_ending: String,
    label: String,
}

impl TerminalSession {
    /// Options builder; see [`SessionOptions`].
    pub fn options() -> SessionOptions {
        SessionOptions::new()
    }

    /// Open a shell on `target` and wait out the grace period.
    pub async fn open(
        connector: &dyn Connector,
        target: &RemoteTarget,
        options: &SessionOptions,
    ) -> Result<Self, ProvisionError> {
        let channel = connector.open_shell(target, &options.pty).await?;
        let mut session = Self::from_channel(channel, options, target.label());

        let greeting = session.await_output(options.grace, None).await;
        if !session.alive {
            let message = greeting.text.trim().to_string();
            if let Err(e) = session.close().await {
                debug!(error = %e, "close after early hang-up failed");
            }
            return Err(ConnectionError::new(
                triage(&message),
                &target.host,
                target.port,
                if message.is_empty() {
                    "shell closed immediately".to_string()
                } else {
                    message
                },
            )
            .into());
        }

        debug!(
            session = %session.label,
            bytes = greeting.text.len(),
            "terminal session ready"
        );
        Ok(session)
    }

    /// Wrap an already-open channel.
    pub fn from_channel(
        channel: Box<dyn ShellChannel>,
        options: &SessionOptions,
        label: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            buffer: OutputBuffer::new(options.strip_ansi),
            alive: true,
            closed: false,
            created_at: Instant::now(),
            line_ending: options.line_ending.clone(),
            label: label.into(),
        }
    }

    /// Send `text` followed by the line ending.
    ///
    /// Returns as soon as the bytes are handed to the channel; the remote
    /// side gives no feedback.
    pub async fn send_line(&mut self, text: &str) -> Result<(), ProvisionError> {
        let mut line = String::with_capacity(text.len() + self.line_ending.len());
        line.push_str(text);
        line.push_str(&self.line_ending);
        self.send_raw(line.as_bytes()).await
    }

    /// Send bytes exactly as given, e.g. `&[0x03]` for an interrupt.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), ProvisionError> {
        if self.closed {
            return Err(ProvisionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session is closed",
            )));
        }
        self.channel.write(data).await?;
        Ok(())
    }

    /// Wait for `pattern` anywhere in the accumulated output, or for
    /// `timeout` to pass.
    ///
    /// Without a pattern this is a plain delay that collects output. The
    /// pattern is checked against the whole buffer, so a prompt that arrived
    /// before the call still counts. Timing out without a match is a normal
    /// outcome reported through [`StepResult::matched`]. If the channel has
    /// hung up the wait ends early, since nothing more can arrive.
    pub async fn await_output(&mut self, timeout: Duration, pattern: Option<&Pattern>) -> StepResult {
        self.await_output_from(0, timeout, pattern).await
    }

    /// Like [`TerminalSession::await_output`], but only output at or after
    /// `scan_from` is searched.
    pub async fn await_output_from(
        &mut self,
        scan_from: usize,
        timeout: Duration,
        pattern: Option<&Pattern>,
    ) -> StepResult {
        let entry = self.buffer.len();
        let started = Instant::now();
        let deadline = started + timeout;

        let matcher: Option<Box<dyn Matcher>> = pattern.and_then(|p| match p.to_matcher() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(pattern = %p, error = %e, "unusable pattern, waiting out the timeout");
                None
            }
        });

        let mut matched = false;
        loop {
            let window = self.buffer.since(scan_from);
            if let Some(found) = matcher.as_ref().and_then(|m| m.find(window)) {
                debug!(
                    session = %self.label,
                    line = %String::from_utf8_lossy(found.line(window)).trim(),
                    "pattern matched"
                );
                matched = true;
                break;
            }
            if !self.alive {
                break;
            }

            match tokio::time::timeout_at(deadline, self.channel.read()).await {
                Err(_) => break,
                Ok(Ok(Some(chunk))) => {
                    self.buffer.append(&chunk);
                }
                Ok(Ok(None)) => {
                    debug!(session = %self.label, "remote end closed the channel");
                    self.alive = false;
                }
                Ok(Err(e)) => {
                    warn!(session = %self.label, error = %e, "read failed, treating channel as closed");
                    self.alive = false;
                }
            }
        }

        StepResult {
            text: self.buffer.text_since(entry),
            elapsed: started.elapsed(),
            matched,
        }
    }

    /// Current buffer length, usable as an offset.
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Output appended at or after `offset`.
    pub fn text_since(&self, offset: usize) -> String {
        self.buffer.text_since(offset)
    }

    /// Output captured between two offsets.
    pub fn text_between(&self, start: usize, end: usize) -> String {
        self.buffer.text_between(start, end)
    }

    /// Everything captured so far.
    pub fn output(&self) -> String {
        self.buffer.text()
    }

    /// Whether the channel is still open and has not hung up.
    pub fn is_alive(&self) -> bool {
        self.alive && !self.closed
    }

    /// Time since the session was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Say `exit` if the shell is still there, then release the channel.
    ///
    /// Safe to call more than once and after any error; only the first call
    /// touches the channel.
    pub async fn close(&mut self) -> Result<(), ProvisionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.alive {
            let exit = format!("exit{}", self.line_ending);
            if let Err(e) = self.channel.write(exit.as_bytes()).await {
                debug!(session = %self.label, error = %e, "exit not delivered");
            }
        }
        self.alive = false;

        debug!(session = %self.label, age = ?self.age(), "closing terminal session");
        self.channel.close().await?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(session = %self.label, "terminal session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Channel that releases queued chunks at fixed offsets from its creation.
    struct TimedChannel {
        chunks: VecDeque<(Duration, Vec<u8>)>,
        hang_up_when_drained: bool,
        started: Instant,
        written: Arc<Mutex<Vec<u8>>>,
        closes: Arc<AtomicUsize>,
    }

    impl TimedChannel {
        fn new(chunks: Vec<(u64, &str)>) -> Self {
            Self {
                chunks: chunks
                    .into_iter()
                    .map(|(ms, s)| (Duration::from_millis(ms), s.as_bytes().to_vec()))
                    .collect(),
                hang_up_when_drained: false,
                started: Instant::now(),
                written: Arc::default(),
                closes: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl ShellChannel for TimedChannel {
        async fn write(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
            match self.chunks.front() {
                Some((at, _)) => {
                    tokio::time::sleep_until(self.started + *at).await;
                    Ok(self.chunks.pop_front().map(|(_, c)| c))
                }
                None if self.hang_up_when_drained => Ok(None),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session(channel: TimedChannel) -> TerminalSession {
        TerminalSession::from_channel(Box::new(channel), &SessionOptions::new(), "test")
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_wait_returns_on_match() {
        let mut s = session(TimedChannel::new(vec![
            (100, "loading...\n"),
            (300, "Ingresa una Opcion: "),
        ]));
        let pattern = Pattern::exact("Opcion");
        let step = s.await_output(Duration::from_secs(5), Some(&pattern)).await;
        assert!(step.matched);
        assert_eq!(step.elapsed, Duration::from_millis(300));
        assert_eq!(step.text, "loading...\nIngresa una Opcion: ");
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_match_is_not_an_error() {
        let mut s = session(TimedChannel::new(vec![(50, "nothing useful")]));
        let pattern = Pattern::exact("never");
        let step = s.await_output(Duration::from_millis(800), Some(&pattern)).await;
        assert!(!step.matched);
        assert_eq!(step.elapsed, Duration::from_millis(800));
        assert_eq!(step.text, "nothing useful");
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_waits_full_timeout() {
        let mut s = session(TimedChannel::new(vec![(10, "a"), (20, "b")]));
        let step = s.await_output(Duration::from_millis(500), None).await;
        assert!(!step.matched);
        assert_eq!(step.elapsed, Duration::from_millis(500));
        assert_eq!(step.text, "ab");
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_seen_before_call_still_matches() {
        let mut s = session(TimedChannel::new(vec![(10, "PROMPT> ")]));
        s.await_output(Duration::from_millis(100), None).await;

        let step = s
            .await_output(Duration::from_secs(5), Some(&Pattern::exact("PROMPT>")))
            .await;
        assert!(step.matched);
        assert_eq!(step.elapsed, Duration::ZERO);
        assert_eq!(step.text, "");
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_from_ignores_older_output() {
        let mut s = session(TimedChannel::new(vec![(10, "Opcion "), (200, "x Opcion")]));
        s.await_output(Duration::from_millis(50), None).await;
        let mark = s.offset();

        let step = s
            .await_output_from(mark, Duration::from_secs(1), Some(&Pattern::exact("Opcion")))
            .await;
        assert!(step.matched);
        assert_eq!(step.text, "x Opcion");
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_up_ends_wait_early() {
        let mut channel = TimedChannel::new(vec![(10, "logout\n")]);
        channel.hang_up_when_drained = true;
        let mut s = session(channel);
        let step = s.await_output(Duration::from_secs(30), None).await;
        assert_eq!(step.text, "logout\n");
        assert!(step.elapsed < Duration::from_secs(1));
        assert!(!s.is_alive());
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_line_appends_line_ending() {
        let channel = TimedChannel::new(vec![]);
        let written = channel.written.clone();
        let mut s = session(channel);
        s.send_line("menu").await.unwrap();
        s.send_raw(&[0x03]).await.unwrap();
        assert_eq!(&*written.lock().unwrap(), b"menu\n\x03");
        s.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let channel = TimedChannel::new(vec![]);
        let closes = channel.closes.clone();
        let written = channel.written.clone();
        let mut s = session(channel);
        s.close().await.unwrap();
        s.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(&*written.lock().unwrap(), b"exit\n");
        assert!(s.send_line("late").await.is_err());
    }
}
