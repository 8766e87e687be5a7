//! Menu-driven provisioning
//!
//! Drives the interactive account-management menu on a remote host: open a
//! terminal session, launch the menu, run a [`Script`], classify what the
//! menu printed, leave the menu and close the session.

mod classify;
mod script;

pub use classify::{classify, strip_echo, ClassifyMode, Classifier};
pub use script::{Field, FieldValues, MenuAction, Script, Step, INTERRUPT};

use crate::config::EngineConfig;
use crate::parser::{parse_created_account, parse_monitor};
use crate::pattern::Pattern;
use crate::result::{Backend, OperationOutcome, Payload, PatternError, ProvisionError, Verdict};
use crate::session::{SessionOptions, TerminalSession};
use crate::transport::{Connector, RemoteTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

/// Runs menu scripts against remote hosts.
///
/// The engine holds no per-host state and can be shared between tasks.
///
/// # Examples
///
/// ```no_run
/// use shellpilot::menu::{FieldValues, MenuAction, MenuEngine};
/// use shellpilot::{Credential, EngineConfig, RemoteTarget, SshConnector};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = MenuEngine::new(Arc::new(SshConnector::default()), EngineConfig::default())?;
/// let target = RemoteTarget::new("203.0.113.5", "root", Credential::password("secret"));
/// let values = FieldValues::new().identifier("client01").secret("Xk9#pL2q").days(30);
/// let outcome = engine.run(&target, MenuAction::Create, &values).await?;
/// println!("{:?}", outcome.verdict);
/// # Ok(())
/// # }
/// ```
pub struct MenuEngine {
    connector: Arc<dyn Connector>,
    config: EngineConfig,
    options: SessionOptions,
    banner: Pattern,
    classifier: Classifier,
}

impl MenuEngine {
    /// Engine using `connector` for sessions.
    ///
    /// # Errors
    ///
    /// Fails if the banner regex or the keyword sets do not compile.
    pub fn new(connector: Arc<dyn Connector>, config: EngineConfig) -> Result<Self, ProvisionError> {
        let banner = config.menu.banner().map_err(PatternError::from)?;
        let classifier = Classifier::new(&config.patterns)?;
        let options = SessionOptions::from_config(&config.transport, &config.session);
        Ok(Self {
            connector,
            config,
            options,
            banner,
            classifier,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Perform `action` on `target`.
    ///
    /// The session is closed on every path once it has been opened. If the
    /// returned future is dropped part way, the session's channel is torn
    /// down when the session itself is dropped.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidArgument`] if a value the script types is
    ///   missing or unusable; nothing is sent in that case.
    /// - [`ProvisionError::Connection`] if no session can be opened.
    /// - [`ProvisionError::MenuUnreachable`] if no launch command shows the
    ///   menu banner.
    ///
    /// A menu that reports failure, or says nothing recognizable, is not an
    /// error here; see [`OperationOutcome::verdict`].
    #[instrument(skip_all, fields(host = %target.host, action = %action))]
    pub async fn run(
        &self,
        target: &RemoteTarget,
        action: MenuAction,
        values: &FieldValues,
    ) -> Result<OperationOutcome, ProvisionError> {
        let script = Script::for_action(action, &self.config.menu, &self.config.timings, &self.banner);
        script.check(values)?;

        let mut session = TerminalSession::open(self.connector.as_ref(), target, &self.options).await?;
        let result = self.drive(&mut session, &script, values).await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "closing session failed");
        }

        let (verdict, window) = result?;
        let mut outcome = OperationOutcome::new(action.label(), Backend::Menu, verdict, session.output());
        match action {
            MenuAction::Create if outcome.is_success() => match parse_created_account(&window) {
                Some(created) => outcome = outcome.with_payload(Payload::Created(created)),
                None => debug!("creation confirmed but no account banner found"),
            },
            MenuAction::ListConnections if outcome.is_success() => {
                outcome = outcome.with_payload(Payload::Connections(parse_monitor(&window)));
            }
            _ => {}
        }

        info!(verdict = ?outcome.verdict, "menu operation finished");
        Ok(outcome)
    }

    async fn drive(
        &self,
        session: &mut TerminalSession,
        script: &Script,
        values: &FieldValues,
    ) -> Result<(Verdict, String), ProvisionError> {
        self.launch(session).await?;

        let executed = self.execute(session, &script.steps, values, script.mode).await;
        let exit = Script::exit_steps(&self.config.menu, &self.config.timings);
        if let Err(e) = self
            .execute(session, &exit, &FieldValues::new(), ClassifyMode::Listing)
            .await
        {
            debug!(error = %e, "leaving the menu failed");
        }

        match executed? {
            Some(result) => Ok(result),
            None => {
                let window = session.output();
                Ok((self.classifier.classify(&window, script.mode), window))
            }
        }
    }

    /// Start the menu, trying each launch command in turn.
    async fn launch(&self, session: &mut TerminalSession) -> Result<(), ProvisionError> {
        let menu = &self.config.menu;
        let timings = &self.config.timings;

        if let Some(prelude) = &menu.prelude_command {
            session.send_line(prelude).await?;
            session
                .await_output(Duration::from_millis(timings.prelude_wait_ms), None)
                .await;
        }

        for command in &menu.launch_commands {
            let from = session.offset();
            session.send_line(command).await?;
            let step = session
                .await_output_from(from, Duration::from_millis(timings.launch_wait_ms), Some(&self.banner))
                .await;
            if step.matched {
                debug!(command = %command, elapsed = ?step.elapsed, "menu banner seen");
                return Ok(());
            }
            debug!(command = %command, "no menu banner");
            if !session.is_alive() {
                break;
            }
        }

        Err(ProvisionError::MenuUnreachable {
            attempted: menu.launch_commands.clone(),
        })
    }

    /// Output from `mark` to `end`, each typed value's echo removed from the
    /// output that followed it.
    fn window(
        session: &TerminalSession,
        mark: usize,
        end: usize,
        typed: &[(usize, Zeroizing<String>)],
    ) -> String {
        let first = typed.first().map_or(end, |(at, _)| *at).min(end);
        let mut window = session.text_between(mark, first);
        for (i, (at, input)) in typed.iter().enumerate() {
            let next = typed.get(i + 1).map_or(end, |(n, _)| *n).min(end);
            window.push_str(&strip_echo(&session.text_between(*at, next), input));
        }
        window
    }

    /// Run `steps`; returns the classification if a
    /// [`Step::ClassifyAndReturn`] was reached.
    ///
    /// The classified window runs from the mark to the seal (or the end of
    /// output) with the echo of everything typed since the mark removed.
    async fn execute(
        &self,
        session: &mut TerminalSession,
        steps: &[Step],
        values: &FieldValues,
        mode: ClassifyMode,
    ) -> Result<Option<(Verdict, String)>, ProvisionError> {
        let mut mark = 0;
        let mut seal = None;
        let mut last_send = session.offset();
        // what was typed since the mark, and where the output stood then
        let mut typed: Vec<(usize, Zeroizing<String>)> = Vec::new();

        for step in steps {
            match step {
                Step::SendLiteral(text) => {
                    debug!(text = %text, "send");
                    last_send = session.offset();
                    session.send_line(text).await?;
                    if seal.is_none() {
                        typed.push((last_send, Zeroizing::new(text.clone())));
                    }
                }
                Step::SendField(field) => {
                    let value = values.text(*field)?;
                    match field {
                        Field::Secret => debug!(field = ?field, value = "<redacted>", "send"),
                        _ => debug!(field = ?field, value = %value.as_str(), "send"),
                    }
                    last_send = session.offset();
                    session.send_line(&value).await?;
                    if seal.is_none() {
                        typed.push((last_send, value));
                    }
                }
                Step::SendInterrupt => {
                    last_send = session.offset();
                    session.send_raw(&[INTERRUPT]).await?;
                }
                Step::WaitFixed(delay) => {
                    session.await_output(*delay, None).await;
                }
                Step::WaitForPattern { pattern, timeout } => {
                    let step = session.await_output_from(last_send, *timeout, Some(pattern)).await;
                    if !step.matched {
                        debug!(pattern = %pattern, "pattern not seen, continuing");
                    }
                }
                Step::Mark => {
                    mark = session.offset();
                    seal = None;
                    typed.clear();
                }
                Step::Seal => seal = Some(session.offset()),
                Step::ClassifyAndReturn => {
                    let end = seal.unwrap_or_else(|| session.offset());
                    let window = Self::window(session, mark, end, &typed);
                    let verdict = self.classifier.classify(&window, mode);
                    return Ok(Some((verdict, window)));
                }
            }
        }
        Ok(None)
    }
}
