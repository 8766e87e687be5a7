//! Account management through one-shot commands
//!
//! Every call opens its own connection through [`Connector::run_once`].
//! Conditions that only mean "already done" (an existing account on
//! create, a missing one on delete, an unchanged lock state) are logged and
//! absorbed; every other nonzero exit is returned as
//! [`ProvisionError::Exec`] carrying the remote diagnostic.

mod commands;

pub use commands::{expiry_after, validate_identifier, validate_secret};

use crate::config::EngineConfig;
use crate::parser::{
    count_by_user, parse_passwd, parse_sshd_processes, AccountRecord, ActiveConnection,
    CreatedAccount, KindTag, ListingFilter,
};
use crate::result::{Backend, OperationOutcome, Payload, ProvisionError, PurgeFailure, Verdict};
use crate::transport::{Connector, ExecOutput, RemoteTarget};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What was run and what it printed, for [`OperationOutcome::raw_output`].
#[derive(Debug, Default)]
struct Transcript {
    text: String,
}

impl Transcript {
    fn record(&mut self, shown: &str, output: &ExecOutput) {
        self.text.push_str("$ ");
        self.text.push_str(shown);
        self.text.push('\n');
        for stream in [&output.stdout, &output.stderr] {
            if !stream.is_empty() {
                self.text.push_str(stream);
                if !stream.ends_with('\n') {
                    self.text.push('\n');
                }
            }
        }
    }

    fn outcome(self, operation: &str) -> OperationOutcome {
        OperationOutcome::new(operation, Backend::Direct, Verdict::Success, self.text)
    }
}

/// One-shot account-management commands against a host.
///
/// # Examples
///
/// ```no_run
/// use shellpilot::direct::DirectCommands;
/// use shellpilot::parser::KindTag;
/// use shellpilot::{Credential, EngineConfig, RemoteTarget, SshConnector};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let direct = DirectCommands::new(Arc::new(SshConnector::default()), &EngineConfig::default())?;
/// let target = RemoteTarget::new("203.0.113.5", "root", Credential::password("secret"));
/// direct
///     .create_account(&target, "client01", "Xk9#pL2q", 30, &KindTag::ordinary(2, "Xk9#pL2q"))
///     .await?;
/// for account in direct.list_accounts(&target).await? {
///     println!("{} {:?}", account.username, account.days_remaining);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DirectCommands {
    connector: Arc<dyn Connector>,
    filter: ListingFilter,
    login_shell: String,
    kill_grace: Duration,
    command_timeout: Duration,
    today: Option<NaiveDate>,
}

impl DirectCommands {
    /// Commands run through `connector`.
    ///
    /// # Errors
    ///
    /// Fails if the listing exclusion globs do not compile.
    pub fn new(connector: Arc<dyn Connector>, config: &EngineConfig) -> Result<Self, ProvisionError> {
        Ok(Self {
            connector,
            filter: ListingFilter::from_config(&config.listing)?,
            login_shell: config.direct.login_shell.clone(),
            kill_grace: Duration::from_millis(config.direct.kill_grace_ms),
            command_timeout: config.transport.command_timeout(),
            today: None,
        })
    }

    /// Use a fixed date instead of the local calendar for expiry arithmetic.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    async fn exec(
        &self,
        target: &RemoteTarget,
        line: &str,
        shown: &str,
    ) -> Result<ExecOutput, ProvisionError> {
        let output = self
            .connector
            .run_once(target, line, self.command_timeout)
            .await?;
        debug!(host = %target.host, command = %shown, exit_code = output.exit_code, "remote command finished");
        Ok(output)
    }

    /// Run `line`, turning a nonzero exit into an error.
    async fn exec_checked(
        &self,
        target: &RemoteTarget,
        line: &str,
        shown: &str,
        transcript: &mut Transcript,
    ) -> Result<ExecOutput, ProvisionError> {
        let output = self.exec(target, line, shown).await?;
        transcript.record(shown, &output);
        if output.success() {
            Ok(output)
        } else {
            Err(ProvisionError::Exec {
                command: shown.to_string(),
                message: output.diagnostic(),
            })
        }
    }

    /// Create an account valid for `days` days and set its password.
    ///
    /// An existing account is reused: its expiry is updated and its
    /// password replaced.
    pub async fn create_account(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        secret: &str,
        days: u32,
        tag: &KindTag,
    ) -> Result<OperationOutcome, ProvisionError> {
        let expiry = expiry_after(self.today(), days)?;
        self.create_account_until(target, identifier, secret, expiry, tag)
            .await
    }

    /// Create an account expiring on `expiry` and set its password.
    pub async fn create_account_until(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        secret: &str,
        expiry: NaiveDate,
        tag: &KindTag,
    ) -> Result<OperationOutcome, ProvisionError> {
        validate_identifier(identifier)?;
        validate_secret(secret)?;
        if !tag.is_storable() {
            return Err(ProvisionError::InvalidArgument(
                "account tag payload contains ':' or a line break".into(),
            ));
        }

        info!(host = %target.host, account = %identifier, %expiry, kind = %tag.kind, "creating account");
        let mut transcript = Transcript::default();

        let useradd = commands::useradd(&self.login_shell, expiry, tag, identifier);
        let created = self.exec(target, &useradd, &useradd).await?;
        transcript.record(&useradd, &created);
        if !created.success() {
            let diagnostic = created.diagnostic();
            if !commands::already_exists(&diagnostic) {
                return Err(ProvisionError::Exec {
                    command: useradd,
                    message: diagnostic,
                });
            }
            warn!(host = %target.host, account = %identifier, "account already exists, updating it");
            let chage = commands::chage_expiry(identifier, expiry);
            self.exec_checked(target, &chage, &chage, &mut transcript)
                .await?;
        }

        self.exec_checked(
            target,
            &commands::chpasswd(identifier, secret),
            "chpasswd",
            &mut transcript,
        )
        .await?;

        let created = CreatedAccount {
            server_ip: target.host.clone(),
            username: identifier.to_string(),
            token: None,
            expires_in: Some(expiry.format("%Y-%m-%d").to_string()),
        };
        Ok(transcript
            .outcome("create")
            .with_payload(Payload::Created(created)))
    }

    /// End the account's sessions, then remove it and its home directory.
    pub async fn delete_account(
        &self,
        target: &RemoteTarget,
        identifier: &str,
    ) -> Result<OperationOutcome, ProvisionError> {
        validate_identifier(identifier)?;
        info!(host = %target.host, account = %identifier, "removing account");
        let mut transcript = Transcript::default();

        let kill = commands::kill_sessions(identifier);
        let killed = self.exec(target, &kill, &kill).await?;
        transcript.record(&kill, &killed);
        if killed.success() {
            tokio::time::sleep(self.kill_grace).await;
        } else {
            debug!(account = %identifier, "no sessions to end");
        }

        let userdel = commands::userdel(identifier);
        let removed = self.exec(target, &userdel, &userdel).await?;
        transcript.record(&userdel, &removed);
        if !removed.success() {
            let diagnostic = removed.diagnostic();
            if !commands::already_absent(&diagnostic) {
                return Err(ProvisionError::Exec {
                    command: userdel,
                    message: diagnostic,
                });
            }
            warn!(host = %target.host, account = %identifier, "account does not exist");
        }
        Ok(transcript.outcome("remove"))
    }

    /// Set the account's expiry date.
    pub async fn set_expiry(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        expiry: NaiveDate,
    ) -> Result<OperationOutcome, ProvisionError> {
        validate_identifier(identifier)?;
        let mut transcript = Transcript::default();
        let chage = commands::chage_expiry(identifier, expiry);
        self.exec_checked(target, &chage, &chage, &mut transcript)
            .await?;
        Ok(transcript.outcome("renew"))
    }

    /// Make the account valid for `days` more days from today.
    pub async fn renew(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        days: u32,
    ) -> Result<OperationOutcome, ProvisionError> {
        let expiry = expiry_after(self.today(), days)?;
        self.set_expiry(target, identifier, expiry).await
    }

    /// Lock the account's password. Locking a locked account succeeds.
    pub async fn lock(
        &self,
        target: &RemoteTarget,
        identifier: &str,
    ) -> Result<OperationOutcome, ProvisionError> {
        self.toggle(target, identifier, commands::lock(identifier), "block")
            .await
    }

    /// Unlock the account's password. Unlocking an unlocked account succeeds.
    pub async fn unlock(
        &self,
        target: &RemoteTarget,
        identifier: &str,
    ) -> Result<OperationOutcome, ProvisionError> {
        self.toggle(target, identifier, commands::unlock(identifier), "unblock")
            .await
    }

    async fn toggle(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        line: String,
        operation: &str,
    ) -> Result<OperationOutcome, ProvisionError> {
        validate_identifier(identifier)?;
        let mut transcript = Transcript::default();
        let output = self.exec(target, &line, &line).await?;
        transcript.record(&line, &output);
        if !output.success() {
            let diagnostic = output.diagnostic();
            if !commands::unchanged(&diagnostic) {
                return Err(ProvisionError::Exec {
                    command: line,
                    message: diagnostic,
                });
            }
            debug!(account = %identifier, operation, "already in requested state");
        }
        Ok(transcript.outcome(operation))
    }

    /// Replace the account's password.
    pub async fn set_secret(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        secret: &str,
    ) -> Result<OperationOutcome, ProvisionError> {
        validate_identifier(identifier)?;
        validate_secret(secret)?;
        let mut transcript = Transcript::default();
        self.exec_checked(
            target,
            &commands::chpasswd(identifier, secret),
            "chpasswd",
            &mut transcript,
        )
        .await?;
        Ok(transcript.outcome("set_secret"))
    }

    /// Rename an account, moving its home directory along.
    pub async fn rename_account(
        &self,
        target: &RemoteTarget,
        identifier: &str,
        new_identifier: &str,
    ) -> Result<OperationOutcome, ProvisionError> {
        validate_identifier(identifier)?;
        validate_identifier(new_identifier)?;
        let mut transcript = Transcript::default();
        let line = commands::rename(identifier, new_identifier);
        self.exec_checked(target, &line, &line, &mut transcript)
            .await?;
        Ok(transcript.outcome("rename"))
    }

    /// Read operator-managed accounts from the account database.
    ///
    /// One command reads the database, then two more run per account for
    /// its expiry and lock state, strictly in sequence. Hosts carry tens of
    /// accounts, not thousands.
    pub async fn list_accounts(
        &self,
        target: &RemoteTarget,
    ) -> Result<Vec<AccountRecord>, ProvisionError> {
        let mut transcript = Transcript::default();
        self.list_accounts_recorded(target, &mut transcript).await
    }

    async fn list_accounts_recorded(
        &self,
        target: &RemoteTarget,
        transcript: &mut Transcript,
    ) -> Result<Vec<AccountRecord>, ProvisionError> {
        let read = commands::read_passwd();
        let passwd = self.exec_checked(target, &read, &read, transcript).await?;
        let entries = parse_passwd(&passwd.stdout, &self.filter);
        let today = self.today();

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            let chage = commands::chage_list(&entry.username);
            let expiry = self.exec(target, &chage, &chage).await?;
            let status = commands::password_status(&entry.username);
            let lock = self.exec(target, &status, &status).await?;
            if !expiry.success() || !lock.success() {
                debug!(account = %entry.username, "account details incomplete");
            }
            records.push(AccountRecord::assemble(entry, &expiry.stdout, &lock.stdout, today));
        }
        debug!(host = %target.host, accounts = records.len(), "account listing read");
        Ok(records)
    }

    /// Live SSH sessions, from sshd process titles.
    pub async fn list_connections(
        &self,
        target: &RemoteTarget,
    ) -> Result<Vec<ActiveConnection>, ProvisionError> {
        let mut transcript = Transcript::default();
        let ps = commands::process_titles();
        let output = self.exec_checked(target, &ps, &ps, &mut transcript).await?;
        Ok(parse_sshd_processes(&output.stdout))
    }

    /// Number of live sessions of one account.
    pub async fn connections_for(
        &self,
        target: &RemoteTarget,
        identifier: &str,
    ) -> Result<usize, ProvisionError> {
        let connections = self.list_connections(target).await?;
        Ok(count_by_user(&connections)
            .get(identifier)
            .copied()
            .unwrap_or(0))
    }

    /// Remove every account whose expiry date has passed.
    ///
    /// Every expired account is attempted. If any removal fails the verdict
    /// is [`Verdict::Failed`] naming the accounts left behind, and the
    /// payload lists both the removed and the failed ones.
    pub async fn purge_expired(
        &self,
        target: &RemoteTarget,
    ) -> Result<OperationOutcome, ProvisionError> {
        let mut transcript = Transcript::default();
        let accounts = self.list_accounts_recorded(target, &mut transcript).await?;

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for account in accounts.iter().filter(|a| a.is_expired()) {
            match self.delete_account(target, &account.username).await {
                Ok(outcome) => {
                    transcript.text.push_str(&outcome.raw_output);
                    removed.push(account.username.clone());
                }
                Err(ProvisionError::Exec { command, message }) => {
                    warn!(account = %account.username, %command, %message, "expired account not removed");
                    transcript.text.push_str(&format!("$ {command}\n{message}\n"));
                    failed.push(PurgeFailure {
                        account: account.username.clone(),
                        message,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        info!(host = %target.host, removed = removed.len(), failed = failed.len(), "expired accounts purged");
        let mut outcome = transcript.outcome("purge_expired");
        if !failed.is_empty() {
            let names: Vec<&str> = failed.iter().map(|f| f.account.as_str()).collect();
            outcome.verdict = Verdict::Failed {
                line: format!("expired accounts not removed: {}", names.join(", ")),
            };
        }
        Ok(outcome.with_payload(Payload::Purged { removed, failed }))
    }
}
