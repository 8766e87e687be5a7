//! One capability, two mechanisms
//!
//! [`AccountProvisioner`] is implemented by [`MenuDriven`] (the interactive
//! menu) and [`DirectCommand`] (one-shot commands). [`Strategy`] picks one,
//! or the menu with a direct fallback, and [`run_fleet`] fans a single
//! operation out over many hosts.

use crate::config::EngineConfig;
use crate::direct::DirectCommands;
use crate::menu::{FieldValues, MenuAction, MenuEngine};
use crate::parser::KindTag;
use crate::result::{Backend, OperationOutcome, Payload, ProvisionError, Verdict};
use crate::transport::{Connector, RemoteTarget};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// A password that stays out of logs and debug output.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a password
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// The password itself
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An account operation on one host.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Create an account valid for `days` days
    Create {
        /// Account name
        identifier: String,
        /// Password
        secret: Secret,
        /// Validity in days
        days: u32,
        /// Comment-field tag (direct path only; the menu manages its own)
        kind: KindTag,
    },
    /// Remove an account and its home directory
    Remove {
        /// Account name
        identifier: String,
    },
    /// Make an account valid for `days` more days
    Renew {
        /// Account name
        identifier: String,
        /// Validity in days from today
        days: u32,
    },
    /// Lock an account
    Block {
        /// Account name
        identifier: String,
    },
    /// Unlock an account
    Unblock {
        /// Account name
        identifier: String,
    },
    /// Replace an account's password
    SetSecret {
        /// Account name
        identifier: String,
        /// New password
        secret: Secret,
    },
    /// Rename an account
    Rename {
        /// Current name
        identifier: String,
        /// New name
        new_identifier: String,
    },
    /// Read all operator-managed accounts
    ListAccounts,
    /// Read live sessions
    ListConnections,
    /// Remove every expired account
    PurgeExpired,
}

impl Operation {
    /// Label used in outcomes and logs
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Remove { .. } => "remove",
            Operation::Renew { .. } => "renew",
            Operation::Block { .. } => "block",
            Operation::Unblock { .. } => "unblock",
            Operation::SetSecret { .. } => "set_secret",
            Operation::Rename { .. } => "rename",
            Operation::ListAccounts => "list_accounts",
            Operation::ListConnections => "list_connections",
            Operation::PurgeExpired => "purge_expired",
        }
    }

    /// Whether the operation only reads state
    pub fn is_read_only(&self) -> bool {
        matches!(self, Operation::ListAccounts | Operation::ListConnections)
    }

    /// The menu action and typed values, if the menu can do this.
    pub fn menu_request(&self) -> Option<(MenuAction, FieldValues)> {
        let request = match self {
            Operation::Create {
                identifier,
                secret,
                days,
                ..
            } => (
                MenuAction::Create,
                FieldValues::new()
                    .identifier(identifier.as_str())
                    .secret(secret.expose())
                    .days(*days),
            ),
            Operation::Remove { identifier } => (
                MenuAction::Remove,
                FieldValues::new().identifier(identifier.as_str()),
            ),
            Operation::Renew { identifier, days } => (
                MenuAction::Renew,
                FieldValues::new().identifier(identifier.as_str()).days(*days),
            ),
            Operation::Block { identifier } => (
                MenuAction::Block,
                FieldValues::new().identifier(identifier.as_str()),
            ),
            Operation::Unblock { identifier } => (
                MenuAction::Unblock,
                FieldValues::new().identifier(identifier.as_str()),
            ),
            Operation::ListConnections => (MenuAction::ListConnections, FieldValues::new()),
            Operation::PurgeExpired => (MenuAction::PurgeExpired, FieldValues::new()),
            Operation::SetSecret { .. } | Operation::Rename { .. } | Operation::ListAccounts => {
                return None
            }
        };
        Some(request)
    }
}

/// Performs account operations on a host.
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    /// Mechanism used
    fn backend(&self) -> Backend;

    /// Perform `operation` on `target`.
    async fn provision(
        &self,
        target: &RemoteTarget,
        operation: &Operation,
    ) -> Result<OperationOutcome, ProvisionError>;
}

/// Provisioning through the interactive menu.
pub struct MenuDriven {
    engine: MenuEngine,
}

impl MenuDriven {
    /// Wrap an engine
    pub fn new(engine: MenuEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl AccountProvisioner for MenuDriven {
    fn backend(&self) -> Backend {
        Backend::Menu
    }

    async fn provision(
        &self,
        target: &RemoteTarget,
        operation: &Operation,
    ) -> Result<OperationOutcome, ProvisionError> {
        let (action, values) =
            operation
                .menu_request()
                .ok_or_else(|| ProvisionError::Unsupported {
                    operation: operation.label().to_string(),
                    backend: Backend::Menu,
                })?;
        self.engine.run(target, action, &values).await
    }
}

/// Provisioning through one-shot commands.
pub struct DirectCommand {
    commands: DirectCommands,
}

impl DirectCommand {
    /// Wrap a command runner
    pub fn new(commands: DirectCommands) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl AccountProvisioner for DirectCommand {
    fn backend(&self) -> Backend {
        Backend::Direct
    }

    async fn provision(
        &self,
        target: &RemoteTarget,
        operation: &Operation,
    ) -> Result<OperationOutcome, ProvisionError> {
        let direct = &self.commands;
        match operation {
            Operation::Create {
                identifier,
                secret,
                days,
                kind,
            } => {
                direct
                    .create_account(target, identifier, secret.expose(), *days, kind)
                    .await
            }
            Operation::Remove { identifier } => direct.delete_account(target, identifier).await,
            Operation::Renew { identifier, days } => direct.renew(target, identifier, *days).await,
            Operation::Block { identifier } => direct.lock(target, identifier).await,
            Operation::Unblock { identifier } => direct.unlock(target, identifier).await,
            Operation::SetSecret { identifier, secret } => {
                direct.set_secret(target, identifier, secret.expose()).await
            }
            Operation::Rename {
                identifier,
                new_identifier,
            } => direct.rename_account(target, identifier, new_identifier).await,
            Operation::ListAccounts => {
                let accounts = direct.list_accounts(target).await?;
                Ok(listing_outcome(operation).with_payload(Payload::Accounts(accounts)))
            }
            Operation::ListConnections => {
                let connections = direct.list_connections(target).await?;
                Ok(listing_outcome(operation).with_payload(Payload::Connections(connections)))
            }
            Operation::PurgeExpired => direct.purge_expired(target).await,
        }
    }
}

fn listing_outcome(operation: &Operation) -> OperationOutcome {
    OperationOutcome::new(operation.label(), Backend::Direct, Verdict::Success, "")
}

/// Try `primary`; hand over to `secondary` when it cannot do the job.
///
/// Handover happens when the menu cannot be reached, does not support the
/// operation, or reports an error. An outcome without confirmation is
/// returned as is for changes: the first attempt may well have worked, and
/// repeating it another way could do it twice. Reads have no such risk and
/// fall back.
pub struct Fallback {
    primary: Box<dyn AccountProvisioner>,
    secondary: Box<dyn AccountProvisioner>,
}

impl Fallback {
    /// Chain two provisioners
    pub fn new(primary: Box<dyn AccountProvisioner>, secondary: Box<dyn AccountProvisioner>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl AccountProvisioner for Fallback {
    fn backend(&self) -> Backend {
        self.primary.backend()
    }

    async fn provision(
        &self,
        target: &RemoteTarget,
        operation: &Operation,
    ) -> Result<OperationOutcome, ProvisionError> {
        let reason = match self.primary.provision(target, operation).await {
            Ok(outcome) => match &outcome.verdict {
                Verdict::Failed { line } => format!("{} reported: {line}", outcome.backend),
                Verdict::NoConfirmation if operation.is_read_only() => {
                    format!("{} printed nothing to read", outcome.backend)
                }
                _ => return Ok(outcome),
            },
            Err(e @ (ProvisionError::MenuUnreachable { .. } | ProvisionError::Unsupported { .. })) => {
                e.to_string()
            }
            Err(e) => return Err(e),
        };

        warn!(host = %target.host, operation = operation.label(), %reason, "falling back");
        let mut outcome = self.secondary.provision(target, operation).await?;
        outcome.fallback_reason = Some(reason);
        Ok(outcome)
    }
}

/// Which mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Strategy {
    /// Menu, falling back to direct commands
    #[default]
    #[cfg_attr(feature = "cli", value(name = "auto"))]
    MenuFirst,
    /// Menu only
    #[cfg_attr(feature = "cli", value(name = "menu"))]
    MenuOnly,
    /// Direct commands only
    #[cfg_attr(feature = "cli", value(name = "direct"))]
    DirectOnly,
}

impl Strategy {
    /// Build the provisioner for this strategy.
    pub fn build(
        self,
        connector: Arc<dyn Connector>,
        config: &EngineConfig,
    ) -> Result<Box<dyn AccountProvisioner>, ProvisionError> {
        let menu = || -> Result<Box<dyn AccountProvisioner>, ProvisionError> {
            Ok(Box::new(MenuDriven::new(MenuEngine::new(
                connector.clone(),
                config.clone(),
            )?)))
        };
        let direct = || -> Result<Box<dyn AccountProvisioner>, ProvisionError> {
            Ok(Box::new(DirectCommand::new(DirectCommands::new(
                connector.clone(),
                config,
            )?)))
        };

        Ok(match self {
            Strategy::MenuOnly => menu()?,
            Strategy::DirectOnly => direct()?,
            Strategy::MenuFirst => Box::new(Fallback::new(menu()?, direct()?)),
        })
    }
}

/// Result for one host of a fleet run.
#[derive(Debug)]
pub struct TargetResult {
    /// `host:port`
    pub target: String,
    /// What happened there
    pub result: Result<OperationOutcome, ProvisionError>,
}

impl TargetResult {
    /// Ran and confirmed success
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().is_ok_and(OperationOutcome::is_success)
    }

    /// Serializable form
    pub fn report(&self) -> TargetReport<'_> {
        match &self.result {
            Ok(outcome) => TargetReport {
                target: &self.target,
                succeeded: outcome.is_success(),
                outcome: Some(outcome),
                error: None,
                error_kind: None,
            },
            Err(e) => TargetReport {
                target: &self.target,
                succeeded: false,
                outcome: None,
                error: Some(e.to_string()),
                error_kind: Some(e.category()),
            },
        }
    }
}

/// Serializable view of a [`TargetResult`].
#[derive(Debug, Serialize)]
pub struct TargetReport<'a> {
    /// `host:port`
    pub target: &'a str,
    /// Ran and confirmed success
    pub succeeded: bool,
    /// Outcome, when the operation ran to the end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'a OperationOutcome>,
    /// Error message, when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

/// Per-host results of a fleet run, in target order.
#[derive(Debug)]
pub struct FleetOutcome {
    /// One entry per target
    pub results: Vec<TargetResult>,
}

impl FleetOutcome {
    /// The run as a whole succeeds when any host succeeded
    pub fn any_succeeded(&self) -> bool {
        self.results.iter().any(TargetResult::succeeded)
    }

    /// Hosts that did not succeed
    pub fn failures(&self) -> impl Iterator<Item = &TargetResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    /// Serializable form of every result
    pub fn reports(&self) -> Vec<TargetReport<'_>> {
        self.results.iter().map(TargetResult::report).collect()
    }
}

/// Run `operation` on every target, at most `max_concurrency` at a time.
///
/// Hosts are independent: one host failing does not stop the others.
pub async fn run_fleet(
    provisioner: &dyn AccountProvisioner,
    targets: &[RemoteTarget],
    operation: &Operation,
    max_concurrency: usize,
) -> FleetOutcome {
    let results: Vec<TargetResult> = stream::iter(targets)
        .map(|target| async move {
            TargetResult {
                target: target.label(),
                result: provisioner.provision(target, operation).await,
            }
        })
        .buffered(max_concurrency.max(1))
        .collect()
        .await;

    let fleet = FleetOutcome { results };
    info!(
        operation = operation.label(),
        targets = targets.len(),
        failed = fleet.failures().count(),
        "fleet run finished"
    );
    fleet
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Canned {
        backend: Backend,
        reply: fn(&Operation) -> Result<OperationOutcome, ProvisionError>,
        calls: Mutex<usize>,
    }

    impl Canned {
        fn boxed(
            backend: Backend,
            reply: fn(&Operation) -> Result<OperationOutcome, ProvisionError>,
        ) -> Box<dyn AccountProvisioner> {
            Box::new(Self {
                backend,
                reply,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl AccountProvisioner for Canned {
        fn backend(&self) -> Backend {
            self.backend
        }

        async fn provision(
            &self,
            _target: &RemoteTarget,
            operation: &Operation,
        ) -> Result<OperationOutcome, ProvisionError> {
            *self.calls.lock().unwrap() += 1;
            (self.reply)(operation)
        }
    }

    fn target() -> RemoteTarget {
        RemoteTarget::new("203.0.113.5", "root", crate::transport::Credential::Agent)
    }

    fn remove() -> Operation {
        Operation::Remove {
            identifier: "client01".into(),
        }
    }

    fn direct_ok(op: &Operation) -> Result<OperationOutcome, ProvisionError> {
        Ok(OperationOutcome::new(op.label(), Backend::Direct, Verdict::Success, ""))
    }

    #[tokio::test]
    async fn test_fallback_on_unreachable_menu() {
        let chain = Fallback::new(
            Canned::boxed(Backend::Menu, |_| {
                Err(ProvisionError::MenuUnreachable {
                    attempted: vec!["menu".into(), "adm".into()],
                })
            }),
            Canned::boxed(Backend::Direct, direct_ok),
        );
        let outcome = chain.provision(&target(), &remove()).await.unwrap();
        assert_eq!(outcome.backend, Backend::Direct);
        assert!(outcome.fallback_reason.unwrap().contains("menu, adm"));
    }

    #[tokio::test]
    async fn test_fallback_on_reported_failure() {
        let chain = Fallback::new(
            Canned::boxed(Backend::Menu, |op| {
                Ok(OperationOutcome::new(
                    op.label(),
                    Backend::Menu,
                    Verdict::Failed {
                        line: "ERROR interno".into(),
                    },
                    "",
                ))
            }),
            Canned::boxed(Backend::Direct, direct_ok),
        );
        let outcome = chain.provision(&target(), &remove()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.fallback_reason.as_deref(), Some("menu reported: ERROR interno"));
    }

    #[tokio::test]
    async fn test_no_fallback_without_confirmation() {
        let chain = Fallback::new(
            Canned::boxed(Backend::Menu, |op| {
                Ok(OperationOutcome::new(op.label(), Backend::Menu, Verdict::NoConfirmation, ""))
            }),
            Canned::boxed(Backend::Direct, |_| panic!("must not fall back")),
        );
        let outcome = chain.provision(&target(), &remove()).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::NoConfirmation);
        assert_eq!(outcome.backend, Backend::Menu);
    }

    #[tokio::test]
    async fn test_unconfirmed_listing_falls_back() {
        let chain = Fallback::new(
            Canned::boxed(Backend::Menu, |op| {
                Ok(OperationOutcome::new(op.label(), Backend::Menu, Verdict::NoConfirmation, ""))
            }),
            Canned::boxed(Backend::Direct, direct_ok),
        );
        let outcome = chain
            .provision(&target(), &Operation::ListConnections)
            .await
            .unwrap();
        assert_eq!(outcome.backend, Backend::Direct);
        assert_eq!(outcome.fallback_reason.as_deref(), Some("menu printed nothing to read"));
    }

    #[tokio::test]
    async fn test_connection_errors_do_not_fall_back() {
        let chain = Fallback::new(
            Canned::boxed(Backend::Menu, |_| {
                Err(crate::result::ConnectionError::new(
                    crate::result::ConnectionErrorKind::Refused,
                    "203.0.113.5",
                    22,
                    "refused",
                )
                .into())
            }),
            Canned::boxed(Backend::Direct, |_| panic!("must not fall back")),
        );
        let err = chain.provision(&target(), &remove()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Connection(_)));
    }

    #[test]
    fn test_menu_request_mapping() {
        let create = Operation::Create {
            identifier: "client01".into(),
            secret: Secret::new("Xk9#pL2q"),
            days: 30,
            kind: KindTag::ordinary(1, ""),
        };
        let (action, values) = create.menu_request().unwrap();
        assert_eq!(action, MenuAction::Create);
        assert_eq!(
            values.text(crate::menu::Field::Days).unwrap().as_str(),
            "30"
        );
        assert!(Operation::ListAccounts.menu_request().is_none());
        assert!(Operation::SetSecret {
            identifier: "a".into(),
            secret: "b".into()
        }
        .menu_request()
        .is_none());
    }

    #[test]
    fn test_secret_debug_redacted() {
        let op = Operation::SetSecret {
            identifier: "client01".into(),
            secret: Secret::new("Xk9#pL2q"),
        };
        assert!(!format!("{op:?}").contains("Xk9"));
    }

    #[tokio::test]
    async fn test_fleet_keeps_order_and_partial_failure() {
        struct ByHost;

        #[async_trait]
        impl AccountProvisioner for ByHost {
            fn backend(&self) -> Backend {
                Backend::Direct
            }

            async fn provision(
                &self,
                target: &RemoteTarget,
                operation: &Operation,
            ) -> Result<OperationOutcome, ProvisionError> {
                if target.host.ends_with(".2") {
                    Err(ProvisionError::Exec {
                        command: "userdel -r client01".into(),
                        message: "userdel: cannot remove".into(),
                    })
                } else {
                    direct_ok(operation)
                }
            }
        }

        let targets: Vec<_> = (1..=3)
            .map(|i| RemoteTarget::new(format!("10.0.0.{i}"), "root", crate::transport::Credential::Agent))
            .collect();
        let fleet = run_fleet(&ByHost, &targets, &remove(), 2).await;

        let order: Vec<_> = fleet.results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, vec!["10.0.0.1:22", "10.0.0.2:22", "10.0.0.3:22"]);
        assert!(fleet.any_succeeded());
        assert_eq!(fleet.failures().count(), 1);
        let reports = fleet.reports();
        assert_eq!(reports[1].error_kind, Some("exec"));
    }
}
