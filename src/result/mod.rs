//! Outcome types for provisioning operations

mod error;

pub use error::{ConnectionError, ConnectionErrorKind, PatternError, ProvisionError};

use crate::parser::{AccountRecord, ActiveConnection, CreatedAccount};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// What the captured output says about an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    /// A success marker appeared and no error marker did.
    Success,
    /// An error marker appeared; `line` is the diagnostic line.
    Failed {
        /// Line that carried the error
        line: String,
    },
    /// Neither marker appeared. The operator has to check by hand.
    NoConfirmation,
}

/// Which mechanism produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Interactive menu program over a terminal session
    Menu,
    /// One-shot account-management commands
    Direct,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Menu => "menu",
            Backend::Direct => "direct",
        })
    }
}

/// Structured data extracted from an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Banner fields printed after account creation
    Created(CreatedAccount),
    /// Accounts read from the host's account database
    Accounts(Vec<AccountRecord>),
    /// Live sessions
    Connections(Vec<ActiveConnection>),
    /// Result of an expiry purge
    Purged {
        /// Accounts removed
        removed: Vec<String>,
        /// Expired accounts that are still there
        failed: Vec<PurgeFailure>,
    },
}

/// An expired account a purge could not remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeFailure {
    /// Account name
    pub account: String,
    /// What the removal command reported
    pub message: String,
}

/// Output of one step of an automation run.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Text appended since the step began
    pub text: String,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Whether the step's pattern matched (always false for fixed delays)
    pub matched: bool,
}

/// The result handed back to the caller for one operation on one host.
///
/// # Examples
///
/// ```
/// use shellpilot::{Backend, OperationOutcome, Verdict};
///
/// let outcome = OperationOutcome::new("remove", Backend::Direct, Verdict::Success, "");
/// assert!(outcome.is_success());
/// assert!(outcome.error_detail().is_none());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    /// Operation label (`create`, `remove`, ...)
    pub operation: String,
    /// Mechanism that produced this outcome
    pub backend: Backend,
    /// Classification of the output
    pub verdict: Verdict,
    /// Everything captured while the operation ran
    pub raw_output: String,
    /// Parsed data, when there is any
    pub payload: Option<Payload>,
    /// Why the menu was abandoned, when the direct path took over
    pub fallback_reason: Option<String>,
}

impl OperationOutcome {
    /// Outcome without payload
    pub fn new(
        operation: impl Into<String>,
        backend: Backend,
        verdict: Verdict,
        raw_output: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            backend,
            verdict,
            raw_output: raw_output.into(),
            payload: None,
            fallback_reason: None,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Whether the verdict is [`Verdict::Success`]
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }

    /// Diagnostic text for anything other than success
    pub fn error_detail(&self) -> Option<String> {
        match &self.verdict {
            Verdict::Success => None,
            Verdict::Failed { line } => Some(line.clone()),
            Verdict::NoConfirmation => {
                Some("no success or error message in output, verify manually".to_string())
            }
        }
    }

    /// Turn a non-success verdict into an error for `?` callers
    pub fn into_result(self) -> Result<Self, ProvisionError> {
        match &self.verdict {
            Verdict::Success => Ok(self),
            Verdict::Failed { line } => Err(ProvisionError::OperationFailed {
                detail: line.clone(),
            }),
            Verdict::NoConfirmation => Err(ProvisionError::NoConfirmation {
                operation: self.operation.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result_keeps_categories_apart() {
        let failed = OperationOutcome::new(
            "create",
            Backend::Menu,
            Verdict::Failed {
                line: "ERROR: el usuario ya existe".into(),
            },
            "",
        );
        assert!(matches!(
            failed.into_result(),
            Err(ProvisionError::OperationFailed { detail }) if detail.contains("ya existe")
        ));

        let unknown = OperationOutcome::new("create", Backend::Menu, Verdict::NoConfirmation, "");
        assert!(matches!(
            unknown.into_result(),
            Err(ProvisionError::NoConfirmation { .. })
        ));
    }

    #[test]
    fn test_verdict_serializes_with_status_tag() {
        let json = serde_json::to_value(Verdict::Failed { line: "x".into() }).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["line"], "x");
    }
}
