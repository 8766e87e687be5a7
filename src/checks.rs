//! Connection and installation checks

use crate::result::{ConnectionErrorKind, ProvisionError};
use crate::transport::{shell_quote, Connector, RemoteTarget};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// File under the install directory holding the version string
const VERSION_FILE: &str = "vercion";

/// Result of [`test_connection`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    /// Command ran and echoed back
    pub ok: bool,
    /// Failure class, for transport failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConnectionErrorKind>,
    /// What the operator should check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
    /// Raw failure text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Round trip time in milliseconds
    pub elapsed_ms: u64,
}

/// Run a trivial command and triage any failure.
///
/// Never fails itself; problems are described in the report.
pub async fn test_connection(
    connector: &dyn Connector,
    target: &RemoteTarget,
    timeout: Duration,
) -> ConnectionReport {
    let started = Instant::now();
    let result = connector.run_once(target, "echo \"test\"", timeout).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let mut report = ConnectionReport {
        ok: false,
        kind: None,
        hint: None,
        detail: None,
        elapsed_ms,
    };
    match result {
        Ok(output) if output.success() && output.stdout.trim() == "test" => report.ok = true,
        Ok(output) => {
            report.detail = Some(format!(
                "unexpected reply (exit {}): {}",
                output.exit_code,
                output.diagnostic()
            ));
        }
        Err(ProvisionError::Connection(e)) => {
            report.kind = Some(e.kind);
            report.hint = Some(e.hint());
            report.detail = Some(e.message);
        }
        Err(e) => report.detail = Some(e.to_string()),
    }
    debug!(host = %target.host, ok = report.ok, kind = ?report.kind, "connection test");
    report
}

/// Result of [`detect_menu`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuInstallation {
    /// Install directory exists
    pub installed: bool,
    /// Content of the version file, when present
    pub version: Option<String>,
}

/// Check whether the menu program is installed under `install_dir`, and
/// which version.
pub async fn detect_menu(
    connector: &dyn Connector,
    target: &RemoteTarget,
    install_dir: &str,
    timeout: Duration,
) -> Result<MenuInstallation, ProvisionError> {
    let dir = shell_quote(install_dir);
    let check = format!("test -d {dir} && echo installed || echo not_installed");
    let output = connector.run_once(target, &check, timeout).await?;
    // "not_installed" contains "installed"; compare the whole reply
    if output.stdout.trim() != "installed" {
        return Ok(MenuInstallation {
            installed: false,
            version: None,
        });
    }

    let read = format!(
        "cat {} 2>/dev/null",
        shell_quote(&format!("{}/{VERSION_FILE}", install_dir.trim_end_matches('/')))
    );
    let output = connector.run_once(target, &read, timeout).await?;
    let version = output.stdout.trim();
    Ok(MenuInstallation {
        installed: true,
        version: (output.success() && !version.is_empty()).then(|| version.to_string()),
    })
}
