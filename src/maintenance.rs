//! Host housekeeping
//!
//! Log cleanup, cache drops, disk and log usage, and reboots, each as one
//! one-shot command. Cleanup steps tolerate missing files and tools, so a
//! nonzero exit from them is logged rather than reported as failure.

use crate::result::{Backend, OperationOutcome, ProvisionError, Verdict};
use crate::transport::{Connector, RemoteTarget};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound for the cleanup commands
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for handing off the reboot
const RESTART_TIMEOUT: Duration = Duration::from_secs(5);

/// Log cleanup steps; each one tolerates what it cannot find.
const LOG_CLEANUP: &[&str] = &[
    "truncate -s 0 /var/log/auth.log 2>/dev/null || true",
    "truncate -s 0 /var/log/syslog 2>/dev/null || true",
    "truncate -s 0 /var/log/kern.log 2>/dev/null || true",
    "truncate -s 0 /var/log/messages 2>/dev/null || true",
    "rm -f /var/log/*.gz /var/log/*.1 /var/log/*.old 2>/dev/null || true",
    "find /var/log/v2ray/ /var/log/xray/ /var/log/squid/ -type f -delete 2>/dev/null || true",
    r#"find /var/log/nginx/ /var/log/apache2/ -type f -name "*.log" -exec truncate -s 0 {} \; 2>/dev/null || true"#,
    "journalctl --vacuum-time=1d 2>/dev/null || true",
    "cat /dev/null > ~/.bash_history 2>/dev/null || true",
];

/// Dropping the page cache must work; package caches are optional.
const CACHE_CLEANUP: &str = "sync && echo 3 > /proc/sys/vm/drop_caches \
    && { apt-get clean 2>/dev/null; apt-get autoclean 2>/dev/null; yum clean all 2>/dev/null; true; }";

/// Reboot two seconds after the command returns, detached from the session.
const RESTART: &str = r#"nohup bash -c "sleep 2 && reboot" > /dev/null 2>&1 &"#;

const LOG_SIZE: &str = "du -sm /var/log 2>/dev/null";

const DISK_SPACE: &str = "df -hP /";

/// Usage of the root filesystem, sizes as `df -h` prints them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSpace {
    /// Filesystem size
    pub total: String,
    /// Space in use
    pub used: String,
    /// Space left
    pub available: String,
    /// Use, whole percent
    pub percent: u8,
}

impl Default for DiskSpace {
    fn default() -> Self {
        Self {
            total: "0G".into(),
            used: "0G".into(),
            available: "0G".into(),
            percent: 0,
        }
    }
}

/// Root filesystem usage from the last line of `df -hP /`.
pub fn parse_disk_space(df_output: &str) -> Option<DiskSpace> {
    let line = df_output.lines().rev().find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [_, total, used, available, percent, ..] = fields.as_slice() else {
        return None;
    };
    Some(DiskSpace {
        total: total.to_string(),
        used: used.to_string(),
        available: available.to_string(),
        percent: percent.trim_end_matches('%').parse().ok()?,
    })
}

/// Size of `/var/log` in megabytes from `du -sm`.
pub fn parse_log_size(du_output: &str) -> Option<u64> {
    du_output.split_whitespace().next()?.parse().ok()
}

/// Runs housekeeping commands on hosts.
pub struct HostMaintenance {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl HostMaintenance {
    /// Maintenance with a timeout for the read-only queries
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    fn outcome(operation: &str, verdict: Verdict, command: &str, output: &str) -> OperationOutcome {
        OperationOutcome::new(
            operation,
            Backend::Direct,
            verdict,
            format!("$ {command}\n{output}"),
        )
    }

    /// Empty the system logs, drop rotated archives and vacuum the journal.
    ///
    /// # Errors
    ///
    /// Only transport failures; individual cleanup steps may fail quietly.
    pub async fn clean_logs(&self, target: &RemoteTarget) -> Result<OperationOutcome, ProvisionError> {
        info!(host = %target.host, "cleaning logs");
        let command = LOG_CLEANUP.join("; ");
        let output = self.connector.run_once(target, &command, CLEANUP_TIMEOUT).await?;
        if !output.success() {
            warn!(host = %target.host, exit_code = output.exit_code, stderr = %output.stderr.trim(), "some log cleanup steps failed");
        }
        Ok(Self::outcome("clean_logs", Verdict::Success, &command, &output.diagnostic()))
    }

    /// Drop the kernel page cache and package manager caches.
    ///
    /// # Errors
    ///
    /// Transport failures. A host that refuses the cache drop gives a
    /// [`Verdict::Failed`] outcome.
    pub async fn clear_cache(&self, target: &RemoteTarget) -> Result<OperationOutcome, ProvisionError> {
        info!(host = %target.host, "clearing caches");
        let output = self
            .connector
            .run_once(target, CACHE_CLEANUP, CLEANUP_TIMEOUT)
            .await?;
        let diagnostic = output.diagnostic();
        let verdict = if output.success() {
            Verdict::Success
        } else {
            Verdict::Failed {
                line: if diagnostic.is_empty() {
                    format!("cache drop exited with {}", output.exit_code)
                } else {
                    diagnostic.clone()
                },
            }
        };
        Ok(Self::outcome("clear_cache", verdict, CACHE_CLEANUP, &diagnostic))
    }

    /// Schedule a reboot.
    ///
    /// The reboot is detached and starts two seconds after the command
    /// returns, so the connection closes normally first.
    ///
    /// # Errors
    ///
    /// Transport failures.
    pub async fn restart(&self, target: &RemoteTarget) -> Result<OperationOutcome, ProvisionError> {
        info!(host = %target.host, "restarting host");
        let output = self.connector.run_once(target, RESTART, RESTART_TIMEOUT).await?;
        let diagnostic = output.diagnostic();
        let verdict = if output.success() {
            Verdict::Success
        } else {
            Verdict::Failed {
                line: diagnostic.clone(),
            }
        };
        Ok(Self::outcome("restart", verdict, RESTART, &diagnostic))
    }

    /// Size of `/var/log` in megabytes; zero when it cannot be read.
    pub async fn log_size_mb(&self, target: &RemoteTarget) -> u64 {
        match self.connector.run_once(target, LOG_SIZE, self.timeout).await {
            Ok(output) if output.success() => parse_log_size(&output.stdout).unwrap_or(0),
            Ok(output) => {
                debug!(exit_code = output.exit_code, "log size unavailable");
                0
            }
            Err(e) => {
                debug!(error = %e, "log size unavailable");
                0
            }
        }
    }

    /// Root filesystem usage; zeros when it cannot be read.
    pub async fn disk_space(&self, target: &RemoteTarget) -> DiskSpace {
        match self.connector.run_once(target, DISK_SPACE, self.timeout).await {
            Ok(output) if output.success() => parse_disk_space(&output.stdout).unwrap_or_default(),
            Ok(output) => {
                debug!(exit_code = output.exit_code, "disk space unavailable");
                DiskSpace::default()
            }
            Err(e) => {
                debug!(error = %e, "disk space unavailable");
                DiskSpace::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_disk_space() {
        let df = "Filesystem      Size  Used Avail Use% Mounted on\n/dev/vda1        40G   12G   26G  32% /\n";
        assert_eq!(
            parse_disk_space(df),
            Some(DiskSpace {
                total: "40G".into(),
                used: "12G".into(),
                available: "26G".into(),
                percent: 32,
            })
        );
        assert_eq!(parse_disk_space("Filesystem Size\n"), None);
        assert_eq!(parse_disk_space(""), None);
    }

    #[test]
    fn test_parse_log_size() {
        assert_eq!(parse_log_size("142\t/var/log\n"), Some(142));
        assert_eq!(parse_log_size("du: cannot read"), None);
    }

    #[test]
    fn test_cleanup_steps_tolerate_failure() {
        assert!(LOG_CLEANUP.iter().all(|step| step.ends_with("|| true")));
    }
}
