//! Host metrics
//!
//! Prefers a local node_exporter when one answers on the host, otherwise
//! falls back to parsing `top`, `free`, `df` and `uptime`. Any single metric
//! that cannot be read is reported as zero (or `unknown` for uptime).

use crate::result::ProvisionError;
use crate::transport::{Connector, RemoteTarget};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

/// node_exporter scrape endpoint, as seen from the host itself
const NODE_EXPORTER_URL: &str = "http://127.0.0.1:9100/metrics";

/// How long the node_exporter availability check may take
const NODE_EXPORTER_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Ports checked for a listener, with the service usually behind them.
pub const WATCHED_PORTS: &[(u16, &str)] = &[
    (22, "SSH"),
    (80, "HTTP"),
    (443, "HTTPS"),
    (8080, "HTTP-Alt"),
    (3128, "Squid Proxy"),
    (1194, "OpenVPN"),
    (7300, "V2Ray"),
    (8888, "WebSocket"),
    (9000, "SocksPy"),
];

static TOP_IDLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*%?\s*id\b").ok());

/// Where the numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// node_exporter text exposition
    NodeExporter,
    /// Standard shell tools
    Commands,
}

/// Listening state of one watched port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    /// Port number
    pub port: u16,
    /// Always `tcp`
    pub protocol: &'static str,
    /// Something listens on it
    pub listening: bool,
    /// Usual service name
    pub service: &'static str,
}

/// One metrics sample.
#[derive(Debug, Clone, Serialize)]
pub struct HostMetrics {
    /// CPU busy percentage
    pub cpu_percent: f64,
    /// Memory in use, percent
    pub ram_percent: f64,
    /// Root filesystem in use, percent
    pub disk_percent: f64,
    /// Human-readable uptime
    pub uptime: String,
    /// Watched ports
    pub ports: Vec<PortStatus>,
    /// Where the numbers came from
    pub source: MetricSource,
    /// When the sample was taken
    pub collected_at: DateTime<Utc>,
}

/// Operating system identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    /// `PRETTY_NAME` from os-release
    pub os: String,
    /// Kernel release
    pub kernel: String,
    /// Host name
    pub hostname: String,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent(used: f64, total: f64) -> Option<f64> {
    (total > 0.0).then(|| used / total * 100.0)
}

/// Samples of `name` in an exposition, optionally restricted to lines whose
/// label set contains `label`.
fn samples<'a>(
    exposition: &'a str,
    name: &'a str,
    label: Option<&'a str>,
) -> impl Iterator<Item = f64> + 'a {
    exposition.lines().filter_map(move |line| {
        if line.starts_with('#') {
            return None;
        }
        let (series, value) = line.rsplit_once(' ')?;
        let labels = match series.strip_prefix(name)? {
            "" => "",
            rest if rest.starts_with('{') => rest,
            _ => return None,
        };
        if label.is_some_and(|l| !labels.contains(l)) {
            return None;
        }
        value.trim().parse::<f64>().ok()
    })
}

/// CPU busy percentage since boot, over all CPUs.
pub fn node_cpu_percent(exposition: &str) -> Option<f64> {
    let total: f64 = samples(exposition, "node_cpu_seconds_total", None).sum();
    let idle: f64 = samples(exposition, "node_cpu_seconds_total", Some(r#"mode="idle""#)).sum();
    percent(total - idle, total).map(round1)
}

/// Memory in use, from MemTotal and MemAvailable.
pub fn node_ram_percent(exposition: &str) -> Option<f64> {
    let total = samples(exposition, "node_memory_MemTotal_bytes", None).next()?;
    let available = samples(exposition, "node_memory_MemAvailable_bytes", None).next()?;
    percent(total - available, total).map(round1)
}

/// Root filesystem in use, whole percent.
pub fn node_disk_percent(exposition: &str) -> Option<f64> {
    let root = Some(r#"mountpoint="/""#);
    let available = samples(exposition, "node_filesystem_avail_bytes", root).next()?;
    let size = samples(exposition, "node_filesystem_size_bytes", root).next()?;
    percent(size - available, size).map(f64::round)
}

/// Boot time in seconds since the epoch.
pub fn node_boot_time(exposition: &str) -> Option<f64> {
    samples(exposition, "node_boot_time_seconds", None).next()
}

/// `3 days, 4 hours, 5 minutes`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    format!("{days} days, {hours} hours, {minutes} minutes")
}

/// CPU busy percentage from the `Cpu(s)` line of `top -bn1`.
pub fn top_cpu_percent(top_output: &str) -> Option<f64> {
    let line = top_output.lines().find(|l| l.contains("Cpu(s)"))?;
    let idle: f64 = TOP_IDLE.as_ref()?.captures(line)?[1].parse().ok()?;
    Some(round1(100.0 - idle))
}

/// Memory in use from the `Mem:` line of `free`.
pub fn free_ram_percent(free_output: &str) -> Option<f64> {
    let line = free_output.lines().find(|l| l.starts_with("Mem:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let total: f64 = fields.next()?.parse().ok()?;
    let used: f64 = fields.next()?.parse().ok()?;
    percent(used, total).map(round1)
}

/// Use percentage of the last filesystem line of `df -P`.
pub fn df_disk_percent(df_output: &str) -> Option<f64> {
    let line = df_output.lines().rev().find(|l| !l.trim().is_empty())?;
    line.split_whitespace()
        .nth(4)?
        .trim_end_matches('%')
        .parse()
        .ok()
}

/// `uptime -p` output without the leading `up`.
pub fn pretty_uptime(uptime_output: &str) -> Option<String> {
    let text = uptime_output.trim();
    let text = text.strip_prefix("up ").unwrap_or(text).trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Listening state of [`WATCHED_PORTS`] from `ss -tuln` or `netstat -tuln`.
pub fn listening_ports(socket_table: &str) -> Vec<PortStatus> {
    let listeners: Vec<&str> = socket_table
        .lines()
        .filter(|l| l.contains("LISTEN"))
        .collect();
    WATCHED_PORTS
        .iter()
        .map(|&(port, service)| {
            let suffix = format!(":{port}");
            PortStatus {
                port,
                protocol: "tcp",
                listening: listeners
                    .iter()
                    .any(|l| l.split_whitespace().any(|field| field.ends_with(&suffix))),
                service,
            }
        })
        .collect()
}

/// Collects [`HostMetrics`] through one-shot commands.
pub struct HostMonitor {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl HostMonitor {
    /// Monitor with a per-command timeout
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    /// Stdout of `command`, `None` if it exited nonzero.
    async fn stdout(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ProvisionError> {
        let output = self.connector.run_once(target, command, timeout).await?;
        if output.success() {
            Ok(Some(output.stdout))
        } else {
            debug!(command, exit_code = output.exit_code, "metric command failed");
            Ok(None)
        }
    }

    /// Like `stdout`, but any failure just means no data.
    async fn best_effort(&self, target: &RemoteTarget, command: &str) -> Option<String> {
        match self.stdout(target, command, self.timeout).await {
            Ok(stdout) => stdout,
            Err(e) => {
                debug!(command, error = %e, "metric unavailable");
                None
            }
        }
    }

    /// Take one sample.
    ///
    /// # Errors
    ///
    /// Only the first command's transport failure is returned; after that
    /// missing metrics degrade to zero.
    pub async fn collect(&self, target: &RemoteTarget) -> Result<HostMetrics, ProvisionError> {
        let check = format!("curl -s {NODE_EXPORTER_URL} | head -1");
        let exporter = self
            .stdout(target, &check, NODE_EXPORTER_CHECK_TIMEOUT)
            .await?
            .is_some_and(|line| line.contains("node_"));

        let (cpu, ram, disk, uptime, source) = if exporter {
            let exposition = self
                .best_effort(target, &format!("curl -s {NODE_EXPORTER_URL}"))
                .await
                .unwrap_or_default();
            let uptime = node_boot_time(&exposition).map(|boot| {
                let now = Utc::now().timestamp() as f64;
                format_uptime((now - boot).max(0.0) as u64)
            });
            (
                node_cpu_percent(&exposition),
                node_ram_percent(&exposition),
                node_disk_percent(&exposition),
                uptime,
                MetricSource::NodeExporter,
            )
        } else {
            let (top, free, df, up) = tokio::join!(
                self.best_effort(target, "top -bn1 | head -5"),
                self.best_effort(target, "free"),
                self.best_effort(target, "df -P /"),
                self.best_effort(target, "uptime -p"),
            );
            (
                top.as_deref().and_then(top_cpu_percent),
                free.as_deref().and_then(free_ram_percent),
                df.as_deref().and_then(df_disk_percent),
                up.as_deref().and_then(pretty_uptime),
                MetricSource::Commands,
            )
        };

        let sockets = self
            .best_effort(target, "ss -tuln 2>/dev/null || netstat -tuln")
            .await
            .unwrap_or_default();

        let metrics = HostMetrics {
            cpu_percent: cpu.unwrap_or(0.0),
            ram_percent: ram.unwrap_or(0.0),
            disk_percent: disk.unwrap_or(0.0),
            uptime: uptime.unwrap_or_else(|| "unknown".to_string()),
            ports: listening_ports(&sockets),
            source,
            collected_at: Utc::now(),
        };
        info!(host = %target.host, source = ?metrics.source, cpu = metrics.cpu_percent, "metrics collected");
        Ok(metrics)
    }

    /// Operating system, kernel and host name; `Unknown` where unreadable.
    pub async fn system_info(&self, target: &RemoteTarget) -> SystemInfo {
        let (os, kernel, hostname) = tokio::join!(
            self.best_effort(target, "grep '^PRETTY_NAME=' /etc/os-release"),
            self.best_effort(target, "uname -r"),
            self.best_effort(target, "hostname"),
        );
        let known = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "Unknown".to_string())
        };
        SystemInfo {
            os: known(os.map(|line| {
                line.trim()
                    .trim_start_matches("PRETTY_NAME=")
                    .trim_matches('"')
                    .to_string()
            })),
            kernel: known(kernel),
            hostname: known(hostname),
        }
    }
}
