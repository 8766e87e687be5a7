//! Live session listings

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `user | address | protocol` rows of the menu's connection monitor.
static MONITOR_ROW: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([\w.-]+)\s*\|\s*(\d{1,3}(?:\.\d{1,3}){3})\s*\|\s*([^|\r\n]*)").ok()
});

/// One logged-in session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveConnection {
    /// Account name
    pub username: String,
    /// Client address, when the source shows it
    pub address: Option<String>,
    /// Protocol or service column
    pub protocol: Option<String>,
}

/// Parse the menu's connection monitor screen.
pub fn parse_monitor(text: &str) -> Vec<ActiveConnection> {
    let Some(row) = MONITOR_ROW.as_ref() else {
        return Vec::new();
    };
    row.captures_iter(text)
        .map(|caps| {
            let protocol = caps[3].trim();
            ActiveConnection {
                username: caps[1].to_string(),
                address: Some(caps[2].to_string()),
                protocol: (!protocol.is_empty()).then(|| protocol.to_string()),
            }
        })
        .collect()
}

/// Parse `ps -eo args=` output for per-user sshd processes.
///
/// Each logged-in user has one unprivileged `sshd: user@tty` (or
/// `sshd: user@notty`) process; privilege-separation monitors and the
/// listener are skipped.
pub fn parse_sshd_processes(ps_output: &str) -> Vec<ActiveConnection> {
    ps_output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("sshd: ")?;
            if rest.starts_with('/') || rest.contains('[') {
                return None;
            }
            let (user, _tty) = rest.split_whitespace().next()?.split_once('@')?;
            (!user.is_empty()).then(|| ActiveConnection {
                username: user.to_string(),
                address: None,
                protocol: Some("ssh".to_string()),
            })
        })
        .collect()
}

/// Sessions per account.
pub fn count_by_user(connections: &[ActiveConnection]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for connection in connections {
        *counts.entry(connection.username.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_rows() {
        let screen = "\
      MONITOR DE CONEXIONES
  USUARIO | IP | PROTOCOLO
  client01 | 198.51.100.7 | SSH
  26b18e2158ff1ac | 198.51.100.9 | DROPBEAR
  [0] VOLVER
";
        let connections = parse_monitor(screen);
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].username, "client01");
        assert_eq!(connections[0].address.as_deref(), Some("198.51.100.7"));
        assert_eq!(connections[1].protocol.as_deref(), Some("DROPBEAR"));
    }

    #[test]
    fn test_monitor_empty_screen() {
        assert!(parse_monitor("no hay usuarios conectados").is_empty());
    }

    #[test]
    fn test_sshd_processes() {
        let ps = "\
sshd: /usr/sbin/sshd -D [listener] 0 of 10-100 startups
sshd: client01 [priv]
sshd: client01@notty
sshd: client01@pts/1
sshd: root@pts/0
/usr/bin/python3 proxy.py
";
        let connections = parse_sshd_processes(ps);
        let counts = count_by_user(&connections);
        assert_eq!(counts.get("client01"), Some(&2));
        assert_eq!(counts.get("root"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
