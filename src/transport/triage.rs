//! Classify connection failures from error text
//!
//! Both libssh2 and the `ssh` client report failures as free text, so the
//! classification is keyword based. Order matters: a refused connection is
//! checked before the generic timeout and key words.

use crate::result::ConnectionErrorKind;
use std::io;

/// Classify a failure message.
pub fn triage(message: &str) -> ConnectionErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["econnrefused", "connection refused"]) {
        ConnectionErrorKind::Refused
    } else if has(&["etimedout", "timed out", "timeout"]) {
        ConnectionErrorKind::Timeout
    } else if has(&[
        "enotfound",
        "ehostunreach",
        "could not resolve",
        "name or service not known",
        "failed to lookup",
        "no such host",
        "no route to host",
        "network is unreachable",
        "host unreachable",
    ]) {
        ConnectionErrorKind::HostUnreachable
    } else if has(&["authentication", "permission denied", "auth fail"]) {
        ConnectionErrorKind::Authentication
    } else if has(&["key"]) {
        ConnectionErrorKind::KeyMaterial
    } else {
        ConnectionErrorKind::Protocol
    }
}

/// Classify a socket error, falling back to its message.
pub fn triage_io(err: &io::Error) -> ConnectionErrorKind {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionErrorKind::Timeout,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ConnectionErrorKind::HostUnreachable
        }
        _ => triage(&err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openssh_messages() {
        assert_eq!(
            triage("ssh: connect to host 203.0.113.5 port 22: Connection refused"),
            ConnectionErrorKind::Refused
        );
        assert_eq!(
            triage("ssh: Could not resolve hostname vps-9: Name or service not known"),
            ConnectionErrorKind::HostUnreachable
        );
        assert_eq!(
            triage("root@203.0.113.5: Permission denied (publickey,password)."),
            ConnectionErrorKind::Authentication
        );
        assert_eq!(
            triage("ssh: connect to host 203.0.113.5 port 22: Connection timed out"),
            ConnectionErrorKind::Timeout
        );
    }

    #[test]
    fn test_libssh2_messages() {
        assert_eq!(
            triage("[Session(-18)] Authentication failed (username/password)"),
            ConnectionErrorKind::Authentication
        );
        assert_eq!(
            triage("[Session(-16)] Unable to extract public key from private key file"),
            ConnectionErrorKind::KeyMaterial
        );
        assert_eq!(
            triage("[Session(-13)] Failed getting banner"),
            ConnectionErrorKind::Protocol
        );
    }

    #[test]
    fn test_io_kinds() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(triage_io(&refused), ConnectionErrorKind::Refused);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(triage_io(&timed_out), ConnectionErrorKind::Timeout);
        let other = io::Error::other("failed to lookup address information");
        assert_eq!(triage_io(&other), ConnectionErrorKind::HostUnreachable);
    }
}
