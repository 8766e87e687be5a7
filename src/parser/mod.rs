//! Extract structured data from captured terminal text
//!
//! Everything here is a pure function over strings.

mod connections;
mod kind;
mod listing;

pub use connections::{count_by_user, parse_monitor, parse_sshd_processes, ActiveConnection};
pub use kind::{AccountKind, KindTag, DEFAULT_CONNECTION_LIMIT};
pub use listing::{
    chage_expiry_value, days_remaining, is_locked, parse_expiry, parse_passwd, AccountRecord,
    Expiry, ListingFilter, PasswdEntry,
};

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Fields printed by the menu after it creates an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedAccount {
    /// Address the client should connect to
    pub server_ip: String,
    /// Account name
    pub username: String,
    /// Generated token, when the menu prints one
    pub token: Option<String>,
    /// Expiry text as printed
    pub expires_in: Option<String>,
}

#[derive(Clone, Copy)]
enum ValueShape {
    /// First IPv4 address
    Ipv4,
    /// First whitespace-delimited word
    Word,
    /// Rest of the line
    Rest,
}

struct Label {
    regex: Option<Regex>,
    shape: ValueShape,
}

impl Label {
    fn new(pattern: &str, shape: ValueShape) -> Self {
        Self {
            regex: Regex::new(pattern).ok(),
            shape,
        }
    }
}

static IPV4: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").ok());

static SERVER_IP: LazyLock<Label> =
    LazyLock::new(|| Label::new(r"(?i)\bIP\s+(?:DEL\s+)?SERVIDOR\b", ValueShape::Ipv4));
static USERNAME: LazyLock<Label> =
    LazyLock::new(|| Label::new(r"(?i)\bNOMBRE\s+(?:ID|USUARIO)\b", ValueShape::Word));
static TOKEN: LazyLock<Label> = LazyLock::new(|| Label::new(r"(?i)\bTOKEN\b", ValueShape::Word));
static EXPIRES: LazyLock<Label> =
    LazyLock::new(|| Label::new(r"(?i)\bEXPIRA\s+EN\b", ValueShape::Rest));

/// Parse the banner printed after account creation.
///
/// Each label is looked for on every line; the value is taken from the same
/// line after an optional colon, or from the following line when the label
/// line carries no value. The last occurrence wins. Returns `None` unless
/// both the server address and the account name are present.
pub fn parse_created_account(text: &str) -> Option<CreatedAccount> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();

    Some(CreatedAccount {
        server_ip: find_last(&lines, &SERVER_IP)?,
        username: find_last(&lines, &USERNAME)?,
        token: find_last(&lines, &TOKEN),
        expires_in: find_last(&lines, &EXPIRES),
    })
}

fn find_last(lines: &[&str], label: &Label) -> Option<String> {
    let regex = label.regex.as_ref()?;
    let mut found = None;
    for (i, line) in lines.iter().enumerate() {
        let Some(m) = regex.find(line) else {
            continue;
        };
        let after = line[m.end()..].trim_start();
        let after = after.strip_prefix(':').unwrap_or(after);
        let value = value_of(after, label.shape, false).or_else(|| {
            lines
                .get(i + 1)
                .and_then(|next| value_of(next, label.shape, true))
        });
        if value.is_some() {
            found = value;
        }
    }
    found
}

fn value_of(text: &str, shape: ValueShape, next_line: bool) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match shape {
        ValueShape::Ipv4 => IPV4
            .as_ref()?
            .find(text)
            .map(|m| m.as_str().to_string()),
        // A following line that is itself "LABEL: value" is not a value.
        ValueShape::Word if next_line && text.contains(':') => None,
        ValueShape::Word => text
            .split_whitespace()
            .next()
            .filter(|w| *w != ":")
            .map(str::to_string),
        ValueShape::Rest if next_line && text.contains(':') && !looks_like_date(text) => None,
        ValueShape::Rest => Some(text.to_string()),
    }
}

fn looks_like_date(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_line_banner() {
        let text = "\
=============================
USUARIO GENERADO CON EXITO
IP DEL SERVIDOR: 203.0.113.5
NOMBRE ID: 26b18e2158ff1ac
TOKEN: 7f3a9c
EXPIRA EN: 2025-12-26
=============================
";
        let parsed = parse_created_account(text).unwrap();
        assert_eq!(
            parsed,
            CreatedAccount {
                server_ip: "203.0.113.5".into(),
                username: "26b18e2158ff1ac".into(),
                token: Some("7f3a9c".into()),
                expires_in: Some("2025-12-26".into()),
            }
        );
    }

    #[test]
    fn test_next_line_values() {
        let text = "\
IP DEL SERVIDOR
  203.0.113.5
NOMBRE USUARIO:
  client01
EXPIRA EN:
  30 dias
";
        let parsed = parse_created_account(text).unwrap();
        assert_eq!(parsed.server_ip, "203.0.113.5");
        assert_eq!(parsed.username, "client01");
        assert_eq!(parsed.token, None);
        assert_eq!(parsed.expires_in.as_deref(), Some("30 dias"));
    }

    #[test]
    fn test_bare_colon_token_is_not_a_value() {
        let text = "IP SERVIDOR : 10.0.0.1\nNOMBRE ID : bob\nTOKEN :\nEXPIRA EN : 2026-01-01\n";
        let parsed = parse_created_account(text).unwrap();
        assert_eq!(parsed.server_ip, "10.0.0.1");
        assert_eq!(parsed.username, "bob");
        assert_eq!(parsed.token, None);
    }

    #[test]
    fn test_missing_mandatory_field() {
        assert!(parse_created_account("NOMBRE ID: bob\nTOKEN: x\n").is_none());
        assert!(parse_created_account("IP DEL SERVIDOR: 10.0.0.1\n").is_none());
        assert!(parse_created_account("").is_none());
    }

    #[test]
    fn test_last_banner_wins() {
        let text = "\
IP DEL SERVIDOR: 10.0.0.1
NOMBRE ID: old
IP DEL SERVIDOR: 10.0.0.2
NOMBRE ID: new
";
        let parsed = parse_created_account(text).unwrap();
        assert_eq!(parsed.server_ip, "10.0.0.2");
        assert_eq!(parsed.username, "new");
    }
}
