//! Command lines for the account-management tools

use crate::parser::KindTag;
use crate::result::ProvisionError;
use crate::transport::shell_quote;
use chrono::{Days, NaiveDate};

/// Longest account name `useradd` accepts on common distributions
const MAX_IDENTIFIER_LEN: usize = 32;

/// Account database read by listings
pub(super) const PASSWD_FILE: &str = "/etc/passwd";

/// Messages meaning the account is already there.
const EXISTS_MARKERS: &[&str] = &["already exists", "ya existe"];

/// Messages meaning the account is already gone.
const ABSENT_MARKERS: &[&str] = &["does not exist", "no existe", "unknown user"];

/// Messages meaning the account was already in the requested state.
const UNCHANGED_MARKERS: &[&str] = &["no changes"];

fn mentions(diagnostic: &str, markers: &[&str]) -> bool {
    let lower = diagnostic.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

pub(super) fn already_exists(diagnostic: &str) -> bool {
    mentions(diagnostic, EXISTS_MARKERS)
}

pub(super) fn already_absent(diagnostic: &str) -> bool {
    mentions(diagnostic, ABSENT_MARKERS)
}

pub(super) fn unchanged(diagnostic: &str) -> bool {
    mentions(diagnostic, UNCHANGED_MARKERS)
}

/// Check an account name before it is put on a command line.
///
/// Digits may lead; generated identifiers often start with one.
pub fn validate_identifier(identifier: &str) -> Result<(), ProvisionError> {
    let valid = !identifier.is_empty()
        && identifier.len() <= MAX_IDENTIFIER_LEN
        && !identifier.starts_with('-')
        && identifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::InvalidArgument(format!(
            "invalid account name {identifier:?}"
        )))
    }
}

/// Check a password before it is handed to `chpasswd`.
pub fn validate_secret(secret: &str) -> Result<(), ProvisionError> {
    if secret.is_empty() || secret.contains([':', '\n', '\r']) {
        return Err(ProvisionError::InvalidArgument(
            "password is empty or contains ':' or a line break".into(),
        ));
    }
    Ok(())
}

/// Date `days` after `today`.
pub fn expiry_after(today: NaiveDate, days: u32) -> Result<NaiveDate, ProvisionError> {
    today
        .checked_add_days(Days::new(days.into()))
        .ok_or_else(|| ProvisionError::InvalidArgument(format!("{days} days is out of range")))
}

fn date_arg(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(super) fn useradd(shell: &str, expiry: NaiveDate, tag: &KindTag, identifier: &str) -> String {
    format!(
        "useradd -m -s {} -e {} -c {} {}",
        shell_quote(shell),
        date_arg(expiry),
        shell_quote(&tag.encode()),
        shell_quote(identifier)
    )
}

pub(super) fn chage_expiry(identifier: &str, expiry: NaiveDate) -> String {
    format!("chage -E {} {}", date_arg(expiry), shell_quote(identifier))
}

/// The secret travels inside a shell builtin, so it never shows up in the
/// remote process table.
pub(super) fn chpasswd(identifier: &str, secret: &str) -> String {
    format!(
        "printf '%s\\n' {} | chpasswd",
        shell_quote(&format!("{identifier}:{secret}"))
    )
}

pub(super) fn kill_sessions(identifier: &str) -> String {
    format!("pkill -KILL -u {}", shell_quote(identifier))
}

pub(super) fn userdel(identifier: &str) -> String {
    format!("userdel -r {}", shell_quote(identifier))
}

pub(super) fn lock(identifier: &str) -> String {
    format!("usermod -L {}", shell_quote(identifier))
}

pub(super) fn unlock(identifier: &str) -> String {
    format!("usermod -U {}", shell_quote(identifier))
}

pub(super) fn rename(identifier: &str, new_identifier: &str) -> String {
    format!(
        "usermod -l {} -d /home/{} -m {}",
        shell_quote(new_identifier),
        shell_quote(new_identifier),
        shell_quote(identifier)
    )
}

pub(super) fn read_passwd() -> String {
    format!("cat {PASSWD_FILE}")
}

/// `LC_ALL=C` pins the date format `chage` prints.
pub(super) fn chage_list(identifier: &str) -> String {
    format!("LC_ALL=C chage -l {}", shell_quote(identifier))
}

pub(super) fn password_status(identifier: &str) -> String {
    format!("passwd --status {}", shell_quote(identifier))
}

pub(super) fn process_titles() -> String {
    "ps -eo args=".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("26b18e2158ff1ac").is_ok());
        assert!(validate_identifier("client_01.eu-1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("-rf").is_err());
        assert!(validate_identifier("a b").is_err());
        assert!(validate_identifier("x;reboot").is_err());
        assert!(validate_identifier(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_secret() {
        assert!(validate_secret("Xk9#pL2q").is_ok());
        assert!(validate_secret("a:b").is_err());
        assert!(validate_secret("a\nb").is_err());
        assert!(validate_secret("").is_err());
    }

    #[test]
    fn test_expiry_after() {
        assert_eq!(expiry_after(date(2025, 11, 26), 30).unwrap(), date(2025, 12, 26));
        assert_eq!(expiry_after(date(2025, 11, 26), 0).unwrap(), date(2025, 11, 26));
    }

    #[test]
    fn test_useradd_line() {
        let line = useradd(
            "/bin/false",
            date(2025, 12, 26),
            &KindTag::ordinary(5, "abc123"),
            "client01",
        );
        assert_eq!(line, "useradd -m -s /bin/false -e 2025-12-26 -c 5,abc123 client01");
    }

    #[test]
    fn test_chpasswd_quotes_secret() {
        assert_eq!(
            chpasswd("client01", "Xk9#pL2q"),
            "printf '%s\\n' 'client01:Xk9#pL2q' | chpasswd"
        );
        assert_eq!(
            chpasswd("client01", "it's"),
            r"printf '%s\n' 'client01:it'\''s' | chpasswd"
        );
    }

    #[test]
    fn test_markers() {
        assert!(already_exists("useradd: user 'bob' already exists"));
        assert!(already_absent("userdel: user 'bob' does not exist"));
        assert!(unchanged("usermod: no changes"));
        assert!(!already_exists("useradd: cannot lock /etc/passwd"));
    }
}
