//! Account database listing
//!
//! Turns `/etc/passwd` text plus per-account `chage -l` and `passwd --status`
//! output into [`AccountRecord`]s.

use super::kind::{AccountKind, KindTag};
use crate::config::ListingConfig;
use crate::result::PatternError;
use chrono::NaiveDate;
use globset::GlobSet;
use serde::Serialize;

/// Minimum fields in an account database line
const PASSWD_FIELDS: usize = 7;

/// Date formats `chage` prints, in the C locale first.
const EXPIRY_FORMATS: &[&str] = &["%b %d, %Y", "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

/// Which account database entries count as operator-managed.
#[derive(Debug, Clone)]
pub struct ListingFilter {
    shells: Vec<String>,
    home_marker: String,
    excluded: GlobSet,
}

impl ListingFilter {
    /// Build from configuration, compiling the exclusion globs.
    pub fn from_config(config: &ListingConfig) -> Result<Self, PatternError> {
        Ok(Self {
            shells: config.shells.clone(),
            home_marker: config.home_marker.clone(),
            excluded: config.excluded_set()?,
        })
    }

    /// Operator-managed accounts always carry a comment field; an empty one
    /// marks a system or hand-made account.
    fn accepts(&self, entry: &PasswdEntry) -> bool {
        !entry.gecos.is_empty()
            && entry.home.contains(&self.home_marker)
            && self.shells.iter().any(|s| s == &entry.shell)
            && !self.excluded.is_match(&entry.username)
    }
}

/// One line of the account database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    /// Login name
    pub username: String,
    /// Numeric user id
    pub uid: u32,
    /// Comment field
    pub gecos: String,
    /// Home directory
    pub home: String,
    /// Login shell
    pub shell: String,
}

/// Parse account database text, keeping operator-managed entries.
///
/// Malformed lines are skipped.
pub fn parse_passwd(raw: &str, filter: &ListingFilter) -> Vec<PasswdEntry> {
    raw.lines()
        .filter_map(parse_passwd_line)
        .filter(|entry| filter.accepts(entry))
        .collect()
}

fn parse_passwd_line(line: &str) -> Option<PasswdEntry> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < PASSWD_FIELDS || fields[0].is_empty() {
        return None;
    }
    Some(PasswdEntry {
        username: fields[0].to_string(),
        uid: fields[2].parse().ok()?,
        gecos: fields[4].to_string(),
        home: fields[5].to_string(),
        shell: fields[6].trim().to_string(),
    })
}

/// Account expiry as reported by `chage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    /// The account never expires
    Never,
    /// Expires at the start of this date
    On(NaiveDate),
    /// Text that matched no known format
    Unparsed(String),
}

/// Pull the value of the "Account expires" line out of `chage -l` output.
pub fn chage_expiry_value(output: &str) -> Option<&str> {
    output.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        label
            .trim()
            .eq_ignore_ascii_case("account expires")
            .then(|| value.trim())
    })
}

/// Interpret an expiry value.
pub fn parse_expiry(value: &str) -> Expiry {
    let value = value.trim();
    let lower = value.to_lowercase();
    if lower.is_empty() || lower == "never" || lower == "nunca" {
        return Expiry::Never;
    }
    EXPIRY_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .map(Expiry::On)
        .unwrap_or_else(|| Expiry::Unparsed(value.to_string()))
}

/// Whole days until expiry; `None` for accounts that never expire.
///
/// An expiry that could not be parsed counts as zero days.
pub fn days_remaining(expiry: &Expiry, today: NaiveDate) -> Option<i64> {
    match expiry {
        Expiry::Never => None,
        Expiry::On(date) => Some((*date - today).num_days()),
        Expiry::Unparsed(_) => Some(0),
    }
}

/// Whether `passwd --status` output reports a locked password.
pub fn is_locked(status_output: &str) -> bool {
    status_output
        .split_whitespace()
        .nth(1)
        .is_some_and(|state| state.starts_with('L'))
}

/// One operator-managed account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    /// Login name
    pub username: String,
    /// Decoded from the comment field
    pub kind: AccountKind,
    /// Password note (ordinary) or client id (token/hwid)
    pub payload: Option<String>,
    /// Simultaneous sessions allowed
    pub connection_limit: u32,
    /// Expiry date, when set and parseable
    pub expiration_date: Option<NaiveDate>,
    /// Days until expiry, `None` when the account never expires
    pub days_remaining: Option<i64>,
    /// Password locked
    pub is_blocked: bool,
    /// Not blocked and not expired
    pub is_active: bool,
}

impl AccountRecord {
    /// Combine one database entry with its `chage -l` and
    /// `passwd --status` output.
    pub fn assemble(
        entry: &PasswdEntry,
        chage_output: &str,
        status_output: &str,
        today: NaiveDate,
    ) -> Self {
        let tag = KindTag::decode(&entry.gecos);
        let expiry = chage_expiry_value(chage_output)
            .map(parse_expiry)
            .unwrap_or(Expiry::Never);
        let days = days_remaining(&expiry, today);
        let is_blocked = is_locked(status_output);

        Self {
            username: entry.username.clone(),
            kind: tag.kind,
            payload: (!tag.payload.is_empty()).then_some(tag.payload),
            connection_limit: tag.connection_limit,
            expiration_date: match expiry {
                Expiry::On(date) => Some(date),
                _ => None,
            },
            days_remaining: days,
            is_blocked,
            is_active: !is_blocked && days.is_none_or(|d| d > 0),
        }
    }

    /// Password note of an ordinary account
    pub fn password(&self) -> Option<&str> {
        match self.kind {
            AccountKind::Ordinary => self.payload.as_deref(),
            _ => None,
        }
    }

    /// Client identifier of a token or hwid account
    pub fn client_id(&self) -> Option<&str> {
        match self.kind {
            AccountKind::Ordinary => None,
            _ => self.payload.as_deref(),
        }
    }

    /// Expired accounts have a date and no days left
    pub fn is_expired(&self) -> bool {
        self.days_remaining.is_some_and(|d| d <= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
syslog:x:104:110::/home/syslog:/bin/false
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
client01:x:1001:1001:5,abc123:/home/client01:/bin/false
26b18e2158ff1ac:x:1002:1002:token,client-9981:/home/26b18e2158ff1ac:/bin/false
ops:x:1003:1003:ops:/home/ops:/bin/zsh
backup:x:1005:1005::/home/backup:/bin/bash
broken:x:1004
";

    fn filter() -> ListingFilter {
        ListingFilter::from_config(&ListingConfig::default()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_passwd_filter() {
        let names: Vec<_> = parse_passwd(PASSWD, &filter())
            .into_iter()
            .map(|e| e.username)
            .collect();
        assert_eq!(names, vec!["client01", "26b18e2158ff1ac"]);
    }

    #[test]
    fn test_empty_comment_field_excluded() {
        // home and shell pass, the empty comment field does not
        let text = "backup:x:1005:1005::/home/backup:/bin/bash\nclient02:x:1006:1006:2,pw:/home/client02:/bin/bash\n";
        let names: Vec<_> = parse_passwd(text, &filter())
            .into_iter()
            .map(|e| e.username)
            .collect();
        assert_eq!(names, vec!["client02"]);
    }

    #[test]
    fn test_chage_value() {
        let output = "\
Last password change					: Nov 26, 2025
Password expires					: never
Password inactive					: never
Account expires						: Dec 26, 2025
Minimum number of days between password change		: 0
";
        assert_eq!(chage_expiry_value(output), Some("Dec 26, 2025"));
        assert_eq!(parse_expiry("Dec 26, 2025"), Expiry::On(date(2025, 12, 26)));
    }

    #[test]
    fn test_parse_expiry_variants() {
        assert_eq!(parse_expiry("never"), Expiry::Never);
        assert_eq!(parse_expiry("nunca"), Expiry::Never);
        assert_eq!(parse_expiry("2025-12-26"), Expiry::On(date(2025, 12, 26)));
        assert_eq!(parse_expiry("dic 26, 2025"), Expiry::Unparsed("dic 26, 2025".into()));
    }

    #[test]
    fn test_days_remaining() {
        let today = date(2025, 11, 26);
        assert_eq!(days_remaining(&Expiry::On(date(2025, 12, 26)), today), Some(30));
        assert_eq!(days_remaining(&Expiry::On(date(2025, 11, 20)), today), Some(-6));
        assert_eq!(days_remaining(&Expiry::Never, today), None);
        assert_eq!(days_remaining(&Expiry::Unparsed("??".into()), today), Some(0));
    }

    #[test]
    fn test_lock_status() {
        assert!(is_locked("client01 L 11/26/2025 0 99999 7 -1"));
        assert!(is_locked("client01 LK 2025-11-26 0 99999 7 -1 (Password locked.)"));
        assert!(!is_locked("client01 P 11/26/2025 0 99999 7 -1"));
        assert!(!is_locked(""));
    }

    #[test]
    fn test_assemble_ordinary() {
        let entry = &parse_passwd(PASSWD, &filter())[0];
        let record = AccountRecord::assemble(
            entry,
            "Account expires : Dec 26, 2025\n",
            "client01 P 11/26/2025 0 99999 7 -1",
            date(2025, 11, 26),
        );
        assert_eq!(record.kind, AccountKind::Ordinary);
        assert_eq!(record.connection_limit, 5);
        assert_eq!(record.password(), Some("abc123"));
        assert_eq!(record.days_remaining, Some(30));
        assert!(record.is_active);
        assert!(!record.is_expired());
    }

    #[test]
    fn test_assemble_blocked_token() {
        let entry = &parse_passwd(PASSWD, &filter())[1];
        let record = AccountRecord::assemble(
            entry,
            "Account expires : never\n",
            "26b18e2158ff1ac L 11/26/2025 0 99999 7 -1",
            date(2025, 11, 26),
        );
        assert_eq!(record.kind, AccountKind::Token);
        assert_eq!(record.client_id(), Some("client-9981"));
        assert_eq!(record.password(), None);
        assert_eq!(record.days_remaining, None);
        assert!(record.is_blocked);
        assert!(!record.is_active);
    }

    #[test]
    fn test_unparseable_date_degrades_to_zero() {
        let entry = &parse_passwd(PASSWD, &filter())[0];
        let record = AccountRecord::assemble(
            entry,
            "Account expires : 26 de diciembre\n",
            "client01 P",
            date(2025, 11, 26),
        );
        assert_eq!(record.expiration_date, None);
        assert_eq!(record.days_remaining, Some(0));
        assert!(record.is_expired());
        assert!(!record.is_active);
    }
}
