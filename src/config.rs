//! Engine configuration
//!
//! Every timing, menu option number, and keyword list the engine relies on
//! lives here so a different menu layout can be handled by a TOML file
//! instead of a rebuild. Missing keys fall back to the defaults below.
//!
//! ```
//! use shellpilot::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     [menu]
//!     launch_commands = ["menu"]
//!
//!     [timings]
//!     result_wait_ms = 8000
//! "#).unwrap();
//! assert_eq!(config.menu.launch_commands, vec!["menu"]);
//! assert_eq!(config.timings.result_wait_ms, 8000);
//! assert_eq!(config.timings.option_wait_ms, 2000);
//! ```

use crate::pattern::Pattern;
use crate::result::PatternError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was requested
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The TOML did not parse or had wrong types.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot be used.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted key path
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Connection defaults
    pub transport: TransportConfig,
    /// Interactive session defaults
    pub session: SessionConfig,
    /// Menu program layout
    pub menu: MenuLayout,
    /// Fixed waits used while driving the menu
    pub timings: MenuTimings,
    /// Result classification keywords
    pub patterns: PatternSet,
    /// Account database filter
    pub listing: ListingConfig,
    /// Direct command settings
    pub direct: DirectConfig,
    /// Multi-host fan-out
    pub fleet: FleetConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.menu.launch_commands.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "menu.launch_commands",
                reason: "at least one launch command is required".into(),
            });
        }
        self.menu
            .banner()
            .map_err(|e| ConfigError::Invalid {
                field: "menu.banner_pattern",
                reason: e.to_string(),
            })?;
        self.listing
            .excluded_set()
            .map_err(|e| ConfigError::Invalid {
                field: "listing.excluded_accounts",
                reason: e.to_string(),
            })?;
        if self.fleet.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "fleet.max_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Connection defaults, used when a target does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP connect plus handshake plus authentication
    pub connect_timeout_ms: u64,
    /// Interval between keepalive messages
    pub keepalive_interval_ms: u64,
    /// Default limit for a one-shot command
    pub command_timeout_ms: u64,
    /// Terminal type requested for interactive shells
    pub pty_term: String,
    /// Terminal width
    pub pty_cols: u16,
    /// Terminal height
    pub pty_rows: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            keepalive_interval_ms: 10_000,
            command_timeout_ms: 10_000,
            pty_term: "xterm".into(),
            pty_cols: 80,
            pty_rows: 24,
        }
    }
}

impl TransportConfig {
    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keepalive interval as a duration
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// One-shot command timeout as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Interactive session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time given to a fresh shell to print its prompt
    pub grace_ms: u64,
    /// Remove ANSI escape sequences from captured output
    pub strip_ansi: bool,
    /// Appended to every line sent
    pub line_ending: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_ms: 1000,
            strip_ansi: true,
            line_ending: "\n".into(),
        }
    }
}

/// Numbered options of the menu program.
///
/// The numbers were found by hand; a different menu release is handled by
/// changing them here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuLayout {
    /// Sent once before launching, to get a clean screen
    pub prelude_command: Option<String>,
    /// Commands that start the menu, tried in order
    pub launch_commands: Vec<String>,
    /// Regex that identifies the main menu
    pub banner_pattern: String,
    /// Main menu entry for account management
    pub accounts_option: String,
    /// Account submenu: create
    pub create_option: String,
    /// Account submenu: remove
    pub remove_option: String,
    /// Account submenu: renew
    pub renew_option: String,
    /// Account submenu: block/unblock toggle
    pub lock_toggle_option: String,
    /// Answer to the toggle prompt to block
    pub block_choice: String,
    /// Answer to the toggle prompt to unblock
    pub unblock_choice: String,
    /// Account submenu: connection monitor
    pub monitor_option: String,
    /// Account submenu: purge expired accounts
    pub purge_expired_option: String,
    /// Leaves the current menu level
    pub exit_option: String,
    /// Installation directory, checked by menu detection
    pub install_dir: String,
}

impl Default for MenuLayout {
    fn default() -> Self {
        Self {
            prelude_command: Some("clear".into()),
            launch_commands: vec!["menu".into(), "adm".into()],
            banner_pattern: r"(?i)(administrar\s+cuentas|ingresa\s+una\s+opci[oó]n|menu\s+principal|admrufu|seleccione\s+una\s+opci[oó]n)".into(),
            accounts_option: "1".into(),
            create_option: "1".into(),
            remove_option: "2".into(),
            renew_option: "3".into(),
            lock_toggle_option: "4".into(),
            block_choice: "1".into(),
            unblock_choice: "2".into(),
            monitor_option: "7".into(),
            purge_expired_option: "9".into(),
            exit_option: "0".into(),
            install_dir: "/etc/ADMRufu".into(),
        }
    }
}

impl MenuLayout {
    /// Compiled banner pattern
    pub fn banner(&self) -> Result<Pattern, regex::Error> {
        Pattern::regex(&self.banner_pattern)
    }
}

/// Fixed waits, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuTimings {
    /// After the prelude command
    pub prelude_wait_ms: u64,
    /// Upper bound for the banner after a launch command
    pub launch_wait_ms: u64,
    /// After selecting a numbered option
    pub option_wait_ms: u64,
    /// Before each field is typed
    pub field_settle_ms: u64,
    /// After each field is typed
    pub field_wait_ms: u64,
    /// For the operation to finish and print its result
    pub result_wait_ms: u64,
    /// After pressing enter to dismiss a result screen
    pub ack_wait_ms: u64,
    /// For the connection monitor to render
    pub monitor_wait_ms: u64,
    /// After the exit option
    pub exit_wait_ms: u64,
    /// After the interrupt
    pub interrupt_wait_ms: u64,
}

impl Default for MenuTimings {
    fn default() -> Self {
        Self {
            prelude_wait_ms: 1000,
            launch_wait_ms: 5000,
            option_wait_ms: 2000,
            field_settle_ms: 1500,
            field_wait_ms: 3000,
            result_wait_ms: 5000,
            ack_wait_ms: 1000,
            monitor_wait_ms: 4000,
            exit_wait_ms: 1000,
            interrupt_wait_ms: 500,
        }
    }
}

/// Keywords that mark a result as success or failure.
///
/// Matching is case-insensitive substring matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSet {
    /// Success markers
    pub success: Vec<String>,
    /// Error markers; these take precedence over success markers
    pub error: Vec<String>,
}

impl Default for PatternSet {
    fn default() -> Self {
        let to_strings = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            success: to_strings(&[
                "exitosamente",
                "creado correctamente",
                "con exito",
                "con éxito",
                "success",
                "completado",
                "criado",
                "renovado",
                "removido",
                "eliminado",
                "bloqueado",
                "desbloqueado",
                "ip del servidor",
            ]),
            error: to_strings(&[
                "error",
                "fallo",
                "falló",
                "fail",
                "no existe",
                "nao existe",
                "não existe",
                "ya existe",
                "ja existe",
                "already exists",
                "does not exist",
                "inválido",
                "invalido",
                "invalid",
                "incorrecto",
            ]),
        }
    }
}

impl PatternSet {
    /// Compiled success matcher, `None` when the list is empty
    pub fn success_pattern(&self) -> Result<Option<Pattern>, PatternError> {
        compile_keywords(&self.success)
    }

    /// Compiled error matcher, `None` when the list is empty
    pub fn error_pattern(&self) -> Result<Option<Pattern>, PatternError> {
        compile_keywords(&self.error)
    }
}

fn compile_keywords(words: &[String]) -> Result<Option<Pattern>, PatternError> {
    match Pattern::keywords(words) {
        Ok(pattern) => Ok(Some(pattern)),
        Err(PatternError::EmptyPattern) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Which entries of the account database are operator-managed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Accepted login shells
    pub shells: Vec<String>,
    /// Substring the home directory must contain
    pub home_marker: String,
    /// Glob patterns of account names to skip
    pub excluded_accounts: Vec<String>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            shells: vec!["/bin/bash".into(), "/bin/false".into()],
            home_marker: "home".into(),
            excluded_accounts: vec!["syslog".into()],
        }
    }
}

impl ListingConfig {
    /// Compiled exclusion globs
    pub fn excluded_set(&self) -> Result<GlobSet, PatternError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.excluded_accounts {
            let glob = Glob::new(pattern).map_err(|e| PatternError::InvalidGlob(e.to_string()))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| PatternError::InvalidGlob(e.to_string()))
    }
}

/// Direct command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Login shell for new accounts
    pub login_shell: String,
    /// Pause between killing an account's processes and deleting it
    pub kill_grace_ms: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            login_shell: "/bin/bash".into(),
            kill_grace_ms: 500,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Hosts worked on at once
    pub max_concurrency: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.transport.connect_timeout_ms, 30_000);
        assert_eq!(config.transport.keepalive_interval_ms, 10_000);
        assert_eq!(config.menu.launch_commands, vec!["menu", "adm"]);
        assert_eq!(config.direct.login_shell, "/bin/bash");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [menu]
            remove_option = "5"
            "#,
        )
        .unwrap();
        assert_eq!(config.menu.remove_option, "5");
        assert_eq!(config.menu.create_option, "1");
    }

    #[test]
    fn test_bad_banner_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [menu]
            banner_pattern = "(unclosed"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "menu.banner_pattern",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = EngineConfig::from_toml_str("[fleet]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = EngineConfig::from_toml_str("[timings]\nresult_wait_ms = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_default_banner_matches_menu_text() {
        let banner = MenuLayout::default().banner().unwrap();
        assert!(banner.is_match(b"[1] > ADMINISTRAR CUENTAS (SSH/DROPBEAR)"));
        assert!(banner.is_match("Ingresa una Opción: ".as_bytes()));
        assert!(!banner.is_match(b"root@vps:~# "));
    }

    #[test]
    fn test_excluded_globs() {
        let listing = ListingConfig {
            excluded_accounts: vec!["syslog".into(), "_*".into()],
            ..Default::default()
        };
        let set = listing.excluded_set().unwrap();
        assert!(set.is_match("syslog"));
        assert!(set.is_match("_apt"));
        assert!(!set.is_match("client01"));
    }

    #[test]
    fn test_empty_keyword_list_compiles_to_none() {
        let patterns = PatternSet {
            success: vec![],
            ..Default::default()
        };
        assert!(patterns.success_pattern().unwrap().is_none());
        assert!(patterns.error_pattern().unwrap().is_some());
    }
}
