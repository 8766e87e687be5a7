//! Operation scripts as data
//!
//! Each menu operation is a flat list of [`Step`]s. The engine runs any
//! script the same way, so menu layout changes only touch the builders
//! here and the numbers in [`MenuLayout`].

use super::classify::ClassifyMode;
use crate::config::{MenuLayout, MenuTimings};
use crate::pattern::Pattern;
use crate::result::ProvisionError;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Interrupt byte (Ctrl-C)
pub const INTERRUPT: u8 = 0x03;

/// Operations the menu program can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    /// Create an account
    Create,
    /// Remove an account
    Remove,
    /// Extend an account's expiry
    Renew,
    /// Block an account
    Block,
    /// Unblock an account
    Unblock,
    /// Show the connection monitor
    ListConnections,
    /// Remove all expired accounts
    PurgeExpired,
}

impl MenuAction {
    /// Label used in outcomes and logs
    pub fn label(self) -> &'static str {
        match self {
            MenuAction::Create => "create",
            MenuAction::Remove => "remove",
            MenuAction::Renew => "renew",
            MenuAction::Block => "block",
            MenuAction::Unblock => "unblock",
            MenuAction::ListConnections => "list_connections",
            MenuAction::PurgeExpired => "purge_expired",
        }
    }
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Caller-supplied value typed into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Account name
    Identifier,
    /// Account password
    Secret,
    /// Validity in days
    Days,
}

/// Values for the [`Field`]s a script asks for.
#[derive(Default, Clone)]
pub struct FieldValues {
    identifier: Option<String>,
    secret: Option<Zeroizing<String>>,
    days: Option<u32>,
}

impl fmt::Debug for FieldValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldValues")
            .field("identifier", &self.identifier)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("days", &self.days)
            .finish()
    }
}

impl FieldValues {
    /// No values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the account name
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Set the password
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(Zeroizing::new(secret.into()));
        self
    }

    /// Set the validity in days
    pub fn days(mut self, days: u32) -> Self {
        self.days = Some(days);
        self
    }

    /// Text to type for `field`.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::InvalidArgument`] if the value is missing or
    /// contains a control character, which the menu would read as a
    /// keystroke.
    pub fn text(&self, field: Field) -> Result<Zeroizing<String>, ProvisionError> {
        let value = match field {
            Field::Identifier => self.identifier.clone().map(Zeroizing::new),
            Field::Secret => self.secret.clone(),
            Field::Days => self.days.map(|d| Zeroizing::new(d.to_string())),
        };
        let value = value
            .ok_or_else(|| ProvisionError::InvalidArgument(format!("missing {field:?}")))?;
        if value.is_empty() || value.chars().any(char::is_control) {
            return Err(ProvisionError::InvalidArgument(format!(
                "{field:?} is empty or contains control characters"
            )));
        }
        Ok(value)
    }
}

/// One unit of a menu script.
#[derive(Debug, Clone)]
pub enum Step {
    /// Type a fixed string plus the line ending
    SendLiteral(String),
    /// Type a caller-supplied value plus the line ending
    SendField(Field),
    /// Send Ctrl-C
    SendInterrupt,
    /// Collect output for a fixed time
    WaitFixed(Duration),
    /// Wait for a pattern in output produced since the last send
    WaitForPattern {
        /// What to wait for
        pattern: Pattern,
        /// Upper bound on the wait
        timeout: Duration,
    },
    /// Start of the output that decides the verdict
    Mark,
    /// End of the output that decides the verdict; later output is only
    /// kept in the transcript
    Seal,
    /// Classify output since the mark and end the script
    ClassifyAndReturn,
}

/// A runnable operation script.
#[derive(Debug, Clone)]
pub struct Script {
    /// Operation this script performs
    pub action: MenuAction,
    /// How its output is judged
    pub mode: ClassifyMode,
    /// Steps, run in order
    pub steps: Vec<Step>,
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

impl Script {
    /// Script for `action`, starting at the main menu.
    pub fn for_action(
        action: MenuAction,
        layout: &MenuLayout,
        timings: &MenuTimings,
        submenu_prompt: &Pattern,
    ) -> Self {
        let mut steps = vec![
            Step::SendLiteral(layout.accounts_option.clone()),
            Step::WaitForPattern {
                pattern: submenu_prompt.clone(),
                timeout: ms(timings.option_wait_ms),
            },
            Step::Mark,
        ];

        let leaf = match action {
            MenuAction::Create => &layout.create_option,
            MenuAction::Remove => &layout.remove_option,
            MenuAction::Renew => &layout.renew_option,
            MenuAction::Block | MenuAction::Unblock => &layout.lock_toggle_option,
            MenuAction::ListConnections => &layout.monitor_option,
            MenuAction::PurgeExpired => &layout.purge_expired_option,
        };
        steps.push(Step::SendLiteral(leaf.clone()));

        let field = |steps: &mut Vec<Step>, f: Field| {
            steps.push(Step::WaitFixed(ms(timings.field_settle_ms)));
            steps.push(Step::SendField(f));
            steps.push(Step::WaitFixed(ms(timings.field_wait_ms)));
        };

        let mode = match action {
            MenuAction::Create => {
                field(&mut steps, Field::Identifier);
                field(&mut steps, Field::Secret);
                field(&mut steps, Field::Days);
                ClassifyMode::Confirmation
            }
            MenuAction::Remove => {
                field(&mut steps, Field::Identifier);
                ClassifyMode::Confirmation
            }
            MenuAction::Renew => {
                field(&mut steps, Field::Identifier);
                field(&mut steps, Field::Days);
                ClassifyMode::Confirmation
            }
            MenuAction::Block | MenuAction::Unblock => {
                field(&mut steps, Field::Identifier);
                let choice = if action == MenuAction::Block {
                    &layout.block_choice
                } else {
                    &layout.unblock_choice
                };
                steps.push(Step::SendLiteral(choice.clone()));
                ClassifyMode::Confirmation
            }
            MenuAction::ListConnections => {
                steps.push(Step::WaitFixed(ms(timings.monitor_wait_ms)));
                ClassifyMode::Listing
            }
            MenuAction::PurgeExpired => ClassifyMode::Confirmation,
        };

        if action == MenuAction::ListConnections {
            // the menu redraws after the acknowledgement
            steps.push(Step::Seal);
        } else {
            steps.push(Step::WaitFixed(ms(timings.result_wait_ms)));
        }
        // "press ENTER to continue"
        steps.push(Step::SendLiteral(String::new()));
        steps.push(Step::WaitFixed(ms(timings.ack_wait_ms)));
        steps.push(Step::ClassifyAndReturn);

        Self { action, mode, steps }
    }

    /// Leave the menu: exit option, then an interrupt for anything left.
    pub fn exit_steps(layout: &MenuLayout, timings: &MenuTimings) -> Vec<Step> {
        vec![
            Step::SendLiteral(layout.exit_option.clone()),
            Step::WaitFixed(ms(timings.exit_wait_ms)),
            Step::SendInterrupt,
            Step::WaitFixed(ms(timings.interrupt_wait_ms)),
        ]
    }

    /// Fields the script types, in order
    pub fn fields(&self) -> Vec<Field> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::SendField(f) => Some(*f),
                _ => None,
            })
            .collect()
    }

    /// Check that `values` has everything the script types.
    pub fn check(&self, values: &FieldValues) -> Result<(), ProvisionError> {
        for field in self.fields() {
            values.text(field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(action: MenuAction) -> Script {
        let prompt = Pattern::exact("Opcion");
        Script::for_action(action, &MenuLayout::default(), &MenuTimings::default(), &prompt)
    }

    fn literals(script: &Script) -> Vec<String> {
        script
            .steps
            .iter()
            .filter_map(|s| match s {
                Step::SendLiteral(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_create_navigation() {
        let s = script(MenuAction::Create);
        assert_eq!(literals(&s), vec!["1", "1", ""]);
        assert_eq!(s.fields(), vec![Field::Identifier, Field::Secret, Field::Days]);
        assert_eq!(s.mode, ClassifyMode::Confirmation);
        assert!(matches!(s.steps.last(), Some(Step::ClassifyAndReturn)));
    }

    #[test]
    fn test_mark_precedes_leaf_choice() {
        let s = script(MenuAction::Remove);
        let mark = s.steps.iter().position(|st| matches!(st, Step::Mark)).unwrap();
        assert!(matches!(&s.steps[mark + 1], Step::SendLiteral(leaf) if leaf == "2"));
    }

    #[test]
    fn test_block_and_unblock_choices() {
        assert_eq!(literals(&script(MenuAction::Block)), vec!["1", "4", "1", ""]);
        assert_eq!(literals(&script(MenuAction::Unblock)), vec!["1", "4", "2", ""]);
    }

    #[test]
    fn test_renew_fields() {
        let s = script(MenuAction::Renew);
        assert_eq!(literals(&s), vec!["1", "3", ""]);
        assert_eq!(s.fields(), vec![Field::Identifier, Field::Days]);
    }

    #[test]
    fn test_monitor_is_listing() {
        let s = script(MenuAction::ListConnections);
        assert_eq!(s.mode, ClassifyMode::Listing);
        assert!(s.fields().is_empty());
        assert!(s
            .steps
            .iter()
            .any(|st| matches!(st, Step::WaitFixed(d) if *d == Duration::from_millis(4000))));
        let seal = s.steps.iter().position(|st| matches!(st, Step::Seal)).unwrap();
        assert!(matches!(&s.steps[seal + 1], Step::SendLiteral(ack) if ack.is_empty()));
        assert!(!script(MenuAction::Create)
            .steps
            .iter()
            .any(|st| matches!(st, Step::Seal)));
    }

    #[test]
    fn test_purge() {
        let s = script(MenuAction::PurgeExpired);
        assert_eq!(literals(&s), vec!["1", "9", ""]);
    }

    #[test]
    fn test_exit_steps_end_with_interrupt() {
        let steps = Script::exit_steps(&MenuLayout::default(), &MenuTimings::default());
        assert!(matches!(&steps[0], Step::SendLiteral(o) if o == "0"));
        assert!(matches!(steps[2], Step::SendInterrupt));
    }

    #[test]
    fn test_check_missing_field() {
        let s = script(MenuAction::Renew);
        let err = s.check(&FieldValues::new().identifier("client01")).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidArgument(_)));
        assert!(s.check(&FieldValues::new().identifier("client01").days(30)).is_ok());
    }

    #[test]
    fn test_control_characters_rejected() {
        let values = FieldValues::new().identifier("bad\nname");
        assert!(values.text(Field::Identifier).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let values = FieldValues::new().identifier("client01").secret("Xk9#pL2q");
        let shown = format!("{values:?}");
        assert!(!shown.contains("Xk9#pL2q"));
        assert!(shown.contains("<redacted>"));
    }
}
