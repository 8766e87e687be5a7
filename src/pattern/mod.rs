//! Patterns used to wait on and classify terminal output

mod matcher;

pub use matcher::{Match, Matcher};

use crate::result::PatternError;
use matcher::{LiteralMatcher, RegexMatcher};
use regex::bytes::Regex;
use std::fmt;

/// A pattern matched against accumulated session output.
///
/// # Examples
///
/// ```
/// use shellpilot::Pattern;
///
/// let prompt = Pattern::exact("Ingresa una Opcion");
/// let banner = Pattern::regex(r"(?i)administrar\s+cuentas").unwrap();
/// assert!(prompt.is_match(b"... Ingresa una Opcion: "));
/// assert!(banner.is_match(b"[1] ADMINISTRAR CUENTAS"));
/// ```
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal text, matched byte for byte.
    Exact(String),

    /// Regular expression, compiled once and run over raw bytes.
    Regex(Regex),
}

impl Pattern {
    /// Create an exact string pattern.
    pub fn exact(s: impl Into<String>) -> Self {
        Pattern::Exact(s.into())
    }

    /// Create a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns a regex error if the pattern is invalid.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Case-insensitive pattern matching any of the given literal keywords.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::EmptyPattern`] when no non-blank keyword is given.
    pub fn keywords<S: AsRef<str>>(words: &[S]) -> Result<Self, PatternError> {
        let alternatives: Vec<String> = words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Err(PatternError::EmptyPattern);
        }
        let source = format!("(?i)(?:{})", alternatives.join("|"));
        Ok(Pattern::Regex(Regex::new(&source)?))
    }

    /// Matcher for this pattern.
    ///
    /// # Errors
    ///
    /// An empty literal has nothing to look for and is rejected.
    pub fn to_matcher(&self) -> Result<Box<dyn Matcher>, PatternError> {
        Ok(match self {
            Pattern::Exact(s) => Box::new(LiteralMatcher::new(s.as_bytes())?),
            Pattern::Regex(r) => Box::new(RegexMatcher::new(r.clone())),
        })
    }

    /// First match in `haystack`, if any
    pub fn find(&self, haystack: &[u8]) -> Option<Match> {
        self.to_matcher().ok()?.find(haystack)
    }

    /// Whether the pattern occurs anywhere in `haystack`
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.find(haystack).is_some()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(s) => write!(f, "exact({s:?})"),
            Pattern::Regex(r) => write!(f, "regex({:?})", r.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_case_insensitive() {
        let pattern = Pattern::keywords(&["exitosamente", "ya existe"]).unwrap();
        assert!(pattern.is_match(b"Usuario creado EXITOSAMENTE"));
        assert!(pattern.is_match(b"el usuario Ya Existe"));
        assert!(!pattern.is_match(b"nada que ver"));
    }

    #[test]
    fn test_keywords_escape_metacharacters() {
        let pattern = Pattern::keywords(&["fail(ed)?"]).unwrap();
        assert!(!pattern.is_match(b"fail"));
        assert!(pattern.is_match(b"fail(ed)?"));
    }

    #[test]
    fn test_keywords_empty() {
        assert!(matches!(
            Pattern::keywords(&["", "  "]),
            Err(PatternError::EmptyPattern)
        ));
    }

    #[test]
    fn test_empty_exact_never_matches() {
        assert!(!Pattern::exact("").is_match(b"anything"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Pattern::exact("$ ").to_string(), "exact(\"$ \")");
    }
}
