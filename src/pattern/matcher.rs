//! Matchers over raw session bytes

use crate::result::PatternError;
use regex::bytes::Regex;

/// Where a pattern matched in a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Offset of the first matched byte
    pub start: usize,
    /// Offset one past the last matched byte
    pub end: usize,
    /// Capture groups, whole match first; empty for literals
    pub captures: Vec<String>,
}

impl Match {
    /// The line of `buffer` the match starts on, without its terminator.
    pub fn line<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        let start = self.start.min(buffer.len());
        let end = self.end.clamp(start, buffer.len());
        let begin = buffer[..start]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let finish = buffer[end..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map_or(buffer.len(), |i| end + i);
        &buffer[begin..finish]
    }
}

/// Finds a pattern in accumulated output.
pub trait Matcher: Send + Sync {
    /// First match in `buffer`
    fn find(&self, buffer: &[u8]) -> Option<Match>;
}

/// Literal matcher (Boyer-Moore-Horspool).
///
/// Menu prompts are short and sit at the end of a redraw, so the skip table
/// lets a search over a long capture jump most of the way in a few steps.
pub struct LiteralMatcher {
    needle: Vec<u8>,
    skip: [usize; 256],
}

impl LiteralMatcher {
    /// Matcher for `needle`, which must not be empty
    pub fn new(needle: impl Into<Vec<u8>>) -> Result<Self, PatternError> {
        let needle = needle.into();
        let Some(last) = needle.len().checked_sub(1) else {
            return Err(PatternError::EmptyPattern);
        };

        let mut skip = [needle.len(); 256];
        for (i, &byte) in needle[..last].iter().enumerate() {
            skip[usize::from(byte)] = last - i;
        }
        Ok(Self { needle, skip })
    }
}

impl Matcher for LiteralMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let width = self.needle.len();
        let mut at = 0;
        while let Some(window) = buffer.get(at..at + width) {
            if window == self.needle.as_slice() {
                return Some(Match {
                    start: at,
                    end: at + width,
                    captures: Vec::new(),
                });
            }
            at += self.skip[usize::from(window[width - 1])];
        }
        None
    }
}

/// Regex matcher over bytes.
///
/// A multi-byte character split across two reads leaves invalid UTF-8 in
/// the buffer for a moment; a byte regex still finds matches around it.
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Matcher for an already compiled expression
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Matcher for RegexMatcher {
    fn find(&self, buffer: &[u8]) -> Option<Match> {
        let caps = self.regex.captures(buffer)?;
        let whole = caps.get(0)?;
        Some(Match {
            start: whole.start(),
            end: whole.end(),
            captures: caps
                .iter()
                .flatten()
                .map(|group| String::from_utf8_lossy(group.as_bytes()).into_owned())
                .collect(),
        })
    }
}
