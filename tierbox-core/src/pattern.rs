//! Glob-style key patterns.
//!
//! Patterns support two wildcards and are matched case-sensitively against
//! the full key:
//!
//! | Token | Matches |
//! |-------|---------|
//! | `*` | any sequence of characters, including none |
//! | `?` | exactly one character |
//!
//! Every other character matches itself. There are no character classes and
//! no escapes.
//!
//! ```
//! use tierbox_core::KeyPattern;
//!
//! let pattern = KeyPattern::new("user:*").unwrap();
//! assert!(pattern.matches("user:1"));
//! assert!(!pattern.matches("order:1"));
//! assert!(!pattern.matches("USER:1"));
//! ```

use std::fmt;

use regex::Regex;
use smol_str::SmolStr;
use thiserror::Error;

/// Error returned when a pattern cannot be compiled.
#[derive(Debug, Error)]
#[error("invalid key pattern `{pattern}`: {source}")]
pub struct PatternError {
    pattern: SmolStr,
    #[source]
    source: regex::Error,
}

/// A compiled glob pattern over cache keys.
#[derive(Clone)]
pub struct KeyPattern {
    source: SmolStr,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles a glob pattern.
    pub fn new(pattern: impl Into<SmolStr>) -> Result<Self, PatternError> {
        let source = pattern.into();
        let mut expr = String::with_capacity(source.len() + 8);
        expr.push_str("(?s)^");
        for ch in source.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|source_err| PatternError {
            pattern: source.clone(),
            source: source_err,
        })?;
        Ok(Self { source, regex })
    }

    /// Pattern matching every key.
    pub fn any() -> Self {
        Self {
            source: SmolStr::new_static("*"),
            regex: Regex::new("(?s)^.*$").unwrap_or_else(|_| unreachable!()),
        }
    }

    /// Returns `true` when `key` matches the whole pattern.
    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Returns the original glob text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` when the pattern has no wildcards and can only match
    /// the key spelled exactly like it.
    pub fn is_literal(&self) -> bool {
        !self.source.contains(['*', '?'])
    }
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyPattern").field(&self.source).finish()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for KeyPattern {}

impl TryFrom<&str> for KeyPattern {
    type Error = PatternError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        let p = KeyPattern::new("user:*").unwrap();
        assert!(p.matches("user:"));
        assert!(p.matches("user:1"));
        assert!(p.matches("user:1:profile"));
        assert!(!p.matches("xuser:1"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let p = KeyPattern::new("user:?").unwrap();
        assert!(p.matches("user:1"));
        assert!(!p.matches("user:12"));
        assert!(!p.matches("user:"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let p = KeyPattern::new("a.b[1]+").unwrap();
        assert!(p.matches("a.b[1]+"));
        assert!(!p.matches("axb1"));
        assert!(p.is_literal());
    }

    #[test]
    fn matching_is_case_sensitive_and_anchored() {
        let p = KeyPattern::new("*:1").unwrap();
        assert!(p.matches("order:1"));
        assert!(!p.matches("order:10"));
        assert!(!KeyPattern::new("Order:*").unwrap().matches("order:1"));
    }

    #[test]
    fn any_matches_everything() {
        let p = KeyPattern::any();
        assert!(p.matches(""));
        assert!(p.matches("line\nbreak"));
    }
}
