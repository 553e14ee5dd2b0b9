//! Strongly-typed identifiers for domain entities.
//!
//! Newtypes instead of raw strings prevent accidental mixing of
//! identifier kinds and document what each function expects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exchange trading pair symbol (e.g. `BTCUSDT`).
///
/// # Examples
///
/// ```
/// use regent::domain::Symbol;
///
/// let symbol = Symbol::new("BTCUSDT");
/// assert_eq!(symbol.as_str(), "BTCUSDT");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string value.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for a managed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
