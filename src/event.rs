use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// The class of discrepancy an observation belongs to
///
/// Every key carries its event type, so substitution, insertion and deletion
/// error models accumulate independently in the same tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    Substitution,
    Insertion,
    Deletion,
}
impl EventType {
    /// All event types, in index order
    pub const ALL: [Self; 3] = [Self::Substitution, Self::Insertion, Self::Deletion];

    /// Number of event types the key layout must represent
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index of the event type in `0..COUNT`
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Substitution => 0,
            Self::Insertion => 1,
            Self::Deletion => 2,
        }
    }

    /// Inverse of [`EventType::index`]
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short representation used in report rows
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Substitution => "M",
            Self::Insertion => "I",
            Self::Deletion => "D",
        }
    }
}
impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for EventType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" | "m" => Ok(Self::Substitution),
            "I" | "i" => Ok(Self::Insertion),
            "D" | "d" => Ok(Self::Deletion),
            _ => Err(ConfigError::UnknownEventType(s.to_string())),
        }
    }
}
