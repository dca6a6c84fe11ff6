//! Outcomes, events and scores.
//!
//! An event assigns one outcome to every party of the inflated network. While
//! the search descends the event tree, the parties below the current depth
//! are still open and carry [`Outcome::Unknown`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value of an objective on an event, or a lower bound on a partial event.
pub type Score = f64;

/// One outcome per party, in party order.
pub type Event = Vec<Outcome>;

/// The outcome of a single party.
///
/// Concrete values order before `Unknown`, so comparing two complete events
/// is plain lexicographic order on their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Value(u8),
    Unknown,
}

impl Outcome {
    #[inline]
    pub fn value(self) -> Option<u8> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Unknown => None,
        }
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        matches!(self, Outcome::Unknown)
    }

    /// Slot used by mixed-radix tables that reserve one extra digit for `Unknown`.
    #[inline]
    pub fn slot(self, n_outcomes: u8) -> usize {
        match self {
            Outcome::Value(v) => v as usize,
            Outcome::Unknown => n_outcomes as usize,
        }
    }
}

impl From<u8> for Outcome {
    fn from(v: u8) -> Self {
        Outcome::Value(v)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => write!(f, "{}", v),
            Outcome::Unknown => write!(f, "?"),
        }
    }
}

/// Build a concrete event from raw outcome values.
pub fn event_from_values(values: &[u8]) -> Event {
    values.iter().map(|&v| Outcome::Value(v)).collect()
}

/// True when no party is left open.
pub fn is_complete(event: &[Outcome]) -> bool {
    event.iter().all(|o| !o.is_unknown())
}

/// Render an event as `(0,1,?)`.
pub fn format_event(event: &[Outcome]) -> String {
    let inner: Vec<String> = event.iter().map(|o| o.to_string()).collect();
    format!("({})", inner.join(","))
}
