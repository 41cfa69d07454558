/// Frontier entry state definitions
///
/// Every URL known to a task's frontier is in exactly one of these states.
use std::fmt;

/// Represents the current state of a frontier entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Waiting to be claimed by a worker
    Pending,

    /// Held by exactly one worker; `claimed_at` is set
    Claimed,

    /// Processed; the normalized key is in the visited set
    Done,
}

impl EntryState {
    /// Returns true if the entry still needs processing
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Claimed)
    }

    /// Returns true if the transition `self -> to` is allowed
    ///
    /// Pending -> Claimed (claim), Claimed -> Done (mark done) and
    /// Claimed -> Pending (stuck requeue). Done is terminal.
    pub fn can_transition_to(&self, to: EntryState) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Claimed)
                | (Self::Claimed, Self::Done)
                | (Self::Claimed, Self::Pending)
        )
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Done => "done",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
