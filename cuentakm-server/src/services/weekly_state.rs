//! Weekly reading state machine
//!
//! Per agent there are two states, driven only by the kind of the last
//! recorded reading:
//!
//! | last reading | state         | allowed next |
//! |--------------|---------------|--------------|
//! | none         | AwaitingStart | WeekStart    |
//! | WeekEnd      | AwaitingStart | WeekStart    |
//! | WeekStart    | AwaitingEnd   | WeekEnd      |
//!
//! There are no timeout transitions: an agent who never closes a week stays
//! in `AwaitingEnd` until they do.

use cuentakm_common::db::{Reading, ReadingKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeeklyState {
    AwaitingStart,
    AwaitingEnd,
}

impl WeeklyState {
    /// State implied by the agent's most recent reading
    pub fn from_last(last: Option<&Reading>) -> Self {
        Self::from_last_kind(last.map(|r| r.kind))
    }

    pub fn from_last_kind(last: Option<ReadingKind>) -> Self {
        match last {
            None | Some(ReadingKind::WeekEnd) => WeeklyState::AwaitingStart,
            Some(ReadingKind::WeekStart) => WeeklyState::AwaitingEnd,
        }
    }

    /// The single reading kind accepted in this state
    pub fn allowed_next(self) -> ReadingKind {
        match self {
            WeeklyState::AwaitingStart => ReadingKind::WeekStart,
            WeeklyState::AwaitingEnd => ReadingKind::WeekEnd,
        }
    }

    pub fn accepts(self, kind: ReadingKind) -> bool {
        self.allowed_next() == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_history_allows_only_week_start() {
        let state = WeeklyState::from_last(None);
        assert_eq!(state, WeeklyState::AwaitingStart);
        assert_eq!(state.allowed_next(), ReadingKind::WeekStart);
        assert!(!state.accepts(ReadingKind::WeekEnd));
    }

    #[test]
    fn test_last_kind_allows_the_opposite() {
        for kind in [ReadingKind::WeekStart, ReadingKind::WeekEnd] {
            let state = WeeklyState::from_last_kind(Some(kind));
            assert_eq!(state.allowed_next(), kind.opposite());
            assert!(state.accepts(kind.opposite()));
            assert!(!state.accepts(kind));
        }
    }
}
