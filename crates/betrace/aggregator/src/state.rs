//! Per-trace lifecycle state machine.

use std::fmt;

/// Trace lifecycle: `Open -> Complete -> Drained`. No transition skips a
/// state and `Drained` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceState {
    Open,
    Complete,
    Drained,
}

impl TraceState {
    pub fn can_advance_to(&self, next: TraceState) -> bool {
        matches!(
            (self, next),
            (TraceState::Open, TraceState::Complete) | (TraceState::Complete, TraceState::Drained)
        )
    }
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceState::Open => write!(f, "open"),
            TraceState::Complete => write!(f, "complete"),
            TraceState::Drained => write!(f, "drained"),
        }
    }
}
