//! Per-request state machine.
//!
//! ```text
//! Received → Understanding → Retrieving → Generating → Persisting → Completed
//!     └───────────┴──────────────┴─────────────┴────────────┴──→ Failed
//! ```
//!
//! Transitions only move forward, one step at a time; `Failed` is reachable
//! from every non-terminal state.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Understanding,
    Retrieving,
    Generating,
    Persisting,
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }

    /// The state that follows `self` on the success path.
    pub fn successor(self) -> Option<RequestState> {
        use RequestState::*;
        match self {
            Received => Some(Understanding),
            Understanding => Some(Retrieving),
            Retrieving => Some(Generating),
            Generating => Some(Persisting),
            Persisting => Some(Completed),
            Completed | Failed => None,
        }
    }

    pub fn can_transition_to(self, next: RequestState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RequestState::Failed || self.successor() == Some(next)
    }

    pub fn as_str(self) -> &'static str {
        use RequestState::*;
        match self {
            Received => "received",
            Understanding => "understanding",
            Retrieving => "retrieving",
            Generating => "generating",
            Persisting => "persisting",
            Completed => "completed",
            Failed => "failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
