//! # Terminal Payment State Machine
//!
//! Pure transition rules for cloud-to-device card payments. The poll loop
//! that drives these transitions lives in `tender-payments`; this module
//! only decides which moves are legal.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Idle ──Push──► Initiated ──Acknowledged──► Pending ◄──┐              │
//! │                                                 │  │     │ Poll(pending)│
//! │                                                 │  └─────┘              │
//! │                     ┌───────────────┬───────────┼────────────┐          │
//! │                     ▼               ▼           ▼            ▼          │
//! │                 Approved        Declined     TimedOut     Cancelled     │
//! │              Poll(approved)  Poll(declined)  Exhausted     Cancel       │
//! │                                                 │                       │
//! │                                                 └──Resume──► Pending    │
//! │                                                                         │
//! │  TimedOut is not a verdict: the customer may still finish on the       │
//! │  device, so it can be resumed by back-office polling. Nothing here     │
//! │  ever cancels automatically.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Idle,
    Initiated,
    Pending,
    Approved,
    Declined,
    TimedOut,
    Cancelled,
}

impl TerminalState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Idle => "idle",
            TerminalState::Initiated => "initiated",
            TerminalState::Pending => "pending",
            TerminalState::Approved => "approved",
            TerminalState::Declined => "declined",
            TerminalState::TimedOut => "timed_out",
            TerminalState::Cancelled => "cancelled",
        }
    }

    /// Approved, Declined and Cancelled never change again.
    pub const fn is_final(&self) -> bool {
        matches!(
            self,
            TerminalState::Approved | TerminalState::Declined | TerminalState::Cancelled
        )
    }

    /// Applies an event, returning the next state or the rejected move.
    pub fn apply(self, event: TerminalEvent) -> Result<TerminalState, CoreError> {
        use TerminalEvent as E;
        use TerminalState as S;

        let next = match (self, event) {
            (S::Idle, E::Push) => S::Initiated,
            (S::Initiated, E::Acknowledged) => S::Pending,
            (S::Pending, E::Poll(result)) => {
                if result.approved {
                    S::Approved
                } else if result.declined {
                    S::Declined
                } else {
                    S::Pending
                }
            }
            (S::Pending, E::Exhausted) => S::TimedOut,
            (S::Pending, E::Cancel) => S::Cancelled,
            (S::TimedOut, E::Resume) => S::Pending,
            (state, event) => {
                return Err(CoreError::InvalidTerminalTransition {
                    state: state.to_string(),
                    event: event.name().to_string(),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

/// One status-check response from the terminal provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PollResult {
    pub pending: bool,
    pub declined: bool,
    pub approved: bool,
}

impl PollResult {
    pub const PENDING: PollResult = PollResult {
        pending: true,
        declined: false,
        approved: false,
    };
    pub const APPROVED: PollResult = PollResult {
        pending: false,
        declined: false,
        approved: true,
    };
    pub const DECLINED: PollResult = PollResult {
        pending: false,
        declined: true,
        approved: false,
    };

    /// Approved or declined.
    pub const fn is_definitive(&self) -> bool {
        self.approved || self.declined
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Payment pushed to the device endpoint.
    Push,
    /// Provider returned a reference to poll.
    Acknowledged,
    Poll(PollResult),
    /// Poll budget spent without a definitive answer.
    Exhausted,
    /// Cashier aborted.
    Cancel,
    /// Back-office polling picked a timed-out session back up.
    Resume,
}

impl TerminalEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            TerminalEvent::Push => "push",
            TerminalEvent::Acknowledged => "acknowledged",
            TerminalEvent::Poll(_) => "poll",
            TerminalEvent::Exhausted => "exhausted",
            TerminalEvent::Cancel => "cancel",
            TerminalEvent::Resume => "resume",
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> TerminalState {
        TerminalState::Idle
            .apply(TerminalEvent::Push)
            .and_then(|s| s.apply(TerminalEvent::Acknowledged))
            .unwrap()
    }

    #[test]
    fn test_happy_path() {
        let state = pending();
        assert_eq!(state, TerminalState::Pending);

        let state = state.apply(TerminalEvent::Poll(PollResult::PENDING)).unwrap();
        assert_eq!(state, TerminalState::Pending);

        let state = state.apply(TerminalEvent::Poll(PollResult::APPROVED)).unwrap();
        assert_eq!(state, TerminalState::Approved);
        assert!(state.is_final());
    }

    #[test]
    fn test_declined_and_timeout() {
        assert_eq!(
            pending().apply(TerminalEvent::Poll(PollResult::DECLINED)).unwrap(),
            TerminalState::Declined
        );

        let timed_out = pending().apply(TerminalEvent::Exhausted).unwrap();
        assert_eq!(timed_out, TerminalState::TimedOut);
        assert!(!timed_out.is_final());
        assert_eq!(
            timed_out.apply(TerminalEvent::Resume).unwrap(),
            TerminalState::Pending
        );
    }

    #[test]
    fn test_cancel_only_from_pending() {
        assert_eq!(
            pending().apply(TerminalEvent::Cancel).unwrap(),
            TerminalState::Cancelled
        );

        for state in [
            TerminalState::Idle,
            TerminalState::Initiated,
            TerminalState::Approved,
            TerminalState::Declined,
            TerminalState::TimedOut,
            TerminalState::Cancelled,
        ] {
            assert!(
                state.apply(TerminalEvent::Cancel).is_err(),
                "cancel should be rejected from {state}"
            );
        }
    }

    #[test]
    fn test_final_states_reject_polls() {
        let err = TerminalState::Cancelled
            .apply(TerminalEvent::Poll(PollResult::APPROVED))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTerminalTransition { .. }));
    }
}
