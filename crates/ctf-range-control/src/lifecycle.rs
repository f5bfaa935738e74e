//! Deployment lifecycle state machine.
//!
//! # State Machine
//!
//! ```text
//!   ┌─────────┐     ┌──────────┐     ┌─────────┐     ┌─────────┐
//!   │ Pending │────▶│ Creating │────▶│ Running │────▶│ Stopped │
//!   └────┬────┘     └────┬─────┘     └────┬────┘     └────┬────┘
//!        │               │                │  (teardown)   │
//!        │               │                ▼               │
//!        │               │         ┌─────────────┐        │
//!        │               │         │ Terminating │◀───────┘
//!        │               │         └──────┬──────┘
//!        │               │                │
//!        ▼               ▼                ▼
//!   ┌────────────────────────┐     ┌────────────┐
//!   │         Error          │────▶│ Terminated │ (via Terminating)
//!   └────────────────────────┘     └────────────┘
//! ```
//!
//! Every non-terminal state may fall into `Error`. An errored deployment
//! can still be torn down so its VM identifier is released.

use ctf_range_store::DeploymentStatus;

use crate::error::{ControlError, Result};

/// Validates a transition and returns the target status if allowed.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(from: DeploymentStatus, to: DeploymentStatus) -> Result<DeploymentStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState { from, to })
    }
}

/// Check if a transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    use DeploymentStatus::{Creating, Error, Pending, Running, Stopped, Terminated, Terminating};

    matches!(
        (from, to),
        (Pending, Creating)
            | (Creating, Running)
            | (Running, Stopped)
            | (Running | Stopped | Error, Terminating)
            | (Terminating, Terminated)
            | (Pending | Creating | Running | Stopped | Terminating, Error)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::{Creating, Error, Pending, Running, Stopped, Terminated, Terminating};

    const ALL: [DeploymentStatus; 7] =
        [Pending, Creating, Running, Stopped, Error, Terminating, Terminated];

    #[test]
    fn happy_path() {
        assert!(is_valid_transition(Pending, Creating));
        assert!(is_valid_transition(Creating, Running));
        assert!(is_valid_transition(Running, Stopped));
        assert!(is_valid_transition(Stopped, Terminating));
        assert!(is_valid_transition(Terminating, Terminated));
    }

    #[test]
    fn error_reachable_from_every_non_terminal_state() {
        for from in [Pending, Creating, Running, Stopped, Terminating] {
            assert!(is_valid_transition(from, Error), "{from:?} -> Error");
        }
        assert!(!is_valid_transition(Terminated, Error));
        assert!(!is_valid_transition(Error, Error));
    }

    #[test]
    fn terminated_is_final() {
        for to in ALL {
            assert!(!is_valid_transition(Terminated, to));
        }
    }

    #[test]
    fn no_going_back() {
        assert!(!is_valid_transition(Running, Creating));
        assert!(!is_valid_transition(Stopped, Running));
        assert!(!is_valid_transition(Creating, Pending));
        assert!(!is_valid_transition(Pending, Running));
    }

    #[test]
    fn validate_reports_both_ends() {
        let err = validate_transition(Stopped, Running).unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidState { from: Stopped, to: Running }
        ));
        assert_eq!(validate_transition(Running, Stopped).unwrap(), Stopped);
    }
}
