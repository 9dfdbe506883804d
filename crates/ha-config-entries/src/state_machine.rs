//! Config Entry State Machine
//!
//! Enforces valid state transitions for the ConfigEntry lifecycle:
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (re-pair, reload)
//!                            ↘ SetupRetry → SetupInProgress (device came back)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use crate::entry::ConfigEntryState;
use std::time::Duration;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Attempt a transition to a new state.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = matches!(
            (self, to),
            (NotLoaded, SetupInProgress)
                | (SetupInProgress, Loaded)
                | (SetupInProgress, SetupError)
                | (SetupInProgress, SetupRetry)
                | (SetupError, SetupInProgress)
                | (SetupError, UnloadInProgress)
                | (SetupRetry, SetupInProgress)
                | (SetupRetry, UnloadInProgress)
                | (Loaded, UnloadInProgress)
                | (UnloadInProgress, NotLoaded)
                | (UnloadInProgress, FailedUnload)
        );

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }

    fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
        use ConfigEntryState::*;

        match (from, to) {
            (FailedUnload, _) => "FailedUnload is terminal - entry cannot recover",
            (SetupInProgress, NotLoaded) => {
                "Setup in progress - must complete before returning to NotLoaded"
            }
            (UnloadInProgress, Loaded) => "Unload in progress - cannot go back to Loaded",
            (NotLoaded, Loaded) => "Cannot jump to Loaded - must go through SetupInProgress",
            (Loaded, NotLoaded) => "Cannot jump to NotLoaded - must go through UnloadInProgress",
            (Loaded, SetupInProgress) => "Already loaded - unload first before re-setup",
            _ => "Invalid state transition",
        }
    }
}

/// Delay before retrying setup of an unreachable device.
///
/// `2^min(tries, 4) * 5` seconds plus up to 100ms of jitter: 5s, 10s, 20s,
/// 40s, then 80s for every further attempt.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base_delay = 2_u32.pow(tries.min(4)) * 5;
    let jitter = rand::random::<f64>() * 0.1;
    Duration::from_secs_f64(base_delay as f64 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    #[test]
    fn test_setup_paths() {
        assert!(NotLoaded.can_transition_to(SetupInProgress));
        assert!(SetupInProgress.can_transition_to(Loaded));
        assert!(SetupInProgress.can_transition_to(SetupError));
        assert!(SetupInProgress.can_transition_to(SetupRetry));
        assert!(SetupError.can_transition_to(SetupInProgress));
        assert!(SetupRetry.can_transition_to(SetupInProgress));
    }

    #[test]
    fn test_unload_paths() {
        assert!(Loaded.can_transition_to(UnloadInProgress));
        assert!(SetupError.can_transition_to(UnloadInProgress));
        assert!(SetupRetry.can_transition_to(UnloadInProgress));
        assert!(UnloadInProgress.can_transition_to(NotLoaded));
        assert!(UnloadInProgress.can_transition_to(FailedUnload));
    }

    #[test]
    fn test_no_shortcuts() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        assert_eq!(err.from, NotLoaded);
        assert_eq!(err.to, Loaded);
        assert!(err.reason.contains("SetupInProgress"));

        assert!(!Loaded.can_transition_to(NotLoaded));
        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!SetupInProgress.can_transition_to(NotLoaded));
        assert!(!UnloadInProgress.can_transition_to(Loaded));
        assert!(!NotLoaded.can_transition_to(UnloadInProgress));
    }

    #[test]
    fn test_failed_unload_is_terminal() {
        for to in [
            NotLoaded,
            SetupInProgress,
            Loaded,
            SetupError,
            SetupRetry,
            UnloadInProgress,
        ] {
            let err = FailedUnload.try_transition(to).unwrap_err();
            assert!(err.reason.contains("terminal"));
        }
    }

    #[test]
    fn test_error_display() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NotLoaded"));
        assert!(msg.contains("Loaded"));
    }

    #[test]
    fn test_retry_delay_exponential_backoff() {
        let secs = |tries| calculate_retry_delay(tries).as_secs_f64();

        assert!((5.0..5.2).contains(&secs(0)));
        assert!((10.0..10.2).contains(&secs(1)));
        assert!((20.0..20.2).contains(&secs(2)));
        assert!((40.0..40.2).contains(&secs(3)));
        assert!((80.0..80.2).contains(&secs(4)));
        assert!((80.0..80.2).contains(&secs(9)));
    }

    #[test]
    fn test_unreachable_then_recovered_path() {
        let state = NotLoaded
            .try_transition(SetupInProgress)
            .and_then(|s| s.try_transition(SetupRetry))
            .and_then(|s| s.try_transition(SetupInProgress))
            .and_then(|s| s.try_transition(Loaded))
            .unwrap();
        assert_eq!(state, Loaded);
    }
}
