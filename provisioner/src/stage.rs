//! Per-entity reconciliation progress.

use std::fmt;
use tracing::debug;

/// Progress of reconciling a single entity.
///
/// ```txt
/// Pending --+--> Creating --+--> Done
///           |               |
///           +--> Verifying -+--> Fatal
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Creating,
    Verifying,
    Done,
    Fatal,
}

impl Stage {
    /// Returns true if `next` may follow `self`.
    pub fn allows(&self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Pending, Stage::Creating)
                | (Stage::Pending, Stage::Verifying)
                | (Stage::Pending, Stage::Fatal)
                | (Stage::Creating, Stage::Done)
                | (Stage::Creating, Stage::Fatal)
                | (Stage::Verifying, Stage::Done)
                | (Stage::Verifying, Stage::Fatal)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Fatal)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Creating => "creating",
            Stage::Verifying => "verifying",
            Stage::Done => "done",
            Stage::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Tracks the [Stage] of one entity and logs every transition.
#[derive(Debug)]
pub struct Tracker {
    entity: String,
    stage: Stage,
}

impl Tracker {
    pub fn new(entity: impl fmt::Display) -> Self {
        Self {
            entity: entity.to_string(),
            stage: Stage::Pending,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `next`.
    ///
    /// Transitions are checked against [Stage::allows] in debug builds only.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the transition is not allowed.
    pub fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.allows(next),
            "invalid transition for {}: {} -> {}",
            self.entity,
            self.stage,
            next
        );
        debug!(entity = self.entity.as_str(), from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }

    /// Record the outcome of the current step, moving to [Stage::Fatal] on error.
    pub fn settle<T, E>(&mut self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.advance(Stage::Done),
            Err(_) => self.advance(Stage::Fatal),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut tracker = Tracker::new("a.localnet");
        assert_eq!(tracker.stage(), Stage::Pending);
        tracker.advance(Stage::Creating);
        let result: Result<(), ()> = tracker.settle(Ok(()));
        assert!(result.is_ok());
        assert_eq!(tracker.stage(), Stage::Done);
        assert!(tracker.stage().is_terminal());
    }

    #[test]
    fn test_settle_error() {
        let mut tracker = Tracker::new("a.localnet");
        tracker.advance(Stage::Verifying);
        let result: Result<(), &str> = tracker.settle(Err("mismatch"));
        assert_eq!(result, Err("mismatch"));
        assert_eq!(tracker.stage(), Stage::Fatal);
    }

    #[test]
    fn test_terminal_allows_nothing() {
        for next in [Stage::Pending, Stage::Creating, Stage::Verifying, Stage::Done, Stage::Fatal] {
            assert!(!Stage::Done.allows(next));
            assert!(!Stage::Fatal.allows(next));
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid transition")]
    fn test_terminal_is_final() {
        let mut tracker = Tracker::new("a.localnet");
        tracker.advance(Stage::Fatal);
        tracker.advance(Stage::Creating);
    }
}
