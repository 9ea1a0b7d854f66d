//! The state machine of one pipeline invocation.
//!
//! `Idle → Transforming → Copying → Installing → [Slimming] → Packaging →
//! Finalizing → Done`, with `Failed` reachable from every non-terminal state.
//! Tasks of earlier phases may still run while a later phase is active (a
//! parallel group mixes transform and copy work), so the tracker only ever
//! moves forward and records the furthest phase reached.

use std::fmt;

/// Pipeline phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Idle,
    Transforming,
    Copying,
    Installing,
    Slimming,
    Packaging,
    Finalizing,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Transforming => "transforming",
            Phase::Copying => "copying",
            Phase::Installing => "installing",
            Phase::Slimming => "slimming",
            Phase::Packaging => "packaging",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Phase,
    history: Vec<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: Phase::Idle,
            history: vec![Phase::Idle],
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Every phase entered so far, starting with `Idle`.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    /// Moves to `phase` if it lies ahead of the current one. Returns whether
    /// the tracker moved. Terminal states are never left, and `Done`/`Failed`
    /// can only be reached through [`finish`](Self::finish) and
    /// [`fail`](Self::fail).
    pub fn enter(&mut self, phase: Phase) -> bool {
        if self.current.is_terminal() || phase.is_terminal() || phase <= self.current {
            return false;
        }

        tracing::debug!(from = %self.current, to = %phase, "pipeline phase");
        self.push(phase);
        true
    }

    pub fn finish(&mut self) -> bool {
        if self.current.is_terminal() {
            return false;
        }
        self.push(Phase::Done);
        true
    }

    pub fn fail(&mut self) -> bool {
        if self.current.is_terminal() {
            return false;
        }
        self.push(Phase::Failed);
        true
    }

    fn push(&mut self, phase: Phase) {
        self.current = phase;
        self.history.push(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_with_optional_slimming_skipped() {
        let mut tracker = PhaseTracker::default();

        for phase in [
            Phase::Transforming,
            Phase::Copying,
            Phase::Installing,
            Phase::Packaging,
            Phase::Finalizing,
        ] {
            assert!(tracker.enter(phase));
        }
        assert!(tracker.finish());

        assert_eq!(tracker.current(), Phase::Done);
        assert_eq!(
            tracker.history(),
            [
                Phase::Idle,
                Phase::Transforming,
                Phase::Copying,
                Phase::Installing,
                Phase::Packaging,
                Phase::Finalizing,
                Phase::Done,
            ]
        );
    }

    #[test]
    fn never_moves_backwards() {
        let mut tracker = PhaseTracker::default();

        assert!(tracker.enter(Phase::Copying));
        assert!(!tracker.enter(Phase::Transforming));
        assert!(!tracker.enter(Phase::Copying));

        assert_eq!(tracker.current(), Phase::Copying);
    }

    #[test]
    fn failed_is_reachable_from_any_active_state_and_final() {
        let mut tracker = PhaseTracker::default();
        assert!(tracker.fail());
        assert_eq!(tracker.current(), Phase::Failed);

        let mut tracker = PhaseTracker::default();
        tracker.enter(Phase::Installing);
        assert!(tracker.fail());

        assert!(!tracker.enter(Phase::Packaging));
        assert!(!tracker.finish());
        assert!(!tracker.fail());
        assert_eq!(tracker.current(), Phase::Failed);
    }

    #[test]
    fn terminal_states_are_not_entered_directly() {
        let mut tracker = PhaseTracker::default();
        assert!(!tracker.enter(Phase::Done));
        assert!(!tracker.enter(Phase::Failed));
        assert_eq!(tracker.current(), Phase::Idle);
    }
}
