//! Pipeline state tracking

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

/// Where a session is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ListeningForWake,
    CollectingUtterance,
    Transcribing,
    Routing,
    Responding,
    Speaking,
    /// Recovering from an adapter failure
    Error,
}

impl PipelineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ListeningForWake => "listening_for_wake",
            Self::CollectingUtterance => "collecting_utterance",
            Self::Transcribing => "transcribing",
            Self::Routing => "routing",
            Self::Responding => "responding",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }

    /// Whether `next` is a legal successor
    ///
    /// Returning to idle is always allowed so shutdown can interrupt any state.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        use PipelineState::{
            CollectingUtterance, Error, Idle, ListeningForWake, Responding, Routing, Speaking,
            Transcribing,
        };

        matches!(
            (self, next),
            (_, Idle)
                | (Idle, ListeningForWake | Routing)
                | (ListeningForWake, CollectingUtterance)
                | (CollectingUtterance, Transcribing)
                | (Transcribing, Routing | Error)
                | (Routing, Responding | Error)
                | (Responding, Speaking | Error)
                | (Speaking, Error)
                | (Error, Speaking)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the single live state of one session and publishes changes
#[derive(Debug)]
pub struct StateMachine {
    current: PipelineState,
    tx: watch::Sender<PipelineState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PipelineState::Idle);
        Self {
            current: PipelineState::Idle,
            tx,
        }
    }

    #[must_use]
    pub const fn current(&self) -> PipelineState {
        self.current
    }

    /// Observe state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.tx.subscribe()
    }

    /// Move to `next`
    ///
    /// Unexpected transitions are applied but logged, so a bug in the loop
    /// shows up in logs rather than wedging the session.
    pub fn transition(&mut self, next: PipelineState) {
        let from = self.current;
        if from == next {
            return;
        }
        if from.can_transition(next) {
            tracing::debug!(from = %from, to = %next, "pipeline state");
        } else {
            tracing::warn!(from = %from, to = %next, "unexpected pipeline transition");
        }
        self.current = next;
        self.tx.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_cycle_is_legal() {
        let cycle = [
            PipelineState::Idle,
            PipelineState::ListeningForWake,
            PipelineState::CollectingUtterance,
            PipelineState::Transcribing,
            PipelineState::Routing,
            PipelineState::Responding,
            PipelineState::Speaking,
            PipelineState::Idle,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_recovery_path() {
        assert!(PipelineState::Transcribing.can_transition(PipelineState::Error));
        assert!(PipelineState::Error.can_transition(PipelineState::Speaking));
        assert!(PipelineState::Error.can_transition(PipelineState::Idle));
        assert!(!PipelineState::ListeningForWake.can_transition(PipelineState::Speaking));
    }

    #[test]
    fn test_subscribers_see_changes() {
        let mut machine = StateMachine::new();
        let rx = machine.subscribe();
        machine.transition(PipelineState::Routing);
        assert_eq!(*rx.borrow(), PipelineState::Routing);
        assert_eq!(machine.current(), PipelineState::Routing);
    }
}
