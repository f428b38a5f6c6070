use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level phases of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No game is running.
    Idle,
    /// A game is in progress.
    Running,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// Still running, never played, stopped by hand or out of time.
    #[default]
    None,
    /// The enemy fell in the final round.
    Victory,
    /// The team ran out of health.
    Defeat,
}

/// Events that can be applied to a [`GameSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Start a game at server time `now`.
    Start { now: u64 },
    /// Stop the running game.
    Stop(Outcome),
    /// Advance to the next round at server time `now`.
    NextRound { now: u64 },
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Phase the session was in when the event was received.
    pub from: SessionPhase,
    /// The rejected event.
    pub event: SessionEvent,
}

/// Live status of the shared game.
///
/// `started == false` always comes with `start_timestamp == 0`; both only
/// change through [`GameSession::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub started: bool,
    pub start_timestamp: u64,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_end_timestamp: Option<u64>,
    pub last_enemy_attack_timestamp: u64,
    pub outcome: Outcome,
}

impl Default for GameSession {
    fn default() -> Self {
        Self {
            started: false,
            start_timestamp: 0,
            round: 1,
            round_end_timestamp: None,
            last_enemy_attack_timestamp: 0,
            outcome: Outcome::None,
        }
    }
}

impl GameSession {
    pub fn phase(&self) -> SessionPhase {
        if self.started {
            SessionPhase::Running
        } else {
            SessionPhase::Idle
        }
    }

    /// Whether the team is between rounds.
    pub fn in_intermission(&self) -> bool {
        self.started && self.round_end_timestamp.is_some()
    }

    /// Apply an event, returning the resulting phase.
    ///
    /// Stopping an idle session is accepted and changes nothing, so a stale
    /// controller repeating a stop is harmless.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;

        match event {
            SessionEvent::Start { now } => {
                self.started = true;
                self.start_timestamp = now;
                self.round = 1;
                self.round_end_timestamp = None;
                self.last_enemy_attack_timestamp = now;
                self.outcome = Outcome::None;
            }
            SessionEvent::Stop(outcome) => {
                if self.started {
                    self.started = false;
                    self.start_timestamp = 0;
                    self.round_end_timestamp = None;
                    self.outcome = outcome;
                }
            }
            SessionEvent::NextRound { now } => {
                self.round += 1;
                self.round_end_timestamp = None;
                self.last_enemy_attack_timestamp = now;
            }
        }

        Ok(next)
    }

    /// Milliseconds since the game started, zero when idle.
    pub fn elapsed(&self, now: u64) -> u64 {
        if self.started {
            now.saturating_sub(self.start_timestamp)
        } else {
            0
        }
    }

    /// Whether a running game outlived `duration_ms`.
    pub fn is_expired(&self, now: u64, duration_ms: u64) -> bool {
        self.started && self.elapsed(now) > duration_ms
    }

    /// Stop the game once it outlived `duration_ms`. Returns whether it stopped.
    pub fn expire_if_elapsed(&mut self, now: u64, duration_ms: u64) -> bool {
        if !self.is_expired(now, duration_ms) {
            return false;
        }
        self.apply(SessionEvent::Stop(Outcome::None)).is_ok()
    }

    /// Milliseconds left before the game runs out of time.
    pub fn remaining(&self, now: u64, duration_ms: u64) -> u64 {
        if self.started {
            duration_ms.saturating_sub(self.elapsed(now))
        } else {
            0
        }
    }

    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self.phase(), event) {
            (SessionPhase::Idle, SessionEvent::Start { .. }) => SessionPhase::Running,
            (_, SessionEvent::Stop(_)) => SessionPhase::Idle,
            (SessionPhase::Running, SessionEvent::NextRound { .. }) => SessionPhase::Running,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_MINUTE: u64 = 60_000;

    #[test]
    fn start_records_server_time() {
        let mut session = GameSession::default();
        assert_eq!(
            session.apply(SessionEvent::Start { now: 5_000 }).unwrap(),
            SessionPhase::Running
        );
        assert!(session.started);
        assert_eq!(session.start_timestamp, 5_000);
        assert_eq!(session.round, 1);
    }

    #[test]
    fn starting_twice_is_rejected() {
        let mut session = GameSession::default();
        session.apply(SessionEvent::Start { now: 0 }).unwrap();
        let err = session.apply(SessionEvent::Start { now: 10 }).unwrap_err();
        assert_eq!(err.from, SessionPhase::Running);
        assert_eq!(session.start_timestamp, 0);
    }

    #[test]
    fn stop_clears_start_timestamp_and_is_idempotent() {
        let mut session = GameSession::default();
        session.apply(SessionEvent::Start { now: 1_000 }).unwrap();
        session.apply(SessionEvent::Stop(Outcome::Defeat)).unwrap();
        let stopped = session.clone();
        assert_eq!((stopped.started, stopped.start_timestamp), (false, 0));

        session.apply(SessionEvent::Stop(Outcome::Victory)).unwrap();
        assert_eq!(session, stopped);
    }

    #[test]
    fn game_expires_only_after_its_duration() {
        let mut session = GameSession::default();
        session.apply(SessionEvent::Start { now: 0 }).unwrap();

        assert!(!session.expire_if_elapsed(ONE_MINUTE, ONE_MINUTE));
        assert!(session.expire_if_elapsed(61_000, ONE_MINUTE));
        assert!(!session.started);

        let stopped = session.clone();
        assert!(!session.expire_if_elapsed(120_000, ONE_MINUTE));
        assert_eq!(session, stopped);
    }

    #[test]
    fn next_round_requires_a_running_game() {
        let mut session = GameSession::default();
        assert!(session.apply(SessionEvent::NextRound { now: 0 }).is_err());

        session.apply(SessionEvent::Start { now: 0 }).unwrap();
        session.round_end_timestamp = Some(4_000);
        session.apply(SessionEvent::NextRound { now: 5_000 }).unwrap();
        assert_eq!(session.round, 2);
        assert_eq!(session.round_end_timestamp, None);
        assert_eq!(session.last_enemy_attack_timestamp, 5_000);
    }

    #[test]
    fn remaining_time_counts_down() {
        let mut session = GameSession::default();
        assert_eq!(session.remaining(10, ONE_MINUTE), 0);
        session.apply(SessionEvent::Start { now: 1_000 }).unwrap();
        assert_eq!(session.remaining(31_000, ONE_MINUTE), 30_000);
    }
}
