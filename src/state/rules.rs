//! Condition-driven transitions owned by the global controller.
//!
//! Every rule re-reads the state it guards on, so evaluating the same tick
//! twice (a stale controller racing a freshly elected one) is a no-op.

use crate::state::{
    combat::{Battle, DamageReport},
    session::{GameSession, Outcome, SessionEvent},
    stores::GameSettings,
};

/// What a controller tick changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// The game outlived its duration and stopped.
    Expired,
    /// The team fell and the game stopped.
    Defeat,
    /// The final enemy fell and the game stopped.
    Victory,
    /// The enemy fell; the intermission ends at the given server time.
    RoundCleared { intermission_ends: u64 },
    /// A new round began.
    RoundStarted { round: u32 },
    /// The enemy hit the team.
    EnemyAttack(DamageReport),
}

/// Evaluate every controller rule once against `now`.
pub fn controller_tick(
    settings: &GameSettings,
    session: &mut GameSession,
    battle: &mut Battle,
    now: u64,
) -> Option<TickEvent> {
    if !session.started {
        return None;
    }

    if session.expire_if_elapsed(now, settings.game_duration_ms()) {
        return Some(TickEvent::Expired);
    }

    if battle.team.is_defeated() {
        return stop(session, Outcome::Defeat).then_some(TickEvent::Defeat);
    }

    if let Some(ends) = session.round_end_timestamp {
        if now < ends {
            return None;
        }
        return next_round(settings, session, battle, now)
            .then_some(TickEvent::RoundStarted { round: session.round });
    }

    if battle.enemy.is_defeated() {
        if session.round >= settings.rounds_to_win {
            return stop(session, Outcome::Victory).then_some(TickEvent::Victory);
        }
        let intermission_ends = now.saturating_add(settings.round_intermission_ms);
        session.round_end_timestamp = Some(intermission_ends);
        return Some(TickEvent::RoundCleared { intermission_ends });
    }

    if now.saturating_sub(session.last_enemy_attack_timestamp) >= settings.enemy_attack_interval_ms
    {
        session.last_enemy_attack_timestamp = now;
        let report = battle.enemy_attack();
        if battle.team.is_defeated() {
            stop(session, Outcome::Defeat);
        }
        return Some(TickEvent::EnemyAttack(report));
    }

    None
}

/// Advance `session` and `battle` to the next round together.
pub fn next_round(
    settings: &GameSettings,
    session: &mut GameSession,
    battle: &mut Battle,
    now: u64,
) -> bool {
    let previous_round = session.round;
    if session.apply(SessionEvent::NextRound { now }).is_err() {
        return false;
    }
    battle.next_round(previous_round, settings.enemy_health_step);
    true
}

fn stop(session: &mut GameSession, outcome: Outcome) -> bool {
    session.apply(SessionEvent::Stop(outcome)).is_ok()
}
