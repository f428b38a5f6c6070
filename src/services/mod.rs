/// Heartbeat loop running controller-only work for an elected client.
pub mod controller;
/// Deterministic leader election over a presence source.
pub mod election;
/// Game session, combat actions and controller rules.
pub mod game_service;
/// Lobby registry, membership and per-lobby host election.
pub mod lobby_service;
/// Player profile, view and online status.
pub mod player_service;
/// Shared game settings and host flags.
pub mod settings_service;
