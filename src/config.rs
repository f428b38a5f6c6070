//! Application-level configuration loading: timings, combat stats and the demo simulation.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::{combat::CombatStats, stores::GameSettings};

/// Default location on disk where the binary looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/party-sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PARTY_SYNC_CONFIG_PATH";

const DEFAULT_TEAM: CombatStats = CombatStats {
    max_health: 100,
    base_armor: 0,
    base_damage: 10,
};
const DEFAULT_ENEMY: CombatStats = CombatStats {
    max_health: 100,
    base_armor: 0,
    base_damage: 8,
};

#[derive(Debug, Clone, PartialEq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Cadence of the server time heartbeat driving the controller.
    pub server_time_tick: Duration,
    /// Initial game length in minutes.
    pub default_game_duration_minutes: u32,
    pub round_intermission_ms: u64,
    pub enemy_attack_interval_ms: u64,
    /// Extra enemy max health per round already played.
    pub round_enemy_health_step: u32,
    pub rounds_to_win: u32,
    pub team: CombatStats,
    pub enemy: CombatStats,
    /// Players spawned by the demo binary.
    pub simulated_clients: usize,
    /// How long the demo binary runs.
    pub simulation: Duration,
    /// Directory for device-local stores; `None` keeps them in memory.
    pub local_store_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        clients = app_config.simulated_clients,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Initial value of the shared settings store.
    pub fn game_settings(&self) -> GameSettings {
        GameSettings {
            game_duration: self.default_game_duration_minutes,
            round_intermission_ms: self.round_intermission_ms,
            enemy_attack_interval_ms: self.enemy_attack_interval_ms,
            enemy_health_step: self.round_enemy_health_step,
            rounds_to_win: self.rounds_to_win,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    server_time_tick_ms: u64,
    default_game_duration_minutes: u32,
    round_intermission_ms: u64,
    enemy_attack_interval_ms: u64,
    round_enemy_health_step: u32,
    rounds_to_win: u32,
    team: RawCombatStats,
    enemy: RawCombatStats,
    simulated_clients: usize,
    simulation_seconds: u64,
    local_store_dir: Option<PathBuf>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            server_time_tick_ms: 1_000,
            default_game_duration_minutes: 10,
            round_intermission_ms: 5_000,
            enemy_attack_interval_ms: 3_000,
            round_enemy_health_step: 12,
            rounds_to_win: 5,
            team: DEFAULT_TEAM.into(),
            enemy: DEFAULT_ENEMY.into(),
            simulated_clients: 3,
            simulation_seconds: 90,
            local_store_dir: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            server_time_tick: Duration::from_millis(value.server_time_tick_ms.max(1)),
            default_game_duration_minutes: value.default_game_duration_minutes.max(1),
            round_intermission_ms: value.round_intermission_ms,
            enemy_attack_interval_ms: value.enemy_attack_interval_ms,
            round_enemy_health_step: value.round_enemy_health_step,
            rounds_to_win: value.rounds_to_win.max(1),
            team: value.team.into(),
            enemy: value.enemy.into(),
            simulated_clients: value.simulated_clients,
            simulation: Duration::from_secs(value.simulation_seconds),
            local_store_dir: value.local_store_dir,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a combatant's starting stats.
struct RawCombatStats {
    max_health: u32,
    #[serde(default)]
    base_armor: u32,
    base_damage: u32,
}

impl From<CombatStats> for RawCombatStats {
    fn from(value: CombatStats) -> Self {
        Self {
            max_health: value.max_health,
            base_armor: value.base_armor,
            base_damage: value.base_damage,
        }
    }
}

impl From<RawCombatStats> for CombatStats {
    fn from(value: RawCombatStats) -> Self {
        Self {
            max_health: value.max_health.max(1),
            base_armor: value.base_armor,
            base_damage: value.base_damage,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
