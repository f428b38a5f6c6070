use serde::{Deserialize, Serialize};

/// Health restored by the heal reward.
pub const REWARD_HEAL: u32 = 10;
/// Armor granted at the start of the next round by the armor reward.
pub const REWARD_ARMOR: u32 = 10;

/// Starting stats of a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatStats {
    pub max_health: u32,
    pub base_armor: u32,
    pub base_damage: u32,
}

/// Outcome of a single hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DamageReport {
    /// Damage soaked up by armor.
    pub absorbed: u32,
    /// Damage that went through to health.
    pub dealt: u32,
}

/// Armor-first damage law: armor soaks as much as it can, the rest hits
/// health, and neither goes below zero. Returns `(health, armor)`.
pub fn resolve_damage(health: u32, armor: u32, incoming: u32) -> (u32, u32) {
    let absorbed = armor.min(incoming);
    let remaining = incoming - absorbed;
    (health.saturating_sub(remaining), armor - absorbed)
}

/// A combatant: the players' team or the enemy.
///
/// `damage` and `armor` are cached, so every field is private and each
/// mutator keeps them in line with their inputs: `damage` is always
/// `base_damage + strength`, and `health` stays within `0..=max_health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatEntity {
    health: u32,
    max_health: u32,
    armor: u32,
    base_armor: u32,
    strength: u32,
    dexterity: u32,
    base_damage: u32,
    damage: u32,
}

impl CombatEntity {
    pub fn new(stats: CombatStats) -> Self {
        Self {
            health: stats.max_health,
            max_health: stats.max_health,
            armor: stats.base_armor,
            base_armor: stats.base_armor,
            strength: 0,
            dexterity: 0,
            base_damage: stats.base_damage,
            damage: stats.base_damage,
        }
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    pub fn armor(&self) -> u32 {
        self.armor
    }

    pub fn base_armor(&self) -> u32 {
        self.base_armor
    }

    pub fn strength(&self) -> u32 {
        self.strength
    }

    pub fn dexterity(&self) -> u32 {
        self.dexterity
    }

    pub fn base_damage(&self) -> u32 {
        self.base_damage
    }

    pub fn damage(&self) -> u32 {
        self.damage
    }

    pub fn is_defeated(&self) -> bool {
        self.health == 0
    }

    /// Apply an incoming hit, armor first.
    pub fn take_damage(&mut self, incoming: u32) -> DamageReport {
        let (health, armor) = resolve_damage(self.health, self.armor, incoming);
        let report = DamageReport {
            absorbed: self.armor - armor,
            dealt: self.health - health,
        };
        self.health = health;
        self.armor = armor;
        report
    }

    /// Restore health, capped at `max_health`. Returns the amount healed.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let healed = amount.min(self.max_health.saturating_sub(self.health));
        self.health += healed;
        healed
    }

    pub fn add_armor(&mut self, amount: u32) {
        self.armor = self.armor.saturating_add(amount);
    }

    /// Train strength; damage follows immediately.
    pub fn add_strength(&mut self, delta: u32) {
        self.strength = self.strength.saturating_add(delta);
        self.recalculate_damage();
    }

    /// Train dexterity; every point also grants a point of armor.
    pub fn add_dexterity(&mut self, delta: u32) {
        self.dexterity = self.dexterity.saturating_add(delta);
        self.armor = self.armor.saturating_add(delta);
    }

    /// Drop the bonuses that only last for one round.
    pub fn reset_round_bonuses(&mut self) {
        self.strength = 0;
        self.dexterity = 0;
        self.armor = self.base_armor;
        self.recalculate_damage();
    }

    /// Grow `max_health` by `step` and refill health.
    pub fn scale_max_health(&mut self, step: u32) {
        self.max_health = self.max_health.saturating_add(step);
        self.health = self.max_health;
    }

    fn recalculate_damage(&mut self) {
        self.damage = self.base_damage.saturating_add(self.strength);
    }
}

/// Reward picked by the team between rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reward {
    Heal,
    Armor,
    Skip,
}

/// Combat state shared by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    pub team: CombatEntity,
    pub enemy: CombatEntity,
    /// Reward applied when the next round starts.
    pub pending_reward: Option<Reward>,
    /// Round whose intermission reward has been claimed already.
    pub reward_claimed_round: Option<u32>,
}

impl Battle {
    pub fn new(team: CombatStats, enemy: CombatStats) -> Self {
        Self {
            team: CombatEntity::new(team),
            enemy: CombatEntity::new(enemy),
            pending_reward: None,
            reward_claimed_round: None,
        }
    }

    /// Team strikes the enemy with its current damage.
    pub fn team_attack(&mut self) -> DamageReport {
        let damage = self.team.damage();
        self.enemy.take_damage(damage)
    }

    /// Enemy strikes the team with its current damage.
    pub fn enemy_attack(&mut self) -> DamageReport {
        let damage = self.enemy.damage();
        self.team.take_damage(damage)
    }

    /// Claim the reward for `round`. Only the first claim per round counts.
    pub fn claim_reward(&mut self, round: u32, reward: Reward) -> bool {
        if self.reward_claimed_round == Some(round) {
            return false;
        }
        self.reward_claimed_round = Some(round);
        match reward {
            Reward::Heal => {
                self.team.heal(REWARD_HEAL);
            }
            Reward::Armor => self.pending_reward = Some(Reward::Armor),
            Reward::Skip => {}
        }
        true
    }

    /// Scale the enemy for the round after `previous_round`, reset the team's
    /// round bonuses and apply any pending reward.
    pub fn next_round(&mut self, previous_round: u32, health_step: u32) {
        self.enemy
            .scale_max_health(previous_round.saturating_mul(health_step));
        self.enemy.reset_round_bonuses();
        self.team.reset_round_bonuses();
        if let Some(Reward::Armor) = self.pending_reward.take() {
            self.team.add_armor(REWARD_ARMOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(max_health: u32, base_armor: u32, base_damage: u32) -> CombatStats {
        CombatStats {
            max_health,
            base_armor,
            base_damage,
        }
    }

    #[test]
    fn armor_absorbs_before_health() {
        let mut team = CombatEntity::new(stats(100, 50, 10));
        let report = team.take_damage(70);
        assert_eq!((team.armor(), team.health()), (0, 80));
        assert_eq!(report, DamageReport { absorbed: 50, dealt: 20 });
    }

    #[test]
    fn damage_law_holds_across_inputs() {
        for health in [0, 1, 30, 100] {
            for armor in [0, 5, 50] {
                for incoming in [0, 4, 5, 60, 500] {
                    let (health_after, armor_after) = resolve_damage(health, armor, incoming);
                    assert_eq!(armor_after, armor.saturating_sub(incoming));
                    assert_eq!(
                        health_after,
                        health.saturating_sub(incoming.saturating_sub(armor))
                    );
                    assert!(health_after <= health);
                }
            }
        }
    }

    #[test]
    fn strength_keeps_damage_in_sync() {
        let mut team = CombatEntity::new(stats(100, 0, 10));
        team.add_strength(3);
        team.add_strength(2);
        assert_eq!(team.damage(), 15);

        team.reset_round_bonuses();
        assert_eq!((team.strength(), team.damage()), (0, 10));
    }

    #[test]
    fn dexterity_grants_armor_until_round_reset() {
        let mut team = CombatEntity::new(stats(100, 2, 10));
        team.add_dexterity(4);
        assert_eq!(team.armor(), 6);
        team.reset_round_bonuses();
        assert_eq!((team.dexterity(), team.armor()), (0, 2));
    }

    #[test]
    fn heal_is_capped_at_max_health() {
        let mut team = CombatEntity::new(stats(100, 0, 10));
        team.take_damage(15);
        assert_eq!(team.heal(40), 15);
        assert_eq!(team.health(), 100);
    }

    #[test]
    fn next_round_scales_enemy_from_previous_round() {
        let mut battle = Battle::new(stats(100, 0, 10), stats(100, 0, 8));
        battle.enemy.take_damage(100);
        battle.next_round(1, 12);
        assert_eq!((battle.enemy.health(), battle.enemy.max_health()), (112, 112));
    }

    #[test]
    fn armor_reward_applies_once_next_round_starts() {
        let mut battle = Battle::new(stats(100, 0, 10), stats(100, 0, 8));
        assert!(battle.claim_reward(1, Reward::Armor));
        assert!(!battle.claim_reward(1, Reward::Heal));
        assert_eq!(battle.team.armor(), 0);

        battle.next_round(1, 12);
        assert_eq!(battle.team.armor(), REWARD_ARMOR);
        assert_eq!(battle.pending_reward, None);
    }
}
