//! Turn-based combat sub-machine
//!
//! Initiating -> PlayerTurn <-> EnemyTurn -> Resolved. Damage comes from a
//! pluggable [`StrikeResolver`]; health is floored at zero.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of a combat encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatPhase {
    Initiating,
    PlayerTurn,
    EnemyTurn,
    Resolved,
}

/// Health and stats of one side of the fight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub name: String,
    pub health: u32,
    pub max_health: u32,
    pub attack: u32,
    pub defense: u32,
}

impl Combatant {
    pub fn is_down(&self) -> bool {
        self.health == 0
    }
}

/// Which side won a resolved combat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Victor {
    Player,
    Enemy,
}

/// What a single `next_turn` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnReport {
    Strike {
        attacker: String,
        defender: String,
        damage: u32,
        remaining: u32,
    },
    Resolved {
        victor: Victor,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("Combat has already started")]
    AlreadyStarted,
    #[error("Combat has not started yet")]
    NotStarted,
    #[error("Combat is already resolved")]
    AlreadyResolved,
}

/// Computes the damage of one strike
pub trait StrikeResolver: Send + Sync {
    fn damage(&mut self, attacker: &Combatant, defender: &Combatant) -> u32;
}

/// Bounded random damage: a roll in `1..=attack`, reduced by half the
/// defender's defense, never below 1.
pub struct DiceResolver {
    rng: StdRng,
}

impl DiceResolver {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    #[allow(dead_code)] // Reproducible fights for debugging
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for DiceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StrikeResolver for DiceResolver {
    fn damage(&mut self, attacker: &Combatant, defender: &Combatant) -> u32 {
        let roll = self.rng.gen_range(1..=attacker.attack.max(1));
        roll.saturating_sub(defender.defense / 2).max(1)
    }
}

/// Constant damage per strike
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub u32);

impl StrikeResolver for FixedResolver {
    fn damage(&mut self, _attacker: &Combatant, _defender: &Combatant) -> u32 {
        self.0
    }
}

/// State of one combat encounter. Only exists inside `Mode::InCombat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatState {
    pub phase: CombatPhase,
    pub turn: u32,
    pub player: Combatant,
    pub enemy: Combatant,
}

impl CombatState {
    pub fn new(player: Combatant, enemy: Combatant) -> Self {
        Self {
            phase: CombatPhase::Initiating,
            turn: 0,
            player,
            enemy,
        }
    }

    /// Initiating -> `PlayerTurn`, once per encounter
    pub fn start(&mut self) -> Result<(), CombatError> {
        match self.phase {
            CombatPhase::Initiating => {
                self.phase = CombatPhase::PlayerTurn;
                Ok(())
            }
            CombatPhase::Resolved => Err(CombatError::AlreadyResolved),
            CombatPhase::PlayerTurn | CombatPhase::EnemyTurn => Err(CombatError::AlreadyStarted),
        }
    }

    /// Advance one turn. If either side is already down this resolves the
    /// combat instead of striking.
    pub fn next_turn(
        &mut self,
        resolver: &mut dyn StrikeResolver,
    ) -> Result<TurnReport, CombatError> {
        match self.phase {
            CombatPhase::Initiating => return Err(CombatError::NotStarted),
            CombatPhase::Resolved => return Err(CombatError::AlreadyResolved),
            CombatPhase::PlayerTurn | CombatPhase::EnemyTurn => {}
        }

        self.turn += 1;

        if let Some(victor) = self.victor() {
            self.phase = CombatPhase::Resolved;
            return Ok(TurnReport::Resolved { victor });
        }

        let player_turn = self.phase == CombatPhase::PlayerTurn;
        let damage = if player_turn {
            resolver.damage(&self.player, &self.enemy)
        } else {
            resolver.damage(&self.enemy, &self.player)
        };

        let (attacker, defender) = if player_turn {
            (&self.player, &mut self.enemy)
        } else {
            (&self.enemy, &mut self.player)
        };
        defender.health = defender.health.saturating_sub(damage);

        let report = TurnReport::Strike {
            attacker: attacker.name.clone(),
            defender: defender.name.clone(),
            damage,
            remaining: defender.health,
        };

        self.phase = if player_turn {
            CombatPhase::EnemyTurn
        } else {
            CombatPhase::PlayerTurn
        };

        Ok(report)
    }

    pub fn is_resolved(&self) -> bool {
        self.phase == CombatPhase::Resolved
    }

    /// Winner, once either side is down
    pub fn victor(&self) -> Option<Victor> {
        if self.enemy.is_down() {
            Some(Victor::Player)
        } else if self.player.is_down() {
            Some(Victor::Enemy)
        } else {
            None
        }
    }
}
