//! Session state types

use super::combat::{CombatState, Combatant};
use crate::world::{Hostile, Room, World, START_ROOM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Top-level mode of a session. Combat state lives inside `InCombat`, so it
/// cannot exist in any other mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Exploring,
    InCombat {
        combat: CombatState,
    },
    InventoryOpen,
}

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Exploring => ModeKind::Exploring,
            Mode::InCombat { .. } => ModeKind::InCombat,
            Mode::InventoryOpen => ModeKind::InventoryOpen,
        }
    }

    pub fn combat(&self) -> Option<&CombatState> {
        match self {
            Mode::InCombat { combat } => Some(combat),
            Mode::Exploring | Mode::InventoryOpen => None,
        }
    }
}

/// Mode without payload, for legality checks and observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    Exploring,
    InCombat,
    InventoryOpen,
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModeKind::Exploring => "exploring",
            ModeKind::InCombat => "in combat",
            ModeKind::InventoryOpen => "looking through your pack",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub health: u32,
    pub max_health: u32,
    pub attack: u32,
    pub defense: u32,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            health: 30,
            max_health: 30,
            attack: 6,
            defense: 2,
        }
    }
}

impl Player {
    pub fn combatant(&self) -> Combatant {
        Combatant {
            name: "you".to_string(),
            health: self.health,
            max_health: self.max_health,
            attack: self.attack,
            defense: self.defense,
        }
    }
}

impl From<&Hostile> for Combatant {
    fn from(hostile: &Hostile) -> Self {
        Combatant {
            name: hostile.name.clone(),
            health: hostile.health,
            max_health: hostile.max_health,
            attack: hostile.attack,
            defense: hostile.defense,
        }
    }
}

/// How a recorded action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Resolved with generated narration
    Narrated,
    /// Resolved from existing state
    Applied,
    /// Generation failed after all retries; nothing changed
    GenerationFailed,
}

/// One entry of the bounded action history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub command: String,
    pub outcome: ActionOutcome,
    pub summary: String,
    pub at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(command: impl Into<String>, outcome: ActionOutcome, summary: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            outcome,
            summary: summary.into(),
            at: Utc::now(),
        }
    }
}

/// Per-session settings that are not part of the game state
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub history_limit: usize,
    /// Save a snapshot every N completed commands; 0 disables
    pub checkpoint_interval: u32,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, history_limit: usize) -> Self {
        Self {
            session_id: session_id.into(),
            history_limit: history_limit.max(1),
            checkpoint_interval: 0,
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: u32) -> Self {
        self.checkpoint_interval = interval;
        self
    }
}

/// Root aggregate of one player's game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub mode: Mode,
    pub player: Player,
    pub inventory: Vec<String>,
    /// Id of the current room in `world`
    pub location: String,
    pub world: World,
    pub history: VecDeque<ActionRecord>,
    /// Sequence number of the last emitted event
    pub sequence: u64,
}

impl Session {
    /// Fresh game in the starter world
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: Mode::Exploring,
            player: Player::default(),
            inventory: Vec::new(),
            location: START_ROOM.to_string(),
            world: World::starter(),
            history: VecDeque::new(),
            sequence: 0,
        }
    }

    pub fn current_room(&self) -> Option<&Room> {
        self.world.room(&self.location)
    }

    pub fn current_room_mut(&mut self) -> Option<&mut Room> {
        self.world.room_mut(&self.location)
    }

    /// Append to history, dropping the oldest entries past `limit`
    pub fn record(&mut self, record: ActionRecord, limit: usize) {
        self.history.push_back(record);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Most recent `n` actions, oldest first
    pub fn recent_actions(&self, n: usize) -> impl Iterator<Item = &ActionRecord> {
        self.history.iter().skip(self.history.len().saturating_sub(n))
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn location_summary(&self) -> LocationSummary {
        match self.current_room() {
            Some(room) => LocationSummary::from(room),
            None => LocationSummary {
                room_id: self.location.clone(),
                name: "Nowhere".to_string(),
                description: String::new(),
                exits: Vec::new(),
                items: Vec::new(),
                hostile: None,
            },
        }
    }

    pub fn observable(&self) -> ObservableState {
        ObservableState {
            mode: self.mode.kind(),
            location: self.location_summary(),
            inventory: self.inventory.clone(),
            health: self.player.health,
            max_health: self.player.max_health,
            combat: self.mode.combat().cloned(),
        }
    }
}

/// What an observer sees of the current room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSummary {
    pub room_id: String,
    pub name: String,
    pub description: String,
    pub exits: Vec<String>,
    pub items: Vec<String>,
    pub hostile: Option<String>,
}

impl From<&Room> for LocationSummary {
    fn from(room: &Room) -> Self {
        Self {
            room_id: room.id.clone(),
            name: room.name.clone(),
            description: room.description_or_fallback().to_string(),
            exits: room.exits.keys().cloned().collect(),
            items: room.items.clone(),
            hostile: room.hostile.as_ref().map(|h| h.name.clone()),
        }
    }
}

/// Observable projection of a session carried on state change events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservableState {
    pub mode: ModeKind,
    pub location: LocationSummary,
    pub inventory: Vec<String>,
    pub health: u32,
    pub max_health: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combat: Option<CombatState>,
}
