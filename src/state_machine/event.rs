//! Named events that change a session's mode

use super::combat::Combatant;
use std::fmt;

/// The only ways a session's mode may change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEvent {
    /// Exploring -> `InCombat`, allocating a fresh combat state
    StartCombat { player: Combatant, enemy: Combatant },
    /// `InCombat` -> Exploring, once the combat is resolved
    EndCombat,
    /// Exploring -> `InventoryOpen`
    OpenInventory,
    /// `InventoryOpen` -> Exploring
    CloseInventory,
}

impl ModeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ModeEvent::StartCombat { .. } => "start_combat",
            ModeEvent::EndCombat => "end_combat",
            ModeEvent::OpenInventory => "open_inventory",
            ModeEvent::CloseInventory => "close_inventory",
        }
    }
}

impl fmt::Display for ModeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
