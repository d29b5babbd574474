//! Room graph for a session
//!
//! The shape of the world (rooms, exits, items, hostiles) is static. Room
//! descriptions start empty and are filled in by narration the first time a
//! player looks at or enters a room.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of the room every new session starts in
pub const START_ROOM: &str = "gatehouse";

/// A hostile creature waiting in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostile {
    pub name: String,
    pub health: u32,
    pub max_health: u32,
    pub attack: u32,
    pub defense: u32,
}

impl Hostile {
    pub fn new(name: impl Into<String>, health: u32, attack: u32, defense: u32) -> Self {
        Self {
            name: name.into(),
            health,
            max_health: health,
            attack,
            defense,
        }
    }
}

/// One location in the world
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Narrated description, `None` until the room has been described
    pub description: Option<String>,
    /// Static text used when narration for this room is unavailable
    pub fallback_description: String,
    /// Exit name -> target room id
    pub exits: BTreeMap<String, String>,
    pub items: Vec<String>,
    pub hostile: Option<Hostile>,
}

impl Room {
    fn new(id: &str, name: &str, fallback: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            fallback_description: fallback.to_string(),
            exits: BTreeMap::new(),
            items: Vec::new(),
            hostile: None,
        }
    }

    fn exit(mut self, direction: &str, target: &str) -> Self {
        self.exits.insert(direction.to_string(), target.to_string());
        self
    }

    fn item(mut self, item: &str) -> Self {
        self.items.push(item.to_string());
        self
    }

    fn hostile(mut self, hostile: Hostile) -> Self {
        self.hostile = Some(hostile);
        self
    }

    pub fn is_described(&self) -> bool {
        self.description.is_some()
    }

    /// Description if narrated, otherwise the static fallback
    pub fn description_or_fallback(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(&self.fallback_description)
    }

    /// Position of an item in the room, matched case-insensitively
    pub fn find_item(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.eq_ignore_ascii_case(name))
    }
}

/// All rooms of one session, keyed by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub rooms: BTreeMap<String, Room>,
}

impl World {
    /// The built-in starter map
    pub fn starter() -> Self {
        let rooms = [
            Room::new(
                "gatehouse",
                "Ruined Gatehouse",
                "Broken portcullis teeth hang above a gatehouse choked with ivy. \
                 A courtyard lies north; a narrow stair descends east.",
            )
            .exit("north", "courtyard")
            .exit("east", "cellar")
            .item("torch"),
            Room::new(
                "courtyard",
                "Overgrown Courtyard",
                "Weeds split the flagstones of a silent courtyard. A chapel door \
                 stands ajar to the west.",
            )
            .exit("south", "gatehouse")
            .exit("west", "chapel")
            .item("rusty key")
            .hostile(Hostile::new("feral hound", 12, 4, 1)),
            Room::new(
                "cellar",
                "Flooded Cellar",
                "Black water laps at barrels stacked against a dripping wall.",
            )
            .exit("west", "gatehouse")
            .item("rope")
            .item("rope"),
            Room::new(
                "chapel",
                "Collapsed Chapel",
                "Moonlight falls through the broken roof onto a toppled altar.",
            )
            .exit("east", "courtyard")
            .item("silver amulet")
            .hostile(Hostile::new("restless knight", 20, 6, 2)),
        ];

        Self {
            rooms: rooms
                .into_iter()
                .map(|room| (room.id.clone(), room))
                .collect(),
        }
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }
}
