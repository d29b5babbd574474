//! Prompt construction for narration requests
//!
//! Builds the prompt text and the bounded context the backend sees for one
//! pending change. Only the current room, inventory, health and the last few
//! actions are included.

use crate::config::GenerationConfig;
use crate::llm::{NarrativeContext, NarrativeRequest};
use crate::state_machine::{PendingChange, Session};
use crate::world::Room;
use std::fmt::Write;

/// Actions from history included as context
pub const RECENT_ACTION_COUNT: usize = 5;

/// Style guidance prepended to every prompt
const NARRATOR_PREAMBLE: &str = r"You are the narrator of a dark fantasy text adventure. Write in second person, present tense. Keep it to two or three sentences. Never invent exits, items or creatures that are not listed in the context.";

/// Build the generation request for `change` against `session`
pub fn narrative_request(
    session: &Session,
    change: &PendingChange,
    config: &GenerationConfig,
) -> NarrativeRequest {
    let room = match change {
        PendingChange::DescribeRoom { room_id } | PendingChange::EnterRoom { room_id, .. } => {
            session.world.room(room_id).or_else(|| session.current_room())
        }
        PendingChange::BeginCombat { .. } | PendingChange::Help => session.current_room(),
    };

    NarrativeRequest {
        prompt: prompt_for(change, room),
        context: context_for(session, room),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

/// Request for the opening description of a fresh session's first room
pub fn opening_request(session: &Session, config: &GenerationConfig) -> NarrativeRequest {
    let room = session.current_room();
    let mut prompt = String::from(NARRATOR_PREAMBLE);
    let name = room.map_or("a strange place", |r| r.name.as_str());
    let _ = write!(
        prompt,
        "\n\nA new adventure begins. The player wakes in {name}. Describe it as the opening scene."
    );

    NarrativeRequest {
        prompt,
        context: context_for(session, room),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

fn prompt_for(change: &PendingChange, room: Option<&Room>) -> String {
    let mut prompt = String::from(NARRATOR_PREAMBLE);
    prompt.push_str("\n\n");
    let name = room.map_or("an unknown place", |r| r.name.as_str());

    match change {
        PendingChange::DescribeRoom { .. } => {
            let _ = write!(prompt, "The player looks around {name}. Describe it.");
        }
        PendingChange::EnterRoom { exit, .. } => {
            let _ = write!(
                prompt,
                "The player heads {exit} and arrives in {name}. Describe what they find."
            );
        }
        PendingChange::BeginCombat { enemy } => {
            let _ = write!(
                prompt,
                "The player draws steel against the {enemy} in {name}. Narrate the opening of the fight without resolving it."
            );
        }
        PendingChange::Help => {
            prompt.push_str(
                "The player is unsure what to do. In character, hint at what they could try next using only the commands: look, move, take, attack, inventory, help.",
            );
        }
    }

    prompt
}

fn context_for(session: &Session, room: Option<&Room>) -> NarrativeContext {
    NarrativeContext {
        mode: session.mode.kind().to_string(),
        room: room.map_or_else(|| session.location.clone(), |r| r.name.clone()),
        room_description: room.and_then(|r| r.description.clone()),
        exits: room.map(|r| r.exits.keys().cloned().collect()).unwrap_or_default(),
        items: room.map(|r| r.items.clone()).unwrap_or_default(),
        hostile: room.and_then(|r| r.hostile.as_ref().map(|h| h.name.clone())),
        inventory: session.inventory.clone(),
        health: session.player.health,
        max_health: session.player.max_health,
        recent_actions: session
            .recent_actions(RECENT_ACTION_COUNT)
            .map(|record| format!("{} -> {}", record.command, record.summary))
            .collect(),
    }
}
