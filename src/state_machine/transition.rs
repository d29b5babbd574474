//! Pure transition functions
//!
//! `plan` decides what a command does against a session without touching
//! it. Commands that need narration come back as a [`PendingChange`] that is
//! applied with `apply_narration` once generation succeeds. Both return a new
//! `Session`, so a failure part-way never leaves a half-mutated one behind.

use super::combat::{CombatError, CombatPhase, CombatState, StrikeResolver, TurnReport, Victor};
use super::event::ModeEvent;
use super::state::{Mode, ModeKind, Session};
use crate::parser::{Command, CommandKind};
use thiserror::Error;

/// What a command will do
#[derive(Debug)]
pub enum Plan {
    /// Resolved from existing state; swap in `session` and report `narrative`
    Immediate { session: Session, narrative: String },
    /// Nothing changes until narration for this change arrives
    Narrate(PendingChange),
}

/// A change that waits on generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    DescribeRoom { room_id: String },
    EnterRoom { exit: String, room_id: String },
    BeginCombat { enemy: String },
    Help,
}

impl PendingChange {
    pub fn label(&self) -> &'static str {
        match self {
            PendingChange::DescribeRoom { .. } => "describe_room",
            PendingChange::EnterRoom { .. } => "enter_room",
            PendingChange::BeginCombat { .. } => "begin_combat",
            PendingChange::Help => "help",
        }
    }
}

/// User-visible reasons a command is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("You can't {command} while {mode}.")]
    IllegalCommandForMode { command: CommandKind, mode: ModeKind },
    #[error("I don't understand \"{input}\". Try one of: {}.", vocabulary())]
    UnknownCommand { input: String },
    #[error("{0}")]
    InvalidTarget(String),
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::IllegalCommandForMode { .. } => "illegal_command_for_mode",
            Rejection::UnknownCommand { .. } => "unknown_command",
            Rejection::InvalidTarget(_) => "invalid_target",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {event} while {from}")]
    InvalidTransition { from: ModeKind, event: &'static str },
    #[error("Combat is not resolved yet")]
    CombatNotResolved,
    #[error(transparent)]
    Combat(#[from] CombatError),
    #[error("Unknown room: {0}")]
    UnknownRoom(String),
    #[error("Nothing to fight in {0}")]
    NoHostile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

fn vocabulary() -> String {
    CommandKind::VOCABULARY
        .iter()
        .map(|kind| kind.verb())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Commands accepted in each mode
pub fn legal_commands(mode: ModeKind) -> &'static [CommandKind] {
    match mode {
        ModeKind::Exploring => &CommandKind::VOCABULARY,
        ModeKind::InCombat => &[CommandKind::Attack, CommandKind::Help],
        ModeKind::InventoryOpen => &[CommandKind::Inventory, CommandKind::Help],
    }
}

pub fn check_legal(mode: ModeKind, command: &Command) -> Result<(), Rejection> {
    if command.kind == CommandKind::Unknown {
        return Err(Rejection::UnknownCommand {
            input: command.raw.clone(),
        });
    }
    if legal_commands(mode).contains(&command.kind) {
        Ok(())
    } else {
        Err(Rejection::IllegalCommandForMode {
            command: command.kind,
            mode,
        })
    }
}

/// Mode transition table. Anything not listed is rejected.
pub fn apply_mode_event(mode: &Mode, event: ModeEvent) -> Result<Mode, TransitionError> {
    match (mode, event) {
        (Mode::Exploring, ModeEvent::StartCombat { player, enemy }) => Ok(Mode::InCombat {
            combat: CombatState::new(player, enemy),
        }),
        (Mode::InCombat { combat }, ModeEvent::EndCombat) => {
            if combat.is_resolved() {
                Ok(Mode::Exploring)
            } else {
                Err(TransitionError::CombatNotResolved)
            }
        }
        (Mode::Exploring, ModeEvent::OpenInventory) => Ok(Mode::InventoryOpen),
        (Mode::InventoryOpen, ModeEvent::CloseInventory) => Ok(Mode::Exploring),
        (mode, event) => Err(TransitionError::InvalidTransition {
            from: mode.kind(),
            event: event.name(),
        }),
    }
}

/// Decide what `command` does against `session`
pub fn plan(
    session: &Session,
    command: &Command,
    resolver: &mut dyn StrikeResolver,
) -> Result<Plan, CommandError> {
    check_legal(session.mode.kind(), command)?;

    let room = session
        .current_room()
        .ok_or_else(|| TransitionError::UnknownRoom(session.location.clone()))?;

    match command.kind {
        CommandKind::Look => {
            if let Some(description) = &room.description {
                Ok(Plan::Immediate {
                    session: session.clone(),
                    narrative: description.clone(),
                })
            } else {
                Ok(Plan::Narrate(PendingChange::DescribeRoom {
                    room_id: room.id.clone(),
                }))
            }
        }

        CommandKind::Move => {
            let Some(exit) = command.target() else {
                let exits: Vec<&str> = room.exits.keys().map(String::as_str).collect();
                return Err(Rejection::InvalidTarget(format!(
                    "Move where? Exits: {}.",
                    exits.join(", ")
                ))
                .into());
            };
            let Some(target_id) = room.exits.get(exit) else {
                return Err(
                    Rejection::InvalidTarget(format!("You can't go {exit} from here.")).into(),
                );
            };
            let target = session
                .world
                .room(target_id)
                .ok_or_else(|| TransitionError::UnknownRoom(target_id.clone()))?;

            match &target.description {
                Some(description) => {
                    let mut next = session.clone();
                    next.location.clone_from(target_id);
                    Ok(Plan::Immediate {
                        session: next,
                        narrative: description.clone(),
                    })
                }
                None => Ok(Plan::Narrate(PendingChange::EnterRoom {
                    exit: exit.to_string(),
                    room_id: target_id.clone(),
                })),
            }
        }

        CommandKind::Take => {
            let Some(item) = command.joined_args() else {
                return Err(Rejection::InvalidTarget("Take what?".to_string()).into());
            };
            let Some(index) = room.find_item(&item) else {
                return Err(Rejection::InvalidTarget(format!("There is no {item} here.")).into());
            };

            let mut next = session.clone();
            let taken = next
                .current_room_mut()
                .map(|room| room.items.remove(index))
                .ok_or_else(|| TransitionError::UnknownRoom(session.location.clone()))?;
            let narrative = format!("You take the {taken}.");
            next.inventory.push(taken);
            Ok(Plan::Immediate {
                session: next,
                narrative,
            })
        }

        CommandKind::Attack => match &session.mode {
            Mode::InCombat { combat } => {
                let (next, narrative) = resolve_round(session, combat, resolver)?;
                Ok(Plan::Immediate {
                    session: next,
                    narrative,
                })
            }
            _ => match &room.hostile {
                Some(hostile) => Ok(Plan::Narrate(PendingChange::BeginCombat {
                    enemy: hostile.name.clone(),
                })),
                None => Err(
                    Rejection::InvalidTarget("There is nothing here to fight.".to_string()).into(),
                ),
            },
        },

        CommandKind::Inventory => {
            let mut next = session.clone();
            let narrative = if session.mode.kind() == ModeKind::InventoryOpen {
                next.mode = apply_mode_event(&session.mode, ModeEvent::CloseInventory)?;
                "You close your pack.".to_string()
            } else {
                next.mode = apply_mode_event(&session.mode, ModeEvent::OpenInventory)?;
                inventory_listing(&session.inventory)
            };
            Ok(Plan::Immediate {
                session: next,
                narrative,
            })
        }

        CommandKind::Help => Ok(Plan::Narrate(PendingChange::Help)),

        CommandKind::Unknown => Err(Rejection::UnknownCommand {
            input: command.raw.clone(),
        }
        .into()),
    }
}

/// One player attack in combat: the player's strike, the enemy's reply, and
/// resolution if either side went down.
fn resolve_round(
    session: &Session,
    combat: &CombatState,
    resolver: &mut dyn StrikeResolver,
) -> Result<(Session, String), TransitionError> {
    let mut combat = combat.clone();
    let mut lines = Vec::new();

    loop {
        let report = combat.next_turn(resolver)?;
        lines.push(describe_turn(&report));
        if combat.is_resolved() {
            break;
        }
        if combat.phase == CombatPhase::PlayerTurn && combat.victor().is_none() {
            break;
        }
    }

    let mut next = session.clone();
    next.player.health = combat.player.health;

    if let Some(victor) = combat.victor().filter(|_| combat.is_resolved()) {
        let ended = Mode::InCombat {
            combat: combat.clone(),
        };
        next.mode = apply_mode_event(&ended, ModeEvent::EndCombat)?;

        let location = next.location.clone();
        let room = next
            .current_room_mut()
            .ok_or_else(|| TransitionError::UnknownRoom(location.clone()))?;
        match victor {
            Victor::Player => {
                room.hostile = None;
            }
            Victor::Enemy => {
                if let Some(hostile) = room.hostile.as_mut() {
                    hostile.health = combat.enemy.health;
                }
                next.player.health = (next.player.max_health / 4).max(1);
                lines.push(format!(
                    "You come to, battered, with {} health.",
                    next.player.health
                ));
            }
        }
    } else {
        next.mode = Mode::InCombat { combat };
    }

    Ok((next, lines.join(" ")))
}

fn describe_turn(report: &TurnReport) -> String {
    match report {
        TurnReport::Strike {
            attacker,
            defender,
            damage,
            remaining,
        } => {
            if attacker == "you" {
                format!("You strike the {defender} for {damage} ({remaining} left).")
            } else {
                format!("The {attacker} strikes you for {damage} ({remaining} left).")
            }
        }
        TurnReport::Resolved {
            victor: Victor::Player,
        } => "Your foe falls. The fight is over.".to_string(),
        TurnReport::Resolved {
            victor: Victor::Enemy,
        } => "You collapse. The fight is over.".to_string(),
    }
}

fn inventory_listing(inventory: &[String]) -> String {
    if inventory.is_empty() {
        "Your pack is empty.".to_string()
    } else {
        format!("You are carrying: {}.", inventory.join(", "))
    }
}

/// Apply a pending change with its generated narration
pub fn apply_narration(
    session: &Session,
    change: &PendingChange,
    text: &str,
) -> Result<Session, TransitionError> {
    let mut next = session.clone();

    match change {
        PendingChange::DescribeRoom { room_id } => {
            let room = next
                .world
                .room_mut(room_id)
                .ok_or_else(|| TransitionError::UnknownRoom(room_id.clone()))?;
            room.description = Some(text.to_string());
        }

        PendingChange::EnterRoom { room_id, .. } => {
            let room = next
                .world
                .room_mut(room_id)
                .ok_or_else(|| TransitionError::UnknownRoom(room_id.clone()))?;
            room.description = Some(text.to_string());
            next.location.clone_from(room_id);
        }

        PendingChange::BeginCombat { .. } => {
            let hostile = session
                .current_room()
                .and_then(|room| room.hostile.as_ref())
                .ok_or_else(|| TransitionError::NoHostile(session.location.clone()))?;
            let mut mode = apply_mode_event(
                &session.mode,
                ModeEvent::StartCombat {
                    player: session.player.combatant(),
                    enemy: hostile.into(),
                },
            )?;
            if let Mode::InCombat { combat } = &mut mode {
                combat.start()?;
            }
            next.mode = mode;
        }

        PendingChange::Help => {}
    }

    Ok(next)
}

/// Static command reference for the current mode
pub fn help_text(mode: ModeKind) -> String {
    let verbs: Vec<&str> = legal_commands(mode).iter().map(|k| k.verb()).collect();
    format!(
        "You are {mode}. Available commands: {}. Use \"move <exit>\" to travel and \"take <item>\" to pick things up.",
        verbs.join(", ")
    )
}

/// User-safe text shown when narration could not be generated
pub fn fallback_text(change: &PendingChange, mode: ModeKind) -> String {
    match change {
        PendingChange::Help => help_text(mode),
        PendingChange::DescribeRoom { .. } | PendingChange::EnterRoom { .. } => {
            "A strange fog clouds your senses and the way ahead blurs. Try again in a moment."
                .to_string()
        }
        PendingChange::BeginCombat { enemy } => {
            format!("You hesitate, and the {enemy} watches you warily. Try again in a moment.")
        }
    }
}
