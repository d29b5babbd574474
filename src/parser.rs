//! Player input parsing
//!
//! Turns raw text into a typed [`Command`]. Parsing never fails: input whose
//! first word is outside the vocabulary becomes [`CommandKind::Unknown`].
//! Whether a command makes sense right now is decided by the state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Look,
    Move,
    Take,
    Attack,
    Inventory,
    Help,
    Unknown,
}

impl CommandKind {
    /// Every recognised verb, in the order shown by `help`
    pub const VOCABULARY: [CommandKind; 6] = [
        CommandKind::Look,
        CommandKind::Move,
        CommandKind::Take,
        CommandKind::Attack,
        CommandKind::Inventory,
        CommandKind::Help,
    ];

    fn from_verb(verb: &str) -> Self {
        match verb {
            "look" => CommandKind::Look,
            "move" => CommandKind::Move,
            "take" => CommandKind::Take,
            "attack" => CommandKind::Attack,
            "inventory" => CommandKind::Inventory,
            "help" => CommandKind::Help,
            _ => CommandKind::Unknown,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            CommandKind::Look => "look",
            CommandKind::Move => "move",
            CommandKind::Take => "take",
            CommandKind::Attack => "attack",
            CommandKind::Inventory => "inventory",
            CommandKind::Help => "help",
            CommandKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A parsed command. Arguments are positional and unvalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub args: Vec<String>,
    /// Input as the player typed it, trimmed
    pub raw: String,
}

impl Command {
    /// First positional argument, if any
    pub fn target(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// All arguments joined by single spaces (multi-word item names)
    pub fn joined_args(&self) -> Option<String> {
        if self.args.is_empty() {
            None
        } else {
            Some(self.args.join(" "))
        }
    }
}

/// Parse raw player input
pub fn parse(raw_input: &str) -> Command {
    let raw = raw_input.trim().to_string();
    let lowered = raw.to_lowercase();
    let mut tokens = lowered.split_whitespace().map(str::to_string);

    let kind = tokens
        .next()
        .map_or(CommandKind::Unknown, |verb| CommandKind::from_verb(&verb));

    Command {
        kind,
        args: tokens.collect(),
        raw,
    }
}
