//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across arbitrary command sequences.

use super::combat::FixedResolver;
use super::state::*;
use super::transition::*;
use crate::parser::parse;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_input() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("look".to_string()),
        Just("help".to_string()),
        Just("attack".to_string()),
        Just("inventory".to_string()),
        Just("move".to_string()),
        prop_oneof![Just("north"), Just("south"), Just("east"), Just("west"), Just("up")]
            .prop_map(|exit| format!("move {exit}")),
        prop_oneof![Just("torch"), Just("rope"), Just("rusty key"), Just("silver amulet"), Just("sword")]
            .prop_map(|item| format!("take {item}")),
        "[a-z]{1,8}",
    ]
}

/// A step is an input plus whether its narration (if any) succeeds
fn arb_steps() -> impl Strategy<Value = Vec<(String, bool)>> {
    proptest::collection::vec((arb_input(), any::<bool>()), 1..40)
}

fn total_items(session: &Session) -> usize {
    session.inventory.len()
        + session
            .world
            .rooms
            .values()
            .map(|room| room.items.len())
            .sum::<usize>()
}

/// Run one input through plan/apply the way the runtime does
fn step(session: &Session, input: &str, narration_ok: bool, damage: u32) -> Session {
    let command = parse(input);
    match plan(session, &command, &mut FixedResolver(damage)) {
        Ok(Plan::Immediate { session: next, .. }) => next,
        Ok(Plan::Narrate(change)) => {
            if narration_ok {
                apply_narration(session, &change, "narrated").unwrap()
            } else {
                session.clone()
            }
        }
        Err(_) => session.clone(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Combat state exists exactly when the mode is `InCombat`
    #[test]
    fn prop_combat_state_iff_in_combat(steps in arb_steps(), damage in 1u32..15) {
        let mut session = Session::new("prop");
        for (input, ok) in steps {
            session = step(&session, &input, ok, damage);
            let kind = session.mode.kind();
            prop_assert_eq!(session.mode.combat().is_some(), kind == ModeKind::InCombat);
            prop_assert!(matches!(
                kind,
                ModeKind::Exploring | ModeKind::InCombat | ModeKind::InventoryOpen
            ));
        }
    }

    /// Items only move between rooms and the inventory
    #[test]
    fn prop_items_are_conserved(steps in arb_steps()) {
        let mut session = Session::new("prop");
        let initial = total_items(&session);
        for (input, ok) in steps {
            session = step(&session, &input, ok, 3);
            prop_assert_eq!(total_items(&session), initial);
        }
    }

    /// Health stays within bounds through any fight
    #[test]
    fn prop_health_bounded(steps in arb_steps(), damage in 1u32..40) {
        let mut session = Session::new("prop");
        for (input, ok) in steps {
            session = step(&session, &input, ok, damage);
            prop_assert!(session.player.health <= session.player.max_health);
            prop_assert!(session.player.health > 0 || session.mode.kind() == ModeKind::InCombat);
            if let Some(combat) = session.mode.combat() {
                prop_assert!(combat.enemy.health <= combat.enemy.max_health);
                prop_assert!(!combat.is_resolved());
            }
        }
    }

    /// Illegal commands never ask for narration
    #[test]
    fn prop_illegal_commands_never_narrate(steps in arb_steps(), next in arb_input()) {
        let mut session = Session::new("prop");
        for (input, ok) in steps {
            session = step(&session, &input, ok, 4);
        }
        let command = parse(&next);
        if check_legal(session.mode.kind(), &command).is_err() {
            prop_assert!(plan(&session, &command, &mut FixedResolver(4)).is_err());
        }
    }
}
