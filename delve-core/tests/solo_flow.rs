//! Solo play through the session controller against a scripted room.
//!
//! Run with: `cargo test -p delve-core --test solo_flow`

use delve_core::prompt::NEW_FLOOR_PROMPT;
use delve_core::testing::{
    assert_floor, assert_has_item, assert_hp, assert_no_item, MockFailure, TestHarness,
};
use delve_core::{SessionConfig, SessionError, FLOOR_THRESHOLD};

fn empty_handed() -> TestHarness {
    TestHarness::with_config(SessionConfig::solo().with_inventory(Vec::<String>::new()))
}

// =============================================================================
// DIRECTIVES
// =============================================================================

#[tokio::test]
async fn test_blade_and_dagger_scenario() {
    let mut harness = empty_handed();
    harness.expect_narrative("A lâmina corta! [HP: -3] Você encontra uma adaga. [ITEM: Adaga]");

    let outcome = harness.input("I step into the corridor").await.unwrap();

    assert_hp(&harness, 7, 10);
    assert_eq!(harness.inventory(), vec!["Adaga"]);

    let display = outcome.narrations[0].display_text();
    assert!(display.contains("color:red"), "{display}");
    assert!(display.contains("-3 HP"), "{display}");
    assert!(display.contains("(obtained: Adaga)"), "{display}");
    assert!(!display.contains('['), "bracket syntax left in {display}");
}

#[tokio::test]
async fn test_effects_apply_in_order() {
    let mut harness = TestHarness::with_config(SessionConfig::solo().with_starting_hp(8));
    harness.expect_narrative("A spring heals you [HP: +5] then a spike trap fires [HP: -8].");

    harness.input("drink from the spring").await.unwrap();

    // +5 clamps at 10 before the -8 lands.
    assert_hp(&harness, 2, 10);
}

#[tokio::test]
async fn test_items_are_case_insensitive() {
    let mut harness = TestHarness::solo();
    harness
        .expect_narrative("You pick up a torch. [ITEM: Torch]")
        .expect_narrative("Another one! [ITEM: torch]")
        .expect_narrative("The potion shatters. [REMOVE: HEALING POTION] [REMOVE: rope]");

    harness.input("search").await.unwrap();
    harness.input("search again").await.unwrap();
    assert_eq!(
        harness.inventory(),
        vec!["short sword", "wooden shield", "healing potion", "Torch"]
    );

    let outcome = harness.input("trip").await.unwrap();
    assert_no_item(&harness, "healing potion");
    assert_has_item(&harness, "TORCH");
    assert!(outcome.narrations[0].to_plain().contains("(lost: HEALING POTION)"));
}

#[tokio::test]
async fn test_malformed_tags_are_ignored() {
    let mut harness = TestHarness::solo();
    harness.expect_narrative("Strange runes: [HP: lots] and [ITEM: ] glow.");

    let outcome = harness.input("read the runes").await.unwrap();

    assert_hp(&harness, 10, 10);
    assert_eq!(harness.inventory().len(), 3);
    assert!(outcome.effects.is_empty());
    assert!(outcome.narrations[0].to_plain().contains("[HP: lots]"));
}

// =============================================================================
// DEFEAT
// =============================================================================

#[tokio::test]
async fn test_defeated_party_cannot_act() {
    let mut harness = TestHarness::solo();
    harness.expect_narrative("The floor gives way. [HP: -12]");

    let outcome = harness.input("jump").await.unwrap();
    assert!(outcome.defeated);
    assert!(harness.session.is_defeated());

    let calls_before = harness.room.calls().len();
    let err = harness.input("stand up").await.unwrap_err();
    assert!(matches!(err, SessionError::Defeated));
    assert_eq!(harness.room.calls().len(), calls_before, "no request sent");
}

#[tokio::test]
async fn test_new_campaign_ends_defeat() {
    let mut harness = TestHarness::solo();
    harness
        .expect_narrative("Darkness. [HP: -10]")
        .expect_narrative("You wake in a stone hall.");

    harness.input("sleep").await.unwrap();
    assert!(harness.session.is_defeated());

    harness.session.start_campaign().await.unwrap();
    assert_hp(&harness, 10, 10);
    assert_floor(&harness, 1);
    assert_eq!(harness.history_len(), 2);
}

#[tokio::test]
async fn test_defeat_skips_floor_progression() {
    let mut harness = TestHarness::with_config(SessionConfig::solo().with_floor_threshold(1));
    harness.expect_narrative("A dragon. [HP: -99]");

    let outcome = harness.input("wave at the dragon").await.unwrap();

    assert!(outcome.defeated);
    assert!(!outcome.floor_advanced);
    assert_floor(&harness, 1);
    assert_eq!(harness.session.pending_floor(), None);
}

// =============================================================================
// FLOORS
// =============================================================================

#[tokio::test]
async fn test_floor_advances_after_fifteen_actions() {
    let mut harness = TestHarness::solo();
    for _ in 0..FLOOR_THRESHOLD {
        harness.expect_narrative("You walk on.");
    }
    harness.expect_narrative("Stairs lead to a flooded crypt.");

    for i in 1..FLOOR_THRESHOLD {
        let outcome = harness.input("walk").await.unwrap();
        assert!(!outcome.floor_advanced, "advanced early at action {i}");
    }
    assert_floor(&harness, 1);

    let outcome = harness.input("walk").await.unwrap();
    assert!(outcome.floor_advanced);
    assert_eq!(outcome.narrations.len(), 2);
    assert!(outcome.to_plain().contains("flooded crypt"));
    assert_floor(&harness, 2);
    assert_eq!(harness.session.state().actions_this_floor(), 0);

    let requests = harness.room.chat_requests();
    let describe = requests.last().unwrap();
    assert_eq!(describe.messages.last().unwrap().content, NEW_FLOOR_PROMPT);
    assert!(describe.system_context.contains("**Dungeon floor:** 2"));

    // No further advance until another full floor of actions.
    for _ in 1..FLOOR_THRESHOLD {
        harness.expect_narrative("You walk on.");
        harness.input("walk").await.unwrap();
    }
    assert_floor(&harness, 2);
}

#[tokio::test]
async fn test_failed_floor_description_is_retried_first() {
    let mut harness = TestHarness::with_config(SessionConfig::solo().with_floor_threshold(2));
    harness
        .expect_narrative("a")
        .expect_narrative("b")
        .expect_failure(MockFailure::Network)
        .expect_narrative("A windy bridge spans a chasm.")
        .expect_narrative("c");

    harness.input("one").await.unwrap();
    let outcome = harness.input("two").await.unwrap();
    assert!(outcome.floor_advanced);
    assert!(outcome.floor_pending);
    assert_eq!(harness.session.pending_floor(), Some(2));

    let outcome = harness.input("three").await.unwrap();
    assert_eq!(outcome.narrations.len(), 2);
    assert!(outcome.to_plain().starts_with("A windy bridge"));
    assert_eq!(harness.session.pending_floor(), None);
    assert_eq!(harness.last_entry(), Some("c"));
}

// =============================================================================
// ERRORS
// =============================================================================

#[tokio::test]
async fn test_empty_generation_rolls_back() {
    let mut harness = TestHarness::solo();
    harness.expect_narrative("A quiet hall.");
    harness.input("look").await.unwrap();

    harness.room.push_empty_generation();
    let err = harness.input("shout").await.unwrap_err();
    assert!(matches!(err, SessionError::MalformedGeneration));
    assert_eq!(harness.history_len(), 2);
    assert_eq!(harness.session.state().actions_this_floor(), 1);

    harness.expect_narrative("Echoes answer.");
    harness.input("shout again").await.unwrap();
    let requests = harness.room.chat_requests();
    let last = requests.last().unwrap();
    assert_eq!(last.messages.len(), 3, "the failed message was not kept");
    assert!(last.messages[2].content.starts_with("shout again"));
}

#[tokio::test]
async fn test_rejected_generation_is_transport_error() {
    let mut harness = TestHarness::solo();
    harness.expect_failure(MockFailure::Rejected("rate limited".to_string()));

    let err = harness.input("look").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transport(roomapi::Error::Rejected(ref m)) if m == "rate limited"
    ));
    assert!(!harness.session.is_terminated());
}
