//! Room play: turn queue, single-flight resolution and poll merging.
//!
//! Run with: `cargo test -p delve-core --test room_sync`

use delve_core::prompt::NEW_FLOOR_PROMPT;
use delve_core::sync::PollEvent;
use delve_core::testing::{assert_floor, assert_hp, MockFailure, TestHarness};
use delve_core::{SessionConfig, SessionError, SyncOutcome, TurnPhase, POLL_PERIOD};
use roomapi::{Generation, HistoryEntry, RoomSnapshot};

fn history(n: usize) -> Vec<HistoryEntry> {
    (1..=n)
        .map(|i| {
            if i % 2 == 1 {
                HistoryEntry::narrator(format!("narration {i}"))
            } else {
                HistoryEntry::player(format!("ana: action {i}"))
            }
        })
        .collect()
}

fn room_snapshot(entries: usize) -> RoomSnapshot {
    RoomSnapshot {
        hp: 20,
        floor: 1,
        history: history(entries),
        code: "TEST01".to_string(),
        is_creator: true,
        ..Default::default()
    }
}

fn generation(text: &str) -> Generation {
    Generation {
        content: Some(text.to_string()),
    }
}

// =============================================================================
// POLL MERGING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_poll_appends_only_unseen_entries() {
    let mut harness = TestHarness::room(false);
    harness.room.push_snapshot(room_snapshot(3));
    harness.room.push_snapshot(room_snapshot(5));

    harness.session.start_polling().unwrap();

    let event = harness.session.next_event().await.unwrap();
    let SyncOutcome::Updated { new_entries, .. } = harness.session.apply_poll(event) else {
        panic!("expected an update");
    };
    assert_eq!(new_entries.len(), 3);

    let event = harness.session.next_event().await.unwrap();
    let SyncOutcome::Updated {
        new_entries,
        restarted,
    } = harness.session.apply_poll(event)
    else {
        panic!("expected an update");
    };
    assert!(!restarted);
    let contents: Vec<_> = new_entries.iter().map(|e| e.entry.content.as_str()).collect();
    assert_eq!(contents, vec!["ana: action 4", "narration 5"]);
    assert_eq!(new_entries[0].speaker(), Some("ana"));
    assert_eq!(harness.history_len(), 5);

    // The server repeats itself; nothing new is merged.
    let event = harness.session.next_event().await.unwrap();
    assert!(matches!(
        harness.session.apply_poll(event),
        SyncOutcome::Updated { ref new_entries, .. } if new_entries.is_empty()
    ));
    assert_eq!(harness.history_len(), 5);
    assert_eq!(harness.session.room().code, "TEST01");
}

#[tokio::test(start_paused = true)]
async fn test_session_gone_terminates_once() {
    let mut harness = TestHarness::room(false);
    harness.room.push_poll_failure(MockFailure::Network);
    harness.room.push_poll_failure(MockFailure::NotFound);

    harness.session.start_polling().unwrap();

    let event = harness.session.next_event().await.unwrap();
    assert!(matches!(harness.session.apply_poll(event), SyncOutcome::Failed(_)));
    assert!(!harness.session.is_terminated());

    let event = harness.session.next_event().await.unwrap();
    assert!(matches!(
        harness.session.apply_poll(event),
        SyncOutcome::Terminated
    ));
    assert!(harness.session.is_terminated());
    assert!(!harness.session.is_polling());

    // A late duplicate signal is ignored and polling stays stopped.
    assert!(matches!(
        harness.session.apply_poll(PollEvent::SessionGone),
        SyncOutcome::Ignored
    ));
    assert!(harness.session.next_event().await.is_none());

    let polls = harness.room.poll_count();
    tokio::time::sleep(POLL_PERIOD * 5).await;
    assert_eq!(harness.room.poll_count(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_leave_stops_polling() {
    let mut harness = TestHarness::room(false);
    harness.room.push_snapshot(room_snapshot(1));
    harness.session.start_polling().unwrap();
    assert!(harness.session.next_event().await.is_some());

    harness.session.leave().await.unwrap();
    assert!(!harness.session.is_polling());

    let polls = harness.room.poll_count();
    tokio::time::sleep(POLL_PERIOD * 5).await;
    assert_eq!(harness.room.poll_count(), polls, "no polls after leaving");
}

#[tokio::test]
async fn test_server_defeat_blocks_actions() {
    let mut harness = TestHarness::room(false);
    harness.session.apply_poll(PollEvent::Snapshot(RoomSnapshot {
        hp: 0,
        ..room_snapshot(1)
    }));

    assert_hp(&harness, 0, 20);
    assert!(matches!(
        harness.session.submit_action("crawl away").await,
        Err(SessionError::Defeated)
    ));
    assert!(harness.room.queued_messages().is_empty());
}

// =============================================================================
// TURN RESOLUTION
// =============================================================================

#[tokio::test]
async fn test_defeated_party_can_resolve_queued_actions() {
    let mut harness = TestHarness::room(true);
    harness.expect_narrative("The party falls silent.");
    harness.session.submit_action("charge").await.unwrap();

    harness.session.apply_poll(PollEvent::Snapshot(RoomSnapshot {
        hp: 0,
        pending_actions: harness.room.queued_messages(),
        ..room_snapshot(1)
    }));
    assert!(harness.session.is_defeated());

    let outcome = harness.session.resolve_turn().await.unwrap();
    assert_eq!(outcome.actions_resolved, 1);
    assert!(matches!(
        harness.session.submit_action("crawl away").await,
        Err(SessionError::Defeated)
    ));
}

#[tokio::test]
async fn test_resolve_is_single_flight_and_retryable() {
    let mut harness = TestHarness::room(true);
    harness.session.submit_action("open the door").await.unwrap();
    harness.session.submit_action("light a torch").await.unwrap();
    assert_eq!(harness.session.queue().phase(), TurnPhase::Collecting);

    let request = harness.session.begin_resolve().unwrap();
    assert!(request.system_context.contains("multiplayer"));
    assert_eq!(request.stats.hp, 20);

    assert!(matches!(
        harness.session.begin_resolve(),
        Err(SessionError::ResolutionInFlight)
    ));
    assert!(matches!(
        harness.session.submit_action("wait").await,
        Err(SessionError::ResolutionInFlight)
    ));
    assert!(matches!(
        harness.session.start_campaign().await,
        Err(SessionError::ResolutionInFlight)
    ));

    // Failure keeps every queued action.
    let err = harness
        .session
        .complete_resolve(Err(roomapi::Error::Network("reset by peer".to_string())))
        .unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(harness.session.queue().len(), 2);
    assert!(!harness.session.is_resolving());

    harness.session.begin_resolve().unwrap();
    let outcome = harness
        .session
        .complete_resolve(Ok(generation("The door creaks open.")))
        .unwrap();
    assert_eq!(outcome.actions_resolved, 2);
    assert!(harness.session.queue().is_empty());
    assert_eq!(harness.session.queue().phase(), TurnPhase::Idle);
}

#[tokio::test]
async fn test_resolve_request_runs_while_polls_merge() {
    let mut harness = TestHarness::room(true);
    harness.session.submit_action("pull the lever").await.unwrap();
    harness.room.push_generation("Gears grind somewhere below.");

    let request = harness.session.begin_resolve().unwrap();
    let api = harness.session.api();
    let task = tokio::spawn(async move { api.resolve_turn(&request).await });

    // A poll lands mid-flight; the turn being resolved is left alone.
    harness.session.apply_poll(PollEvent::Snapshot(room_snapshot(1)));
    assert_eq!(harness.session.queue().len(), 1);

    let result = task.await.unwrap();
    harness.session.complete_resolve(result).unwrap();
    assert!(harness.session.queue().is_empty());
    assert_eq!(harness.room.resolve_requests().len(), 1);
}

#[tokio::test]
async fn test_empty_resolution_keeps_queue() {
    let mut harness = TestHarness::room(true);
    harness.session.submit_action("listen").await.unwrap();

    harness.session.begin_resolve().unwrap();
    let err = harness
        .session
        .complete_resolve(Ok(Generation { content: None }))
        .unwrap_err();

    assert!(matches!(err, SessionError::MalformedGeneration));
    assert_eq!(harness.session.queue().len(), 1);
}

#[tokio::test]
async fn test_nothing_to_resolve() {
    let mut harness = TestHarness::room(true);
    assert!(matches!(
        harness.session.begin_resolve(),
        Err(SessionError::NothingToResolve)
    ));
    assert!(matches!(
        harness.session.complete_resolve(Ok(generation("x"))),
        Err(SessionError::NotInFlight)
    ));
}

#[tokio::test]
async fn test_room_gone_during_submit() {
    let mut harness = TestHarness::room(false);
    harness.room.fail_next_ack(MockFailure::NotFound);

    let err = harness.session.submit_action("look").await.unwrap_err();
    assert!(matches!(err, SessionError::SessionGone));
    assert!(harness.session.is_terminated());
    assert!(harness.session.queue().is_empty());
}

#[tokio::test]
async fn test_campaign_start_one_shot() {
    let mut harness = TestHarness::room(true);
    harness.room.push_generation("A damp hall with three doors.");

    let outcome = harness.session.start_campaign().await.unwrap();

    assert!(outcome.narrations.is_empty(), "room narration arrives by poll");
    assert!(!harness.session.is_starting_campaign());
    assert!(matches!(
        harness.room.calls().last(),
        Some(delve_core::testing::Call::StartCampaign)
    ));
}

// =============================================================================
// FLOORS
// =============================================================================

#[tokio::test]
async fn test_room_floor_advance_describes_new_floor() {
    let mut harness =
        TestHarness::with_config(SessionConfig::room("TEST01", true).with_floor_threshold(2));
    harness
        .expect_narrative("turn one")
        .expect_narrative("turn two")
        .expect_narrative("A hall of mirrors.");

    for action in ["walk", "walk"] {
        harness.session.submit_action(action).await.unwrap();
        harness.session.resolve_turn().await.unwrap();
    }

    assert_floor(&harness, 2);
    assert_eq!(harness.session.pending_floor(), None);
    assert_eq!(
        harness.room.queued_messages().last().map(String::as_str),
        Some(NEW_FLOOR_PROMPT)
    );
    let describe = harness.room.resolve_requests().pop().unwrap();
    assert_eq!(describe.stats.floor, 2);
}

#[tokio::test]
async fn test_pending_floor_survives_stale_poll() {
    let mut harness =
        TestHarness::with_config(SessionConfig::room("TEST01", true).with_floor_threshold(1));
    harness
        .expect_narrative("turn one")
        .expect_failure(MockFailure::Network)
        .expect_narrative("A frozen lake.");

    harness.session.submit_action("walk").await.unwrap();
    let outcome = harness.session.resolve_turn().await.unwrap();
    assert!(outcome.floor_advanced);
    assert_eq!(harness.session.pending_floor(), Some(2));

    // The server has not stored floor 2 yet.
    harness.session.apply_poll(PollEvent::Snapshot(room_snapshot(3)));
    assert_floor(&harness, 2);

    assert!(matches!(
        harness.session.begin_resolve(),
        Err(SessionError::FloorDescriptionPending)
    ));

    // The next action retries the description first.
    harness.session.submit_action("look").await.unwrap();
    assert_eq!(harness.session.pending_floor(), None);
    let queued = harness.room.queued_messages();
    assert_eq!(queued[queued.len() - 2], NEW_FLOOR_PROMPT);
    assert!(queued[queued.len() - 1].starts_with("look [Dice: "));
}

#[tokio::test]
async fn test_floor_retry_queues_prompt_once() {
    let mut harness =
        TestHarness::with_config(SessionConfig::room("TEST01", true).with_floor_threshold(1));
    harness
        .expect_narrative("turn one")
        .expect_failure(MockFailure::Network)
        .expect_narrative("A frozen lake.");

    harness.session.submit_action("walk").await.unwrap();
    harness.session.resolve_turn().await.unwrap();
    assert_eq!(harness.session.pending_floor(), Some(2));

    harness.session.submit_action("look").await.unwrap();
    assert_eq!(harness.session.pending_floor(), None);

    let queued = harness.room.queued_messages();
    let prompts = queued.iter().filter(|m| *m == NEW_FLOOR_PROMPT).count();
    assert_eq!(prompts, 1, "floor prompt queued more than once: {queued:?}");
    assert_eq!(queued.len(), 3);
    // Turn one, the failed describe and its retry.
    assert_eq!(harness.room.resolve_requests().len(), 3);
}
