//! Testing utilities for the session controller.
//!
//! This module provides tools for integration testing:
//! - `MockRoom`, a scripted [`RoomApi`] that needs no server
//! - `TestHarness` for scripted solo and room scenarios
//! - Assertion helpers for verifying party state

use crate::api::RoomApi;
use crate::session::{Session, SessionConfig, SessionError, TurnOutcome};
use async_trait::async_trait;
use roomapi::{ChatRequest, Error, Generation, ResolveRequest, RoomSnapshot};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Text returned once the generation script runs out.
pub const UNSCRIPTED: &str = "The narrator has no more scripted responses.";

/// A scripted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Network,
    NotFound,
    Rejected(String),
}

impl From<MockFailure> for Error {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::Network => Error::Network("connection refused".to_string()),
            MockFailure::NotFound => Error::NotFound,
            MockFailure::Rejected(message) => Error::Rejected(message),
        }
    }
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub enum Call {
    Poll,
    QueueAction(String),
    ResolveTurn(ResolveRequest),
    StartCampaign,
    Chat(ChatRequest),
    LeaveRoom,
    Reset,
}

#[derive(Default)]
struct Script {
    polls: VecDeque<Result<RoomSnapshot, MockFailure>>,
    last_snapshot: RoomSnapshot,
    generations: VecDeque<Result<Generation, MockFailure>>,
    acks: VecDeque<MockFailure>,
    calls: Vec<Call>,
}

/// A room server that answers from a script.
///
/// Polls replay the scripted snapshots and failures in order, then keep
/// returning the last snapshot. Chat, resolve and campaign start share one
/// generation script. Queue, leave and reset succeed unless a failure was
/// scripted with [`MockRoom::fail_next_ack`].
#[derive(Default)]
pub struct MockRoom {
    script: Mutex<Script>,
}

impl MockRoom {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread poisons the lock; the script is still usable.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a snapshot for a later poll.
    pub fn push_snapshot(&self, snapshot: RoomSnapshot) {
        self.script().polls.push_back(Ok(snapshot));
    }

    /// Queue a poll failure.
    pub fn push_poll_failure(&self, failure: MockFailure) {
        self.script().polls.push_back(Err(failure));
    }

    /// Queue a generation carrying `text`.
    pub fn push_generation(&self, text: impl Into<String>) {
        self.script().generations.push_back(Ok(Generation {
            content: Some(text.into()),
        }));
    }

    /// Queue a generation that came back without content.
    pub fn push_empty_generation(&self) {
        self.script()
            .generations
            .push_back(Ok(Generation { content: None }));
    }

    /// Queue a failed generation.
    pub fn push_generation_failure(&self, failure: MockFailure) {
        self.script().generations.push_back(Err(failure));
    }

    /// Fail the next queue, leave or reset request.
    pub fn fail_next_ack(&self, failure: MockFailure) {
        self.script().acks.push_back(failure);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Poll))
            .count()
    }

    /// Chat requests received so far.
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.script()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Chat(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Resolve requests received so far.
    pub fn resolve_requests(&self) -> Vec<ResolveRequest> {
        self.script()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::ResolveTurn(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages passed to `queue_action` so far.
    pub fn queued_messages(&self) -> Vec<String> {
        self.script()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::QueueAction(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn next_generation(&self, call: Call) -> Result<Generation, Error> {
        let mut script = self.script();
        script.calls.push(call);
        match script.generations.pop_front() {
            Some(result) => result.map_err(Error::from),
            None => Ok(Generation {
                content: Some(UNSCRIPTED.to_string()),
            }),
        }
    }

    fn next_ack(&self, call: Call) -> Result<(), Error> {
        let mut script = self.script();
        script.calls.push(call);
        match script.acks.pop_front() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RoomApi for MockRoom {
    async fn poll(&self) -> Result<RoomSnapshot, Error> {
        let mut script = self.script();
        script.calls.push(Call::Poll);
        match script.polls.pop_front() {
            Some(Ok(snapshot)) => {
                script.last_snapshot = snapshot.clone();
                Ok(snapshot)
            }
            Some(Err(failure)) => Err(failure.into()),
            None => Ok(script.last_snapshot.clone()),
        }
    }

    async fn queue_action(&self, message: &str) -> Result<(), Error> {
        self.next_ack(Call::QueueAction(message.to_string()))
    }

    async fn resolve_turn(&self, request: &ResolveRequest) -> Result<Generation, Error> {
        self.next_generation(Call::ResolveTurn(request.clone()))
    }

    async fn start_campaign(&self) -> Result<Generation, Error> {
        self.next_generation(Call::StartCampaign)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Generation, Error> {
        self.next_generation(Call::Chat(request.clone()))
    }

    async fn leave_room(&self) -> Result<(), Error> {
        self.next_ack(Call::LeaveRoom)
    }

    async fn reset(&self) -> Result<(), Error> {
        self.next_ack(Call::Reset)
    }
}

/// Test harness for running session scenarios.
pub struct TestHarness {
    /// The scripted server.
    pub room: Arc<MockRoom>,
    /// The session under test.
    pub session: Session,
}

impl TestHarness {
    /// Solo session with the default starting party.
    pub fn solo() -> Self {
        Self::with_config(SessionConfig::solo())
    }

    /// Room session with code `TEST01`.
    pub fn room(is_creator: bool) -> Self {
        Self::with_config(SessionConfig::room("TEST01", is_creator))
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let room = Arc::new(MockRoom::new());
        let session = Session::new(room.clone(), config);
        Self { room, session }
    }

    /// Queue a narrator response.
    pub fn expect_narrative(&mut self, text: impl Into<String>) -> &mut Self {
        self.room.push_generation(text);
        self
    }

    /// Queue a failed generation.
    pub fn expect_failure(&mut self, failure: MockFailure) -> &mut Self {
        self.room.push_generation_failure(failure);
        self
    }

    /// Send a solo player action.
    pub async fn input(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.session.send_action(text).await
    }

    /// Current HP as (current, max).
    pub fn hp(&self) -> (i32, i32) {
        let state = self.session.state();
        (state.hp(), state.hp_max())
    }

    pub fn floor(&self) -> u32 {
        self.session.state().floor()
    }

    pub fn inventory(&self) -> Vec<String> {
        self.session.state().inventory().to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.session.state().history().len()
    }

    /// The last history entry's text.
    pub fn last_entry(&self) -> Option<&str> {
        self.session
            .state()
            .history()
            .last()
            .map(|e| e.content.as_str())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::solo()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert HP is at expected values.
#[track_caller]
pub fn assert_hp(harness: &TestHarness, current: i32, max: i32) {
    let (actual_current, actual_max) = harness.hp();
    assert_eq!(
        (actual_current, actual_max),
        (current, max),
        "Expected HP {current}/{max}, got {actual_current}/{actual_max}"
    );
}

/// Assert the party is on the expected floor.
#[track_caller]
pub fn assert_floor(harness: &TestHarness, floor: u32) {
    assert_eq!(
        harness.floor(),
        floor,
        "Expected floor {floor}, got {}",
        harness.floor()
    );
}

/// Assert the party carries an item (case-insensitive).
#[track_caller]
pub fn assert_has_item(harness: &TestHarness, item: &str) {
    assert!(
        harness.session.state().inventory().contains(item),
        "Expected '{item}' in inventory {:?}",
        harness.inventory()
    );
}

/// Assert the party does NOT carry an item.
#[track_caller]
pub fn assert_no_item(harness: &TestHarness, item: &str) {
    assert!(
        !harness.session.state().inventory().contains(item),
        "Expected '{item}' NOT in inventory {:?}",
        harness.inventory()
    );
}
