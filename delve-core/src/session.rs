//! Session - the controller that composes parsing, dice, party state,
//! the turn queue and polling.
//!
//! A solo session talks to the chat endpoint and applies directive effects
//! locally. A room session submits actions to the shared queue, lets the
//! creator resolve turns, and takes HP, floor, inventory and history from
//! the server through polling.
//!
//! Requests that must not be duplicated (turn resolution and campaign start
//! in a room) have a two-phase form: `begin_*` checks and sets the busy
//! flag and returns what to send, `complete_*` consumes the server's answer
//! and clears the flag. The one-shot async methods call both.

use crate::api::RoomApi;
use crate::dice::{self, Annotated};
use crate::directive::{self, ParsedNarrative};
use crate::party::{EffectOutcome, Inventory, PartyState, FLOOR_THRESHOLD};
use crate::prompt::{self, NEW_FLOOR_PROMPT, OPENING_PROMPT};
use crate::queue::{QueueError, TurnQueue};
use crate::sync::{
    CursorAdvance, HistoryCursor, PollEvent, PollHandle, PollSynchronizer, POLL_PERIOD,
};
use roomapi::{ChatRequest, Generation, HistoryEntry, ResolveRequest, Role, RoomSnapshot};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Appended to the rendered turn when the party falls.
pub const DEFEAT_NOTICE: &str = "The party has fallen. Start a new campaign to play again.";

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] roomapi::Error),

    #[error("the room no longer exists")]
    SessionGone,

    #[error("the narrator returned no text")]
    MalformedGeneration,

    #[error("the party has been defeated")]
    Defeated,

    #[error("the session has ended")]
    Terminated,

    #[error("only the room creator can do that")]
    NotCreator,

    #[error("a turn resolution is already in flight")]
    ResolutionInFlight,

    #[error("a campaign start is already in flight")]
    CampaignStartInFlight,

    #[error("no actions are waiting to be resolved")]
    NothingToResolve,

    #[error("no such request is in flight")]
    NotInFlight,

    #[error("the new floor has not been described yet")]
    FloorDescriptionPending,

    #[error("action text is empty")]
    EmptyAction,

    #[error("not available in {0:?} mode")]
    WrongMode(Mode),
}

impl From<QueueError> for SessionError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::ResolutionInFlight => SessionError::ResolutionInFlight,
            QueueError::NothingToResolve => SessionError::NothingToResolve,
            QueueError::NotResolving => SessionError::NotInFlight,
        }
    }
}

/// Single player against the chat endpoint, or a shared room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Solo,
    Multi,
}

/// Identity of the session on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSession {
    /// Shareable room code; empty in solo mode.
    pub code: String,
    /// Only the creator may resolve turns or start the campaign.
    pub is_creator: bool,
    pub mode: Mode,
}

/// Configuration for creating a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: Mode,

    /// Room code (room mode).
    pub room_code: String,

    /// Whether this client created the room.
    pub is_creator: bool,

    /// Maximum HP.
    pub hp_max: i32,

    /// Starting HP; full when unset.
    pub starting_hp: Option<i32>,

    /// Starting inventory.
    pub inventory: Vec<String>,

    /// Resolved actions per floor.
    pub floor_threshold: u32,

    pub poll_period: Duration,

    /// Whether the dice marker shows the numeric roll.
    pub show_roll: bool,
}

impl SessionConfig {
    /// Single-player defaults: 10 HP and a basic kit.
    pub fn solo() -> Self {
        Self {
            mode: Mode::Solo,
            room_code: String::new(),
            is_creator: true,
            hp_max: 10,
            starting_hp: None,
            inventory: vec![
                "short sword".to_string(),
                "wooden shield".to_string(),
                "healing potion".to_string(),
            ],
            floor_threshold: FLOOR_THRESHOLD,
            poll_period: POLL_PERIOD,
            show_roll: false,
        }
    }

    /// Room defaults: 20 HP, a map and a torch.
    pub fn room(code: impl Into<String>, is_creator: bool) -> Self {
        Self {
            mode: Mode::Multi,
            room_code: code.into(),
            is_creator,
            hp_max: 20,
            starting_hp: None,
            inventory: vec!["old map".to_string(), "torch".to_string()],
            floor_threshold: FLOOR_THRESHOLD,
            poll_period: POLL_PERIOD,
            show_roll: true,
        }
    }

    /// Set maximum HP.
    pub fn with_hp_max(mut self, hp_max: i32) -> Self {
        self.hp_max = hp_max;
        self
    }

    /// Start below full HP.
    pub fn with_starting_hp(mut self, hp: i32) -> Self {
        self.starting_hp = Some(hp);
        self
    }

    /// Replace the starting inventory.
    pub fn with_inventory<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inventory = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_floor_threshold(mut self, threshold: u32) -> Self {
        self.floor_threshold = threshold.max(1);
        self
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    pub fn with_show_roll(mut self, show_roll: bool) -> Self {
        self.show_roll = show_roll;
        self
    }

    fn initial_state(&self) -> PartyState {
        let state = PartyState::new(self.hp_max, Inventory::from_items(&self.inventory));
        match self.starting_hp {
            Some(hp) => state.with_hp(hp),
            None => state,
        }
    }
}

/// What one solo turn (or campaign start) produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// The rolled player action; `None` for hidden prompts.
    pub action: Option<Annotated>,
    /// Narrator messages in the order they were generated.
    pub narrations: Vec<ParsedNarrative>,
    /// What each applied directive did.
    pub effects: Vec<EffectOutcome>,
    /// This turn moved the party to a new floor.
    pub floor_advanced: bool,
    /// The new floor's description failed and is retried before the next action.
    pub floor_pending: bool,
    pub defeated: bool,
}

impl TurnOutcome {
    /// Options offered by the last narration.
    pub fn choices(&self) -> &[String] {
        self.narrations
            .last()
            .map(|n| n.choices.as_slice())
            .unwrap_or(&[])
    }

    /// Render all narrations as HTML.
    pub fn to_html(&self) -> String {
        let mut html = self
            .narrations
            .iter()
            .map(ParsedNarrative::to_html)
            .collect::<Vec<_>>()
            .join("<br><br>");
        if self.defeated {
            html.push_str(&format!("<br><br><strong>{DEFEAT_NOTICE}</strong>"));
        }
        html
    }

    /// Render all narrations for a terminal.
    pub fn to_plain(&self) -> String {
        let mut text = self
            .narrations
            .iter()
            .map(ParsedNarrative::to_plain)
            .collect::<Vec<_>>()
            .join("\n\n");
        if self.defeated {
            text.push_str("\n\n");
            text.push_str(DEFEAT_NOTICE);
        }
        text
    }
}

/// Result of a completed room turn resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub actions_resolved: usize,
    pub floor_advanced: bool,
    pub floor: u32,
}

/// A history entry merged from a poll.
#[derive(Debug, Clone)]
pub struct SyncedEntry {
    pub entry: HistoryEntry,
    /// Parsed display document, for narrator entries.
    pub narration: Option<ParsedNarrative>,
}

impl SyncedEntry {
    fn new(entry: HistoryEntry) -> Self {
        let narration = match entry.role {
            Role::Narrator => Some(directive::parse(&entry.content)),
            Role::Player => None,
        };
        Self { entry, narration }
    }

    /// The member who queued a player entry.
    pub fn speaker(&self) -> Option<&str> {
        match self.entry.role {
            Role::Player => directive::split_speaker(&self.entry.content).map(|(s, _)| s),
            Role::Narrator => None,
        }
    }

    /// Plain-text rendering.
    pub fn to_plain(&self) -> String {
        match &self.narration {
            Some(parsed) => parsed.to_plain(),
            None => self.entry.content.clone(),
        }
    }
}

/// What merging one poll event did.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Snapshot merged. `restarted` means the room's conversation started
    /// over and `new_entries` is its full history.
    Updated {
        new_entries: Vec<SyncedEntry>,
        restarted: bool,
    },
    /// The fetch failed; nothing changed.
    Failed(String),
    /// The room is gone. Reported once.
    Terminated,
    /// The session had already ended.
    Ignored,
}

/// A game session in solo or room mode.
pub struct Session {
    api: Arc<dyn RoomApi>,
    config: SessionConfig,
    room: RoomSession,
    state: PartyState,
    queue: TurnQueue,
    cursor: HistoryCursor,
    poller: Option<PollHandle>,
    events: Option<mpsc::Receiver<PollEvent>>,
    campaign_in_flight: bool,
    pending_floor: Option<u32>,
    /// The hidden floor prompt already sits in the room's queue.
    floor_prompt_queued: bool,
    terminated: bool,
}

impl Session {
    pub fn new(api: Arc<dyn RoomApi>, config: SessionConfig) -> Self {
        let room = RoomSession {
            code: config.room_code.clone(),
            is_creator: config.mode == Mode::Solo || config.is_creator,
            mode: config.mode,
        };
        let state = config.initial_state();
        tracing::info!(mode = ?config.mode, code = %room.code, "session created");

        Self {
            api,
            config,
            room,
            state,
            queue: TurnQueue::new(),
            cursor: HistoryCursor::default(),
            poller: None,
            events: None,
            campaign_in_flight: false,
            pending_floor: None,
            floor_prompt_queued: false,
            terminated: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Read-only party state for the presentation layer.
    pub fn state(&self) -> &PartyState {
        &self.state
    }

    pub fn room(&self) -> &RoomSession {
        &self.room
    }

    pub fn mode(&self) -> Mode {
        self.room.mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn queue(&self) -> &TurnQueue {
        &self.queue
    }

    /// Shared handle to the server, for issuing a begun request elsewhere.
    pub fn api(&self) -> Arc<dyn RoomApi> {
        Arc::clone(&self.api)
    }

    pub fn is_defeated(&self) -> bool {
        self.state.is_defeated()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_resolving(&self) -> bool {
        self.queue.is_resolving()
    }

    pub fn is_starting_campaign(&self) -> bool {
        self.campaign_in_flight
    }

    /// Floor whose description is still owed.
    pub fn pending_floor(&self) -> Option<u32> {
        self.pending_floor
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_stopped())
    }

    // ========================================================================
    // Guards
    // ========================================================================

    fn require_mode(&self, mode: Mode) -> Result<(), SessionError> {
        if self.room.mode != mode {
            return Err(SessionError::WrongMode(self.room.mode));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.terminated {
            return Err(SessionError::Terminated);
        }
        Ok(())
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.state.is_defeated() {
            tracing::warn!("action refused: party is defeated");
            return Err(SessionError::Defeated);
        }
        Ok(())
    }

    fn ensure_creator(&self) -> Result<(), SessionError> {
        if !self.room.is_creator {
            return Err(SessionError::NotCreator);
        }
        Ok(())
    }

    /// Map a transport failure. In a room, a 404 ends the session.
    fn transport_error(&mut self, err: roomapi::Error) -> SessionError {
        if self.room.mode == Mode::Multi && err.is_not_found() {
            self.terminate();
            return SessionError::SessionGone;
        }
        tracing::warn!(error = %err, "request failed");
        SessionError::Transport(err)
    }

    fn terminate(&mut self) {
        if !self.terminated {
            tracing::info!(code = %self.room.code, "session terminated");
        }
        self.terminated = true;
        self.stop_polling();
    }

    // ========================================================================
    // Solo play
    // ========================================================================

    /// Send a player action and apply the narrator's reply.
    ///
    /// The action is rolled and sent with the whole conversation. History
    /// only grows once the reply arrives, so a failed or empty generation
    /// leaves the session exactly as it was.
    pub async fn send_action(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.require_mode(Mode::Solo)?;
        self.ensure_active()?;
        self.ensure_alive()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyAction);
        }

        let mut outcome = TurnOutcome::default();
        if let Some(narration) = self.describe_new_floor().await? {
            outcome.narrations.push(narration);
            if self.state.is_defeated() {
                outcome.defeated = true;
                return Ok(outcome);
            }
        }

        let annotated = dice::annotate(text, self.config.show_roll);
        tracing::debug!(tier = %annotated.tier(), "action rolled");

        let context = prompt::system_context(&self.state, false);
        let messages = self.state.history().to_vec();
        let narrative = self.chat(messages, &annotated.text, context).await?;

        self.state.push_history(HistoryEntry::player(&annotated.text));
        self.state.push_history(HistoryEntry::narrator(&narrative));

        let parsed = directive::parse(&narrative);
        outcome.effects = self.state.apply_effects(&parsed.effects);
        outcome.narrations.push(parsed);
        outcome.action = Some(annotated);

        if self.state.is_defeated() {
            tracing::info!(floor = self.state.floor(), "party defeated");
            outcome.defeated = true;
            return Ok(outcome);
        }

        if self.state.record_resolved_action(self.config.floor_threshold) {
            tracing::info!(floor = self.state.floor(), "party reached a new floor");
            self.pending_floor = Some(self.state.floor());
            outcome.floor_advanced = true;
            match self.describe_new_floor().await {
                Ok(Some(narration)) => outcome.narrations.push(narration),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "new floor description failed, will retry");
                    outcome.floor_pending = true;
                }
            }
        }

        outcome.defeated = self.state.is_defeated();
        Ok(outcome)
    }

    async fn chat(
        &mut self,
        mut messages: Vec<HistoryEntry>,
        message: &str,
        system_context: String,
    ) -> Result<String, SessionError> {
        messages.push(HistoryEntry::player(message));
        let request = ChatRequest {
            messages,
            system_context,
        };

        let result = self.api.chat(&request).await;
        let generation = result.map_err(|e| self.transport_error(e))?;
        match generation.text() {
            Some(text) => Ok(text.to_string()),
            None => {
                tracing::warn!("chat returned no narrative, rolling back");
                Err(SessionError::MalformedGeneration)
            }
        }
    }

    /// Issue the owed "describe new floor" request, if any.
    ///
    /// Solo sessions get the narration back. In a room the narration
    /// arrives through polling, so this returns `None` on success.
    pub async fn describe_new_floor(&mut self) -> Result<Option<ParsedNarrative>, SessionError> {
        let Some(floor) = self.pending_floor else {
            return Ok(None);
        };
        self.ensure_active()?;
        tracing::info!(floor, "describing new floor");

        match self.room.mode {
            Mode::Solo => {
                let context = prompt::system_context(&self.state, false);
                let messages = self.state.history().to_vec();
                let narrative = self.chat(messages, NEW_FLOOR_PROMPT, context).await?;

                self.state.push_history(HistoryEntry::player(NEW_FLOOR_PROMPT));
                self.state.push_history(HistoryEntry::narrator(&narrative));
                self.pending_floor = None;

                let parsed = directive::parse(&narrative);
                self.state.apply_effects(&parsed.effects);
                Ok(Some(parsed))
            }
            Mode::Multi => {
                if self.queue.is_resolving() {
                    return Err(SessionError::ResolutionInFlight);
                }
                // A retry only re-issues the resolution.
                if !self.floor_prompt_queued {
                    let result = self.api.queue_action(NEW_FLOOR_PROMPT).await;
                    result.map_err(|e| self.transport_error(e))?;
                    self.floor_prompt_queued = true;
                }

                let request = self.resolve_request();
                let result = self.api.resolve_turn(&request).await;
                let generation = result.map_err(|e| self.transport_error(e))?;
                if generation.text().is_none() {
                    return Err(SessionError::MalformedGeneration);
                }
                self.pending_floor = None;
                self.floor_prompt_queued = false;
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Campaign start
    // ========================================================================

    /// Start (or restart) the campaign with the opening scene.
    ///
    /// Solo: the party is rebuilt from the config once the opening arrives,
    /// which also ends a defeat. Room: the server resets the room and the
    /// opening arrives through polling, so the outcome has no narrations.
    pub async fn start_campaign(&mut self) -> Result<TurnOutcome, SessionError> {
        match self.room.mode {
            Mode::Solo => self.start_solo_campaign().await,
            Mode::Multi => {
                self.begin_campaign_start()?;
                let result = self.api.start_campaign().await;
                self.complete_campaign_start(result)?;
                Ok(TurnOutcome::default())
            }
        }
    }

    async fn start_solo_campaign(&mut self) -> Result<TurnOutcome, SessionError> {
        self.ensure_active()?;
        let mut fresh = self.config.initial_state();
        let context = prompt::system_context(&fresh, false);
        let narrative = self.chat(Vec::new(), OPENING_PROMPT, context).await?;

        fresh.push_history(HistoryEntry::player(OPENING_PROMPT));
        fresh.push_history(HistoryEntry::narrator(&narrative));
        let parsed = directive::parse(&narrative);
        let effects = fresh.apply_effects(&parsed.effects);

        self.state = fresh;
        self.pending_floor = None;
        tracing::info!("campaign started");

        Ok(TurnOutcome {
            effects,
            defeated: self.state.is_defeated(),
            narrations: vec![parsed],
            ..Default::default()
        })
    }

    /// Mark a room campaign start as in flight.
    pub fn begin_campaign_start(&mut self) -> Result<(), SessionError> {
        self.require_mode(Mode::Multi)?;
        self.ensure_active()?;
        self.ensure_creator()?;
        if self.campaign_in_flight {
            return Err(SessionError::CampaignStartInFlight);
        }
        if self.queue.is_resolving() {
            return Err(SessionError::ResolutionInFlight);
        }
        self.campaign_in_flight = true;
        tracing::info!(code = %self.room.code, "starting campaign");
        Ok(())
    }

    /// Finish a room campaign start with the server's answer.
    pub fn complete_campaign_start(
        &mut self,
        result: Result<Generation, roomapi::Error>,
    ) -> Result<(), SessionError> {
        if !self.campaign_in_flight {
            return Err(SessionError::NotInFlight);
        }
        self.campaign_in_flight = false;

        let generation = result.map_err(|e| self.transport_error(e))?;
        if generation.text().is_none() {
            return Err(SessionError::MalformedGeneration);
        }

        self.pending_floor = None;
        self.floor_prompt_queued = false;
        self.state.reset_floor_progress();
        tracing::info!(code = %self.room.code, "campaign started");
        Ok(())
    }

    // ========================================================================
    // Room play
    // ========================================================================

    /// Roll an action and add it to the room's queue.
    ///
    /// The action becomes part of the history once the creator resolves the
    /// turn and the next poll brings it back.
    pub async fn submit_action(&mut self, text: &str) -> Result<Annotated, SessionError> {
        self.require_mode(Mode::Multi)?;
        self.ensure_active()?;
        self.ensure_alive()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyAction);
        }
        if self.queue.is_resolving() {
            return Err(SessionError::ResolutionInFlight);
        }
        self.describe_new_floor().await?;

        let annotated = dice::annotate(text, self.config.show_roll);
        let result = self.api.queue_action(&annotated.text).await;
        result.map_err(|e| self.transport_error(e))?;

        self.queue.enqueue(annotated.text.clone())?;
        tracing::info!(tier = %annotated.tier(), queued = self.queue.len(), "action queued");
        Ok(annotated)
    }

    fn resolve_request(&self) -> ResolveRequest {
        ResolveRequest {
            system_context: prompt::system_context(&self.state, true),
            stats: self.state.stats(),
        }
    }

    /// Enter `Resolving` and build the request for the pending turn.
    ///
    /// A defeated party may still resolve actions queued before it fell, so
    /// the narrator can close the scene.
    pub fn begin_resolve(&mut self) -> Result<ResolveRequest, SessionError> {
        self.require_mode(Mode::Multi)?;
        self.ensure_active()?;
        self.ensure_creator()?;
        if self.campaign_in_flight {
            return Err(SessionError::CampaignStartInFlight);
        }
        if self.pending_floor.is_some() {
            return Err(SessionError::FloorDescriptionPending);
        }

        let actions = self.queue.begin_resolve()?;
        tracing::info!(actions = actions.len(), "resolving turn");
        Ok(self.resolve_request())
    }

    /// Finish the in-flight resolution. Success clears the queue and counts
    /// the turn; failure keeps every queued action for a retry.
    pub fn complete_resolve(
        &mut self,
        result: Result<Generation, roomapi::Error>,
    ) -> Result<ResolveOutcome, SessionError> {
        if !self.queue.is_resolving() {
            return Err(SessionError::NotInFlight);
        }

        let generation = match result {
            Ok(generation) => generation,
            Err(e) => {
                self.queue.finish_resolve(false)?;
                return Err(self.transport_error(e));
            }
        };
        if generation.text().is_none() {
            self.queue.finish_resolve(false)?;
            tracing::warn!("resolution returned no narrative");
            return Err(SessionError::MalformedGeneration);
        }

        let actions_resolved = self.queue.len();
        self.queue.finish_resolve(true)?;

        let floor_advanced = self.state.record_resolved_action(self.config.floor_threshold);
        if floor_advanced {
            tracing::info!(floor = self.state.floor(), "party reached a new floor");
            self.pending_floor = Some(self.state.floor());
        }

        Ok(ResolveOutcome {
            actions_resolved,
            floor_advanced,
            floor: self.state.floor(),
        })
    }

    /// Resolve the pending turn and, if it reached a new floor, describe it.
    pub async fn resolve_turn(&mut self) -> Result<ResolveOutcome, SessionError> {
        let request = self.begin_resolve()?;
        let result = self.api.resolve_turn(&request).await;
        let outcome = self.complete_resolve(result)?;

        if outcome.floor_advanced {
            if let Err(e) = self.describe_new_floor().await {
                tracing::warn!(error = %e, "new floor description failed, will retry");
            }
        }
        Ok(outcome)
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Start polling the room. No-op if already polling.
    pub fn start_polling(&mut self) -> Result<(), SessionError> {
        self.require_mode(Mode::Multi)?;
        self.ensure_active()?;
        if self.is_polling() {
            return Ok(());
        }

        let (handle, events) =
            PollSynchronizer::new(self.api(), self.config.poll_period).spawn();
        self.poller = Some(handle);
        self.events = Some(events);
        Ok(())
    }

    pub fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.events = None;
    }

    /// Wait for the next poll event. `None` when not polling.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.as_mut()?.recv().await
    }

    /// Merge one poll event into the session.
    pub fn apply_poll(&mut self, event: PollEvent) -> SyncOutcome {
        if self.terminated {
            return SyncOutcome::Ignored;
        }

        match event {
            PollEvent::Snapshot(snapshot) => self.merge_snapshot(snapshot),
            PollEvent::Failed(message) => {
                tracing::debug!(error = %message, "poll failed, state unchanged");
                SyncOutcome::Failed(message)
            }
            PollEvent::SessionGone => {
                self.terminate();
                SyncOutcome::Terminated
            }
        }
    }

    fn merge_snapshot(&mut self, snapshot: RoomSnapshot) -> SyncOutcome {
        if !snapshot.code.is_empty() {
            self.room.code = snapshot.code.clone();
        }
        self.room.is_creator = snapshot.is_creator;

        let seen = self.cursor.seen();
        let mut advance = self.cursor.advance(&snapshot.history);
        if let CursorAdvance::Append(_) = advance {
            // Same length but different content: the room started over.
            let diverged =
                seen > 0 && self.state.history().get(seen - 1) != snapshot.history.get(seen - 1);
            if diverged {
                advance = CursorAdvance::Restart(0..snapshot.history.len());
            }
        }

        let (range, restarted) = match advance {
            CursorAdvance::Append(range) => (range, false),
            CursorAdvance::Restart(range) => {
                tracing::info!("room history restarted");
                self.state.replace_history(Vec::new());
                (range, true)
            }
        };

        let mut new_entries = Vec::with_capacity(range.len());
        for entry in &snapshot.history[range] {
            self.state.push_history(entry.clone());
            new_entries.push(SyncedEntry::new(entry.clone()));
        }

        let floor = match self.pending_floor {
            Some(target) => snapshot.floor.max(target),
            None => snapshot.floor,
        };
        self.state
            .reconcile(snapshot.hp, snapshot.hp_max, floor, &snapshot.inventory);
        self.queue.mirror(&snapshot.pending_actions);

        if !new_entries.is_empty() {
            tracing::debug!(new = new_entries.len(), restarted, "merged history");
        }
        SyncOutcome::Updated {
            new_entries,
            restarted,
        }
    }

    // ========================================================================
    // Leaving and resetting
    // ========================================================================

    /// Leave the room (or end a solo session). Polling stops either way.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        if self.room.mode == Mode::Multi && !self.terminated {
            match self.api.leave_room().await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(error = %e, "leave failed");
                    return Err(SessionError::Transport(e));
                }
            }
        }
        self.terminate();
        Ok(())
    }

    /// Reset the party to its starting state. In a room, the server's room
    /// is reset first.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        if self.room.mode == Mode::Multi {
            if self.queue.is_resolving() {
                return Err(SessionError::ResolutionInFlight);
            }
            let result = self.api.reset().await;
            result.map_err(|e| self.transport_error(e))?;
        }

        self.state = self.config.initial_state();
        self.queue.reset();
        self.cursor.reset();
        self.pending_floor = None;
        self.floor_prompt_queued = false;
        tracing::info!(mode = ?self.room.mode, "session reset");
        Ok(())
    }
}
