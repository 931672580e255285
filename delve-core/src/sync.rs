//! Poll synchronization with the room server.
//!
//! A background task fetches the room snapshot every period and hands it to
//! the session controller over a channel. The controller owns the party
//! state; the task never touches it. Fetches run one at a time, so
//! snapshots arrive in the order the server produced them. Ticks that come
//! due while a fetch is in flight are skipped rather than queued, so a slow
//! fetch delays the next one instead of overlapping it.
//!
//! The task stops when its [`PollHandle`] is stopped or dropped, when the
//! receiver goes away, or after reporting [`PollEvent::SessionGone`].

use crate::api::RoomApi;
use roomapi::{HistoryEntry, RoomSnapshot};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default polling period.
pub const POLL_PERIOD: Duration = Duration::from_secs(2);

const CHANNEL_CAPACITY: usize = 16;

/// What one poll tick produced.
#[derive(Debug, Clone)]
pub enum PollEvent {
    Snapshot(RoomSnapshot),
    /// Transport failure; polling continues.
    Failed(String),
    /// The server no longer knows the room. Always the last event.
    SessionGone,
}

/// Tracks how much of the server history has been merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCursor {
    seen: usize,
}

/// How a server history relates to what was already merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorAdvance {
    /// Indices of entries not merged yet (possibly empty).
    Append(Range<usize>),
    /// The server history is shorter than what was seen: the room was
    /// reset or restarted, and the whole history is new.
    Restart(Range<usize>),
}

impl HistoryCursor {
    pub fn new(seen: usize) -> Self {
        Self { seen }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Move the cursor to the end of `history`.
    pub fn advance(&mut self, history: &[HistoryEntry]) -> CursorAdvance {
        let len = history.len();
        let advance = if len < self.seen {
            CursorAdvance::Restart(0..len)
        } else {
            CursorAdvance::Append(self.seen..len)
        };
        self.seen = len;
        advance
    }

    pub fn reset(&mut self) {
        self.seen = 0;
    }
}

/// Handle to a running poll task.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Recurring fetch of the room snapshot.
pub struct PollSynchronizer {
    api: Arc<dyn RoomApi>,
    period: Duration,
}

impl PollSynchronizer {
    pub fn new(api: Arc<dyn RoomApi>, period: Duration) -> Self {
        Self { api, period }
    }

    /// Spawn the poll task on the current runtime.
    pub fn spawn(self) -> (PollHandle, mpsc::Receiver<PollEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(tx, cancel.clone()));
        (PollHandle { cancel, task }, rx)
    }

    async fn run(self, tx: mpsc::Sender<PollEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(period_ms = self.period.as_millis() as u64, "poll task started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.api.poll() => result,
            };

            let event = match result {
                Ok(snapshot) => PollEvent::Snapshot(snapshot),
                Err(e) if e.is_not_found() => {
                    tracing::info!("room is gone, stopping poll task");
                    let _ = tx.send(PollEvent::SessionGone).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "poll failed");
                    PollEvent::Failed(e.to_string())
                }
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }

        tracing::debug!("poll task stopped");
    }
}
