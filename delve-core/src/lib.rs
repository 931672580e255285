//! Narrative dungeon crawler engine.
//!
//! This crate provides:
//! - Directive parsing for generated narrative (`[HP: -3]`, `[ITEM: Dagger]`)
//! - d20 action annotation
//! - Party state with clamped HP, a case-insensitive inventory and floors
//! - A turn queue and poll synchronization for shared rooms
//! - `Session`, the controller that ties them to a room server
//!
//! # Quick Start
//!
//! ```ignore
//! use delve_core::{Session, SessionConfig};
//! use roomapi::RoomClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(RoomClient::from_env()?);
//!     let mut session = Session::new(client, SessionConfig::solo());
//!
//!     let opening = session.start_campaign().await?;
//!     println!("{}", opening.to_plain());
//!
//!     let turn = session.send_action("I open the yellow door").await?;
//!     println!("{}", turn.to_plain());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod dice;
pub mod directive;
pub mod party;
pub mod prompt;
pub mod queue;
pub mod session;
pub mod sync;
pub mod testing;

// Primary public API
pub use api::RoomApi;
pub use dice::{annotate, ActionRoll, Annotated, Tier};
pub use directive::{parse, Directive, ParsedNarrative};
pub use party::{apply, EffectOutcome, Inventory, PartyState, FLOOR_THRESHOLD};
pub use queue::{TurnPhase, TurnQueue};
pub use session::{
    Mode, ResolveOutcome, RoomSession, Session, SessionConfig, SessionError, SyncOutcome,
    SyncedEntry, TurnOutcome,
};
pub use sync::{PollEvent, PollSynchronizer, POLL_PERIOD};
pub use testing::{MockRoom, TestHarness};
