//! The room server as seen by the session controller.
//!
//! The controller talks to the server through [`RoomApi`] so tests can swap
//! in [`crate::testing::MockRoom`] for the HTTP client.

use async_trait::async_trait;
use roomapi::{ChatRequest, Error, Generation, ResolveRequest, RoomClient, RoomSnapshot};

/// Operations the controller needs from the room server.
#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Canonical room state. `Error::NotFound` means the room is gone.
    async fn poll(&self) -> Result<RoomSnapshot, Error>;

    /// Add an action to the room's pending queue.
    async fn queue_action(&self, message: &str) -> Result<(), Error>;

    /// Resolve the pending queue as one turn.
    async fn resolve_turn(&self, request: &ResolveRequest) -> Result<Generation, Error>;

    /// Restart the room's campaign with an opening narrative.
    async fn start_campaign(&self) -> Result<Generation, Error>;

    /// Single-player generation over the full conversation.
    async fn chat(&self, request: &ChatRequest) -> Result<Generation, Error>;

    async fn leave_room(&self) -> Result<(), Error>;

    async fn reset(&self) -> Result<(), Error>;
}

#[async_trait]
impl RoomApi for RoomClient {
    async fn poll(&self) -> Result<RoomSnapshot, Error> {
        RoomClient::poll(self).await
    }

    async fn queue_action(&self, message: &str) -> Result<(), Error> {
        RoomClient::queue_action(self, message).await
    }

    async fn resolve_turn(&self, request: &ResolveRequest) -> Result<Generation, Error> {
        RoomClient::resolve_turn(self, request).await
    }

    async fn start_campaign(&self) -> Result<Generation, Error> {
        RoomClient::start_campaign(self).await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Generation, Error> {
        RoomClient::chat(self, request).await
    }

    async fn leave_room(&self) -> Result<(), Error> {
        RoomClient::leave_room(self).await
    }

    async fn reset(&self) -> Result<(), Error> {
        RoomClient::reset(self).await
    }
}
