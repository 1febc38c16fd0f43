//! Peer engine and data channel seams.
//!
//! The peer-connection engine (ICE, DTLS, SCTP, congestion control) is an
//! external collaborator. The coordinator and the transfer session only see
//! these two traits:
//! - [`PeerEngine`] produces and consumes session descriptions and
//!   candidates, and reports when the data channel opens
//! - [`DataChannel`] is the reliable ordered message channel the transfer
//!   runs over
//!
//! [`LoopbackHub`] ships an in-process implementation used by tests and by
//! same-host transfers.

mod loopback;

pub use loopback::{LoopbackChannel, LoopbackEngine, LoopbackHub};

use async_trait::async_trait;
use drop_types::SessionDescription;
use thiserror::Error;

/// Peer engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A session description was rejected.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// The operation does not fit the engine's signaling state.
    #[error("invalid signaling state: {0}")]
    InvalidState(String),

    /// Engine-internal failure.
    #[error("engine failure: {0}")]
    Failed(String),
}

/// Data channel errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel is closed.
    #[error("channel closed")]
    Closed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Asynchronous notifications from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate to trickle to the peer.
    LocalCandidate(serde_json::Value),
    /// The data channel is open; `take_channel` now returns it.
    ChannelOpen,
    /// The connection failed or was torn down.
    Failed(String),
}

/// One message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// JSON control frame.
    Text(String),
    /// Chunk payload.
    Binary(Vec<u8>),
}

impl ChannelMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Data channel events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel became usable.
    Opened,
    /// A message arrived.
    Message(ChannelMessage),
    /// The remote side closed the channel.
    Closed,
    /// The channel failed.
    Failed(String),
}

/// Peer-connection engine.
///
/// `next_event` must be cancel-safe: the coordinator polls it inside
/// `select!` together with the signaling transport and its timers.
#[async_trait]
pub trait PeerEngine: Send {
    /// The data channel type produced once connected.
    type Channel: DataChannel;

    /// Create and set a local offer.
    async fn create_offer(&mut self) -> Result<SessionDescription, EngineError>;

    /// Apply a remote offer; create and set the answer.
    async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, EngineError>;

    /// Apply the remote answer to our offer.
    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), EngineError>;

    /// Discard our pending local offer.
    async fn rollback(&mut self) -> Result<(), EngineError>;

    /// Add a trickled remote candidate.
    async fn add_remote_candidate(
        &mut self,
        candidate: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Wait for the next engine event; `None` when the engine shut down.
    async fn next_event(&mut self) -> Option<PeerEvent>;

    /// Take the open data channel.
    fn take_channel(&mut self) -> Option<Self::Channel>;
}

/// Reliable, ordered message channel between the two peers.
#[async_trait]
pub trait DataChannel: Send {
    /// Queue a message for sending.
    async fn send(&mut self, message: ChannelMessage) -> Result<(), ChannelError>;

    /// Bytes queued locally and not yet taken by the transport.
    fn buffered_amount(&self) -> u64;

    /// Wait for the next channel event; `None` once nothing more can arrive.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Close the channel.
    async fn close(&mut self);
}
