//! # drop-client
//!
//! Client library for natdrop peer-to-peer file transfer.
//!
//! Two endpoints behind NATs meet at a signaling relay under a shared
//! session key, negotiate a data channel through a pluggable peer engine,
//! and move one file over that channel with SHA-256 verification.
//!
//! ## Features
//!
//! - **Glare-free negotiation**: neither side assumes it is the offerer; a
//!   grace interval lets the first offer win
//! - **Two transfer modes**: receiver-driven pull, sender-driven push with
//!   backpressure
//! - **Transport abstraction**: signaling over WebSocket or a mock, peer
//!   engine behind a trait (in-process loopback included)
//! - **Pure state machines**: decisions live in drop-core
//!
//! ## Example
//!
//! ```ignore
//! use drop_client::{send_file, ClientConfig, LoopbackHub, WsSignalTransport};
//!
//! let signal = WsSignalTransport::connect("ws://relay:8765").await?;
//! let engine = hub.engine();
//! let outcome = send_file(&signal, engine, &ClientConfig::default(), &key, path).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod negotiator;
pub mod peer;
pub mod session;
pub mod signal;
pub mod transfer;

pub use error::{ClientError, NegotiationError, TransferError};
pub use negotiator::{connect, Coordinator, Established, NegotiationConfig};
pub use peer::{
    ChannelError, ChannelEvent, ChannelMessage, DataChannel, EngineError, LoopbackChannel,
    LoopbackEngine, LoopbackHub, PeerEngine, PeerEvent,
};
pub use session::{receive_file, send_file, ClientConfig};
pub use signal::{MockSignalTransport, SignalError, SignalTransport, WsSignalTransport};
pub use transfer::{
    fetch_pull, push_file, receive_push, serve_pull, Integrity, SendStats, TransferConfig,
    TransferMode, TransferOutcome,
};
