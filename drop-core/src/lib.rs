//! # drop-core
//!
//! Pure logic for natdrop (no I/O, instant tests).
//!
//! This crate implements the rendezvous rooms, the negotiation state machine
//! and the transfer bookkeeping without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (sockets, data channels, files) is performed by
//! `drop-relay` and `drop-client`, which interpret the results produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod naming;
pub mod negotiation;
pub mod room;
pub mod transfer;

pub use buffer::{QueuedMessage, ReplayBuffer};
pub use naming::resolve_output_path;
pub use negotiation::{
    FailureReason, Negotiation, NegotiationAction, NegotiationEvent, NegotiationOutcome,
    NegotiationState,
};
pub use room::{RelayOutcome, Registration, Room, RoomError, RoomRegistry};
pub use transfer::{
    chunk_count, chunk_span, Backpressure, CursorError, CursorStep, FlushPolicy, TransferCursor,
    BACKPRESSURE_CHUNKS, DEFAULT_CHUNK_SIZE, DEFAULT_FLUSH_BYTES,
};
