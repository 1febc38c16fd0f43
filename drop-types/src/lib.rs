//! # drop-types
//!
//! Wire format types for natdrop.
//!
//! This crate provides the types shared by the relay and the client:
//! - [`SessionKey`], [`Slot`] - Rendezvous identity types
//! - [`SignalMessage`] - JSON text frames exchanged with the signaling relay
//! - [`ControlFrame`], [`TransferMeta`] - Control frames of the transfer protocol
//! - [`WireError`] - Encode/decode errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;
mod signal;

pub use error::WireError;
pub use frames::{ControlFrame, PullControl, PushControl, TransferMeta};
pub use ids::{SessionKey, Slot};
pub use signal::{ErrorReason, SdpType, SessionDescription, SignalMessage};
