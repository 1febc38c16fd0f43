//! # drop-relay
//!
//! Rendezvous and signaling relay for natdrop.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections from anonymous clients
//! - Pairs two clients per session key into a room
//! - Relays offers, answers, candidates and byes between the pair
//! - Buffers messages for a peer that has not joined yet
//!
//! ## Architecture
//!
//! ```text
//! Sender ──┐                        ┌── Receiver
//!          │   WebSocket (JSON)     │
//!          ├───────────────────────►│
//!          │                        │
//!      ┌───┴────────────────────────┴───┐
//!      │          drop-relay            │
//!      │  ┌──────────────────────────┐  │
//!      │  │ rooms: key -> (a, b, q)  │  │
//!      │  └──────────────────────────┘  │
//!      └────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! - register / join → registered / joined (slot assignment)
//! - peer-ready (relay → both clients, once per pairing)
//! - offer, answer, candidate, bye (relayed verbatim)
//! - error (relay → client)
//!
//! The relay never inspects session descriptions or candidates, and file
//! bytes never pass through it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod server;
pub mod session;
