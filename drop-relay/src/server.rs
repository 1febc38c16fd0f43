//! Main SignalRelay server coordination.
//!
//! SignalRelay owns the room registry, the outbound queue of every live
//! connection, and the counters exposed on `/metrics`.
//!
//! Registry mutations, replay and relay all happen under one mutex, and
//! outbound messages are enqueued while that mutex is held. A connection
//! therefore sees its registration reply, then replayed messages, then
//! `peer-ready`, and relayed messages in the order they were accepted.

use crate::config::Config;
use crate::error::SignalingError;
use crate::limits::RateLimits;
use dashmap::DashMap;
use drop_core::{RelayOutcome, RoomRegistry};
use drop_types::{SessionKey, SignalMessage, Slot};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Relay-assigned identity of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which registration verb the client used; selects the reply type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// `register` → `registered`
    Register,
    /// `join` → `joined`
    Join,
}

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Total successful registrations.
    pub registrations_total: AtomicU64,
    /// Total `peer-ready` pairings announced.
    pub pairings_total: AtomicU64,
    /// Messages delivered directly to the other peer.
    pub messages_relayed: AtomicU64,
    /// Messages queued for a peer that was absent.
    pub messages_queued: AtomicU64,
    /// Messages delivered from the replay queue.
    pub messages_replayed: AtomicU64,
    /// Queued messages dropped because the replay queue was full.
    pub replay_evictions: AtomicU64,
    /// Total rate limit rejections (connection + message).
    pub rate_limit_hits: AtomicU64,
    /// Total error replies sent to clients.
    pub errors_total: AtomicU64,
}

/// Sender half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedSender<String>;

/// Main relay server.
pub struct SignalRelay {
    config: Config,
    /// Rate limiters for connections and messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters, gauges).
    metrics: RelayMetrics,
    /// Rooms keyed by session key; messages are the raw relayed JSON text.
    rooms: Mutex<RoomRegistry<ConnectionId, String>>,
    /// Outbound queue per live connection.
    connections: DashMap<ConnectionId, Outbound>,
    next_id: AtomicU64,
    started_at: Instant,
}

impl std::fmt::Debug for SignalRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl SignalRelay {
    /// Create a new SignalRelay with the given config.
    pub fn new(config: Config) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let rooms = RoomRegistry::new(config.rooms.replay_capacity, config.rooms.max_rooms);
        Self {
            config,
            rate_limits,
            metrics: RelayMetrics::default(),
            rooms: Mutex::new(rooms),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            started_at: Instant::now(),
        }
    }

    /// Time since the relay was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of live connections.
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    /// Number of live rooms.
    pub fn total_rooms(&self) -> usize {
        self.lock_rooms().len()
    }

    fn lock_rooms(&self) -> MutexGuard<'_, RoomRegistry<ConnectionId, String>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and outbound queue for a new connection.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Connection {} opened", id);
        (id, rx)
    }

    /// Enqueue raw text for a connection.
    ///
    /// Returns false when the connection is gone; the failure is logged and
    /// otherwise ignored.
    pub fn deliver(&self, to: ConnectionId, text: String) -> bool {
        let delivered = self
            .connections
            .get(&to)
            .map(|tx| tx.send(text).is_ok())
            .unwrap_or(false);
        if !delivered {
            tracing::warn!("Dropping message for closed connection {}", to);
        }
        delivered
    }

    /// Serialize and enqueue a relay-originated message.
    pub fn send_message(&self, to: ConnectionId, message: &SignalMessage) -> bool {
        match message.to_json() {
            Ok(text) => self.deliver(to, text),
            Err(e) => {
                tracing::warn!("Failed to encode {} for {}: {}", message.kind(), to, e);
                false
            }
        }
    }

    /// Reply with an error frame.
    pub fn send_error(&self, to: ConnectionId, err: &SignalingError) {
        self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Rejecting request from {}: {}", to, err);
        self.send_message(to, &SignalMessage::Error {
            reason: err.reason(),
        });
    }

    /// Register `conn` in the room for `key`.
    ///
    /// Sends the `registered`/`joined` reply, replays queued messages and
    /// announces `peer-ready` when this registration completed the pair.
    pub fn register(
        &self,
        conn: ConnectionId,
        key: &SessionKey,
        kind: RegisterKind,
    ) -> Result<Slot, SignalingError> {
        let mut rooms = self.lock_rooms();
        let registration = rooms.register(key, conn)?;
        let slot = registration.slot;

        let reply = match kind {
            RegisterKind::Register => SignalMessage::Registered {
                session_key: key.clone(),
                slot,
            },
            RegisterKind::Join => SignalMessage::Joined {
                session_key: key.clone(),
                slot,
            },
        };
        self.send_message(conn, &reply);

        if registration.newly_joined {
            self.metrics.registrations_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!("{} registered in {} as slot {}", conn, key, slot);
        }

        let replayed = registration.replay.len() as u64;
        for message in registration.replay {
            self.deliver(conn, message);
        }
        if replayed > 0 {
            self.metrics
                .messages_replayed
                .fetch_add(replayed, Ordering::Relaxed);
            tracing::debug!("Replayed {} message(s) to {} in {}", replayed, conn, key);
        }

        self.notify_ready_locked(&mut rooms, key);
        Ok(slot)
    }

    /// Send `peer-ready` to both members if the room was just paired.
    pub fn notify_ready_if_paired(&self, key: &SessionKey) {
        let mut rooms = self.lock_rooms();
        self.notify_ready_locked(&mut rooms, key);
    }

    fn notify_ready_locked(&self, rooms: &mut RoomRegistry<ConnectionId, String>, key: &SessionKey) {
        let Some((a, b)) = rooms.take_ready_pair(key) else {
            return;
        };
        let ready = SignalMessage::PeerReady {
            session_key: key.clone(),
        };
        self.send_message(a, &ready);
        self.send_message(b, &ready);
        self.metrics.pairings_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Room {} paired ({} <-> {})", key, a, b);
    }

    /// Forward `raw` unchanged to the other member of the room, or queue it.
    pub fn relay(&self, conn: ConnectionId, key: &SessionKey, raw: String) -> Result<(), SignalingError> {
        let mut rooms = self.lock_rooms();
        match rooms.relay(key, &conn, raw)? {
            RelayOutcome::Deliver { to, message } => {
                if self.deliver(to, message) {
                    self.metrics.messages_relayed.fetch_add(1, Ordering::Relaxed);
                }
            }
            RelayOutcome::Queued { evicted } => {
                self.metrics.messages_queued.fetch_add(1, Ordering::Relaxed);
                if evicted {
                    self.metrics.replay_evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Replay queue full in {}, dropped oldest message", key);
                }
                tracing::debug!("Queued message from {} in {} for absent peer", conn, key);
            }
        }
        Ok(())
    }

    /// Release `conn`'s slot in the room for `key`.
    pub fn unregister(&self, conn: ConnectionId, key: &SessionKey) {
        let removed = self.lock_rooms().unregister(key, &conn);
        if removed {
            tracing::debug!("Room {} closed", key);
        } else {
            tracing::debug!("{} left {}", conn, key);
        }
    }

    /// Forget a closed connection and the slot it held.
    pub fn disconnect(&self, conn: ConnectionId, key: Option<&SessionKey>) {
        if let Some(key) = key {
            self.unregister(conn, key);
        }
        self.connections.remove(&conn);
        tracing::debug!("Connection {} closed", conn);
    }
}
