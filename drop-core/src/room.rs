//! Room registry for the rendezvous relay.
//!
//! A room pairs at most two connections under one [`SessionKey`]. The
//! registry is generic over the connection handle `C` and the message type
//! `M`, so it can be driven from tests without sockets.
//!
//! # Invariants
//!
//! - A room never holds more than two distinct connections.
//! - A room is removed the instant both slots are empty.
//! - A message is queued only while its destination slot is empty, and is
//!   replayed exactly once, never to the slot that sent it.
//! - `peer-ready` is reported once per pairing event.

use std::collections::HashMap;

use drop_types::{SessionKey, Slot};
use thiserror::Error;

use crate::buffer::ReplayBuffer;

/// Registry failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    /// Both slots are held by other connections.
    #[error("room is full")]
    Full,
    /// No room exists for the key.
    #[error("unknown session")]
    UnknownSession,
    /// The connection does not hold a slot in the room.
    #[error("connection is not a member of the room")]
    NotMember,
    /// The other slot is empty and buffering is disabled.
    #[error("peer is not connected")]
    PeerAbsent,
    /// The registry reached its room limit.
    #[error("too many rooms")]
    TooManyRooms,
}

/// One rendezvous room.
#[derive(Debug, Clone)]
pub struct Room<C, M> {
    a: Option<C>,
    b: Option<C>,
    replay: ReplayBuffer<M>,
    ready_pending: bool,
}

impl<C: Clone + PartialEq, M> Room<C, M> {
    fn new(replay_capacity: usize) -> Self {
        Self {
            a: None,
            b: None,
            replay: ReplayBuffer::new(replay_capacity),
            ready_pending: false,
        }
    }

    /// Connection holding `slot`, if any.
    pub fn occupant(&self, slot: Slot) -> Option<&C> {
        match slot {
            Slot::A => self.a.as_ref(),
            Slot::B => self.b.as_ref(),
        }
    }

    fn occupant_mut(&mut self, slot: Slot) -> &mut Option<C> {
        match slot {
            Slot::A => &mut self.a,
            Slot::B => &mut self.b,
        }
    }

    /// Slot held by `conn`, if any.
    pub fn slot_of(&self, conn: &C) -> Option<Slot> {
        if self.a.as_ref() == Some(conn) {
            Some(Slot::A)
        } else if self.b.as_ref() == Some(conn) {
            Some(Slot::B)
        } else {
            None
        }
    }

    /// Both slots are filled.
    pub fn is_paired(&self) -> bool {
        self.a.is_some() && self.b.is_some()
    }

    /// Both slots are empty.
    pub fn is_vacant(&self) -> bool {
        self.a.is_none() && self.b.is_none()
    }

    /// Number of messages waiting for replay.
    pub fn queued(&self) -> usize {
        self.replay.len()
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration<M> {
    /// Slot held by the caller.
    pub slot: Slot,
    /// False when the caller already held the slot (idempotent re-register).
    pub newly_joined: bool,
    /// Queued messages from the other slot, in arrival order.
    pub replay: Vec<M>,
}

/// What to do with a relayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome<C, M> {
    /// Send `message` to connection `to` now.
    Deliver {
        /// Destination connection.
        to: C,
        /// Message to deliver.
        message: M,
    },
    /// Destination slot is empty; message waits for replay.
    Queued {
        /// An older message was dropped to make room.
        evicted: bool,
    },
}

/// All live rooms.
#[derive(Debug, Clone)]
pub struct RoomRegistry<C, M> {
    rooms: HashMap<SessionKey, Room<C, M>>,
    replay_capacity: usize,
    max_rooms: usize,
}

impl<C: Clone + PartialEq, M> RoomRegistry<C, M> {
    /// Create a registry.
    ///
    /// `replay_capacity` bounds each room's replay queue; 0 disables
    /// buffering and makes relays to an empty slot fail with
    /// [`RoomError::PeerAbsent`].
    pub fn new(replay_capacity: usize, max_rooms: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            replay_capacity,
            max_rooms,
        }
    }

    /// Claim the first empty slot of the room for `conn`.
    ///
    /// Re-registering a connection that already holds a slot returns the
    /// same slot without replay and without a new pairing event.
    pub fn register(&mut self, key: &SessionKey, conn: C) -> Result<Registration<M>, RoomError> {
        if !self.rooms.contains_key(key) && self.rooms.len() >= self.max_rooms {
            return Err(RoomError::TooManyRooms);
        }
        let capacity = self.replay_capacity;
        let room = self
            .rooms
            .entry(key.clone())
            .or_insert_with(|| Room::new(capacity));

        if let Some(slot) = room.slot_of(&conn) {
            return Ok(Registration {
                slot,
                newly_joined: false,
                replay: Vec::new(),
            });
        }

        let slot = if room.a.is_none() {
            Slot::A
        } else if room.b.is_none() {
            Slot::B
        } else {
            return Err(RoomError::Full);
        };
        *room.occupant_mut(slot) = Some(conn);
        if room.is_paired() {
            room.ready_pending = true;
        }

        let replay = self.replay_to(key, slot);
        Ok(Registration {
            slot,
            newly_joined: true,
            replay,
        })
    }

    /// Remove and return the queued messages that `joining` did not send.
    pub fn replay_to(&mut self, key: &SessionKey, joining: Slot) -> Vec<M> {
        self.rooms
            .get_mut(key)
            .map(|room| room.replay.drain_for(joining))
            .unwrap_or_default()
    }

    /// Both connections of a freshly paired room, at most once per pairing.
    pub fn take_ready_pair(&mut self, key: &SessionKey) -> Option<(C, C)> {
        let room = self.rooms.get_mut(key)?;
        if !room.ready_pending {
            return None;
        }
        match (&room.a, &room.b) {
            (Some(a), Some(b)) => {
                let pair = (a.clone(), b.clone());
                room.ready_pending = false;
                Some(pair)
            }
            _ => None,
        }
    }

    /// Route `message` from `origin` to the other slot of the room.
    pub fn relay(
        &mut self,
        key: &SessionKey,
        origin: &C,
        message: M,
    ) -> Result<RelayOutcome<C, M>, RoomError> {
        let room = self.rooms.get_mut(key).ok_or(RoomError::UnknownSession)?;
        let from = room.slot_of(origin).ok_or(RoomError::NotMember)?;
        let to = from.other();

        if let Some(peer) = room.occupant(to) {
            return Ok(RelayOutcome::Deliver {
                to: peer.clone(),
                message,
            });
        }
        if room.replay.capacity() == 0 {
            return Err(RoomError::PeerAbsent);
        }
        let evicted = room.replay.push(from, message).is_some();
        Ok(RelayOutcome::Queued { evicted })
    }

    /// Release the slot held by `conn`.
    ///
    /// Returns true when the room became empty and was removed.
    pub fn unregister(&mut self, key: &SessionKey, conn: &C) -> bool {
        let Some(room) = self.rooms.get_mut(key) else {
            return false;
        };
        let Some(slot) = room.slot_of(conn) else {
            return false;
        };
        *room.occupant_mut(slot) = None;
        room.ready_pending = false;

        if room.is_vacant() {
            self.rooms.remove(key);
            true
        } else {
            false
        }
    }

    /// Look up a room.
    pub fn room(&self, key: &SessionKey) -> Option<&Room<C, M>> {
        self.rooms.get(key)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// No live rooms.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
