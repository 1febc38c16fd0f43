//! Flood protection for the signaling relay.
//!
//! Two independent governor quotas, both keyed and stored in a DashMap:
//! new WebSocket connections per remote IP, and signaling frames per
//! connection. Quotas are per minute and burst up to their full size.

use crate::config::LimitsConfig;
use crate::server::ConnectionId;
use dashmap::DashMap;
use governor::clock::{DefaultClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;

type Keyed<K> = RateLimiter<K, DashMap<K, InMemoryState>, DefaultClock, NoOpMiddleware<QuantaInstant>>;

/// A quota was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Too many connection attempts from one address.
    #[error("too many connections from {0}")]
    Connections(IpAddr),
    /// Too many frames on one connection.
    #[error("too many messages on {0}")]
    Messages(ConnectionId),
}

/// Connection and message quotas, cheap to clone.
#[derive(Clone)]
pub struct RateLimits {
    per_ip: Arc<Keyed<IpAddr>>,
    per_connection: Arc<Keyed<ConnectionId>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (ips, connections) = self.tracked();
        f.debug_struct("RateLimits")
            .field("tracked_ips", &ips)
            .field("tracked_connections", &connections)
            .finish()
    }
}

fn per_minute(limit: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN))
}

impl RateLimits {
    /// Build both quotas. A zero limit is treated as one per minute.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            per_ip: Arc::new(RateLimiter::keyed(per_minute(config.connections_per_ip))),
            per_connection: Arc::new(RateLimiter::keyed(per_minute(config.messages_per_minute))),
        }
    }

    /// Admit a new connection from `ip`.
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.per_ip
            .check_key(&ip)
            .map_err(|_| RateLimitError::Connections(ip))
    }

    /// Admit one signaling frame on connection `id`.
    pub fn check_message(&self, id: ConnectionId) -> Result<(), RateLimitError> {
        self.per_connection
            .check_key(&id)
            .map_err(|_| RateLimitError::Messages(id))
    }

    /// Keys currently tracked: (addresses, connections).
    pub fn tracked(&self) -> (usize, usize) {
        (self.per_ip.len(), self.per_connection.len())
    }

    /// Forget keys whose quota has fully recharged.
    pub fn shrink(&self) {
        self.per_ip.retain_recent();
        self.per_connection.retain_recent();
        self.per_ip.shrink_to_fit();
        self.per_connection.shrink_to_fit();
    }
}
