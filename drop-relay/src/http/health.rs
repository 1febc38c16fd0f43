//! `/health`: liveness plus a snapshot of relay occupancy.

use crate::server::SignalRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Body of the `/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok`, or `full` once the room limit is reached.
    pub status: &'static str,
    /// Relay version.
    pub version: &'static str,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Live rooms.
    pub rooms: usize,
    /// Configured room limit.
    pub max_rooms: usize,
    /// Seconds since the relay started.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Snapshot the relay.
    pub fn of(relay: &SignalRelay) -> Self {
        let rooms = relay.total_rooms();
        let max_rooms = relay.config().rooms.max_rooms;
        Self {
            status: if rooms >= max_rooms { "full" } else { "ok" },
            version: env!("CARGO_PKG_VERSION"),
            connections: relay.total_connections(),
            rooms,
            max_rooms,
            uptime_seconds: relay.uptime().as_secs(),
        }
    }
}

/// `GET /health`
pub async fn health_handler(Extension(relay): Extension<Arc<SignalRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus::of(&relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::RegisterKind;
    use drop_types::SessionKey;

    #[test]
    fn snapshot_counts_rooms() {
        let relay = SignalRelay::new(Config::default());
        let (id, _rx) = relay.connect();
        relay
            .register(id, &SessionKey::new("k"), RegisterKind::Register)
            .unwrap();

        let status = HealthStatus::of(&relay);
        assert_eq!(status.status, "ok");
        assert_eq!(status.connections, 1);
        assert_eq!(status.rooms, 1);
    }

    #[test]
    fn full_relay_reports_full() {
        let mut config = Config::default();
        config.rooms.max_rooms = 1;
        let relay = SignalRelay::new(config);
        let (id, _rx) = relay.connect();
        relay
            .register(id, &SessionKey::new("only"), RegisterKind::Register)
            .unwrap();

        let json = serde_json::to_value(HealthStatus::of(&relay)).unwrap();
        assert_eq!(json["status"], "full");
        assert_eq!(json["max_rooms"], 1);
    }
}
