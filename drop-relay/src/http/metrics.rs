//! Prometheus metrics endpoint.

use crate::server::SignalRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(relay): Extension<Arc<SignalRelay>>) -> impl IntoResponse {
    let m = relay.metrics();

    // Gauges
    let connections = relay.total_connections();
    let rooms = relay.total_rooms();
    let (limited_ips, limited_connections) = relay.rate_limits().tracked();

    // Counters
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let registrations = m.registrations_total.load(Ordering::Relaxed);
    let pairings = m.pairings_total.load(Ordering::Relaxed);
    let relayed = m.messages_relayed.load(Ordering::Relaxed);
    let queued = m.messages_queued.load(Ordering::Relaxed);
    let replayed = m.messages_replayed.load(Ordering::Relaxed);
    let evictions = m.replay_evictions.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP natdrop_relay_connections_active Number of open WebSocket connections
# TYPE natdrop_relay_connections_active gauge
natdrop_relay_connections_active {connections}

# HELP natdrop_relay_rooms_active Number of live rooms
# TYPE natdrop_relay_rooms_active gauge
natdrop_relay_rooms_active {rooms}

# HELP natdrop_relay_rate_limit_keys Keys tracked by the rate limiters
# TYPE natdrop_relay_rate_limit_keys gauge
natdrop_relay_rate_limit_keys{{kind="ip"}} {limited_ips}
natdrop_relay_rate_limit_keys{{kind="connection"}} {limited_connections}

# HELP natdrop_relay_info Server information
# TYPE natdrop_relay_info gauge
natdrop_relay_info{{version="{version}"}} 1

# HELP natdrop_relay_connections_total Total connections accepted
# TYPE natdrop_relay_connections_total counter
natdrop_relay_connections_total {conns_total}

# HELP natdrop_relay_registrations_total Total successful registrations
# TYPE natdrop_relay_registrations_total counter
natdrop_relay_registrations_total {registrations}

# HELP natdrop_relay_pairings_total Total rooms paired
# TYPE natdrop_relay_pairings_total counter
natdrop_relay_pairings_total {pairings}

# HELP natdrop_relay_messages_relayed_total Messages delivered directly
# TYPE natdrop_relay_messages_relayed_total counter
natdrop_relay_messages_relayed_total {relayed}

# HELP natdrop_relay_messages_queued_total Messages queued for an absent peer
# TYPE natdrop_relay_messages_queued_total counter
natdrop_relay_messages_queued_total {queued}

# HELP natdrop_relay_messages_replayed_total Messages delivered from replay queues
# TYPE natdrop_relay_messages_replayed_total counter
natdrop_relay_messages_replayed_total {replayed}

# HELP natdrop_relay_replay_evictions_total Queued messages dropped on overflow
# TYPE natdrop_relay_replay_evictions_total counter
natdrop_relay_replay_evictions_total {evictions}

# HELP natdrop_relay_rate_limit_hits_total Total rate limit rejections
# TYPE natdrop_relay_rate_limit_hits_total counter
natdrop_relay_rate_limit_hits_total {rate_limits}

# HELP natdrop_relay_errors_total Total error replies
# TYPE natdrop_relay_errors_total counter
natdrop_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
