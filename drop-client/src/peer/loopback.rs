//! In-process peer engine.
//!
//! Engines created from the same [`LoopbackHub`] connect to each other
//! without any network: an offer carries a hub token (`loopback:<n>`), the
//! answering engine claims the channel half parked under that token.
//! Channels count bytes that were sent but not yet received, so
//! `buffered_amount` reflects a slow reader just like a real transport.

use super::{
    ChannelError, ChannelEvent, ChannelMessage, DataChannel, EngineError, PeerEngine, PeerEvent,
};
use async_trait::async_trait;
use dashmap::DashMap;
use drop_types::{SdpType, SessionDescription};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const SDP_PREFIX: &str = "loopback:";

/// Rendezvous point for loopback engines.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    pending: Arc<DashMap<String, LoopbackChannel>>,
    next_token: Arc<AtomicU64>,
}

impl LoopbackHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine attached to this hub.
    pub fn engine(&self) -> LoopbackEngine {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        LoopbackEngine {
            hub: self.clone(),
            local_offer: None,
            channel: None,
            events_tx,
            events_rx,
            remote_candidates: Vec::new(),
        }
    }

    /// Offers created and not yet answered or rolled back.
    pub fn pending_offers(&self) -> usize {
        self.pending.len()
    }
}

fn token_of(description: &SessionDescription, expected: SdpType) -> Result<String, EngineError> {
    if description.sdp_type != expected {
        return Err(EngineError::InvalidDescription(format!(
            "expected {:?}, got {:?}",
            expected, description.sdp_type
        )));
    }
    description
        .sdp
        .strip_prefix(SDP_PREFIX)
        .map(str::to_string)
        .ok_or_else(|| EngineError::InvalidDescription(description.sdp.clone()))
}

/// In-process [`PeerEngine`].
#[derive(Debug)]
pub struct LoopbackEngine {
    hub: LoopbackHub,
    local_offer: Option<(String, LoopbackChannel)>,
    channel: Option<LoopbackChannel>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    remote_candidates: Vec<serde_json::Value>,
}

impl LoopbackEngine {
    /// Candidates received from the peer so far.
    pub fn remote_candidates(&self) -> &[serde_json::Value] {
        &self.remote_candidates
    }

    /// An offer of ours is outstanding.
    pub fn has_local_offer(&self) -> bool {
        self.local_offer.is_some()
    }

    fn emit(&self, event: PeerEvent) {
        // the receiver lives in self, so this cannot fail while we exist
        let _ = self.events_tx.send(event);
    }

    fn trickle(&self, token: &str) {
        self.emit(PeerEvent::LocalCandidate(json!({
            "candidate": format!("candidate:{token} 1 udp 2130706431 127.0.0.1 0 typ host"),
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        })));
    }
}

#[async_trait]
impl PeerEngine for LoopbackEngine {
    type Channel = LoopbackChannel;

    async fn create_offer(&mut self) -> Result<SessionDescription, EngineError> {
        if self.local_offer.is_some() || self.channel.is_some() {
            return Err(EngineError::InvalidState("offer already made".into()));
        }
        let token = self.hub.next_token.fetch_add(1, Ordering::Relaxed).to_string();
        let (ours, theirs) = LoopbackChannel::pair();
        self.hub.pending.insert(token.clone(), theirs);
        self.trickle(&token);
        let offer = SessionDescription::offer(format!("{SDP_PREFIX}{token}"));
        self.local_offer = Some((token, ours));
        Ok(offer)
    }

    async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, EngineError> {
        let token = token_of(&offer, SdpType::Offer)?;
        if self.local_offer.is_some() {
            return Err(EngineError::InvalidState(
                "local offer pending, roll back first".into(),
            ));
        }
        let (_, channel) = self
            .hub
            .pending
            .remove(&token)
            .ok_or_else(|| EngineError::InvalidDescription(format!("unknown offer {token}")))?;
        self.channel = Some(channel);
        self.trickle(&token);
        self.emit(PeerEvent::ChannelOpen);
        Ok(SessionDescription::answer(format!("{SDP_PREFIX}{token}")))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), EngineError> {
        let token = token_of(&answer, SdpType::Answer)?;
        match self.local_offer.take() {
            Some((offered, channel)) if offered == token => {
                self.channel = Some(channel);
                self.emit(PeerEvent::ChannelOpen);
                Ok(())
            }
            other => {
                self.local_offer = other;
                Err(EngineError::InvalidDescription(format!(
                    "answer {token} does not match our offer"
                )))
            }
        }
    }

    async fn rollback(&mut self) -> Result<(), EngineError> {
        if let Some((token, _)) = self.local_offer.take() {
            self.hub.pending.remove(&token);
        }
        Ok(())
    }

    async fn add_remote_candidate(
        &mut self,
        candidate: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.remote_candidates.push(candidate);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events_rx.recv().await
    }

    fn take_channel(&mut self) -> Option<LoopbackChannel> {
        self.channel.take()
    }
}

/// One end of an in-process data channel.
#[derive(Debug)]
pub struct LoopbackChannel {
    tx: Option<mpsc::UnboundedSender<ChannelMessage>>,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
    /// Bytes we sent that the peer has not received yet.
    outbound: Arc<AtomicU64>,
    /// The peer's `outbound` counter.
    inbound: Arc<AtomicU64>,
    opened: bool,
}

impl LoopbackChannel {
    /// Two connected channel ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_out = Arc::new(AtomicU64::new(0));
        let b_out = Arc::new(AtomicU64::new(0));
        let a = Self {
            tx: Some(a_tx),
            rx: a_rx,
            outbound: a_out.clone(),
            inbound: b_out.clone(),
            opened: false,
        };
        let b = Self {
            tx: Some(b_tx),
            rx: b_rx,
            outbound: b_out,
            inbound: a_out,
            opened: false,
        };
        (a, b)
    }
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    async fn send(&mut self, message: ChannelMessage) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        let len = message.len() as u64;
        self.outbound.fetch_add(len, Ordering::Relaxed);
        if tx.send(message).is_err() {
            self.outbound.fetch_sub(len, Ordering::Relaxed);
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if !self.opened {
            self.opened = true;
            return Some(ChannelEvent::Opened);
        }
        match self.rx.recv().await {
            Some(message) => {
                self.inbound
                    .fetch_sub(message.len() as u64, Ordering::Relaxed);
                Some(ChannelEvent::Message(message))
            }
            None => Some(ChannelEvent::Closed),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_message(channel: &mut LoopbackChannel) -> ChannelEvent {
        loop {
            match channel.next_event().await {
                Some(ChannelEvent::Opened) => continue,
                Some(event) => return event,
                None => return ChannelEvent::Closed,
            }
        }
    }

    #[tokio::test]
    async fn channel_pair_exchanges_messages() {
        let (mut a, mut b) = LoopbackChannel::pair();
        assert_eq!(b.next_event().await, Some(ChannelEvent::Opened));

        a.send(ChannelMessage::Text("hi".into())).await.unwrap();
        a.send(ChannelMessage::Binary(vec![1, 2, 3])).await.unwrap();

        assert_eq!(
            next_message(&mut b).await,
            ChannelEvent::Message(ChannelMessage::Text("hi".into()))
        );
        assert_eq!(
            next_message(&mut b).await,
            ChannelEvent::Message(ChannelMessage::Binary(vec![1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn buffered_amount_drains_as_peer_reads() {
        let (mut a, mut b) = LoopbackChannel::pair();
        a.send(ChannelMessage::Binary(vec![0; 100])).await.unwrap();
        a.send(ChannelMessage::Binary(vec![0; 50])).await.unwrap();
        assert_eq!(a.buffered_amount(), 150);

        next_message(&mut b).await;
        assert_eq!(a.buffered_amount(), 50);
        next_message(&mut b).await;
        assert_eq!(a.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn close_is_seen_after_pending_messages() {
        let (mut a, mut b) = LoopbackChannel::pair();
        a.send(ChannelMessage::Text("last".into())).await.unwrap();
        a.close().await;

        assert!(matches!(next_message(&mut b).await, ChannelEvent::Message(_)));
        assert_eq!(next_message(&mut b).await, ChannelEvent::Closed);
        assert_eq!(
            a.send(ChannelMessage::Text("late".into())).await,
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn dropped_peer_fails_sends() {
        let (mut a, b) = LoopbackChannel::pair();
        drop(b);
        assert_eq!(
            a.send(ChannelMessage::Binary(vec![1])).await,
            Err(ChannelError::Closed)
        );
        assert_eq!(a.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn offer_answer_connects_engines() {
        let hub = LoopbackHub::new();
        let mut x = hub.engine();
        let mut y = hub.engine();

        let offer = x.create_offer().await.unwrap();
        assert!(matches!(x.next_event().await, Some(PeerEvent::LocalCandidate(_))));
        assert_eq!(hub.pending_offers(), 1);

        let answer = y.accept_offer(offer).await.unwrap();
        assert!(matches!(y.next_event().await, Some(PeerEvent::LocalCandidate(_))));
        assert_eq!(y.next_event().await, Some(PeerEvent::ChannelOpen));

        x.apply_answer(answer).await.unwrap();
        assert_eq!(x.next_event().await, Some(PeerEvent::ChannelOpen));
        assert_eq!(hub.pending_offers(), 0);

        let mut cx = x.take_channel().unwrap();
        let mut cy = y.take_channel().unwrap();
        cx.send(ChannelMessage::Text("ping".into())).await.unwrap();
        assert_eq!(
            next_message(&mut cy).await,
            ChannelEvent::Message(ChannelMessage::Text("ping".into()))
        );
    }

    #[tokio::test]
    async fn rollback_discards_local_offer() {
        let hub = LoopbackHub::new();
        let mut a = hub.engine();
        let mut b = hub.engine();

        let a_offer = a.create_offer().await.unwrap();
        let _b_offer = b.create_offer().await.unwrap();
        assert_eq!(hub.pending_offers(), 2);

        // b yields: roll back, then answer a's offer
        assert!(b.accept_offer(a_offer.clone()).await.is_err());
        b.rollback().await.unwrap();
        assert!(!b.has_local_offer());
        let answer = b.accept_offer(a_offer).await.unwrap();
        a.apply_answer(answer).await.unwrap();

        assert_eq!(hub.pending_offers(), 0);
        assert!(a.take_channel().is_some());
        assert!(b.take_channel().is_some());
    }

    #[tokio::test]
    async fn unknown_or_mismatched_descriptions_are_rejected() {
        let hub = LoopbackHub::new();
        let mut a = hub.engine();

        assert!(matches!(
            a.accept_offer(SessionDescription::offer("loopback:999")).await,
            Err(EngineError::InvalidDescription(_))
        ));
        assert!(matches!(
            a.accept_offer(SessionDescription::answer("loopback:0")).await,
            Err(EngineError::InvalidDescription(_))
        ));

        a.create_offer().await.unwrap();
        assert!(a
            .apply_answer(SessionDescription::answer("loopback:42"))
            .await
            .is_err());
        assert!(a.has_local_offer());
    }

    #[tokio::test]
    async fn remote_candidates_are_recorded() {
        let hub = LoopbackHub::new();
        let mut a = hub.engine();
        a.add_remote_candidate(json!({"candidate": "c"})).await.unwrap();
        assert_eq!(a.remote_candidates().len(), 1);
    }
}
