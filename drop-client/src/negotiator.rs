//! Negotiation Coordinator.
//!
//! Interprets the pure [`Negotiation`] state machine from drop-core: it feeds
//! signaling messages, engine events and timer expiries in as events and
//! performs the resulting actions against the signaling transport and the
//! peer engine.
//!
//! ```text
//! relay ──recv──┐                    ┌── send ──▶ relay
//! engine ───────┼─▶ Negotiation ─────┼── create/accept/apply ──▶ engine
//! timers ───────┘   (drop-core)      └── arm/cancel ──▶ timers
//! ```
//!
//! Everything runs in one `select!` loop, so a cancelled grace timer can
//! never fire afterwards.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use drop_core::{
    Negotiation, NegotiationAction, NegotiationEvent, NegotiationOutcome, NegotiationState,
};
use drop_types::{SessionKey, SignalMessage, Slot};
use tokio::time::{sleep, Instant, Sleep};

use crate::error::NegotiationError;
use crate::peer::{PeerEngine, PeerEvent};
use crate::signal::{SignalError, SignalTransport};

/// Default wait for a remote offer after `peer-ready`.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

/// Default wait for the other side to join the room.
pub const DEFAULT_PEER_WAIT: Duration = Duration::from_secs(60);

/// Coordinator timing and identity.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Wait for a remote offer before offering proactively.
    pub grace: Duration,
    /// Wait for the second slot to fill.
    pub peer_wait: Duration,
    /// Role label sent with `register`.
    pub role: String,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            peer_wait: DEFAULT_PEER_WAIT,
            role: "peer".to_string(),
        }
    }
}

impl NegotiationConfig {
    /// Set the grace interval.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Set the wait-for-peer deadline.
    pub fn with_peer_wait(mut self, peer_wait: Duration) -> Self {
        self.peer_wait = peer_wait;
        self
    }

    /// Set the role label.
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }
}

/// An open data channel, ready for the transfer session.
pub struct Established<E: PeerEngine> {
    /// The channel.
    pub channel: E::Channel,
    /// The engine, kept alive for the channel's lifetime.
    pub engine: E,
    /// Slot assigned by the relay.
    pub slot: Slot,
}

impl<E: PeerEngine> fmt::Debug for Established<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// What woke the coordinator up.
enum Wake {
    Signal(Result<Option<SignalMessage>, SignalError>),
    Engine(Option<PeerEvent>),
    Grace,
    PeerWait,
}

/// Drives one negotiation for one session key.
pub struct Coordinator<'a, S: SignalTransport + ?Sized, E: PeerEngine> {
    signal: &'a S,
    engine: E,
    config: NegotiationConfig,
    key: SessionKey,
    negotiation: Negotiation,
    registered: bool,
    grace: Pin<Box<Sleep>>,
    grace_armed: bool,
    peer_deadline: Pin<Box<Sleep>>,
}

impl<'a, S: SignalTransport + ?Sized, E: PeerEngine> Coordinator<'a, S, E> {
    /// Create a coordinator for `key`.
    pub fn new(signal: &'a S, engine: E, config: NegotiationConfig, key: SessionKey) -> Self {
        let grace = Box::pin(sleep(config.grace));
        let peer_deadline = Box::pin(sleep(config.peer_wait));
        Self {
            signal,
            engine,
            config,
            key,
            negotiation: Negotiation::new(),
            registered: false,
            grace,
            grace_armed: false,
            peer_deadline,
        }
    }

    /// Current negotiation phase.
    pub fn state(&self) -> NegotiationState {
        self.negotiation.state()
    }

    /// Send `register` and start the wait-for-peer deadline.
    pub async fn register(&mut self) -> Result<(), NegotiationError> {
        if self.registered {
            return Ok(());
        }
        self.signal
            .send(&SignalMessage::Register {
                role: self.config.role.clone(),
                session_key: Some(self.key.clone()),
            })
            .await?;
        self.registered = true;
        self.peer_deadline
            .as_mut()
            .reset(Instant::now() + self.config.peer_wait);
        tracing::debug!("Registered for session {} as {}", self.key, self.config.role);
        Ok(())
    }

    /// Run until the data channel is open or negotiation fails.
    ///
    /// Registers first if [`register`](Self::register) was not called.
    pub async fn establish(mut self) -> Result<Established<E>, NegotiationError> {
        self.register().await?;

        let outcome = loop {
            let wake = self.wait().await;
            let Some(event) = self.translate(wake).await else {
                continue;
            };
            if let Some(outcome) = self.process(event).await {
                break outcome;
            }
        };

        match outcome {
            NegotiationOutcome::Established => {
                let channel = self.engine.take_channel().ok_or_else(|| {
                    NegotiationError::Transport("engine reported open without a channel".into())
                })?;
                let slot = self.negotiation.local_slot().ok_or_else(|| {
                    NegotiationError::Transport("channel opened before registration".into())
                })?;
                tracing::info!("Data channel open for session {} (slot {})", self.key, slot);
                Ok(Established {
                    channel,
                    engine: self.engine,
                    slot,
                })
            }
            NegotiationOutcome::Failed(reason) => {
                tracing::info!("Negotiation for session {} failed: {}", self.key, reason);
                Err(reason.into())
            }
        }
    }

    async fn wait(&mut self) -> Wake {
        let signal = self.signal;
        let grace_armed = self.grace_armed;
        let waiting_for_peer = matches!(
            self.negotiation.state(),
            NegotiationState::Idle | NegotiationState::AwaitingPeer
        );

        tokio::select! {
            message = signal.recv() => Wake::Signal(message),
            event = self.engine.next_event() => Wake::Engine(event),
            _ = &mut self.grace, if grace_armed => Wake::Grace,
            _ = &mut self.peer_deadline, if waiting_for_peer => Wake::PeerWait,
        }
    }

    async fn translate(&mut self, wake: Wake) -> Option<NegotiationEvent> {
        match wake {
            Wake::Signal(Ok(Some(message))) => self.signal_event(message),
            Wake::Signal(Ok(None)) => Some(NegotiationEvent::SignalingClosed),
            Wake::Signal(Err(e)) => {
                tracing::warn!("Signaling receive failed: {}", e);
                Some(NegotiationEvent::SignalingClosed)
            }
            Wake::Engine(Some(PeerEvent::LocalCandidate(candidate))) => {
                let message = SignalMessage::Candidate {
                    session_key: Some(self.key.clone()),
                    candidate,
                };
                match self.signal.send(&message).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!("Failed to send candidate: {}", e);
                        Some(NegotiationEvent::SignalingClosed)
                    }
                }
            }
            Wake::Engine(Some(PeerEvent::ChannelOpen)) => Some(NegotiationEvent::ChannelOpened),
            Wake::Engine(Some(PeerEvent::Failed(reason))) => {
                Some(NegotiationEvent::TransportFailed { reason })
            }
            Wake::Engine(None) => Some(NegotiationEvent::TransportFailed {
                reason: "peer engine shut down".into(),
            }),
            Wake::Grace => {
                self.grace_armed = false;
                Some(NegotiationEvent::GraceExpired)
            }
            Wake::PeerWait => Some(NegotiationEvent::PeerWaitExpired),
        }
    }

    fn signal_event(&self, message: SignalMessage) -> Option<NegotiationEvent> {
        tracing::debug!("Signal {} in state {:?}", message.kind(), self.state());
        match message {
            SignalMessage::Registered { slot, .. } | SignalMessage::Joined { slot, .. } => {
                Some(NegotiationEvent::Registered { slot })
            }
            SignalMessage::PeerReady { .. } => Some(NegotiationEvent::PeerReady),
            SignalMessage::Offer { sdp, .. } => Some(NegotiationEvent::OfferReceived { offer: sdp }),
            SignalMessage::Answer { sdp, .. } => {
                Some(NegotiationEvent::AnswerReceived { answer: sdp })
            }
            SignalMessage::Candidate { candidate, .. } => {
                Some(NegotiationEvent::CandidateReceived { candidate })
            }
            SignalMessage::Bye { .. } => Some(NegotiationEvent::PeerLeft),
            SignalMessage::Error { reason } if self.state() == NegotiationState::Idle => {
                Some(NegotiationEvent::RegistrationRejected { reason })
            }
            SignalMessage::Error { reason } => {
                tracing::warn!("Relay reported {} for session {}", reason, self.key);
                None
            }
            SignalMessage::Register { .. } | SignalMessage::Join { .. } => None,
        }
    }

    /// Feed one event through the state machine and execute its actions.
    ///
    /// Actions that fail turn into follow-up events. Returns the outcome
    /// once one is emitted.
    async fn process(&mut self, event: NegotiationEvent) -> Option<NegotiationOutcome> {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let (next, actions) = std::mem::take(&mut self.negotiation).on_event(event);
            self.negotiation = next;

            for action in actions {
                if let Some(follow_up) = self.execute(action.clone()).await {
                    pending.push_back(follow_up);
                }
                if let NegotiationAction::Emit(outcome) = action {
                    return Some(outcome);
                }
            }
        }
        None
    }

    async fn execute(&mut self, action: NegotiationAction) -> Option<NegotiationEvent> {
        match action {
            NegotiationAction::StartGraceTimer => {
                self.grace.as_mut().reset(Instant::now() + self.config.grace);
                self.grace_armed = true;
                tracing::debug!("Peer ready, waiting {:?} for a remote offer", self.config.grace);
                None
            }
            NegotiationAction::CancelGraceTimer => {
                self.grace_armed = false;
                None
            }
            NegotiationAction::SendOffer => match self.engine.create_offer().await {
                Ok(offer) => {
                    tracing::debug!("No remote offer, sending ours");
                    self.send(SignalMessage::Offer {
                        session_key: Some(self.key.clone()),
                        sdp: offer,
                    })
                    .await
                }
                Err(e) => Some(transport_failed(e)),
            },
            NegotiationAction::AnswerOffer { offer } => {
                match self.engine.accept_offer(offer).await {
                    Ok(answer) => {
                        self.send(SignalMessage::Answer {
                            session_key: Some(self.key.clone()),
                            sdp: answer,
                        })
                        .await
                    }
                    Err(e) => Some(transport_failed(e)),
                }
            }
            NegotiationAction::RollbackLocalOffer => {
                tracing::debug!("Offers crossed, yielding to slot a");
                self.engine.rollback().await.err().map(transport_failed)
            }
            NegotiationAction::ApplyAnswer { answer } => {
                self.engine.apply_answer(answer).await.err().map(transport_failed)
            }
            NegotiationAction::IgnoreOffer => {
                tracing::debug!("Ignoring offer in state {:?}", self.state());
                None
            }
            NegotiationAction::AddCandidate { candidate } => {
                if let Err(e) = self.engine.add_remote_candidate(candidate).await {
                    tracing::warn!("Engine rejected remote candidate: {}", e);
                }
                None
            }
            NegotiationAction::SendBye => {
                let bye = SignalMessage::Bye {
                    session_key: Some(self.key.clone()),
                };
                if let Err(e) = self.signal.send(&bye).await {
                    tracing::debug!("Could not send bye: {}", e);
                }
                None
            }
            NegotiationAction::Emit(_) => None,
        }
    }

    async fn send(&self, message: SignalMessage) -> Option<NegotiationEvent> {
        match self.signal.send(&message).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Failed to send {}: {}", message.kind(), e);
                Some(NegotiationEvent::SignalingClosed)
            }
        }
    }
}

fn transport_failed(error: impl fmt::Display) -> NegotiationEvent {
    NegotiationEvent::TransportFailed {
        reason: error.to_string(),
    }
}

/// Register under `key` and negotiate a data channel.
pub async fn connect<S, E>(
    signal: &S,
    engine: E,
    config: NegotiationConfig,
    key: &SessionKey,
) -> Result<Established<E>, NegotiationError>
where
    S: SignalTransport + ?Sized,
    E: PeerEngine,
{
    Coordinator::new(signal, engine, config, key.clone())
        .establish()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{ChannelEvent, ChannelMessage, DataChannel, LoopbackHub};
    use crate::signal::MockSignalTransport;
    use drop_types::{ErrorReason, SdpType, SessionDescription};

    fn key() -> SessionKey {
        SessionKey::new("file-1")
    }

    fn fast() -> NegotiationConfig {
        NegotiationConfig::default()
            .with_grace(Duration::from_millis(20))
            .with_peer_wait(Duration::from_secs(5))
    }

    fn registered(slot: Slot) -> SignalMessage {
        SignalMessage::Registered {
            session_key: key(),
            slot,
        }
    }

    fn ready() -> SignalMessage {
        SignalMessage::PeerReady { session_key: key() }
    }

    /// Wait for the next sent message of the given kind, skipping candidates.
    async fn next_of(relay: &MockSignalTransport, kind: &str) -> SignalMessage {
        loop {
            let message = relay.next_sent().await.unwrap();
            if message.kind() == kind {
                return message;
            }
            assert_eq!(message.kind(), "candidate", "unexpected {}", message.kind());
        }
    }

    fn sdp_of(message: SignalMessage) -> SessionDescription {
        match message {
            SignalMessage::Offer { sdp, .. } | SignalMessage::Answer { sdp, .. } => sdp,
            other => panic!("no sdp in {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn proactive_offer_after_grace() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let mut remote = hub.engine();
        let coordinator = Coordinator::new(&relay, hub.engine(), fast(), key());

        let script = async {
            assert!(matches!(
                relay.next_sent().await,
                Some(SignalMessage::Register { .. })
            ));
            relay.push_inbound(registered(Slot::A));
            relay.push_inbound(ready());

            let offer = sdp_of(next_of(&relay, "offer").await);
            assert_eq!(offer.sdp_type, SdpType::Offer);
            let answer = remote.accept_offer(offer).await.unwrap();
            relay.push_inbound(SignalMessage::Answer {
                session_key: Some(key()),
                sdp: answer,
            });
            remote.take_channel().unwrap()
        };

        let (result, mut remote_channel) = tokio::join!(coordinator.establish(), script);
        let mut established = result.unwrap();
        assert_eq!(established.slot, Slot::A);

        established
            .channel
            .send(ChannelMessage::Text("hello".into()))
            .await
            .unwrap();
        assert_eq!(remote_channel.next_event().await, Some(ChannelEvent::Opened));
        assert_eq!(
            remote_channel.next_event().await,
            Some(ChannelEvent::Message(ChannelMessage::Text("hello".into())))
        );
    }

    #[tokio::test]
    async fn remote_offer_within_grace_is_answered_without_offering() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let mut remote = hub.engine();
        let config = fast().with_grace(Duration::from_secs(5));
        let coordinator = Coordinator::new(&relay, hub.engine(), config, key());

        let script = async {
            relay.next_sent().await;
            relay.push_inbound(registered(Slot::B));
            relay.push_inbound(ready());
            let offer = remote.create_offer().await.unwrap();
            relay.push_inbound(SignalMessage::Offer {
                session_key: Some(key()),
                sdp: offer,
            });
            let answer = sdp_of(next_of(&relay, "answer").await);
            remote.apply_answer(answer).await.unwrap();
        };

        let (result, ()) = tokio::join!(coordinator.establish(), script);
        assert_eq!(result.unwrap().slot, Slot::B);
        assert!(relay.sent_messages().iter().all(|m| m.kind() != "offer"));
    }

    #[tokio::test]
    async fn early_offer_before_peer_ready() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let mut remote = hub.engine();
        let coordinator = Coordinator::new(&relay, hub.engine(), fast(), key());

        let script = async {
            relay.next_sent().await;
            relay.push_inbound(registered(Slot::B));
            let offer = remote.create_offer().await.unwrap();
            relay.push_inbound(SignalMessage::Offer {
                session_key: Some(key()),
                sdp: offer,
            });
            let answer = sdp_of(next_of(&relay, "answer").await);
            remote.apply_answer(answer).await.unwrap();
        };

        let (result, ()) = tokio::join!(coordinator.establish(), script);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn crossed_offers_slot_b_rolls_back_and_answers() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let mut remote = hub.engine();
        let coordinator = Coordinator::new(&relay, hub.engine(), fast(), key());

        let script = async {
            relay.next_sent().await;
            relay.push_inbound(registered(Slot::B));
            relay.push_inbound(ready());
            // our proactive offer goes out, the remote one crosses it
            next_of(&relay, "offer").await;
            let offer = remote.create_offer().await.unwrap();
            relay.push_inbound(SignalMessage::Offer {
                session_key: Some(key()),
                sdp: offer,
            });
            let answer = sdp_of(next_of(&relay, "answer").await);
            remote.apply_answer(answer).await.unwrap();
        };

        let (result, ()) = tokio::join!(coordinator.establish(), script);
        assert_eq!(result.unwrap().slot, Slot::B);
        // the rolled-back offer is no longer claimable
        assert_eq!(hub.pending_offers(), 0);
    }

    #[tokio::test]
    async fn crossed_offers_slot_a_keeps_its_offer() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let mut remote = hub.engine();
        let coordinator = Coordinator::new(&relay, hub.engine(), fast(), key());

        let script = async {
            relay.next_sent().await;
            relay.push_inbound(registered(Slot::A));
            relay.push_inbound(ready());
            let ours = sdp_of(next_of(&relay, "offer").await);
            let theirs = remote.create_offer().await.unwrap();
            relay.push_inbound(SignalMessage::Offer {
                session_key: Some(key()),
                sdp: theirs,
            });
            // remote is slot b: it yields
            remote.rollback().await.unwrap();
            let answer = remote.accept_offer(ours).await.unwrap();
            relay.push_inbound(SignalMessage::Answer {
                session_key: Some(key()),
                sdp: answer,
            });
        };

        let (result, ()) = tokio::join!(coordinator.establish(), script);
        assert_eq!(result.unwrap().slot, Slot::A);
        assert!(relay.sent_messages().iter().all(|m| m.kind() != "answer"));
    }

    #[tokio::test]
    async fn remote_candidates_reach_the_engine() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let mut remote = hub.engine();
        let coordinator = Coordinator::new(&relay, hub.engine(), fast(), key());

        let script = async {
            relay.next_sent().await;
            relay.push_inbound(registered(Slot::A));
            relay.push_inbound(SignalMessage::Candidate {
                session_key: Some(key()),
                candidate: serde_json::json!({"candidate": "early"}),
            });
            relay.push_inbound(ready());
            let offer = sdp_of(next_of(&relay, "offer").await);
            let answer = remote.accept_offer(offer).await.unwrap();
            relay.push_inbound(SignalMessage::Answer {
                session_key: Some(key()),
                sdp: answer,
            });
        };

        let (result, ()) = tokio::join!(coordinator.establish(), script);
        let established = result.unwrap();
        assert_eq!(established.engine.remote_candidates().len(), 1);
    }

    #[tokio::test]
    async fn rejected_registration_fails_without_bye() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        relay.push_inbound(SignalMessage::Error {
            reason: ErrorReason::RoomFull,
        });

        let err = connect(&relay, hub.engine(), fast(), &key())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Rejected(ErrorReason::RoomFull)));
        assert!(relay.sent_messages().iter().all(|m| m.kind() != "bye"));
    }

    #[tokio::test]
    async fn peer_wait_expires_with_bye() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        relay.push_inbound(registered(Slot::A));
        let config = fast().with_peer_wait(Duration::from_millis(50));

        let err = connect(&relay, hub.engine(), config, &key())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::PeerTimeout));
        assert_eq!(relay.sent_messages().last().unwrap().kind(), "bye");
    }

    #[tokio::test]
    async fn relay_closing_fails_negotiation() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        relay.push_inbound(registered(Slot::A));
        relay.close_inbound();

        let err = connect(&relay, hub.engine(), fast(), &key())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::SignalingClosed));
    }

    #[tokio::test]
    async fn peer_bye_fails_negotiation() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        let config = fast().with_grace(Duration::from_secs(5));
        relay.push_inbound(registered(Slot::A));
        relay.push_inbound(ready());
        relay.push_inbound(SignalMessage::Bye {
            session_key: Some(key()),
        });

        let err = connect(&relay, hub.engine(), config, &key())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::PeerLeft));
    }

    #[tokio::test]
    async fn register_send_failure_is_a_signaling_error() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        relay.fail_next_send("socket gone");

        let err = connect(&relay, hub.engine(), fast(), &key())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Signaling(_)));
    }

    #[tokio::test]
    async fn invalid_remote_offer_is_a_transport_failure() {
        let hub = LoopbackHub::new();
        let relay = MockSignalTransport::new();
        relay.push_inbound(registered(Slot::B));
        relay.push_inbound(SignalMessage::Offer {
            session_key: Some(key()),
            sdp: SessionDescription::offer("v=0 not a loopback offer"),
        });

        let err = connect(&relay, hub.engine(), fast(), &key())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Transport(_)));
    }

    #[test]
    fn config_builders() {
        let config = NegotiationConfig::default()
            .with_grace(Duration::from_millis(250))
            .with_role("sender");
        assert_eq!(config.grace, Duration::from_millis(250));
        assert_eq!(config.peer_wait, DEFAULT_PEER_WAIT);
        assert_eq!(config.role, "sender");
    }
}
