//! Negotiation state machine for natdrop.
//!
//! This module decides, for one side of a session, who creates the offer.
//! Both peers receive `peer-ready` at about the same time; neither assumes it
//! is the initiator. Each side waits a grace interval for a remote offer and
//! only offers proactively when none arrived. When both grace timers expire
//! and the offers cross, slot `a`'s offer wins.
//!
//! Like the rest of this crate the machine performs no I/O: it takes an event
//! and returns the next state plus the actions the coordinator must execute
//! (send an offer, arm a timer, ...).

use drop_types::{ErrorReason, SessionDescription, Slot};
use std::fmt;

/// Negotiation phase of one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Not registered yet.
    Idle,
    /// Registered, the other slot is still empty.
    AwaitingPeer,
    /// Peer is present; a proactive offer waits behind the grace timer.
    ProposedOffer,
    /// A remote offer was answered; this side is the answerer.
    ReceivedOffer,
    /// Our offer is out; this side is the offerer.
    AwaitingAnswer {
        /// The remote answer has been applied.
        answered: bool,
    },
    /// The data channel is open.
    Established,
    /// The session is over without a channel.
    Failed,
}

impl NegotiationState {
    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Established | Self::Failed)
    }
}

/// Why a negotiation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The relay refused the registration.
    Rejected(ErrorReason),
    /// Nobody joined the room in time.
    PeerTimeout,
    /// The peer engine failed or disconnected.
    Transport(String),
    /// The signaling connection closed.
    SignalingClosed,
    /// The peer sent `bye`.
    PeerLeft,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "registration rejected: {reason}"),
            Self::PeerTimeout => f.write_str("timed out waiting for peer"),
            Self::Transport(reason) => write!(f, "peer transport failed: {reason}"),
            Self::SignalingClosed => f.write_str("signaling connection closed"),
            Self::PeerLeft => f.write_str("peer left the session"),
        }
    }
}

/// Terminal result reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Channel is open.
    Established,
    /// Negotiation failed.
    Failed(FailureReason),
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// The relay assigned us a slot.
    Registered {
        /// Assigned slot.
        slot: Slot,
    },
    /// The relay refused the registration.
    RegistrationRejected {
        /// Reason sent by the relay.
        reason: ErrorReason,
    },
    /// Both slots are filled.
    PeerReady,
    /// The grace timer fired.
    GraceExpired,
    /// The peer's offer arrived.
    OfferReceived {
        /// Remote offer.
        offer: SessionDescription,
    },
    /// The peer's answer arrived.
    AnswerReceived {
        /// Remote answer.
        answer: SessionDescription,
    },
    /// A trickled candidate arrived.
    CandidateReceived {
        /// Opaque candidate payload.
        candidate: serde_json::Value,
    },
    /// The peer engine reports the data channel open.
    ChannelOpened,
    /// The peer engine failed.
    TransportFailed {
        /// Engine-provided detail.
        reason: String,
    },
    /// The wait-for-peer deadline passed.
    PeerWaitExpired,
    /// The signaling connection is gone.
    SignalingClosed,
    /// The peer sent `bye`.
    PeerLeft,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationAction {
    /// Arm the grace timer.
    StartGraceTimer,
    /// Disarm the grace timer.
    CancelGraceTimer,
    /// Create a local offer and send it.
    SendOffer,
    /// Apply the remote offer, create an answer and send it.
    AnswerOffer {
        /// Remote offer.
        offer: SessionDescription,
    },
    /// Drop our pending local offer.
    RollbackLocalOffer,
    /// Apply the remote answer.
    ApplyAnswer {
        /// Remote answer.
        answer: SessionDescription,
    },
    /// An offer arrived after the role was decided.
    IgnoreOffer,
    /// Hand a remote candidate to the engine.
    AddCandidate {
        /// Opaque candidate payload.
        candidate: serde_json::Value,
    },
    /// Tell the peer we are leaving (best effort).
    SendBye,
    /// Report a terminal outcome.
    Emit(NegotiationOutcome),
}

/// Negotiation for one side of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    state: NegotiationState,
    local_slot: Option<Slot>,
}

impl Negotiation {
    /// Create a negotiation in the Idle state.
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
            local_slot: None,
        }
    }

    /// Current phase.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Slot assigned at registration.
    pub fn local_slot(&self) -> Option<Slot> {
        self.local_slot
    }

    /// Process an event and return the new negotiation plus actions to execute.
    ///
    /// Pure function: the coordinator performs the actions.
    pub fn on_event(self, event: NegotiationEvent) -> (Self, Vec<NegotiationAction>) {
        use NegotiationAction as A;
        use NegotiationEvent as E;
        use NegotiationState as S;

        let slot = self.local_slot;
        match (self.state, event) {
            // Registration
            (S::Idle, E::Registered { slot }) => (
                Self {
                    state: S::AwaitingPeer,
                    local_slot: Some(slot),
                },
                vec![],
            ),
            (S::Idle, E::RegistrationRejected { reason }) => {
                self.fail(FailureReason::Rejected(reason))
            }

            // Waiting for the other side
            (S::AwaitingPeer, E::PeerReady) => {
                (self.with(S::ProposedOffer), vec![A::StartGraceTimer])
            }
            (S::AwaitingPeer, E::OfferReceived { offer }) => {
                (self.with(S::ReceivedOffer), vec![A::AnswerOffer { offer }])
            }
            (S::Idle | S::AwaitingPeer, E::PeerWaitExpired) => {
                self.fail(FailureReason::PeerTimeout)
            }

            // Grace interval
            (S::ProposedOffer, E::GraceExpired) => (
                self.with(S::AwaitingAnswer { answered: false }),
                vec![A::SendOffer],
            ),
            (S::ProposedOffer, E::OfferReceived { offer }) => (
                self.with(S::ReceivedOffer),
                vec![A::CancelGraceTimer, A::AnswerOffer { offer }],
            ),

            // Offers crossed after both grace timers expired
            (S::AwaitingAnswer { answered: false }, E::OfferReceived { offer }) => match slot {
                Some(Slot::B) => (
                    self.with(S::ReceivedOffer),
                    vec![A::RollbackLocalOffer, A::AnswerOffer { offer }],
                ),
                _ => (self, vec![A::IgnoreOffer]),
            },
            (S::AwaitingAnswer { answered: false }, E::AnswerReceived { answer }) => (
                self.with(S::AwaitingAnswer { answered: true }),
                vec![A::ApplyAnswer { answer }],
            ),

            // Role already decided
            (
                S::ReceivedOffer | S::AwaitingAnswer { answered: true } | S::Established,
                E::OfferReceived { .. },
            ) => (self, vec![A::IgnoreOffer]),

            (S::ReceivedOffer | S::AwaitingAnswer { .. }, E::ChannelOpened) => (
                self.with(S::Established),
                vec![A::Emit(NegotiationOutcome::Established)],
            ),

            // Candidates flow regardless of role
            (state, E::CandidateReceived { candidate }) if state != S::Failed => {
                (self, vec![A::AddCandidate { candidate }])
            }

            // Failures before the channel opened
            (state, E::TransportFailed { reason }) if !state.is_terminal() => {
                self.fail(FailureReason::Transport(reason))
            }
            (state, E::PeerLeft) if !state.is_terminal() => self.fail(FailureReason::PeerLeft),
            (state, E::SignalingClosed) if !state.is_terminal() => {
                self.fail(FailureReason::SignalingClosed)
            }

            // Stale timers, duplicate peer-ready, late answers: stay put
            _ => (self, vec![]),
        }
    }

    /// Channel is open.
    pub fn is_established(&self) -> bool {
        self.state == NegotiationState::Established
    }

    fn with(self, state: NegotiationState) -> Self {
        Self { state, ..self }
    }

    fn fail(self, reason: FailureReason) -> (Self, Vec<NegotiationAction>) {
        let mut actions = Vec::new();
        if self.state == NegotiationState::ProposedOffer {
            actions.push(NegotiationAction::CancelGraceTimer);
        }
        let registered = self.state != NegotiationState::Idle;
        if registered && reason != FailureReason::SignalingClosed {
            actions.push(NegotiationAction::SendBye);
        }
        actions.push(NegotiationAction::Emit(NegotiationOutcome::Failed(reason)));
        (self.with(NegotiationState::Failed), actions)
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}
