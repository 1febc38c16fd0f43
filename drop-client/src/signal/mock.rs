//! Mock signaling transport for testing.
//!
//! Tests play the relay: they push messages the client will receive and
//! observe (or await) the messages the client sent.

use super::{SignalError, SignalTransport};
use async_trait::async_trait;
use drop_types::SignalMessage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Mock signaling transport.
///
/// Clones share the same state, so a test can keep one handle while the
/// coordinator owns another.
#[derive(Debug, Clone)]
pub struct MockSignalTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<SignalMessage>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
    sent_tx: mpsc::UnboundedSender<SignalMessage>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<SignalMessage>,
    closed: bool,
    fail_next_send: Option<String>,
}

impl MockSignalTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                inbound_tx: Mutex::new(Some(inbound_tx)),
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                sent_tx,
                sent_rx: tokio::sync::Mutex::new(sent_rx),
                state: Mutex::new(MockState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a message to be returned by `recv()`.
    pub fn push_inbound(&self, message: SignalMessage) {
        let tx = self
            .inner
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Simulate the relay closing the connection; `recv()` returns `None`
    /// once the queued messages are drained.
    pub fn close_inbound(&self) {
        self.inner
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Wait for the next message the client sends.
    pub async fn next_sent(&self) -> Option<SignalMessage> {
        self.inner.sent_rx.lock().await.recv().await
    }

    /// All messages sent so far.
    pub fn sent_messages(&self) -> Vec<SignalMessage> {
        self.state().sent.clone()
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.state().fail_next_send = Some(error.to_string());
    }

    /// Whether `close()` was called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl Default for MockSignalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalTransport for MockSignalTransport {
    async fn send(&self, message: &SignalMessage) -> Result<(), SignalError> {
        let mut state = self.state();
        if state.closed {
            return Err(SignalError::ConnectionClosed);
        }
        if let Some(error) = state.fail_next_send.take() {
            return Err(SignalError::SendFailed(error));
        }
        state.sent.push(message.clone());
        let _ = self.inner.sent_tx.send(message.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<SignalMessage>, SignalError> {
        let mut rx = self.inner.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> Result<(), SignalError> {
        self.state().closed = true;
        Ok(())
    }
}
