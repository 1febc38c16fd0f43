//! Channel helpers for transfer tests.

use async_trait::async_trait;
use drop_types::ControlFrame;

use crate::peer::{ChannelError, ChannelEvent, ChannelMessage, DataChannel, LoopbackChannel};

/// Wraps a channel and records what goes out through it.
pub(crate) struct Recording<C> {
    inner: C,
    /// Control frames sent, decoded.
    pub(crate) frames: Vec<ControlFrame>,
    /// Buffered amount observed right after each binary send.
    pub(crate) buffered_after_send: Vec<u64>,
}

impl<C> Recording<C> {
    pub(crate) fn new(inner: C) -> Self {
        Self {
            inner,
            frames: Vec::new(),
            buffered_after_send: Vec::new(),
        }
    }
}

#[async_trait]
impl<C: DataChannel> DataChannel for Recording<C> {
    async fn send(&mut self, message: ChannelMessage) -> Result<(), ChannelError> {
        let binary = matches!(message, ChannelMessage::Binary(_));
        if let ChannelMessage::Text(text) = &message {
            if let Ok(frame) = ControlFrame::decode(text) {
                self.frames.push(frame);
            }
        }
        self.inner.send(message).await?;
        if binary {
            self.buffered_after_send.push(self.inner.buffered_amount());
        }
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.inner.buffered_amount()
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.inner.next_event().await
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}

/// Next message on a raw loopback end, skipping `Opened`.
pub(crate) async fn next_message(channel: &mut LoopbackChannel) -> Option<ChannelMessage> {
    loop {
        match channel.next_event().await? {
            ChannelEvent::Opened => continue,
            ChannelEvent::Message(message) => return Some(message),
            ChannelEvent::Closed | ChannelEvent::Failed(_) => return None,
        }
    }
}

/// Next control frame on a raw loopback end, skipping binary frames.
pub(crate) async fn next_frame(channel: &mut LoopbackChannel) -> Option<ControlFrame> {
    loop {
        match next_message(channel).await? {
            ChannelMessage::Text(text) => return ControlFrame::decode(&text).ok(),
            ChannelMessage::Binary(_) => continue,
        }
    }
}

/// Send a control frame on a raw loopback end.
pub(crate) async fn send_frame(channel: &mut LoopbackChannel, frame: impl Into<ControlFrame>) {
    let text = frame.into().encode().unwrap();
    channel.send(ChannelMessage::Text(text)).await.unwrap();
}
