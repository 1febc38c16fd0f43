//! Pull mode: the receiver drives, one chunk request outstanding at a time.

use drop_core::{CursorStep, TransferCursor};
use drop_types::{ControlFrame, PullControl, TransferMeta};

use super::store::{ChunkSink, ChunkSource, SinkOpener};
use super::{send_control, Incoming, SendStats, TransferConfig, TransferOutcome};
use crate::error::TransferError;
use crate::peer::{ChannelEvent, ChannelMessage, DataChannel};

/// Answer metadata and chunk requests until the receiver closes the channel.
pub async fn serve_pull<C, S>(channel: &mut C, source: &mut S) -> Result<SendStats, TransferError>
where
    C: DataChannel + ?Sized,
    S: ChunkSource + ?Sized,
{
    let meta = source.meta().clone();
    let meta_frame = ControlFrame::from(PullControl::Meta(meta.clone())).encode()?;
    let mut stats = SendStats {
        digest: meta.sha256.clone(),
        ..SendStats::default()
    };

    loop {
        let text = match channel.next_event().await {
            Some(ChannelEvent::Message(ChannelMessage::Text(text))) => text,
            Some(ChannelEvent::Opened) => continue,
            Some(ChannelEvent::Message(ChannelMessage::Binary(bytes))) => {
                tracing::debug!("Ignoring {} unexpected bytes from receiver", bytes.len());
                continue;
            }
            Some(ChannelEvent::Failed(reason)) => return Err(TransferError::Channel(reason)),
            Some(ChannelEvent::Closed) | None => break,
        };

        let frame = match ControlFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };
        stats.requests += 1;

        match frame {
            ControlFrame::Pull(PullControl::GetMeta) => {
                channel.send(ChannelMessage::Text(meta_frame.clone())).await?;
            }
            ControlFrame::Pull(PullControl::GetChunk { index }) => {
                match source.read_chunk(index).await? {
                    Some(bytes) => {
                        stats.chunks += 1;
                        stats.bytes += bytes.len() as u64;
                        channel.send(ChannelMessage::Binary(bytes)).await?;
                    }
                    None => tracing::warn!(
                        "Ignoring request for chunk {} of {}",
                        index,
                        meta.chunk_count
                    ),
                }
            }
            other => tracing::debug!("Ignoring frame {:?}", other),
        }
    }

    tracing::info!(
        "Receiver closed the channel after {} chunks ({} bytes)",
        stats.chunks,
        stats.bytes
    );
    Ok(stats)
}

struct Fetching<K> {
    meta: TransferMeta,
    cursor: TransferCursor,
    incoming: Incoming<K>,
}

impl<K: ChunkSink> Fetching<K> {
    async fn complete<C: DataChannel + ?Sized>(
        self,
        channel: &mut C,
    ) -> Result<TransferOutcome, TransferError> {
        let outcome = self.incoming.finish(self.meta.sha256.as_deref()).await?;
        channel.close().await;
        Ok(outcome)
    }
}

/// Fetch the sender's file: metadata first, then chunks in order.
pub async fn fetch_pull<C, O>(
    channel: &mut C,
    mut opener: O,
    config: &TransferConfig,
) -> Result<TransferOutcome, TransferError>
where
    C: DataChannel + ?Sized,
    O: SinkOpener,
{
    send_control(channel, PullControl::GetMeta).await?;
    let mut active: Option<Fetching<O::Sink>> = None;

    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Opened) => {}
            Some(ChannelEvent::Message(ChannelMessage::Text(text))) => {
                let meta = match ControlFrame::decode(&text) {
                    Ok(ControlFrame::Pull(PullControl::Meta(meta))) => meta,
                    Ok(other) => {
                        tracing::debug!("Ignoring frame {:?}", other);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring malformed frame: {}", e);
                        continue;
                    }
                };
                if active.is_some() {
                    tracing::debug!("Ignoring repeated META");
                    continue;
                }
                meta.validate()?;

                let (path, sink) = opener.open(&meta.name).await?;
                tracing::info!(
                    "Fetching {} ({} bytes, {} chunks) into {}",
                    meta.name,
                    meta.size,
                    meta.chunk_count,
                    path.display()
                );
                let cursor = TransferCursor::new(&meta);
                let fetching = Fetching {
                    incoming: Incoming::new(path, sink, config.flush_every, meta.size),
                    cursor,
                    meta,
                };
                match fetching.cursor.start() {
                    CursorStep::Request(index) => {
                        send_control(channel, PullControl::GetChunk { index }).await?;
                        active = Some(fetching);
                    }
                    CursorStep::Complete => return fetching.complete(channel).await,
                }
            }
            Some(ChannelEvent::Message(ChannelMessage::Binary(bytes))) => {
                let Some(fetching) = active.as_mut() else {
                    tracing::debug!("Ignoring {} bytes before META", bytes.len());
                    continue;
                };
                let step = fetching.cursor.apply(bytes.len() as u64)?;
                fetching.incoming.write(&bytes).await?;
                match step {
                    CursorStep::Request(index) => {
                        send_control(channel, PullControl::GetChunk { index }).await?;
                    }
                    CursorStep::Complete => {
                        if let Some(fetching) = active.take() {
                            return fetching.complete(channel).await;
                        }
                    }
                }
            }
            Some(ChannelEvent::Failed(reason)) => return Err(TransferError::Channel(reason)),
            Some(ChannelEvent::Closed) | None => {
                return Err(TransferError::ChannelClosed {
                    received: active.as_ref().map_or(0, |f| f.cursor.received()),
                    expected: active.as_ref().map(|f| f.meta.size),
                });
            }
        }
    }
}
