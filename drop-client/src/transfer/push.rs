//! Push mode: the sender streams, paced by the channel's buffered amount.

use drop_types::{ControlFrame, PushControl};
use sha2::{Digest, Sha256};
use tokio::time::{sleep, timeout};

use super::store::{ChunkSource, SinkOpener};
use super::{send_control, Incoming, SendStats, TransferConfig, TransferOutcome};
use crate::error::TransferError;
use crate::peer::{ChannelEvent, ChannelMessage, DataChannel};

/// Stream every chunk, announce the digest and wait for the receiver's ack.
pub async fn push_file<C, S>(
    channel: &mut C,
    source: &mut S,
    config: &TransferConfig,
) -> Result<SendStats, TransferError>
where
    C: DataChannel + ?Sized,
    S: ChunkSource + ?Sized,
{
    let meta = source.meta().clone();
    let backpressure = config.backpressure(meta.chunk_size);
    send_control(
        channel,
        PushControl::Meta {
            name: meta.name.clone(),
            size: meta.size,
        },
    )
    .await?;
    tracing::info!(
        "Pushing {} ({} bytes, {} chunks)",
        meta.name,
        meta.size,
        meta.chunk_count
    );

    let mut hasher = Sha256::new();
    let mut stats = SendStats::default();
    for index in 0..meta.chunk_count {
        while backpressure.should_wait(channel.buffered_amount()) {
            sleep(config.backpressure_poll).await;
        }
        let bytes = source.read_chunk(index).await?.ok_or_else(|| {
            TransferError::Protocol(format!("source has no chunk {index} of {}", meta.chunk_count))
        })?;
        hasher.update(&bytes);
        stats.chunks += 1;
        stats.bytes += bytes.len() as u64;
        channel.send(ChannelMessage::Binary(bytes)).await?;
    }

    let digest = hex::encode(hasher.finalize());
    send_control(
        channel,
        PushControl::Eof {
            sha256: digest.clone(),
        },
    )
    .await?;

    match timeout(config.ack_timeout, wait_for_ack(channel, stats.bytes, meta.size)).await {
        Ok(result) => result?,
        Err(_) => return Err(TransferError::AckTimeout(config.ack_timeout)),
    }
    tracing::info!("Receiver acknowledged {} bytes", stats.bytes);
    channel.close().await;

    stats.digest = Some(digest);
    Ok(stats)
}

async fn wait_for_ack<C: DataChannel + ?Sized>(
    channel: &mut C,
    sent: u64,
    size: u64,
) -> Result<(), TransferError> {
    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Message(ChannelMessage::Text(text))) => {
                match ControlFrame::decode(&text) {
                    Ok(ControlFrame::Push(PushControl::Ack)) => return Ok(()),
                    Ok(other) => tracing::debug!("Ignoring frame {:?} while awaiting ack", other),
                    Err(e) => tracing::warn!("Ignoring malformed frame: {}", e),
                }
            }
            Some(ChannelEvent::Opened | ChannelEvent::Message(ChannelMessage::Binary(_))) => {}
            Some(ChannelEvent::Failed(reason)) => return Err(TransferError::Channel(reason)),
            Some(ChannelEvent::Closed) | None => {
                return Err(TransferError::ChannelClosed {
                    received: sent,
                    expected: Some(size),
                })
            }
        }
    }
}

/// Receive a pushed file; acks the end of stream whatever the digest says.
pub async fn receive_push<C, O>(
    channel: &mut C,
    mut opener: O,
    config: &TransferConfig,
) -> Result<TransferOutcome, TransferError>
where
    C: DataChannel + ?Sized,
    O: SinkOpener,
{
    let mut active: Option<(Incoming<O::Sink>, u64)> = None;

    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Opened) => {}
            Some(ChannelEvent::Message(ChannelMessage::Text(text))) => {
                let frame = match ControlFrame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed frame: {}", e);
                        continue;
                    }
                };
                match frame {
                    ControlFrame::Push(PushControl::Meta { name, size }) => {
                        if active.is_some() {
                            tracing::debug!("Ignoring repeated meta");
                            continue;
                        }
                        let (path, sink) = opener.open(&name).await?;
                        tracing::info!(
                            "Receiving {} ({} bytes) into {}",
                            name,
                            size,
                            path.display()
                        );
                        active = Some((Incoming::new(path, sink, config.flush_every, size), size));
                    }
                    ControlFrame::Push(PushControl::Eof { sha256 }) => {
                        let (incoming, size) = active.take().ok_or_else(|| {
                            TransferError::Protocol("eof before meta".into())
                        })?;
                        if incoming.written != size {
                            tracing::warn!(
                                "Announced {} bytes but received {}",
                                size,
                                incoming.written
                            );
                        }
                        let outcome = incoming.finish(Some(&sha256)).await?;
                        send_control(channel, PushControl::Ack).await?;
                        return Ok(outcome);
                    }
                    other => tracing::debug!("Ignoring frame {:?}", other),
                }
            }
            Some(ChannelEvent::Message(ChannelMessage::Binary(bytes))) => match active.as_mut() {
                Some((incoming, _)) => incoming.write(&bytes).await?,
                None => tracing::debug!("Ignoring {} bytes before meta", bytes.len()),
            },
            Some(ChannelEvent::Failed(reason)) => return Err(TransferError::Channel(reason)),
            Some(ChannelEvent::Closed) | None => {
                return Err(TransferError::ChannelClosed {
                    received: active.as_ref().map_or(0, |(incoming, _)| incoming.written),
                    expected: active.as_ref().map(|(_, size)| *size),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::LoopbackChannel;
    use crate::transfer::testing::{next_frame, send_frame, Recording};
    use crate::transfer::{Integrity, MemoryOutput, MemorySource};
    use std::time::Duration;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn pushes_file_and_gets_ack() {
        let (mut sender, mut receiver) = LoopbackChannel::pair();
        let content = data(200_000);
        let mut source = MemorySource::new("push.bin", content.clone(), 16 * 1024);
        let output = MemoryOutput::new();
        let config = TransferConfig::default();

        let (pushed, received) = tokio::join!(
            push_file(&mut sender, &mut source, &config),
            receive_push(&mut receiver, output.clone(), &config)
        );
        let stats = pushed.unwrap();
        let outcome = received.unwrap();

        assert_eq!(stats.chunks, 13);
        assert_eq!(stats.bytes, 200_000);
        assert_eq!(outcome.bytes, 200_000);
        assert_eq!(outcome.integrity, Integrity::Verified);
        assert_eq!(stats.digest, outcome.digest);
        assert_eq!(output.bytes(), content);
        assert_eq!(output.name().as_deref(), Some("push.bin"));
    }

    #[tokio::test]
    async fn buffered_amount_stays_within_one_chunk_of_threshold() {
        let (sender, mut receiver) = LoopbackChannel::pair();
        let mut sender = Recording::new(sender);
        let chunk = 1024;
        let mut source = MemorySource::new("bp.bin", data(64 * 1024), chunk);
        let config = TransferConfig::default().with_flush_every(8 * 1024);
        let threshold = config.backpressure(chunk).threshold();

        let (pushed, received) = tokio::join!(
            push_file(&mut sender, &mut source, &config),
            receive_push(&mut receiver, MemoryOutput::new(), &config)
        );
        pushed.unwrap();
        received.unwrap();

        assert_eq!(sender.buffered_after_send.len(), 64);
        let peak = sender.buffered_after_send.iter().copied().max().unwrap();
        assert!(peak <= threshold + chunk, "peak {peak} > {}", threshold + chunk);
    }

    #[tokio::test]
    async fn mismatch_is_still_acknowledged() {
        let (mut sender, mut receiver) = LoopbackChannel::pair();
        let output = MemoryOutput::new();

        let script = async {
            send_frame(
                &mut sender,
                PushControl::Meta {
                    name: "m.txt".into(),
                    size: 3,
                },
            )
            .await;
            sender
                .send(ChannelMessage::Binary(b"abc".to_vec()))
                .await
                .unwrap();
            send_frame(
                &mut sender,
                PushControl::Eof {
                    sha256: "ff".repeat(32),
                },
            )
            .await;
            next_frame(&mut sender).await
        };

        let config = TransferConfig::default();
        let (received, ack) = tokio::join!(
            receive_push(&mut receiver, output.clone(), &config),
            script
        );
        let outcome = received.unwrap();
        assert!(matches!(outcome.integrity, Integrity::Mismatch { .. }));
        assert_eq!(ack, Some(ControlFrame::Push(PushControl::Ack)));
        assert!(output.is_finished());
    }

    #[tokio::test]
    async fn unknown_text_frames_are_skipped() {
        let (mut sender, mut receiver) = LoopbackChannel::pair();
        let output = MemoryOutput::new();
        let content = b"pushed".to_vec();
        let digest = hex::encode(Sha256::digest(&content));

        let script = async {
            send_frame(
                &mut sender,
                PushControl::Meta {
                    name: "k.txt".into(),
                    size: 6,
                },
            )
            .await;
            sender
                .send(ChannelMessage::Text(r#"{"type":"PING"}"#.into()))
                .await
                .unwrap();
            sender
                .send(ChannelMessage::Binary(content.clone()))
                .await
                .unwrap();
            send_frame(&mut sender, PushControl::Eof { sha256: digest }).await;
            next_frame(&mut sender).await
        };

        let config = TransferConfig::default();
        let (received, ack) = tokio::join!(
            receive_push(&mut receiver, output.clone(), &config),
            script
        );
        assert_eq!(received.unwrap().integrity, Integrity::Verified);
        assert_eq!(ack, Some(ControlFrame::Push(PushControl::Ack)));
        assert_eq!(output.bytes(), content);
    }

    #[tokio::test]
    async fn missing_ack_times_out() {
        let (mut sender, mut receiver) = LoopbackChannel::pair();
        let mut source = MemorySource::new("t.bin", data(10), 4);
        let config = TransferConfig::default().with_ack_timeout(Duration::from_millis(50));

        let silent_receiver = async {
            loop {
                if let Some(ControlFrame::Push(PushControl::Eof { .. })) =
                    next_frame(&mut receiver).await
                {
                    break;
                }
            }
            // keep the channel open past the ack deadline
            sleep(Duration::from_millis(200)).await;
        };

        let (pushed, ()) = tokio::join!(push_file(&mut sender, &mut source, &config), silent_receiver);
        assert!(matches!(pushed.unwrap_err(), TransferError::AckTimeout(_)));
    }

    #[tokio::test]
    async fn eof_before_meta_is_a_protocol_error() {
        let (mut sender, mut receiver) = LoopbackChannel::pair();
        send_frame(
            &mut sender,
            PushControl::Eof {
                sha256: String::new(),
            },
        )
        .await;

        let err = receive_push(&mut receiver, MemoryOutput::new(), &TransferConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test]
    async fn sender_closing_early_fails_receiver() {
        let (mut sender, mut receiver) = LoopbackChannel::pair();
        send_frame(
            &mut sender,
            PushControl::Meta {
                name: "c.bin".into(),
                size: 100,
            },
        )
        .await;
        sender
            .send(ChannelMessage::Binary(vec![0; 40]))
            .await
            .unwrap();
        sender.close().await;

        let err = receive_push(&mut receiver, MemoryOutput::new(), &TransferConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::ChannelClosed {
                received: 40,
                expected: Some(100)
            }
        ));
    }
}
