//! Send and receive entry points.
//!
//! Each call registers under the session key, negotiates a data channel and
//! runs the configured transfer mode over it:
//!
//! | mode | sender        | receiver       |
//! |------|---------------|----------------|
//! | pull | `serve_pull`  | `fetch_pull`   |
//! | push | `push_file`   | `receive_push` |
//!
//! Signaling stays live for the whole transfer: a `bye` from the peer or a
//! closed relay connection aborts it.

use std::future::Future;
use std::path::Path;

use drop_types::{SessionKey, SignalMessage};

use crate::error::{ClientError, TransferError};
use crate::negotiator::{connect, Established, NegotiationConfig};
use crate::peer::{DataChannel, PeerEngine};
use crate::signal::SignalTransport;
use crate::transfer::{
    fetch_pull, push_file, receive_push, serve_pull, ChunkSource, FileOutput, FileSource,
    Integrity, TransferConfig, TransferMode, TransferOutcome,
};

/// Settings for one transfer.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Negotiation timing.
    pub negotiation: NegotiationConfig,
    /// Transfer tuning.
    pub transfer: TransferConfig,
}

impl ClientConfig {
    /// Set the negotiation settings.
    pub fn with_negotiation(mut self, negotiation: NegotiationConfig) -> Self {
        self.negotiation = negotiation;
        self
    }

    /// Set the transfer settings.
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }
}

/// Send the file at `path` to whoever joins `key`.
///
/// The source is opened (and, in pull mode, hashed) before registering, so
/// a missing file fails without touching the relay.
pub async fn send_file<S, E>(
    signal: &S,
    engine: E,
    config: &ClientConfig,
    key: &SessionKey,
    path: &Path,
) -> Result<TransferOutcome, ClientError>
where
    S: SignalTransport + ?Sized,
    E: PeerEngine,
{
    let transfer = &config.transfer;
    let hash_up_front = transfer.mode == TransferMode::Pull && transfer.compute_digest;
    let mut source = FileSource::open(path, transfer.chunk_size, hash_up_front).await?;
    tracing::info!(
        "Offering {} ({} bytes) on session {}",
        path.display(),
        source.meta().size,
        key
    );

    let negotiation = config.negotiation.clone().with_role("sender");
    let Established {
        mut channel,
        mut engine,
        ..
    } = connect(signal, engine, negotiation, key).await?;

    let run = async {
        match transfer.mode {
            TransferMode::Pull => serve_pull(&mut channel, &mut source).await,
            TransferMode::Push => push_file(&mut channel, &mut source, transfer).await,
        }
    };
    let stats = match while_signaling(signal, &mut engine, run).await {
        Ok(stats) => stats,
        Err(e) => {
            channel.close().await;
            return Err(e.into());
        }
    };

    Ok(TransferOutcome {
        path: path.to_path_buf(),
        bytes: stats.bytes,
        digest: stats.digest,
        integrity: Integrity::Unverified,
    })
}

/// Receive the file offered under `key` into `output`.
///
/// `output` may be a directory (the announced name is used) or a file path.
pub async fn receive_file<S, E>(
    signal: &S,
    engine: E,
    config: &ClientConfig,
    key: &SessionKey,
    output: &Path,
) -> Result<TransferOutcome, ClientError>
where
    S: SignalTransport + ?Sized,
    E: PeerEngine,
{
    let transfer = &config.transfer;
    let opener = FileOutput::new(output, transfer.overwrite);

    let negotiation = config.negotiation.clone().with_role("receiver");
    let Established {
        mut channel,
        mut engine,
        ..
    } = connect(signal, engine, negotiation, key).await?;

    let run = async {
        match transfer.mode {
            TransferMode::Pull => fetch_pull(&mut channel, opener, transfer).await,
            TransferMode::Push => receive_push(&mut channel, opener, transfer).await,
        }
    };
    match while_signaling(signal, &mut engine, run).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            channel.close().await;
            Err(e.into())
        }
    }
}

/// Run `transfer` until it finishes or signaling ends, whichever is first.
async fn while_signaling<S, E, T, F>(
    signal: &S,
    engine: &mut E,
    transfer: F,
) -> Result<T, TransferError>
where
    S: SignalTransport + ?Sized,
    E: PeerEngine,
    F: Future<Output = Result<T, TransferError>>,
{
    tokio::select! {
        biased;
        result = transfer => result,
        reason = signaling_ended(signal, engine) => {
            tracing::warn!("Aborting transfer: {}", reason);
            Err(reason)
        }
    }
}

/// Keep draining signaling; late candidates still reach the engine.
async fn signaling_ended<S, E>(signal: &S, engine: &mut E) -> TransferError
where
    S: SignalTransport + ?Sized,
    E: PeerEngine,
{
    loop {
        match signal.recv().await {
            Ok(Some(SignalMessage::Candidate { candidate, .. })) => {
                if let Err(e) = engine.add_remote_candidate(candidate).await {
                    tracing::debug!("Dropping late candidate: {}", e);
                }
            }
            Ok(Some(SignalMessage::Bye { .. })) => {
                return TransferError::Aborted("peer left the session".into())
            }
            Ok(Some(other)) => tracing::debug!("Ignoring {} during transfer", other.kind()),
            Ok(None) => return TransferError::Aborted("signaling connection closed".into()),
            Err(e) => return TransferError::Aborted(format!("signaling failed: {e}")),
        }
    }
}
