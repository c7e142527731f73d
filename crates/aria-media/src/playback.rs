//! Speaker playback — renders remote PCM frames via `rodio`.
//!
//! rodio's `OutputStream` is not `Send`, so the device lives on a dedicated
//! thread fed by a command channel. `flush` drops the whole queued backlog
//! immediately — that is the local half of barge-in cancellation and must
//! not wait for anything remote.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::mpsc;

use aria_core::types::AudioChunk;

use crate::MediaError;

const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// A sink for synthesized speech.
///
/// `flush` discards any buffered-but-unplayed audio immediately. `close`
/// releases the device within the grace period, abandoning the thread if it
/// does not acknowledge.
pub trait PlaybackSink: Send {
    fn append(&mut self, chunk: AudioChunk);
    fn flush(&mut self);
    fn close(&mut self, grace: Duration) -> bool;
}

enum SinkCommand {
    Append(Vec<i16>, u32),
    Flush,
    Close,
}

/// Real speaker output on the default device.
pub struct SpeakerSink {
    cmd_tx: std_mpsc::Sender<SinkCommand>,
    done_rx: std_mpsc::Receiver<()>,
}

impl SpeakerSink {
    /// Open the default output device on a fresh thread.
    pub fn spawn(fault_tx: mpsc::UnboundedSender<String>) -> Result<Self, MediaError> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), MediaError>>();
        let (done_tx, done_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("aria-speaker".into())
            .spawn(move || {
                playback_thread(cmd_rx, fault_tx, ready_tx, done_tx);
            })
            .map_err(|e| MediaError::OutputStream(e.to_string()))?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { cmd_tx, done_rx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaError::OutputStream(
                "output device did not open in time".into(),
            )),
        }
    }
}

impl PlaybackSink for SpeakerSink {
    fn append(&mut self, chunk: AudioChunk) {
        let _ = self
            .cmd_tx
            .send(SinkCommand::Append(chunk.pcm, chunk.sample_rate));
    }

    fn flush(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Flush);
    }

    fn close(&mut self, grace: Duration) -> bool {
        let _ = self.cmd_tx.send(SinkCommand::Close);
        match self.done_rx.recv_timeout(grace) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "playback thread did not stop within grace period, abandoning it"
                );
                false
            }
        }
    }
}

fn playback_thread(
    cmd_rx: std_mpsc::Receiver<SinkCommand>,
    fault_tx: mpsc::UnboundedSender<String>,
    ready_tx: std_mpsc::Sender<Result<(), MediaError>>,
    done_tx: std_mpsc::Sender<()>,
) {
    let (stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(MediaError::OutputStream(e.to_string())));
            return;
        }
    };

    tracing::info!("speaker playback started on default output device");
    let _ = ready_tx.send(Ok(()));

    // Recreated after every flush: a stopped rodio sink does not accept new
    // sources reliably across versions.
    let mut sink: Option<Sink> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            SinkCommand::Append(pcm, sample_rate) => {
                if sink.is_none() {
                    match Sink::try_new(&stream_handle) {
                        Ok(s) => sink = Some(s),
                        Err(e) => {
                            let _ = fault_tx.send(format!("output sink: {e}"));
                            break;
                        }
                    }
                }
                if let Some(s) = &sink {
                    s.append(SamplesBuffer::new(1, sample_rate, pcm));
                }
            }
            SinkCommand::Flush => {
                if let Some(s) = sink.take() {
                    s.stop();
                }
                tracing::debug!("playback flushed");
            }
            SinkCommand::Close => break,
        }
    }

    if let Some(s) = sink.take() {
        s.stop();
    }
    drop(stream);
    tracing::debug!("speaker playback stopped");
    let _ = done_tx.send(());
}

/// Sink that discards everything. Used for text-only sessions where no
/// audio is expected back.
#[derive(Debug, Default)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn append(&mut self, _chunk: AudioChunk) {}
    fn flush(&mut self) {}
    fn close(&mut self, _grace: Duration) -> bool {
        true
    }
}
