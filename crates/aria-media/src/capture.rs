//! Microphone capture — continuous fixed-size PCM frames via `cpal`.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread
//! that owns the device handle for the whole session. The thread folds the
//! device format down to mono, resamples to the 24 kHz wire rate, and
//! pushes 20 ms PCM16 frames into an unbounded channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use rubato::{FftFixedIn, Resampler as _};
use tokio::sync::mpsc;

use aria_core::types::{AudioChunk, FRAME_SAMPLES, WIRE_SAMPLE_RATE};

use crate::MediaError;

/// How long `spawn` waits for the device to open before giving up.
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval for the shutdown flag while waiting on device data.
const RECV_TICK: Duration = Duration::from_millis(50);

/// Input chunk size fed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// What the capture thread emits.
#[derive(Debug)]
pub enum CaptureMessage {
    /// One 20 ms mic frame at the wire rate.
    Frame(AudioChunk),
    /// The device failed mid-stream. Terminal for the session.
    Fault(String),
}

/// Handle to the running capture thread.
///
/// The thread exclusively owns the microphone for its lifetime; dropping the
/// handle without calling [`shutdown`](Self::shutdown) leaves the thread
/// running until its output channel closes.
pub struct MicCapture {
    stop: Arc<AtomicBool>,
    done_rx: std_mpsc::Receiver<()>,
}

impl MicCapture {
    /// Open the default input device on a fresh thread and start streaming
    /// frames into `frame_tx`.
    ///
    /// Blocks until the device is open (bounded by [`DEVICE_OPEN_TIMEOUT`])
    /// so a missing microphone fails the session start instead of surfacing
    /// later.
    pub fn spawn(frame_tx: mpsc::UnboundedSender<CaptureMessage>) -> Result<Self, MediaError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), MediaError>>();
        let (done_tx, done_rx) = std_mpsc::channel::<()>();

        let thread_stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("aria-mic".into())
            .spawn(move || {
                capture_thread(frame_tx, thread_stop, ready_tx, done_tx);
            })
            .map_err(|e| MediaError::InputStream(e.to_string()))?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { stop, done_rx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaError::InputStream(
                "input device did not open in time".into(),
            )),
        }
    }

    /// Stop capturing. Waits up to `grace` for the thread to acknowledge;
    /// an unresponsive thread (hung device read) is abandoned with a
    /// warning so shutdown never blocks indefinitely.
    ///
    /// Returns whether the thread acknowledged within the grace period.
    pub fn shutdown(self, grace: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        match self.done_rx.recv_timeout(grace) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "capture thread did not stop within grace period, abandoning it"
                );
                false
            }
        }
    }
}

fn capture_thread(
    frame_tx: mpsc::UnboundedSender<CaptureMessage>,
    stop: Arc<AtomicBool>,
    ready_tx: std_mpsc::Sender<Result<(), MediaError>>,
    done_tx: std_mpsc::Sender<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(MediaError::NoInputDevice));
        return;
    };

    let config = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(MediaError::InputStream(e.to_string())));
            return;
        }
    };

    let device_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let sample_format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();

    // Raw interleaved samples hop from the cpal callback to this thread's
    // loop, where the format conversion happens off the audio callback.
    let (raw_tx, raw_rx) = std_mpsc::channel::<Vec<f32>>();

    let fault_tx = frame_tx.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!(%err, "audio input stream error");
        let _ = fault_tx.send(CaptureMessage::Fault(err.to_string()));
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let tx = raw_tx.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.to_vec());
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let tx = raw_tx.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    let _ = tx.send(floats);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I32 => {
            let tx = raw_tx.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                    let _ = tx.send(floats);
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(MediaError::InputStream(format!(
                "unsupported sample format: {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(MediaError::InputStream(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(MediaError::InputStream(e.to_string())));
        return;
    }

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        "microphone capture started"
    );
    let _ = ready_tx.send(Ok(()));

    let mut resampler = if device_rate != WIRE_SAMPLE_RATE {
        match FftFixedIn::<f32>::new(
            device_rate as usize,
            WIRE_SAMPLE_RATE as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        ) {
            Ok(r) => Some(r),
            Err(e) => {
                let _ = frame_tx.send(CaptureMessage::Fault(format!("resampler init: {e}")));
                let _ = done_tx.send(());
                return;
            }
        }
    } else {
        None
    };

    // Mono samples at the device rate, pending resampling.
    let mut pending: Vec<f32> = Vec::new();
    // Wire-rate samples, pending frame emission.
    let mut out: Vec<f32> = Vec::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let raw = match raw_rx.recv_timeout(RECV_TICK) {
            Ok(data) => data,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };

        pending.extend(fold_to_mono(&raw, channels));

        match &mut resampler {
            Some(rs) => {
                while pending.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = pending.drain(..RESAMPLE_CHUNK).collect();
                    match rs.process(&[chunk], None) {
                        Ok(mut resampled) => {
                            if let Some(channel) = resampled.pop() {
                                out.extend(channel);
                            }
                        }
                        Err(e) => {
                            let _ = frame_tx.send(CaptureMessage::Fault(format!("resample: {e}")));
                            let _ = done_tx.send(());
                            return;
                        }
                    }
                }
            }
            None => out.append(&mut pending),
        }

        while out.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = out
                .drain(..FRAME_SAMPLES)
                .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect();
            if frame_tx.send(CaptureMessage::Frame(AudioChunk::mic(frame))).is_err() {
                // Receiver gone, session is over.
                drop(stream);
                let _ = done_tx.send(());
                return;
            }
        }
    }

    drop(stream);
    tracing::debug!("microphone capture stopped");
    let _ = done_tx.send(());
}

/// Average interleaved multi-channel audio down to mono.
fn fold_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
