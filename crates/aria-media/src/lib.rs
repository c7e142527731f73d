//! Audio device adapters: microphone capture, speaker playback, and
//! voice activity detection.
//!
//! The capture and playback devices live on dedicated threads (cpal and
//! rodio stream handles are not `Send`) and talk to the rest of the system
//! over channels. Both honor a bounded shutdown: a hung device read is
//! abandoned with a warning, never waited on indefinitely.

pub mod capture;
pub mod playback;
pub mod vad;

use thiserror::Error;

pub use capture::{CaptureMessage, MicCapture};
pub use playback::{NullSink, PlaybackSink, SpeakerSink};
pub use vad::{VadTransition, VoiceActivityDetector};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no input device available")]
    NoInputDevice,

    #[error("input stream error: {0}")]
    InputStream(String),

    #[error("output stream error: {0}")]
    OutputStream(String),

    #[error("resample error: {0}")]
    Resample(String),
}

impl From<MediaError> for aria_core::error::AriaError {
    fn from(err: MediaError) -> Self {
        aria_core::error::AriaError::Device(err.to_string())
    }
}
