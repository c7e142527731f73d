//! Energy-based Voice Activity Detection with hysteresis.

use aria_core::config::VadSettings;

/// A boundary the detector crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStart,
    SpeechStop,
}

/// Voice Activity Detector over PCM16 frames.
///
/// Uses distinct enter/exit RMS thresholds so a level hovering at the
/// boundary cannot flap, plus minimum consecutive-frame counts in both
/// directions. Emits at most one transition per silence->speech or
/// speech->silence crossing.
pub struct VoiceActivityDetector {
    settings: VadSettings,
    /// Current state: true = speech active.
    speech_active: bool,
    /// Consecutive frames above the enter threshold (while inactive).
    loud_count: u32,
    /// Consecutive frames below the exit threshold (while active).
    quiet_count: u32,
}

impl VoiceActivityDetector {
    pub fn new(settings: VadSettings) -> Self {
        Self {
            settings,
            speech_active: false,
            loud_count: 0,
            quiet_count: 0,
        }
    }

    /// Compute RMS energy of a PCM frame.
    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    /// Process a single audio frame, returning a transition if one fired.
    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<VadTransition> {
        let energy = Self::rms(pcm);

        if self.speech_active {
            if energy < self.settings.exit_rms {
                self.quiet_count += 1;
                if self.quiet_count >= self.settings.min_silence_frames {
                    self.speech_active = false;
                    self.quiet_count = 0;
                    self.loud_count = 0;
                    return Some(VadTransition::SpeechStop);
                }
            } else {
                self.quiet_count = 0;
            }
        } else if energy > self.settings.enter_rms {
            self.loud_count += 1;
            if self.loud_count >= self.settings.min_speech_frames {
                self.speech_active = true;
                self.loud_count = 0;
                self.quiet_count = 0;
                return Some(VadTransition::SpeechStart);
            }
        } else {
            self.loud_count = 0;
        }

        None
    }

    /// Whether speech is currently active.
    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    /// Reset the detector state.
    pub fn reset(&mut self) {
        self.speech_active = false;
        self.loud_count = 0;
        self.quiet_count = 0;
    }
}
