use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Wire sample rate for both directions (PCM16 mono).
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Frame length used throughout the pipeline: 20 ms at the wire rate.
pub const FRAME_SAMPLES: usize = (WIRE_SAMPLE_RATE as usize) / 50;

/// Monotonic turn identifier, allocated locally and echoed back by the
/// remote side on deltas and terminal events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Who contributed a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Where an audio chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    Mic,
    Remote,
}

/// An immutable buffer of PCM16 samples moving through the pipeline.
///
/// Ownership transfers along with the chunk; no stage retains it after
/// forwarding.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub source: ChunkSource,
    pub at: Instant,
}

impl AudioChunk {
    pub fn mic(pcm: Vec<i16>) -> Self {
        Self {
            pcm,
            sample_rate: WIRE_SAMPLE_RATE,
            source: ChunkSource::Mic,
            at: Instant::now(),
        }
    }

    pub fn remote(pcm: Vec<i16>) -> Self {
        Self {
            pcm,
            sample_rate: WIRE_SAMPLE_RATE,
            source: ChunkSource::Remote,
            at: Instant::now(),
        }
    }

    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.pcm.len() as u64 * 1000) / u64::from(self.sample_rate)
    }

    /// Little-endian byte view of the samples (the wire representation).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pcm.len() * 2);
        for s in &self.pcm {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    /// Parse little-endian PCM16 bytes received from the remote side.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let pcm = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        Self::remote(pcm)
    }
}

/// A function call the assistant asked for in a completed response.
///
/// Aria does not execute these itself — they are surfaced so the embedding
/// command dispatcher can.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub call_id: String,
    pub arguments: serde_json::Value,
}

/// What a completed assistant turn produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantReply {
    pub turn_id: Option<TurnId>,
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_byte_round_trip() {
        let chunk = AudioChunk::mic(vec![0, 100, -100, i16::MAX, i16::MIN]);
        let bytes = chunk.to_le_bytes();
        assert_eq!(bytes.len(), 10);
        let back = AudioChunk::from_le_bytes(&bytes);
        assert_eq!(back.pcm, chunk.pcm);
        assert_eq!(back.source, ChunkSource::Remote);
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk::mic(vec![0; FRAME_SAMPLES]);
        assert_eq!(chunk.duration_ms(), 20);
    }

    #[test]
    fn test_turn_id_display() {
        assert_eq!(TurnId(7).to_string(), "t7");
    }
}
