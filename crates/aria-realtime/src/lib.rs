//! Realtime duplex voice session core.
//!
//! One [`controller::SessionController`] owns one live session at a time: a
//! persistent duplex connection to the remote model, the microphone/VAD tee
//! feeding it, and the playback sink it feeds back into. Turn arbitration —
//! including barge-in cancellation — lives in the pure
//! [`engine::TurnEngine`]; everything async around it only moves events into
//! one ordered queue and executes the engine's actions.

pub mod controller;
pub mod engine;
pub mod transport;

pub use controller::{
    SessionController, SessionEvent, SessionNotice, SessionStatus, TransportFault,
};
pub use engine::{Action, EngineEvent, TurnEngine, TurnPhase};
pub use transport::{OutboundLink, RealtimeTransport};
