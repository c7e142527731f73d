//! Turn arbitration state machine.
//!
//! [`TurnEngine`] is pure: it consumes one event at a time and returns the
//! actions the controller must execute, never touching a socket or a device
//! itself. Because every producer funnels into one queue and this machine
//! runs on exactly one consumer, turn transitions cannot race each other no
//! matter how the capture, playback, and transport tasks interleave.
//!
//! Stale audio is killed by turn-id tagging, not timing: a delta whose id
//! does not match the currently responding turn is dropped on the floor,
//! which is what makes barge-in cancellation effective locally before the
//! remote side has acknowledged anything.

use std::collections::VecDeque;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::{debug, warn};

use aria_core::protocol::{
    ClientEvent, ConversationItem, OutputItem, ResponseOutcome, ResponseSpec, ServerEvent,
};
use aria_core::types::{AssistantReply, AudioChunk, ToolInvocation, TurnId};

/// Inputs to the engine, already serialized onto one queue.
#[derive(Debug)]
pub enum EngineEvent {
    /// The user started talking (local VAD or the remote's server VAD).
    SpeechStart,
    /// The user stopped talking.
    SpeechStop,
    /// Explicit end-of-turn signal (the VAD-disabled path).
    EndTurn,
    /// An inbound envelope from the transport.
    Remote(ServerEvent),
    /// The remote never acknowledged a cancel in time.
    CancelDeadline(TurnId),
    /// A text turn ran out its window.
    TextDeadline(TurnId),
}

/// What the controller must do next, in order.
#[derive(Debug)]
pub enum Action {
    /// Send a control envelope over the transport.
    Send(ClientEvent),
    /// Hand a decoded remote audio chunk to the playback sink.
    PlaybackAppend(AudioChunk),
    /// Discard everything buffered but unplayed, immediately.
    PlaybackFlush,
    /// Arm the bounded wait for a cancel acknowledgement.
    ScheduleCancelDeadline(TurnId),
    /// Complete a pending `send_text` with the assistant's text.
    ResolveText { turn: TurnId, text: String },
    /// Fail a pending `send_text`; the session stays up.
    FailText { turn: TurnId, reason: String },
    /// A completed assistant turn (transcript and any tool calls).
    Reply(AssistantReply),
    /// Unrecoverable protocol fault; tear the session down.
    Fatal(String),
}

/// Public view of the arbitration sub-state, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Listening,
    UserSpeaking,
    AssistantResponding,
    Cancelling,
}

/// What a response was asked to produce.
#[derive(Debug)]
enum ResponseKind {
    /// Spoken reply to a voice turn; accumulates the transcript.
    Voice { transcript: String },
    /// Text-only reply to a `send_text` turn.
    Text { buf: String },
}

/// Where to land once a cancellation resolves.
#[derive(Debug)]
enum Resume {
    Listening,
    /// The user turn opened by the barge-in; `stopped` records a
    /// speech-stop that arrived inside the cancellation window.
    UserTurn { turn: TurnId, stopped: bool },
}

#[derive(Debug)]
enum Phase {
    Listening,
    UserSpeaking {
        turn: TurnId,
    },
    Responding {
        turn: TurnId,
        kind: ResponseKind,
    },
    Cancelling {
        cancelled: TurnId,
        resume: Resume,
    },
}

#[derive(Debug)]
struct PendingText {
    turn: TurnId,
    text: String,
}

pub struct TurnEngine {
    phase: Phase,
    next_turn: u64,
    /// Text turns waiting for the phase to return to listening.
    text_queue: VecDeque<PendingText>,
    /// Deltas dropped because their turn id did not match.
    stale_deltas: u64,
}

impl Default for TurnEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Listening,
            next_turn: 0,
            text_queue: VecDeque::new(),
            stale_deltas: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        match self.phase {
            Phase::Listening => TurnPhase::Listening,
            Phase::UserSpeaking { .. } => TurnPhase::UserSpeaking,
            Phase::Responding { .. } => TurnPhase::AssistantResponding,
            Phase::Cancelling { .. } => TurnPhase::Cancelling,
        }
    }

    /// How many deltas were dropped for carrying a stale turn id.
    pub fn stale_deltas(&self) -> u64 {
        self.stale_deltas
    }

    fn alloc(&mut self) -> TurnId {
        self.next_turn += 1;
        TurnId(self.next_turn)
    }

    /// Queue a text turn. Starts immediately when listening, otherwise
    /// waits for the current turn to finish. The caller owns the deadline.
    pub fn submit_text(&mut self, text: String) -> (TurnId, Vec<Action>) {
        let turn = self.alloc();
        debug!(%turn, "text turn queued");
        self.text_queue.push_back(PendingText { turn, text });
        let actions = if matches!(self.phase, Phase::Listening) {
            self.start_next_text()
        } else {
            Vec::new()
        };
        (turn, actions)
    }

    /// Drain every queued or in-flight text turn, for teardown.
    pub fn drain_texts(&mut self) -> Vec<TurnId> {
        let mut turns: Vec<TurnId> = self.text_queue.drain(..).map(|p| p.turn).collect();
        if let Phase::Responding {
            turn,
            kind: ResponseKind::Text { .. },
        } = &self.phase
        {
            turns.push(*turn);
        }
        turns
    }

    pub fn handle(&mut self, event: EngineEvent) -> Vec<Action> {
        match event {
            EngineEvent::SpeechStart => self.on_speech_start(),
            EngineEvent::SpeechStop => self.on_speech_stop(false),
            EngineEvent::EndTurn => self.on_speech_stop(true),
            EngineEvent::Remote(server) => self.on_remote(server),
            EngineEvent::CancelDeadline(turn) => self.on_cancel_deadline(turn),
            EngineEvent::TextDeadline(turn) => self.on_text_deadline(turn),
        }
    }

    fn on_speech_start(&mut self) -> Vec<Action> {
        match &self.phase {
            Phase::Listening => {
                let turn = self.alloc();
                debug!(%turn, "user turn opened");
                self.phase = Phase::UserSpeaking { turn };
                Vec::new()
            }
            // Duplicate start (local VAD and server VAD can both fire).
            Phase::UserSpeaking { .. } | Phase::Cancelling { .. } => Vec::new(),
            Phase::Responding { .. } => self.barge_in(),
        }
    }

    /// The user spoke over the assistant: flush locally first (that is the
    /// authoritative mute), then tell the remote, then wait — bounded — for
    /// the acknowledgement.
    fn barge_in(&mut self) -> Vec<Action> {
        let Phase::Responding { turn, kind } =
            std::mem::replace(&mut self.phase, Phase::Listening)
        else {
            unreachable!("barge_in is only entered from Responding");
        };

        let mut actions = vec![
            Action::PlaybackFlush,
            Action::Send(ClientEvent::ResponseCancel { turn_id: turn }),
            Action::ScheduleCancelDeadline(turn),
        ];
        if let ResponseKind::Text { .. } = kind {
            actions.push(Action::FailText {
                turn,
                reason: "cancelled by user speech".into(),
            });
        }

        let user_turn = self.alloc();
        warn!(cancelled = %turn, new_turn = %user_turn, "barge-in, cancelling response");
        self.phase = Phase::Cancelling {
            cancelled: turn,
            resume: Resume::UserTurn {
                turn: user_turn,
                stopped: false,
            },
        };
        actions
    }

    fn on_speech_stop(&mut self, explicit_end_turn: bool) -> Vec<Action> {
        match &mut self.phase {
            Phase::UserSpeaking { turn } => {
                let turn = *turn;
                self.commit_user_turn(turn)
            }
            Phase::Listening if explicit_end_turn => {
                // VAD-disabled path: the operator ends the turn, no
                // speech-start was ever observed locally.
                let turn = self.alloc();
                self.commit_user_turn(turn)
            }
            Phase::Cancelling {
                resume: Resume::UserTurn { stopped, .. },
                ..
            } => {
                *stopped = true;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Commit the open user turn and request the response. Exactly one
    /// commit and one response.create, in that order.
    fn commit_user_turn(&mut self, user_turn: TurnId) -> Vec<Action> {
        let response = self.alloc();
        debug!(user = %user_turn, response = %response, "user turn committed, requesting response");
        self.phase = Phase::Responding {
            turn: response,
            kind: ResponseKind::Voice {
                transcript: String::new(),
            },
        };
        vec![
            Action::Send(ClientEvent::InputAudioCommit),
            Action::Send(ClientEvent::ResponseCreate {
                response: ResponseSpec::voice(response),
            }),
        ]
    }

    fn on_remote(&mut self, event: ServerEvent) -> Vec<Action> {
        match event {
            ServerEvent::SpeechStarted { .. } => self.on_speech_start(),
            ServerEvent::SpeechStopped { .. } => self.on_speech_stop(false),
            ServerEvent::AudioDelta { turn_id, delta } => self.on_audio_delta(turn_id, &delta),
            ServerEvent::TextDelta { turn_id, delta } => {
                if let Phase::Responding { turn, kind } = &mut self.phase {
                    if *turn == turn_id {
                        match kind {
                            ResponseKind::Voice { transcript } => transcript.push_str(&delta),
                            ResponseKind::Text { buf } => buf.push_str(&delta),
                        }
                    }
                }
                Vec::new()
            }
            ServerEvent::ResponseDone { turn_id, response } => self.on_response_done(turn_id, response),
            ServerEvent::Error { message } => {
                vec![Action::Fatal(if message.is_empty() {
                    "remote error event".into()
                } else {
                    message
                })]
            }
            ServerEvent::Unknown => {
                debug!("ignoring unrecognized server event");
                Vec::new()
            }
        }
    }

    fn on_audio_delta(&mut self, turn_id: TurnId, delta: &str) -> Vec<Action> {
        let accept = matches!(&self.phase, Phase::Responding { turn, .. } if *turn == turn_id);
        if !accept {
            self.stale_deltas += 1;
            debug!(%turn_id, stale = self.stale_deltas, "dropping audio delta for stale turn");
            return Vec::new();
        }
        match B64.decode(delta) {
            Ok(bytes) => vec![Action::PlaybackAppend(AudioChunk::from_le_bytes(&bytes))],
            Err(e) => vec![Action::Fatal(format!("undecodable audio delta: {e}"))],
        }
    }

    fn on_response_done(&mut self, turn_id: TurnId, outcome: ResponseOutcome) -> Vec<Action> {
        if matches!(&self.phase, Phase::Responding { turn, .. } if *turn == turn_id) {
            let Phase::Responding { kind, .. } =
                std::mem::replace(&mut self.phase, Phase::Listening)
            else {
                unreachable!("checked above");
            };
            debug!(%turn_id, "response complete");

            let (buffered, is_text) = match kind {
                ResponseKind::Voice { transcript } => (transcript, false),
                ResponseKind::Text { buf } => (buf, true),
            };
            let reply = build_reply(turn_id, buffered, &outcome);

            let mut actions = Vec::new();
            if is_text {
                actions.push(Action::ResolveText {
                    turn: turn_id,
                    text: reply.text.clone(),
                });
                // Tool calls on a text turn still go to the notice stream
                // so the dispatcher can see them.
                if !reply.tool_calls.is_empty() {
                    actions.push(Action::Reply(reply));
                }
            } else {
                actions.push(Action::Reply(reply));
            }
            actions.extend(self.start_next_text());
            return actions;
        }

        if matches!(&self.phase, Phase::Cancelling { cancelled, .. } if *cancelled == turn_id) {
            debug!(%turn_id, "cancel acknowledged");
            return self.resume_after_cancel();
        }

        debug!(%turn_id, "ignoring done for unknown turn");
        Vec::new()
    }

    fn on_cancel_deadline(&mut self, turn: TurnId) -> Vec<Action> {
        if matches!(&self.phase, Phase::Cancelling { cancelled, .. } if *cancelled == turn) {
            warn!(%turn, "cancel acknowledgement timed out, resuming locally");
            self.resume_after_cancel()
        } else {
            Vec::new()
        }
    }

    fn resume_after_cancel(&mut self) -> Vec<Action> {
        let Phase::Cancelling { resume, .. } =
            std::mem::replace(&mut self.phase, Phase::Listening)
        else {
            unreachable!("resume_after_cancel is only entered from Cancelling");
        };
        match resume {
            Resume::Listening => self.start_next_text(),
            Resume::UserTurn { turn, stopped } => {
                if stopped {
                    // The user finished speaking while we were waiting for
                    // the ack; commit right away.
                    self.commit_user_turn(turn)
                } else {
                    self.phase = Phase::UserSpeaking { turn };
                    Vec::new()
                }
            }
        }
    }

    fn on_text_deadline(&mut self, turn: TurnId) -> Vec<Action> {
        // Still queued: drop it there.
        if let Some(pos) = self.text_queue.iter().position(|p| p.turn == turn) {
            self.text_queue.remove(pos);
            return vec![Action::FailText {
                turn,
                reason: "timed out before an earlier turn finished".into(),
            }];
        }

        // In flight: cancel the response and fail the caller; the session
        // itself stays active.
        if matches!(
            &self.phase,
            Phase::Responding { turn: t, kind: ResponseKind::Text { .. } } if *t == turn
        ) {
            self.phase = Phase::Cancelling {
                cancelled: turn,
                resume: Resume::Listening,
            };
            return vec![
                Action::FailText {
                    turn,
                    reason: "no terminal event within the turn window".into(),
                },
                Action::Send(ClientEvent::ResponseCancel { turn_id: turn }),
                Action::ScheduleCancelDeadline(turn),
            ];
        }

        Vec::new()
    }

    /// Start the oldest queued text turn, if the phase allows it.
    fn start_next_text(&mut self) -> Vec<Action> {
        if !matches!(self.phase, Phase::Listening) {
            return Vec::new();
        }
        let Some(pending) = self.text_queue.pop_front() else {
            return Vec::new();
        };
        debug!(turn = %pending.turn, "starting text turn");
        self.phase = Phase::Responding {
            turn: pending.turn,
            kind: ResponseKind::Text { buf: String::new() },
        };
        vec![
            Action::Send(ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(pending.text),
            }),
            Action::Send(ClientEvent::ResponseCreate {
                response: ResponseSpec::text_only(pending.turn),
            }),
        ]
    }
}

/// Assemble the reply from streamed deltas, falling back to the terminal
/// event's output items when nothing was streamed.
fn build_reply(turn_id: TurnId, buffered: String, outcome: &ResponseOutcome) -> AssistantReply {
    let mut text = buffered;
    let mut tool_calls = Vec::new();

    for item in &outcome.output {
        match item {
            OutputItem::Message { text: t } => {
                if text.is_empty() && !t.is_empty() {
                    text = t.clone();
                }
            }
            OutputItem::FunctionCall {
                name,
                call_id,
                arguments,
            } => {
                let arguments = serde_json::from_str(arguments)
                    .unwrap_or_else(|_| serde_json::json!({}));
                tool_calls.push(ToolInvocation {
                    name: name.clone(),
                    call_id: call_id.clone(),
                    arguments,
                });
            }
            OutputItem::Unknown => {}
        }
    }

    AssistantReply {
        turn_id: Some(turn_id),
        text,
        tool_calls,
    }
}
