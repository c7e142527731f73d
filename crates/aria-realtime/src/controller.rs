//! Session controller — lifecycle and wiring for one realtime session.
//!
//! The controller owns the single point of serialization the whole design
//! hangs on: capture, playback faults, transport events, deadlines, and
//! user commands all land on one ordered queue, consumed by one loop that
//! drives the [`TurnEngine`]. Outbound microphone audio bypasses the queue
//! entirely (it must never wait behind event dispatch) and flows straight
//! into the transport's coalescing buffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aria_core::config::{LocaleFlags, RemoteConfig, SessionConfig};
use aria_core::error::{AriaError, Result};
use aria_core::protocol::{ClientEvent, ServerEvent, SessionUpdate, TurnDetection};
use aria_core::types::{AssistantReply, TurnId};
use aria_media::capture::{CaptureMessage, MicCapture};
use aria_media::playback::{NullSink, PlaybackSink, SpeakerSink};
use aria_media::vad::{VadTransition, VoiceActivityDetector};

use crate::engine::{Action, EngineEvent, TurnEngine};
use crate::transport::{OutboundLink, RealtimeTransport};

/// Bound on device-thread reclamation during `stop()` and teardown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Bound on waiting for the remote to acknowledge a cancel. Local flush is
/// authoritative; this only delays the return to listening.
pub const CANCEL_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Window within which a requested turn must reach a terminal event.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything that can land on the session's single inbound queue.
#[derive(Debug)]
pub enum SessionEvent {
    /// Local VAD transition from the capture tee.
    Vad(VadTransition),
    /// Inbound envelope from the transport reader.
    Remote(ServerEvent),
    /// Explicit end-of-turn signal (VAD-disabled mode).
    EndTurn,
    /// A text turn from the command dispatcher.
    SendText {
        text: String,
        reply: oneshot::Sender<Result<String>>,
    },
    /// Cancel acknowledgement never arrived.
    CancelDeadline(TurnId),
    /// A text turn's window expired.
    TextDeadline(TurnId),
    /// Capture or playback died. Terminal: audio hardware loss invalidates
    /// the session.
    DeviceFault(String),
    /// The transport reported its single terminal fault.
    TransportFault(TransportFault),
    /// Graceful stop; `ack` fires once teardown finished.
    Stop { ack: oneshot::Sender<()> },
}

/// Terminal transport conditions, exactly one per connection.
#[derive(Debug, Clone)]
pub enum TransportFault {
    /// A frame we could not parse at all.
    Protocol(String),
    /// The socket errored out.
    ConnectionLost(String),
    /// The remote closed the connection.
    Closed,
}

/// Out-of-band notifications for the embedding application.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// A completed assistant turn: transcript plus any tool calls for the
    /// command dispatcher to execute.
    Reply(AssistantReply),
    /// The session ended, with the failure message if it was not graceful.
    Stopped { error: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Active,
    Idle,
    Failed(FailReason),
}

/// Why a session died.
#[derive(Debug, Clone, PartialEq)]
pub struct FailReason {
    pub kind: FailKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Connection,
    RemoteProtocol,
    Device,
}

impl FailReason {
    fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: FailKind::Connection,
            message: message.into(),
        }
    }

    fn remote_protocol(message: impl Into<String>) -> Self {
        Self {
            kind: FailKind::RemoteProtocol,
            message: message.into(),
        }
    }

    fn device(message: impl Into<String>) -> Self {
        Self {
            kind: FailKind::Device,
            message: message.into(),
        }
    }

    pub fn to_error(&self) -> AriaError {
        match self.kind {
            FailKind::Connection => AriaError::Connection(self.message.clone()),
            FailKind::RemoteProtocol => AriaError::RemoteProtocol(self.message.clone()),
            FailKind::Device => AriaError::Device(self.message.clone()),
        }
    }
}

/// Bounded-shutdown handle over the capture thread.
///
/// Split out as a trait so tests can simulate a hung device read.
pub trait CaptureControl: Send {
    /// Returns whether the thread acknowledged within the grace period.
    fn shutdown(self: Box<Self>, grace: Duration) -> bool;
}

impl CaptureControl for MicCapture {
    fn shutdown(self: Box<Self>, grace: Duration) -> bool {
        MicCapture::shutdown(*self, grace)
    }
}

/// The I/O a session runs on. `start()`/`start_text()` assemble the real
/// devices and transport; tests assemble fakes.
pub struct SessionIo {
    pub outbound: Arc<dyn OutboundLink>,
    pub playback: Box<dyn PlaybackSink>,
    pub capture: Option<Box<dyn CaptureControl>>,
    pub event_tx: mpsc::UnboundedSender<SessionEvent>,
    pub event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

struct ActiveSession {
    session_id: Uuid,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    status_rx: watch::Receiver<SessionStatus>,
    loop_task: JoinHandle<()>,
}

struct Inner {
    ever_started: bool,
    session: Option<ActiveSession>,
}

/// Owns at most one live session at a time.
pub struct SessionController {
    remote: RemoteConfig,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
    inner: Mutex<Inner>,
}

impl SessionController {
    /// Build a controller plus the notice stream the embedding application
    /// listens on.
    pub fn new(remote: RemoteConfig) -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        (
            Self {
                remote,
                notice_tx,
                inner: Mutex::new(Inner {
                    ever_started: false,
                    session: None,
                }),
            },
            notice_rx,
        )
    }

    /// Start a full voice session: transport, microphone, VAD tee, speaker.
    ///
    /// Idempotent: a second call while active is a no-op and opens no second
    /// connection or capture thread.
    pub async fn start(&self, config: SessionConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if is_live(&inner) {
            debug!("session already active, start() is a no-op");
            return Ok(());
        }
        config.validate()?;
        let api_key = self.remote.require_api_key()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport =
            RealtimeTransport::connect(&self.remote, &config.model, &api_key, event_tx.clone())
                .await?;
        let outbound: Arc<dyn OutboundLink> = Arc::new(transport);

        // Microphone. The device is opened on its own thread; failure here
        // must release the connection we just opened.
        let (cap_tx, cap_rx) = mpsc::unbounded_channel();
        let capture = match tokio::task::spawn_blocking(move || MicCapture::spawn(cap_tx)).await {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) => {
                outbound.close();
                return Err(e.into());
            }
            Err(e) => {
                outbound.close();
                return Err(AriaError::Device(e.to_string()));
            }
        };

        // Speaker, same deal.
        let (pb_fault_tx, mut pb_fault_rx) = mpsc::unbounded_channel::<String>();
        let playback =
            match tokio::task::spawn_blocking(move || SpeakerSink::spawn(pb_fault_tx)).await {
                Ok(Ok(playback)) => playback,
                Ok(Err(e)) => {
                    outbound.close();
                    tokio::task::spawn_blocking(move || capture.shutdown(SHUTDOWN_GRACE));
                    return Err(e.into());
                }
                Err(e) => {
                    outbound.close();
                    tokio::task::spawn_blocking(move || capture.shutdown(SHUTDOWN_GRACE));
                    return Err(AriaError::Device(e.to_string()));
                }
            };

        // Playback faults join the same queue as everything else.
        {
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(message) = pb_fault_rx.recv().await {
                    if event_tx.send(SessionEvent::DeviceFault(message)).is_err() {
                        break;
                    }
                }
            });
        }

        // Capture -> VAD tee -> transport.
        let vad = config
            .vad_enabled
            .then(|| VoiceActivityDetector::new(config.vad));
        tokio::spawn(capture_pump(
            cap_rx,
            vad,
            Arc::clone(&outbound),
            event_tx.clone(),
        ));

        let io = SessionIo {
            outbound,
            playback: Box::new(playback),
            capture: Some(Box::new(capture)),
            event_tx,
            event_rx,
        };
        self.activate(&mut inner, config, io)
    }

    /// Start a text-only session: same transport and turn machinery, no
    /// audio devices.
    pub async fn start_text(&self, config: SessionConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if is_live(&inner) {
            debug!("session already active, start_text() is a no-op");
            return Ok(());
        }
        config.validate()?;
        let api_key = self.remote.require_api_key()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport =
            RealtimeTransport::connect(&self.remote, &config.model, &api_key, event_tx.clone())
                .await?;

        let io = SessionIo {
            outbound: Arc::new(transport),
            playback: Box::new(NullSink),
            capture: None,
            event_tx,
            event_rx,
        };
        self.activate(&mut inner, config, io)
    }

    /// Start on caller-supplied I/O. This is the seam alternative
    /// transports and the test suite plug into; `start()` is this plus the
    /// real devices.
    pub async fn start_with_io(&self, config: SessionConfig, io: SessionIo) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if is_live(&inner) {
            debug!("session already active, start_with_io() is a no-op");
            return Ok(());
        }
        config.validate()?;
        self.activate(&mut inner, config, io)
    }

    fn activate(&self, inner: &mut Inner, config: SessionConfig, io: SessionIo) -> Result<()> {
        let session_id = Uuid::new_v4();

        // First frame: negotiate the session before any audio moves.
        io.outbound
            .send(session_update(&config))
            .map_err(|_| AriaError::Connection("connection closed during setup".into()))?;

        let (status_tx, status_rx) = watch::channel(SessionStatus::Active);
        let runtime = SessionRuntime {
            locale: config.locale,
            engine: TurnEngine::new(),
            outbound: io.outbound,
            playback: io.playback,
            capture: io.capture,
            event_tx: io.event_tx.clone(),
            pending_texts: HashMap::new(),
            notice_tx: self.notice_tx.clone(),
            status_tx,
        };
        let loop_task = tokio::spawn(runtime.run(io.event_rx));

        info!(%session_id, model = %config.model, voice = %config.voice, "session started");
        inner.ever_started = true;
        inner.session = Some(ActiveSession {
            session_id,
            event_tx: io.event_tx,
            status_rx,
            loop_task,
        });
        Ok(())
    }

    /// Stop the session. Always drains within a bounded window; device
    /// threads that refuse to die are abandoned and logged, never waited on
    /// forever. A no-op when idle.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(active) = inner.session.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if active
            .event_tx
            .send(SessionEvent::Stop { ack: ack_tx })
            .is_ok()
        {
            // Teardown itself is bounded; this outer timeout is the
            // belt-and-braces backstop for a wedged loop task.
            if tokio::time::timeout(SHUTDOWN_GRACE * 3, ack_rx).await.is_err() {
                warn!(session_id = %active.session_id, "session loop missed the stop deadline, aborting it");
                active.loop_task.abort();
            }
        } else {
            // Loop already gone (fatal error path finished the teardown).
            active.loop_task.abort();
        }
        info!(session_id = %active.session_id, "session stopped");
        Ok(())
    }

    /// Converse with the live session in text. Resolves with the assistant
    /// text once its terminal event arrives, or fails with `TurnTimeout`
    /// while the session stays active.
    pub async fn send_text(&self, text: &str) -> Result<String> {
        let event_tx = {
            let inner = self.inner.lock().await;
            match live_sender(&inner) {
                Some(tx) => tx,
                None => return Err(no_session_error(&inner)),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        event_tx
            .send(SessionEvent::SendText {
                text: text.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| AriaError::Connection("session terminated".into()))?;

        reply_rx
            .await
            .map_err(|_| AriaError::Connection("session closed before the reply arrived".into()))?
    }

    /// Explicit end-of-turn signal for VAD-disabled sessions.
    pub async fn end_turn(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        match live_sender(&inner) {
            Some(tx) => tx
                .send(SessionEvent::EndTurn)
                .map_err(|_| AriaError::Connection("session terminated".into())),
            None => Err(no_session_error(&inner)),
        }
    }

    /// Whether a session is currently live.
    pub async fn is_active(&self) -> bool {
        let inner = self.inner.lock().await;
        is_live(&inner)
    }

    /// Wait until the current session ends; `Err` when it died on a fault.
    pub async fn wait(&self) -> Result<()> {
        let mut status_rx = {
            let inner = self.inner.lock().await;
            match &inner.session {
                Some(active) => active.status_rx.clone(),
                None => return Ok(()),
            }
        };
        loop {
            let status = status_rx.borrow_and_update().clone();
            match status {
                SessionStatus::Active => {
                    if status_rx.changed().await.is_err() {
                        return Ok(());
                    }
                }
                SessionStatus::Idle => return Ok(()),
                SessionStatus::Failed(reason) => return Err(reason.to_error()),
            }
        }
    }
}

fn is_live(inner: &Inner) -> bool {
    inner
        .session
        .as_ref()
        .is_some_and(|s| *s.status_rx.borrow() == SessionStatus::Active)
}

fn live_sender(inner: &Inner) -> Option<mpsc::UnboundedSender<SessionEvent>> {
    inner
        .session
        .as_ref()
        .filter(|s| *s.status_rx.borrow() == SessionStatus::Active)
        .map(|s| s.event_tx.clone())
}

/// Distinguishes "never configured" from "was up, now gone" for callers
/// arriving with no live session.
fn no_session_error(inner: &Inner) -> AriaError {
    if inner.ever_started {
        AriaError::Connection("no active session".into())
    } else {
        AriaError::Configuration("no session has been started".into())
    }
}

/// Build the initial `session.update` from the configuration snapshot.
fn session_update(config: &SessionConfig) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionUpdate {
            model: config.model.clone(),
            voice: config.voice.clone(),
            instructions: config.system_prompt.clone(),
            modalities: vec!["audio".into(), "text".into()],
            input_audio_format: "pcm16".into(),
            output_audio_format: "pcm16".into(),
            turn_detection: config.vad_enabled.then(TurnDetection::server_vad),
            tools: config
                .function_calling_enabled
                .then(|| config.tools.clone()),
            tool_choice: config
                .function_calling_enabled
                .then(|| "auto".into()),
        },
    }
}

/// Append the current date/time to a text turn, per the locale flags.
fn stamp_locale(text: &str, locale: &LocaleFlags) -> String {
    let now = chrono::Local::now();
    let mut additions = Vec::new();
    if locale.include_date {
        additions.push(format!("Date: {}", now.format("%Y-%m-%d")));
    }
    if locale.include_time {
        additions.push(format!("Time: {}", now.format("%H:%M:%S")));
    }
    if additions.is_empty() {
        text.to_string()
    } else {
        format!("{text} ({})", additions.join(" | "))
    }
}

/// Capture frames: tee into the VAD for turn decisions, stream everything
/// to the transport. Runs for the session's lifetime.
async fn capture_pump(
    mut cap_rx: mpsc::UnboundedReceiver<CaptureMessage>,
    mut vad: Option<VoiceActivityDetector>,
    outbound: Arc<dyn OutboundLink>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(message) = cap_rx.recv().await {
        match message {
            CaptureMessage::Frame(chunk) => {
                if let Some(vad) = vad.as_mut() {
                    if let Some(transition) = vad.process_frame(&chunk.pcm) {
                        if event_tx.send(SessionEvent::Vad(transition)).is_err() {
                            break;
                        }
                    }
                }
                if outbound.send_audio(chunk.to_le_bytes()).is_err() {
                    break;
                }
            }
            CaptureMessage::Fault(message) => {
                let _ = event_tx.send(SessionEvent::DeviceFault(message));
                break;
            }
        }
    }
    debug!("capture pump stopped");
}

/// State owned by the single dispatch loop.
struct SessionRuntime {
    locale: LocaleFlags,
    engine: TurnEngine,
    outbound: Arc<dyn OutboundLink>,
    playback: Box<dyn PlaybackSink>,
    capture: Option<Box<dyn CaptureControl>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    pending_texts: HashMap<TurnId, oneshot::Sender<Result<String>>>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionRuntime {
    async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<SessionEvent>) {
        let failure = loop {
            let Some(event) = event_rx.recv().await else {
                // Every producer dropped; nothing left to serialize.
                break None;
            };

            let fail = match event {
                SessionEvent::Vad(VadTransition::SpeechStart) => {
                    self.dispatch(EngineEvent::SpeechStart)
                }
                SessionEvent::Vad(VadTransition::SpeechStop) => {
                    self.dispatch(EngineEvent::SpeechStop)
                }
                SessionEvent::EndTurn => self.dispatch(EngineEvent::EndTurn),
                SessionEvent::Remote(server) => self.dispatch(EngineEvent::Remote(server)),
                SessionEvent::CancelDeadline(turn) => {
                    self.dispatch(EngineEvent::CancelDeadline(turn))
                }
                SessionEvent::TextDeadline(turn) => {
                    self.dispatch(EngineEvent::TextDeadline(turn))
                }
                SessionEvent::SendText { text, reply } => {
                    let stamped = stamp_locale(&text, &self.locale);
                    let (turn, actions) = self.engine.submit_text(stamped);
                    self.pending_texts.insert(turn, reply);
                    self.schedule(TURN_TIMEOUT, SessionEvent::TextDeadline(turn));
                    self.run_actions(actions)
                }
                SessionEvent::DeviceFault(message) => Some(FailReason::device(message)),
                SessionEvent::TransportFault(fault) => Some(match fault {
                    TransportFault::Protocol(m) => FailReason::remote_protocol(m),
                    TransportFault::ConnectionLost(m) => FailReason::connection(m),
                    TransportFault::Closed => {
                        FailReason::connection("connection closed by remote")
                    }
                }),
                SessionEvent::Stop { ack } => {
                    self.teardown(None).await;
                    let _ = ack.send(());
                    return;
                }
            };

            if let Some(reason) = fail {
                break Some(reason);
            }
        };

        self.teardown(failure).await;
    }

    fn dispatch(&mut self, event: EngineEvent) -> Option<FailReason> {
        let actions = self.engine.handle(event);
        self.run_actions(actions)
    }

    fn run_actions(&mut self, actions: Vec<Action>) -> Option<FailReason> {
        for action in actions {
            match action {
                Action::Send(event) => {
                    if self.outbound.send(event).is_err() {
                        return Some(FailReason::connection("outbound channel closed"));
                    }
                }
                Action::PlaybackAppend(chunk) => self.playback.append(chunk),
                Action::PlaybackFlush => self.playback.flush(),
                Action::ScheduleCancelDeadline(turn) => {
                    self.schedule(CANCEL_ACK_TIMEOUT, SessionEvent::CancelDeadline(turn));
                }
                Action::ResolveText { turn, text } => {
                    if let Some(tx) = self.pending_texts.remove(&turn) {
                        let _ = tx.send(Ok(text));
                    }
                }
                Action::FailText { turn, reason } => {
                    if let Some(tx) = self.pending_texts.remove(&turn) {
                        let _ = tx.send(Err(AriaError::TurnTimeout(reason)));
                    }
                }
                Action::Reply(reply) => {
                    let _ = self.notice_tx.send(SessionNotice::Reply(reply));
                }
                Action::Fatal(message) => {
                    return Some(FailReason::remote_protocol(message));
                }
            }
        }
        None
    }

    fn schedule(&self, after: Duration, event: SessionEvent) {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = event_tx.send(event);
        });
    }

    /// Release everything, in the same order regardless of why: stop local
    /// audio, reclaim device threads within the grace bound, close the
    /// socket gracefully, fail any callers still waiting.
    async fn teardown(mut self, failure: Option<FailReason>) {
        let error_message = failure.as_ref().map(|f| f.message.clone());

        // Fail every queued or in-flight text turn.
        for turn in self.engine.drain_texts() {
            if let Some(tx) = self.pending_texts.remove(&turn) {
                let _ = tx.send(Err(match &failure {
                    Some(reason) => reason.to_error(),
                    None => AriaError::Connection("session stopped".into()),
                }));
            }
        }
        for (_, tx) in self.pending_texts.drain() {
            let _ = tx.send(Err(AriaError::Connection("session stopped".into())));
        }

        // Device threads block on their acks; keep that off the runtime.
        let mut playback = self.playback;
        let playback_done = tokio::task::spawn_blocking(move || {
            playback.flush();
            playback.close(SHUTDOWN_GRACE)
        });
        let capture_done = self.capture.take().map(|capture| {
            tokio::task::spawn_blocking(move || capture.shutdown(SHUTDOWN_GRACE))
        });

        if let Ok(acked) = playback_done.await {
            if !acked {
                warn!("playback did not acknowledge shutdown");
            }
        }
        if let Some(done) = capture_done {
            if let Ok(acked) = done.await {
                if !acked {
                    warn!("capture did not acknowledge shutdown");
                }
            }
        }

        self.outbound.close();

        match &failure {
            Some(reason) => {
                warn!(kind = ?reason.kind, message = %reason.message, "session terminated");
                let _ = self.status_tx.send(SessionStatus::Failed(reason.clone()));
            }
            None => {
                debug!("session drained cleanly");
                let _ = self.status_tx.send(SessionStatus::Idle);
            }
        }
        let _ = self.notice_tx.send(SessionNotice::Stopped {
            error: error_message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_locale_variants() {
        let both = LocaleFlags {
            include_date: true,
            include_time: true,
        };
        let stamped = stamp_locale("status", &both);
        assert!(stamped.starts_with("status (Date: "));
        assert!(stamped.contains("| Time: "));

        let neither = LocaleFlags {
            include_date: false,
            include_time: false,
        };
        assert_eq!(stamp_locale("status", &neither), "status");

        let date_only = LocaleFlags {
            include_date: true,
            include_time: false,
        };
        let stamped = stamp_locale("status", &date_only);
        assert!(stamped.contains("Date: ") && !stamped.contains("Time: "));
    }

    #[test]
    fn test_session_update_negotiates_config() {
        let mut config = SessionConfig::default();
        config.voice = "verse".into();
        config.system_prompt = "be brief".into();
        config.vad_enabled = true;
        config.function_calling_enabled = true;
        config.tools = vec![serde_json::json!({"type": "function", "name": "noop"})];

        let ClientEvent::SessionUpdate { session } = session_update(&config) else {
            panic!("expected session.update");
        };
        assert_eq!(session.voice, "verse");
        assert_eq!(session.instructions, "be brief");
        assert_eq!(session.input_audio_format, "pcm16");
        assert_eq!(
            session.turn_detection.as_ref().map(|t| t.kind.as_str()),
            Some("server_vad")
        );
        assert_eq!(session.tools.as_ref().map(Vec::len), Some(1));
        assert_eq!(session.tool_choice.as_deref(), Some("auto"));
    }

    #[test]
    fn test_session_update_omits_disabled_features() {
        let config = SessionConfig {
            vad_enabled: false,
            ..SessionConfig::default()
        };
        let ClientEvent::SessionUpdate { session } = session_update(&config) else {
            panic!("expected session.update");
        };
        assert!(session.turn_detection.is_none());
        assert!(session.tools.is_none());
        assert!(session.tool_choice.is_none());
    }

    #[test]
    fn test_fail_reason_maps_to_taxonomy() {
        assert!(matches!(
            FailReason::connection("x").to_error(),
            AriaError::Connection(_)
        ));
        assert!(matches!(
            FailReason::remote_protocol("x").to_error(),
            AriaError::RemoteProtocol(_)
        ));
        assert!(matches!(
            FailReason::device("x").to_error(),
            AriaError::Device(_)
        ));
    }
}
