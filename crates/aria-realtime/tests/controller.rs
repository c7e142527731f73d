//! Controller integration tests — a real controller loop over fake
//! transport and playback, driving the session through the same queue the
//! production wiring uses.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::sync::mpsc;

use aria_core::config::{RemoteConfig, SessionConfig};
use aria_core::error::AriaError;
use aria_core::protocol::{ClientEvent, ResponseOutcome, ServerEvent};
use aria_core::types::{AudioChunk, TurnId};
use aria_media::playback::PlaybackSink;
use aria_media::vad::VadTransition;
use aria_realtime::controller::{
    CaptureControl, SessionController, SessionEvent, SessionIo, SessionNotice, TransportFault,
};
use aria_realtime::transport::OutboundLink;

#[derive(Default)]
struct FakeLink {
    sent: Mutex<Vec<ClientEvent>>,
    audio: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<bool>,
}

impl FakeLink {
    fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }
}

impl OutboundLink for FakeLink {
    fn send(&self, event: ClientEvent) -> aria_core::error::Result<()> {
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    fn send_audio(&self, pcm: Vec<u8>) -> aria_core::error::Result<()> {
        self.audio.lock().unwrap().push(pcm);
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlaybackOp {
    Append(usize),
    Flush,
    Close,
}

struct RecordingSink {
    ops: Arc<Mutex<Vec<PlaybackOp>>>,
}

impl PlaybackSink for RecordingSink {
    fn append(&mut self, chunk: AudioChunk) {
        self.ops.lock().unwrap().push(PlaybackOp::Append(chunk.pcm.len()));
    }

    fn flush(&mut self) {
        self.ops.lock().unwrap().push(PlaybackOp::Flush);
    }

    fn close(&mut self, _grace: Duration) -> bool {
        self.ops.lock().unwrap().push(PlaybackOp::Close);
        true
    }
}

/// Simulates a capture thread stuck in a device read: it never
/// acknowledges, eating the whole grace period.
struct HungCapture;

impl CaptureControl for HungCapture {
    fn shutdown(self: Box<Self>, grace: Duration) -> bool {
        std::thread::sleep(grace);
        false
    }
}

struct Harness {
    controller: Arc<SessionController>,
    notice_rx: mpsc::UnboundedReceiver<SessionNotice>,
    link: Arc<FakeLink>,
    ops: Arc<Mutex<Vec<PlaybackOp>>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Harness {
    async fn start(config: SessionConfig) -> Self {
        Self::start_with_capture(config, None).await
    }

    async fn start_with_capture(
        config: SessionConfig,
        capture: Option<Box<dyn CaptureControl>>,
    ) -> Self {
        let (controller, notice_rx) = SessionController::new(RemoteConfig::default());
        let controller = Arc::new(controller);

        let link = Arc::new(FakeLink::default());
        let ops = Arc::new(Mutex::new(Vec::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let io = SessionIo {
            outbound: link.clone(),
            playback: Box::new(RecordingSink { ops: ops.clone() }),
            capture,
            event_tx: event_tx.clone(),
            event_rx,
        };
        controller.start_with_io(config, io).await.unwrap();

        Self {
            controller,
            notice_rx,
            link,
            ops,
            event_tx,
        }
    }

    fn inject(&self, event: SessionEvent) {
        self.event_tx.send(event).unwrap();
    }

    /// Last response.create the session sent, i.e. the responding turn.
    fn responding_turn(&self) -> TurnId {
        self.link
            .sent()
            .iter()
            .rev()
            .find_map(|e| match e {
                ClientEvent::ResponseCreate { response } => Some(response.turn_id),
                _ => None,
            })
            .expect("no response.create sent yet")
    }

    fn audio_delta(&self, turn: TurnId) -> SessionEvent {
        SessionEvent::Remote(ServerEvent::AudioDelta {
            turn_id: turn,
            delta: B64.encode([0u8, 1, 2, 3]),
        })
    }

    fn ops(&self) -> Vec<PlaybackOp> {
        self.ops.lock().unwrap().clone()
    }
}

/// Give the dispatch loop a moment to drain the queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn commit_and_response_create_sent_once_in_order() {
    let harness = Harness::start(SessionConfig::default()).await;

    harness.inject(SessionEvent::Vad(VadTransition::SpeechStart));
    harness.inject(SessionEvent::Vad(VadTransition::SpeechStop));
    settle().await;

    let sent = harness.link.sent();
    assert!(matches!(sent[0], ClientEvent::SessionUpdate { .. }));

    let commits: Vec<usize> = sent
        .iter()
        .enumerate()
        .filter_map(|(i, e)| matches!(e, ClientEvent::InputAudioCommit).then_some(i))
        .collect();
    let creates: Vec<usize> = sent
        .iter()
        .enumerate()
        .filter_map(|(i, e)| matches!(e, ClientEvent::ResponseCreate { .. }).then_some(i))
        .collect();

    assert_eq!(commits.len(), 1, "exactly one commit");
    assert_eq!(creates.len(), 1, "exactly one response.create");
    assert!(commits[0] < creates[0], "commit must precede response.create");
}

#[tokio::test]
async fn barge_in_flushes_playback_before_stale_delta() {
    let harness = Harness::start(SessionConfig::default()).await;

    harness.inject(SessionEvent::Vad(VadTransition::SpeechStart));
    harness.inject(SessionEvent::Vad(VadTransition::SpeechStop));
    settle().await;
    let turn = harness.responding_turn();

    // Two deltas buffered while the assistant responds.
    harness.inject(harness.audio_delta(turn));
    harness.inject(harness.audio_delta(turn));
    settle().await;
    assert_eq!(
        harness.ops(),
        vec![PlaybackOp::Append(2), PlaybackOp::Append(2)]
    );

    // The user barges in, then a third delta for the cancelled turn lands.
    harness.inject(SessionEvent::Vad(VadTransition::SpeechStart));
    harness.inject(harness.audio_delta(turn));
    settle().await;

    let ops = harness.ops();
    assert_eq!(
        ops,
        vec![
            PlaybackOp::Append(2),
            PlaybackOp::Append(2),
            PlaybackOp::Flush
        ],
        "flush must land before the cancelled turn's third delta, which is dropped"
    );

    let cancels = harness
        .link
        .sent()
        .iter()
        .filter(|e| matches!(e, ClientEvent::ResponseCancel { .. }))
        .count();
    assert_eq!(cancels, 1, "exactly one response.cancel");
}

#[tokio::test]
async fn injected_delta_with_wrong_turn_id_never_reaches_playback() {
    let harness = Harness::start(SessionConfig::default()).await;

    harness.inject(SessionEvent::Vad(VadTransition::SpeechStart));
    harness.inject(SessionEvent::Vad(VadTransition::SpeechStop));
    settle().await;
    let turn = harness.responding_turn();

    harness.inject(harness.audio_delta(TurnId(turn.0 + 99)));
    settle().await;
    assert!(harness.ops().is_empty());
}

#[tokio::test]
async fn start_twice_opens_no_second_session() {
    let harness = Harness::start(SessionConfig::default()).await;

    let second_link = Arc::new(FakeLink::default());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let io = SessionIo {
        outbound: second_link.clone(),
        playback: Box::new(RecordingSink {
            ops: Arc::new(Mutex::new(Vec::new())),
        }),
        capture: None,
        event_tx,
        event_rx,
    };
    harness
        .controller
        .start_with_io(SessionConfig::default(), io)
        .await
        .unwrap();

    assert!(
        second_link.sent().is_empty(),
        "second start must not negotiate a second session"
    );
    let first_updates = harness
        .link
        .sent()
        .iter()
        .filter(|e| matches!(e, ClientEvent::SessionUpdate { .. }))
        .count();
    assert_eq!(first_updates, 1);
}

#[tokio::test]
async fn stop_returns_within_bound_despite_hung_capture() {
    let harness =
        Harness::start_with_capture(SessionConfig::default(), Some(Box::new(HungCapture))).await;

    let started = Instant::now();
    harness.controller.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(6),
        "stop() took {elapsed:?}, expected it bounded by the grace period"
    );
    assert!(!harness.controller.is_active().await);
}

#[tokio::test]
async fn send_text_resolves_on_response_done() {
    let harness = Harness::start(SessionConfig::default()).await;

    let controller = harness.controller.clone();
    let ask = tokio::spawn(async move { controller.send_text("status report").await });
    settle().await;

    let sent = harness.link.sent();
    let item_text = sent
        .iter()
        .find_map(|e| match e {
            ClientEvent::ConversationItemCreate { item } => Some(item.content[0].text.clone()),
            _ => None,
        })
        .expect("conversation.item.create sent");
    assert!(item_text.starts_with("status report (Date: "), "locale stamp applied");

    let turn = harness.responding_turn();
    harness.inject(SessionEvent::Remote(ServerEvent::TextDelta {
        turn_id: turn,
        delta: "all systems go".into(),
    }));
    harness.inject(SessionEvent::Remote(ServerEvent::ResponseDone {
        turn_id: turn,
        response: ResponseOutcome::default(),
    }));

    let reply = ask.await.unwrap().unwrap();
    assert_eq!(reply, "all systems go");
    assert!(harness.controller.is_active().await, "session stays active");
}

#[tokio::test]
async fn send_text_without_start_is_a_configuration_error() {
    let (controller, _notice_rx) = SessionController::new(RemoteConfig::default());
    let err = controller.send_text("status").await.unwrap_err();
    assert!(matches!(err, AriaError::Configuration(_)));
}

#[tokio::test]
async fn send_text_after_stop_is_a_connection_error() {
    let harness = Harness::start(SessionConfig::default()).await;
    harness.controller.stop().await.unwrap();

    let err = harness.controller.send_text("status").await.unwrap_err();
    assert!(matches!(err, AriaError::Connection(_)));
}

#[tokio::test]
async fn remote_error_event_terminates_the_session() {
    let mut harness = Harness::start(SessionConfig::default()).await;

    harness.inject(SessionEvent::Remote(ServerEvent::Error {
        message: "model unavailable".into(),
    }));
    settle().await;

    assert!(!harness.controller.is_active().await);
    let err = harness.controller.wait().await.unwrap_err();
    assert!(matches!(err, AriaError::RemoteProtocol(_)));

    // The notice stream reports the failure too.
    let mut saw_stop = false;
    while let Ok(notice) = harness.notice_rx.try_recv() {
        if let SessionNotice::Stopped { error } = notice {
            assert!(error.unwrap().contains("model unavailable"));
            saw_stop = true;
        }
    }
    assert!(saw_stop);
}

#[tokio::test]
async fn connection_loss_is_a_single_terminal_fault() {
    let harness = Harness::start(SessionConfig::default()).await;

    harness.inject(SessionEvent::TransportFault(TransportFault::ConnectionLost(
        "reset by peer".into(),
    )));
    settle().await;

    assert!(!harness.controller.is_active().await);
    let err = harness.controller.wait().await.unwrap_err();
    assert!(matches!(err, AriaError::Connection(_)));
}

#[tokio::test]
async fn end_turn_drives_vad_disabled_sessions() {
    let config = SessionConfig {
        vad_enabled: false,
        ..SessionConfig::default()
    };
    let harness = Harness::start(config).await;

    harness.controller.end_turn().await.unwrap();
    settle().await;

    let sent = harness.link.sent();
    assert!(sent.iter().any(|e| matches!(e, ClientEvent::InputAudioCommit)));
    assert!(sent
        .iter()
        .any(|e| matches!(e, ClientEvent::ResponseCreate { .. })));
}

#[tokio::test]
async fn device_fault_stops_the_session() {
    let harness = Harness::start(SessionConfig::default()).await;

    harness.inject(SessionEvent::DeviceFault("mic unplugged".into()));
    settle().await;

    assert!(!harness.controller.is_active().await);
    let err = harness.controller.wait().await.unwrap_err();
    assert!(matches!(err, AriaError::Device(_)));
    // Playback was released on the way out.
    assert!(harness.ops().contains(&PlaybackOp::Close));
}
