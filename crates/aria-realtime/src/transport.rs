//! Realtime transport — one duplex WebSocket per session.
//!
//! The writer task coalesces outbound microphone audio into one
//! `input_audio_buffer.append` per flush window to bound both frame count
//! and added latency; buffered audio is always flushed before a control
//! frame goes out so a commit can never overtake the audio it commits.
//! The reader task demultiplexes inbound frames into the session's single
//! event queue and reports connection loss as exactly one terminal fault —
//! reconnecting is a fresh `start()` by the caller, never something the
//! transport does behind the session's back.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, warn};

use aria_core::config::RemoteConfig;
use aria_core::error::{AriaError, Result};
use aria_core::protocol::{ClientEvent, ServerEvent};

use crate::controller::{SessionEvent, TransportFault};

/// Bound on the connection handshake; a miss is a `ConnectionError`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Max time a captured audio chunk sits in the outbound buffer.
pub const AUDIO_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Max buffered chunks before an early flush.
pub const AUDIO_FLUSH_CHUNKS: usize = 4;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

/// Non-blocking outbound half of the session's connection.
///
/// Sends enqueue and return immediately; the event-dispatch loop is never
/// allowed to block on the socket.
pub trait OutboundLink: Send + Sync {
    /// Send a control envelope. Any audio buffered so far is flushed first.
    fn send(&self, event: ClientEvent) -> Result<()>;

    /// Buffer raw PCM16 bytes for the next `input_audio_buffer.append`.
    fn send_audio(&self, pcm: Vec<u8>) -> Result<()>;

    /// Graceful close: flush, send a close frame, then drop the socket.
    fn close(&self);
}

enum WriterCmd {
    Control(ClientEvent),
    Audio(Vec<u8>),
    Close,
}

/// Coalesces raw PCM until a flush is due.
#[derive(Default)]
struct AudioBuffer {
    bytes: Vec<u8>,
    chunks: usize,
}

impl AudioBuffer {
    /// Buffer one chunk; true when the chunk-count threshold forces an
    /// early flush.
    fn push(&mut self, pcm: &[u8]) -> bool {
        self.bytes.extend_from_slice(pcm);
        self.chunks += 1;
        self.chunks >= AUDIO_FLUSH_CHUNKS
    }

    /// Drain the buffer into one `input_audio_buffer.append` envelope.
    fn take(&mut self) -> Option<ClientEvent> {
        if self.bytes.is_empty() {
            return None;
        }
        self.chunks = 0;
        Some(ClientEvent::InputAudioAppend {
            audio: B64.encode(std::mem::take(&mut self.bytes)),
        })
    }
}

/// A live connection to the remote model.
pub struct RealtimeTransport {
    cmd_tx: mpsc::UnboundedSender<WriterCmd>,
    reader_task: JoinHandle<()>,
}

impl RealtimeTransport {
    /// Open the connection and start the reader/writer tasks. Inbound
    /// events land on `event_tx`.
    pub async fn connect(
        remote: &RemoteConfig,
        model: &str,
        api_key: &str,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let url = format!("{}?model={model}", remote.base_url.trim_end_matches('/'));
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| AriaError::Connection(format!("bad endpoint {url}: {e}")))?;

        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| AriaError::Connection(format!("bad credentials: {e}")))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request));
        let (ws, _resp) = connect
            .await
            .map_err(|_| {
                AriaError::Connection(format!(
                    "handshake did not complete within {}s",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| AriaError::Connection(format!("connect {url}: {e}")))?;

        debug!(%url, "realtime connection established");

        let (ws_tx, ws_rx) = ws.split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(writer_loop(cmd_rx, ws_tx));
        let reader_task = tokio::spawn(reader_loop(ws_rx, event_tx));

        Ok(Self { cmd_tx, reader_task })
    }
}

impl OutboundLink for RealtimeTransport {
    fn send(&self, event: ClientEvent) -> Result<()> {
        self.cmd_tx
            .send(WriterCmd::Control(event))
            .map_err(|_| AriaError::Connection("connection is closed".into()))
    }

    fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        self.cmd_tx
            .send(WriterCmd::Audio(pcm))
            .map_err(|_| AriaError::Connection("connection is closed".into()))
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(WriterCmd::Close);
        // The writer finishes the close handshake; the reader has nothing
        // left to deliver.
        self.reader_task.abort();
    }
}

async fn writer_loop(mut cmd_rx: mpsc::UnboundedReceiver<WriterCmd>, mut ws_tx: WsSink) {
    let mut buffer = AudioBuffer::default();
    let mut tick = tokio::time::interval(AUDIO_FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(WriterCmd::Audio(pcm)) => {
                    if buffer.push(&pcm) && flush_audio(&mut ws_tx, &mut buffer).await.is_err() {
                        break;
                    }
                }
                Some(WriterCmd::Control(event)) => {
                    if flush_audio(&mut ws_tx, &mut buffer).await.is_err() {
                        break;
                    }
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                Some(WriterCmd::Close) | None => {
                    let _ = flush_audio(&mut ws_tx, &mut buffer).await;
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = tick.tick() => {
                if flush_audio(&mut ws_tx, &mut buffer).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("realtime writer stopped");
}

async fn flush_audio(
    ws_tx: &mut WsSink,
    buffer: &mut AudioBuffer,
) -> std::result::Result<(), ()> {
    match buffer.take() {
        Some(event) => send_event(ws_tx, &event).await,
        None => Ok(()),
    }
}

async fn send_event(ws_tx: &mut WsSink, event: &ClientEvent) -> std::result::Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!(%e, "failed to serialize outbound event");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await.map_err(|e| {
        warn!(%e, "outbound send failed");
    })
}

async fn reader_loop(
    mut ws_rx: futures::stream::SplitStream<WsStream>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut terminal_sent = false;

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => {
                    if event_tx.send(SessionEvent::Remote(event)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    // Unrecognized *types* decode to Unknown and are fine;
                    // reaching here means the frame itself is malformed.
                    let _ = event_tx.send(SessionEvent::TransportFault(TransportFault::Protocol(
                        format!("malformed frame: {e}"),
                    )));
                    terminal_sent = true;
                    break;
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "remote closed the connection");
                let _ = event_tx.send(SessionEvent::TransportFault(TransportFault::Closed));
                terminal_sent = true;
                break;
            }
            Ok(_) => {
                // Binary/ping/pong: nothing for us, tungstenite answers pings.
            }
            Err(e) => {
                let _ = event_tx.send(SessionEvent::TransportFault(
                    TransportFault::ConnectionLost(e.to_string()),
                ));
                terminal_sent = true;
                break;
            }
        }
    }

    if !terminal_sent {
        let _ = event_tx.send(SessionEvent::TransportFault(TransportFault::Closed));
    }
    debug!("realtime reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_buffer_threshold() {
        let mut buffer = AudioBuffer::default();
        for _ in 0..AUDIO_FLUSH_CHUNKS - 1 {
            assert!(!buffer.push(&[0, 1]));
        }
        assert!(buffer.push(&[0, 1]), "reaching the chunk threshold forces a flush");
    }

    #[test]
    fn test_audio_buffer_concatenates_chunks() {
        let mut buffer = AudioBuffer::default();
        buffer.push(&[1, 2]);
        buffer.push(&[3, 4]);

        let Some(ClientEvent::InputAudioAppend { audio }) = buffer.take() else {
            panic!("expected one append envelope");
        };
        assert_eq!(B64.decode(audio).unwrap(), vec![1, 2, 3, 4]);

        assert!(buffer.take().is_none(), "drained buffer has nothing to flush");
        assert!(!buffer.push(&[5, 6]), "chunk count resets after a flush");
    }
}
