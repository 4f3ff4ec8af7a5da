//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.
//! One background task owns the socket: it writes queued [`ClientFrame`]s,
//! decodes incoming [`ServerFrame`]s, resolves pending subscribe/unsubscribe
//! requests and forwards everything else as [`TransportEvent`]s.

use async_trait::async_trait;
use beacon_protocol::{codec, frames::parse_event_payload, ClientFrame, ServerFrame};
use bytes::BytesMut;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

use crate::traits::{
    ChannelEvent, ChannelHandle, ConnectParams, EventStream, Transport, TransportError,
    TransportEvent, TransportFault,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingRequests = Arc<DashMap<u64, oneshot::Sender<Result<(), TransportError>>>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Endpoint used when the connect call does not override it.
    pub url: String,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// How long a subscribe/unsubscribe waits for its acknowledgment.
    pub request_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            max_message_size: 64 * 1024, // 64 KB
            request_timeout: Duration::from_secs(5),
        }
    }
}

enum Outbound {
    Frame(ClientFrame),
    Close,
}

struct Session {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: PendingRequests,
    task: JoinHandle<()>,
}

/// WebSocket client transport.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    session: Mutex<Option<Session>>,
    next_request: AtomicU64,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            next_request: AtomicU64::new(0),
        }
    }

    /// Create a transport for `url` with default limits.
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    /// Send a request frame and wait for its `Ack` or `Error`.
    ///
    /// Returns the request id on success.
    async fn request(
        &self,
        make_frame: impl FnOnce(u64) -> ClientFrame,
    ) -> Result<u64, TransportError> {
        let id = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();

        let pending = {
            let session = self.session.lock();
            let Some(session) = session.as_ref() else {
                return Err(TransportError::NotConnected);
            };
            session.pending.insert(id, tx);
            session
                .outbound
                .send(Outbound::Frame(make_frame(id)))
                .map_err(|_| TransportError::ConnectionClosed)?;
            session.pending.clone()
        };

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result.map(|()| id),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                pending.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, params: ConnectParams) -> Result<EventStream, TransportError> {
        self.disconnect().await;

        let url = params.url.unwrap_or_else(|| self.config.url.clone());
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        debug!(url = %url, "WebSocket handshake completed");

        let (mut sink, source) = socket.split();
        let hello = codec::encode(&ClientFrame::connect(params.token))?;
        sink.send(Message::Binary(hello.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let pending: PendingRequests = Arc::new(DashMap::new());

        let task = tokio::spawn(run_socket(
            sink,
            source,
            outbound_rx,
            events_tx,
            pending.clone(),
            self.config.max_message_size,
        ));

        *self.session.lock() = Some(Session {
            outbound: outbound_tx,
            pending,
            task,
        });

        info!(url = %url, "WebSocket transport opened");
        Ok(events_rx)
    }

    async fn subscribe(&self, channel: &str) -> Result<ChannelHandle, TransportError> {
        let id = self
            .request(|request_id| ClientFrame::subscribe(request_id, channel))
            .await?;

        Ok(ChannelHandle {
            channel: channel.to_string(),
            id,
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.request(|request_id| ClientFrame::unsubscribe(request_id, channel))
            .await
            .map(|_| ())
    }

    async fn disconnect(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            if session.outbound.send(Outbound::Close).is_err() {
                session.task.abort();
            }
            session.pending.clear();
            debug!("WebSocket transport closed");
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.task.abort();
        }
    }
}

/// What the socket task does after handling a server frame.
#[derive(Debug, PartialEq)]
enum FrameAction {
    Continue,
    Reply(ClientFrame),
    Close(String),
}

/// Map a server frame onto events and pending requests.
fn handle_frame(
    frame: ServerFrame,
    events: &mpsc::UnboundedSender<TransportEvent>,
    pending: &DashMap<u64, oneshot::Sender<Result<(), TransportError>>>,
) -> FrameAction {
    let unauthorized = frame.is_unauthorized();
    match frame {
        ServerFrame::Connected { socket_id, .. } => {
            let _ = events.send(TransportEvent::Connected {
                socket_id: Some(socket_id),
            });
        }
        ServerFrame::Event {
            channel,
            event,
            payload,
        } => {
            trace!(channel = %channel, event = %event, "Inbound event");
            let _ = events.send(TransportEvent::Message(ChannelEvent {
                channel,
                event,
                payload: parse_event_payload(&payload),
            }));
        }
        ServerFrame::Ack { id } => {
            if let Some((_, waiter)) = pending.remove(&id) {
                let _ = waiter.send(Ok(()));
            }
        }
        ServerFrame::Error { id, code, message } => {
            if let Some((_, waiter)) = pending.remove(&id) {
                let _ = waiter.send(Err(TransportError::Rejected { code, message }));
            } else if unauthorized {
                return FrameAction::Close(format!("unauthorized: {}", message));
            } else {
                let _ = events.send(TransportEvent::Error(TransportFault::new(
                    format!("provider_{}", code),
                    message,
                    code >= 500,
                )));
            }
        }
        ServerFrame::Ping { timestamp } => return FrameAction::Reply(ClientFrame::pong(timestamp)),
        ServerFrame::Close { reason, .. } => {
            return if unauthorized {
                FrameAction::Close(format!("unauthorized: {}", reason))
            } else {
                FrameAction::Close(reason)
            };
        }
    }
    FrameAction::Continue
}

/// Bytes carried by a data message. Text is decoded like binary.
fn payload_bytes(message: &Message) -> &[u8] {
    match message {
        Message::Binary(data) => data.as_slice(),
        Message::Text(text) => text.as_bytes(),
        _ => &[],
    }
}

/// Append one inbound message to the read buffer and decode every complete
/// frame in it.
///
/// Returns the actions the socket task must carry out, in order, stopping
/// after the first `Close`.
fn ingest(
    data: &[u8],
    read_buffer: &mut BytesMut,
    max_message_size: usize,
    events: &mpsc::UnboundedSender<TransportEvent>,
    pending: &DashMap<u64, oneshot::Sender<Result<(), TransportError>>>,
) -> Vec<FrameAction> {
    if data.len() > max_message_size {
        warn!(size = data.len(), max = max_message_size, "Message too large");
        let _ = events.send(TransportEvent::Error(TransportFault::new(
            "frame_too_large",
            format!("{} bytes exceeds {}", data.len(), max_message_size),
            true,
        )));
        return Vec::new();
    }
    read_buffer.extend_from_slice(data);

    let mut actions = Vec::new();
    loop {
        match codec::decode_from::<ServerFrame>(read_buffer) {
            Ok(Some(frame)) => match handle_frame(frame, events, pending) {
                FrameAction::Continue => {}
                FrameAction::Close(reason) => {
                    actions.push(FrameAction::Close(reason));
                    break;
                }
                reply => actions.push(reply),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Undecodable frame, resetting read buffer");
                read_buffer.clear();
                let _ = events.send(TransportEvent::Error(TransportFault::new(
                    "protocol_error",
                    e.to_string(),
                    true,
                )));
                break;
            }
        }
    }
    actions
}

/// Own the socket until it closes or the transport disconnects.
async fn run_socket(
    mut sink: futures_util::stream::SplitSink<Socket, Message>,
    mut source: futures_util::stream::SplitStream<Socket>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pending: PendingRequests,
    max_message_size: usize,
) {
    let mut read_buffer = BytesMut::with_capacity(4096);

    let reason = 'socket: loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    let data = match codec::encode(&frame) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(error = %e, "Dropping unencodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                        break format!("send failed: {}", e);
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.close().await;
                    pending.clear();
                    return;
                }
            },

            incoming = source.next() => {
                let actions = match incoming {
                    Some(Ok(message @ (Message::Binary(_) | Message::Text(_)))) => ingest(
                        payload_bytes(&message),
                        &mut read_buffer,
                        max_message_size,
                        &events,
                        &pending,
                    ),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            break format!("send failed: {}", e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by provider".to_string());
                    }
                    Some(Err(WsError::ConnectionClosed)) | None => break "socket ended".to_string(),
                    Some(Err(e)) => break format!("socket error: {}", e),
                };

                for action in actions {
                    match action {
                        FrameAction::Continue => {}
                        FrameAction::Reply(reply) => {
                            if let Ok(data) = codec::encode(&reply) {
                                if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                                    break 'socket format!("send failed: {}", e);
                                }
                            }
                        }
                        FrameAction::Close(reason) => {
                            let _ = sink.close().await;
                            break 'socket reason;
                        }
                    }
                }
            }
        }
    };

    debug!(reason = %reason, "WebSocket session ended");
    pending.clear();
    let _ = events.send(TransportEvent::Disconnected { reason });
}
