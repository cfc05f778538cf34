//! Websocket connection to the hosted bidirectional endpoint

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::AppConfig;
use crate::connection::{ConnectionEvent, ConnectionHandle, Connector, OutboundMessage};
use crate::error::ConnectionError;
use crate::protocol::{ClientMessage, ServerMessage, Setup};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket sessions using the injected configuration
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    config: Arc<AppConfig>,
}

impl GeminiConnector {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    /// Endpoint URL with the credential attached
    pub fn request_url(&self) -> Result<String, ConnectionError> {
        let endpoint = self.config.api.endpoint.trim();
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            return Err(ConnectionError::InvalidUrl(endpoint.to_string()));
        }
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}key={}", endpoint, separator, self.config.api.api_key))
    }
}

impl Connector for GeminiConnector {
    fn open(
        &self,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let url = self.request_url()?;
        let setup = ClientMessage::Setup(Setup::from_config(&self.config)).to_json()?;
        let setup_timeout = Duration::from_secs(self.config.session.setup_timeout_secs);

        let (outbound_tx, outbound_rx) =
            mpsc::channel(self.config.session.outbound_queue_frames.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!("Connecting to {}", self.config.api.endpoint);
        let task = tokio::spawn(run_connection(
            url,
            setup,
            setup_timeout,
            outbound_rx,
            shutdown_rx,
            events,
        ));

        Ok(ConnectionHandle::new(outbound_tx, shutdown_tx, Some(task)))
    }
}

/// Connect, send setup, and wait for the server to acknowledge it
async fn connect_and_setup(
    url: &str,
    setup: String,
    setup_timeout: Duration,
) -> Result<Socket, ConnectionError> {
    let (mut socket, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;

    socket
        .send(Message::Text(setup))
        .await
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

    let outcome = tokio::time::timeout(setup_timeout, wait_for_setup(&mut socket)).await;
    match outcome {
        Ok(Ok(())) => Ok(socket),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ConnectionError::Handshake(format!(
            "no setup acknowledgement within {}s",
            setup_timeout.as_secs()
        ))),
    }
}

async fn wait_for_setup(socket: &mut Socket) -> Result<(), ConnectionError> {
    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        match frame_text(frame) {
            FrameText::Text(text) => {
                if ServerMessage::parse(&text)?.is_setup_complete() {
                    return Ok(());
                }
            }
            FrameText::Close(reason) => {
                return Err(ConnectionError::Handshake(
                    reason.unwrap_or_else(|| "closed during setup".to_string()),
                ))
            }
            FrameText::Other => {}
        }
    }
    Err(ConnectionError::Closed)
}

enum FrameText {
    Text(String),
    Close(Option<String>),
    Other,
}

// The endpoint sends JSON in both text and binary frames.
fn frame_text(frame: Message) -> FrameText {
    match frame {
        Message::Text(text) => FrameText::Text(text),
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => FrameText::Text(text),
            Err(_) => FrameText::Other,
        },
        Message::Close(frame) => FrameText::Close(frame.map(|f| f.reason.to_string())),
        _ => FrameText::Other,
    }
}

async fn run_connection(
    url: String,
    setup: String,
    setup_timeout: Duration,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let socket = tokio::select! {
        biased;
        _ = &mut shutdown => {
            tracing::debug!("Connection cancelled before it opened");
            return;
        }
        result = connect_and_setup(&url, setup, setup_timeout) => result,
    };

    let socket = match socket {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("Connection failed: {}", e);
            let _ = events.send(ConnectionEvent::Error(e));
            return;
        }
    };

    tracing::info!("Connection open");
    let _ = events.send(ConnectionEvent::Open);

    let (mut write, mut read) = socket.split();
    let mut frames_sent: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                tracing::info!("Connection closed locally after {} frames", frames_sent);
                let _ = events.send(ConnectionEvent::Closed { reason: Some("closed locally".to_string()) });
                break;
            }
            message = outbound.recv() => {
                let Some(OutboundMessage::Audio(chunk)) = message else {
                    let _ = write.close().await;
                    break;
                };
                let text = match ClientMessage::audio(&chunk).to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Dropping unserializable frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("Send failed: {}", e);
                    let _ = events.send(ConnectionEvent::Error(ConnectionError::SendFailed(e.to_string())));
                    break;
                }
                frames_sent += 1;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(frame)) => match frame_text(frame) {
                        FrameText::Text(text) => match ServerMessage::parse(&text) {
                            Ok(msg) => {
                                if let Some(go_away) = &msg.go_away {
                                    tracing::warn!(
                                        "Server will close the connection (time left: {})",
                                        go_away.time_left.as_deref().unwrap_or("unknown")
                                    );
                                }
                                let _ = events.send(ConnectionEvent::Message(msg));
                            }
                            Err(e) => tracing::warn!("Ignoring unparseable server message: {}", e),
                        },
                        FrameText::Close(reason) => {
                            tracing::info!("Connection closed by server: {}", reason.as_deref().unwrap_or(""));
                            let _ = events.send(ConnectionEvent::Closed { reason });
                            break;
                        }
                        FrameText::Other => {}
                    },
                    Some(Err(e)) => {
                        tracing::error!("Connection error: {}", e);
                        let _ = events.send(ConnectionEvent::Error(ConnectionError::Protocol(e.to_string())));
                        break;
                    }
                    None => {
                        let _ = events.send(ConnectionEvent::Closed { reason: None });
                        break;
                    }
                }
            }
        }
    }
}
