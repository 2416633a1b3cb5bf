//! Relay wire protocol and the native WebSocket client.

use crate::presence::Presence;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// Sync CRDT data (base64 encoded Loro bytes)
    Sync { data: String },
    /// Presence update
    Awareness {
        peer_id: u64,
        #[serde(flatten)]
        state: Presence,
    },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        peer_count: usize,
        /// Latest sync payload of the room, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Sync data from another peer
    Sync { from: String, data: String },
    /// Presence update from another peer
    Awareness {
        from: String,
        peer_id: u64,
        #[serde(flatten)]
        state: Presence,
    },
    Error { message: String },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the WebSocket client
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    JoinedRoom {
        room: String,
        peer_count: usize,
        initial_sync: Option<Vec<u8>>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    SyncReceived { from: String, data: Vec<u8> },
    AwarenessReceived {
        from: String,
        peer_id: u64,
        state: Presence,
    },
    Error { message: String },
}

impl SyncEvent {
    /// Decode a server message. Sync payloads that are not valid base64 are dropped.
    pub fn from_server_message(msg: ServerMessage) -> Option<SyncEvent> {
        let event = match msg {
            ServerMessage::Joined {
                room,
                peer_count,
                initial_sync,
            } => SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync: initial_sync.and_then(|s| base64_decode(&s)),
            },
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Sync { from, data } => match base64_decode(&data) {
                Some(data) => SyncEvent::SyncReceived { from, data },
                None => {
                    log::warn!("Dropping sync from {} with invalid payload", from);
                    return None;
                }
            },
            ServerMessage::Awareness {
                from,
                peer_id,
                state,
            } => SyncEvent::AwarenessReceived {
                from,
                peer_id,
                state,
            },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        };
        Some(event)
    }
}

/// Base64 decoding
pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
    STANDARD.decode(input.trim()).ok()
}

/// Base64 encoding
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        state: ConnectionState,
        events: Vec<SyncEvent>,
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<SyncEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        /// Create a new disconnected WebSocket client.
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        /// Connect to a WebSocket server.
        pub fn connect(&mut self, url: &str) -> Result<(), String> {
            if self.cmd_tx.is_some() {
                return Err("Already connected".to_string());
            }

            let parsed_url = Url::parse(url).map_err(|e| format!("Invalid URL: {}", e))?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(format!("Invalid WebSocket URL scheme: {}", parsed_url.scheme()));
            }

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SyncEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || run_socket(&url, &cmd_rx, &event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        /// Disconnect from the server.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Send a text message.
        pub fn send(&self, msg: &str) -> Result<(), String> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(msg.to_string()))
                    .map_err(|e| format!("Send failed: {}", e)),
                None => Err("Not connected".to_string()),
            }
        }

        /// Serialize and send a protocol message.
        pub fn send_message(&self, msg: &ClientMessage) -> Result<(), String> {
            let json = serde_json::to_string(msg).map_err(|e| format!("Encode failed: {}", e))?;
            self.send(&json)
        }

        /// Poll for pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<SyncEvent> {
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                        _ => {}
                    }
                    self.events.push(event);
                }
            }
            std::mem::take(&mut self.events)
        }

        /// Get current connection state.
        pub fn state(&self) -> ConnectionState {
            self.state
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    fn run_socket(url: &str, cmd_rx: &Receiver<WsCommand>, event_tx: &Sender<SyncEvent>) {
        log::info!("WebSocket thread: connecting to {}", url);
        let mut socket = match connect(url) {
            Ok((socket, response)) => {
                log::info!("WebSocket connected, status: {}", response.status());
                socket
            }
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(SyncEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return;
            }
        };
        let _ = event_tx.send(SyncEvent::Connected);

        // Short read timeout so the loop can service outgoing commands.
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending {} bytes", msg.len());
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        break;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                    Ok(msg) => {
                        if let Some(event) = SyncEvent::from_server_message(msg) {
                            let _ = event_tx.send(event);
                        }
                    }
                    Err(e) => log::warn!("Failed to parse server message: {}", e),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    break;
                }
            }
        }

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(SyncEvent::Disconnected);
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }
}

pub use native_client::NativeWebSocket;
