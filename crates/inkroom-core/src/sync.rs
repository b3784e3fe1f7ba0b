//! WebSocket connection to the room server.
//!
//! The connection runs on a background thread and is polled from the UI
//! thread, so pointer handling never blocks on the network. When the socket
//! drops it reconnects with exponential backoff; what to resend after a
//! reconnect is up to the caller (see [`crate::Whiteboard`]).

use crate::protocol::ServerMessage;
use std::time::Duration;
use thiserror::Error;

/// First reconnect delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Reconnect delay ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid WebSocket URL scheme: {0}")]
    Scheme(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events from the connection thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Socket (re)established
    Connected,
    /// Socket lost; a reconnect will follow unless the client disconnected
    Disconnected,
    /// Waiting before the next connection attempt
    Reconnecting { attempt: u32, delay: Duration },
    /// Decoded frame from the server
    Message(ServerMessage),
}

/// Exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt; doubles each call up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Check that a URL is a usable WebSocket endpoint.
pub fn validate_ws_url(url: &str) -> Result<url::Url, ConnectionError> {
    let parsed = url::Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConnectionError::Scheme(other.to_string())),
    }
}

/// Characters of an outgoing frame shown in debug logs.
#[cfg(not(target_arch = "wasm32"))]
const LOG_PREVIEW_CHARS: usize = 100;

/// First `max_chars` characters of `text`, cut on a character boundary.
#[cfg(not(target_arch = "wasm32"))]
fn log_preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use crate::protocol::decode_server;
    use std::net::TcpStream;
    use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;
    use tungstenite::stream::MaybeTlsStream;
    use tungstenite::{Message, WebSocket, connect};

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// Why a connected session ended.
    enum SessionEnd {
        /// The client asked to close.
        Closed,
        /// The socket failed or the server went away.
        Lost,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        state: ConnectionState,
        events: Vec<ConnectionEvent>,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<ConnectionEvent>>,
        /// Handle to the WebSocket thread.
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

        /// Connect to a WebSocket server, reconnecting with `backoff` until
        /// [`disconnect`](Self::disconnect) is called.
        pub fn connect(&mut self, url: &str, backoff: Backoff) -> Result<(), ConnectionError> {
            if self.cmd_tx.is_some() {
                return Err(ConnectionError::AlreadyConnected);
            }
            validate_ws_url(url)?;

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<ConnectionEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || run(url, backoff, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);

            Ok(())
        }

        /// Disconnect from the server and stop reconnecting.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Queue a text frame. Frames queued while the socket is down are
        /// dropped; the next join bootstraps from a snapshot anyway.
        pub fn send(&self, msg: &str) -> Result<(), ConnectionError> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(msg.to_string()))
                    .map_err(|_| ConnectionError::NotConnected),
                None => Err(ConnectionError::NotConnected),
            }
        }

        /// Poll for pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<ConnectionEvent> {
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        ConnectionEvent::Connected => self.state = ConnectionState::Connected,
                        ConnectionEvent::Disconnected | ConnectionEvent::Reconnecting { .. } => {
                            self.state = ConnectionState::Reconnecting
                        }
                        ConnectionEvent::Message(_) => {}
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

        /// Check if connected.
        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
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

    /// Connection thread body: connect, pump, back off, repeat.
    fn run(
        url: String,
        mut backoff: Backoff,
        cmd_rx: Receiver<WsCommand>,
        event_tx: Sender<ConnectionEvent>,
    ) {
        loop {
            log::info!("WebSocket thread: connecting to {}", url);
            match connect(url.as_str()) {
                Ok((mut socket, response)) => {
                    log::info!("WebSocket connected, status: {}", response.status());
                    backoff.reset();
                    configure_timeouts(&mut socket);
                    if event_tx.send(ConnectionEvent::Connected).is_err() {
                        return;
                    }
                    match pump(&mut socket, &cmd_rx, &event_tx) {
                        SessionEnd::Closed => {
                            log::info!("WebSocket thread exiting");
                            return;
                        }
                        SessionEnd::Lost => {
                            if event_tx.send(ConnectionEvent::Disconnected).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => log::warn!("WebSocket connection failed: {}", e),
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            if event_tx
                .send(ConnectionEvent::Reconnecting { attempt, delay })
                .is_err()
            {
                return;
            }
            if !wait_for_retry(&cmd_rx, delay) {
                log::info!("WebSocket thread exiting");
                return;
            }
        }
    }

    /// Short read timeout so the loop can interleave reads and writes.
    fn configure_timeouts(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) {
        match socket.get_mut() {
            MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
            }
            #[allow(unreachable_patterns)]
            _ => {
                log::debug!("TLS or other stream - using default timeout handling");
            }
        }
    }

    fn pump(
        socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
        cmd_rx: &Receiver<WsCommand>,
        event_tx: &Sender<ConnectionEvent>,
    ) -> SessionEnd {
        loop {
            // Drain commands (non-blocking)
            loop {
                match cmd_rx.try_recv() {
                    Ok(WsCommand::Send(msg)) => {
                        let preview = log_preview(&msg, LOG_PREVIEW_CHARS);
                        log::debug!("WebSocket sending: {}", preview);
                        if let Err(e) = socket.send(Message::Text(msg)) {
                            log::error!("WebSocket send error: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                    Ok(WsCommand::Close) => {
                        log::info!("WebSocket close requested");
                        let _ = socket.close(None);
                        return SessionEnd::Closed;
                    }
                    Err(TryRecvError::Disconnected) => {
                        log::info!("WebSocket command channel disconnected");
                        let _ = socket.close(None);
                        return SessionEnd::Closed;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            match socket.read() {
                Ok(Message::Text(txt)) => match decode_server(&txt) {
                    Ok(msg) => {
                        if event_tx.send(ConnectionEvent::Message(msg)).is_err() {
                            return SessionEnd::Closed;
                        }
                    }
                    Err(e) => log::warn!("Failed to parse server message: {}", e),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    return SessionEnd::Lost;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    return SessionEnd::Lost;
                }
            }
        }
    }

    /// Sleep for `delay` while still honouring a close request. Frames sent
    /// in the meantime are discarded. Returns false when the thread should
    /// exit.
    fn wait_for_retry(cmd_rx: &Receiver<WsCommand>, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match cmd_rx.recv_timeout(remaining) {
                Ok(WsCommand::Send(_)) => log::debug!("Dropping frame while disconnected"),
                Ok(WsCommand::Close) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => return true,
            }
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;
