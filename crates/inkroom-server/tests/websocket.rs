//! End-to-end tests over real sockets.
//!
//! These start the axum server on a free port and drive it with
//! tokio-tungstenite clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inkroom_core::protocol::{ClientMessage, ServerMessage, decode_server, encode};
use inkroom_core::{
    CanvasSnapshot, ClientConfig, ConnectionEvent, PointerEvent, Raster, Versions, Whiteboard,
};
use inkroom_server::{ServerConfig, run};
use kurbo::Point;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port, return its address.
async fn start_test_server(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        run(listener, config).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, name: &str) -> Socket {
    let url = format!("ws://{addr}/ws?name={name}");
    let (socket, _) = connect_async(url).await.expect("websocket connects");
    socket
}

async fn send_frames(socket: &mut Socket, frames: Vec<String>) {
    for frame in frames {
        socket.send(Message::Text(frame.into())).await.unwrap();
    }
}

async fn send(socket: &mut Socket, msg: &ClientMessage) {
    let text = encode(msg).unwrap();
    send_frames(socket, vec![text]).await;
}

/// Next server message, skipping pings.
async fn recv(socket: &mut Socket) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("message within timeout")
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            return decode_server(text.as_str()).unwrap();
        }
    }
}

/// A whiteboard wired to a real socket.
struct Client {
    board: Whiteboard,
    socket: Socket,
}

impl Client {
    async fn join(addr: SocketAddr, name: &str, room: &str) -> Self {
        let mut board = Whiteboard::new(ClientConfig::default().with_display_name(name));
        board.handle_connection_event(ConnectionEvent::Connected);
        board.join_room(room);
        let mut client = Self {
            board,
            socket: connect(addr, name).await,
        };
        client.flush().await;
        client
            .receive_until(|msg| matches!(msg, ServerMessage::Joined { .. }))
            .await;
        client
    }

    async fn flush(&mut self) {
        send_frames(&mut self.socket, self.board.take_outgoing()).await;
    }

    /// A complete stroke from `from` to `to`.
    fn draw(&mut self, from: Point, to: Point) {
        self.board.handle_pointer(PointerEvent::down(from));
        self.board.handle_pointer(PointerEvent::moved(to));
        self.board.handle_pointer(PointerEvent::Up);
    }

    /// Apply messages until one matches.
    async fn receive_until(&mut self, done: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let msg = recv(&mut self.socket).await;
            self.board.handle_server_message(msg.clone());
            if done(&msg) {
                return msg;
            }
        }
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_test_server(test_config()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    stream.write_all(request).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));
}

#[tokio::test]
async fn test_late_joiner_gets_first_clients_stroke() {
    let addr = start_test_server(test_config()).await;

    let mut a = Client::join(addr, "alice", "AB12").await;
    assert_eq!(a.board.versions(), Versions::default());
    assert!(a.board.raster().is_blank());

    a.draw(Point::new(10.0, 10.0), Point::new(50.0, 10.0));
    a.flush().await;

    // the accepted snapshot comes back to its sender too
    a.receive_until(|msg| matches!(msg, ServerMessage::CanvasSnapshot { .. }))
        .await;
    assert_eq!(a.board.versions(), Versions::new(0, 1));

    let mut b = Client::join(addr, "bob", "AB12").await;
    assert_eq!(b.board.versions(), Versions::new(0, 1));
    assert_eq!(b.board.raster(), a.board.raster());
    assert_eq!(b.board.peer_count(), 2);

    let joined = a
        .receive_until(|msg| matches!(msg, ServerMessage::PeerJoined { .. }))
        .await;
    let ServerMessage::PeerJoined { name, .. } = joined else {
        panic!("unexpected {joined:?}");
    };
    assert_eq!(name, "bob");

    // live strokes reach the earlier member
    let board = &mut b.board;
    board.handle_pointer(PointerEvent::down(Point::new(10.0, 100.0)));
    board.handle_pointer(PointerEvent::moved(Point::new(60.0, 100.0)));
    b.flush().await;
    a.receive_until(|msg| matches!(msg, ServerMessage::StrokeDelta { .. }))
        .await;
    assert_eq!(a.board.raster().pixel(30, 100), Some([0, 0, 0, 255]));
}

#[tokio::test]
async fn test_clear_relayed_and_stale_snapshot_rejected() {
    let addr = start_test_server(test_config()).await;
    let mut a = Client::join(addr, "alice", "CL34").await;
    let mut b = Client::join(addr, "bob", "CL34").await;
    a.receive_until(|msg| matches!(msg, ServerMessage::PeerJoined { .. }))
        .await;

    a.board.request_clear();
    assert!(a.board.confirm_clear());
    a.flush().await;
    let cleared = b
        .receive_until(|msg| matches!(msg, ServerMessage::ClearCanvas { .. }))
        .await;
    let ServerMessage::ClearCanvas { clear, .. } = cleared else {
        panic!("unexpected {cleared:?}");
    };
    assert_eq!(clear.generation, 1);
    assert_eq!(b.board.versions(), Versions::new(1, 0));

    // a snapshot from before the clear is fenced out
    let stale = Raster::blank(650, 450).to_data_url().unwrap();
    send(
        &mut a.socket,
        &ClientMessage::CanvasSnapshot(CanvasSnapshot {
            room_code: "CL34".to_string(),
            raster: stale,
            sequence: 1,
            generation: 0,
        }),
    )
    .await;
    // and a fresh one goes through to everyone
    a.draw(Point::new(5.0, 5.0), Point::new(40.0, 5.0));
    a.flush().await;

    let snapshot = b
        .receive_until(|msg| matches!(msg, ServerMessage::CanvasSnapshot { .. }))
        .await;
    match snapshot {
        ServerMessage::CanvasSnapshot { snapshot, .. } => {
            assert_eq!((snapshot.generation, snapshot.sequence), (1, 1));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(b.board.raster(), a.board.raster());
}

#[tokio::test]
async fn test_silent_connection_times_out() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(400),
        ..test_config()
    };
    let addr = start_test_server(config).await;

    // joins, then never reads again, so it never answers a ping
    let mut silent = connect(addr, "silent").await;
    let join = ClientMessage::JoinRoom {
        room_code: "ID56".to_string(),
    };
    send(&mut silent, &join).await;

    let mut watcher = Client::join(addr, "watcher", "ID56").await;
    let left = watcher
        .receive_until(|msg| matches!(msg, ServerMessage::PeerLeft { .. }))
        .await;
    assert!(matches!(left, ServerMessage::PeerLeft { .. }));
    assert_eq!(watcher.board.peer_count(), 1);
    drop(silent);
}

#[tokio::test]
async fn test_member_that_stops_reading_is_dropped_on_overflow() {
    let config = ServerConfig {
        queue_capacity: 4,
        overflow_timeout: Duration::from_millis(500),
        ..test_config()
    };
    let addr = start_test_server(config).await;
    let join = ClientMessage::JoinRoom {
        room_code: "OV78".to_string(),
    };

    // the busy member drains its socket on its own task and reports
    // everything but snapshots, which are skipped undecoded
    let (mut noisy_tx, mut noisy_rx) = connect(addr, "noisy").await.split();
    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(Ok(frame)) = noisy_rx.next().await {
            if let Message::Text(text) = frame {
                if !text.as_str().starts_with(r#"{"type":"canvas-snapshot""#) {
                    let _ = events_tx.send(decode_server(text.as_str()).unwrap());
                }
            }
        }
    });
    noisy_tx
        .send(Message::Text(encode(&join).unwrap().into()))
        .await
        .unwrap();
    let joined = timeout(Duration::from_secs(3), events.recv())
        .await
        .unwrap();
    assert!(matches!(joined, Some(ServerMessage::Joined { .. })));

    // joins, then never reads again
    let mut stuck = connect(addr, "stuck").await;
    send(&mut stuck, &join).await;
    let stuck_id = match timeout(Duration::from_secs(3), events.recv()).await {
        Ok(Some(ServerMessage::PeerJoined { peer_id, name })) if name == "stuck" => peer_id,
        other => panic!("unexpected {other:?}"),
    };

    // megabyte snapshots back up the stuck member's socket and queue
    let raster = format!("data:image/png;base64,{}", "A".repeat(1 << 20));
    for sequence in 1..=48 {
        let snapshot = CanvasSnapshot {
            room_code: "OV78".to_string(),
            raster: raster.clone(),
            sequence,
            generation: 0,
        };
        let frame = encode(&ClientMessage::CanvasSnapshot(snapshot)).unwrap();
        noisy_tx.send(Message::Text(frame.into())).await.unwrap();
    }

    let left = timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(ServerMessage::PeerLeft { peer_id }) if peer_id == stuck_id => return true,
                Some(_) => {}
                None => return false,
            }
        }
    })
    .await
    .expect("stuck member released within timeout");
    assert!(left);

    // the busy member itself kept up and is still in the room
    let mut late = connect(addr, "late").await;
    send(&mut late, &join).await;
    match recv(&mut late).await {
        ServerMessage::Joined {
            peer_count,
            sequence,
            ..
        } => {
            assert_eq!(peer_count, 2);
            assert_eq!(sequence, 48);
        }
        other => panic!("unexpected {other:?}"),
    }
    drop(stuck);
}
