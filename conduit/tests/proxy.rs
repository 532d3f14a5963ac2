//! End-to-end tests: a real client and a real upstream server talking
//! through the proxy over loopback sockets, using the protocol crate's own
//! codecs on both ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use conduit::net::{Endpoint, ProxyServer};
use conduit::plugin::{Plugin, PluginHandler};
use conduit_protocol::frame_reader::FrameDecoder;
use conduit_protocol::frame_writer::FrameEncoder;
use conduit_protocol::packet::PacketValue;
use conduit_protocol::registry::{Direction, ProtocolState, base_protocol};
use conduit_protocol::stream::StreamContext;
use conduit_protocol::value::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;

/// A raw protocol speaker: the test client or the fake upstream server.
struct Peer {
    stream: TcpStream,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    input: StreamContext,
    output: StreamContext,
}

impl Peer {
    fn new(stream: TcpStream, input_direction: Direction) -> Self {
        let (input, output) = StreamContext::pair(base_protocol(), input_direction);
        Self {
            stream,
            decoder: FrameDecoder::new(),
            encoder: FrameEncoder::new(),
            input,
            output,
        }
    }

    async fn send(&mut self, name: &str, entries: Vec<(&'static str, Value)>) {
        let ty = self
            .output
            .version()
            .packet(self.output.direction(), self.output.state(), name)
            .unwrap_or_else(|| panic!("no packet {name} for {:?}", self.output.state()));
        let packet = ty.make(entries).expect("make packet");
        let payload = packet.emit().expect("emit packet");
        self.encoder
            .send(
                &mut self.stream,
                &payload,
                self.output.compression_threshold(),
            )
            .await
            .expect("send frame");
        self.encoder
            .flush(&mut self.stream)
            .await
            .expect("flush frame");
        if let Some(change) = self.output.handle_packet(&packet) {
            self.output.apply(&change);
        }
    }

    async fn recv(&mut self) -> Option<PacketValue> {
        loop {
            if let Some(body) = self
                .decoder
                .next_frame(self.input.compression_threshold())
                .expect("frame")
            {
                let packet = self.input.read_packet(body).expect("packet");
                if let Some(change) = self.input.handle_packet(&packet) {
                    self.input.apply(&change);
                }
                return Some(packet);
            }
            let n = self
                .decoder
                .recv_from(&mut self.stream)
                .await
                .expect("recv");
            if n == 0 {
                return None;
            }
        }
    }
}

async fn recv(peer: &mut Peer) -> Option<PacketValue> {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("timed out waiting for a packet")
}

fn handshake_fields(next_state: i32) -> Vec<(&'static str, Value)> {
    vec![
        ("protocol_version", Value::VarInt(47)),
        ("server_address", Value::from("localhost")),
        ("server_port", Value::UShort(25565)),
        ("next_state", Value::VarInt(next_state)),
    ]
}

/// Starts a proxy in front of a fresh upstream listener and connects one
/// client through it.
async fn start_proxied_session(
    plugins: Vec<Box<dyn Plugin>>,
) -> (Peer, Peer) {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream_addr = upstream_listener.local_addr().expect("upstream addr");

    let proxy = ProxyServer::bind(
        "127.0.0.1:0".parse().expect("addr"),
        "127.0.0.1",
        upstream_addr.port(),
    )
    .await
    .expect("bind proxy")
    .with_plugins(plugins);
    let proxy_addr = proxy.local_addr().expect("proxy addr");
    tokio::spawn(proxy.run());

    let client_stream = TcpStream::connect(proxy_addr).await.expect("connect");
    let client = Peer::new(client_stream, Direction::ClientBound);

    let (upstream_stream, _) = tokio::time::timeout(Duration::from_secs(5), upstream_listener.accept())
        .await
        .expect("timed out waiting for the proxy")
        .expect("accept upstream");
    let server = Peer::new(upstream_stream, Direction::ServerBound);

    (client, server)
}

#[tokio::test]
async fn test_handshake_reaches_login_on_both_legs() {
    let (mut client, mut server) = start_proxied_session(Vec::new()).await;

    client.send("Handshake", handshake_fields(2)).await;
    client
        .send("LoginStart", vec![("username", Value::from("steve"))])
        .await;

    let handshake = recv(&mut server).await.expect("handshake");
    assert_eq!(handshake.name(), "Handshake");
    assert_eq!(handshake.root().int("next_state"), Some(2));
    assert_eq!(server.input.state(), ProtocolState::Login);

    // The client's second packet parsed against the login table, not the
    // handshake table.
    let login_start = recv(&mut server).await.expect("login start");
    assert_eq!(login_start.name(), "LoginStart");
    assert_eq!(login_start.root().string("username"), Some("steve"));
}

#[tokio::test]
async fn test_compression_and_login_success_transition() {
    let (mut client, mut server) = start_proxied_session(Vec::new()).await;

    client.send("Handshake", handshake_fields(2)).await;
    client
        .send("LoginStart", vec![("username", Value::from("steve"))])
        .await;
    recv(&mut server).await.expect("handshake");
    recv(&mut server).await.expect("login start");

    server
        .send("SetCompression", vec![("threshold", Value::VarInt(64))])
        .await;
    server
        .send(
            "LoginSuccess",
            vec![
                ("uuid", Value::from("11111111-2222-3333-4444-555555555555")),
                ("username", Value::from("steve")),
            ],
        )
        .await;
    // Larger than the threshold, so this one travels zlib-compressed.
    server
        .send(
            "JoinGame",
            vec![
                ("entity_id", Value::Int(7)),
                ("gamemode", Value::UByte(1)),
                ("dimension", Value::Byte(0)),
                ("difficulty", Value::UByte(2)),
                ("max_players", Value::UByte(20)),
                ("level_type", Value::from("default".repeat(20).as_str())),
                ("reduced_debug_info", Value::Bool(false)),
            ],
        )
        .await;

    let set_compression = recv(&mut client).await.expect("set compression");
    assert_eq!(set_compression.name(), "SetCompression");
    assert_eq!(client.input.compression_threshold(), Some(64));

    let login_success = recv(&mut client).await.expect("login success");
    assert_eq!(login_success.name(), "LoginSuccess");
    assert_eq!(login_success.root().string("username"), Some("steve"));
    // Both halves of the client pair are in play now.
    assert_eq!(client.input.state(), ProtocolState::Play);
    assert_eq!(client.output.state(), ProtocolState::Play);

    // JoinGame parses against the play table.
    let join_game = recv(&mut client).await.expect("join game");
    assert_eq!(join_game.name(), "JoinGame");
    assert_eq!(join_game.root().int("entity_id"), Some(7));
    assert_eq!(
        join_game.root().string("level_type"),
        Some("default".repeat(20).as_str())
    );

    // The upstream leg compresses too: a large server-bound packet decodes
    // upstream after the threshold is in force.
    client
        .send(
            "ChatMessage",
            vec![("message", Value::from("x".repeat(200).as_str()))],
        )
        .await;
    let chat = recv(&mut server).await.expect("chat");
    assert_eq!(chat.root().string("message"), Some("x".repeat(200).as_str()));
}

#[tokio::test]
async fn test_eof_cascades_to_the_client() {
    let (mut client, mut server) = start_proxied_session(Vec::new()).await;

    client.send("Handshake", handshake_fields(2)).await;
    client
        .send("LoginStart", vec![("username", Value::from("steve"))])
        .await;
    recv(&mut server).await.expect("handshake");
    recv(&mut server).await.expect("login start");
    server
        .send(
            "LoginSuccess",
            vec![
                ("uuid", Value::from("11111111-2222-3333-4444-555555555555")),
                ("username", Value::from("steve")),
            ],
        )
        .await;
    recv(&mut client).await.expect("login success");

    // Closing the upstream socket cascades: the client leg receives a
    // terminal Disconnect naming the server, then EOF.
    drop(server);
    let disconnect = recv(&mut client).await.expect("disconnect packet");
    assert_eq!(disconnect.name(), "Disconnect");
    assert_eq!(
        disconnect.root().get("reason"),
        Some(&Value::Json(serde_json::json!({"text": "Server disconnected"})))
    );
    assert!(recv(&mut client).await.is_none());
}

struct DropChatPlugin {
    dropped: Arc<AtomicUsize>,
}

impl Plugin for DropChatPlugin {
    fn name(&self) -> &'static str {
        "drop_chat"
    }

    fn handlers(&self) -> Vec<PluginHandler> {
        let dropped = Arc::clone(&self.dropped);
        vec![PluginHandler {
            direction: Direction::ServerBound,
            state: ProtocolState::Play,
            packet: "ChatMessage",
            handler: Arc::new(move |_, packet| {
                if packet.root().string("message") == Some("!drop") {
                    dropped.fetch_add(1, Ordering::SeqCst);
                    return Ok(true);
                }
                Ok(false)
            }),
        }]
    }
}

#[tokio::test]
async fn test_plugin_consumes_packet_and_order_is_preserved() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let plugin = DropChatPlugin {
        dropped: Arc::clone(&dropped),
    };
    let (mut client, mut server) = start_proxied_session(vec![Box::new(plugin)]).await;

    client.send("Handshake", handshake_fields(2)).await;
    client
        .send("LoginStart", vec![("username", Value::from("steve"))])
        .await;
    recv(&mut server).await.expect("handshake");
    recv(&mut server).await.expect("login start");
    server
        .send(
            "LoginSuccess",
            vec![
                ("uuid", Value::from("11111111-2222-3333-4444-555555555555")),
                ("username", Value::from("steve")),
            ],
        )
        .await;
    recv(&mut client).await.expect("login success");

    client
        .send("ChatMessage", vec![("message", Value::from("before"))])
        .await;
    client
        .send("ChatMessage", vec![("message", Value::from("!drop"))])
        .await;
    client
        .send("ChatMessage", vec![("message", Value::from("after"))])
        .await;

    // The consumed packet never reaches the server; the packets around it
    // arrive in order.
    let first = recv(&mut server).await.expect("first chat");
    assert_eq!(first.root().string("message"), Some("before"));
    let second = recv(&mut server).await.expect("second chat");
    assert_eq!(second.root().string("message"), Some("after"));
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wait_for_packet_times_out_and_matches() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let client_stream = TcpStream::connect(addr).await.expect("connect");
    let (peer_stream, peer_addr) = listener.accept().await.expect("accept");

    let (endpoint, driver) = Endpoint::new(
        peer_stream,
        peer_addr,
        Direction::ServerBound,
        base_protocol(),
        "client",
    );
    let tracker = TaskTracker::new();
    endpoint.spawn(driver, &tracker);

    let mut player = Peer::new(client_stream, Direction::ClientBound);
    let handshake_ty = base_protocol()
        .packet(Direction::ServerBound, ProtocolState::Handshake, "Handshake")
        .expect("type");

    // Nothing inbound: the wait times out without closing the endpoint.
    let packet = endpoint
        .wait_for_packet(&[handshake_ty], Duration::from_millis(50))
        .await;
    assert!(packet.is_none());
    assert!(endpoint.is_connected());

    let handshake_ty_filter = [handshake_ty];
    let (packet, ()) = tokio::join!(
        endpoint.wait_for_packet(&handshake_ty_filter, Duration::from_secs(5)),
        player.send("Handshake", handshake_fields(1)),
    );
    let packet = packet.expect("handshake observed");
    assert_eq!(packet.name(), "Handshake");
    assert_eq!(packet.root().int("next_state"), Some(1));

    // Close is idempotent and keeps the first reason.
    endpoint.close("first reason");
    endpoint.close("second reason");
    assert_eq!(endpoint.disconnect_reason(), Some("first reason"));
}
