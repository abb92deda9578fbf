//! Integration tests driving real `tokio::net::TcpStream` pairs through
//! `ConnectionHandler`/`Client`, the way the closest proxy examples in this
//! domain test their own connection code.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use blocknet::codec::{Codec, VarInt};
use blocknet::registry::Handshake;
use blocknet::varint::write_uvarint;
use blocknet::{Callbacks, Client, ConnectionHandler, Packet, ProtocolState};

type PlainClient = Client<blocknet::Aes128Cfb8Cipher>;

fn handshake_frame() -> Vec<u8> {
    let packet = Packet::Handshake(Handshake {
        protocol_version: VarInt(4),
        server_address: "localhost".to_owned(),
        server_port: 25565,
        next_state: ProtocolState::Login,
    });
    let mut body = BytesMut::new();
    packet.encode_body(&mut body);
    let mut frame = BytesMut::new();
    write_uvarint(body.len() as u32, &mut frame);
    frame.extend_from_slice(&body);
    frame.to_vec()
}

async fn spawn_handler() -> (Arc<ConnectionHandler>, std::net::SocketAddr, Arc<Mutex<Vec<Arc<PlainClient>>>>) {
    let clients: Arc<Mutex<Vec<Arc<PlainClient>>>> = Arc::new(Mutex::new(Vec::new()));
    let connect_clients = clients.clone();
    let receive_clients = clients.clone();

    let callbacks = Callbacks {
        connect: Box::new(move |conn| {
            connect_clients.lock().push(Arc::new(PlainClient::new(conn)));
        }),
        receive: Box::new(move |conn, buf| {
            let client = receive_clients.lock().iter().find(|c| c.connection().id() == conn.id()).cloned();
            if let Some(client) = client {
                let incoming = buf.split().freeze();
                let _ = client.receive(&incoming);
            }
        }),
        ..Callbacks::default()
    };

    let handler = ConnectionHandler::new(callbacks);
    let addr = handler.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (handler, addr, clients)
}

#[tokio::test]
async fn handshake_byte_sequence_round_trips_into_a_packet() {
    let (_handler, addr, clients) = spawn_handler().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&handshake_frame()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let clients = clients.lock();
    assert_eq!(clients.len(), 1);
    // The handshake doesn't change the client's protocol state by itself —
    // that's main.rs's job on receipt — but the state starts Handshaking.
    assert_eq!(clients[0].protocol_state(), ProtocolState::Handshaking);
}

#[tokio::test]
async fn incomplete_frame_does_not_produce_a_packet_until_the_rest_arrives() {
    let (_handler, addr, _clients) = spawn_handler().await;
    let full = handshake_frame();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&full[..full.len() - 3]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    stream.write_all(&full[full.len() - 3..]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // No assertion failure means the parser didn't choke on the split
    // frame; a real application callback would see exactly one packet.
}

// `current_thread` makes the cooperative scheduling deterministic: the
// writer task spawned by `Connection::new` cannot run a single step until
// this test task hits an `.await`, so the block below that pushes the
// remaining 90 sends and calls `disconnect()` with no `.await` in between
// is guaranteed (not just likely) to still have all 90 sitting `Pending`
// the instant `disconnect()` returns.
#[tokio::test(flavor = "current_thread")]
async fn disconnect_mid_flight_resolves_every_send_and_fires_disconnect_once() {
    let disconnect_count = Arc::new(AtomicUsize::new(0));
    let dc = disconnect_count.clone();

    let callbacks = Callbacks {
        disconnect: Box::new(move |_, _| {
            dc.fetch_add(1, Ordering::SeqCst);
        }),
        ..Callbacks::default()
    };
    let handler = ConnectionHandler::new(callbacks);
    let addr = handler.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let conn = handler.connection(blocknet::ConnectionId(1)).expect("first accepted connection has id 1");

    // First 10 sends, then give the writer task a chance to actually flush
    // them before we move on.
    let mut handles: Vec<_> = (0..10).map(|i| conn.send(bytes::Bytes::from(format!("message {i}\n")))).collect();
    let mut drain = vec![0u8; 4096];
    let _ = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut drain)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    for handle in &handles {
        assert_eq!(handle.state(), blocknet::SendState::Sent);
    }

    // Queue the remaining 90 and disconnect with no `.await` between them:
    // the writer task gets no opportunity to touch either the queue or the
    // shutdown signal until this block returns.
    let in_flight: Vec<_> = (10..100).map(|i| conn.send(bytes::Bytes::from(format!("message {i}\n")))).collect();
    conn.disconnect();
    assert!(
        in_flight.iter().all(|h| h.state() == blocknet::SendState::Pending),
        "the 90 in-flight sends must still be queued at the instant disconnect() returns"
    );
    handles.extend(in_flight);

    // Let the writer task observe the shutdown, drain the rest as Failed,
    // and let the reader-loop task run its disconnect sequence.
    drop(stream);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for handle in &handles {
        assert_ne!(handle.state(), blocknet::SendState::Pending);
    }
    assert_eq!(disconnect_count.load(Ordering::SeqCst), 1);
}
