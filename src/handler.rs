//! The connection handler: binds listeners, accepts sockets, and drives one
//! reader loop per connection, handing off to application callbacks.
//!
//! The original's completion-port/epoll split and worker-thread pool are
//! both subsumed by tokio's own reactor and task scheduler; this handler
//! just owns the bookkeeping (the connection map, id allocation) and the
//! six callback hooks (`accept`, `connect`, `disconnect`, `receive`, plus
//! logging and panics, which lean on the `log` crate and `JoinHandle`
//! errors respectively instead of being separate callback slots).

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};

use crate::connection::{Connection, ConnectionId};
use crate::registry;

/// Floor for the per-connection receive buffer. The registry's own largest
/// known fixed-size packet field (see `registry::max_known_field_size`) is
/// usually much smaller than this; the floor just avoids a string of tiny
/// reallocations for the common case of several small packets queued back
/// to back.
const MIN_RECV_CAPACITY: usize = 4096;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked with a non-string payload".to_owned()
    }
}

type AcceptCallback = dyn Fn(SocketAddr) -> bool + Send + Sync;
type ConnectCallback = dyn Fn(Arc<Connection>) + Send + Sync;
type DisconnectCallback = dyn Fn(Arc<Connection>, Option<String>) + Send + Sync;
type ReceiveCallback = dyn Fn(Arc<Connection>, &mut BytesMut) + Send + Sync;
type PanicCallback = dyn Fn(ConnectionId, String) + Send + Sync;

/// The set of hooks a caller wires up to react to connection lifecycle
/// events. All of them run on the ambient tokio executor; none may block.
pub struct Callbacks {
    pub accept: Box<AcceptCallback>,
    pub connect: Box<ConnectCallback>,
    pub disconnect: Box<DisconnectCallback>,
    pub receive: Box<ReceiveCallback>,
    pub panic: Box<PanicCallback>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Callbacks {
            accept: Box::new(|_| true),
            connect: Box::new(|_| {}),
            disconnect: Box::new(|_, _| {}),
            receive: Box::new(|_, _| {}),
            panic: Box::new(|id, msg| log::error!("connection {id:?} panicked: {msg}")),
        }
    }
}

/// Owns every live connection and the listeners feeding it new ones.
pub struct ConnectionHandler {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    callbacks: Callbacks,
}

impl ConnectionHandler {
    pub fn new(callbacks: Callbacks) -> Arc<Self> {
        Arc::new(ConnectionHandler {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            callbacks,
        })
    }

    /// Binds `addr` and spawns the accept loop. Returns once the listener
    /// is bound; the loop itself runs on a background task for as long as
    /// `self` stays alive.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let handler = self.clone();
        tokio::spawn(async move { handler.accept_loop(listener).await });
        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    continue;
                }
            };
            let accepted = match panic::catch_unwind(AssertUnwindSafe(|| (self.callbacks.accept)(peer_addr))) {
                Ok(accepted) => accepted,
                Err(payload) => {
                    log::error!("accept callback panicked for {peer_addr}: {}", panic_message(payload));
                    false
                }
            };
            if !accepted {
                continue;
            }
            self.clone().spawn_connection(stream, peer_addr);
        }
    }

    fn spawn_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (conn, read_half, writer) = Connection::new(id, peer_addr, stream);

        self.connections.lock().insert(id, conn.clone());
        log::info!("connection {id:?} from {peer_addr} accepted");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.callbacks.connect)(conn.clone()))) {
            (self.callbacks.panic)(id, panic_message(payload));
        }

        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;

            let mut read_half = read_half;
            // Size the buffer off the registry's own bound instead of a
            // bare guess, per the table's documented purpose.
            let initial_capacity = MIN_RECV_CAPACITY.max(registry::max_known_field_size() + 16);
            let mut buf = BytesMut::with_capacity(initial_capacity);

            loop {
                match read_half.read_buf(&mut buf).await {
                    Ok(0) => break, // graceful EOF
                    Ok(n) => {
                        conn.note_received(n as u64);
                        // At most one receive callback in flight: the loop
                        // doesn't read again until this returns. A panic
                        // inside it is caught so it can't orphan the
                        // connection without ever running the disconnect
                        // sequence below.
                        let conn2 = conn.clone();
                        if let Err(payload) =
                            panic::catch_unwind(AssertUnwindSafe(|| (self.callbacks.receive)(conn2, &mut buf)))
                        {
                            (self.callbacks.panic)(id, panic_message(payload));
                        }
                    }
                    Err(e) => {
                        conn.disconnect_with_reason(format!("read error: {e}"));
                        break;
                    }
                }
            }
            conn.disconnect();

            if let Err(join_err) = writer.await {
                (self.callbacks.panic)(id, join_err.to_string());
            }

            let reason = conn.disconnect_reason();
            self.connections.lock().remove(&id);
            log::info!("connection {id:?} from {peer_addr} disconnected: {reason:?}");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.callbacks.disconnect)(conn, reason))) {
                (self.callbacks.panic)(id, panic_message(payload));
            }
        });
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Disconnects every live connection. Each one still runs its normal
    /// shutdown sequence and fires its own disconnect callback; this just
    /// triggers it for all of them instead of waiting for a peer to hang up.
    pub fn shutdown_all(&self) {
        for conn in self.connections.lock().values() {
            conn.disconnect_with_reason("server shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn accept_connect_disconnect_fire_in_order() {
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        let c2 = connected.clone();
        let d2 = disconnected.clone();

        let callbacks = Callbacks {
            connect: Box::new(move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
            disconnect: Box::new(move |_, _| {
                d2.fetch_add(1, Ordering::SeqCst);
            }),
            ..Callbacks::default()
        };
        let handler = ConnectionHandler::new(callbacks);
        let addr = handler.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        // Give the accept loop a moment to register the connection.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(connected.load(Ordering::SeqCst), 1);

        client.shutdown().await.unwrap();
        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(handler.connection_count(), 0);
    }

    #[tokio::test]
    async fn accept_callback_can_reject_a_connection() {
        let callbacks = Callbacks { accept: Box::new(|_| false), ..Callbacks::default() };
        let handler = ConnectionHandler::new(callbacks);
        let addr = handler.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(handler.connection_count(), 0);
    }

    #[tokio::test]
    async fn a_panicking_receive_callback_does_not_orphan_the_connection() {
        let disconnected = Arc::new(AtomicUsize::new(0));
        let d2 = disconnected.clone();

        let callbacks = Callbacks {
            receive: Box::new(|_, _| panic!("boom")),
            disconnect: Box::new(move |_, _| {
                d2.fetch_add(1, Ordering::SeqCst);
            }),
            ..Callbacks::default()
        };
        let handler = ConnectionHandler::new(callbacks);
        let addr = handler.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        client.shutdown().await.unwrap();
        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(handler.connection_count(), 0);
    }

    #[tokio::test]
    async fn a_panicking_accept_callback_does_not_kill_the_accept_loop() {
        let accepted = Arc::new(AtomicUsize::new(0));
        let a2 = accepted.clone();

        let callbacks = Callbacks {
            accept: Box::new(move |_| {
                if a2.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first connection is cursed");
                }
                true
            }),
            ..Callbacks::default()
        };
        let handler = ConnectionHandler::new(callbacks);
        let addr = handler.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _second = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The accept loop survived the first callback's panic and kept
        // accepting: only the second connection was actually admitted.
        assert_eq!(handler.connection_count(), 1);
    }
}
