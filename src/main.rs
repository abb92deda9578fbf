//! Binary entry point: loads config, wires the connection handler's
//! callbacks up to a per-connection `Client`, and serves until interrupted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use blocknet::{Aes128Cfb8Cipher, Callbacks, Client, Config, ConnectionHandler, ConnectionId, Packet};

type GameClient = Client<Aes128Cfb8Cipher>;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_owned());
    let config = Config::from_file(&config_path).unwrap_or_else(|e| {
        log::warn!("failed to load {config_path}: {e}, falling back to defaults");
        Config::default()
    });

    let clients: Arc<Mutex<HashMap<ConnectionId, Arc<GameClient>>>> = Arc::new(Mutex::new(HashMap::new()));
    let protocol_analysis = config.general.protocol_analysis;

    let connect_clients = clients.clone();
    let receive_clients = clients.clone();
    let disconnect_clients = clients.clone();

    let callbacks = Callbacks {
        connect: Box::new(move |conn| {
            let client = Arc::new(GameClient::with_protocol_analysis(conn.clone(), protocol_analysis));
            connect_clients.lock().insert(conn.id(), client);
        }),
        receive: Box::new(move |conn, buf| {
            let client = receive_clients.lock().get(&conn.id()).cloned();
            let Some(client) = client else { return };
            let incoming = buf.split().freeze();
            match client.receive(&incoming) {
                Ok(packets) => {
                    for packet in packets {
                        handle_packet(&client, packet);
                    }
                }
                Err(e) => {
                    log::warn!("{}:{} sent a malformed packet: {e}", conn.ip(), conn.port());
                    client.disconnect_with_reason(e.to_string());
                }
            }
        }),
        disconnect: Box::new(move |conn, reason| {
            disconnect_clients.lock().remove(&conn.id());
            log::info!("{}:{} disconnected: {reason:?}", conn.ip(), conn.port());
        }),
        ..Callbacks::default()
    };

    let handler = ConnectionHandler::new(callbacks);
    let addr = config.addr().parse().expect("invalid host/port in config");
    let bound = handler.listen(addr).await?;
    log::info!("listening on {bound}");

    tokio::signal::ctrl_c().await?;
    log::info!("received interrupt, shutting down");
    handler.shutdown_all();

    Ok(())
}

/// The only packet this crate currently handles on receipt: the handshake,
/// which just advances the client's protocol state. A real game server
/// would dispatch the rest of the Login/Play packet set from here.
fn handle_packet(client: &Arc<GameClient>, packet: Packet) {
    if let Packet::Handshake(handshake) = packet {
        log::info!(
            "{}:{} handshake: protocol {} -> {:?}",
            client.ip(),
            client.port(),
            handshake.protocol_version.0,
            handshake.next_state
        );
        client.set_state(handshake.next_state);
    }
}
