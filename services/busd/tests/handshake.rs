//! Handshake and connection lifecycle behavior.

use bus_client::{BusClient, ClientError};
use bus_protocol::{Args, Value, msg};
use busd::{Bus, BusServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const QUIET: Duration = Duration::from_millis(300);

async fn start_bus() -> (Arc<Bus>, SocketAddr, BusServer) {
    let bus = Arc::new(Bus::new(None));
    let server = BusServer::start(Arc::clone(&bus), "127.0.0.1:0")
        .await
        .unwrap();
    let addr = server.local_addr();
    (bus, addr, server)
}

#[tokio::test]
async fn server_greets_with_assigned_id() {
    let (_bus, addr, _server) = start_bus().await;
    let mut a = BusClient::connect(addr).await.unwrap();
    let id = a.identify("botA", false).await.unwrap();
    assert_eq!(id, "0");
    assert_eq!(a.client_id(), Some("0"));
}

#[tokio::test]
async fn join_is_broadcast_to_others_not_to_self() {
    let (_bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    a.identify("botA", false).await.unwrap();

    let mut b = BusClient::connect(addr).await.unwrap();
    b.identify("botB", false).await.unwrap();

    let (message_id, args) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::JOIN);
    assert_eq!(args["clientID"], Value::Text("1".to_owned()));
    assert_eq!(args["name"], Value::Text("botB:1".to_owned()));
    assert_eq!(args["userAgent"], Value::Text("botB".to_owned()));
    assert!(!args["host"].as_text().is_empty());

    // The joining client itself hears nothing.
    assert!(b.recv_timeout(QUIET).await.unwrap().is_none());
}

#[tokio::test]
async fn leave_is_broadcast_when_an_identified_client_disconnects() {
    let (_bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    a.identify("botA", false).await.unwrap();
    let mut b = BusClient::connect(addr).await.unwrap();
    b.identify("botB", false).await.unwrap();

    let (message_id, _) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::JOIN);

    drop(b);

    let (message_id, args) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::LEAVE);
    assert_eq!(args["clientID"], Value::Text("1".to_owned()));
}

#[tokio::test]
async fn unidentified_disconnect_emits_neither_join_nor_leave() {
    let (_bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    a.identify("botA", false).await.unwrap();

    // Connect and leave again without ever identifying.
    let ghost = BusClient::connect(addr).await.unwrap();
    drop(ghost);

    assert!(a.recv_timeout(QUIET).await.unwrap().is_none());
}

#[tokio::test]
async fn client_ids_are_never_reused() {
    let (_bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    assert_eq!(a.identify("botA", false).await.unwrap(), "0");
    let mut b = BusClient::connect(addr).await.unwrap();
    assert_eq!(b.identify("botB", false).await.unwrap(), "1");
    drop(b);

    // Wait for the departure to be processed.
    let (message_id, _) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::JOIN);
    let (message_id, _) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::LEAVE);

    let mut c = BusClient::connect(addr).await.unwrap();
    assert_eq!(c.identify("botC", false).await.unwrap(), "2");
}

#[tokio::test]
async fn frame_before_identification_closes_the_connection() {
    let (_bus, addr, _server) = start_bus().await;

    let mut rogue = BusClient::connect(addr).await.unwrap();
    // Consume the greeting, then skip the HELLO reply.
    let (message_id, _) = rogue.recv().await.unwrap();
    assert_eq!(message_id, msg::HELLO);
    rogue.send("PING", &Args::new()).await.unwrap();

    assert!(matches!(rogue.recv().await, Err(ClientError::Closed)));
}

#[tokio::test]
async fn duplicate_hello_closes_the_connection() {
    let (_bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    a.identify("botA", false).await.unwrap();
    let mut b = BusClient::connect(addr).await.unwrap();
    b.identify("botB", false).await.unwrap();

    let mut again = Args::new();
    again.insert("userAgent".to_owned(), Value::from("imposter"));
    b.send(msg::HELLO, &again).await.unwrap();
    assert!(matches!(b.recv().await, Err(ClientError::Closed)));

    // B had identified, so the others observe its departure.
    let (message_id, _) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::JOIN);
    let (message_id, args) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::LEAVE);
    assert_eq!(args["clientID"], Value::Text("1".to_owned()));
}

#[tokio::test]
async fn malformed_frame_closes_only_the_offending_connection() {
    let (_bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    a.identify("botA", false).await.unwrap();

    let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    // Drain the greeting frame.
    let mut greeting = [0u8; 64];
    let n = raw.read(&mut greeting).await.unwrap();
    assert!(n > 0);
    // Complete frame with a reserved options byte.
    raw.write_all(&[0, 0, 0, 7, 9, 0, 0]).await.unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(raw.read(&mut buf).await.unwrap(), 0, "expected EOF");

    // The well-behaved client is unaffected.
    let mut probe = Args::new();
    probe.insert("SEQ".to_owned(), Value::Uint(1));
    a.send(msg::LIST_CLIENTS, &probe).await.unwrap();
    let (message_id, args) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::LIST_CLIENTS);
    assert_eq!(args["count"], Value::Uint(1));
}

#[tokio::test]
async fn default_user_agent_is_unknown() {
    let (bus, addr, _server) = start_bus().await;

    let mut a = BusClient::connect(addr).await.unwrap();
    let (message_id, _) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::HELLO);
    // HELLO with no arguments at all.
    a.send(msg::HELLO, &Args::new()).await.unwrap();

    let mut b = BusClient::connect(addr).await.unwrap();
    b.identify("botB", false).await.unwrap();
    let (message_id, args) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::JOIN);
    assert_eq!(args["clientID"], Value::Text("1".to_owned()));

    let (total, identified) = bus.registry().counts().await;
    assert_eq!((total, identified), (2, 2));
    let anon = bus.registry().lookup("0").await.unwrap();
    assert_eq!(anon.user_agent(), "Unknown");
    assert_eq!(anon.display_name(), "Unknown:0");
}
