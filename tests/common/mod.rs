#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use scampi_stomp::{Connection, Event, Frame, Options, StompCodec};
use std::time::Duration;
use tokio::io::{DuplexStream, duplex};
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(2);

/// The broker end of an in-memory transport.
pub type Broker = Framed<DuplexStream, StompCodec>;

/// Start a session over an in-memory pipe and complete the CONNECT
/// handshake. Returns the client, the broker end and the CONNECT frame the
/// client sent.
pub async fn connected_pair(options: Options, session: Option<&str>) -> (Connection, Broker, Frame) {
    let conn = Connection::new(options);
    let (broker, connect) = attach(&conn, session).await;
    (conn, broker, connect)
}

/// Run `conn` over a fresh pipe and answer its CONNECT.
pub async fn attach(conn: &Connection, session: Option<&str>) -> (Broker, Frame) {
    let (client, server) = duplex(64 * 1024);
    conn.connect_with(client).await.expect("connect_with failed");
    let mut broker = Framed::new(server, StompCodec::new());

    let connect = recv(&mut broker).await;
    assert_eq!(connect.command, "CONNECT");

    let mut connected = Frame::new("CONNECTED");
    if let Some(s) = session {
        connected.set_header("session", s);
    }
    broker.send(connected).await.expect("send CONNECTED");

    match wait_for(conn, |e| matches!(e, Event::Connected { .. })).await {
        Event::Connected { session: got } => assert_eq!(got.as_deref(), session),
        _ => unreachable!(),
    }
    (broker, connect)
}

/// Next frame written by the client.
pub async fn recv(broker: &mut Broker) -> Frame {
    tokio::time::timeout(WAIT, broker.next())
        .await
        .expect("timed out waiting for client frame")
        .expect("client closed the transport")
        .expect("decode failed")
}

/// Wait for the client to half-close its side of the transport.
pub async fn expect_eof(broker: &mut Broker) {
    let next = tokio::time::timeout(WAIT, broker.next())
        .await
        .expect("timed out waiting for client to close");
    assert!(next.is_none(), "expected end of stream, got {:?}", next);
}

pub async fn expect_event(conn: &Connection) -> Event {
    tokio::time::timeout(WAIT, conn.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`.
pub async fn wait_for<F>(conn: &Connection, pred: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    loop {
        let event = expect_event(conn).await;
        if pred(&event) {
            return event;
        }
    }
}

pub fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn message(destination: &str, message_id: &str, body: &[u8]) -> Frame {
    Frame::new("MESSAGE")
        .header("destination", destination)
        .header("message-id", message_id)
        .set_body(body.to_vec())
}
