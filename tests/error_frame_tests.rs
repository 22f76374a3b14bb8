//! Tests for ERROR frame handling.
//!
//! These tests verify:
//! - ServerError creation and fields
//! - ERROR frames surface as error events without ending the session

mod common;

use common::*;
use futures::SinkExt;
use scampi_stomp::{ConnError, ConnectionState, Event, Frame, Options, ServerError};

// ============================================================================
// ServerError tests
// ============================================================================

#[test]
fn server_error_from_frame_basic() {
    let frame = Frame::new("ERROR")
        .header("message", "malformed frame received")
        .header("content-type", "text/plain");

    let err = ServerError::from_frame(frame);

    assert_eq!(err.message, "malformed frame received");
    assert!(err.body.is_none());
    assert!(err.receipt_id.is_none());
}

#[test]
fn server_error_from_frame_with_body_and_receipt() {
    let frame = Frame::new("ERROR")
        .header("message", "invalid destination")
        .header("receipt-id", "msg-12345")
        .set_body(b"no such queue".to_vec());

    let err = ServerError::from_frame(frame);

    assert_eq!(err.body, Some("no such queue".to_string()));
    assert_eq!(err.receipt_id, Some("msg-12345".to_string()));
    assert_eq!(err.frame.command, "ERROR");
}

#[test]
fn server_error_from_frame_no_message_header() {
    let err = ServerError::from_frame(Frame::new("ERROR"));
    assert_eq!(err.message, "unknown error");
}

#[test]
fn server_error_display() {
    let frame = Frame::new("ERROR")
        .header("message", "protocol error")
        .set_body(b"details here".to_vec());

    let display = format!("{}", ServerError::from_frame(frame));

    assert!(display.contains("STOMP server error"));
    assert!(display.contains("protocol error"));
    assert!(display.contains("details here"));
}

#[test]
fn conn_error_server_is_transparent() {
    let err: ConnError = ServerError::from_frame(Frame::new("ERROR").header("message", "x")).into();
    assert_eq!(err.to_string(), "STOMP server error: x");
}

// ============================================================================
// Dispatch tests
// ============================================================================

#[tokio::test]
async fn error_frame_becomes_error_event() {
    let (conn, mut broker, _) = connected_pair(Options::default(), Some("s1")).await;

    broker
        .send(
            Frame::new("ERROR")
                .header("message", "access refused")
                .set_body(b"user guest may not read /queue/secret".to_vec()),
        )
        .await
        .expect("send ERROR");

    match expect_event(&conn).await {
        Event::Error(ConnError::Server(err)) => {
            assert_eq!(err.message, "access refused");
            assert!(err.body.as_deref().unwrap_or("").contains("/queue/secret"));
        }
        other => panic!("expected server error event, got {:?}", other),
    }

    // The broker decides whether to close; the client stays connected.
    assert_eq!(conn.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn unknown_command_is_dropped_silently() {
    let (conn, mut broker, _) = connected_pair(Options::default(), None).await;

    broker.send(Frame::new("HEARTBEAT-ISH")).await.expect("send");
    broker
        .send(message("/queue/a", "1", b"after"))
        .await
        .expect("send");

    match expect_event(&conn).await {
        Event::Message(frame) => assert_eq!(frame.body, b"after".to_vec()),
        other => panic!("expected message event, got {:?}", other),
    }
    assert_eq!(conn.state().await, ConnectionState::Connected);
}
