use std::fmt;
use thiserror::Error;

use crate::connection::ConnectionState;
use crate::frame::Frame;

/// Errors returned by `Connection` operations and carried by
/// [`Event::Error`](crate::Event::Error).
///
/// `NotInitialized`, `NotConnected` and `InvalidState` are returned directly
/// from the offending call. The remaining variants describe runtime failures
/// and normally arrive through the event channel.
#[derive(Error, Debug)]
pub enum ConnError {
    /// Operation attempted before the connection was given its options
    #[error("not initialized")]
    NotInitialized,
    /// Session operation attempted before CONNECTED was received
    #[error("not connected")]
    NotConnected,
    /// Operation not valid in the current lifecycle state
    #[error("invalid state: {0:?}")]
    InvalidState(ConnectionState),
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Broker certificate rejected while validation was required
    #[error("ssl validation failure: {0}")]
    SslValidation(String),
    /// ERROR frame received from the broker
    #[error(transparent)]
    Server(#[from] ServerError),
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
}

/// An ERROR frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header, or `"unknown error"` when absent
    pub message: String,
    /// The body as text, when not empty
    pub body: Option<String>,
    /// The `receipt-id` header, when the error answers a receipt request
    pub receipt_id: Option<String>,
    /// The frame exactly as received
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(frame.body_text())
        };
        let receipt_id = frame.get_header("receipt-id").map(String::from);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, " ({})", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
