//! Async STOMP client.
//!
//! A [`Connection`] owns one broker session: it writes frames through
//! [`StompCodec`], routes MESSAGE frames to per-destination callbacks and
//! reports everything else as an [`Event`].

pub mod codec;
pub mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod options;
pub mod parser;
mod receipt;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub use codec::{FrameDecoder, StompCodec, encode_frame};
pub use connection::{Connection, ConnectionState};
pub use error::{ConnError, ServerError};
pub use event::Event;
pub use frame::Frame;
pub use options::Options;
pub use parser::{parse_frame, parse_headers};
pub use subscription::{AckMode, Destination, MessageCallback, SubscriptionEntry, Subscriptions};
pub use transaction::Transactions;
