use crate::error::ConnError;
use crate::frame::Frame;

/// Notifications delivered to the application, in the order they happen.
///
/// Received through [`Connection::next_event`](crate::Connection::next_event).
#[derive(Debug)]
pub enum Event {
    /// CONNECTED received; carries the broker-assigned session, if any.
    Connected { session: Option<String> },
    /// All SUBSCRIBE frames for one `subscribe` call were written.
    Subscribed(Vec<String>),
    /// All UNSUBSCRIBE frames for one `unsubscribe` call were written.
    Unsubscribed(Vec<String>),
    /// A MESSAGE frame carrying a `message-id`.
    Message(Frame),
    /// RECEIPT received; carries its `receipt-id`.
    Receipt(String),
    /// Transport failure or broker ERROR frame.
    Error(ConnError),
    /// The transport finished closing and the session was cleared.
    Disconnected,
    /// The socket was released.
    Closed { had_error: bool },
}

impl Event {
    /// Short lowercase name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::Subscribed(_) => "subscribed",
            Event::Unsubscribed(_) => "unsubscribed",
            Event::Message(_) => "message",
            Event::Receipt(_) => "receipt",
            Event::Error(_) => "error",
            Event::Disconnected => "disconnected",
            Event::Closed { .. } => "closed",
        }
    }
}
