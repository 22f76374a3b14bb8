use rand::Rng;
use std::fmt;

/// Command names understood by the client.
///
/// Anything outside this vocabulary is still decoded into a [`Frame`]; the
/// dispatcher logs it and moves on.
pub mod commands {
    pub const CONNECT: &str = "CONNECT";
    pub const CONNECTED: &str = "CONNECTED";
    pub const SEND: &str = "SEND";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    pub const BEGIN: &str = "BEGIN";
    pub const COMMIT: &str = "COMMIT";
    pub const ABORT: &str = "ABORT";
    pub const ACK: &str = "ACK";
    pub const MESSAGE: &str = "MESSAGE";
    pub const RECEIPT: &str = "RECEIPT";
    pub const ERROR: &str = "ERROR";

    /// Every command in the fixed vocabulary.
    pub const ALL: [&str; 12] = [
        CONNECT,
        CONNECTED,
        SEND,
        SUBSCRIBE,
        UNSUBSCRIBE,
        BEGIN,
        COMMIT,
        ABORT,
        ACK,
        MESSAGE,
        RECEIPT,
        ERROR,
    ];

    /// Returns true when `command` belongs to the fixed vocabulary.
    pub fn is_known(command: &str) -> bool {
        ALL.contains(&command)
    }
}

/// Upper bound (exclusive) for generated receipt and transaction stamps.
pub(crate) const STAMP_RANGE: u64 = 99_999_999_999;

/// Generate a random decimal stamp used for receipts and transaction ids.
pub(crate) fn random_stamp() -> String {
    rand::thread_rng().gen_range(0..STAMP_RANGE).to_string()
}

/// A single STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered list
/// of headers (key/value pairs) and the raw body bytes. Header keys are
/// unique: setting an existing key replaces its value in place so insertion
/// order is kept for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes; empty when the frame carries no body
    pub body: Vec<u8>,
    /// Set by the decoder when the frame arrived with a `content-length`
    /// header, meaning the body is binary-safe and may contain NUL bytes.
    pub bytes_message: bool,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Parameters
    /// - `command`: the STOMP command name (for example, `"SEND"` or
    ///   `"SUBSCRIBE"`). Accepts any type convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
            bytes_message: false,
        }
    }

    /// Add or replace a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Insert a header, overwriting the value of an existing key without
    /// changing its position.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key, value)),
        }
    }

    /// Remove a header and return its value, if present.
    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        let pos = self.headers.iter().position(|(k, _)| k == key)?;
        Some(self.headers.remove(pos).1)
    }

    /// Get the value of a header by name (case-sensitive).
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the command belongs to the known vocabulary.
    pub fn is_known_command(&self) -> bool {
        commands::is_known(&self.command)
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Synthesize a `receipt` header: a random decimal stamp, suffixed with
    /// `-<session>` when a session is known. Returns the receipt id.
    pub fn stamp_receipt(&mut self, session: Option<&str>) -> String {
        let stamp = random_stamp();
        let receipt = match session {
            Some(s) => format!("{}-{}", stamp, s),
            None => stamp,
        };
        self.set_header("receipt", receipt.clone());
        receipt
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            if k == "passcode" {
                writeln!(f, "{}: ******", k)?;
            } else {
                writeln!(f, "{}: {}", k, v)?;
            }
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
