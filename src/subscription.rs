use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with `(body, headers)` for each MESSAGE routed to an
/// enabled subscription.
pub type MessageCallback = Arc<dyn Fn(&[u8], &[(String, String)]) + Send + Sync>;

/// Subscription acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// One destination or an ordered list of destinations.
///
/// `subscribe` and `unsubscribe` fan out over a list: one frame and one
/// registry update per destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    One(String),
    Many(Vec<String>),
}

impl Destination {
    /// The destination names in order.
    pub fn names(&self) -> Vec<String> {
        match self {
            Destination::One(d) => vec![d.clone()],
            Destination::Many(ds) => ds.clone(),
        }
    }
}

impl From<&str> for Destination {
    fn from(d: &str) -> Self {
        Destination::One(d.to_string())
    }
}

impl From<String> for Destination {
    fn from(d: String) -> Self {
        Destination::One(d)
    }
}

impl From<Vec<String>> for Destination {
    fn from(ds: Vec<String>) -> Self {
        Destination::Many(ds)
    }
}

impl From<Vec<&str>> for Destination {
    fn from(ds: Vec<&str>) -> Self {
        Destination::Many(ds.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Destination {
    fn from(ds: [&str; N]) -> Self {
        Destination::Many(ds.iter().map(|d| d.to_string()).collect())
    }
}

/// Registry entry for a single destination.
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub destination: String,
    pub ack: AckMode,
    pub enabled: bool,
    pub(crate) callback: Option<MessageCallback>,
}

impl SubscriptionEntry {
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("destination", &self.destination)
            .field("ack", &self.ack)
            .field("enabled", &self.enabled)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Destination -> subscription registry.
///
/// Unsubscribing only disables an entry. The entry stays so that a MESSAGE
/// already in flight for that destination is matched and dropped quietly.
/// Entries live until [`Subscriptions::clear`], which the connection calls
/// when a new session starts.
#[derive(Debug, Default)]
pub struct Subscriptions {
    entries: HashMap<String, SubscriptionEntry>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the enabled entry for `destination`.
    pub fn subscribe(
        &mut self,
        destination: &str,
        ack: AckMode,
        callback: Option<MessageCallback>,
    ) {
        self.entries.insert(
            destination.to_string(),
            SubscriptionEntry {
                destination: destination.to_string(),
                ack,
                enabled: true,
                callback,
            },
        );
    }

    /// Disable the entry for `destination`, keeping it in the registry.
    ///
    /// Returns false when the destination was never subscribed.
    pub fn disable(&mut self, destination: &str) -> bool {
        match self.entries.get_mut(destination) {
            Some(entry) => {
                entry.enabled = false;
                true
            }
            None => false,
        }
    }

    /// The callback to run for a message on `destination`, if its entry is
    /// enabled and carries one.
    pub fn route(&self, destination: &str) -> Option<MessageCallback> {
        self.entries
            .get(destination)
            .filter(|entry| entry.enabled)
            .and_then(|entry| entry.callback.clone())
    }

    pub fn get(&self, destination: &str) -> Option<&SubscriptionEntry> {
        self.entries.get(destination)
    }

    pub fn is_enabled(&self, destination: &str) -> bool {
        self.entries.get(destination).is_some_and(|e| e.enabled)
    }

    /// Subscribed destinations, sorted.
    pub fn destinations(&self) -> Vec<String> {
        let mut ds: Vec<String> = self.entries.keys().cloned().collect();
        ds.sort();
        ds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
