use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ConnError;

/// Receipt ids sent but not yet answered, oldest forgotten first.
pub(crate) const OUTSTANDING_LIMIT: usize = 1024;
/// Answered receipts kept for a `wait_for_receipt` that comes late.
pub(crate) const RECEIVED_LIMIT: usize = 256;

/// Insertion-ordered id set that drops its oldest entry when full.
#[derive(Debug)]
struct BoundedIds {
    ids: VecDeque<String>,
    limit: usize,
}

impl BoundedIds {
    fn new(limit: usize) -> Self {
        Self {
            ids: VecDeque::new(),
            limit,
        }
    }

    /// Returns the id evicted to make room, if any.
    fn insert(&mut self, id: &str) -> Option<String> {
        if self.contains(id) {
            return None;
        }
        let evicted = if self.ids.len() >= self.limit {
            self.ids.pop_front()
        } else {
            None
        };
        self.ids.push_back(id.to_string());
        evicted
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.ids.iter().position(|i| i == id) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
    }
}

/// How a `wait_for_receipt` call should proceed.
#[derive(Debug)]
pub(crate) enum ReceiptWait {
    /// The RECEIPT already arrived.
    Ready,
    Pending(oneshot::Receiver<()>),
}

/// Bookkeeping for receipts requested on outgoing frames.
///
/// A notifier exists only while somebody is inside `wait_for_receipt`;
/// receipts consumed through `Event::Receipt` alone leave nothing behind.
#[derive(Debug)]
pub(crate) struct Receipts {
    outstanding: BoundedIds,
    received: BoundedIds,
    waiters: HashMap<String, oneshot::Sender<()>>,
}

impl Receipts {
    pub(crate) fn new() -> Self {
        Self {
            outstanding: BoundedIds::new(OUTSTANDING_LIMIT),
            received: BoundedIds::new(RECEIVED_LIMIT),
            waiters: HashMap::new(),
        }
    }

    /// Record a receipt id attached to a frame about to be written.
    pub(crate) fn expect(&mut self, receipt_id: &str) {
        if let Some(old) = self.outstanding.insert(receipt_id) {
            debug!(receipt = %old, "forgetting unanswered receipt");
        }
    }

    /// Handle an inbound RECEIPT. Returns false for ids this side never sent.
    pub(crate) fn resolve(&mut self, receipt_id: &str) -> bool {
        let expected = self.outstanding.remove(receipt_id);
        if let Some(tx) = self.waiters.remove(receipt_id) {
            let _ = tx.send(());
            return true;
        }
        if expected {
            self.received.insert(receipt_id);
        }
        expected
    }

    /// Start waiting for `receipt_id`. Each id can be awaited once.
    pub(crate) fn wait(&mut self, receipt_id: &str) -> Result<ReceiptWait, ConnError> {
        if self.received.remove(receipt_id) {
            return Ok(ReceiptWait::Ready);
        }
        if !self.outstanding.contains(receipt_id) {
            return Err(ConnError::Protocol(format!(
                "no receipt pending for '{}'",
                receipt_id
            )));
        }
        if self.waiters.contains_key(receipt_id) {
            return Err(ConnError::Protocol(format!(
                "receipt '{}' is already awaited",
                receipt_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(receipt_id.to_string(), tx);
        Ok(ReceiptWait::Pending(rx))
    }

    /// Stop tracking a receipt whose wait timed out.
    pub(crate) fn abandon(&mut self, receipt_id: &str) {
        self.waiters.remove(receipt_id);
        self.outstanding.remove(receipt_id);
    }

    /// Drop everything still unanswered; active waiters see a closed channel.
    /// Receipts that already arrived stay claimable.
    pub(crate) fn release_pending(&mut self) {
        self.outstanding.clear();
        self.waiters.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.release_pending();
        self.received.clear();
    }

    /// Number of receipt ids currently held, answered or not.
    pub(crate) fn tracked(&self) -> usize {
        self.outstanding.len() + self.received.len() + self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answered_receipts_are_bounded() {
        let mut r = Receipts::new();
        for i in 0..1000 {
            let id = i.to_string();
            r.expect(&id);
            assert!(r.resolve(&id));
        }
        assert_eq!(r.outstanding.len(), 0);
        assert!(r.waiters.is_empty());
        assert_eq!(r.received.len(), RECEIVED_LIMIT);
    }

    #[test]
    fn unanswered_receipts_are_bounded() {
        let mut r = Receipts::new();
        for i in 0..(OUTSTANDING_LIMIT + 10) {
            r.expect(&i.to_string());
        }
        assert_eq!(r.tracked(), OUTSTANDING_LIMIT);
        assert!(matches!(r.wait("0"), Err(ConnError::Protocol(_))));
    }

    #[test]
    fn late_wait_sees_earlier_receipt_once() {
        let mut r = Receipts::new();
        r.expect("7");
        assert!(r.resolve("7"));
        assert!(matches!(r.wait("7"), Ok(ReceiptWait::Ready)));
        assert!(matches!(r.wait("7"), Err(ConnError::Protocol(_))));
        assert_eq!(r.tracked(), 0);
    }

    #[test]
    fn waiter_is_notified_and_removed() {
        let mut r = Receipts::new();
        r.expect("9");
        let mut rx = match r.wait("9") {
            Ok(ReceiptWait::Pending(rx)) => rx,
            other => panic!("expected pending wait, got {:?}", other),
        };
        assert!(matches!(r.wait("9"), Err(ConnError::Protocol(_))));
        assert!(r.resolve("9"));
        assert!(rx.try_recv().is_ok());
        assert_eq!(r.tracked(), 0);
    }

    #[test]
    fn foreign_receipt_is_not_recorded() {
        let mut r = Receipts::new();
        assert!(!r.resolve("someone-else"));
        assert_eq!(r.tracked(), 0);
    }

    #[test]
    fn release_pending_keeps_received() {
        let mut r = Receipts::new();
        r.expect("a");
        r.expect("b");
        r.resolve("a");
        r.release_pending();
        assert!(matches!(r.wait("a"), Ok(ReceiptWait::Ready)));
        assert!(matches!(r.wait("b"), Err(ConnError::Protocol(_))));
    }
}
