use std::collections::HashSet;

use crate::frame::{Frame, random_stamp};

/// Generates transaction ids that are unique for the lifetime of a
/// connection and tags frames with them.
#[derive(Debug, Default)]
pub struct Transactions {
    issued: HashSet<String>,
}

impl Transactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh transaction id.
    pub fn next_id(&mut self) -> String {
        loop {
            let id = random_stamp();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Attach the `transaction` header to `frame`.
    pub fn tag(frame: Frame, transaction_id: &str) -> Frame {
        frame.header("transaction", transaction_id)
    }

    /// Whether `id` was produced by this manager.
    pub fn was_issued(&self, id: &str) -> bool {
        self.issued.contains(id)
    }

    /// Forget issued ids when the connection they belonged to is gone.
    pub fn reset(&mut self) {
        self.issued.clear();
    }
}
