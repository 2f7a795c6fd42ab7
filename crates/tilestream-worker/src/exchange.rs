use std::collections::HashMap;

use crate::protocol::ExchangeId;

/// Pending request records keyed by exchange id.
///
/// Each id is handed out once and settles at most once: the first matching
/// response removes the record, so duplicates and responses to abandoned
/// requests find nothing and are dropped by the caller.
#[derive(Debug)]
pub struct Exchanges<T> {
    next_id: ExchangeId,
    pending: HashMap<ExchangeId, T>,
}

impl<T> Default for Exchanges<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Exchanges<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Record a new pending request and return its id.
    pub fn open(&mut self, record: T) -> ExchangeId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, record);
        id
    }

    /// Take the record for a response. `None` for unknown or consumed ids.
    pub fn settle(&mut self, id: ExchangeId) -> Option<T> {
        self.pending.remove(&id)
    }

    /// Forget a request; its response will be dropped on arrival.
    pub fn abandon(&mut self, id: ExchangeId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn get(&self, id: ExchangeId) -> Option<&T> {
        self.pending.get(&id)
    }

    pub fn is_pending(&self, id: ExchangeId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut exchanges = Exchanges::new();
        let a = exchanges.open("a");
        let b = exchanges.open("b");
        assert!(b > a);
        assert_eq!(exchanges.len(), 2);
    }

    #[test]
    fn test_settle_once() {
        let mut exchanges = Exchanges::new();
        let id = exchanges.open(42);
        assert_eq!(exchanges.settle(id), Some(42));
        assert_eq!(exchanges.settle(id), None);
        assert_eq!(exchanges.settle(id + 100), None);
    }

    #[test]
    fn test_abandoned_exchange_drops_response() {
        let mut exchanges = Exchanges::new();
        let id = exchanges.open(());
        assert!(exchanges.abandon(id));
        assert!(!exchanges.is_pending(id));
        assert_eq!(exchanges.settle(id), None);
        assert!(exchanges.is_empty());
    }
}
