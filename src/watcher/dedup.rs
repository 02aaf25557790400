//! Distinct-until-changed filtering for event streams.
//!
//! Some OS backends emit back-to-back duplicate notifications for one
//! logical change. Each per-root forwarding subscription owns one of
//! these filters, keyed by the event's path identity, so a duplicate
//! burst collapses to a single public emission while a later re-create
//! of the same path still passes.

/// Suppresses a value whose key equals the immediately preceding key
/// on the same stream.
#[derive(Debug)]
pub struct DistinctUntilChanged<K> {
    last: Option<K>,
}

impl<K: PartialEq> DistinctUntilChanged<K> {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Returns true if the value should be forwarded.
    pub fn accept(&mut self, key: K) -> bool {
        if self.last.as_ref() == Some(&key) {
            return false;
        }
        self.last = Some(key);
        true
    }
}

impl<K: PartialEq> Default for DistinctUntilChanged<K> {
    fn default() -> Self {
        Self::new()
    }
}
