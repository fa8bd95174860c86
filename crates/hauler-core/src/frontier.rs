use std::collections::{HashSet, VecDeque};

/// FIFO work list with run-scoped deduplication.
///
/// Each item is queued under a key (usually its canonical path). A key is
/// accepted at most once per run, whether the item is still pending or was
/// already processed, so an entity reachable through several links is
/// fetched once.
#[derive(Debug)]
pub struct Frontier<T> {
    pending: VecDeque<(String, T)>,
    seen: HashSet<String>,
}

impl<T> Default for Frontier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Frontier<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Queue `item` under `key`. Returns false if the key was seen before.
    pub fn push(&mut self, key: impl Into<String>, item: T) -> bool {
        let key = key.into();
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.pending.push_back((key, item));
        true
    }

    /// Queue every `(key, item)` pair; returns how many were new.
    pub fn extend<K, I>(&mut self, items: I) -> usize
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, T)>,
    {
        items
            .into_iter()
            .map(|(k, item)| self.push(k, item))
            .filter(|added| *added)
            .count()
    }

    pub fn pop(&mut self) -> Option<(String, T)> {
        self.pending.pop_front()
    }

    /// Mark a key as seen without queueing anything.
    pub fn mark_seen(&mut self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
