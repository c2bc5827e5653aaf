//! Object-handle cache
//!
//! Maps `(backend node, execution context)` to the remote object id that
//! `DOM.resolveNode` returned for it, so repeated extractions against the
//! same node skip the round-trip.
//!
//! Eviction is by insertion order: when full, the entry inserted longest ago
//! goes, regardless of how recently it was read.

use std::collections::{HashMap, VecDeque};

use crate::cdp::{BackendNodeId, ExecutionContextId};

/// Cache key
pub type HandleKey = (BackendNodeId, ExecutionContextId);

/// Bounded insertion-ordered handle cache
#[derive(Debug)]
pub struct ObjectHandleCache {
    capacity: usize,
    entries: HashMap<HandleKey, String>,
    /// Insertion order; may hold keys already removed by invalidation
    order: VecDeque<HandleKey>,
}

impl ObjectHandleCache {
    /// Create a cache holding at most `capacity` handles
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a handle without touching insertion order
    pub fn get(&self, backend_node_id: BackendNodeId, context_id: ExecutionContextId) -> Option<&str> {
        self.entries
            .get(&(backend_node_id, context_id))
            .map(String::as_str)
    }

    /// Insert a handle, evicting the oldest entry if the cache is full.
    ///
    /// Re-inserting an existing key replaces its handle and moves it to the
    /// back of the eviction queue. Returns the evicted key, if any.
    pub fn insert(
        &mut self,
        backend_node_id: BackendNodeId,
        context_id: ExecutionContextId,
        handle: String,
    ) -> Option<HandleKey> {
        let key = (backend_node_id, context_id);
        let mut evicted = None;

        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
        } else if self.entries.len() >= self.capacity {
            evicted = self.evict_oldest();
        }

        self.entries.insert(key, handle);
        self.order.push_back(key);
        evicted
    }

    fn evict_oldest(&mut self) -> Option<HandleKey> {
        while let Some(oldest) = self.order.pop_front() {
            if self.entries.remove(&oldest).is_some() {
                tracing::trace!("Evicted handle for node {} in context {}", oldest.0, oldest.1);
                return Some(oldest);
            }
        }
        None
    }

    /// Drop every handle that belongs to `context_id`. Returns how many went.
    pub fn invalidate_context(&mut self, context_id: ExecutionContextId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, ctx), _| *ctx != context_id);
        self.order.retain(|(_, ctx)| *ctx != context_id);
        before - self.entries.len()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for ObjectHandleCache {
    fn default() -> Self {
        Self::new(1000)
    }
}
