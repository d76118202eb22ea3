use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::value::Value;

/// Host-side storage for results handed out by reference.
///
/// Each context owns one table; clearing it on release invalidates every
/// outstanding `HostRef`.
#[derive(Clone, Default)]
pub(crate) struct HandleTable {
    inner: Arc<Mutex<Handles>>,
}

#[derive(Default)]
struct Handles {
    next: u64,
    entries: HashMap<u64, Value>,
}

impl HandleTable {
    pub(crate) fn insert(&self, value: Value) -> u64 {
        let mut handles = self.inner.lock();
        handles.next += 1;
        let id = handles.next;
        handles.entries.insert(id, value);
        id
    }

    pub(crate) fn get(&self, id: u64) -> Option<Value> {
        self.inner.lock().entries.get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.inner.lock().entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}
