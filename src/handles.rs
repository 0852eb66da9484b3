//! Open file handle bookkeeping.
//!
//! Handle ids only identify an open call; all file state is keyed by path.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Inner {
    next_id: u64,
    open: HashMap<u64, String>,
}

/// Handle id allocator, locked separately from the cache.
#[derive(Debug)]
pub struct HandleTable {
    inner: Mutex<Inner>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                open: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a new id for `path`. Ids are never reused.
    pub fn allocate(&self, path: &str) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.open.insert(id, path.to_string());
        id
    }

    pub fn release(&self, id: u64) -> Option<String> {
        self.lock().open.remove(&id)
    }

    /// Drop every handle opened against `path`, returning how many there were.
    pub fn release_path(&self, path: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.open.len();
        inner.open.retain(|_, p| p != path);
        before - inner.open.len()
    }

    /// Point every handle on `from` at `to`.
    pub fn rename_path(&self, from: &str, to: &str) {
        let mut inner = self.lock();
        for p in inner.open.values_mut().filter(|p| p.as_str() == from) {
            *p = to.to_string();
        }
    }

    pub fn path_of(&self, id: u64) -> Option<String> {
        self.lock().open.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_not_reused() {
        let table = HandleTable::new();
        let a = table.allocate("/a");
        let b = table.allocate("/a");
        assert!(b > a);
        assert_eq!(table.release(a), Some("/a".to_string()));
        let c = table.allocate("/b");
        assert!(c > b);
    }

    #[test]
    fn test_release_path_drops_all_handles_for_path() {
        let table = HandleTable::new();
        table.allocate("/a");
        table.allocate("/a");
        let keep = table.allocate("/b");
        assert_eq!(table.release_path("/a"), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.path_of(keep), Some("/b".to_string()));
    }

    #[test]
    fn test_rename_path() {
        let table = HandleTable::new();
        let id = table.allocate("/old");
        table.rename_path("/old", "/new");
        assert_eq!(table.path_of(id), Some("/new".to_string()));
    }
}
