//! In-memory cache for attributes, directory listings and file content.
//!
//! Everything lives in one structure behind one mutex: a per-path entry
//! with a slot for each kind of value, plus the dirty write buffers.
//! Compound operations take the lock once through [`Cache::lock`], so an
//! unlink drops content, attributes and the parent listing atomically.
//!
//! Clean entries are fresh while `now - captured_at < ttl` and are checked
//! lazily on read. Dirty buffers never go stale.

use crate::attr::Attr;
use crate::write_buffer::{Snapshot, WriteBuffers};
use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::ops::BitOr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Default freshness window (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Source of monotonic time for freshness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Which slots of a path's entry to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slots {
    attr: bool,
    listing: bool,
    content: bool,
}

impl Slots {
    pub const ATTR: Slots = Slots { attr: true, listing: false, content: false };
    pub const LISTING: Slots = Slots { attr: false, listing: true, content: false };
    pub const CONTENT: Slots = Slots { attr: false, listing: false, content: true };
    pub const ALL: Slots = Slots { attr: true, listing: true, content: true };
}

impl BitOr for Slots {
    type Output = Slots;

    fn bitor(self, rhs: Slots) -> Slots {
        Slots {
            attr: self.attr || rhs.attr,
            listing: self.listing || rhs.listing,
            content: self.content || rhs.content,
        }
    }
}

#[derive(Debug, Clone)]
struct Stamped<T> {
    value: T,
    captured_at: Instant,
}

impl<T> Stamped<T> {
    fn new(value: T, captured_at: Instant) -> Self {
        Self { value, captured_at }
    }

    fn fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

#[derive(Debug, Default)]
struct PathEntry {
    attr: Option<Stamped<Attr>>,
    listing: Option<Stamped<Vec<String>>>,
    content: Option<Stamped<Vec<u8>>>,
}

impl PathEntry {
    fn is_empty(&self) -> bool {
        self.attr.is_none() && self.listing.is_none() && self.content.is_none()
    }
}

struct CacheState {
    entries: LruCache<String, PathEntry>,
    buffers: WriteBuffers,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub dirty: usize,
    pub content_bytes: usize,
}

/// Shared cache for one mounted session.
pub struct Cache {
    state: Mutex<CacheState>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Cache {
    /// Create a cache. `capacity` bounds the number of clean per-path entries.
    pub fn new(ttl: Duration, capacity: Option<NonZeroUsize>, clock: Arc<dyn Clock>) -> Self {
        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            state: Mutex::new(CacheState {
                entries,
                buffers: WriteBuffers::new(),
            }),
            ttl,
            clock,
        }
    }

    /// Take the cache lock for a sequence of operations.
    pub fn lock(&self) -> CacheTxn<'_> {
        CacheTxn {
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
            now: self.clock.now(),
            modified_at: SystemTime::now(),
            ttl: self.ttl,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let txn = self.lock();
        let content_bytes = txn
            .state
            .entries
            .iter()
            .filter_map(|(_, e)| e.content.as_ref().map(|c| c.value.len()))
            .sum();
        CacheStats {
            entries: txn.state.entries.len(),
            dirty: txn.state.buffers.len(),
            content_bytes,
        }
    }
}

/// Exclusive access to the cache, stamped with the time it was taken.
pub struct CacheTxn<'a> {
    state: MutexGuard<'a, CacheState>,
    now: Instant,
    /// Stamp for buffer changes made under this lock.
    modified_at: SystemTime,
    ttl: Duration,
}

impl CacheTxn<'_> {
    fn entry(&mut self, path: &str) -> &mut PathEntry {
        self.state
            .entries
            .get_or_insert_mut(path.to_string(), PathEntry::default)
    }

    /// Fresh attribute record for `path`.
    pub fn attr(&mut self, path: &str) -> Option<Attr> {
        let (now, ttl) = (self.now, self.ttl);
        self.state
            .entries
            .get(path)
            .and_then(|e| e.attr.as_ref())
            .filter(|a| a.fresh(now, ttl))
            .map(|a| a.value)
    }

    pub fn put_attr(&mut self, path: &str, attr: Attr) {
        let now = self.now;
        self.entry(path).attr = Some(Stamped::new(attr, now));
    }

    /// Fresh listing for `path`. A listing holding only `.` and `..` counts as a miss.
    pub fn listing(&mut self, path: &str) -> Option<Vec<String>> {
        let (now, ttl) = (self.now, self.ttl);
        self.state
            .entries
            .get(path)
            .and_then(|e| e.listing.as_ref())
            .filter(|l| l.fresh(now, ttl) && l.value.len() > 2)
            .map(|l| l.value.clone())
    }

    pub fn put_listing(&mut self, path: &str, entries: Vec<String>) {
        let now = self.now;
        self.entry(path).listing = Some(Stamped::new(entries, now));
    }

    /// `[offset, offset + size)` of the fresh cached content, clamped to its end.
    pub fn read_content(&mut self, path: &str, offset: usize, size: usize) -> Option<Vec<u8>> {
        let (now, ttl) = (self.now, self.ttl);
        self.state
            .entries
            .get(path)
            .and_then(|e| e.content.as_ref())
            .filter(|c| c.fresh(now, ttl))
            .map(|c| slice(&c.value, offset, size))
    }

    /// Fresh cached content for `path`.
    pub fn content(&mut self, path: &str) -> Option<Vec<u8>> {
        let (now, ttl) = (self.now, self.ttl);
        self.state
            .entries
            .get(path)
            .and_then(|e| e.content.as_ref())
            .filter(|c| c.fresh(now, ttl))
            .map(|c| c.value.clone())
    }

    pub fn put_content(&mut self, path: &str, content: Vec<u8>) {
        let now = self.now;
        self.entry(path).content = Some(Stamped::new(content, now));
    }

    /// Drop the selected slots of `path`. Dropping content also discards a dirty buffer.
    pub fn invalidate(&mut self, path: &str, slots: Slots) {
        if slots.content {
            self.state.buffers.discard(path);
        }
        let empty = match self.state.entries.peek_mut(path) {
            Some(entry) => {
                if slots.attr {
                    entry.attr = None;
                }
                if slots.listing {
                    entry.listing = None;
                }
                if slots.content {
                    entry.content = None;
                }
                entry.is_empty()
            }
            None => false,
        };
        if empty {
            self.state.entries.pop(path);
        }
        debug!("invalidated {:?} for {}", slots, path);
    }

    pub fn has_buffer(&self, path: &str) -> bool {
        self.state.buffers.contains(path)
    }

    /// Length and last-change time of the dirty buffer for `path`.
    pub fn buffer_stat(&self, path: &str) -> Option<(usize, SystemTime)> {
        self.state.buffers.get(path).map(|b| (b.data.len(), b.modified))
    }

    /// `[offset, offset + size)` of the dirty buffer for `path`.
    pub fn read_buffer(&self, path: &str, offset: usize, size: usize) -> Option<Vec<u8>> {
        self.state
            .buffers
            .get(path)
            .map(|b| slice(&b.data, offset, size))
    }

    /// Write into the buffer for `path`, seeding it from cached content of any age.
    pub fn write(&mut self, path: &str, data: &[u8], offset: usize) -> usize {
        let base = if self.state.buffers.contains(path) {
            None
        } else {
            self.state
                .entries
                .peek_mut(path)
                .and_then(|e| e.content.take())
                .map(|c| c.value)
        };
        let now = self.modified_at;
        self.state.buffers.write(path, base, data, offset, now)
    }

    /// Replace the buffer for `path`.
    pub fn set_buffer(&mut self, path: &str, data: Vec<u8>) {
        if let Some(entry) = self.state.entries.peek_mut(path) {
            entry.content = None;
        }
        let now = self.modified_at;
        self.state.buffers.set(path, data, now);
    }

    /// Resize the dirty buffer. Returns false when there is none.
    pub fn truncate_buffer(&mut self, path: &str, length: usize) -> bool {
        let now = self.modified_at;
        self.state.buffers.truncate(path, length, now)
    }

    pub fn snapshot(&self, path: &str) -> Option<Snapshot> {
        self.state.buffers.snapshot(path)
    }

    /// After a successful upload of `version`, keep the bytes as clean content.
    /// Returns false when the buffer changed in the meantime and stays dirty.
    pub fn commit(&mut self, path: &str, version: u64) -> bool {
        match self.state.buffers.commit(path, version) {
            Some(data) => {
                self.put_content(path, data);
                true
            }
            None => false,
        }
    }
}

fn slice(data: &[u8], offset: usize, size: usize) -> Vec<u8> {
    if offset >= data.len() {
        return Vec::new();
    }
    let end = offset.saturating_add(size).min(data.len());
    data[offset..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn cache(ttl: Duration) -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (Cache::new(ttl, None, clock.clone()), clock)
    }

    fn dots(extra: &[&str]) -> Vec<String> {
        let mut v = vec![".".to_string(), "..".to_string()];
        v.extend(extra.iter().map(|s| s.to_string()));
        v
    }

    #[test]
    fn test_entry_stale_at_exact_ttl() {
        let (cache, clock) = cache(Duration::from_secs(300));
        cache.lock().put_content("/a", b"abc".to_vec());

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.lock().content("/a"), Some(b"abc".to_vec()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.lock().content("/a"), None);
    }

    #[test]
    fn test_trivial_listing_is_a_miss() {
        let (cache, _) = cache(DEFAULT_TTL);
        let mut txn = cache.lock();
        txn.put_listing("/empty", dots(&[]));
        txn.put_listing("/full", dots(&["a"]));
        assert_eq!(txn.listing("/empty"), None);
        assert_eq!(txn.listing("/full"), Some(dots(&["a"])));
    }

    #[test]
    fn test_invalidate_selected_slots() {
        let (cache, _) = cache(DEFAULT_TTL);
        let attr = Attr::root(SystemTime::now());
        let mut txn = cache.lock();
        txn.put_attr("/d", attr);
        txn.put_listing("/d", dots(&["x"]));
        txn.put_content("/d", b"zz".to_vec());

        txn.invalidate("/d", Slots::ATTR | Slots::CONTENT);
        assert_eq!(txn.attr("/d"), None);
        assert_eq!(txn.content("/d"), None);
        assert!(txn.listing("/d").is_some());

        txn.invalidate("/d", Slots::LISTING);
        drop(txn);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_write_seeds_from_stale_content() {
        let (cache, clock) = cache(Duration::from_secs(10));
        cache.lock().put_content("/f", b"hello".to_vec());
        clock.advance(Duration::from_secs(60));

        let mut txn = cache.lock();
        assert_eq!(txn.write("/f", b"!", 5), 1);
        assert_eq!(txn.read_buffer("/f", 0, 100), Some(b"hello!".to_vec()));
        assert_eq!(txn.content("/f"), None);
    }

    #[test]
    fn test_dirty_buffer_never_expires() {
        let (cache, clock) = cache(Duration::from_secs(1));
        cache.lock().write("/f", b"data", 0);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(cache.lock().read_buffer("/f", 1, 2), Some(b"at".to_vec()));
    }

    #[test]
    fn test_commit_turns_buffer_into_clean_content() {
        let (cache, _) = cache(DEFAULT_TTL);
        let mut txn = cache.lock();
        txn.write("/f", b"data", 0);
        let snap = txn.snapshot("/f").unwrap();
        assert!(txn.commit("/f", snap.version));
        assert!(!txn.has_buffer("/f"));
        assert_eq!(txn.read_content("/f", 2, 10), Some(b"ta".to_vec()));
    }

    #[test]
    fn test_capacity_evicts_clean_entries_only() {
        let clock = Arc::new(ManualClock::new());
        let cache = Cache::new(DEFAULT_TTL, NonZeroUsize::new(2), clock);
        let mut txn = cache.lock();
        txn.write("/dirty", b"keep", 0);
        for p in ["/a", "/b", "/c"] {
            txn.put_content(p, p.as_bytes().to_vec());
        }
        assert_eq!(txn.content("/a"), None);
        assert!(txn.content("/c").is_some());
        assert_eq!(txn.buffer_stat("/dirty").map(|(len, _)| len), Some(4));
    }

    #[test]
    fn test_slice_clamps() {
        assert_eq!(slice(b"hello", 3, 10), b"lo");
        assert_eq!(slice(b"hello", 5, 1), b"");
        assert_eq!(slice(b"hello", 1, usize::MAX), b"ello");
    }
}
