//! Uncommitted file content, staged in memory until release uploads it.
//!
//! A write does not overwrite in place. Writing at offset 0 replaces the
//! buffer, writing inside it cuts everything from the offset on, and
//! writing at or past the end zero-fills the gap and appends.

use std::collections::HashMap;
use std::time::SystemTime;

/// Apply one write to `buffer`.
pub fn splice(buffer: &mut Vec<u8>, data: &[u8], offset: usize) {
    if offset < buffer.len() {
        // offset 0 lands here too and empties the buffer
        buffer.truncate(offset);
    } else {
        buffer.resize(offset, 0);
    }
    buffer.extend_from_slice(data);
}

/// Shrink or zero-pad `buffer` to `length`.
pub fn resize(buffer: &mut Vec<u8>, length: usize) {
    buffer.resize(length, 0);
}

/// Content for one path that has not been uploaded yet.
#[derive(Debug, Clone)]
pub struct DirtyBuffer {
    pub data: Vec<u8>,
    /// Wall-clock time of the last change, reported as the file's mtime.
    pub modified: SystemTime,
    /// Bumped on every change, so an upload of an older snapshot cannot mark newer writes clean.
    pub version: u64,
}

/// Snapshot handed to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub version: u64,
}

/// Dirty buffers by path. Never evicted; they leave only through commit or discard.
#[derive(Debug, Default)]
pub struct WriteBuffers {
    dirty: HashMap<String, DirtyBuffer>,
    next_version: u64,
}

impl WriteBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.dirty.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&DirtyBuffer> {
        self.dirty.get(path)
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Write `data` at `offset`, starting from `base` when no dirty buffer exists yet.
    pub fn write(
        &mut self,
        path: &str,
        base: Option<Vec<u8>>,
        data: &[u8],
        offset: usize,
        now: SystemTime,
    ) -> usize {
        let version = self.bump();
        let entry = self
            .dirty
            .entry(path.to_string())
            .or_insert_with(|| DirtyBuffer {
                data: base.unwrap_or_default(),
                modified: now,
                version,
            });
        splice(&mut entry.data, data, offset);
        entry.modified = now;
        entry.version = version;
        data.len()
    }

    /// Replace the buffer for `path` wholesale.
    pub fn set(&mut self, path: &str, data: Vec<u8>, now: SystemTime) {
        let version = self.bump();
        self.dirty.insert(
            path.to_string(),
            DirtyBuffer {
                data,
                modified: now,
                version,
            },
        );
    }

    /// Resize an existing buffer. Returns false when `path` has none.
    pub fn truncate(&mut self, path: &str, length: usize, now: SystemTime) -> bool {
        let version = self.bump();
        match self.dirty.get_mut(path) {
            Some(entry) => {
                resize(&mut entry.data, length);
                entry.modified = now;
                entry.version = version;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, path: &str) -> Option<Snapshot> {
        self.dirty.get(path).map(|b| Snapshot {
            data: b.data.clone(),
            version: b.version,
        })
    }

    /// Drop the buffer if it is still at `version`, returning its data.
    pub fn commit(&mut self, path: &str, version: u64) -> Option<Vec<u8>> {
        match self.dirty.get(path) {
            Some(b) if b.version == version => self.dirty.remove(path).map(|b| b.data),
            _ => None,
        }
    }

    pub fn discard(&mut self, path: &str) -> Option<Vec<u8>> {
        self.dirty.remove(path).map(|b| b.data)
    }
}
