//! Path-based filesystem operations over the remote drive.
//!
//! Each handler answers from the cache when it can, falls back to the
//! resolver and the drive otherwise, and always returns an [`FsError`]
//! rather than a raw remote fault. Writes stay in memory until `release`
//! uploads the whole file.

use crate::attr::Attr;
use crate::cache::{Cache, Clock, Slots, SystemClock};
use crate::client::DriveService;
use crate::error::{FsError, FsResult};
use crate::handles::HandleTable;
use crate::resolver::{is_root, join_path, split_parent, ResolveMode, Resolver};
use log::{debug, error, info};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Pseudo-entries that open every listing.
const DOT_ENTRIES: [&str; 2] = [".", ".."];

/// Filesystem capacity figures. The drive exposes no quota data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u32,
    pub fragment_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u32,
}

impl StatFs {
    pub const PLACEHOLDER: StatFs = StatFs {
        block_size: 4096,
        fragment_size: 4096,
        blocks: 1_000_000,
        blocks_free: 800_000,
        blocks_available: 800_000,
        files: 1_000_000,
        files_free: 800_000,
        name_max: 255,
    };
}

/// Node kinds `create_node` can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    RegularFile,
    Other,
}

impl NodeKind {
    /// Classify a `mknod` mode.
    pub fn from_mode(mode: u32) -> Self {
        if mode & libc::S_IFMT as u32 == libc::S_IFREG as u32 {
            Self::RegularFile
        } else {
            Self::Other
        }
    }
}

/// Tunables for one mounted session.
#[derive(Debug, Clone)]
pub struct FsOptions {
    pub cache_ttl: Duration,
    pub cache_capacity: Option<NonZeroUsize>,
    pub resolve_mode: ResolveMode,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            cache_ttl: crate::cache::DEFAULT_TTL,
            cache_capacity: None,
            resolve_mode: ResolveMode::default(),
        }
    }
}

/// One mounted drive session. All mutable state lives here.
pub struct DriveFs {
    resolver: Resolver,
    cache: Cache,
    handles: HandleTable,
}

impl DriveFs {
    pub fn new(drive: Arc<dyn DriveService>, options: FsOptions) -> Self {
        Self::with_clock(drive, options, Arc::new(SystemClock))
    }

    pub fn with_clock(drive: Arc<dyn DriveService>, options: FsOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: Resolver::new(drive, options.resolve_mode),
            cache: Cache::new(options.cache_ttl, options.cache_capacity, clock),
            handles: HandleTable::new(),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    fn drive(&self) -> &dyn DriveService {
        self.resolver.drive()
    }

    /// Attributes of `path`.
    pub fn stat(&self, path: &str) -> FsResult<Attr> {
        debug!("stat: {}", path);
        let now = SystemTime::now();
        {
            let mut cache = self.cache.lock();
            if let Some((len, modified)) = cache.buffer_stat(path) {
                // unreleased content is the truth until it is uploaded
                return Ok(Attr::file(len as u64, modified, modified));
            }
            if let Some(attr) = cache.attr(path) {
                return Ok(attr);
            }
            if is_root(path) {
                let attr = Attr::root(now);
                cache.put_attr(path, attr);
                return Ok(attr);
            }
        }

        let item = self.resolver.resolve(path)?;
        let attr = Attr::from_item(&item, now);
        self.cache.lock().put_attr(path, attr);
        Ok(attr)
    }

    /// Entry names of the folder at `path`, starting with `.` and `..`.
    pub fn list(&self, path: &str) -> FsResult<Vec<String>> {
        debug!("list: {}", path);
        if let Some(entries) = self.cache.lock().listing(path) {
            return Ok(entries);
        }

        let item = self.resolver.resolve(path)?;
        if !item.is_folder() {
            return Err(FsError::NotADirectory);
        }

        let children = self.drive().children(&item).map_err(|e| {
            error!("Error listing directory {}: {}", path, e);
            FsError::from(e)
        })?;

        let now = SystemTime::now();
        let descend = self.resolver.mode() == ResolveMode::Descend;
        let mut entries: Vec<String> = DOT_ENTRIES.iter().map(|s| s.to_string()).collect();
        let mut cache = self.cache.lock();
        for child in children {
            // a listed child is as good as a resolution of its path
            if descend {
                cache.put_attr(&join_path(path, &child.name), Attr::from_item(&child, now));
            }
            entries.push(child.name);
        }
        cache.put_listing(path, entries.clone());
        Ok(entries)
    }

    /// Check `path` exists and hand out a handle id for it.
    pub fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        debug!("open: {}, flags: {:#o}", path, flags);
        if !self.cache.lock().has_buffer(path) {
            self.resolver.resolve(path)?;
        }
        let fh = self.handles.allocate(path);
        debug!("open: {} -> fh {}", path, fh);
        Ok(fh)
    }

    /// Up to `size` bytes of `path` starting at `offset`.
    pub fn read(&self, path: &str, size: usize, offset: usize) -> FsResult<Vec<u8>> {
        debug!("read: {}, size: {}, offset: {}", path, size, offset);
        {
            let mut cache = self.cache.lock();
            if let Some(data) = cache.read_buffer(path, offset, size) {
                return Ok(data);
            }
            if let Some(data) = cache.read_content(path, offset, size) {
                return Ok(data);
            }
        }

        let content = self.download(path)?;
        let end = offset.saturating_add(size).min(content.len());
        let data = content.get(offset..end).map(<[u8]>::to_vec).unwrap_or_default();
        self.cache.lock().put_content(path, content);
        Ok(data)
    }

    /// Full remote content of `path`.
    fn download(&self, path: &str) -> FsResult<Vec<u8>> {
        let item = self.resolver.resolve(path)?;
        self.drive().download(&item).map_err(|e| {
            error!("Error reading file {}: {}", path, e);
            FsError::from(e)
        })
    }

    /// Stage `data` at `offset` in the write buffer for `path`.
    pub fn write(&self, path: &str, data: &[u8], offset: usize) -> FsResult<usize> {
        debug!("write: {}, offset: {}, size: {}", path, offset, data.len());
        let mut cache = self.cache.lock();
        let written = cache.write(path, data, offset);
        cache.invalidate(path, Slots::ATTR);
        Ok(written)
    }

    /// Upload happens on release, so there is nothing to flush.
    pub fn flush(&self, path: &str) -> FsResult<()> {
        debug!("flush: {}", path);
        Ok(())
    }

    /// Upload pending content for `path` and close its handles.
    pub fn release(&self, path: &str, flags: i32) -> FsResult<()> {
        debug!("release: {}, flags: {:#o}", path, flags);

        let pending = self.cache.lock().snapshot(path);
        if let Some(snapshot) = pending {
            let (parent_path, name) = split_parent(path);
            let parent = self.resolver.resolve(&parent_path)?;

            self.drive()
                .upload(&parent, &name, &snapshot.data)
                .map_err(|e| {
                    error!("Error uploading {}: {}", path, e);
                    FsError::from(e)
                })?;
            info!("Uploaded {} ({} bytes)", path, snapshot.data.len());

            let mut cache = self.cache.lock();
            if !cache.commit(path, snapshot.version) {
                debug!("release: {} changed during upload, staying dirty", path);
            }
            cache.invalidate(path, Slots::ATTR);
            cache.invalidate(&parent_path, Slots::LISTING);
        }

        let closed = self.handles.release_path(path);
        debug!("release: closed {} handle(s) for {}", closed, path);
        Ok(())
    }

    /// Create a folder at `path`.
    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        debug!("mkdir: {}, mode: {:#o}", path, mode);
        let (parent_path, name) = split_parent(path);
        let parent = self.resolver.resolve(&parent_path)?;

        self.drive().create_folder(&parent, &name).map_err(|e| {
            error!("Error creating directory {}: {}", path, e);
            FsError::from(e)
        })?;

        let mut cache = self.cache.lock();
        cache.invalidate(&parent_path, Slots::LISTING);
        cache.invalidate(path, Slots::ATTR | Slots::LISTING);
        Ok(())
    }

    /// Remove the empty folder at `path`.
    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        debug!("rmdir: {}", path);
        let item = self.resolver.resolve(path)?;
        if !item.is_folder() {
            return Err(FsError::NotADirectory);
        }

        let children = self.drive().children(&item).map_err(|e| {
            error!("Error listing directory {}: {}", path, e);
            FsError::from(e)
        })?;
        if !children.is_empty() {
            return Err(FsError::NotEmpty);
        }

        self.drive().delete(&item).map_err(|e| {
            error!("Error removing directory {}: {}", path, e);
            FsError::from(e)
        })?;

        let (parent_path, _) = split_parent(path);
        let mut cache = self.cache.lock();
        cache.invalidate(path, Slots::LISTING | Slots::ATTR);
        cache.invalidate(&parent_path, Slots::LISTING);
        Ok(())
    }

    /// Delete the file at `path`.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        debug!("unlink: {}", path);
        let (parent_path, _) = split_parent(path);

        match self.resolver.resolve(path) {
            Ok(item) => {
                self.drive().delete(&item).map_err(|e| {
                    error!("Error removing file {}: {}", path, e);
                    FsError::from(e)
                })?;
            }
            // never uploaded: only the local buffer exists
            Err(FsError::NotFound) if self.cache.lock().has_buffer(path) => {}
            Err(e) => return Err(e),
        }

        let mut cache = self.cache.lock();
        cache.invalidate(path, Slots::CONTENT | Slots::ATTR);
        cache.invalidate(&parent_path, Slots::LISTING);
        Ok(())
    }

    /// Move the file at `old` to `new` by copying it and deleting the original.
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        debug!("rename: {} -> {}", old, new);
        let source = match self.resolver.resolve(old) {
            Ok(item) => Some(item),
            // never uploaded: the buffer moves and there is nothing remote to delete
            Err(FsError::NotFound) if self.cache.lock().has_buffer(old) => None,
            Err(e) => return Err(e),
        };
        let (new_parent_path, new_name) = split_parent(new);
        let new_parent = self.resolver.resolve(&new_parent_path)?;

        if matches!(&source, Some(item) if item.is_folder()) {
            return Err(FsError::NotSupported);
        }

        let pending = self.cache.lock().snapshot(old).map(|s| s.data);
        let content = match (pending, &source) {
            (Some(data), _) => data,
            (None, Some(item)) => self.drive().download(item).map_err(|e| {
                error!("Error reading {} for rename: {}", old, e);
                FsError::from(e)
            })?,
            (None, None) => return Err(FsError::NotFound),
        };

        self.drive()
            .upload(&new_parent, &new_name, &content)
            .map_err(|e| {
                error!("Error renaming {} to {}: {}", old, new, e);
                FsError::from(e)
            })?;
        if let Some(item) = &source {
            self.drive().delete(item).map_err(|e| {
                error!("Error removing {} after copy to {}: {}", old, new, e);
                FsError::from(e)
            })?;
        }

        let (old_parent_path, _) = split_parent(old);
        let mut cache = self.cache.lock();
        cache.invalidate(old, Slots::ALL);
        cache.invalidate(&old_parent_path, Slots::LISTING);
        cache.invalidate(&new_parent_path, Slots::LISTING);
        cache.invalidate(new, Slots::ATTR | Slots::CONTENT);
        drop(cache);

        self.handles.rename_path(old, new);
        Ok(())
    }

    /// Shrink or zero-extend `path` to `length` bytes.
    pub fn truncate(&self, path: &str, length: usize) -> FsResult<()> {
        debug!("truncate: {}, length: {}", path, length);
        {
            let mut cache = self.cache.lock();
            if cache.truncate_buffer(path, length) {
                cache.invalidate(path, Slots::ATTR);
                return Ok(());
            }
        }

        let cached = self.cache.lock().content(path);
        let mut content = match cached {
            Some(content) => content,
            None => self.download(path)?,
        };
        crate::write_buffer::resize(&mut content, length);

        let mut cache = self.cache.lock();
        cache.set_buffer(path, content);
        cache.invalidate(path, Slots::ATTR);
        Ok(())
    }

    /// Create a node at `path`. Only regular files are supported.
    pub fn create_node(&self, path: &str, kind: NodeKind) -> FsResult<()> {
        debug!("create_node: {}, kind: {:?}", path, kind);
        if kind != NodeKind::RegularFile {
            return Err(FsError::NotSupported);
        }
        let mut cache = self.cache.lock();
        cache.set_buffer(path, Vec::new());
        cache.invalidate(path, Slots::ATTR);
        Ok(())
    }

    /// The drive cannot store timestamps; accept and ignore them.
    pub fn set_times(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> FsResult<()> {
        debug!("set_times: {}, atime: {:?}, mtime: {:?}", path, atime, mtime);
        Ok(())
    }

    pub fn statfs(&self) -> StatFs {
        debug!("statfs");
        StatFs::PLACEHOLDER
    }
}
