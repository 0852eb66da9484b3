//! FUSE bridge: maps kernel inodes to paths and forwards to [`DriveFs`].

use crate::attr::{Attr, AttrKind};
use crate::fs::{DriveFs, NodeKind};
use crate::resolver::{join_path, split_parent};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::{ENOENT, ENOTDIR};
use log::{debug, info};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

/// Kernel-side attribute TTL. Kept short so the drive cache stays authoritative.
const KERNEL_TTL: Duration = Duration::from_secs(1);

/// Default block size.
const BLOCK_SIZE: u32 = 512;

/// Two-way inode/path mapping. Inodes are handed out on first sight of a path.
#[derive(Debug)]
pub struct InodeTable {
    inode_to_path: HashMap<u64, String>,
    path_to_inode: HashMap<String, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            inode_to_path: HashMap::new(),
            path_to_inode: HashMap::new(),
            next_inode: FUSE_ROOT_ID + 1,
        };
        table.inode_to_path.insert(FUSE_ROOT_ID, "/".to_string());
        table.path_to_inode.insert("/".to_string(), FUSE_ROOT_ID);
        table
    }

    pub fn get_or_create(&mut self, path: &str) -> u64 {
        if let Some(&inode) = self.path_to_inode.get(path) {
            return inode;
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), inode);
        self.inode_to_path.insert(inode, path.to_string());
        inode
    }

    pub fn path(&self, inode: u64) -> Option<String> {
        self.inode_to_path.get(&inode).cloned()
    }

    /// Re-point the inode of `old` (if any) at `new`.
    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(stale) = self.path_to_inode.remove(new) {
            self.inode_to_path.remove(&stale);
        }
        if let Some(inode) = self.path_to_inode.remove(old) {
            self.path_to_inode.insert(new.to_string(), inode);
            self.inode_to_path.insert(inode, new.to_string());
        }
    }
}

fn to_file_attr(ino: u64, attr: &Attr) -> FileAttr {
    let kind = match attr.kind {
        AttrKind::Directory => FileType::Directory,
        AttrKind::RegularFile => FileType::RegularFile,
    };
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind,
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn to_system_time(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// The mounted filesystem as the kernel sees it.
pub struct DriveFuse {
    fs: DriveFs,
    inodes: InodeTable,
}

impl DriveFuse {
    pub fn new(fs: DriveFs) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.inodes.path(parent)?;
        Some(join_path(&parent_path, &name.to_string_lossy()))
    }

    /// Stat `path` and reply with a new entry for it.
    fn reply_entry(&mut self, path: &str, reply: ReplyEntry) {
        match self.fs.stat(path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_create(path);
                reply.entry(&KERNEL_TTL, &to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }
}

impl Filesystem for DriveFuse {
    fn destroy(&mut self) {
        let stats = self.fs.cache().stats();
        info!(
            "Unmounting: {} cached paths, {} unreleased buffers, {} open handles",
            stats.entries,
            stats.dirty,
            self.fs.handles().len()
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup: parent={}, name={:?}", parent, name);
        match self.child_path(parent, name) {
            Some(path) => self.reply_entry(&path, reply),
            None => reply.error(ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.stat(&path) {
            Ok(attr) => reply.attr(&KERNEL_TTL, &to_file_attr(ino, &attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr: ino={}, size={:?}", ino, size);
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };

        if let Some(length) = size {
            if let Err(e) = self.fs.truncate(&path, length as usize) {
                reply.error(e.errno());
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            if let Err(e) = self.fs.set_times(&path, atime.map(to_system_time), mtime.map(to_system_time)) {
                reply.error(e.errno());
                return;
            }
        }

        match self.fs.stat(&path) {
            Ok(attr) => reply.attr(&KERNEL_TTL, &to_file_attr(ino, &attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        debug!("readdir: ino={}, offset={}", ino, offset);
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };

        let names = match self.fs.list(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let (parent_path, _) = split_parent(&path);
        let parent_ino = self.inodes.get_or_create(&parent_path);

        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(names.len());
        for name in names {
            let entry = if name == "." {
                (ino, FileType::Directory, name)
            } else if name == ".." {
                (parent_ino, FileType::Directory, name)
            } else {
                let child = join_path(&path, &name);
                let kind = match self.fs.stat(&child) {
                    Ok(attr) if attr.is_dir() => FileType::Directory,
                    _ => FileType::RegularFile,
                };
                (self.inodes.get_or_create(&child), kind, name)
            };
            entries.push(entry);
        }

        for (i, (inode, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*inode, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.stat(&path) {
            Ok(attr) if attr.is_dir() => reply.opened(0, 0),
            Ok(_) => reply.error(ENOTDIR),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.read(&path, size as usize, offset.max(0) as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.write(&path, data, offset.max(0) as usize) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.flush(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.release(&path, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create: parent={}, name={:?}", parent, name);
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let opened = self
            .fs
            .create_node(&path, NodeKind::from_mode(mode))
            .and_then(|()| self.fs.open(&path, flags))
            .and_then(|fh| self.fs.stat(&path).map(|attr| (fh, attr)));
        match opened {
            Ok((fh, attr)) => {
                let ino = self.inodes.get_or_create(&path);
                reply.created(&KERNEL_TTL, &to_file_attr(ino, &attr), 0, fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod: parent={}, name={:?}, mode={:#o}", parent, name, mode);
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.create_node(&path, NodeKind::from_mode(mode)) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.mkdir(&path, mode) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(old_path), Some(new_path)) = (self.child_path(parent, name), self.child_path(newparent, newname)) else {
            reply.error(ENOENT);
            return;
        };
        match self.fs.rename(&old_path, &new_path) {
            Ok(()) => {
                self.inodes.rename(&old_path, &new_path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let s = self.fs.statfs();
        reply.statfs(
            s.blocks,
            s.blocks_free,
            s.blocks_available,
            s.files,
            s.files_free,
            s.block_size,
            s.name_max,
            s.fragment_size,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_table() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(FUSE_ROOT_ID), Some("/".to_string()));

        let a = table.get_or_create("/a");
        assert_eq!(table.get_or_create("/a"), a);
        let b = table.get_or_create("/b");
        assert_ne!(a, b);

        // renaming over an existing path retires the target's inode
        table.rename("/a", "/b");
        assert_eq!(table.path(a), Some("/b".to_string()));
        assert_eq!(table.path(b), None);
        assert_eq!(table.get_or_create("/b"), a);
    }

    #[test]
    fn test_file_attr_conversion() {
        let attr = Attr::file(1025, SystemTime::UNIX_EPOCH, SystemTime::now());
        let fa = to_file_attr(7, &attr);
        assert_eq!(fa.ino, 7);
        assert_eq!(fa.kind, FileType::RegularFile);
        assert_eq!(fa.blocks, 3);
        assert_eq!(fa.perm, 0o644);
    }
}
