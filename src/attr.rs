//! POSIX attribute records derived from drive items.

use crate::client::{DriveItem, ItemKind};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Size reported for files whose item carries no size.
pub const DEFAULT_FILE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Directory,
    RegularFile,
}

/// Attribute record for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub kind: AttrKind,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

fn owner() -> (u32, u32) {
    // SAFETY: getuid/getgid cannot fail and touch no memory
    unsafe { (libc::getuid(), libc::getgid()) }
}

/// Truncate to whole seconds, the resolution the drive reports.
fn whole_seconds(t: SystemTime) -> SystemTime {
    let secs = t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(secs)
}

impl Attr {
    fn directory(nlink: u32, now: SystemTime) -> Self {
        let now = whole_seconds(now);
        let (uid, gid) = owner();
        Self {
            kind: AttrKind::Directory,
            perm: 0o755,
            nlink,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            uid,
            gid,
        }
    }

    /// The mount root.
    pub fn root(now: SystemTime) -> Self {
        Self::directory(2, now)
    }

    /// A regular file of `size` bytes modified at `mtime`.
    pub fn file(size: u64, mtime: SystemTime, now: SystemTime) -> Self {
        let mtime = whole_seconds(mtime);
        let (uid, gid) = owner();
        Self {
            kind: AttrKind::RegularFile,
            perm: 0o644,
            nlink: 1,
            size,
            atime: whole_seconds(now),
            mtime,
            ctime: mtime,
            uid,
            gid,
        }
    }

    /// Record for a resolved item.
    pub fn from_item(item: &DriveItem, now: SystemTime) -> Self {
        match item.path_type() {
            ItemKind::Folder => Self::directory(3, now),
            ItemKind::File => {
                let mtime = item
                    .modified
                    .and_then(|dt| u64::try_from(dt.timestamp()).ok())
                    .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
                    .unwrap_or(now);
                Self::file(item.size.unwrap_or(DEFAULT_FILE_SIZE), mtime, now)
            }
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == AttrKind::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(kind: Option<ItemKind>, size: Option<u64>) -> DriveItem {
        DriveItem {
            id: "id".to_string(),
            name: "x".to_string(),
            kind,
            size,
            modified: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
            listable: false,
        }
    }

    #[test]
    fn test_root_record() {
        let attr = Attr::root(SystemTime::now());
        assert!(attr.is_dir());
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_folder_record() {
        let attr = Attr::from_item(&item(Some(ItemKind::Folder), Some(99)), SystemTime::now());
        assert!(attr.is_dir());
        assert_eq!(attr.nlink, 3);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_file_record_uses_item_metadata() {
        let attr = Attr::from_item(&item(Some(ItemKind::File), Some(12)), SystemTime::now());
        assert_eq!(attr.kind, AttrKind::RegularFile);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 12);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1_709_296_200));
        assert_eq!(attr.ctime, attr.mtime);
    }

    #[test]
    fn test_file_record_defaults() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let mut bare = item(None, None);
        bare.modified = None;
        let attr = Attr::from_item(&bare, now);
        assert_eq!(attr.size, DEFAULT_FILE_SIZE);
        assert_eq!(attr.mtime, now);
    }
}
