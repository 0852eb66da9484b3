//! Path to drive-item resolution.
//!
//! Nothing is cached here; every call walks the remote tree again.

use crate::client::{DriveItem, DriveService, ItemKind};
use crate::error::{DriveError, FsError, FsResult};
use clap::ValueEnum;
use log::{debug, error};
use std::sync::Arc;

/// How multi-segment paths are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResolveMode {
    /// Walk down one level per segment.
    #[default]
    Descend,
    /// Match each segment against the root's children only, returning the
    /// first segment that matches. Any deeper path resolves to a top-level item.
    TopLevel,
}

pub struct Resolver {
    drive: Arc<dyn DriveService>,
    mode: ResolveMode,
}

/// Split a path into its name segments, ignoring empty ones.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn is_root(path: &str) -> bool {
    segments(path).is_empty()
}

/// Join parent path with child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent path and final name. The parent of a top-level entry is `/`.
pub fn split_parent(path: &str) -> (String, String) {
    let mut parts = segments(path);
    let name = parts.pop().unwrap_or_default().to_string();
    (format!("/{}", parts.join("/")), name)
}

impl Resolver {
    pub fn new(drive: Arc<dyn DriveService>, mode: ResolveMode) -> Self {
        Self { drive, mode }
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    pub fn drive(&self) -> &dyn DriveService {
        self.drive.as_ref()
    }

    /// Resolve `path`. Absent items are `NotFound`, remote faults are `Io`.
    pub fn resolve(&self, path: &str) -> FsResult<DriveItem> {
        debug!("resolve: {}", path);
        let found = match self.mode {
            ResolveMode::Descend => self.descend(path),
            ResolveMode::TopLevel => self.top_level(path),
        };
        match found {
            Ok(Some(item)) => Ok(item),
            Ok(None) => Err(FsError::NotFound),
            Err(e) if e.is_not_found() => Err(FsError::NotFound),
            Err(e) => {
                error!("Error resolving {}: {}", path, e);
                Err(e.into())
            }
        }
    }

    /// Kind of the item at `path`.
    pub fn path_type(&self, path: &str) -> FsResult<ItemKind> {
        self.resolve(path).map(|item| item.path_type())
    }

    fn descend(&self, path: &str) -> Result<Option<DriveItem>, DriveError> {
        let mut current = self.drive.root()?;
        for segment in segments(path) {
            if !current.is_folder() {
                return Ok(None);
            }
            match self.drive.child(&current, segment)? {
                Some(item) => current = item,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn top_level(&self, path: &str) -> Result<Option<DriveItem>, DriveError> {
        let root = self.drive.root()?;
        let parts = segments(path);
        if parts.is_empty() {
            return Ok(Some(root));
        }
        for segment in parts {
            if let Some(item) = self.drive.child(&root, segment)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDrive;

    fn drive() -> Arc<MemoryDrive> {
        let drive = Arc::new(MemoryDrive::new());
        drive.add_file("/docs/a.txt", b"a");
        drive.add_file("/docs/deep/b.txt", b"b");
        drive.add_file("/top.txt", b"t");
        drive
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/docs/a.txt"), ("/docs".to_string(), "a.txt".to_string()));
        assert_eq!(split_parent("/a.txt"), ("/".to_string(), "a.txt".to_string()));
        assert_eq!(split_parent("a/b/"), ("/a".to_string(), "b".to_string()));
        assert!(is_root("/"));
        assert!(is_root(""));
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/docs", "a"), "/docs/a");
    }

    #[test]
    fn test_descend_walks_levels() {
        let resolver = Resolver::new(drive(), ResolveMode::Descend);
        assert_eq!(resolver.resolve("/docs/deep/b.txt").unwrap().id, "/docs/deep/b.txt");
        assert_eq!(resolver.resolve("/").unwrap().id, "/");
        assert_eq!(resolver.resolve("/docs/missing"), Err(FsError::NotFound));
        assert_eq!(resolver.resolve("/top.txt/x"), Err(FsError::NotFound));
        assert_eq!(resolver.path_type("/docs"), Ok(ItemKind::Folder));
    }

    #[test]
    fn test_top_level_matches_root_children_only() {
        let resolver = Resolver::new(drive(), ResolveMode::TopLevel);
        // first matching segment wins, deeper segments are never consulted
        assert_eq!(resolver.resolve("/docs/a.txt").unwrap().id, "/docs");
        assert_eq!(resolver.resolve("/nope/top.txt").unwrap().id, "/top.txt");
        assert_eq!(resolver.resolve("/nope/a.txt"), Err(FsError::NotFound));
    }

    #[test]
    fn test_remote_fault_is_io() {
        let d = drive();
        let resolver = Resolver::new(d.clone(), ResolveMode::Descend);
        d.set_offline(true);
        assert!(matches!(resolver.resolve("/docs"), Err(FsError::Io(_))));
    }
}
