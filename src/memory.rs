//! In-memory drive service.
//!
//! Backs `--memory` dry-run mounts and the test suite. Item ids are the
//! item's absolute path. A recording drive logs every call so tests can
//! check exactly which remote operations a filesystem call caused.

use crate::client::{DriveItem, DriveService, ItemKind};
use crate::error::DriveError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveCall {
    Root,
    Children { folder: String },
    Download { item: String },
    CreateFolder { parent: String, name: String },
    Upload { parent: String, name: String, content: Vec<u8> },
    Delete { item: String },
}

impl DriveCall {
    /// Whether the call changes remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateFolder { .. } | Self::Upload { .. } | Self::Delete { .. }
        )
    }
}

#[derive(Debug)]
struct Node {
    kind: ItemKind,
    content: Vec<u8>,
    children: Vec<String>,
    modified: DateTime<Utc>,
}

#[derive(Debug)]
struct State {
    nodes: HashMap<String, Node>,
    calls: Vec<DriveCall>,
}

/// Drive tree held entirely in memory.
#[derive(Debug)]
pub struct MemoryDrive {
    state: Mutex<State>,
    offline: AtomicBool,
    fail_uploads: AtomicBool,
    record_calls: bool,
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn split(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(i) => (trimmed[..i].to_string(), trimmed[i + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

impl MemoryDrive {
    /// Empty drive that keeps no call log.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Empty drive that logs every call for [`MemoryDrive::calls`].
    pub fn recording() -> Self {
        Self::build(true)
    }

    fn build(record_calls: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                kind: ItemKind::Folder,
                content: Vec::new(),
                children: Vec::new(),
                modified: Utc::now(),
            },
        );
        Self {
            state: Mutex::new(State {
                nodes,
                calls: Vec::new(),
            }),
            offline: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            record_calls,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a folder, creating missing ancestors.
    pub fn add_folder(&self, path: &str) {
        let mut state = self.lock();
        Self::insert(&mut state, path, ItemKind::Folder, Vec::new());
    }

    /// Add a file, creating missing ancestors.
    pub fn add_file(&self, path: &str, content: &[u8]) {
        let mut state = self.lock();
        Self::insert(&mut state, path, ItemKind::File, content.to_vec());
    }

    fn insert(state: &mut State, path: &str, kind: ItemKind, content: Vec<u8>) {
        let (parent, name) = split(path);
        if !state.nodes.contains_key(&parent) {
            Self::insert(state, &parent, ItemKind::Folder, Vec::new());
        }
        let id = join(&parent, &name);
        if let Some(node) = state.nodes.get_mut(&parent) {
            if !node.children.contains(&name) {
                node.children.push(name);
            }
        }
        state.nodes.insert(
            id,
            Node {
                kind,
                content,
                children: Vec::new(),
                modified: Utc::now(),
            },
        );
    }

    fn remove(state: &mut State, id: &str) {
        if let Some(node) = state.nodes.remove(id) {
            for child in node.children {
                Self::remove(state, &join(id, &child));
            }
        }
        let (parent, name) = split(id);
        if let Some(node) = state.nodes.get_mut(&parent) {
            node.children.retain(|c| c != &name);
        }
    }

    /// Make every subsequent call fail as if the gateway were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make uploads fail with a server error.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// All calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<DriveCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current content of the file at `path`.
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state
            .nodes
            .get(path)
            .filter(|n| n.kind == ItemKind::File)
            .map(|n| n.content.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    fn record(&self, call: DriveCall) -> Result<MutexGuard<'_, State>, DriveError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DriveError::ConnectionRefused("memory drive offline".to_string()));
        }
        let mut state = self.lock();
        if self.record_calls {
            state.calls.push(call);
        }
        Ok(state)
    }

    fn item(id: &str, node: &Node) -> DriveItem {
        let name = if id == "/" { String::new() } else { split(id).1 };
        DriveItem {
            id: id.to_string(),
            name,
            kind: Some(node.kind),
            size: match node.kind {
                ItemKind::File => Some(node.content.len() as u64),
                ItemKind::Folder => None,
            },
            modified: Some(node.modified),
            listable: node.kind == ItemKind::Folder,
        }
    }
}

impl DriveService for MemoryDrive {
    fn root(&self) -> Result<DriveItem, DriveError> {
        let state = self.record(DriveCall::Root)?;
        let node = state
            .nodes
            .get("/")
            .ok_or_else(|| DriveError::NotFound("/".to_string()))?;
        Ok(Self::item("/", node))
    }

    fn children(&self, folder: &DriveItem) -> Result<Vec<DriveItem>, DriveError> {
        let state = self.record(DriveCall::Children {
            folder: folder.id.clone(),
        })?;
        let node = state
            .nodes
            .get(&folder.id)
            .ok_or_else(|| DriveError::NotFound(folder.id.clone()))?;
        if node.kind != ItemKind::Folder {
            return Err(DriveError::InvalidResponse(format!("{} is not a folder", folder.id)));
        }
        Ok(node
            .children
            .iter()
            .filter_map(|name| {
                let id = join(&folder.id, name);
                state.nodes.get(&id).map(|child| Self::item(&id, child))
            })
            .collect())
    }

    fn download(&self, item: &DriveItem) -> Result<Vec<u8>, DriveError> {
        let state = self.record(DriveCall::Download {
            item: item.id.clone(),
        })?;
        match state.nodes.get(&item.id) {
            Some(node) if node.kind == ItemKind::File => Ok(node.content.clone()),
            Some(_) => Err(DriveError::InvalidResponse(format!("{} is a folder", item.id))),
            None => Err(DriveError::NotFound(item.id.clone())),
        }
    }

    fn create_folder(&self, parent: &DriveItem, name: &str) -> Result<(), DriveError> {
        let mut state = self.record(DriveCall::CreateFolder {
            parent: parent.id.clone(),
            name: name.to_string(),
        })?;
        if !state.nodes.contains_key(&parent.id) {
            return Err(DriveError::NotFound(parent.id.clone()));
        }
        let id = join(&parent.id, name);
        if state.nodes.contains_key(&id) {
            return Err(DriveError::ServerError {
                status: 409,
                message: format!("{} already exists", id),
            });
        }
        Self::insert(&mut state, &id, ItemKind::Folder, Vec::new());
        Ok(())
    }

    fn upload(&self, parent: &DriveItem, name: &str, content: &[u8]) -> Result<(), DriveError> {
        let mut state = self.record(DriveCall::Upload {
            parent: parent.id.clone(),
            name: name.to_string(),
            content: content.to_vec(),
        })?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(DriveError::ServerError {
                status: 503,
                message: "upload rejected".to_string(),
            });
        }
        if !state.nodes.contains_key(&parent.id) {
            return Err(DriveError::NotFound(parent.id.clone()));
        }
        let id = join(&parent.id, name);
        if matches!(state.nodes.get(&id), Some(n) if n.kind == ItemKind::Folder) {
            return Err(DriveError::ServerError {
                status: 409,
                message: format!("{} is a folder", id),
            });
        }
        Self::insert(&mut state, &id, ItemKind::File, content.to_vec());
        Ok(())
    }

    fn delete(&self, item: &DriveItem) -> Result<(), DriveError> {
        let mut state = self.record(DriveCall::Delete {
            item: item.id.clone(),
        })?;
        if !state.nodes.contains_key(&item.id) {
            return Err(DriveError::NotFound(item.id.clone()));
        }
        Self::remove(&mut state, &item.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_operations() {
        let drive = MemoryDrive::new();
        drive.add_file("/docs/a.txt", b"hi");

        let root = drive.root().unwrap();
        let docs = drive.child(&root, "docs").unwrap().unwrap();
        assert!(docs.is_folder());

        let a = drive.child(&docs, "a.txt").unwrap().unwrap();
        assert_eq!(a.size, Some(2));
        assert_eq!(drive.download(&a).unwrap(), b"hi");

        drive.delete(&docs).unwrap();
        assert!(!drive.exists("/docs"));
        assert!(!drive.exists("/docs/a.txt"));
        assert!(drive.children(&root).unwrap().is_empty());
    }

    #[test]
    fn test_calls_are_recorded() {
        let drive = MemoryDrive::recording();
        let root = drive.root().unwrap();
        drive.upload(&root, "x", b"1").unwrap();

        assert_eq!(
            drive.calls(),
            vec![
                DriveCall::Root,
                DriveCall::Upload {
                    parent: "/".to_string(),
                    name: "x".to_string(),
                    content: b"1".to_vec(),
                },
            ]
        );
        assert!(drive.calls()[1].is_mutation());
    }

    #[test]
    fn test_plain_drive_keeps_no_call_log() {
        let drive = MemoryDrive::new();
        let root = drive.root().unwrap();
        for i in 0..10 {
            drive.upload(&root, &format!("f{}", i), &[0u8; 1024]).unwrap();
        }
        assert!(drive.calls().is_empty());
        assert_eq!(drive.content("/f9").unwrap().len(), 1024);
    }

    #[test]
    fn test_offline_fails_every_call() {
        let drive = MemoryDrive::recording();
        drive.set_offline(true);
        assert!(matches!(drive.root(), Err(DriveError::ConnectionRefused(_))));
        assert!(drive.calls().is_empty());
    }
}
