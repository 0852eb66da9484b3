//! Mount a remote cloud drive as a local FUSE filesystem.
//!
//! [`fs::DriveFs`] holds the session: path resolution, the attribute /
//! listing / content cache, the handle table and the write buffers.
//! [`fuse::DriveFuse`] adapts it to the kernel's inode-based protocol.

pub mod attr;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod handles;
pub mod memory;
pub mod resolver;
pub mod write_buffer;
