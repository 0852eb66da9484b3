//! Mount configuration assembled from the command line.

use crate::fs::FsOptions;
use crate::resolver::ResolveMode;
use anyhow::{anyhow, Result};
use log::info;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the remote items come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Drive gateway at `url`, authenticated with a bearer token.
    Remote { url: String, token: String },
    /// Empty in-memory drive, for trying a mount without an account.
    Memory,
}

#[derive(Debug, Clone)]
pub struct MountConfig {
    pub mount_point: PathBuf,
    pub backend: Backend,
    /// Accepted and created at startup; all caching is in memory.
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cache_capacity: Option<NonZeroUsize>,
    pub resolve_mode: ResolveMode,
    pub allow_other: bool,
}

impl MountConfig {
    /// `~/.cache/clouddrive-fuse` or the platform equivalent.
    pub fn default_cache_dir() -> Result<PathBuf> {
        Ok(dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not determine cache directory"))?
            .join("clouddrive-fuse"))
    }

    /// Pick the backend from the CLI values. A URL needs a token.
    pub fn backend(url: Option<String>, token: Option<String>, memory: bool) -> Result<Backend> {
        if memory {
            return Ok(Backend::Memory);
        }
        match (url, token) {
            (Some(url), Some(token)) => Ok(Backend::Remote { url, token }),
            (Some(_), None) => Err(anyhow!("--token (or CLOUDDRIVE_TOKEN) is required with --url")),
            (None, _) => Err(anyhow!("either --url or --memory is required")),
        }
    }

    pub fn fs_options(&self) -> FsOptions {
        FsOptions {
            cache_ttl: self.cache_ttl,
            cache_capacity: self.cache_capacity,
            resolve_mode: self.resolve_mode,
        }
    }

    /// Make sure the cache directory exists.
    pub fn prepare_cache_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.cache_dir)?;
        info!("Cache directory: {}", self.cache_dir.display());
        Ok(&self.cache_dir)
    }
}
