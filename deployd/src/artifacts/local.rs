//! Filesystem artifact backend for single-node setups

use std::path::{Component, Path};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::artifacts::ArtifactStore;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// Writes objects as files below a root directory
pub struct LocalArtifactStore {
    root: Dir,
}

impl LocalArtifactStore {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), DeployError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(DeployError::StorageError(format!(
                "Object key escapes the store root: {key}"
            )));
        }

        debug!("Writing {} ({})", key, content_type);
        self.root.file_at(relative).write_bytes(&data).await
    }
}
