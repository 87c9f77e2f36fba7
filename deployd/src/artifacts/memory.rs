//! In-memory artifact backend

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::artifacts::ArtifactStore;
use crate::errors::DeployError;

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// Artifact store held in process memory, with injectable failures
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failing_suffixes: RwLock<Vec<String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put whose key ends with `suffix` fail
    pub fn fail_keys_ending_with(&self, suffix: impl Into<String>) {
        let mut failing = self
            .failing_suffixes
            .write()
            .unwrap_or_else(|e| e.into_inner());
        failing.push(suffix.into());
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(key).cloned()
    }

    /// All stored keys in lexical order
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), DeployError> {
        let should_fail = {
            let failing = self
                .failing_suffixes
                .read()
                .unwrap_or_else(|e| e.into_inner());
            failing.iter().any(|suffix| key.ends_with(suffix.as_str()))
        };
        if should_fail {
            return Err(DeployError::StorageError(format!(
                "injected failure for {key}"
            )));
        }

        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
