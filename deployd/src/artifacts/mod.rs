//! Durable object storage for built site files

pub mod gcs;
pub mod local;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::storage::settings::{ArtifactBackend, ArtifactSettings};

pub use gcs::GcsArtifactStore;
pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;

/// Prefix under which every project's artifact tree lives
pub const OUTPUTS_PREFIX: &str = "__outputs";

/// Object storage client
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write one object, replacing any previous object at `key`
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), DeployError>;
}

/// Object key for a file of a project's build output.
///
/// `relative_path` uses `/` separators regardless of platform.
pub fn object_key(project_id: &str, relative_path: &str) -> String {
    format!(
        "{}/{}/{}",
        OUTPUTS_PREFIX,
        project_id,
        relative_path.trim_start_matches('/')
    )
}

/// Content type inferred from a file's extension
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Open the configured backend. `default_local_dir` is used by the local
/// backend when no directory is configured.
pub fn open_store(
    settings: &ArtifactSettings,
    default_local_dir: &Path,
) -> Result<Arc<dyn ArtifactStore>, DeployError> {
    match settings.backend {
        ArtifactBackend::Gcs => {
            let token = settings
                .token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string()));
            Ok(Arc::new(GcsArtifactStore::new(
                &settings.api_base_url,
                &settings.bucket,
                token,
            )?))
        }
        ArtifactBackend::Local => {
            let root = settings
                .local_dir
                .as_deref()
                .map(Dir::new)
                .unwrap_or_else(|| Dir::new(default_local_dir));
            Ok(Arc::new(LocalArtifactStore::new(root)))
        }
    }
}
