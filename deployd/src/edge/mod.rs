//! Edge router
//!
//! Maps the leftmost label of a request's host to a project and forwards the
//! request to that project's artifact tree under a fixed base URL. A host that
//! matches no project is forwarded using the raw label as the artifact key.

pub mod proxy;

use tracing::debug;

use crate::errors::DeployError;
use crate::store::DeploymentStore;

pub use proxy::{edge_router, EdgeState};

/// Leftmost label of `host`, lowercased, with any port removed
pub fn subdomain_of(host: &str) -> Option<String> {
    let host = host.trim();
    let hostname = if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal, no subdomain to speak of
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(name, _)| name)
            .unwrap_or(host)
    };

    let label = hostname.split('.').next().unwrap_or_default();
    if label.is_empty() {
        None
    } else {
        Some(label.to_ascii_lowercase())
    }
}

/// Artifact key served for `subdomain`: the matching project's artifact root,
/// or the subdomain itself when no project matches
pub async fn resolve_artifact_key(
    store: &dyn DeploymentStore,
    subdomain: &str,
) -> Result<String, DeployError> {
    match store.find_project_by_subdomain(subdomain).await? {
        Some(project) => Ok(project.artifact_key().to_string()),
        None => {
            debug!("No project for subdomain {}, using it as the artifact key", subdomain);
            Ok(subdomain.to_string())
        }
    }
}

/// Upstream URL for a request path. `/` is served as `/index.html`.
pub fn upstream_url(base_url: &str, artifact_key: &str, path: &str, query: Option<&str>) -> String {
    let path = if path == "/" { "/index.html" } else { path };
    let mut url = format!("{}/{}{}", base_url.trim_end_matches('/'), artifact_key, path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}
