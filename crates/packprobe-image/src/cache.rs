//! Build cache volume naming.
//!
//! The build engine keeps per-image caches in named volumes whose names are
//! derived from the fully-qualified image reference. Teardown recomputes
//! those names so the volumes can be removed with the image.

use sha2::{Digest, Sha256};

/// Volume kinds the engine creates for each image.
const CACHE_KINDS: [&str; 3] = ["build", "launch", "cache"];

/// Returns the fully-qualified reference for a short image name.
fn full_reference(name: &str) -> String {
    let has_registry = name
        .split_once('/')
        .is_some_and(|(host, _)| host.contains('.') || host.contains(':') || host == "localhost");
    let repo = if has_registry {
        name.to_string()
    } else if name.contains('/') {
        format!("index.docker.io/{name}")
    } else {
        format!("index.docker.io/library/{name}")
    };
    let last = repo.rsplit('/').next().unwrap_or_default();
    if last.contains(':') || last.contains('@') {
        repo
    } else {
        format!("{repo}:latest")
    }
}

/// Returns the names of the cache volumes created when building `name`.
#[must_use]
pub fn cache_volume_names(name: &str) -> Vec<String> {
    let digest = Sha256::digest(full_reference(name).as_bytes());
    let prefix: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    CACHE_KINDS
        .iter()
        .map(|kind| format!("pack-cache-{prefix}.{kind}"))
        .collect()
}
