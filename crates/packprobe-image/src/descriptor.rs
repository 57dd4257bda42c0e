//! Built-image descriptors.
//!
//! The descriptor is assembled from `docker image inspect` output: the image
//! ID, its config labels, and the lifecycle metadata label that records every
//! applied buildpack together with the layers it contributed.

use std::collections::BTreeMap;

use packprobe_common::constants::LIFECYCLE_METADATA_LABEL;
use packprobe_common::error::{PackprobeError, Result};
use packprobe_common::types::{ImageId, LogTranscript};
use serde::{Deserialize, Serialize};

/// Metadata a buildpack recorded for one of its layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    /// Layer digest.
    #[serde(default)]
    pub sha: String,
    /// Layer is available at build time.
    #[serde(default)]
    pub build: bool,
    /// Layer is part of the launch image.
    #[serde(default)]
    pub launch: bool,
    /// Layer is cached between builds.
    #[serde(default)]
    pub cache: bool,
    /// Buildpack-defined metadata (`data` in the lifecycle label).
    #[serde(default, rename = "data")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A buildpack that contributed to the image, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedBuildpack {
    /// Buildpack ID, e.g. `paketo-buildpacks/environment-variables`.
    pub key: String,
    /// Buildpack version.
    #[serde(default)]
    pub version: String,
    /// Layers keyed by layer name.
    #[serde(default)]
    pub layers: BTreeMap<String, LayerMetadata>,
}

/// Structured description of a built image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Image ID as reported by the runtime.
    pub id: ImageId,
    /// Name the image was built under.
    pub name: String,
    /// Applied buildpacks in execution order.
    pub buildpacks: Vec<AppliedBuildpack>,
    /// Image config labels.
    pub labels: BTreeMap<String, String>,
}

impl ImageDescriptor {
    /// Returns the buildpack at `index` in execution order.
    #[must_use]
    pub fn buildpack(&self, index: usize) -> Option<&AppliedBuildpack> {
        self.buildpacks.get(index)
    }

    /// Returns the buildpack with the given key.
    #[must_use]
    pub fn buildpack_by_key(&self, key: &str) -> Option<&AppliedBuildpack> {
        self.buildpacks.iter().find(|b| b.key == key)
    }

    /// Returns a label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Output of a successful build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// The built image.
    pub image: ImageDescriptor,
    /// Everything the engine printed, in order.
    pub transcript: LogTranscript,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    config: InspectConfig,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct LifecycleMetadata {
    #[serde(default)]
    buildpacks: Vec<AppliedBuildpack>,
}

/// Parses `docker image inspect <name>` output into a descriptor.
///
/// Images not produced by a buildpack build have no lifecycle label and
/// yield an empty buildpack list.
///
/// # Errors
///
/// Returns `Serialization` if the output or the lifecycle label is not
/// valid JSON, and `NotFound` if the output holds no image.
pub fn parse_inspect(name: &str, output: &str) -> Result<ImageDescriptor> {
    let entries: Vec<InspectEntry> = serde_json::from_str(output)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| PackprobeError::NotFound {
            kind: "image",
            id: name.to_string(),
        })?;

    let labels = entry.config.labels.unwrap_or_default();
    let buildpacks = match labels.get(LIFECYCLE_METADATA_LABEL) {
        Some(raw) => serde_json::from_str::<LifecycleMetadata>(raw)?.buildpacks,
        None => Vec::new(),
    };

    tracing::debug!(
        image = name,
        id = %entry.id,
        buildpacks = buildpacks.len(),
        labels = labels.len(),
        "parsed image descriptor"
    );

    Ok(ImageDescriptor {
        id: ImageId::new(entry.id),
        name: name.to_string(),
        buildpacks,
        labels,
    })
}
