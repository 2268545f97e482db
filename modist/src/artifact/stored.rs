//! Store-backed artifacts.

use std::sync::Arc;

use crate::{ConfigFile, Digest, Layer, Manifest, MediaType, Result};

use super::Artifact;

/// An artifact whose manifest, config, and blobs live in the content store.
///
/// The raw manifest bytes are exactly what the store holds on disk, so the
/// ID is stable across round trips.
pub struct StoredArtifact {
    raw_manifest: Vec<u8>,
    manifest: Manifest,
    raw_config: Vec<u8>,
    layers: Vec<Arc<dyn Layer>>,
    tags: Vec<String>,
}

impl std::fmt::Debug for StoredArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredArtifact")
            .field("layers", &self.layers.len())
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl StoredArtifact {
    /// Assembles a store-backed artifact from the pieces the store read.
    pub(crate) fn new(
        raw_manifest: Vec<u8>,
        manifest: Manifest,
        raw_config: Vec<u8>,
        layers: Vec<Arc<dyn Layer>>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            raw_manifest,
            manifest,
            raw_config,
            layers,
            tags,
        }
    }

    /// Captures the layer digests for a later
    /// [`has_only_config_changes`](super::has_only_config_changes) check.
    pub fn layer_digests(&self) -> Result<Vec<Digest>> {
        self.layers.iter().map(|l| l.digest()).collect()
    }
}

impl Artifact for StoredArtifact {
    fn layers(&self) -> Result<Vec<Arc<dyn Layer>>> {
        Ok(self.layers.clone())
    }

    fn config_file(&self) -> Result<ConfigFile> {
        ConfigFile::from_slice(&self.raw_config)
    }

    fn raw_config(&self) -> Result<Vec<u8>> {
        Ok(self.raw_config.clone())
    }

    fn config_media_type(&self) -> MediaType {
        self.manifest.config.media_type.clone()
    }

    fn manifest(&self) -> Result<Manifest> {
        Ok(self.manifest.clone())
    }

    fn raw_manifest(&self) -> Result<Vec<u8>> {
        Ok(self.raw_manifest.clone())
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }
}
