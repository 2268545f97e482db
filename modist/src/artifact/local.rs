//! Artifacts assembled from local weight files by the builder.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{ConfigDescriptor, ConfigFile, Layer, ModelConfig, Result, Rootfs};

use super::Artifact;

/// A gguf- or safetensors-backed artifact built from files on disk.
///
/// The rootfs diff-IDs are derived from the live layer set on every config
/// access, so appended layers are always reflected.
pub struct LocalArtifact {
    layers: Vec<Arc<dyn Layer>>,
    config: ModelConfig,
    created: DateTime<Utc>,
}

impl std::fmt::Debug for LocalArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalArtifact")
            .field("layers", &self.layers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LocalArtifact {
    /// Builds an artifact over ordered layers and descriptive config fields.
    pub fn new(layers: Vec<Arc<dyn Layer>>, config: ModelConfig) -> Self {
        Self {
            layers,
            config,
            created: Utc::now(),
        }
    }
}

impl Artifact for LocalArtifact {
    fn layers(&self) -> Result<Vec<Arc<dyn Layer>>> {
        Ok(self.layers.clone())
    }

    fn config_file(&self) -> Result<ConfigFile> {
        let mut diff_ids = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            diff_ids.push(layer.digest()?);
        }
        Ok(ConfigFile {
            config: self.config.clone(),
            descriptor: ConfigDescriptor {
                created: self.created,
            },
            rootfs: Rootfs::new(diff_ids),
        })
    }
}
