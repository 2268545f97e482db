//! The mutation pipeline: pure functions producing derived artifacts.
//!
//! A [`Mutated`] wraps a base artifact plus appended layers and config
//! overrides. Nothing about the base is altered; every digest is re-derived
//! from the combined view on access.

use std::sync::Arc;

use crate::{ConfigFile, Digest, Layer, MediaType, Result};

use super::Artifact;

/// An artifact derived from a base by appending layers and/or rewriting
/// config fields.
pub struct Mutated {
    base: Arc<dyn Artifact>,
    appended: Vec<Arc<dyn Layer>>,
    config_media_type: Option<MediaType>,
    context_size: Option<u64>,
}

impl std::fmt::Debug for Mutated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutated")
            .field("appended", &self.appended.len())
            .field("config_media_type", &self.config_media_type)
            .field("context_size", &self.context_size)
            .finish_non_exhaustive()
    }
}

/// Returns an artifact with `layers` appended after the base's layers.
pub fn append_layers(base: Arc<dyn Artifact>, layers: Vec<Arc<dyn Layer>>) -> Mutated {
    Mutated {
        base,
        appended: layers,
        config_media_type: None,
        context_size: None,
    }
}

/// Returns an artifact whose config carries the given context size.
///
/// Layer digests are untouched; the config and manifest digests change.
pub fn set_context_size(base: Arc<dyn Artifact>, context_size: u64) -> Mutated {
    Mutated {
        base,
        appended: Vec::new(),
        config_media_type: None,
        context_size: Some(context_size),
    }
}

/// Returns an artifact whose manifest records a different config media type.
///
/// The config bytes and every blob digest stay identical; only the manifest
/// digest changes.
pub fn set_config_media_type(base: Arc<dyn Artifact>, media_type: MediaType) -> Mutated {
    Mutated {
        base,
        appended: Vec::new(),
        config_media_type: Some(media_type),
        context_size: None,
    }
}

/// Compares an artifact's layers against a captured initial layer set.
///
/// True when the lengths match and every digest is identical in order —
/// the store may then take the lightweight config-only write path.
pub fn has_only_config_changes(artifact: &dyn Artifact, initial: &[Digest]) -> Result<bool> {
    let layers = artifact.layers()?;
    if layers.len() != initial.len() {
        return Ok(false);
    }
    for (layer, want) in layers.iter().zip(initial) {
        if layer.digest()? != *want {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Artifact for Mutated {
    fn layers(&self) -> Result<Vec<Arc<dyn Layer>>> {
        let mut layers = self.base.layers()?;
        layers.extend(self.appended.iter().cloned());
        Ok(layers)
    }

    fn config_file(&self) -> Result<ConfigFile> {
        let mut config = self.base.config_file()?;
        for layer in &self.appended {
            config.rootfs.diff_ids.push(layer.digest()?);
        }
        if let Some(n) = self.context_size {
            config.config.context_size = Some(n);
        }
        Ok(config)
    }

    fn raw_config(&self) -> Result<Vec<u8>> {
        // A media-type-only mutation must not disturb the config bytes;
        // the base's raw form (possibly store-exact) passes through.
        if self.appended.is_empty() && self.context_size.is_none() {
            return self.base.raw_config();
        }
        self.config_file()?.to_canonical_bytes()
    }

    fn config_media_type(&self) -> MediaType {
        self.config_media_type
            .clone()
            .unwrap_or_else(|| self.base.config_media_type())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::artifact::LocalArtifact;
    use crate::{FileLayer, Format, ModelConfig};

    fn base_artifact(dir: &tempfile::TempDir) -> Arc<dyn Artifact> {
        let path = dir.path().join("m.gguf");
        fs::write(&path, b"weights").unwrap();
        let layer: Arc<dyn Layer> = Arc::new(FileLayer::new(&path, MediaType::Gguf));
        let config = ModelConfig {
            format: Some(Format::Gguf),
            ..ModelConfig::default()
        };
        Arc::new(LocalArtifact::new(vec![layer], config))
    }

    fn extra_layer(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> Arc<dyn Layer> {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        Arc::new(FileLayer::new(&path, MediaType::License))
    }

    #[test]
    fn append_extends_diff_ids_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let base_ids = base.config_file().unwrap().rootfs.diff_ids;

        let lic = extra_layer(&dir, "LICENSE", b"mit");
        let derived = append_layers(Arc::clone(&base), vec![Arc::clone(&lic)]);

        let mut want = base_ids;
        want.push(lic.digest().unwrap());
        assert_eq!(derived.config_file().unwrap().rootfs.diff_ids, want);
        assert_eq!(derived.layers().unwrap().len(), 2);
    }

    #[test]
    fn append_changes_manifest_and_config_digests() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let derived = append_layers(
            Arc::clone(&base),
            vec![extra_layer(&dir, "LICENSE", b"mit")],
        );

        assert_ne!(base.id().unwrap(), derived.id().unwrap());
        assert_ne!(
            base.manifest().unwrap().config.digest,
            derived.manifest().unwrap().config.digest
        );
    }

    #[test]
    fn append_leaves_base_unaltered() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let id_before = base.id().unwrap();
        let _derived = append_layers(Arc::clone(&base), vec![extra_layer(&dir, "l", b"x")]);
        assert_eq!(base.id().unwrap(), id_before);
        assert_eq!(base.layers().unwrap().len(), 1);
    }

    #[test]
    fn context_size_changes_config_but_not_layers() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let derived = set_context_size(Arc::clone(&base), 4096);

        assert_eq!(derived.config_file().unwrap().config.context_size, Some(4096));
        assert_ne!(base.raw_config().unwrap(), derived.raw_config().unwrap());
        assert_ne!(base.id().unwrap(), derived.id().unwrap());

        let base_manifest = base.manifest().unwrap();
        let derived_manifest = derived.manifest().unwrap();
        assert_eq!(base_manifest.layers, derived_manifest.layers);
    }

    #[test]
    fn config_media_type_changes_manifest_only() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let mt = MediaType::Other("application/x-custom+json".into());
        let derived = set_config_media_type(Arc::clone(&base), mt.clone());

        assert_eq!(base.raw_config().unwrap(), derived.raw_config().unwrap());
        assert_eq!(derived.manifest().unwrap().config.media_type, mt);
        assert_ne!(base.id().unwrap(), derived.id().unwrap());
    }

    #[test]
    fn mutations_compose() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let with_license = Arc::new(append_layers(
            Arc::clone(&base),
            vec![extra_layer(&dir, "LICENSE", b"mit")],
        ));
        let with_ctx = set_context_size(with_license, 2048);

        let cfg = with_ctx.config_file().unwrap();
        assert_eq!(cfg.rootfs.diff_ids.len(), 2);
        assert_eq!(cfg.config.context_size, Some(2048));
    }

    #[test]
    fn config_change_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_artifact(&dir);
        let initial: Vec<Digest> = base
            .layers()
            .unwrap()
            .iter()
            .map(|l| l.digest().unwrap())
            .collect();

        let ctx_only = set_context_size(Arc::clone(&base), 1024);
        assert!(has_only_config_changes(&ctx_only, &initial).unwrap());

        let appended = append_layers(Arc::clone(&base), vec![extra_layer(&dir, "l", b"x")]);
        assert!(!has_only_config_changes(&appended, &initial).unwrap());
    }
}
