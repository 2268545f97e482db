//! Model artifacts: polymorphic views over a manifest, config, and layers.
//!
//! An artifact is immutable once observed. "Mutation" produces a new
//! artifact that shares layer references with its base (see
//! [`append_layers`], [`set_context_size`], [`set_config_media_type`]);
//! manifest and config digests are re-derived on access, never patched.

mod local;
mod mutate;
mod stored;

pub use local::LocalArtifact;
pub use mutate::{Mutated, append_layers, has_only_config_changes, set_config_media_type, set_context_size};
pub use stored::StoredArtifact;

use std::sync::Arc;

use crate::{ConfigFile, Descriptor, Digest, Format, Layer, Manifest, MediaType, Result};

/// Capability set shared by every artifact variant.
pub trait Artifact: Send + Sync {
    /// Ordered layers.
    fn layers(&self) -> Result<Vec<Arc<dyn Layer>>>;

    /// Parsed model config.
    fn config_file(&self) -> Result<ConfigFile>;

    /// Raw config blob bytes.
    ///
    /// Derived variants produce canonical bytes; store- and registry-backed
    /// variants return the stored bytes verbatim.
    fn raw_config(&self) -> Result<Vec<u8>> {
        self.config_file()?.to_canonical_bytes()
    }

    /// Media type recorded in the manifest's config descriptor.
    fn config_media_type(&self) -> MediaType {
        MediaType::ModelConfig
    }

    /// The manifest, derived from the layer set and config bytes.
    fn manifest(&self) -> Result<Manifest> {
        let raw_config = self.raw_config()?;
        let config = Descriptor::new(
            self.config_media_type(),
            Digest::sha256(&raw_config),
            raw_config.len() as u64,
        );
        let mut layers = Vec::new();
        for layer in self.layers()? {
            layers.push(layer.descriptor()?);
        }
        Ok(Manifest::new(config, layers))
    }

    /// Raw manifest bytes. Byte-exact for stored/remote artifacts.
    fn raw_manifest(&self) -> Result<Vec<u8>> {
        self.manifest()?.to_canonical_bytes()
    }

    /// Artifact identity: the digest of the raw manifest bytes.
    fn id(&self) -> Result<Digest> {
        Ok(Digest::sha256(&self.raw_manifest()?))
    }

    /// Tags attached to this artifact, if known (store-backed only).
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Layers of a given media type, in manifest order.
    fn layers_with(&self, media_type: &MediaType) -> Result<Vec<Arc<dyn Layer>>> {
        Ok(self
            .layers()?
            .into_iter()
            .filter(|l| l.media_type() == media_type)
            .collect())
    }

    /// Looks a layer up by digest (equivalently, by diff-ID).
    fn layer_by_digest(&self, digest: &Digest) -> Result<Option<Arc<dyn Layer>>> {
        for layer in self.layers()? {
            if layer.digest()? == *digest {
                return Ok(Some(layer));
            }
        }
        Ok(None)
    }

    /// GGUF weight layers in shard order.
    fn gguf_layers(&self) -> Result<Vec<Arc<dyn Layer>>> {
        self.layers_with(&MediaType::Gguf)
    }

    /// Safetensors weight layers in shard order.
    fn safetensors_layers(&self) -> Result<Vec<Arc<dyn Layer>>> {
        self.layers_with(&MediaType::Safetensors)
    }

    /// The multimodal projector layer, if present.
    fn mmproj_layer(&self) -> Result<Option<Arc<dyn Layer>>> {
        Ok(self.layers_with(&MediaType::Mmproj)?.into_iter().next())
    }

    /// The chat template layer, if present.
    fn chat_template_layer(&self) -> Result<Option<Arc<dyn Layer>>> {
        Ok(self.layers_with(&MediaType::ChatTemplate)?.into_iter().next())
    }

    /// The tokenizer/config archive layer, if present.
    fn config_archive_layer(&self) -> Result<Option<Arc<dyn Layer>>> {
        Ok(self
            .layers_with(&MediaType::VllmConfigTar)?
            .into_iter()
            .next())
    }

    /// Weight format detected from the layer set.
    fn format(&self) -> Result<Option<Format>> {
        for layer in self.layers()? {
            match layer.media_type() {
                MediaType::Gguf => return Ok(Some(Format::Gguf)),
                MediaType::Safetensors => return Ok(Some(Format::Safetensors)),
                _ => {}
            }
        }
        Ok(None)
    }
}
