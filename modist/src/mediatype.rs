//! Media types for model artifact manifests, configs, and layers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// OCI image manifest media type.
pub const MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Model config blob media type.
pub const MODEL_CONFIG: &str = "application/vnd.docker.ai.model.config.v0.1+json";
/// GGUF weight file (one per shard).
pub const GGUF: &str = "application/vnd.docker.ai.gguf.v3";
/// Safetensors weight file.
pub const SAFETENSORS: &str = "application/vnd.docker.ai.safetensors";
/// Tar of tokenizer/config files.
pub const VLLM_CONFIG_TAR: &str = "application/vnd.docker.ai.vllm.config.tar";
/// Tar of a directory subtree.
pub const DIR_TAR: &str = "application/vnd.docker.ai.dir.tar";
/// License text.
pub const LICENSE: &str = "application/vnd.docker.ai.license";
/// Multimodal projector.
pub const MMPROJ: &str = "application/vnd.docker.ai.mmproj";
/// Jinja chat template.
pub const CHAT_TEMPLATE: &str = "application/vnd.docker.ai.chat.template.jinja";

/// Media type of a manifest, config, or layer.
///
/// Unknown strings are preserved in [`MediaType::Other`] so foreign layers
/// survive a round trip through the store untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MediaType {
    /// OCI image manifest.
    Manifest,
    /// Model config JSON blob.
    ModelConfig,
    /// GGUF weights.
    Gguf,
    /// Safetensors weights.
    Safetensors,
    /// Tokenizer/config tar archive.
    VllmConfigTar,
    /// Directory subtree tar.
    DirTar,
    /// License text.
    License,
    /// Multimodal projector.
    Mmproj,
    /// Jinja chat template.
    ChatTemplate,
    /// Any other media type, preserved verbatim.
    Other(String),
}

impl MediaType {
    /// The wire string for this media type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Manifest => MANIFEST,
            Self::ModelConfig => MODEL_CONFIG,
            Self::Gguf => GGUF,
            Self::Safetensors => SAFETENSORS,
            Self::VllmConfigTar => VLLM_CONFIG_TAR,
            Self::DirTar => DIR_TAR,
            Self::License => LICENSE,
            Self::Mmproj => MMPROJ,
            Self::ChatTemplate => CHAT_TEMPLATE,
            Self::Other(s) => s,
        }
    }

    /// Maps a wire string onto a known media type, or [`MediaType::Other`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            MANIFEST => Self::Manifest,
            MODEL_CONFIG => Self::ModelConfig,
            GGUF => Self::Gguf,
            SAFETENSORS => Self::Safetensors,
            VLLM_CONFIG_TAR => Self::VllmConfigTar,
            DIR_TAR => Self::DirTar,
            LICENSE => Self::License,
            MMPROJ => Self::Mmproj,
            CHAT_TEMPLATE => Self::ChatTemplate,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns `true` for weight-carrying layer types.
    pub fn is_weights(&self) -> bool {
        matches!(self, Self::Gguf | Self::Safetensors)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&s))
    }
}
