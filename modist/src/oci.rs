//! OCI wire structures: manifests, descriptors, and the model config file.
//!
//! Manifest identity is the SHA-256 of its canonical JSON bytes. Bytes read
//! from a store or registry are kept verbatim; bytes for a freshly derived
//! artifact are produced exactly once by [`Manifest::to_canonical_bytes`]
//! and hashed from that buffer, never re-serialized from a parsed form.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Digest, MediaType, Result};

/// Manifest schema version this system emits.
pub const SCHEMA_VERSION: u32 = 2;

/// A content descriptor: digest, size, media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Descriptor {
    /// Media type of the referenced blob.
    #[serde(rename = "mediaType")]
    pub media_type: MediaType,
    /// Digest of the blob bytes.
    pub digest: Digest,
    /// Blob size in bytes.
    pub size: u64,
}

impl Descriptor {
    /// Builds a descriptor from its parts.
    pub fn new(media_type: MediaType, digest: Digest, size: u64) -> Self {
        Self {
            media_type,
            digest,
            size,
        }
    }
}

/// An OCI image manifest naming a config blob and ordered layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Manifest {
    /// Always [`SCHEMA_VERSION`].
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// Manifest media type.
    #[serde(rename = "mediaType")]
    pub media_type: MediaType,
    /// Config blob descriptor.
    pub config: Descriptor,
    /// Ordered layer descriptors.
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Builds a manifest over a config descriptor and layer descriptors.
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: MediaType::Manifest,
            config,
            layers,
        }
    }

    /// Serializes the canonical manifest bytes.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses manifest bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Weight file format of a model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Format {
    /// Single-file or sharded GGUF.
    Gguf,
    /// Safetensors directory.
    Safetensors,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gguf => f.write_str("gguf"),
            Self::Safetensors => f.write_str("safetensors"),
        }
    }
}

/// Model-level descriptive fields of the config blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ModelConfig {
    /// Weight format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    /// Quantization label (e.g. `Q4_K_M`, `F16`, `mixed`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quantization: String,
    /// Human-readable parameter count (e.g. `7.25 B`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameters: String,
    /// Model architecture (e.g. `llama`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    /// Human-readable total weight size (e.g. `4.13 GB`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    /// GGUF header metadata, stringified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gguf: Option<BTreeMap<String, String>>,
    /// Safetensors header metadata, stringified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safetensors: Option<BTreeMap<String, String>>,
    /// Context window override consumed by the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u64>,
}

/// Provenance section of the config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ConfigDescriptor {
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

/// Rootfs section: ordered layer diff-IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Rootfs {
    /// Always `"rootfs"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Layer diff-IDs in manifest order.
    #[serde(rename = "diffIDs")]
    pub diff_ids: Vec<Digest>,
}

impl Rootfs {
    /// Builds a rootfs section over layer diff-IDs.
    pub fn new(diff_ids: Vec<Digest>) -> Self {
        Self {
            kind: "rootfs".to_owned(),
            diff_ids,
        }
    }
}

/// The model config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ConfigFile {
    /// Model-level descriptive fields.
    pub config: ModelConfig,
    /// Provenance.
    pub descriptor: ConfigDescriptor,
    /// Layer diff-IDs.
    pub rootfs: Rootfs,
}

impl ConfigFile {
    /// Serializes the canonical config bytes.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses config bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
