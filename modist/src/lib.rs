//! Distribution of ML model artifacts via OCI registries.
//!
//! `modist` packages local weight files (single or sharded GGUF,
//! safetensors directories) into layered, content-addressed OCI artifacts,
//! keeps them in a deduplicated local store, pushes and pulls them against
//! OCI registries with resumable downloads, and materializes them into
//! runtime bundles for an inference engine.
//!
//! # Quick start — package and store a model
//!
//! ```no_run
//! use modist::{Builder, ProgressSink, Store, Target};
//!
//! # async fn demo() -> modist::Result<()> {
//! let store = Store::open("/var/lib/modist")?;
//! Builder::from_gguf("/models/llama-7b.Q4_K_M.gguf")?
//!     .with_license("/models/LICENSE")
//!     .build(
//!         Target::Store { store: &store, tags: vec!["ai/llama:7b".into()] },
//!         &ProgressSink::disabled(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Subsystems
//!
//! - [`Store`] — deduplicated blob/manifest storage with transactional
//!   writes, tag moves, and reference-counted deletion.
//! - [`Builder`] / [`artifact`] — layered artifacts whose manifest, config,
//!   and digests are derived, never mutated in place.
//! - [`RegistryClient`] — pull/push over [`oci_client`], with blob
//!   downloads resumed through `modist-http`.
//! - [`bundle`] — on-disk runtime bundles under stable filenames.
//! - [`tarball`] — standalone tar export/import of an artifact.

pub mod artifact;
mod builder;
pub mod bundle;
mod client;
mod digest;
mod error;
pub(crate) mod formats;
mod layer;
pub mod mediatype;
mod oci;
pub mod packaging;
mod progress;
mod reference;
pub mod registry;
pub mod store;
pub mod tarball;

pub use artifact::{
    Artifact, LocalArtifact, Mutated, StoredArtifact, append_layers, has_only_config_changes,
    set_config_media_type, set_context_size,
};
pub use builder::{Builder, Target};
pub use bundle::Bundle;
pub use client::{Client, ClientOptions, ModelInfo};
pub use digest::{Algorithm, Digest, HashWriter};
pub use error::{Error, Result};
pub use layer::{BlobLayer, FileLayer, Layer};
pub use mediatype::MediaType;
pub use oci::{ConfigDescriptor, ConfigFile, Descriptor, Format, Manifest, ModelConfig, Rootfs};
pub use packaging::TempFiles;
pub use progress::{LayerProgress, Message, ProgressSink, Reporter};
pub use reference::{Identifier, Reference};
pub use registry::{
    AnonymousKeychain, BasicKeychain, Credential, Keychain, RegistryClient, RemoteArtifact,
};
pub use store::{CancelToken, IndexEntry, Store};
