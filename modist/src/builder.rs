//! Fluent assembly of model artifacts.
//!
//! ```no_run
//! use modist::{Builder, Target, ProgressSink};
//! # async fn demo(store: &modist::Store) -> modist::Result<()> {
//! let id = Builder::from_gguf("/models/llama-7b.Q4_K_M.gguf")?
//!     .with_license("/models/LICENSE")
//!     .with_context_size(8192)
//!     .build(
//!         Target::Store { store, tags: vec!["ai/llama:7b".into()] },
//!         &ProgressSink::disabled(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::{Artifact, LocalArtifact, append_layers, has_only_config_changes, set_context_size};
use crate::formats::{gguf, humanize_bytes, safetensors};
use crate::packaging::{
    TempFiles, discover_shards, pack_config_files, process_dirs, scan_safetensors_dir,
};
use crate::progress::ProgressSink;
use crate::registry::RegistryClient;
use crate::store::Store;
use crate::{
    Digest, Error, FileLayer, Format, Layer, MediaType, ModelConfig, Reference, Result, tarball,
};

/// Where a built artifact goes.
#[non_exhaustive]
pub enum Target<'a> {
    /// Write into a local content store under the given tags.
    Store {
        /// Destination store.
        store: &'a Store,
        /// Tags to apply (tag-move semantics).
        tags: Vec<String>,
    },
    /// Push to an OCI registry.
    Registry {
        /// Registry client.
        registry: &'a RegistryClient,
        /// Destination reference.
        reference: Reference,
    },
    /// Export as a standalone tarball file.
    TarballFile(PathBuf),
    /// Export as a tarball onto an arbitrary writer.
    TarballStream(Box<dyn Write + Send>),
}

impl std::fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store { tags, .. } => f.debug_struct("Store").field("tags", tags).finish(),
            Self::Registry { reference, .. } => {
                f.debug_struct("Registry").field("reference", reference).finish()
            }
            Self::TarballFile(path) => f.debug_tuple("TarballFile").field(path).finish(),
            Self::TarballStream(_) => f.write_str("TarballStream"),
        }
    }
}

/// Assembles an artifact from weight files (or an existing artifact) plus
/// attachments, then hands it to a [`Target`].
pub struct Builder {
    base: Option<Arc<dyn Artifact>>,
    initial_layers: Vec<Digest>,
    layers: Vec<Arc<dyn Layer>>,
    config: ModelConfig,
    context_size: Option<u64>,
    has_config_archive: bool,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("layers", &self.layers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// Starts from a GGUF file, expanding `<p>-NNNNN-of-MMMMM.gguf` shard
    /// names into the full ordered shard set.
    ///
    /// Header metadata (architecture, quantization, parameters) is
    /// extracted best-effort; a malformed header is logged and ignored.
    pub fn from_gguf(path: impl AsRef<Path>) -> Result<Self> {
        let shards = discover_shards(path.as_ref())?;

        let mut config = ModelConfig {
            format: Some(Format::Gguf),
            size: humanize_bytes(total_file_size(&shards)?),
            ..ModelConfig::default()
        };
        match gguf::read_metadata(&shards[0]) {
            Ok(meta) => {
                config.architecture = meta.architecture;
                config.parameters = meta.parameters;
                config.quantization = meta.quantization;
                config.gguf = Some(meta.metadata);
            }
            Err(e) => {
                tracing::warn!(path = %shards[0].display(), error = %e,
                    "failed to parse GGUF metadata, packaging without it");
            }
        }

        Ok(Self {
            base: None,
            initial_layers: Vec::new(),
            layers: file_layers(&shards, MediaType::Gguf),
            config,
            context_size: None,
            has_config_archive: false,
        })
    }

    /// Starts from safetensors files.
    ///
    /// When the first path is a shard name, the full set is discovered and
    /// every shard must be present; otherwise the list is used verbatim.
    /// Paths are sorted ascending before layering.
    pub fn from_safetensors(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let Some(first) = paths.first() else {
            return Err(Error::NoSafetensorsFiles(PathBuf::new()));
        };
        let mut files = discover_shards(first.as_ref())?;
        if files.len() == 1 && paths.len() > 1 {
            files = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        }
        files.sort();

        let mut config = ModelConfig {
            format: Some(Format::Safetensors),
            size: humanize_bytes(total_file_size(&files)?),
            ..ModelConfig::default()
        };
        match safetensors::read_metadata(&files) {
            Ok(meta) => {
                config.parameters = meta.parameters;
                config.quantization = meta.quantization;
                config.safetensors = Some(meta.metadata);
            }
            Err(e) => {
                tracing::warn!(error = %e,
                    "failed to inspect safetensors headers, packaging without metadata");
            }
        }

        Ok(Self {
            base: None,
            initial_layers: Vec::new(),
            layers: file_layers(&files, MediaType::Safetensors),
            config,
            context_size: None,
            has_config_archive: false,
        })
    }

    /// Starts from a safetensors directory: every top-level `.safetensors`
    /// file becomes a weight layer, and tokenizer/config files (`*.json`,
    /// `merges.txt`) are packed into a config-archive layer.
    ///
    /// The returned [`TempFiles`] owns the staged archive; keep it alive
    /// until [`build`](Self::build) has run.
    pub fn from_safetensors_dir(dir: impl AsRef<Path>) -> Result<(Self, TempFiles)> {
        let (weights, configs) = scan_safetensors_dir(dir.as_ref())?;
        let builder = Self::from_safetensors(&weights)?;
        if configs.is_empty() {
            return Ok((builder, TempFiles::default()));
        }
        let staged = pack_config_files(&configs)?;
        let builder = builder.with_config_archive(&staged.paths()[0])?;
        Ok((builder, staged))
    }

    /// Starts from an existing artifact, capturing its layer set so a
    /// config-only rebuild can take the store's lightweight write path.
    pub fn from_model(artifact: Arc<dyn Artifact>) -> Result<Self> {
        let mut initial_layers = Vec::new();
        for layer in artifact.layers()? {
            initial_layers.push(layer.digest()?);
        }
        let has_config_archive = artifact.config_archive_layer()?.is_some();
        Ok(Self {
            base: Some(artifact),
            initial_layers,
            layers: Vec::new(),
            config: ModelConfig::default(),
            context_size: None,
            has_config_archive,
        })
    }

    /// Attaches a license text layer.
    #[must_use]
    pub fn with_license(mut self, path: impl AsRef<Path>) -> Self {
        self.layers
            .push(Arc::new(FileLayer::new(path.as_ref(), MediaType::License)));
        self
    }

    /// Attaches a multimodal projector layer.
    #[must_use]
    pub fn with_multimodal_projector(mut self, path: impl AsRef<Path>) -> Self {
        self.layers
            .push(Arc::new(FileLayer::new(path.as_ref(), MediaType::Mmproj)));
        self
    }

    /// Attaches a Jinja chat template layer.
    #[must_use]
    pub fn with_chat_template_file(mut self, path: impl AsRef<Path>) -> Self {
        self.layers.push(Arc::new(FileLayer::new(
            path.as_ref(),
            MediaType::ChatTemplate,
        )));
        self
    }

    /// Attaches the tokenizer/config archive. At most one per artifact.
    pub fn with_config_archive(mut self, path: impl AsRef<Path>) -> Result<Self> {
        if self.has_config_archive {
            return Err(Error::DuplicateConfigArchive);
        }
        self.has_config_archive = true;
        self.layers.push(Arc::new(FileLayer::new(
            path.as_ref(),
            MediaType::VllmConfigTar,
        )));
        Ok(self)
    }

    /// Attaches a directory-subtree tar layer. Repeatable.
    #[must_use]
    pub fn with_dir_tar(mut self, path: impl AsRef<Path>) -> Self {
        self.layers
            .push(Arc::new(FileLayer::new(path.as_ref(), MediaType::DirTar)));
        self
    }

    /// Tars subdirectories of `base` and attaches each as a dir-tar layer.
    ///
    /// Path-safety rules are those of
    /// [`process_dirs`](crate::packaging::process_dirs). The returned
    /// [`TempFiles`] owns the staged tars; keep it alive until
    /// [`build`](Self::build) has run.
    pub fn with_dir_tars(
        mut self,
        base: impl AsRef<Path>,
        dirs: &[impl AsRef<Path>],
    ) -> Result<(Self, TempFiles)> {
        let staged = process_dirs(base.as_ref(), dirs)?;
        for path in staged.paths() {
            self.layers
                .push(Arc::new(FileLayer::new(path, MediaType::DirTar)));
        }
        Ok((self, staged))
    }

    /// Sets the runtime context window in the config.
    #[must_use]
    pub fn with_context_size(mut self, context_size: u64) -> Self {
        self.context_size = Some(context_size);
        self
    }

    /// Materializes the assembled artifact without writing it anywhere.
    pub fn artifact(&self) -> Result<Arc<dyn Artifact>> {
        match &self.base {
            Some(base) => {
                let mut derived: Arc<dyn Artifact> = Arc::clone(base);
                if !self.layers.is_empty() {
                    derived = Arc::new(append_layers(derived, self.layers.clone()));
                }
                if let Some(n) = self.context_size {
                    derived = Arc::new(set_context_size(derived, n));
                }
                Ok(derived)
            }
            None => {
                let mut config = self.config.clone();
                config.context_size = self.context_size;
                Ok(Arc::new(LocalArtifact::new(self.layers.clone(), config)))
            }
        }
    }

    /// Builds the artifact and hands it to `target`. Returns the artifact
    /// ID (its manifest digest).
    pub async fn build(self, target: Target<'_>, progress: &ProgressSink) -> Result<Digest> {
        let artifact = self.artifact()?;
        match target {
            Target::Store { store, tags } => {
                // A clone of a stored artifact with untouched layers only
                // needs its config and manifest written.
                if self.base.is_some()
                    && has_only_config_changes(artifact.as_ref(), &self.initial_layers)?
                {
                    store.write_lightweight(artifact.as_ref(), &tags, progress)
                } else {
                    store.write(artifact.as_ref(), &tags, progress)
                }
            }
            Target::Registry {
                registry,
                reference,
            } => {
                registry.push(artifact.as_ref(), &reference, progress).await?;
                artifact.id()
            }
            Target::TarballFile(path) => {
                tarball::export_to_file(artifact.as_ref(), &path)?;
                artifact.id()
            }
            Target::TarballStream(writer) => {
                tarball::export(artifact.as_ref(), writer)?;
                artifact.id()
            }
        }
    }
}

fn file_layers(paths: &[PathBuf], media_type: MediaType) -> Vec<Arc<dyn Layer>> {
    paths
        .iter()
        .map(|p| Arc::new(FileLayer::new(p, media_type.clone())) as Arc<dyn Layer>)
        .collect()
}

fn total_file_size(paths: &[PathBuf]) -> Result<u64> {
    let mut total = 0;
    for path in paths {
        total += fs::metadata(path)?.len();
    }
    Ok(total)
}
