//! High-level orchestration: pull, push, list, tag, delete, load, bundle.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifact::{Artifact, StoredArtifact};
use crate::progress::ProgressSink;
use crate::registry::{AnonymousKeychain, Keychain, RegistryClient};
use crate::store::{IndexEntry, Store};
use crate::{Bundle, Digest, Error, Format, Reference, Result, bundle, tarball};

const MODIST_HOME_ENV: &str = "MODIST_HOME";
const MODIST_DIR: &str = "modist";

/// Configuration for [`Client`]. No global state: everything an operation
/// needs is held here explicitly.
#[derive(Clone)]
pub struct ClientOptions {
    /// Root directory of the local store.
    pub store_root: PathBuf,
    /// Credential resolver for registries.
    pub keychain: Arc<dyn Keychain>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("store_root", &self.store_root)
            .finish_non_exhaustive()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            keychain: Arc::new(AnonymousKeychain),
        }
    }
}

/// Returns `$MODIST_HOME` or `<platform_data_dir>/modist`.
fn default_store_root() -> PathBuf {
    if let Ok(home) = std::env::var(MODIST_HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(MODIST_DIR)
}

/// One model's listing row: identity, tags, and config metadata.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct ModelInfo {
    /// Artifact ID (manifest digest string).
    pub id: String,
    /// Canonical tags.
    pub tags: Vec<String>,
    /// Weight format.
    pub format: Option<Format>,
    /// Model architecture, if known.
    pub architecture: String,
    /// Human-readable parameter count, if known.
    pub parameters: String,
    /// Quantization label, if known.
    pub quantization: String,
    /// Human-readable weight size, if known.
    pub size: String,
    /// Context window override, if set.
    pub context_size: Option<u64>,
    /// Packaging timestamp.
    pub created: DateTime<Utc>,
}

/// Facade over the store and registry.
#[derive(Debug)]
pub struct Client {
    store: Arc<Store>,
    registry: Arc<RegistryClient>,
}

impl Client {
    /// Opens a client with default options.
    pub fn new() -> Result<Self> {
        Self::with_options(ClientOptions::default())
    }

    /// Opens a client with explicit options.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        let store = Arc::new(Store::open(&options.store_root)?);
        let registry = Arc::new(RegistryClient::new(Arc::clone(&options.keychain)));
        Ok(Self { store, registry })
    }

    /// The underlying content store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The underlying registry client.
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Pulls `reference` from its registry into the store, tagging it.
    ///
    /// Blob downloads resume on interruption; progress flows to `progress`
    /// as NDJSON messages, ending in a terminal success or error line.
    pub async fn pull(&self, reference: &str, progress: &ProgressSink) -> Result<Digest> {
        let result = self.pull_inner(reference, progress).await;
        match &result {
            Ok(_) => progress.success("Model pulled successfully"),
            Err(e) => progress.error(e.to_string()),
        }
        result
    }

    async fn pull_inner(&self, reference: &str, progress: &ProgressSink) -> Result<Digest> {
        let parsed = Reference::parse(reference)?;
        let remote = self.registry.remote_artifact(&parsed).await?;

        let tags = match parsed.tag() {
            Some(_) => vec![parsed.canonical()],
            None => Vec::new(),
        };
        let store = Arc::clone(&self.store);
        let sink = progress.clone();
        tokio::task::spawn_blocking(move || store.write(&remote, &tags, &sink))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Pushes the stored artifact `reference` resolves to.
    pub async fn push(&self, reference: &str, progress: &ProgressSink) -> Result<Digest> {
        let result = self.push_inner(reference, progress).await;
        match &result {
            Ok(_) => progress.success("Model pushed successfully"),
            Err(e) => progress.error(e.to_string()),
        }
        result
    }

    async fn push_inner(&self, reference: &str, progress: &ProgressSink) -> Result<Digest> {
        let parsed = Reference::parse(reference)?;
        let artifact = self.store.read(reference)?;
        self.registry.push(&artifact, &parsed, progress).await?;
        artifact.id()
    }

    /// Lists every model in the store.
    pub fn list(&self) -> Result<Vec<IndexEntry>> {
        self.store.list()
    }

    /// Lists models with their config metadata resolved.
    ///
    /// Entries whose on-disk pieces cannot be read are skipped with a
    /// warning rather than failing the whole listing.
    pub fn models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        for entry in self.store.list()? {
            let artifact = match self.store.read(&entry.id) {
                Ok(artifact) => artifact,
                Err(e) => {
                    tracing::warn!(id = %entry.id, error = %e, "skipping unreadable model");
                    continue;
                }
            };
            let config = artifact.config_file()?;
            models.push(ModelInfo {
                id: entry.id,
                tags: entry.tags,
                format: config.config.format,
                architecture: config.config.architecture,
                parameters: config.config.parameters,
                quantization: config.config.quantization,
                size: config.config.size,
                context_size: config.config.context_size,
                created: config.descriptor.created,
            });
        }
        Ok(models)
    }

    /// Reads the stored artifact a reference resolves to.
    pub fn get(&self, reference: &str) -> Result<StoredArtifact> {
        self.store.read(reference)
    }

    /// Applies tags to an existing model (tag-move semantics).
    pub fn tag(&self, reference: &str, tags: &[String]) -> Result<Vec<String>> {
        self.store.add_tags(reference, tags)
    }

    /// Removes tags from whichever models carry them.
    pub fn remove_tags(&self, tags: &[String]) -> Result<Vec<String>> {
        self.store.remove_tags(tags)
    }

    /// Deletes a model (or just a tag); see [`Store::delete`].
    pub fn delete(&self, reference: &str, force: bool) -> Result<(String, Vec<String>)> {
        self.store.delete(reference, force)
    }

    /// Wipes the store and re-initializes it.
    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }

    /// Imports a model tarball (see [`tarball`]) and applies `tags`.
    pub fn load(
        &self,
        reader: impl Read,
        tags: &[String],
        progress: &ProgressSink,
    ) -> Result<Digest> {
        tarball::load(&self.store, reader, tags, progress)
    }

    /// Materializes a model into a runtime bundle directory.
    ///
    /// With no `target`, the bundle lives under the store's `bundles/`
    /// subtree keyed by artifact ID — and an already materialized bundle
    /// there is reparsed instead of rebuilt (blobs are immutable, so a
    /// bundle for an ID never goes stale).
    pub fn bundle(&self, reference: &str, target: Option<&Path>) -> Result<Bundle> {
        let artifact = self.store.read(reference)?;
        let dir = match target {
            Some(dir) => dir.to_path_buf(),
            None => {
                let dir = self.store.bundle_dir(&artifact.id()?)?;
                if dir.join("config.json").is_file() {
                    tracing::debug!(dir = %dir.display(), "reusing existing bundle");
                    return bundle::parse(&dir);
                }
                dir
            }
        };
        bundle::unpack(&dir, &artifact)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc as StdArc;

    use super::*;
    use crate::artifact::LocalArtifact;
    use crate::{FileLayer, Format, Layer, MediaType, ModelConfig};

    fn client_in(dir: &Path) -> Client {
        Client::with_options(ClientOptions {
            store_root: dir.join("store"),
            keychain: StdArc::new(AnonymousKeychain),
        })
        .unwrap()
    }

    fn seed_model(client: &Client, dir: &Path, tag: &str) -> Digest {
        let weights = dir.join(format!("{}.gguf", tag.replace([':', '/'], "_")));
        fs::write(&weights, format!("weights-{tag}")).unwrap();
        let artifact = LocalArtifact::new(
            vec![StdArc::new(FileLayer::new(&weights, MediaType::Gguf)) as StdArc<dyn Layer>],
            ModelConfig {
                format: Some(Format::Gguf),
                ..ModelConfig::default()
            },
        );
        client
            .store()
            .write(&artifact, &[tag.to_owned()], &ProgressSink::disabled())
            .unwrap()
    }

    #[test]
    fn list_get_tag_delete_flow() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        let id = seed_model(&client, dir.path(), "ai/m:v1");

        assert_eq!(client.list().unwrap().len(), 1);
        assert_eq!(client.get("ai/m:v1").unwrap().id().unwrap(), id);

        let tags = client.tag("ai/m:v1", &["ai/m:stable".into()]).unwrap();
        assert_eq!(tags, vec!["index.docker.io/ai/m:stable"]);

        let (deleted_id, removed) = client.delete("ai/m:stable", false).unwrap();
        assert_eq!(deleted_id, id.to_string());
        assert_eq!(removed, vec!["index.docker.io/ai/m:stable"]);
        // Other tag still holds the model.
        assert!(client.get("ai/m:v1").is_ok());
    }

    #[test]
    fn models_resolve_config_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        seed_model(&client, dir.path(), "ai/m:v1");

        let models = client.models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].format, Some(Format::Gguf));
        assert_eq!(models[0].tags, vec!["index.docker.io/ai/m:v1"]);
        assert!(models[0].id.starts_with("sha256:"));
    }

    #[test]
    fn bundle_into_store_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        seed_model(&client, dir.path(), "ai/m:v1");

        let bundle = client.bundle("ai/m:v1", None).unwrap();
        assert!(bundle.root().starts_with(client.store().root()));
        assert!(bundle.weight_paths()[0].exists());
    }

    #[test]
    fn load_round_trips_export() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        seed_model(&client, dir.path(), "ai/m:v1");
        let artifact = client.get("ai/m:v1").unwrap();

        let tar_path = dir.path().join("m.tar");
        tarball::export_to_file(&artifact, &tar_path).unwrap();

        let other = Client::with_options(ClientOptions {
            store_root: dir.path().join("store2"),
            keychain: StdArc::new(AnonymousKeychain),
        })
        .unwrap();
        let id = other
            .load(
                fs::File::open(&tar_path).unwrap(),
                &["ai/m:loaded".into()],
                &ProgressSink::disabled(),
            )
            .unwrap();
        assert_eq!(id, artifact.id().unwrap());
        assert!(other.get("ai/m:loaded").is_ok());
    }

    #[test]
    fn reset_empties_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        seed_model(&client, dir.path(), "ai/m:v1");
        client.reset().unwrap();
        assert!(client.list().unwrap().is_empty());
    }
}
