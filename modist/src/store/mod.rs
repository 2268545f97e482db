//! The content-addressed local store.
//!
//! On-disk layout under the store root:
//!
//! ```text
//! layout.json              — {"version":"1.0.0"}
//! models.json              — the index (see [`Index`])
//! blobs/<alg>/<hex>        — immutable blob files
//! blobs/<alg>/<hex>.incomplete — in-progress writes (crash leftovers ok)
//! manifests/<alg>/<hex>    — raw manifest bytes
//! bundles/<alg>/<hex>/     — materialized runtime bundles per artifact
//! ```
//!
//! Writers mutate blobs and manifests first and the index last, so a
//! successfully indexed model never dangles. One write-side operation runs
//! at a time; readers proceed concurrently with each other.

mod index;
mod write;

pub use index::{Index, IndexEntry};

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::artifact::StoredArtifact;
use crate::{BlobLayer, Digest, Error, Layer, Manifest, Result};

const LAYOUT_FILE: &str = "layout.json";
const MODELS_FILE: &str = "models.json";
const BLOBS_DIR: &str = "blobs";
const MANIFESTS_DIR: &str = "manifests";
const BUNDLES_DIR: &str = "bundles";

/// Current store layout version.
pub const LAYOUT_VERSION: &str = "1.0.0";

/// `layout.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layout {
    version: String,
}

/// Cooperative cancellation flag checked between transactional steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncanceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Deduplicated blob/manifest storage with a tag index.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    lock: RwLock<()>,
}

impl Store {
    /// Opens (and initializes) the store rooted at `root`.
    ///
    /// The root directory is created if only its final component is
    /// missing; a missing parent is an error. Foreign files already in the
    /// tree are left alone.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        match fs::create_dir(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        let store = Self {
            root,
            lock: RwLock::new(()),
        };
        store.init()?;
        Ok(store)
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn init(&self) -> Result<()> {
        let layout = self.root.join(LAYOUT_FILE);
        if !layout.exists() {
            let data = serde_json::to_vec_pretty(&Layout {
                version: LAYOUT_VERSION.to_owned(),
            })?;
            fs::write(&layout, data)?;
        }
        let models = self.root.join(MODELS_FILE);
        if !models.exists() {
            Index::default().save(&models)?;
        }
        Ok(())
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn index_path(&self) -> PathBuf {
        self.root.join(MODELS_FILE)
    }

    /// Blob path for a validated digest, confirmed to stay under the root.
    pub fn blob_path(&self, digest: &Digest) -> Result<PathBuf> {
        self.safe_child(&[BLOBS_DIR, digest.algorithm().as_str(), digest.hex()])
    }

    /// Manifest path for a validated digest.
    pub fn manifest_path(&self, digest: &Digest) -> Result<PathBuf> {
        self.safe_child(&[MANIFESTS_DIR, digest.algorithm().as_str(), digest.hex()])
    }

    /// Bundle directory for an artifact ID.
    pub fn bundle_dir(&self, id: &Digest) -> Result<PathBuf> {
        self.safe_child(&[BUNDLES_DIR, id.algorithm().as_str(), id.hex()])
    }

    /// Joins validated components under the root, rejecting any traversal.
    fn safe_child(&self, components: &[&str]) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in components {
            let part_path = Path::new(part);
            let mut comps = part_path.components();
            let ok = matches!(
                (comps.next(), comps.next()),
                (Some(Component::Normal(_)), None)
            );
            if !ok {
                return Err(Error::UnsafeDigest(part.to_string()));
            }
            path.push(part_path);
        }
        if !path.starts_with(&self.root) {
            return Err(Error::UnsafeDigest(path.display().to_string()));
        }
        Ok(path)
    }

    /// Returns `true` if the blob for `digest` is on disk.
    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Streams a blob into the store under its declared diff-ID.
    ///
    /// Returns `true` if the blob already existed (the reader is not
    /// consumed). Uses `.incomplete` + rename so concurrent readers never
    /// observe a partial blob; leftovers from crashes are overwritten.
    pub(crate) fn write_blob(&self, digest: &Digest, reader: &mut dyn Read) -> Result<bool> {
        let path = self.blob_path(digest)?;
        if path.is_file() {
            return Ok(true);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let incomplete = incomplete_path(&path);
        let result = (|| -> Result<()> {
            {
                let mut file = fs::File::create(&incomplete)?;
                io::copy(reader, &mut file)?;
                // Handle closes here; rename-after-close keeps Windows happy.
            }
            fs::rename(&incomplete, &path)?;
            Ok(())
        })();

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&incomplete) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %incomplete.display(), error = %cleanup,
                        "failed to remove incomplete blob");
                }
            }
            return Err(e);
        }
        Ok(false)
    }

    /// Writes raw manifest bytes at their digest path. Returns `true` if
    /// the manifest was already present.
    pub(crate) fn write_manifest_bytes(&self, digest: &Digest, bytes: &[u8]) -> Result<bool> {
        let path = self.manifest_path(digest)?;
        if path.is_file() {
            return Ok(true);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(false)
    }

    /// Lists all index entries.
    pub fn list(&self) -> Result<Vec<IndexEntry>> {
        let _guard = self.read_guard();
        Ok(Index::load(&self.index_path())?.entries().to_vec())
    }

    /// Reads the artifact a reference resolves to.
    pub fn read(&self, reference: &str) -> Result<StoredArtifact> {
        let _guard = self.read_guard();
        let index = Index::load(&self.index_path())?;
        let entry = index
            .find(reference)
            .ok_or_else(|| Error::ModelNotFound(reference.to_owned()))?;
        self.read_entry(entry)
    }

    fn read_entry(&self, entry: &IndexEntry) -> Result<StoredArtifact> {
        let id = Digest::parse(&entry.id)?;
        let raw_manifest = fs::read(self.manifest_path(&id)?)?;
        let manifest = Manifest::from_slice(&raw_manifest)?;
        let raw_config = fs::read(self.blob_path(&manifest.config.digest)?)?;

        let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(manifest.layers.len());
        for desc in &manifest.layers {
            layers.push(Arc::new(BlobLayer::new(
                self.blob_path(&desc.digest)?,
                desc.media_type.clone(),
                desc.digest.clone(),
                desc.size,
            )));
        }
        Ok(StoredArtifact::new(
            raw_manifest,
            manifest,
            raw_config,
            layers,
            entry.tags.clone(),
        ))
    }

    /// Removes every child of the root (not the root itself, which may be
    /// a mount point) and re-initializes.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_guard();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        self.init()
    }
}

/// `<path>.incomplete` sibling for in-progress writes.
fn incomplete_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".incomplete");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_initializes_layout_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = Store::open(&root).unwrap();

        let layout: serde_json::Value =
            serde_json::from_slice(&fs::read(root.join("layout.json")).unwrap()).unwrap();
        assert_eq!(layout["version"], "1.0.0");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn open_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Store::open(dir.path().join("a").join("b")).is_err());
    }

    #[test]
    fn open_preserves_existing_state_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        Store::open(&root).unwrap();
        fs::write(root.join("foreign.txt"), b"keep me").unwrap();

        Store::open(&root).unwrap();
        assert!(root.join("foreign.txt").exists());
    }

    #[test]
    fn blob_write_is_idempotent_and_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();
        let digest = Digest::sha256(b"blob");

        let existed = store.write_blob(&digest, &mut &b"blob"[..]).unwrap();
        assert!(!existed);
        let path = store.blob_path(&digest).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"blob");
        // No .incomplete leftover.
        assert!(!incomplete_path(&path).exists());

        // Second write is a no-op that does not consume the reader.
        let mut reader = &b"different"[..];
        let existed = store.write_blob(&digest, &mut reader).unwrap();
        assert!(existed);
        assert_eq!(reader.len(), 9);
        assert_eq!(fs::read(&path).unwrap(), b"blob");
    }

    #[test]
    fn blob_write_overwrites_stale_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();
        let digest = Digest::sha256(b"data");
        let path = store.blob_path(&digest).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(incomplete_path(&path), b"crash leftover").unwrap();

        store.write_blob(&digest, &mut &b"data"[..]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
        assert!(!incomplete_path(&path).exists());
    }

    #[test]
    fn read_unknown_reference_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();
        assert!(matches!(
            store.read("nope:latest"),
            Err(Error::ModelNotFound(_))
        ));
    }

    #[test]
    fn reset_clears_children_but_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = Store::open(&root).unwrap();
        let digest = Digest::sha256(b"x");
        store.write_blob(&digest, &mut &b"x"[..]).unwrap();

        store.reset().unwrap();
        assert!(root.exists());
        assert!(!store.has_blob(&digest));
        assert!(root.join("layout.json").exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.is_canceled());
        assert!(matches!(token.check(), Err(Error::Canceled)));
    }
}
