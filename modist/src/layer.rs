//! Content-addressed layers.
//!
//! Layers are uncompressed by convention, so a layer's digest equals its
//! diff-ID. Local layers hash their backing file lazily, exactly once;
//! the file itself is shared and read-only — a layer never owns it.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::{Descriptor, Digest, MediaType, Result};

/// A content-addressed payload unit.
pub trait Layer: Send + Sync {
    /// Declared media type.
    fn media_type(&self) -> &MediaType;

    /// Digest of the layer bytes; equal to the diff-ID here.
    fn digest(&self) -> Result<Digest>;

    /// Size of the layer bytes.
    fn size(&self) -> Result<u64>;

    /// Opens the layer for streaming. Multiple concurrent readers are fine.
    fn open(&self) -> Result<Box<dyn Read + Send>>;

    /// Backing file on the local filesystem, when one exists.
    ///
    /// Bundle materialization hardlinks from this path; layers without one
    /// (e.g. registry-remote) are streamed instead.
    fn source_path(&self) -> Option<&Path> {
        None
    }

    /// Manifest descriptor for this layer.
    fn descriptor(&self) -> Result<Descriptor> {
        Ok(Descriptor::new(
            self.media_type().clone(),
            self.digest()?,
            self.size()?,
        ))
    }
}

/// A layer backed by a local file.
#[derive(Debug)]
pub struct FileLayer {
    path: PathBuf,
    media_type: MediaType,
    hashed: OnceLock<(Digest, u64)>,
}

impl FileLayer {
    /// Creates a layer over `path` with the given media type.
    pub fn new(path: impl Into<PathBuf>, media_type: MediaType) -> Self {
        Self {
            path: path.into(),
            media_type,
            hashed: OnceLock::new(),
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams the file through SHA-256 once; later calls reuse the result.
    fn hashed(&self) -> Result<&(Digest, u64)> {
        if let Some(v) = self.hashed.get() {
            return Ok(v);
        }
        let v = Digest::sha256_file(&self.path)?;
        Ok(self.hashed.get_or_init(|| v))
    }
}

impl Layer for FileLayer {
    fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    fn digest(&self) -> Result<Digest> {
        Ok(self.hashed()?.0.clone())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.hashed()?.1)
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// A store-resident layer whose digest and size are already known.
#[derive(Debug, Clone)]
pub struct BlobLayer {
    path: PathBuf,
    media_type: MediaType,
    digest: Digest,
    size: u64,
}

impl BlobLayer {
    /// Creates a layer over an existing blob file.
    pub fn new(path: impl Into<PathBuf>, media_type: MediaType, digest: Digest, size: u64) -> Self {
        Self {
            path: path.into(),
            media_type,
            digest,
            size,
        }
    }

    /// The blob file path inside the store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Layer for BlobLayer {
    fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    fn digest(&self) -> Result<Digest> {
        Ok(self.digest.clone())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_layer_hashes_lazily_and_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.gguf");
        fs::write(&path, b"model bytes").unwrap();

        let layer = FileLayer::new(&path, MediaType::Gguf);
        assert_eq!(layer.digest().unwrap(), Digest::sha256(b"model bytes"));
        assert_eq!(layer.size().unwrap(), 11);

        // The digest is pinned after first computation even if the file
        // changes underneath (layers treat files as read-only).
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"more").unwrap();
        drop(f);
        assert_eq!(layer.digest().unwrap(), Digest::sha256(b"model bytes"));
    }

    #[test]
    fn file_layer_open_streams_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l");
        fs::write(&path, b"abc").unwrap();

        let layer = FileLayer::new(&path, MediaType::License);
        let mut out = Vec::new();
        layer.open().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn descriptor_reflects_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l");
        fs::write(&path, b"abcd").unwrap();

        let layer = FileLayer::new(&path, MediaType::Safetensors);
        let desc = layer.descriptor().unwrap();
        assert_eq!(desc.media_type, MediaType::Safetensors);
        assert_eq!(desc.size, 4);
        assert_eq!(desc.digest, Digest::sha256(b"abcd"));
    }

    #[test]
    fn blob_layer_reports_known_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, b"payload").unwrap();

        let digest = Digest::sha256(b"payload");
        let layer = BlobLayer::new(&path, MediaType::Gguf, digest.clone(), 7);
        assert_eq!(layer.digest().unwrap(), digest);
        assert_eq!(layer.size().unwrap(), 7);
    }
}
