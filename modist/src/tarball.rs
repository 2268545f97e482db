//! Standalone tarball export and import.
//!
//! The tarball carries the same content-addressed pieces as the store:
//!
//! ```text
//! blobs/
//! blobs/<alg>/
//! blobs/<alg>/<hex>   — one entry per layer blob, plus the config blob
//! manifest.json       — raw manifest bytes
//! ```
//!
//! Entries use mode 0666 and default ownership. `load` streams the same
//! structure back into a store.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path};
use std::sync::Arc;

use crate::artifact::{Artifact, StoredArtifact};
use crate::progress::ProgressSink;
use crate::store::Store;
use crate::{BlobLayer, Digest, Error, Layer, Manifest, Result};

const MANIFEST_ENTRY: &str = "manifest.json";
const BLOBS_PREFIX: &str = "blobs";
const ENTRY_MODE: u32 = 0o666;

/// Writes `artifact` as a tarball onto `writer`.
pub fn export(artifact: &dyn Artifact, writer: impl Write) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    append_dir(&mut builder, "blobs/")?;

    // One alg directory per algorithm in use, emitted once, in layer order.
    let mut algs: Vec<&'static str> = Vec::new();
    let layers = artifact.layers()?;
    let raw_config = artifact.raw_config()?;
    let config_digest = Digest::sha256(&raw_config);

    let mut blob_digests = Vec::with_capacity(layers.len() + 1);
    for layer in &layers {
        blob_digests.push(layer.digest()?);
    }
    blob_digests.push(config_digest.clone());
    for digest in &blob_digests {
        let alg = digest.algorithm().as_str();
        if !algs.contains(&alg) {
            algs.push(alg);
            append_dir(&mut builder, &format!("{BLOBS_PREFIX}/{alg}/"))?;
        }
    }

    for layer in &layers {
        let digest = layer.digest()?;
        let name = blob_entry_name(&digest);
        append_blob(&mut builder, &name, layer.size()?, layer.open()?)?;
    }
    append_blob(
        &mut builder,
        &blob_entry_name(&config_digest),
        raw_config.len() as u64,
        io::Cursor::new(&raw_config),
    )?;

    let raw_manifest = artifact.raw_manifest()?;
    append_blob(
        &mut builder,
        MANIFEST_ENTRY,
        raw_manifest.len() as u64,
        io::Cursor::new(&raw_manifest),
    )?;

    builder.into_inner()?.flush()?;
    Ok(())
}

/// Writes `artifact` as a tarball file at `path`.
pub fn export_to_file(artifact: &dyn Artifact, path: &Path) -> Result<()> {
    let file = fs::File::create(path)?;
    export(artifact, io::BufWriter::new(file))
}

fn blob_entry_name(digest: &Digest) -> String {
    format!("{BLOBS_PREFIX}/{}/{}", digest.algorithm().as_str(), digest.hex())
}

fn append_dir(builder: &mut tar::Builder<impl Write>, name: &str) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(ENTRY_MODE);
    header.set_size(0);
    builder.append_data(&mut header, name, io::empty())?;
    Ok(())
}

fn append_blob(
    builder: &mut tar::Builder<impl Write>,
    name: &str,
    size: u64,
    reader: impl Read,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(ENTRY_MODE);
    header.set_size(size);
    builder.append_data(&mut header, name, reader)?;
    Ok(())
}

/// Imports a tarball produced by [`export`] into the store.
///
/// Blobs are streamed in under their filename digests; the manifest is
/// written at its computed digest; finally the artifact is indexed with
/// any `tags` supplied.
pub fn load(
    store: &Store,
    reader: impl Read,
    tags: &[String],
    progress: &ProgressSink,
) -> Result<Digest> {
    let mut archive = tar::Archive::new(reader);
    let mut raw_manifest: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if entry.header().entry_type().is_dir() {
            continue;
        }
        if path == Path::new(MANIFEST_ENTRY) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            raw_manifest = Some(bytes);
            continue;
        }
        if let Some(digest) = parse_blob_entry(&path)? {
            store.write_blob(&digest, &mut entry)?;
        } else {
            tracing::debug!(entry = %path.display(), "skipping unknown tarball entry");
        }
    }

    let raw_manifest = raw_manifest.ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "tarball has no manifest.json",
        ))
    })?;

    // Re-assemble a store-backed view and index it transactionally.
    let manifest = Manifest::from_slice(&raw_manifest)?;
    let raw_config = fs::read(store.blob_path(&manifest.config.digest)?)?;
    let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(manifest.layers.len());
    for desc in &manifest.layers {
        layers.push(Arc::new(BlobLayer::new(
            store.blob_path(&desc.digest)?,
            desc.media_type.clone(),
            desc.digest.clone(),
            desc.size,
        )));
    }
    let artifact = StoredArtifact::new(raw_manifest, manifest, raw_config, layers, Vec::new());
    store.write(&artifact, tags, progress)
}

/// Parses `blobs/<alg>/<hex>` into a validated digest; `None` for foreign
/// entries.
fn parse_blob_entry(path: &Path) -> Result<Option<Digest>> {
    let mut parts = path.components();
    let (Some(Component::Normal(prefix)), Some(Component::Normal(alg)), Some(Component::Normal(hex)), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Ok(None);
    };
    if prefix.to_str() != Some(BLOBS_PREFIX) {
        return Ok(None);
    }
    let (Some(alg), Some(hex)) = (alg.to_str(), hex.to_str()) else {
        return Ok(None);
    };
    // The filename names the content; validate it like any other digest
    // before it can touch a store path.
    Ok(Some(Digest::parse(&format!("{alg}:{hex}"))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::LocalArtifact;
    use crate::{FileLayer, Format, MediaType, ModelConfig};

    fn sample_artifact(dir: &Path) -> LocalArtifact {
        let weights = dir.join("w.gguf");
        fs::write(&weights, b"tar-weights").unwrap();
        let license = dir.join("LICENSE");
        fs::write(&license, b"mit").unwrap();
        LocalArtifact::new(
            vec![
                Arc::new(FileLayer::new(&weights, MediaType::Gguf)) as Arc<dyn Layer>,
                Arc::new(FileLayer::new(&license, MediaType::License)) as Arc<dyn Layer>,
            ],
            ModelConfig {
                format: Some(Format::Gguf),
                ..ModelConfig::default()
            },
        )
    }

    #[test]
    fn export_layout_and_modes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = sample_artifact(dir.path());
        let mut buf = Vec::new();
        export(&artifact, &mut buf).unwrap();

        let mut archive = tar::Archive::new(&buf[..]);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            names.push(name.trim_end_matches('/').to_owned());
            assert_eq!(entry.header().mode().unwrap(), 0o666);
        }

        let weights_digest = Digest::sha256(b"tar-weights");
        assert_eq!(names[0], "blobs");
        assert_eq!(names[1], "blobs/sha256");
        assert!(names.contains(&format!("blobs/sha256/{}", weights_digest.hex())));
        assert_eq!(names.last().unwrap(), MANIFEST_ENTRY);
        // blobs dir + alg dir + 2 layers + config + manifest
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn export_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = sample_artifact(dir.path());
        let id = artifact.id().unwrap();

        let mut buf = Vec::new();
        export(&artifact, &mut buf).unwrap();

        let store = Store::open(dir.path().join("store")).unwrap();
        let loaded_id = load(
            &store,
            &buf[..],
            &["ai/loaded:v1".into()],
            &ProgressSink::disabled(),
        )
        .unwrap();
        assert_eq!(loaded_id, id);

        let stored = store.read("ai/loaded:v1").unwrap();
        assert_eq!(stored.raw_manifest().unwrap(), artifact.raw_manifest().unwrap());
        let mut out = Vec::new();
        stored.gguf_layers().unwrap()[0]
            .open()
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"tar-weights");
    }

    #[test]
    fn load_rejects_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();

        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(1);
            header.set_mode(0o666);
            builder
                .append_data(&mut header, "random.txt", &b"x"[..])
                .unwrap();
            builder.finish().unwrap();
        }
        assert!(load(&store, &buf[..], &[], &ProgressSink::disabled()).is_err());
    }

    #[test]
    fn load_rejects_invalid_blob_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();

        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(1);
            header.set_mode(0o666);
            builder
                .append_data(&mut header, "blobs/md5/abcd", &b"x"[..])
                .unwrap();
            builder.finish().unwrap();
        }
        let err = load(&store, &buf[..], &[], &ProgressSink::disabled()).unwrap_err();
        assert!(matches!(err, Error::InvalidDigest(_)));
    }

    #[test]
    fn export_to_file_writes_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = sample_artifact(dir.path());
        let path = dir.path().join("model.tar");
        export_to_file(&artifact, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
