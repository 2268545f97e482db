//! Write-side store operations: transactional writes, deletes, tag edits.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::progress::{ProgressSink, TrackedReader};
use crate::{Digest, Error, Reference, Result};

use super::index::{Index, entry_files};
use super::{CancelToken, Store};

/// One undo step, executed in reverse order on failure.
enum Rollback {
    /// Remove a file this write created.
    RemoveFile(PathBuf),
    /// Restore the index snapshot taken before the write.
    RestoreIndex(Index),
}

impl Store {
    /// Transactionally writes an artifact: config blob, layer blobs,
    /// manifest, then the index entry with `tags` applied exclusively to
    /// it. Either everything becomes visible or the store is rolled back
    /// to its prior state.
    pub fn write(
        &self,
        artifact: &dyn Artifact,
        tags: &[String],
        progress: &ProgressSink,
    ) -> Result<Digest> {
        self.write_with(artifact, tags, progress, &CancelToken::new())
    }

    /// [`write`](Self::write) with cooperative cancellation between steps.
    pub fn write_with(
        &self,
        artifact: &dyn Artifact,
        tags: &[String],
        progress: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Digest> {
        let _guard = self.write_guard();
        self.transact(artifact, tags, progress, cancel, true)
    }

    /// Config-only write for artifacts whose layers are all present.
    ///
    /// Writes only the config blob and manifest (same rollback discipline,
    /// no layer streaming). Fails with
    /// [`Error::LayerMissingForLightweightWrite`] when any layer blob is
    /// absent.
    pub fn write_lightweight(
        &self,
        artifact: &dyn Artifact,
        tags: &[String],
        progress: &ProgressSink,
    ) -> Result<Digest> {
        let _guard = self.write_guard();
        for layer in artifact.layers()? {
            let digest = layer.digest()?;
            if !self.has_blob(&digest) {
                return Err(Error::LayerMissingForLightweightWrite(digest.to_string()));
            }
        }
        self.transact(artifact, tags, progress, &CancelToken::new(), false)
    }

    /// The shared transactional body. Caller holds the write guard.
    fn transact(
        &self,
        artifact: &dyn Artifact,
        tags: &[String],
        progress: &ProgressSink,
        cancel: &CancelToken,
        write_layers: bool,
    ) -> Result<Digest> {
        let snapshot = Index::load(&self.index_path())?;
        let mut rollback: Vec<Rollback> = Vec::new();
        match self.apply_write(
            artifact,
            tags,
            progress,
            cancel,
            write_layers,
            &snapshot,
            &mut rollback,
        ) {
            Ok(id) => Ok(id),
            Err(cause) => Err(self.run_rollback(rollback, cause)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_write(
        &self,
        artifact: &dyn Artifact,
        tags: &[String],
        progress: &ProgressSink,
        cancel: &CancelToken,
        write_layers: bool,
        snapshot: &Index,
        rollback: &mut Vec<Rollback>,
    ) -> Result<Digest> {
        cancel.check()?;

        // Config blob first; its digest names it.
        let raw_config = artifact.raw_config()?;
        let config_digest = Digest::sha256(&raw_config);
        if !self.write_blob(&config_digest, &mut raw_config.as_slice())? {
            rollback.push(Rollback::RemoveFile(self.blob_path(&config_digest)?));
        }

        // Layer blobs in manifest order, with progress over the total.
        let layers = artifact.layers()?;
        let mut diff_ids = Vec::with_capacity(layers.len());
        if write_layers {
            let mut total: u64 = 0;
            for layer in &layers {
                total += layer.size()?;
            }
            let mut pulled: u64 = 0;
            for layer in &layers {
                cancel.check()?;
                let digest = layer.digest()?;
                let size = layer.size()?;
                if !self.has_blob(&digest) {
                    let reader = layer.open()?;
                    let mut tracked = TrackedReader::new(
                        reader,
                        progress.clone(),
                        total,
                        pulled,
                        digest.to_string(),
                        size,
                    );
                    if !self.write_blob(&digest, &mut tracked)? {
                        rollback.push(Rollback::RemoveFile(self.blob_path(&digest)?));
                    }
                }
                pulled += size;
                diff_ids.push(digest);
            }
        } else {
            for layer in &layers {
                diff_ids.push(layer.digest()?);
            }
        }

        cancel.check()?;

        // Manifest bytes are byte-exact; the ID is their digest.
        let raw_manifest = artifact.raw_manifest()?;
        let id = Digest::sha256(&raw_manifest);
        if !self.write_manifest_bytes(&id, &raw_manifest)? {
            rollback.push(Rollback::RemoveFile(self.manifest_path(&id)?));
        }

        // Index goes last: entry, then exclusive tags.
        let mut index = snapshot.clone();
        let id_str = id.to_string();
        index.upsert(&id_str, entry_files(&diff_ids, &config_digest));
        for tag in tags {
            let reference = Reference::parse(tag)?;
            if reference.tag().is_none() {
                return Err(Error::InvalidReference(tag.clone()));
            }
            index.apply_tag(&id_str, &reference.canonical());
        }
        rollback.push(Rollback::RestoreIndex(snapshot.clone()));
        index.save(&self.index_path())?;

        tracing::debug!(id = %id_str, tags = ?tags, "artifact written");
        Ok(id)
    }

    /// Runs rollback actions in reverse, aggregating cleanup failures
    /// without masking the original cause.
    fn run_rollback(&self, rollback: Vec<Rollback>, cause: Error) -> Error {
        let mut cleanup = Vec::new();
        for action in rollback.into_iter().rev() {
            match action {
                Rollback::RemoveFile(path) => {
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != io::ErrorKind::NotFound {
                            cleanup.push(format!("remove {}: {e}", path.display()));
                        }
                    }
                }
                Rollback::RestoreIndex(index) => {
                    if let Err(e) = index.save(&self.index_path()) {
                        cleanup.push(format!("restore index: {e}"));
                    }
                }
            }
        }
        if cleanup.is_empty() {
            cause
        } else {
            Error::Rollback {
                source: Box::new(cause),
                cleanup,
            }
        }
    }

    /// Deletes a model or just a tag, reference-counting shared blobs.
    ///
    /// Delete-by-tag on a multi-tagged entry only untags; the entry's last
    /// tag triggers a full delete. Delete-by-ID against a multi-tagged
    /// entry requires `force`. Returns the entry ID and the tags removed.
    pub fn delete(&self, reference: &str, force: bool) -> Result<(String, Vec<String>)> {
        let _guard = self.write_guard();
        let mut index = Index::load(&self.index_path())?;
        let entry = index
            .find(reference)
            .cloned()
            .ok_or_else(|| Error::ModelNotFound(reference.to_owned()))?;

        let by_id = entry.id == reference
            || Reference::parse(reference)
                .ok()
                .and_then(|r| r.digest().map(ToString::to_string))
                .is_some_and(|d| d == entry.id);

        if by_id {
            if entry.tags.len() > 1 && !force {
                return Err(Error::ConflictMultipleTags {
                    id: entry.id,
                    tags: entry.tags,
                });
            }
        } else if let Ok(r) = Reference::parse(reference) {
            if r.tag().is_some() && entry.tags.len() > 1 {
                // Other tags keep the model alive; just untag.
                let canonical = r.canonical();
                index.strip_tag(&canonical);
                index.save(&self.index_path())?;
                return Ok((entry.id, vec![canonical]));
            }
        }

        // Full delete: drop blobs nobody else references, then the
        // manifest and bundle, then the index entry (index last).
        let mut remaining = index.clone();
        remaining.remove(&entry.id);
        for file in &entry.files {
            if remaining.reference_count(file) > 0 {
                continue;
            }
            match Digest::parse(file) {
                Ok(digest) => match self.blob_path(&digest) {
                    Ok(path) => remove_file_nonfatal(&path),
                    Err(e) => tracing::warn!(file, error = %e, "skipping unsafe blob path"),
                },
                Err(e) => tracing::warn!(file, error = %e, "skipping invalid blob reference"),
            }
        }
        if let Ok(id) = Digest::parse(&entry.id) {
            if let Ok(path) = self.manifest_path(&id) {
                remove_file_nonfatal(&path);
            }
            if let Ok(bundle) = self.bundle_dir(&id) {
                if bundle.is_dir() {
                    if let Err(e) = fs::remove_dir_all(&bundle) {
                        tracing::warn!(path = %bundle.display(), error = %e,
                            "failed to remove bundle directory");
                    }
                }
            }
        }

        index.remove(&entry.id);
        index.save(&self.index_path())?;
        tracing::debug!(id = %entry.id, "model deleted");
        Ok((entry.id, entry.tags))
    }

    /// Applies tags to the entry `reference` resolves to, with tag-move
    /// semantics. Returns the canonicalized tags.
    pub fn add_tags(&self, reference: &str, new_tags: &[String]) -> Result<Vec<String>> {
        let _guard = self.write_guard();
        let mut index = Index::load(&self.index_path())?;
        let id = index
            .find(reference)
            .map(|e| e.id.clone())
            .ok_or_else(|| Error::ModelNotFound(reference.to_owned()))?;

        let mut canonical = Vec::with_capacity(new_tags.len());
        for tag in new_tags {
            let r = Reference::parse(tag)?;
            if r.tag().is_none() {
                return Err(Error::InvalidReference(tag.clone()));
            }
            canonical.push(r.canonical());
        }
        for tag in &canonical {
            index.apply_tag(&id, tag);
        }
        index.save(&self.index_path())?;
        Ok(canonical)
    }

    /// Strips tags from whichever entries carry them.
    ///
    /// An unparsable tag aborts, but removals applied so far are persisted
    /// first. Returns the canonical tags actually removed.
    pub fn remove_tags(&self, tags: &[String]) -> Result<Vec<String>> {
        let _guard = self.write_guard();
        let mut index = Index::load(&self.index_path())?;
        let mut removed = Vec::new();
        for tag in tags {
            let parsed = Reference::parse(tag);
            let canonical = match parsed {
                Ok(r) if r.tag().is_some() => r.canonical(),
                _ => {
                    index.save(&self.index_path())?;
                    return Err(Error::InvalidReference(tag.clone()));
                }
            };
            if index.strip_tag(&canonical) {
                removed.push(canonical);
            }
        }
        index.save(&self.index_path())?;
        Ok(removed)
    }
}

/// Removes a file, logging (not failing) on anything but absence.
fn remove_file_nonfatal(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}
