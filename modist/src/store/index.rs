//! The store index (`models.json`): known artifacts, their tags, and the
//! blobs they reference.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Digest, Reference, Result};

/// One indexed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IndexEntry {
    /// Artifact ID: the manifest digest string.
    pub id: String,
    /// Canonicalized tags pointing at this artifact.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Every blob this entry references: layer diff-IDs plus the config
    /// digest. Drives reference-counted deletion.
    #[serde(default)]
    pub files: Vec<String>,
}

impl IndexEntry {
    /// Returns `true` when `reference` resolves to this entry.
    ///
    /// Matches by exact ID, by digest reference, or by canonical tag.
    pub fn matches_reference(&self, reference: &str) -> bool {
        if self.id == reference {
            return true;
        }
        if let Ok(r) = Reference::parse(reference) {
            match r.digest() {
                Some(d) => return d.to_string() == self.id,
                None => return self.tags.contains(&r.canonical()),
            }
        }
        false
    }
}

/// Ordered list of index entries, stored as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    /// Loads the index file; a missing file is an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the index as pretty-printed JSON (full overwrite).
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// All entries in index order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Finds the entry a reference resolves to.
    pub fn find(&self, reference: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.matches_reference(reference))
    }

    /// Mutable lookup by exact ID.
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut IndexEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Inserts a new entry or merges `files` into an existing one.
    ///
    /// Existing tags are kept; the caller applies new tags separately so
    /// tag-move semantics stay in one place.
    pub fn upsert(&mut self, id: &str, files: Vec<String>) {
        match self.find_by_id_mut(id) {
            Some(entry) => entry.files = files,
            None => self.entries.push(IndexEntry {
                id: id.to_owned(),
                tags: Vec::new(),
                files,
            }),
        }
    }

    /// Points `tag` (already canonical) at the entry with `id`, removing it
    /// from any other entry. The move is atomic within the in-memory index.
    pub fn apply_tag(&mut self, id: &str, tag: &str) {
        for entry in &mut self.entries {
            entry.tags.retain(|t| t != tag);
        }
        if let Some(entry) = self.find_by_id_mut(id) {
            entry.tags.push(tag.to_owned());
        }
    }

    /// Strips `tag` (already canonical) from whichever entry carries it.
    /// Returns `true` if anything changed.
    pub fn strip_tag(&mut self, tag: &str) -> bool {
        let mut changed = false;
        for entry in &mut self.entries {
            let before = entry.tags.len();
            entry.tags.retain(|t| t != tag);
            changed |= entry.tags.len() != before;
        }
        changed
    }

    /// Removes the entry with `id`.
    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }

    /// Counts how many entries reference `file`.
    pub fn reference_count(&self, file: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.files.iter().any(|f| f == file))
            .count()
    }
}

/// Builds the `files` list for an entry: layer diff-IDs then config digest.
pub fn entry_files(diff_ids: &[Digest], config: &Digest) -> Vec<String> {
    let mut files: Vec<String> = diff_ids.iter().map(ToString::to_string).collect();
    files.push(config.to_string());
    files
}
