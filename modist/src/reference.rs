//! OCI reference parsing and canonicalization.
//!
//! Unqualified references normalize onto the default registry:
//! - `ai/llama` → `index.docker.io/ai/llama:latest`
//! - `gemma:2b` → `index.docker.io/library/gemma:2b`
//! - `ghcr.io/org/model:v1` stays as written.
//!
//! A given tag string always canonicalizes the same way, so tags stored in
//! the index compare by string equality.

use std::fmt;

use crate::{Digest, Error, Result};

const DEFAULT_REGISTRY: &str = "index.docker.io";
const DEFAULT_TAG: &str = "latest";
const OFFICIAL_REPO_PREFIX: &str = "library";

/// A parsed, canonicalized OCI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Reference {
    /// Registry hostname (e.g. `index.docker.io`, `ghcr.io`).
    pub registry: String,
    /// Repository path (e.g. `library/gemma`, `ai/llama`).
    pub repository: String,
    /// Tag or digest identifier.
    pub identifier: Identifier,
}

/// Tag or digest identifier for a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Identifier {
    /// Named tag (e.g. `latest`, `v1.0`).
    Tag(String),
    /// Content-addressable digest.
    Digest(Digest),
}

impl Reference {
    /// Parses a reference string, canonicalizing registry, namespace, and tag.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidReference("empty reference".into()));
        }

        // Split off @digest.
        let (name, raw_id) = if let Some((n, digest)) = trimmed.split_once('@') {
            (n, Some(Identifier::Digest(Digest::parse(digest)?)))
        } else {
            (trimmed, None)
        };

        // Split registry from repository.
        let (registry, repo_with_tag) = match name.split_once('/') {
            Some((first, rest)) if is_registry(first) => {
                (canonical_registry(first), rest.to_owned())
            }
            _ => {
                let repo = if name.contains('/') {
                    name.to_owned()
                } else {
                    format!("{OFFICIAL_REPO_PREFIX}/{name}")
                };
                (DEFAULT_REGISTRY.to_owned(), repo)
            }
        };

        // Extract the tag unless a digest already identifies the artifact.
        let (repository, identifier) = match raw_id {
            Some(id) => (repo_with_tag, id),
            None => match repo_with_tag.rsplit_once(':') {
                Some((repo, tag)) => (repo.to_owned(), Identifier::Tag(tag.to_owned())),
                None => (repo_with_tag, Identifier::Tag(DEFAULT_TAG.to_owned())),
            },
        };

        if repository.is_empty() {
            return Err(Error::InvalidReference(input.to_owned()));
        }
        if let Identifier::Tag(tag) = &identifier {
            if !is_valid_tag(tag) {
                return Err(Error::InvalidReference(input.to_owned()));
            }
        }

        Ok(Self {
            registry,
            repository,
            identifier,
        })
    }

    /// Returns the tag, if this reference carries one.
    pub fn tag(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::Tag(t) => Some(t),
            Identifier::Digest(_) => None,
        }
    }

    /// Returns the digest, if this reference carries one.
    pub fn digest(&self) -> Option<&Digest> {
        match &self.identifier {
            Identifier::Tag(_) => None,
            Identifier::Digest(d) => Some(d),
        }
    }

    /// Canonical string form used as the stored tag.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Returns the registry API base URL for this reference.
    pub fn api_base(&self) -> String {
        let host = match self.registry.as_str() {
            DEFAULT_REGISTRY => "registry-1.docker.io",
            other => other,
        };
        if host == "localhost" || host.starts_with("localhost:") {
            format!("http://{host}/v2")
        } else {
            format!("https://{host}/v2")
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.identifier {
            Identifier::Tag(t) => write!(f, ":{t}"),
            Identifier::Digest(d) => write!(f, "@{d}"),
        }
    }
}

/// Returns `true` if the first path component names a registry host.
fn is_registry(s: &str) -> bool {
    s.contains('.') || s.contains(':') || s == "localhost"
}

/// Folds Docker Hub aliases onto the canonical registry host.
fn canonical_registry(host: &str) -> String {
    match host {
        "docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_owned(),
        other => other.to_owned(),
    }
}

/// Validates an OCI tag: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
fn is_valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    if !(first.is_ascii_alphanumeric() || first == b'_') {
        return false;
    }
    tag.len() <= 128
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}
