//! Error types for modist operations.

use std::path::PathBuf;

/// Alias for `Result<T, modist::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by model distribution operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The tag or digest reference string could not be parsed.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A digest string failed algorithm or hex validation.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A digest produced a path outside the store root.
    #[error("unsafe digest: {0}")]
    UnsafeDigest(String),

    /// The reference does not resolve in the store or registry.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Registry authentication was required or denied.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote artifact's config media type is not understood.
    #[error("unsupported config media type: {0}")]
    UnsupportedMediaType(String),

    /// Delete-by-ID against a multi-tagged entry without `force`.
    #[error("model {id} has multiple tags ({tags:?}); pass force to delete")]
    ConflictMultipleTags {
        /// Entry ID.
        id: String,
        /// Tags still pointing at the entry.
        tags: Vec<String>,
    },

    /// The builder was asked to attach a second config archive.
    #[error("a config archive layer is already attached")]
    DuplicateConfigArchive,

    /// No `.safetensors` files were found in the packaged directory.
    #[error("no safetensors files in {0}")]
    NoSafetensorsFiles(PathBuf),

    /// A sharded weight set is missing one or more shards.
    #[error("incomplete shard set: missing {0}")]
    IncompleteShardSet(String),

    /// The lightweight write pre-condition failed.
    #[error("layer {0} is not in the store; config-only write requires every layer present")]
    LayerMissingForLightweightWrite(String),

    /// Bundle unpack found neither gguf nor safetensors layers.
    #[error("model has no gguf or safetensors weight layers")]
    NoSupportedWeights,

    /// A directory slated for tarring is a symbolic link.
    #[error("refusing to tar symlinked directory {0}")]
    SymlinkedDirectory(PathBuf),

    /// A path escapes its required parent directory.
    #[error("path {path} escapes {root}")]
    PathEscape {
        /// Offending path.
        path: PathBuf,
        /// Directory it must stay within.
        root: PathBuf,
    },

    /// Registry protocol failure not covered by a more specific kind.
    #[error("registry: {0}")]
    Registry(String),

    /// The operation was canceled via its [`CancelToken`](crate::CancelToken).
    #[error("operation canceled")]
    Canceled,

    /// A transactional write failed and some rollback actions also failed.
    ///
    /// The original cause is `source`; `cleanup` lists the rollback errors
    /// that could not be resolved (never masking the cause).
    #[error("{source} (rollback cleanup errors: {})", cleanup.join("; "))]
    Rollback {
        /// The failure that triggered the rollback.
        #[source]
        source: Box<Error>,
        /// Rollback actions that themselves failed.
        cleanup: Vec<String>,
    },

    /// Resumable transport failure.
    #[error(transparent)]
    Resume(#[from] modist_http::Error),

    /// Filesystem or network I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
