//! Resumable range-request HTTP transport.
//!
//! Large model blobs routinely take minutes to download; a single dropped
//! connection should not restart the transfer from byte zero. This crate
//! wraps any [`RoundTrip`] implementation so that an interrupted response
//! body is transparently re-fetched from the current offset with an HTTP
//! `Range` request, guarded by an `If-Range` validator so a changed remote
//! object is never stitched together from mismatched segments.
//!
//! ```no_run
//! use modist_http::{Request, ResumableClient, UreqTransport};
//!
//! let client = ResumableClient::new(UreqTransport::new());
//! let resp = client.execute(Request::get("https://example.com/blob"))?;
//! let mut body = resp.body; // io::Read that resumes on failure
//! # Ok::<(), modist_http::Error>(())
//! ```

mod range;
mod resumable;
mod transport;

pub use range::{parse_content_range, parse_range};
pub use resumable::ResumableClient;
pub use transport::UreqTransport;

use std::io::Read;

/// Alias for `Result<T, modist_http::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the resumable transport.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Every resume attempt in the retry budget was spent.
    #[error("resume retry budget of {0} exhausted")]
    BudgetExceeded(u32),

    /// The server stopped honoring the `If-Range` validator between segments.
    #[error("validator changed between resumed segments")]
    ValidatorMismatch,

    /// A resume response violated the range protocol (non-206 status, bad or
    /// mismatched `Content-Range`).
    #[error("resume protocol violation: {0}")]
    ProtocolViolation(String),

    /// An HTTP-level failure from the underlying transport.
    #[error("http: {0}")]
    Http(String),

    /// Filesystem or socket I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Case-insensitive header multimap with insertion order preserved.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every value of `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.entries.push((name.to_owned(), value.to_owned()));
    }

    /// Appends a value without touching existing ones.
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_owned(), value.to_owned()));
    }

    /// Removes every value of `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Returns `true` if any value of `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// An outgoing GET request.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Request {
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: Headers,
}

impl Request {
    /// Builds a GET request for `url` with no headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Headers::new(),
        }
    }

    /// Adds a header and returns the request (builder style).
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }
}

/// A response with a streaming body.
#[non_exhaustive]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Streaming response body.
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Response {
    /// Builds a response from its parts.
    pub fn new(status: u16, headers: Headers, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A blocking HTTP round-tripper: one request in, one response out.
///
/// [`ResumableClient`] layers resumption on top of any implementation.
/// Implementations must surface non-2xx statuses as plain [`Response`]s,
/// not errors, so the layering above can inspect them.
pub trait RoundTrip: Send + Sync {
    /// Executes a single GET exchange.
    fn round_trip(&self, req: &Request) -> Result<Response>;
}

impl<T: RoundTrip + ?Sized> RoundTrip for Box<T> {
    fn round_trip(&self, req: &Request) -> Result<Response> {
        (**self).round_trip(req)
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for std::sync::Arc<T> {
    fn round_trip(&self, req: &Request) -> Result<Response> {
        (**self).round_trip(req)
    }
}
