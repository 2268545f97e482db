//! Transparent download resumption over a [`RoundTrip`].

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use crate::{Error, Request, Response, Result, RoundTrip, range};

/// Default number of resume attempts per download.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Conditional headers that must not accompany a resume request; the
/// `If-Range` validator is the only permitted precondition.
const SCRUBBED_HEADERS: [&str; 4] = [
    "If-None-Match",
    "If-Modified-Since",
    "If-Match",
    "If-Unmodified-Since",
];

/// A [`RoundTrip`] wrapper that resumes interrupted response bodies.
///
/// Eligible responses (range-capable, uncompressed, carrying a strong
/// validator) are wrapped so that a mid-stream read failure triggers a
/// follow-up `Range` request from the current offset. Ineligible responses
/// pass through untouched.
#[derive(Debug)]
pub struct ResumableClient<T> {
    inner: Arc<T>,
    max_retries: u32,
    backoff: Duration,
}

impl<T> Clone for ResumableClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

impl<T: RoundTrip + 'static> ResumableClient<T> {
    /// Wraps `inner` with the default retry budget and no backoff.
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::ZERO,
        }
    }

    /// Sets the number of resume attempts before giving up.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay inserted before each resume attempt.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Executes `req`, wrapping the response body for resumption when the
    /// exchange is eligible.
    pub fn execute(&self, req: Request) -> Result<Response> {
        let resp = self.inner.round_trip(&req)?;
        if !resp.is_success() {
            return Ok(resp);
        }

        let Some(plan) = ResumePlan::evaluate(&req, &resp) else {
            return Ok(resp);
        };

        let Response {
            status,
            headers,
            body,
        } = resp;
        tracing::debug!(url = %req.url, "response body is resumable");
        let body = ResumableBody {
            transport: Arc::clone(&self.inner),
            request: req,
            plan,
            body,
            delivered: 0,
            retries_left: self.max_retries,
            max_retries: self.max_retries,
            backoff: self.backoff,
        };
        Ok(Response {
            status,
            headers,
            body: Box::new(body),
        })
    }
}

/// Everything needed to construct and validate resume requests.
#[derive(Debug, Clone)]
struct ResumePlan {
    /// `If-Range` validator: a strong ETag, else `Last-Modified`.
    validator: String,
    /// Start of the original request's range (0 when no range was sent).
    initial_start: u64,
    /// Inclusive end of the original request's range, if bounded.
    initial_end: Option<u64>,
    /// Total bytes the original response promised to deliver.
    expected: Option<u64>,
}

impl ResumePlan {
    /// Decides whether the exchange can be resumed and captures the offsets.
    ///
    /// Eligibility requires: a 206 answer to our own `Range` request, or a
    /// 200 with `Accept-Ranges: bytes`; no content coding on the 200; and a
    /// strong validator (`ETag` without `W/`, else `Last-Modified`).
    fn evaluate(req: &Request, resp: &Response) -> Option<Self> {
        let requested_range = match req.headers.get("Range") {
            Some(value) => Some(range::parse_range(value)?),
            None => None,
        };

        match resp.status {
            206 => {
                requested_range?;
            }
            200 => {
                if !resp
                    .headers
                    .get("Accept-Ranges")
                    .is_some_and(|v| v.eq_ignore_ascii_case("bytes"))
                {
                    return None;
                }
                // A content coding makes offsets meaningless.
                if resp
                    .headers
                    .get("Content-Encoding")
                    .is_some_and(|v| !v.eq_ignore_ascii_case("identity"))
                {
                    return None;
                }
            }
            _ => return None,
        }

        let validator = match resp.headers.get("ETag") {
            Some(etag) if !etag.trim_start().starts_with("W/") => etag.to_owned(),
            _ => resp.headers.get("Last-Modified")?.to_owned(),
        };

        let (initial_start, initial_end) = requested_range.unwrap_or((0, None));
        let expected = resp
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok());

        Some(Self {
            validator,
            initial_start,
            initial_end,
            expected,
        })
    }
}

/// Response body that re-fetches the remaining range after a read failure.
struct ResumableBody<T> {
    transport: Arc<T>,
    request: Request,
    plan: ResumePlan,
    body: Box<dyn Read + Send>,
    /// Bytes handed to the caller so far.
    delivered: u64,
    retries_left: u32,
    max_retries: u32,
    backoff: Duration,
}

impl<T: RoundTrip> Read for ResumableBody<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.body.read(buf) {
                Ok(0) => {
                    // A short body with a declared length is a silent cut.
                    if self.plan.expected.is_some_and(|e| self.delivered < e) {
                        self.resume().map_err(io::Error::other)?;
                        continue;
                    }
                    return Ok(0);
                }
                Ok(n) => {
                    self.delivered += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, delivered = self.delivered, "read failed, resuming");
                    self.resume().map_err(io::Error::other)?;
                }
            }
        }
    }
}

impl<T: RoundTrip> ResumableBody<T> {
    /// Re-fetches the unread tail, retrying until the budget is spent.
    ///
    /// The last failure is surfaced once the budget runs out, so a server
    /// that keeps answering 200 yields the protocol violation, not a
    /// generic budget error.
    fn resume(&mut self) -> Result<()> {
        let mut last: Option<Error> = None;
        loop {
            if self.retries_left == 0 {
                return Err(last.unwrap_or(Error::BudgetExceeded(self.max_retries)));
            }
            self.retries_left -= 1;
            if !self.backoff.is_zero() {
                std::thread::sleep(self.backoff);
            }
            match self.resume_once() {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
    }

    /// One resume attempt: ranged re-request plus response validation.
    fn resume_once(&mut self) -> Result<()> {
        let start = self.plan.initial_start + self.delivered;
        let range_value = match self.plan.initial_end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };

        let mut req = self.request.clone();
        req.headers.set("Range", &range_value);
        req.headers.set("If-Range", &self.plan.validator);
        req.headers.set("Accept-Encoding", "identity");
        for name in SCRUBBED_HEADERS {
            req.headers.remove(name);
        }

        tracing::debug!(url = %req.url, range = %range_value, "resuming download");
        let resp = self.transport.round_trip(&req)?;
        if resp.status != 206 {
            return Err(Error::ProtocolViolation(format!(
                "expected 206 Partial Content, got {}",
                resp.status
            )));
        }
        // A 206 carrying a different strong ETag means the object changed
        // between segments even though the server kept serving ranges.
        if let Some(etag) = resp.headers.get("ETag") {
            if !etag.trim_start().starts_with("W/") && etag != self.plan.validator {
                return Err(Error::ValidatorMismatch);
            }
        }
        let content_range = resp
            .headers
            .get("Content-Range")
            .ok_or_else(|| Error::ProtocolViolation("missing Content-Range".into()))?;
        let (resp_start, _, _) = range::parse_content_range(content_range).ok_or_else(|| {
            Error::ProtocolViolation(format!("unparseable Content-Range {content_range:?}"))
        })?;
        if resp_start != start {
            return Err(Error::ProtocolViolation(format!(
                "requested offset {start} but server resumed at {resp_start}"
            )));
        }

        self.body = resp.body;
        Ok(())
    }
}
