//! Production [`RoundTrip`] backed by [`ureq`].

use std::io;

use crate::{Error, Headers, Request, Response, Result, RoundTrip};

/// Blocking HTTP transport over ureq's default agent.
///
/// Non-2xx statuses come back as plain [`Response`]s so the resumption
/// layer can inspect them; only connection-level failures are errors.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct UreqTransport;

impl UreqTransport {
    /// Creates the transport.
    pub fn new() -> Self {
        Self
    }
}

impl RoundTrip for UreqTransport {
    fn round_trip(&self, req: &Request) -> Result<Response> {
        let mut call = ureq::get(&req.url);
        for (name, value) in req.headers.iter() {
            call = call.header(name, value);
        }

        match call.call() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let mut headers = Headers::new();
                for (name, value) in resp.headers() {
                    if let Ok(v) = value.to_str() {
                        headers.append(name.as_str(), v);
                    }
                }
                Ok(Response {
                    status,
                    headers,
                    body: Box::new(resp.into_body().into_reader()),
                })
            }
            // Error statuses carry no body we care about; surface the code.
            Err(ureq::Error::StatusCode(code)) => Ok(Response {
                status: code,
                headers: Headers::new(),
                body: Box::new(io::empty()),
            }),
            Err(e) => Err(Error::Http(e.to_string())),
        }
    }
}
