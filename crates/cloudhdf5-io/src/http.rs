//! HTTP(S) range backend on a blocking `reqwest` client.

use std::io;
use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;

use crate::error::{FetchError, LengthMismatch};
use crate::locator::Credentials;
use crate::RangeBackend;

/// Reads byte ranges of one URL with `Range` requests.
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    url: String,
    credentials: Credentials,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            credentials,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Anonymous => req,
            Credentials::Bearer(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            Credentials::Headers(headers) => headers
                .iter()
                .fold(req, |req, (name, value)| req.header(name.as_str(), value.as_str())),
        }
    }

    fn send(&self, req: RequestBuilder) -> io::Result<Response> {
        self.authorize(req).send().map_err(to_io)
    }
}

fn to_io(err: reqwest::Error) -> io::Error {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else if err.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, err)
}

fn status_error(status: StatusCode, url: &str) -> io::Error {
    let kind = match status {
        StatusCode::NOT_FOUND => io::ErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => io::ErrorKind::PermissionDenied,
        StatusCode::RANGE_NOT_SATISFIABLE => io::ErrorKind::UnexpectedEof,
        s if s.is_client_error() => io::ErrorKind::InvalidInput,
        _ => io::ErrorKind::Other,
    };
    let reason = status.canonical_reason().unwrap_or("unknown");
    io::Error::new(kind, format!("{url}: HTTP {} {reason}", status.as_u16()))
}

/// Total length from a `Content-Range: bytes a-b/total` header.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

impl RangeBackend for HttpBackend {
    fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let last = offset + len - 1;
        let resp = self.send(self.client.get(&self.url).header(RANGE, format!("bytes={offset}-{last}")))?;
        let status = resp.status();
        let body = match status {
            StatusCode::PARTIAL_CONTENT => resp.bytes().map_err(to_io)?.to_vec(),
            // Server ignored the range and sent the whole object.
            StatusCode::OK => {
                let all = resp.bytes().map_err(to_io)?;
                let start = offset as usize;
                let end = start.saturating_add(len as usize);
                all.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("range {offset}+{len} extends past object end {}", all.len()),
                    )
                })?
            }
            other => return Err(status_error(other, &self.url)),
        };
        if body.len() as u64 != len {
            debug!("{}: body of {} bytes for range {offset}+{len}", self.url, body.len());
            return Err(LengthMismatch {
                wanted: len,
                got: body.len() as u64,
            }
            .into_io());
        }
        Ok(body)
    }

    fn size(&self) -> io::Result<u64> {
        let resp = self.send(self.client.head(&self.url))?;
        if resp.status().is_success() {
            if let Some(len) = resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
            {
                return Ok(len);
            }
        }
        debug!("{}: HEAD gave no length, probing with a range request", self.url);
        let resp = self.send(self.client.get(&self.url).header(RANGE, "bytes=0-0"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &self.url));
        }
        resp.headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("{}: object size unknown", self.url)))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
