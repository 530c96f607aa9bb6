//! A thin, explicit wrapper around `reqwest::blocking::Client` that applies
//! registered basic-auth credentials and collapses the "success response or
//! HTTP error object" duck-typing the design notes call out into a single
//! tagged [`UpstreamResponse`].

use std::io::Read;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

use crate::auth::AuthStore;

/// Hard cap applied when slurping a response body fully into memory (used by
/// the index's `InRelease` probes, never by the proxy's streaming path).
pub const MAX_PROBE_BODY: usize = 500 * 1024 + 1;

/// The outcome of an upstream HTTP request, successful or not — both cases
/// carry the same shape, so callers never need to distinguish "a response"
/// from "an error that happens to also be a response".
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    inner: reqwest::blocking::Response,
}

impl UpstreamResponse {
    /// Read up to `limit` bytes of the body. Returns the bytes read and
    /// whether the body contained more than `limit` bytes.
    pub fn read_limited(mut self, limit: usize) -> Result<(Vec<u8>, bool)> {
        let mut buf = vec![0u8; limit];
        let mut total = 0usize;
        loop {
            if total == buf.len() {
                // Body may still have more; detect via one extra byte probe.
                let mut probe = [0u8; 1];
                let n = self.inner.read(&mut probe).context("reading probe byte")?;
                return Ok((buf, n > 0));
            }
            let n = self
                .inner
                .read(&mut buf[total..])
                .context("reading response body")?;
            if n == 0 {
                buf.truncate(total);
                return Ok((buf, false));
            }
            total += n;
        }
    }

    pub fn into_reader(self) -> impl Read {
        self.inner
    }
}

/// Authenticating blocking HTTP client shared by the index, cache probes,
/// and the proxy request handler.
pub struct AuthenticatingHttpClient {
    client: Client,
    auth: AuthStore,
}

impl AuthenticatingHttpClient {
    pub fn new(auth: AuthStore) -> Result<Self> {
        // No gzip (or any other) feature enabled: bodies are forwarded to
        // clients byte-for-byte, never transparently decompressed.
        let client = Client::builder()
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, auth })
    }

    /// Issue a request, applying basic auth for any host with registered
    /// credentials and copying through every header the caller supplies
    /// (used by the proxy to preserve `Authorization`/`If-Modified-Since`/
    /// `Range` etc. from the original client request).
    pub fn request(
        &self,
        method: Method,
        url: &str,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<UpstreamResponse> {
        let parsed = Url::parse(url).with_context(|| format!("parsing URL {url}"))?;
        let mut builder = self.client.request(method, parsed.clone());

        if let Some(host) = parsed.host_str() {
            if let Some(creds) = self.auth.get(host) {
                builder = builder.basic_auth(&creds.username, Some(&creds.password));
            }
        }

        if let Some(headers) = extra_headers {
            for (name, value) in headers.iter() {
                if is_hop_by_hop(name) {
                    continue;
                }
                builder = builder.header(name, value);
            }
        }

        let inner = builder.send().with_context(|| format!("requesting {url}"))?;
        let status = inner.status().as_u16();
        let headers = inner.headers().clone();

        Ok(UpstreamResponse {
            status,
            headers,
            inner,
        })
    }

    pub fn get(&self, url: &str) -> Result<UpstreamResponse> {
        self.request(Method::GET, url, None)
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection" | "transfer-encoding" | "keep-alive" | "host"
    )
}

/// Convert a parsed, client-supplied `HeaderName`/value pair collected from a
/// raw HTTP/1.1 request into a `reqwest` [`HeaderValue`], dropping anything
/// that fails to parse rather than failing the whole request.
pub fn header_value(raw: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(raw).ok()
}
