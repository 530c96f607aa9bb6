//! The by-hash `InRelease` index: discovery, probing, and timestamp-ordered
//! selection for one `(mirror, suite)` pair.

use std::collections::HashSet;
use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;

use crate::cache::LpInReleaseCache;
use crate::error::IndexError;
use crate::http_client::{AuthenticatingHttpClient, MAX_PROBE_BODY};
use crate::inrelease::{parse_datetime_grammar, InRelease};

const REQUIRED_KEYWORDS: &[&str] = &["Origin:", "Label:", "Suite:", "Acquire-By-Hash:"];
const SIGNED_MESSAGE_ARMOR: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const MIN_PROBE_BODY: usize = 1024;

fn hex64_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9a-fA-F]{64}").unwrap())
}

/// Given `(mirror, suite)`, enumerates `InRelease` candidates, either by
/// reusing whatever the cache already holds for this pair, or by scraping
/// the by-hash listing and probing each hash.
pub struct Index<'a> {
    mirror: String,
    suite: String,
    client: &'a AuthenticatingHttpClient,
    cache: &'a LpInReleaseCache,
}

impl<'a> Index<'a> {
    pub fn new(
        mirror: impl Into<String>,
        suite: impl Into<String>,
        client: &'a AuthenticatingHttpClient,
        cache: &'a LpInReleaseCache,
    ) -> Self {
        Self {
            mirror: mirror.into(),
            suite: suite.into(),
            client,
            cache,
        }
    }

    fn by_hash_url(&self) -> String {
        format!("{}/dists/{}/by-hash/SHA256", self.mirror, self.suite)
    }

    /// Enumerate all candidate `InRelease` objects for this `(mirror,
    /// suite)`. If the cache already has any entries, network discovery is
    /// skipped entirely; otherwise the by-hash listing is scraped and every
    /// not-yet-cached hash is probed.
    pub fn inrelease_files(&self) -> Result<Vec<InRelease>, IndexError> {
        if self.cache.has_any(&self.mirror, &self.suite) {
            return Ok(self.cache.get_all(&self.mirror, &self.suite));
        }

        let listing_url = self.by_hash_url();
        let resp = self
            .client
            .get(&listing_url)
            .map_err(|source| IndexError::Listing {
                mirror: self.mirror.clone(),
                suite: self.suite.clone(),
                source,
            })?;
        if resp.status != 200 {
            return Err(IndexError::Http {
                url: listing_url,
                status: resp.status,
            });
        }
        let charset = charset_for_response(&resp);
        let (body, _truncated) = resp
            .read_limited(16 * 1024 * 1024)
            .map_err(|source| IndexError::Listing {
                mirror: self.mirror.clone(),
                suite: self.suite.clone(),
                source,
            })?;
        let (text, _, _) = charset.decode(&body);

        let hashes: HashSet<String> = hex64_re()
            .find_iter(&text)
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect();

        for hash in &hashes {
            if self.cache.get_one(&self.mirror, &self.suite, hash).is_some() {
                continue;
            }
            match self.probe(hash) {
                Ok(Some(ir)) => self.cache.add(&ir),
                Ok(None) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(self.cache.get_all(&self.mirror, &self.suite))
    }

    /// Probe a single by-hash object. Returns `Ok(None)` when it is absent
    /// (404, absorbed silently) or when the cheap heuristics reject it as
    /// not being an `InRelease` (too small/large, missing armor, missing
    /// required keywords).
    fn probe(&self, hash: &str) -> Result<Option<InRelease>, IndexError> {
        let url = format!("{}/{hash}", self.by_hash_url());
        let resp = self.client.get(&url).map_err(|source| IndexError::Probe {
            mirror: self.mirror.clone(),
            suite: self.suite.clone(),
            hash: hash.to_string(),
            source,
        })?;

        if resp.status == 404 {
            return Ok(None);
        }
        if resp.status != 200 {
            return Err(IndexError::Http {
                url,
                status: resp.status,
            });
        }

        if let Some(len) = content_length(&resp) {
            if !(MIN_PROBE_BODY..=500 * 1024).contains(&len) {
                return Ok(None);
            }
        }

        let last_modified = resp
            .headers
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_datetime_grammar);

        let (body, _truncated) = resp
            .read_limited(MAX_PROBE_BODY)
            .map_err(|source| IndexError::Probe {
                mirror: self.mirror.clone(),
                suite: self.suite.clone(),
                hash: hash.to_string(),
                source,
            })?;

        let text = match String::from_utf8(body) {
            Ok(text) => text,
            Err(_) => return Ok(None),
        };

        if !text.starts_with(SIGNED_MESSAGE_ARMOR) {
            return Ok(None);
        }
        if !REQUIRED_KEYWORDS.iter().all(|kw| text.contains(kw)) {
            return Ok(None);
        }

        info!(
            "discovered InRelease {hash} for {}/{}",
            self.mirror, self.suite
        );
        Ok(Some(InRelease::new(
            self.mirror.clone(),
            self.suite.clone(),
            text,
            Some(hash.to_string()),
            last_modified,
        )))
    }

    /// Return the `InRelease` with the greatest `published` not exceeding
    /// `cutoff`, or `None` if none qualifies. Ties (which should not occur
    /// in practice, since every candidate carries a distinct timestamp) are
    /// broken by first-seen.
    pub fn get_inrelease_for_timestamp(&self, cutoff: i64) -> Result<Option<InRelease>, IndexError> {
        let candidates = self.inrelease_files()?;
        let mut best: Option<InRelease> = None;
        for candidate in candidates {
            if !candidate.has_timestamp() || candidate.published > cutoff {
                continue;
            }
            let replace = match &best {
                None => true,
                Some(current) => candidate.published > current.published,
            };
            if replace {
                best = Some(candidate);
            }
        }
        if best.is_none() {
            warn!(
                "no InRelease found for {}/{} at or before {cutoff}",
                self.mirror, self.suite
            );
        }
        Ok(best)
    }
}

fn content_length(resp: &crate::http_client::UpstreamResponse) -> Option<usize> {
    resp.headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn charset_for_response(resp: &crate::http_client::UpstreamResponse) -> &'static encoding_rs::Encoding {
    if let Some(enc) = resp
        .headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .and_then(encoding_rs::Encoding::for_label_no_replacement)
    {
        return enc;
    }
    if let Some(ct) = resp.headers.get("content-type").and_then(|v| v.to_str().ok()) {
        if let Some(charset) = ct.split(';').find_map(|part| {
            let part = part.trim();
            part.strip_prefix("charset=")
        }) {
            if let Some(enc) = encoding_rs::Encoding::for_label_no_replacement(charset.as_bytes()) {
                return enc;
            }
        }
    }
    encoding_rs::UTF_8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex64_regex_extracts_candidates() {
        let html = "<a href=\"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\">link</a>\nnot-a-hash";
        let found: Vec<_> = hex64_re().find_iter(html).map(|m| m.as_str()).collect();
        assert_eq!(found, vec!["aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"]);
    }
}
