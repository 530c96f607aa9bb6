//! Typed error taxonomy for the snapshot-proxy engine.
//!
//! The three kinds below mirror the three failure domains the design
//! distinguishes: discovering/probing `InRelease` candidates, reading or
//! writing the on-disk cache, and standing up the proxy's listening socket.
//! CLI entry points match on [`SnapshotError`] to print `"<prog>: <msg>"` and
//! exit 1; everything else propagates through `anyhow::Result` with `?`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("fetching by-hash listing for {mirror}/dists/{suite}: {source}")]
    Listing {
        mirror: String,
        suite: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("probing by-hash object {hash} for {mirror}/dists/{suite}: {source}")]
    Probe {
        mirror: String,
        suite: String,
        hash: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unexpected HTTP status {status} fetching {url}")]
    Http { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("opening cache file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("locking cache file {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading cache file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing cache file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {} is not valid JSON: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("binding proxy to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
