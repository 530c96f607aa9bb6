//! The on-disk, cross-process-safe cache of `InRelease` objects.
//!
//! Logical shape: `{normalised_address: {suite: {hash: record}}}`. An
//! `fslock::LockFile`-held OS-level exclusive lock protects the full
//! read-or-overwrite window; an in-process `Mutex` protects the in-memory
//! dict during read-modify-write, matching the two-level discipline the
//! design calls for.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use fslock::LockFile;
use log::{info, warn};
use serde::Serialize;

use crate::error::CacheError;
use crate::inrelease::{InRelease, InReleaseRecord};

type SuiteMap = BTreeMap<String, BTreeMap<String, InReleaseRecord>>;
type CacheMap = BTreeMap<String, SuiteMap>;

/// Normalise `(host, path)` into the address key used at every level of the
/// cache. Reads and writes must agree on this, it is the cache's one subtle
/// invariant.
pub fn normalise_address(host: &str, path: &str) -> String {
    format!("{host}{}", path.trim_end_matches('/'))
}

pub struct LpInReleaseCache {
    path: Option<PathBuf>,
    data: Mutex<CacheMap>,
}

impl LpInReleaseCache {
    /// A cache backed by `path` on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            data: Mutex::new(CacheMap::new()),
        }
    }

    /// A cache with no backing file: `load`/`save` are no-ops, and the
    /// in-memory dict lives only for the process's lifetime. Used by CLI
    /// invocations run without `--cache-file`.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(CacheMap::new()),
        }
    }

    /// Open the backing file (creating it if missing), take an exclusive OS
    /// lock, read to EOF, release the lock, and atomically replace the
    /// in-memory cache. An empty file yields an empty cache; malformed JSON
    /// is a [`CacheError::Malformed`]. A no-op when constructed via
    /// [`Self::in_memory`].
    pub fn load(&self) -> Result<(), CacheError> {
        let path = match &self.path {
            Some(path) => path,
            None => {
                warn!("no --cache-file configured, starting from an empty in-memory cache");
                return Ok(());
            }
        };

        let mut lock = LockFile::open(path).map_err(|e| CacheError::Open {
            path: path.clone(),
            source: e,
        })?;
        lock.lock().map_err(|e| CacheError::Lock {
            path: path.clone(),
            source: e,
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| CacheError::Read {
            path: path.clone(),
            source: e,
        })?;
        lock.unlock().map_err(|e| CacheError::Lock {
            path: path.clone(),
            source: e,
        })?;

        let parsed: CacheMap = if content.trim().is_empty() {
            CacheMap::new()
        } else {
            serde_json::from_str(&content).map_err(|e| CacheError::Malformed {
                path: path.clone(),
                source: e,
            })?
        };

        *self.data.lock().expect("cache mutex poisoned") = parsed;
        Ok(())
    }

    /// Serialise the entire cache (sorted keys, indent 4) and overwrite the
    /// backing file under an exclusive OS lock held across the full
    /// truncate-then-write window. A no-op when constructed via
    /// [`Self::in_memory`].
    pub fn save(&self) -> Result<(), CacheError> {
        let path = match &self.path {
            Some(path) => path,
            None => {
                warn!("no --cache-file configured, discarding in-memory cache on exit");
                return Ok(());
            }
        };

        let buf = {
            let guard = self.data.lock().expect("cache mutex poisoned");
            let mut buf = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            guard.serialize(&mut ser).map_err(|e| CacheError::Malformed {
                path: path.clone(),
                source: e,
            })?;
            buf
        };

        let mut lock = LockFile::open(path).map_err(|e| CacheError::Open {
            path: path.clone(),
            source: e,
        })?;
        lock.lock().map_err(|e| CacheError::Lock {
            path: path.clone(),
            source: e,
        })?;

        let result = std::fs::write(path, &buf).map_err(|e| CacheError::Write {
            path: path.clone(),
            source: e,
        });

        lock.unlock().map_err(|e| CacheError::Lock {
            path: path.clone(),
            source: e,
        })?;
        result?;

        info!("cache saved to {}", path.display());
        Ok(())
    }

    /// Insert `inrelease` at `[address][suite][hash]` using entry-style
    /// semantics: an existing entry is never overwritten, so stability wins
    /// over freshness. Only touches the in-memory dict — callers persist via
    /// [`Self::save`].
    pub fn add(&self, inrelease: &InRelease) {
        let address = address_for_mirror(&inrelease.mirror);
        let mut guard = self.data.lock().expect("cache mutex poisoned");
        guard
            .entry(address)
            .or_default()
            .entry(inrelease.suite.clone())
            .or_default()
            .entry(inrelease.hash.clone())
            .or_insert_with(|| InReleaseRecord::from(inrelease));
    }

    pub fn get_one(&self, mirror: &str, suite: &str, hash: &str) -> Option<InRelease> {
        let address = address_for_mirror(mirror);
        let guard = self.data.lock().expect("cache mutex poisoned");
        guard
            .get(&address)?
            .get(suite)?
            .get(hash)
            .cloned()
            .map(InReleaseRecord::into_inrelease)
    }

    pub fn get_all(&self, mirror: &str, suite: &str) -> Vec<InRelease> {
        let address = address_for_mirror(mirror);
        let guard = self.data.lock().expect("cache mutex poisoned");
        guard
            .get(&address)
            .and_then(|suites| suites.get(suite))
            .map(|hashes| {
                hashes
                    .values()
                    .cloned()
                    .map(InReleaseRecord::into_inrelease)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_any(&self, mirror: &str, suite: &str) -> bool {
        let address = address_for_mirror(mirror);
        let guard = self.data.lock().expect("cache mutex poisoned");
        guard
            .get(&address)
            .and_then(|suites| suites.get(suite))
            .map(|hashes| !hashes.is_empty())
            .unwrap_or(false)
    }
}

/// Derive the cache's address key straight from a mirror URL, by stripping
/// the scheme and delegating to [`normalise_address`].
fn address_for_mirror(mirror: &str) -> String {
    let without_scheme = mirror
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(mirror);
    let (host, path) = without_scheme.split_once('/').unwrap_or((without_scheme, ""));
    normalise_address(host, &format!("/{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lp-in-release-test-cache-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn address_normalisation_strips_trailing_slash() {
        assert_eq!(normalise_address("a.example", "/ubuntu/"), "a.example/ubuntu");
        assert_eq!(normalise_address("a.example", "/ubuntu"), "a.example/ubuntu");
    }

    #[test]
    fn add_is_monotonic() {
        let path = temp_cache_path("monotonic");
        std::fs::write(&path, "").unwrap();
        let cache = LpInReleaseCache::new(&path);

        let first = InRelease::new("http://a.example/ubuntu", "jammy", "data-v1", Some("h1".into()), Some(100));
        cache.add(&first);
        let second = InRelease::new("http://a.example/ubuntu", "jammy", "data-v2", Some("h1".into()), Some(200));
        cache.add(&second);

        let stored = cache.get_one("http://a.example/ubuntu", "jammy", "h1").unwrap();
        assert_eq!(stored.data, "data-v1");
        assert_eq!(stored.published, 100);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = temp_cache_path("roundtrip");
        std::fs::write(&path, "").unwrap();
        let cache = LpInReleaseCache::new(&path);
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", "body", Some("h2".into()), Some(1_700_000_000));
        cache.add(&ir);
        cache.save().unwrap();

        let reloaded = LpInReleaseCache::new(&path);
        reloaded.load().unwrap();
        let restored = reloaded.get_one("http://a.example/ubuntu", "jammy", "h2").unwrap();
        assert_eq!(restored.data, "body");
        assert_eq!(restored.published, 1_700_000_000);
        assert_eq!(reloaded.get_all("http://a.example/ubuntu", "jammy").len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_file_yields_empty_cache() {
        let path = temp_cache_path("empty");
        std::fs::write(&path, "").unwrap();
        let cache = LpInReleaseCache::new(&path);
        cache.load().unwrap();
        assert!(cache.get_all("http://a.example/ubuntu", "jammy").is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn in_memory_cache_load_and_save_are_noops() {
        let cache = LpInReleaseCache::in_memory();
        cache.load().unwrap();
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", "body", Some("h3".into()), Some(123));
        cache.add(&ir);
        cache.save().unwrap();
        assert_eq!(cache.get_all("http://a.example/ubuntu", "jammy").len(), 1);
    }
}
