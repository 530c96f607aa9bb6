//! The `InRelease` value object: an immutable, content-addressed view of one
//! published `InRelease` file.
//!
//! Construction never mutates; the resource→hash map is built lazily on
//! first query by scanning the signed body, matching the design's "lazy
//! resource→hash map" contract.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;

use faster_hex::hex_string;
use log::warn;
use regex::Regex;
use sha2::{Digest, Sha256};
use time::{Date, Month, OffsetDateTime, Time};

const SIGNED_MESSAGE_ANCHOR: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_BEGIN_ANCHOR: &str = "-----BEGIN PGP SIGNATURE-----";
const SIGNATURE_END_ANCHOR: &str = "-----END PGP SIGNATURE-----";

const MONTHS: &[(&str, Month)] = &[
    ("Jan", Month::January),
    ("Feb", Month::February),
    ("Mar", Month::March),
    ("Apr", Month::April),
    ("May", Month::May),
    ("Jun", Month::June),
    ("Jul", Month::July),
    ("Aug", Month::August),
    ("Sep", Month::September),
    ("Oct", Month::October),
    ("Nov", Month::November),
    ("Dec", Month::December),
];

fn month_from_name(name: &str) -> Option<Month> {
    MONTHS
        .iter()
        .find(|(abbrev, _)| abbrev.eq_ignore_ascii_case(name))
        .map(|(_, month)| *month)
}

fn month_name(month: Month) -> &'static str {
    MONTHS
        .iter()
        .find(|(_, m)| *m == month)
        .map(|(abbrev, _)| *abbrev)
        .expect("every Month variant is tabulated")
}

fn date_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*\w+,\s+(\d+)\s+(\w+)\s+(\d+)\s+(\d+):(\d+):(\d+).*$").unwrap()
    })
}

fn resource_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s([0-9a-fA-F]{64})\s+(\d+)\s+(\S+)\s*$").unwrap())
}

/// Parse a `Date:`-header-style timestamp using the locale-independent
/// grammar: `^\s*\w+,\s+(\d+)\s+(\w+)\s+(\d+)\s+(\d+):(\d+):(\d+).*$`,
/// translating the month abbreviation through a fixed English table.
///
/// Returns `None` (the "no timestamp" sentinel) on any failure — the caller
/// treats such an `InRelease` as unusable for selection.
pub fn parse_datetime_grammar(line: &str) -> Option<i64> {
    let caps = date_line_re().captures(line)?;
    let day: u8 = caps.get(1)?.as_str().parse().ok()?;
    let month = month_from_name(caps.get(2)?.as_str())?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    let hour: u8 = caps.get(4)?.as_str().parse().ok()?;
    let minute: u8 = caps.get(5)?.as_str().parse().ok()?;
    let second: u8 = caps.get(6)?.as_str().parse().ok()?;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(date.with_time(time).assume_utc().unix_timestamp())
}

/// Scan `data` for the first line beginning `Date:` and parse it with
/// [`parse_datetime_grammar`].
fn published_from_body(data: &str) -> Option<i64> {
    for line in data.lines() {
        if let Some(rest) = line.strip_prefix("Date:") {
            return parse_datetime_grammar(rest);
        }
    }
    None
}

/// Format a POSIX timestamp as `"%a, %d %b %Y %H:%M:%S GMT"` using the same
/// fixed English weekday/month tables used for parsing.
pub fn format_published(published: i64) -> String {
    let Ok(dt) = OffsetDateTime::from_unix_timestamp(published) else {
        return String::new();
    };
    let weekday = match dt.weekday() {
        time::Weekday::Monday => "Mon",
        time::Weekday::Tuesday => "Tue",
        time::Weekday::Wednesday => "Wed",
        time::Weekday::Thursday => "Thu",
        time::Weekday::Friday => "Fri",
        time::Weekday::Saturday => "Sat",
        time::Weekday::Sunday => "Sun",
    };
    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        weekday,
        dt.day(),
        month_name(dt.month()),
        dt.year(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

/// Parse a value produced by [`format_published`] back into POSIX seconds.
/// Used only by the cache layer when reconstructing from a stored leaf.
pub fn parse_published(formatted: &str) -> Option<i64> {
    parse_datetime_grammar(formatted)
}

/// Split signed content into `(content, signature)`, tolerating both CRLF
/// and LF line endings.
fn split_signed_message(data: &str) -> (String, String) {
    let normalised = data.replace("\r\n", "\n");

    let after_signed_header = normalised
        .find(SIGNED_MESSAGE_ANCHOR)
        .map(|idx| idx + SIGNED_MESSAGE_ANCHOR.len())
        .unwrap_or(0);
    let rest = &normalised[after_signed_header..];

    // Skip the armor-header block (e.g. `Hash: SHA256`) up to the blank line
    // that separates it from the clearsigned content.
    let content_start = rest
        .find("\n\n")
        .map(|idx| idx + 2)
        .unwrap_or(0);
    let rest = &rest[content_start..];

    let sig_begin = rest.find(SIGNATURE_BEGIN_ANCHOR).unwrap_or(rest.len());
    let content = rest[..sig_begin].to_string();

    let signature = if let Some(begin) = rest.find(SIGNATURE_BEGIN_ANCHOR) {
        let sig_rest = &rest[begin..];
        let end = sig_rest
            .find(SIGNATURE_END_ANCHOR)
            .map(|idx| idx + SIGNATURE_END_ANCHOR.len())
            .unwrap_or(sig_rest.len());
        sig_rest[..end].to_string()
    } else {
        String::new()
    };

    (content, signature)
}

/// Immutable, content-addressed view of one published `InRelease` object.
pub struct InRelease {
    pub mirror: String,
    pub suite: String,
    pub data: String,
    pub hash: String,
    pub published: i64,
    dict: RefCell<Option<HashMap<String, String>>>,
}

impl Clone for InRelease {
    fn clone(&self) -> Self {
        Self {
            mirror: self.mirror.clone(),
            suite: self.suite.clone(),
            data: self.data.clone(),
            hash: self.hash.clone(),
            published: self.published,
            dict: RefCell::new(self.dict.borrow().clone()),
        }
    }
}

impl InRelease {
    /// Construct from a live fetch or from cache.
    ///
    /// When `hash` is absent it is computed as SHA-256 over `data`'s UTF-8
    /// bytes. When `last_modified` is absent, it is derived from the `Date:`
    /// line inside `data`. If both derivations are available and disagree,
    /// `last_modified` (the caller's authoritative source — HTTP
    /// `Last-Modified` on a live fetch, or the cached value on reload) wins;
    /// the disagreement is logged, not failed.
    pub fn new(
        mirror: impl Into<String>,
        suite: impl Into<String>,
        data: impl Into<String>,
        hash: Option<String>,
        last_modified: Option<i64>,
    ) -> Self {
        let mirror = mirror.into();
        let suite = suite.into();
        let data = data.into();

        let hash = hash.unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(data.as_bytes());
            hex_string(&hasher.finalize())
        });

        let from_body = published_from_body(&data);
        let published = match (last_modified, from_body) {
            (Some(lm), Some(body)) => {
                if lm != body {
                    warn!(
                        "InRelease {mirror}/{suite} ({hash}): Last-Modified ({lm}) disagrees with signed Date: ({body}); using {lm}"
                    );
                }
                lm
            }
            (Some(lm), None) => lm,
            (None, Some(body)) => body,
            (None, None) => {
                warn!("InRelease {mirror}/{suite} ({hash}): no usable timestamp");
                i64::MIN
            }
        };

        Self {
            mirror,
            suite,
            data,
            hash,
            published,
            dict: RefCell::new(None),
        }
    }

    /// Whether this object carries a usable publication timestamp.
    pub fn has_timestamp(&self) -> bool {
        self.published != i64::MIN
    }

    /// `(content, signature)` split of `data`.
    pub fn split(&self) -> (String, String) {
        split_signed_message(&self.data)
    }

    fn ensure_dict(&self) {
        if self.dict.borrow().is_some() {
            return;
        }
        let (content, _signature) = self.split();
        let mut dict = HashMap::new();
        for caps in resource_line_re().captures_iter(&content) {
            let hash = caps[1].to_ascii_lowercase();
            let path = caps[3].to_string();
            // First occurrence (e.g. from the SHA256 section) wins; later
            // duplicate sections (MD5Sum/SHA1) are never consulted because
            // the regex only matches 64-hex digests.
            dict.entry(path).or_insert(hash);
        }
        *self.dict.borrow_mut() = Some(dict);
    }

    /// Resolve `path` to its SHA-256 hash as listed in this `InRelease`,
    /// building the lazy resource map on first call.
    pub fn get_hash_for(&self, path: &str) -> Option<String> {
        self.ensure_dict();
        self.dict.borrow().as_ref().unwrap().get(path).cloned()
    }
}

/// On-disk representation of one cache leaf: `{mirror, suite, hash,
/// published, data}` with `published` formatted as an RFC-1123-style GMT
/// string for human readability.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
pub struct InReleaseRecord {
    pub mirror: String,
    pub suite: String,
    pub hash: String,
    pub published: String,
    pub data: String,
}

impl From<&InRelease> for InReleaseRecord {
    fn from(ir: &InRelease) -> Self {
        Self {
            mirror: ir.mirror.clone(),
            suite: ir.suite.clone(),
            hash: ir.hash.clone(),
            published: format_published(ir.published),
            data: ir.data.clone(),
        }
    }
}

impl InReleaseRecord {
    /// Reconstruct the `InRelease` this record serialises. The cached
    /// `published` string is authoritative (stability wins over freshness):
    /// it is parsed back with the same grammar used for the signed body's
    /// `Date:` field, never re-derived from `data`.
    pub fn into_inrelease(self) -> InRelease {
        let published = parse_published(&self.published).unwrap_or(i64::MIN);
        InRelease {
            mirror: self.mirror,
            suite: self.suite,
            data: self.data,
            hash: self.hash,
            published,
            dict: RefCell::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\nOrigin: Example\nLabel: Example\nSuite: jammy\nAcquire-By-Hash: yes\nDate: Wed, 14 Jul 2021 10:54:24 +0000\nSHA256:\n aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa 1234 main/binary-amd64/Packages.gz\n-----BEGIN PGP SIGNATURE-----\nabcdef\n-----END PGP SIGNATURE-----\n";

    #[test]
    fn hash_equals_sha256_of_data() {
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", SAMPLE, None, Some(1_700_000_000));
        let mut hasher = Sha256::new();
        hasher.update(SAMPLE.as_bytes());
        assert_eq!(ir.hash, hex_string(&hasher.finalize()));
    }

    #[test]
    fn parses_date_header_when_no_last_modified() {
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", SAMPLE, None, None);
        assert_eq!(ir.published, 1_626_260_064);
    }

    #[test]
    fn last_modified_wins_on_disagreement() {
        let ir = InRelease::new(
            "http://a.example/ubuntu",
            "jammy",
            SAMPLE,
            None,
            Some(1_700_000_000),
        );
        assert_eq!(ir.published, 1_700_000_000);
    }

    #[test]
    fn resource_lookup_finds_listed_path() {
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", SAMPLE, None, None);
        assert_eq!(
            ir.get_hash_for("main/binary-amd64/Packages.gz").as_deref(),
            Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        );
        assert!(ir.get_hash_for("nonexistent").is_none());
    }

    #[test]
    fn accepts_single_digit_day() {
        assert_eq!(
            parse_datetime_grammar("Sat, 1 Jan 2022 00:00:00 GMT"),
            Some(1_640_995_200)
        );
    }

    #[test]
    fn rejects_non_english_month() {
        assert_eq!(parse_datetime_grammar("sam, 1 janv 2022 00:00:00 GMT"), None);
    }

    #[test]
    fn serialise_round_trip_preserves_published_seconds() {
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", SAMPLE, None, Some(1_700_000_000));
        let record = InReleaseRecord::from(&ir);
        let restored = record.into_inrelease();
        assert_eq!(restored.published, ir.published);
        assert_eq!(restored.hash, ir.hash);
    }

    #[test]
    fn split_separates_content_and_signature() {
        let ir = InRelease::new("http://a.example/ubuntu", "jammy", SAMPLE, None, None);
        let (content, signature) = ir.split();
        assert!(content.contains("Origin: Example"));
        assert!(signature.starts_with("-----BEGIN PGP SIGNATURE-----"));
        assert!(signature.ends_with("-----END PGP SIGNATURE-----\n") || signature.ends_with("-----END PGP SIGNATURE-----"));
    }
}
