//! URI canonicalisation — the single place URL scheme decisions live.
//!
//! Every other component calls through [`canonical_uri`] rather than building
//! URLs by hand, so that the private-archive rewrite rule only has to be
//! understood in one place.

/// Hostnames that map onto a private archive with a build-farm-internal
/// mirror, rather than being served plain over HTTP.
pub(crate) const PRIVATE_ARCHIVE_HOSTS: &[(&str, &str, &str)] = &[
    // (public hostname, internal https endpoint, external https endpoint)
    (
        "private-ppa.launchpad.net",
        "archive.internal:8221",
        "private-ppa.launchpad.net",
    ),
    (
        "ppa.launchpadcontent.net",
        "archive.internal:8221",
        "ppa.launchpadcontent.net",
    ),
];

/// Environment variable whose presence (and value) indicates the process is
/// running inside the build farm, and should therefore talk to the internal
/// form of a private archive's endpoint instead of the public one.
const BUILD_FARM_MARKER_VAR: &str = "PARENT_BUILD_MIRROR";

fn running_in_build_farm() -> bool {
    std::env::var(BUILD_FARM_MARKER_VAR)
        .map(|v| v.contains("launchpad-buildd") || v.contains("internal"))
        .unwrap_or(false)
}

/// Whether `host` is one of the recognised private-archive hostnames that
/// credentials may be registered against.
pub(crate) fn is_private_archive_host(host: &str) -> bool {
    PRIVATE_ARCHIVE_HOSTS.iter().any(|(public_host, _, _)| host == *public_host)
}

/// Map `(host, path)` onto an absolute URL.
///
/// Recognised private-archive hostnames are rewritten to their internal or
/// external HTTPS endpoint depending on [`running_in_build_farm`]; every
/// other host is addressed plain over HTTP, since clients must talk plaintext
/// HTTP to the proxy even when the upstream archive is HTTPS.
pub fn canonical_uri(host: &str, path: &str) -> String {
    for (public_host, internal, external) in PRIVATE_ARCHIVE_HOSTS {
        if host == *public_host {
            let endpoint = if running_in_build_farm() {
                internal
            } else {
                external
            };
            return format!("https://{endpoint}{path}");
        }
    }
    format!("http://{host}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_host_is_http() {
        assert_eq!(
            canonical_uri("archive.example", "/ubuntu"),
            "http://archive.example/ubuntu"
        );
    }

    #[test]
    fn private_archive_external_by_default() {
        std::env::remove_var(BUILD_FARM_MARKER_VAR);
        assert_eq!(
            canonical_uri("private-ppa.launchpad.net", "/user/ppa/ubuntu"),
            "https://private-ppa.launchpad.net/user/ppa/ubuntu"
        );
    }

    #[test]
    fn private_archive_internal_in_build_farm() {
        std::env::set_var(BUILD_FARM_MARKER_VAR, "launchpad-buildd-internal");
        assert_eq!(
            canonical_uri("private-ppa.launchpad.net", "/user/ppa/ubuntu"),
            "https://archive.internal:8221/user/ppa/ubuntu"
        );
        std::env::remove_var(BUILD_FARM_MARKER_VAR);
    }
}
