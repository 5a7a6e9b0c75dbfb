//! Deterministic URL canonicalization (spec §4.1).
//!
//! Pure and stateless: the same `(url, site)` pair always yields the same
//! `CanonicalUrl`, and malformed input is never rejected, only
//! best-effort-reduced.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

use crate::config::AllowListConfig;

/// The result of canonicalizing a URL for a given site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
    pub original_url: String,
    pub normalized_url: String,
    pub url_hash: String,
}

/// Reduce `url` to its canonical form for `site_name`, using `allow_list` to
/// decide which query parameters survive.
///
/// Never fails: a URL that does not parse is passed through as both
/// `original_url` and `normalized_url`, lowercased, so a hash is always
/// produced.
#[must_use]
pub fn canonicalize(url: &str, site_name: &str, allow_list: &AllowListConfig) -> CanonicalUrl {
    let normalized_url = match Url::parse(url) {
        Ok(parsed) => normalize_parsed(&parsed, site_name, allow_list),
        Err(_) => url.to_lowercase(),
    };
    let url_hash = hex_sha256(normalized_url.as_bytes());

    CanonicalUrl {
        original_url: url.to_string(),
        normalized_url,
        url_hash,
    }
}

fn normalize_parsed(parsed: &Url, site_name: &str, allow_list: &AllowListConfig) -> String {
    let scheme = parsed.scheme().to_lowercase();
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();

    let path = parsed.path();
    let path = if path == "/" {
        String::new()
    } else {
        path.trim_end_matches('/').to_string()
    };

    let retained = allow_list.keys_for(site_name);
    let query = filter_and_sort_query(parsed, &retained);

    let mut out = format!("{scheme}://{host}{port}{path}");
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }
    out
}

/// Retain only allow-listed keys, preserve the original relative order of
/// values within a key, then re-encode sorted lexicographically by key.
fn filter_and_sort_query(parsed: &Url, allowed: &[String]) -> String {
    let mut buckets: BTreeMap<&str, Vec<(String, String)>> = BTreeMap::new();

    for (key, value) in parsed.query_pairs() {
        if let Some(allowed_key) = allowed.iter().find(|k| k.as_str() == key) {
            buckets
                .entry(allowed_key.as_str())
                .or_default()
                .push((key.into_owned(), value.into_owned()));
        }
    }

    let mut pairs = Vec::new();
    for (_, values) in buckets {
        for (key, value) in values {
            pairs.push(format!("{}={}", url_encode(&key), url_encode(&value)));
        }
    }
    pairs.join("&")
}

fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllowListConfig;

    fn allow_list() -> AllowListConfig {
        AllowListConfig::with_defaults()
    }

    #[test]
    fn collapses_casing_trailing_slash_and_disallowed_params() {
        let a = canonicalize(
            "HTTPS://WWW.A.JP/Kodate/12345/?bukkenNo=9&utm=x",
            "athome",
            &allow_list(),
        );
        let b = canonicalize(
            "https://www.a.jp/Kodate/12345?bukkenNo=9",
            "athome",
            &allow_list(),
        );
        assert_eq!(a.normalized_url, b.normalized_url);
        assert_eq!(a.url_hash, b.url_hash);
    }

    #[test]
    fn hash_is_sha256_of_normalized_url() {
        let c = canonicalize("https://example.com/a/?id=1", "unknown-site", &allow_list());
        let expected = hex_sha256(c.normalized_url.as_bytes());
        assert_eq!(c.url_hash, expected);
    }

    #[test]
    fn is_idempotent() {
        let c = canonicalize(
            "https://WWW.Example.com/a/b/?page=2&id=7&zzz=ignored",
            "default",
            &allow_list(),
        );
        let again = canonicalize(&c.normalized_url, "default", &allow_list());
        assert_eq!(c.normalized_url, again.normalized_url);
        assert_eq!(c.url_hash, again.url_hash);
    }

    #[test]
    fn root_path_has_no_trailing_slash() {
        let c = canonicalize("https://example.com/", "default", &allow_list());
        assert_eq!(c.normalized_url, "https://example.com");
    }

    #[test]
    fn fragment_is_dropped() {
        let c = canonicalize("https://example.com/a?id=1#section", "default", &allow_list());
        assert!(!c.normalized_url.contains('#'));
    }

    #[test]
    fn unknown_site_falls_back_to_default_allow_list() {
        let c = canonicalize(
            "https://example.com/a?id=1&page=2&other=3",
            "some-unlisted-site",
            &allow_list(),
        );
        assert!(c.normalized_url.contains("id=1"));
        assert!(c.normalized_url.contains("page=2"));
        assert!(!c.normalized_url.contains("other"));
    }
}
