//! Identity used to bucket pooled connections
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
#[allow(unused_imports)]
use std::ascii::AsciiExt;

use url::Url;

use fingerprint::Fingerprint;
use headers::Headers;
use helpers::BasicAuth;

/// TLS verification policy of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TlsPolicy {
    /// Verify the certificate chain against system roots
    Default,
    /// Skip certificate verification
    Disabled,
    /// Verify the certificate digest against a pinned fingerprint
    Pinned(Fingerprint),
}

/// The bucket identity of a pooled connection
///
/// The key contains the information about the used proxy and TLS
/// policy to prevent reusing wrong connections from a pool: a pool
/// implementation must bucket connections solely by equality of this
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: Option<u16>,
    pub is_ssl: bool,
    pub ssl: TlsPolicy,
    pub proxy: Option<Url>,
    pub proxy_auth: Option<BasicAuth>,
    pub proxy_headers_hash: Option<u64>,
}

/// Digest of the proxy headers for the pool key
///
/// Insertion order is part of the digest: two requests with differently
/// ordered proxy headers produce different CONNECT preambles. Names are
/// folded to lowercase, values are hashed as written.
pub fn proxy_headers_hash(headers: &Headers) -> Option<u64> {
    if headers.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    for &(ref name, ref value) in headers {
        name.to_ascii_lowercase().hash(&mut hasher);
        value.hash(&mut hasher);
    }
    Some(hasher.finish())
}

#[cfg(test)]
mod test {
    use headers::Headers;
    use super::{ConnectionKey, TlsPolicy, proxy_headers_hash};

    fn key() -> ConnectionKey {
        ConnectionKey {
            host: "example.com".to_string(),
            port: Some(443),
            is_ssl: true,
            ssl: TlsPolicy::Default,
            proxy: None,
            proxy_auth: None,
            proxy_headers_hash: None,
        }
    }

    #[test]
    fn equal_to_itself() {
        assert_eq!(key(), key());
    }

    #[test]
    fn tls_ness_changes_key() {
        let mut other = key();
        other.is_ssl = false;
        assert_ne!(key(), other);
    }

    #[test]
    fn policy_changes_key() {
        let mut other = key();
        other.ssl = TlsPolicy::Disabled;
        assert_ne!(key(), other);
    }

    #[test]
    fn proxy_headers_change_key() {
        let mut headers = Headers::new();
        headers.add("X-Trace", "abc");
        let mut other = key();
        other.proxy_headers_hash = proxy_headers_hash(&headers);
        assert_ne!(key(), other);
    }

    #[test]
    fn proxy_header_hash_is_case_insensitive_on_names() {
        let mut first = Headers::new();
        first.add("X-Trace", "abc");
        let mut second = Headers::new();
        second.add("x-trace", "abc");
        assert_eq!(proxy_headers_hash(&first),
                   proxy_headers_hash(&second));
        let mut third = Headers::new();
        third.add("x-trace", "xyz");
        assert_ne!(proxy_headers_hash(&first),
                   proxy_headers_hash(&third));
    }

    #[test]
    fn empty_proxy_headers_have_no_hash() {
        assert_eq!(proxy_headers_hash(&Headers::new()), None);
    }
}
