// kmirror-net/src/validation.rs
use kmirror_common::error::{KmError, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Hex encoded SHA256 of `content`, logged next to every upload.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Validates a URL the token may be sent to. It must be https; plain http
/// is only accepted for loopback hosts, which is what local mocks use.
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| KmError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        scheme => Err(KmError::ValidationError(format!(
            "Invalid URL scheme for '{url_str}': Must be https, but got '{scheme}'"
        ))),
    }
}

/// Checks that `candidate` points at the same scheme, host and port as
/// `base`. Pagination links come from response headers and are followed with
/// credentials attached.
pub fn ensure_same_origin(base: &str, candidate: &str) -> Result<Url> {
    let base_url = validate_url(base)?;
    let candidate_url = validate_url(candidate)?;
    if base_url.origin() == candidate_url.origin() {
        Ok(candidate_url)
    } else {
        Err(KmError::ValidationError(format!(
            "Refusing to follow '{candidate}': not on the API host {base}"
        )))
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
