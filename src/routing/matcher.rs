//! Request matching helpers.
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port (RFC 9110)
//! - Path matching is a case-sensitive string prefix test
//! - No regex to keep matching O(routes per host)

use std::str::FromStr;

use axum::http::uri::Authority;
use axum::http::{header, HeaderMap, Uri};

/// Lowercase a host and drop any port and trailing dot.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        // IPv6 literal, keep the brackets
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Extract the routing host from a request.
///
/// HTTP/2 requests carry it in the URI authority, HTTP/1.1 in the Host
/// header. Returns `None` when neither yields a syntactically valid host.
pub fn request_host(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if let Some(authority) = uri.authority() {
        return valid_host(authority.host());
    }
    let value = headers.get(header::HOST)?.to_str().ok()?;
    let authority = Authority::from_str(value).ok()?;
    valid_host(authority.host())
}

fn valid_host(host: &str) -> Option<String> {
    let host = normalize_host(host);
    if host.is_empty() || host == "*" {
        None
    } else {
        Some(host)
    }
}

/// Whether `prefix` selects `path`.
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    path.starts_with(prefix)
}

/// Replace the matched `prefix` of `path` with `target`.
///
/// A doubled slash at the join is collapsed and an empty result becomes `/`.
pub fn rewrite_path(path: &str, prefix: &str, target: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    let mut rewritten = String::with_capacity(target.len() + rest.len());
    rewritten.push_str(target);
    if target.ends_with('/') && rest.starts_with('/') {
        rewritten.push_str(&rest[1..]);
    } else {
        rewritten.push_str(rest);
    }
    if rewritten.is_empty() {
        rewritten.push('/');
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("EXAMPLE.com"), "example.com");
        assert_eq!(normalize_host("example.com:8080"), "example.com");
        assert_eq!(normalize_host("example.com."), "example.com");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host("*"), "*");
    }

    #[test]
    fn test_request_host_from_header() {
        let req = Request::builder()
            .uri("/api")
            .header("Host", "App.Example.com:80")
            .body(())
            .unwrap();
        assert_eq!(
            request_host(req.uri(), req.headers()).as_deref(),
            Some("app.example.com")
        );
    }

    #[test]
    fn test_request_host_prefers_authority() {
        let req = Request::builder()
            .uri("https://h2.example.com/x")
            .header("Host", "other.example.com")
            .body(())
            .unwrap();
        assert_eq!(
            request_host(req.uri(), req.headers()).as_deref(),
            Some("h2.example.com")
        );
    }

    #[test]
    fn test_request_host_missing_or_invalid() {
        let req = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(request_host(req.uri(), req.headers()), None);

        let req = Request::builder()
            .uri("/")
            .header("Host", "bad host/")
            .body(())
            .unwrap();
        assert_eq!(request_host(req.uri(), req.headers()), None);
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        assert!(prefix_matches("/api", "/api/v1"));
        assert!(prefix_matches("/api", "/apiary"));
        assert!(!prefix_matches("/api", "/API/v1"));
    }

    #[test]
    fn test_rewrite_path() {
        assert_eq!(rewrite_path("/api/users", "/api", "/"), "/users");
        assert_eq!(rewrite_path("/api/users", "/api", "/v2"), "/v2/users");
        assert_eq!(rewrite_path("/api", "/api", "/"), "/");
        assert_eq!(rewrite_path("/api/", "/api/", ""), "/");
        assert_eq!(rewrite_path("/old/x", "/old/", "/new/"), "/new/x");
    }
}
