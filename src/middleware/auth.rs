// Service-key / same-origin auth guard for the `/query` endpoint.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::config::state::AppState;
use crate::error::ServiceError;

pub async fn require_service_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let headers = request.headers();

    if is_same_origin(headers) || has_valid_service_key(headers, &state.environment.service_api_key) {
        return Ok(next.run(request).await);
    }

    Err(ServiceError::Unauthorized)
}

fn has_valid_service_key(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get("x-service-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

/// Same-origin bypass: the request's `Referer` or `Origin` host equals the
/// `Host` header. Trivially spoofed by a non-browser client — see the
/// design note on requiring the service key unconditionally for untrusted
/// networks.
fn is_same_origin(headers: &HeaderMap) -> bool {
    let Some(host) = header_str(headers, "host") else {
        return false;
    };
    let candidate = header_str(headers, "referer")
        .or_else(|| header_str(headers, "origin"))
        .and_then(|v| extract_host(&v));

    candidate.map(|h| h.eq_ignore_ascii_case(&host)).unwrap_or(false)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// `Referer`/`Origin` carry a full URL; `Host` is bare `host[:port]`. Strips
/// the scheme and path so the two can be compared directly.
fn extract_host(url: &str) -> Option<String> {
    let after_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = after_scheme.split('/').next().unwrap_or(after_scheme);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn accepts_a_matching_service_key() {
        let h = headers(&[("x-service-key", "secret")]);
        assert!(has_valid_service_key(&h, "secret"));
    }

    #[test]
    fn rejects_a_mismatched_service_key() {
        let h = headers(&[("x-service-key", "wrong")]);
        assert!(!has_valid_service_key(&h, "secret"));
    }

    #[test]
    fn same_origin_passes_when_referer_host_matches_host_header() {
        let h = headers(&[("host", "example.com"), ("referer", "https://example.com/page")]);
        assert!(is_same_origin(&h));
    }

    #[test]
    fn same_origin_fails_when_referer_host_differs() {
        let h = headers(&[("host", "example.com"), ("referer", "https://evil.com/page")]);
        assert!(!is_same_origin(&h));
    }

    #[test]
    fn same_origin_fails_with_no_referer_or_origin() {
        let h = headers(&[("host", "example.com")]);
        assert!(!is_same_origin(&h));
    }
}
