//! Headers and checks applied to every request.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;
use url::Url;

use crate::error::HttpError;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self' https://unpkg.com; \
     style-src 'self' https://cdn.jsdelivr.net; connect-src 'self'";

const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");

/// Keep browsers from caching pages. Static files are left alone.
pub async fn no_cache(request: Request, next: Next) -> Response {
    let is_static = request.uri().path().starts_with("/static/");
    let mut response = next.run(request).await;

    if !is_static {
        let headers = response.headers_mut();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }

    response
}

pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );

    response
}

/// Reject state-changing requests made from other sites.
pub async fn cross_origin_protection(request: Request, next: Next) -> Response {
    if request.method().is_safe() || is_same_origin(request.headers()) {
        return next.run(request).await;
    }

    warn!(
        method = %request.method(),
        path = request.uri().path(),
        "rejected cross-origin request"
    );
    HttpError::Forbidden("Cross-origin request rejected").into_response()
}

fn is_same_origin(headers: &HeaderMap) -> bool {
    if let Some(site) = headers.get(SEC_FETCH_SITE) {
        return matches!(site.as_bytes(), b"same-origin" | b"none");
    }

    // neither header means the request didn't come from a browser
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };

    let origin = origin
        .to_str()
        .ok()
        .and_then(|origin| Url::parse(origin).ok());
    let host = headers.get(header::HOST).and_then(|host| host.to_str().ok());

    match (origin, host) {
        (Some(origin), Some(host)) => match (origin.host_str(), origin.port()) {
            (Some(origin_host), Some(port)) => format!("{}:{}", origin_host, port) == host,
            (Some(origin_host), None) => origin_host == host,
            _ => false,
        },
        _ => false,
    }
}
