//! HTTP header helpers

use chrono::{DateTime, Utc};
use depot_core::Timestamp;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL};

/// Set by remote proxies that served an error page with status 200.
pub const MISSING_ARTIFACT_HEADER: &str = "x-nexus-missing-artifact";

/// Headers sent with every remote request.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-us"));
    headers.insert(
        ACCEPT_ENCODING,
        HeaderValue::from_static("gzip,deflate,identity"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

/// Parse an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Format a timestamp as an HTTP date.
pub fn format_http_date(value: Timestamp) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn last_modified(headers: &HeaderMap) -> Option<Timestamp> {
    header_str(headers, reqwest::header::LAST_MODIFIED).and_then(parse_http_date)
}

/// Entity tag without weakness marker and quotes.
pub fn etag(headers: &HeaderMap) -> Option<String> {
    header_str(headers, reqwest::header::ETAG)
        .map(normalize_etag)
        .filter(|tag| !tag.is_empty())
}

pub fn normalize_etag(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"').to_string()
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, reqwest::header::CONTENT_TYPE).map(str::to_string)
}

pub fn server(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, reqwest::header::SERVER)
}

/// True when a 200 answer is flagged as an error page.
pub fn is_missing_artifact(headers: &HeaderMap) -> bool {
    header_str(headers, HeaderName::from_static(MISSING_ARTIFACT_HEADER))
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
