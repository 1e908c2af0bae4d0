//! Redirect policy
//!
//! Remotes commonly answer a request for a directory without its trailing
//! slash with a redirect to the slashed URL, which would serve an index page
//! in place of an artifact. Content retrieval refuses such redirects on the
//! same host; the request then resolves to not found.

use depot_core::RequestPurpose;
use reqwest::{StatusCode, Url};

/// Status codes followed as redirects. 304 and 300/305 are not.
pub fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Decide whether a redirect from `request` to `location` is followed.
///
/// - a different host is always followed
/// - on the same host, content retrieval never follows a redirect to a
///   collection (a path ending in `/`)
/// - everything else is followed
pub fn should_follow_redirect(request: &Url, location: &Url, purpose: RequestPurpose) -> bool {
    if purpose != RequestPurpose::ContentRetrieval {
        return true;
    }
    if !same_host(request, location) {
        return true;
    }
    !location.path().ends_with('/')
}

fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(a_host), Some(b_host)) => {
            a_host.eq_ignore_ascii_case(b_host)
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}
