//! Remote availability evaluation
//!
//! Turns the answer to an availability probe into a verdict. Kept free of
//! I/O so the rules can be tested on their own.

use depot_core::Timestamp;
use reqwest::StatusCode;

/// `Server` header token of Amazon S3.
pub const S3_SERVER_TOKEN: &str = "AmazonS3";

/// Path probed when a remote root answers 404, present on remote repository
/// managers that merely disable browsing.
pub const REPOSITORY_METADATA_PATH: &str = "/.meta/repository-metadata.xml";

/// Verdict of one availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
    /// The status proves nothing either way.
    Unexpected(StatusCode),
}

/// True when a `Server` header identifies Amazon S3.
pub fn is_amazon_s3(server: Option<&str>) -> bool {
    server
        .map(|value| value.contains(S3_SERVER_TOKEN))
        .unwrap_or(false)
}

/// `None` and the Unix epoch both mean "no reference time".
pub fn since_is_set(since: Option<Timestamp>) -> bool {
    since.map(|since| since.timestamp_millis() > 0).unwrap_or(false)
}

/// Evaluate a probe answer.
///
/// # Arguments
/// * `status` - Final status after redirects
/// * `last_modified` - The answer's `Last-Modified`, if any
/// * `since` - Reference time; when set, a 200 only counts if the content
///   changed after it
/// * `strict` - Disables the relaxed rule for S3 remotes
/// * `s3` - Whether the remote was identified as Amazon S3
pub fn evaluate_availability(
    status: StatusCode,
    last_modified: Option<Timestamp>,
    since: Option<Timestamp>,
    strict: bool,
    s3: bool,
) -> Availability {
    let code = status.as_u16();

    if !strict && s3 {
        // Any completed HTTP exchange proves an S3 bucket reachable.
        return if (200..=500).contains(&code) {
            Availability::Available
        } else {
            Availability::Unavailable
        };
    }

    if status == StatusCode::OK {
        return match (since_is_set(since), since, last_modified) {
            (true, Some(since), Some(modified)) if modified <= since => Availability::Unavailable,
            _ => Availability::Available,
        };
    }

    if status.is_redirection() || status == StatusCode::NOT_FOUND {
        return Availability::Unavailable;
    }

    Availability::Unexpected(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(year: i32) -> Timestamp {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unset_since_ignores_last_modified() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        for since in [None, Some(epoch)] {
            assert_eq!(
                evaluate_availability(StatusCode::OK, Some(at(1970)), since, true, false),
                Availability::Available
            );
            assert_eq!(
                evaluate_availability(StatusCode::OK, None, since, true, false),
                Availability::Available
            );
        }
    }

    #[test]
    fn test_set_since_compares_last_modified() {
        let since = Some(at(2020));
        assert_eq!(
            evaluate_availability(StatusCode::OK, Some(at(2021)), since, true, false),
            Availability::Available
        );
        assert_eq!(
            evaluate_availability(StatusCode::OK, Some(at(2019)), since, true, false),
            Availability::Unavailable
        );
        assert_eq!(
            evaluate_availability(StatusCode::OK, None, since, true, false),
            Availability::Available
        );
    }

    #[test]
    fn test_redirect_and_missing_unavailable() {
        for status in [StatusCode::FOUND, StatusCode::MOVED_PERMANENTLY, StatusCode::NOT_FOUND] {
            assert_eq!(
                evaluate_availability(status, None, None, false, false),
                Availability::Unavailable
            );
        }
    }

    #[test]
    fn test_other_status_unexpected() {
        assert_eq!(
            evaluate_availability(StatusCode::BAD_GATEWAY, None, None, false, false),
            Availability::Unexpected(StatusCode::BAD_GATEWAY)
        );
    }

    #[test]
    fn test_relaxed_s3() {
        assert_eq!(
            evaluate_availability(StatusCode::FORBIDDEN, None, None, false, true),
            Availability::Available
        );
        assert_eq!(
            evaluate_availability(StatusCode::INTERNAL_SERVER_ERROR, None, None, false, true),
            Availability::Available
        );
        assert_eq!(
            evaluate_availability(StatusCode::BAD_GATEWAY, None, None, false, true),
            Availability::Unavailable
        );
        // Strict checks get the regular rules.
        assert_eq!(
            evaluate_availability(StatusCode::NOT_FOUND, None, None, true, true),
            Availability::Unavailable
        );
    }

    #[test]
    fn test_s3_detection() {
        assert!(is_amazon_s3(Some("AmazonS3")));
        assert!(!is_amazon_s3(Some("nginx")));
        assert!(!is_amazon_s3(None));
    }
}
