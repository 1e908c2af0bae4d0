//! Artifact coordinates
//!
//! An [`ArtifactCoordinate`] is the structured form of a repository path that
//! names an artifact file: group, artifact, version, optional classifier,
//! extension, snapshot details and the checksum/signature wrapping of the file.
//! Coordinates are immutable once built.

use crate::Timestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal marker of a snapshot version.
pub const SNAPSHOT: &str = "SNAPSHOT";

/// Repository metadata file name. Never an artifact.
pub const METADATA_FILE: &str = "maven-metadata.xml";

/// Length of the `yyyyMMdd.HHmmss` snapshot timestamp.
pub const SNAPSHOT_TIMESTAMP_LEN: usize = 15;

const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%d.%H%M%S";

/// Checksum algorithm of a checksum file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumKind {
    /// All kinds, in suffix-matching order.
    pub const ALL: [ChecksumKind; 4] = [
        ChecksumKind::Md5,
        ChecksumKind::Sha1,
        ChecksumKind::Sha256,
        ChecksumKind::Sha512,
    ];

    /// File suffix including the leading dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => ".md5",
            ChecksumKind::Sha1 => ".sha1",
            ChecksumKind::Sha256 => ".sha256",
            ChecksumKind::Sha512 => ".sha512",
        }
    }

    /// Split a recognised checksum suffix off `name`.
    pub fn strip_from(name: &str) -> (&str, Option<ChecksumKind>) {
        for kind in Self::ALL {
            if let Some(stripped) = name.strip_suffix(kind.suffix()) {
                return (stripped, Some(kind));
            }
        }
        (name, None)
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix()[1..])
    }
}

/// Signature algorithm of a detached signature file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureKind {
    /// OpenPGP ASCII armored signature (`.asc`)
    Gpg,
}

impl SignatureKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            SignatureKind::Gpg => ".asc",
        }
    }

    pub fn strip_from(name: &str) -> (&str, Option<SignatureKind>) {
        match name.strip_suffix(SignatureKind::Gpg.suffix()) {
            Some(stripped) => (stripped, Some(SignatureKind::Gpg)),
            None => (name, None),
        }
    }
}

/// Parse a `yyyyMMdd.HHmmss` snapshot timestamp as UTC.
///
/// Returns `None` unless the input is exactly 8 digits, a dot and 6 digits
/// forming a valid date and time.
pub fn parse_snapshot_timestamp(value: &str) -> Option<Timestamp> {
    let bytes = value.as_bytes();
    if bytes.len() != SNAPSHOT_TIMESTAMP_LEN || bytes[8] != b'.' {
        return None;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 8 || b.is_ascii_digit());
    if !digits_ok {
        return None;
    }
    NaiveDateTime::parse_from_str(value, SNAPSHOT_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A timestamped snapshot suffix `yyyyMMdd.HHmmss-N` found at the start of
/// `value`, with whatever follows the build number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSuffix<'a> {
    pub timestamp: Timestamp,
    pub build_number: u32,
    /// `yyyyMMdd.HHmmss-N` exactly as written
    pub raw: &'a str,
    /// Text after the build number
    pub rest: &'a str,
}

/// Read `yyyyMMdd.HHmmss-N` from the start of `value`.
///
/// An empty or non-numeric build number rejects the whole suffix.
pub fn read_timestamped_suffix(value: &str) -> Option<TimestampedSuffix<'_>> {
    let stamp = value.get(..SNAPSHOT_TIMESTAMP_LEN)?;
    let timestamp = parse_snapshot_timestamp(stamp)?;
    let after = value.get(SNAPSHOT_TIMESTAMP_LEN..)?.strip_prefix('-')?;
    let digits = after.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let build_number = after[..digits].parse().ok()?;
    let raw_len = SNAPSHOT_TIMESTAMP_LEN + 1 + digits;
    Some(TimestampedSuffix {
        timestamp,
        build_number,
        raw: &value[..raw_len],
        rest: &value[raw_len..],
    })
}

/// Split a fully timestamped version such as `1.0-20200101.120000-3` into its
/// prefix (`1.0-`), timestamp and build number.
pub fn split_timestamped_version(version: &str) -> Option<(&str, Timestamp, u32)> {
    let dash = version.rfind('-')?;
    let start = dash.checked_sub(SNAPSHOT_TIMESTAMP_LEN)?;
    let suffix = read_timestamped_suffix(version.get(start..)?)?;
    if !suffix.rest.is_empty() {
        return None;
    }
    Some((&version[..start], suffix.timestamp, suffix.build_number))
}

/// Structured artifact coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactCoordinate {
    group_id: String,
    artifact_id: String,
    version: String,
    base_version: String,
    classifier: Option<String>,
    extension: String,
    snapshot: bool,
    snapshot_timestamp: Option<Timestamp>,
    snapshot_build_number: Option<u32>,
    checksum: Option<ChecksumKind>,
    signature: Option<SignatureKind>,
}

/// Raw parts handed over by a layout parser.
#[derive(Debug, Clone, Default)]
pub(crate) struct CoordinateParts {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub base_version: String,
    pub classifier: Option<String>,
    pub extension: String,
    pub snapshot: bool,
    pub snapshot_timestamp: Option<Timestamp>,
    pub snapshot_build_number: Option<u32>,
    pub checksum: Option<ChecksumKind>,
    pub signature: Option<SignatureKind>,
}

impl ArtifactCoordinate {
    /// Build a coordinate for a `jar` with no classifier.
    ///
    /// Snapshot details are derived from the version: a trailing
    /// `yyyyMMdd.HHmmss-N` makes it a timestamped snapshot whose base version
    /// replaces that suffix with `SNAPSHOT`; a trailing `SNAPSHOT` makes it a
    /// plain snapshot. Anything else is a release.
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let (base_version, snapshot, snapshot_timestamp, snapshot_build_number) =
            match split_timestamped_version(&version) {
                Some((prefix, timestamp, build)) => {
                    (format!("{}{}", prefix, SNAPSHOT), true, Some(timestamp), Some(build))
                }
                None => (version.clone(), version.ends_with(SNAPSHOT), None, None),
            };

        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version,
            base_version,
            classifier: None,
            extension: "jar".to_string(),
            snapshot,
            snapshot_timestamp,
            snapshot_build_number,
            checksum: None,
            signature: None,
        }
    }

    pub(crate) fn from_parts(parts: CoordinateParts) -> Self {
        Self {
            group_id: parts.group_id,
            artifact_id: parts.artifact_id,
            version: parts.version,
            base_version: parts.base_version,
            classifier: parts.classifier,
            extension: parts.extension,
            snapshot: parts.snapshot,
            snapshot_timestamp: parts.snapshot_timestamp,
            snapshot_build_number: parts.snapshot_build_number,
            checksum: parts.checksum,
            signature: parts.signature,
        }
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_signature(mut self, signature: SignatureKind) -> Self {
        self.signature = Some(signature);
        self
    }

    /// The coordinate of the file this checksum or signature belongs to.
    pub fn primary(&self) -> Self {
        Self {
            checksum: None,
            signature: None,
            ..self.clone()
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn base_version(&self) -> &str {
        &self.base_version
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn snapshot_timestamp(&self) -> Option<Timestamp> {
        self.snapshot_timestamp
    }

    /// Snapshot timestamp as milliseconds since the Unix epoch.
    pub fn snapshot_timestamp_millis(&self) -> Option<i64> {
        self.snapshot_timestamp.map(|ts| ts.timestamp_millis())
    }

    pub fn snapshot_build_number(&self) -> Option<u32> {
        self.snapshot_build_number
    }

    pub fn checksum(&self) -> Option<ChecksumKind> {
        self.checksum
    }

    pub fn is_checksum(&self) -> bool {
        self.checksum.is_some()
    }

    pub fn signature(&self) -> Option<SignatureKind> {
        self.signature
    }

    pub fn is_signature(&self) -> bool {
        self.signature.is_some()
    }

    /// File name this coordinate denotes.
    pub fn name(&self) -> String {
        let mut name = format!("{}-{}", self.artifact_id, self.version);
        if let Some(classifier) = &self.classifier {
            name.push('-');
            name.push_str(classifier);
        }
        name.push('.');
        name.push_str(&self.extension);
        if let Some(signature) = self.signature {
            name.push_str(signature.suffix());
        }
        if let Some(checksum) = self.checksum {
            name.push_str(checksum.suffix());
        }
        name
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        write!(f, ":{}", self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    #[test]
    fn test_new_release_coordinate() {
        let c = ArtifactCoordinate::new("com.example", "foo", "1.0");
        assert_eq!(c.base_version(), "1.0");
        assert!(!c.is_snapshot());
        assert_eq!(c.extension(), "jar");
        assert_eq!(c.name(), "foo-1.0.jar");
    }

    #[test]
    fn test_new_timestamped_snapshot_derives_base_version() {
        let c = ArtifactCoordinate::new("com.example", "foo", "1.0-20200101.120000-3");
        assert!(c.is_snapshot());
        assert_eq!(c.base_version(), "1.0-SNAPSHOT");
        assert_eq!(c.snapshot_build_number(), Some(3));
        assert_eq!(
            c.snapshot_timestamp(),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_new_bare_timestamp_version() {
        let c = ArtifactCoordinate::new("foo", "artifact", "20080623.175436-1");
        assert_eq!(c.base_version(), "SNAPSHOT");
        assert_eq!(c.snapshot_build_number(), Some(1));
    }

    #[test]
    fn test_name_with_classifier_signature_and_checksum() {
        let c = ArtifactCoordinate::new("g", "a", "1.0")
            .with_classifier("sources")
            .with_signature(SignatureKind::Gpg)
            .with_checksum(ChecksumKind::Sha1);
        assert_eq!(c.name(), "a-1.0-sources.jar.asc.sha1");
        assert_eq!(c.primary().name(), "a-1.0-sources.jar");
    }

    #[test]
    fn test_parse_snapshot_timestamp_rejects_garbage() {
        assert!(parse_snapshot_timestamp("20200101.120000").is_some());
        assert!(parse_snapshot_timestamp("20201301.120000").is_none());
        assert!(parse_snapshot_timestamp("2020010.1120000").is_none());
        assert!(parse_snapshot_timestamp("20200101-120000").is_none());
        assert!(parse_snapshot_timestamp("+0200101.120000").is_none());
        assert!(parse_snapshot_timestamp("20200101.12000").is_none());
    }

    #[test]
    fn test_read_timestamped_suffix_requires_build_number() {
        let suffix = read_timestamped_suffix("20070504.160758-25-javadoc.jar").unwrap();
        assert_eq!(suffix.build_number, 25);
        assert_eq!(suffix.raw, "20070504.160758-25");
        assert_eq!(suffix.rest, "-javadoc.jar");

        assert!(read_timestamped_suffix("20101214.143755.ear").is_none());
        assert!(read_timestamped_suffix("20101214.143755-.ear").is_none());
        assert!(read_timestamped_suffix("2010").is_none());
    }

    #[test]
    fn test_checksum_strip() {
        assert_eq!(ChecksumKind::strip_from("a.jar.sha512"), ("a.jar", Some(ChecksumKind::Sha512)));
        assert_eq!(ChecksumKind::strip_from("a.jar"), ("a.jar", None));
    }

    #[test]
    fn test_display() {
        let c = ArtifactCoordinate::new("g", "a", "1").with_classifier("c").with_extension("pom");
        assert_eq!(c.to_string(), "g:a:1:c:pom");
    }
}
