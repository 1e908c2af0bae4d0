//! Legacy Maven 1 repository layout
//!
//! Paths look like `group/<type>s/artifactId-version[-classifier].ext`, with
//! the dotted group id as a single directory, the packaging type as the
//! directory below it and no version directory. Matching
//! is looser than the Maven 2 layout: the artifact id and version are split
//! by pattern, not by directory.

use crate::coordinate::{ArtifactCoordinate, ChecksumKind, CoordinateParts, METADATA_FILE, SNAPSHOT};
use crate::layout::{CoordinateCalculator, LayoutId};
use once_cell::sync::Lazy;
use regex::Regex;

/// Artifact ids without digits: `dom4j` fails this, `castor-ejb` matches.
static NAME_WITHOUT_DIGITS: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^([^0-9]+)-([0-9].+)\.([^0-9]+)$"));

/// Fallback for artifact ids carrying digits (`slf4j-log4j12`, `xpp3_min`).
static NAME_WITH_DIGITS: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^([a-z0-9_-]+)-([0-9-].+)\.([^0-9]+)$"));

const SOURCES_DIR: &str = "java-sources";
const JAVADOC_DIR: &str = "javadocs";
const EJB_DIR: &str = "ejbs";
const EJB_CLIENT_NAME: &str = "client.jar";

/// Calculator for the legacy layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Maven1Layout;

impl Maven1Layout {
    pub fn new() -> Self {
        Self
    }
}

/// Classifier implied by the type directory.
fn classifier_for_dir(dir: &str, name: &str) -> Option<&'static str> {
    match dir {
        SOURCES_DIR => Some("sources"),
        JAVADOC_DIR => Some("javadoc"),
        EJB_DIR if name.ends_with(EJB_CLIENT_NAME) => Some("client"),
        _ => None,
    }
}

/// Type directory for a coordinate.
fn dir_for(coordinate: &ArtifactCoordinate) -> String {
    match coordinate.classifier() {
        None => format!("{}s", coordinate.extension()),
        Some(c) if c.starts_with("source") => SOURCES_DIR.to_string(),
        Some(c) if c.starts_with("client") => EJB_DIR.to_string(),
        Some(c) => format!("{}s", c),
    }
}

fn match_name(name: &str) -> Option<(String, String, String)> {
    for pattern in [&NAME_WITHOUT_DIGITS, &NAME_WITH_DIGITS] {
        let Some(regex) = pattern.as_ref().ok() else {
            continue;
        };
        if let Some(caps) = regex.captures(name) {
            return Some((
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str().to_string(),
                caps.get(3)?.as_str().to_string(),
            ));
        }
    }
    None
}

impl CoordinateCalculator for Maven1Layout {
    fn layout_id(&self) -> LayoutId {
        LayoutId::Maven1
    }

    fn path_to_coordinate(&self, path: &str) -> Option<ArtifactCoordinate> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let parts: Vec<&str> = path.split('/').collect();
        let [group, dir, file_name] = parts[..] else {
            return None;
        };
        if [group, dir, file_name].iter().any(|p| p.is_empty()) {
            return None;
        }
        let group_id = group.to_string();

        let classifier = classifier_for_dir(dir, file_name);

        // Legacy repositories only ever carried md5 and sha1 sidecars.
        let (name, checksum) = match ChecksumKind::strip_from(file_name) {
            (name, Some(kind @ (ChecksumKind::Md5 | ChecksumKind::Sha1))) => (name, Some(kind)),
            _ => (file_name, None),
        };
        if name.ends_with(METADATA_FILE) {
            return None;
        }

        let (artifact_id, mut version, extension) = match_name(name)?;
        if let Some(classifier) = classifier {
            let suffix = format!("-{}", classifier);
            version = version.strip_suffix(suffix.as_str())?.to_string();
            if version.is_empty() {
                return None;
            }
        }

        let snapshot = version.ends_with(SNAPSHOT);
        Some(ArtifactCoordinate::from_parts(CoordinateParts {
            group_id,
            artifact_id,
            base_version: version.clone(),
            version,
            classifier: classifier.map(str::to_string),
            extension,
            snapshot,
            checksum,
            ..Default::default()
        }))
    }

    fn coordinate_to_path(&self, coordinate: &ArtifactCoordinate) -> String {
        format!(
            "/{}/{}/{}",
            coordinate.group_id(),
            dir_for(coordinate),
            coordinate.name()
        )
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_release_jar_round_trip(
            group in "[a-z]{1,8}(\\.[a-z]{1,8}){0,2}",
            artifact in "[a-z]{1,8}(-[a-z]{1,6}){0,2}",
            version in "[0-9]{1,3}\\.[0-9]{1,3}(\\.[0-9]{1,3})?",
        ) {
            let layout = Maven1Layout::new();
            let coordinate = ArtifactCoordinate::new(group, artifact, version);
            let path = layout.coordinate_to_path(&coordinate);
            let parsed = layout.path_to_coordinate(&path);
            prop_assert_eq!(parsed.as_ref(), Some(&coordinate));
        }

        #[test]
        fn prop_arbitrary_input_never_panics(path in ".{0,120}") {
            let _ = Maven1Layout::new().path_to_coordinate(&path);
        }
    }
}
