//! Maven 2 repository layout
//!
//! Paths look like `group/as/dirs/artifactId/baseVersion/fileName`. The file
//! name must start with `artifactId-version` (or, for snapshots, the
//! artifact id followed by the base version with `SNAPSHOT` replaced by
//! either `SNAPSHOT` again or a `yyyyMMdd.HHmmss-N` timestamp). Anything
//! else in the version directory is not the artifact's own file.

use crate::coordinate::{
    read_timestamped_suffix, ArtifactCoordinate, ChecksumKind, CoordinateParts, SignatureKind,
    METADATA_FILE, SNAPSHOT,
};
use crate::layout::{CoordinateCalculator, LayoutId};

/// Calculator for the Maven 2 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Maven2Layout;

impl Maven2Layout {
    pub fn new() -> Self {
        Self
    }
}

/// Path split into its directory roles.
struct Segments<'a> {
    group_dirs: &'a [&'a str],
    artifact_id: &'a str,
    version_dir: &'a str,
    file_name: &'a str,
}

fn split_segments<'a>(parts: &'a [&'a str]) -> Option<Segments<'a>> {
    // group (at least one dir), artifact, version, file
    if parts.len() < 4 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let n = parts.len();
    Some(Segments {
        group_dirs: &parts[..n - 3],
        artifact_id: parts[n - 3],
        version_dir: parts[n - 2],
        file_name: parts[n - 1],
    })
}

/// Classifier and extension from the text following the version.
///
/// `.ext` has no classifier; `-classifier.ext` has one. The extension may
/// itself contain dots (`tar.gz`).
fn split_tail(tail: &str) -> Option<(Option<String>, String)> {
    if let Some(extension) = tail.strip_prefix('.') {
        if extension.is_empty() {
            return None;
        }
        return Some((None, extension.to_string()));
    }
    let rest = tail.strip_prefix('-')?;
    let dot = rest.find('.')?;
    let (classifier, extension) = (&rest[..dot], &rest[dot + 1..]);
    if classifier.is_empty() || extension.is_empty() {
        return None;
    }
    Some((Some(classifier.to_string()), extension.to_string()))
}

impl CoordinateCalculator for Maven2Layout {
    fn layout_id(&self) -> LayoutId {
        LayoutId::Maven2
    }

    fn path_to_coordinate(&self, path: &str) -> Option<ArtifactCoordinate> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let parts: Vec<&str> = path.split('/').collect();
        let segments = split_segments(&parts)?;

        let (name, checksum) = ChecksumKind::strip_from(segments.file_name);
        let (name, signature) = SignatureKind::strip_from(name);
        if name.ends_with(METADATA_FILE) {
            return None;
        }

        let artifact_id = segments.artifact_id;
        let version_dir = segments.version_dir;
        let mut parts = CoordinateParts {
            group_id: segments.group_dirs.join("."),
            artifact_id: artifact_id.to_string(),
            base_version: version_dir.to_string(),
            checksum,
            signature,
            ..Default::default()
        };

        let tail = match version_dir.strip_suffix(SNAPSHOT) {
            Some(version_stem) => {
                parts.snapshot = true;
                let prefix = format!("{}-{}", artifact_id, version_stem);
                let remainder = name.strip_prefix(prefix.as_str())?;

                if let Some(tail) = remainder.strip_prefix(SNAPSHOT) {
                    parts.version = version_dir.to_string();
                    tail
                } else {
                    let suffix = read_timestamped_suffix(remainder)?;
                    parts.version = format!("{}{}", version_stem, suffix.raw);
                    parts.snapshot_timestamp = Some(suffix.timestamp);
                    parts.snapshot_build_number = Some(suffix.build_number);
                    suffix.rest
                }
            }
            None => {
                let prefix = format!("{}-{}", artifact_id, version_dir);
                parts.version = version_dir.to_string();
                name.strip_prefix(prefix.as_str())?
            }
        };

        let (classifier, extension) = split_tail(tail)?;
        parts.classifier = classifier;
        parts.extension = extension;

        Some(ArtifactCoordinate::from_parts(parts))
    }

    fn coordinate_to_path(&self, coordinate: &ArtifactCoordinate) -> String {
        format!(
            "/{}/{}/{}/{}",
            coordinate.group_id().replace('.', "/"),
            coordinate.artifact_id(),
            coordinate.base_version(),
            coordinate.name()
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
