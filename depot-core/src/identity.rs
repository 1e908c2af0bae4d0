//! Identity types for repositories and repository paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepositoryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RepositoryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The root path of every repository.
pub const PATH_ROOT: &str = "/";

/// Repository-relative path, always stored with a leading slash.
///
/// A trailing slash is preserved: it marks a collection request.
/// Deserialized values are normalized like [`RepositoryPath::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RepositoryPath(String);

impl RepositoryPath {
    /// Normalize a raw request path. Blank input becomes the root path.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Self::root();
        }
        if raw.starts_with('/') {
            Self(raw.to_string())
        } else {
            Self(format!("/{}", raw))
        }
    }

    pub fn root() -> Self {
        Self(PATH_ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path without its leading slash, as layouts and remote URLs expect.
    pub fn relative(&self) -> &str {
        self.0.strip_prefix('/').unwrap_or(&self.0)
    }

    pub fn is_root(&self) -> bool {
        self.0 == PATH_ROOT
    }

    /// True when the path names a collection rather than a file.
    pub fn is_collection(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Subtree membership by plain string prefix.
    pub fn starts_with(&self, prefix: &RepositoryPath) -> bool {
        prefix.is_root() || self.0.starts_with(prefix.as_str())
    }

    /// Every ancestor of this path, nearest first, ending with the root.
    pub fn parents(&self) -> Vec<RepositoryPath> {
        let mut parents = Vec::new();
        let mut current = self.0.trim_end_matches('/');
        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            if current.is_empty() {
                break;
            }
            parents.push(RepositoryPath(current.to_string()));
        }
        if !self.is_root() {
            parents.push(RepositoryPath::root());
        }
        parents
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepositoryPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RepositoryPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<RepositoryPath> for String {
    fn from(value: RepositoryPath) -> Self {
        value.0
    }
}

impl AsRef<str> for RepositoryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalizes_leading_slash() {
        assert_eq!(RepositoryPath::new("com/example").as_str(), "/com/example");
        assert_eq!(RepositoryPath::new("/com/example").as_str(), "/com/example");
        assert_eq!(RepositoryPath::new("").as_str(), "/");
        assert_eq!(RepositoryPath::new("   ").as_str(), "/");
    }

    #[test]
    fn test_relative_strips_slash() {
        assert_eq!(RepositoryPath::new("/a/b.jar").relative(), "a/b.jar");
        assert_eq!(RepositoryPath::root().relative(), "");
    }

    #[test]
    fn test_deserialize_normalizes() {
        let path: RepositoryPath = serde_json::from_str("\"com/x.jar\"").unwrap();
        assert_eq!(path.as_str(), "/com/x.jar");
        assert_eq!(path.relative(), "com/x.jar");

        let empty: RepositoryPath = serde_json::from_str("\"\"").unwrap();
        assert!(empty.is_root());
        assert_eq!(empty.relative(), "");

        assert_eq!(serde_json::to_string(&path).unwrap(), "\"/com/x.jar\"");
    }

    #[test]
    fn test_collection_detection() {
        assert!(RepositoryPath::new("/com/example/").is_collection());
        assert!(!RepositoryPath::new("/com/example").is_collection());
    }

    #[test]
    fn test_parents_nearest_first() {
        let parents = RepositoryPath::new("/com/example/foo/1.0/foo-1.0.jar").parents();
        let parents: Vec<&str> = parents.iter().map(|p| p.as_str()).collect();
        assert_eq!(
            parents,
            vec!["/com/example/foo/1.0", "/com/example/foo", "/com/example", "/com", "/"]
        );
        assert!(RepositoryPath::root().parents().is_empty());
    }

    #[test]
    fn test_starts_with_root_covers_everything() {
        let path = RepositoryPath::new("/com/example/foo");
        assert!(path.starts_with(&RepositoryPath::root()));
        assert!(path.starts_with(&RepositoryPath::new("/com/example")));
        assert!(!path.starts_with(&RepositoryPath::new("/org")));
    }
}
