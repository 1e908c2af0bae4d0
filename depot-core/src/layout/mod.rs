//! Repository layouts
//!
//! A layout is the scheme that maps repository-relative paths to artifact
//! coordinates and back. Every layout implements [`CoordinateCalculator`];
//! the [`LayoutRegistry`] resolves a [`LayoutId`] to its calculator once, at
//! repository-configuration time.

pub mod maven1;
pub mod maven2;

pub use maven1::Maven1Layout;
pub use maven2::Maven2Layout;

use crate::ArtifactCoordinate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Parser and serializer between repository paths and coordinates.
///
/// Implementations must be total: `path_to_coordinate` returns `None` for
/// anything that is not an artifact file, and never panics.
pub trait CoordinateCalculator: Send + Sync + fmt::Debug {
    /// The layout this calculator implements.
    fn layout_id(&self) -> LayoutId;

    /// Parse a repository path. A leading slash is optional.
    fn path_to_coordinate(&self, path: &str) -> Option<ArtifactCoordinate>;

    /// Render the repository path of a coordinate, with a leading slash.
    fn coordinate_to_path(&self, coordinate: &ArtifactCoordinate) -> String;
}

/// Layout identifier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LayoutId {
    /// `group/as/dirs/artifact/baseVersion/file`
    #[default]
    Maven2,
    /// Legacy `group/types/file`
    Maven1,
}

impl LayoutId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutId::Maven2 => "maven2",
            LayoutId::Maven1 => "maven1",
        }
    }
}

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LayoutId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maven2" | "default" => Ok(LayoutId::Maven2),
            "maven1" | "legacy" => Ok(LayoutId::Maven1),
            other => Err(format!("unknown layout: {}", other)),
        }
    }
}

/// Registry of coordinate calculators keyed by layout.
#[derive(Debug, Clone)]
pub struct LayoutRegistry {
    calculators: BTreeMap<LayoutId, Arc<dyn CoordinateCalculator>>,
}

impl LayoutRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            calculators: BTreeMap::new(),
        }
    }

    /// Register a calculator under its own layout id, replacing any previous one.
    pub fn register(&mut self, calculator: Arc<dyn CoordinateCalculator>) {
        self.calculators.insert(calculator.layout_id(), calculator);
    }

    /// Resolve the calculator for a layout.
    pub fn get(&self, layout: LayoutId) -> Option<Arc<dyn CoordinateCalculator>> {
        self.calculators.get(&layout).cloned()
    }

    /// Parse `path` with the named layout. Unregistered layouts yield `None`.
    pub fn path_to_coordinate(&self, layout: LayoutId, path: &str) -> Option<ArtifactCoordinate> {
        self.calculators.get(&layout)?.path_to_coordinate(path)
    }

    pub fn coordinate_to_path(
        &self,
        layout: LayoutId,
        coordinate: &ArtifactCoordinate,
    ) -> Option<String> {
        self.calculators
            .get(&layout)
            .map(|calculator| calculator.coordinate_to_path(coordinate))
    }

    pub fn layouts(&self) -> Vec<LayoutId> {
        self.calculators.keys().copied().collect()
    }
}

impl Default for LayoutRegistry {
    /// Both built-in layouts.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Maven2Layout::new()));
        registry.register(Arc::new(Maven1Layout::new()));
        registry
    }
}
