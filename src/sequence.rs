//! Source sequence: the ordered, randomly-indexable list of images.
//!
//! Discovery and RAW/JPEG pairing happen elsewhere; this module only needs
//! index-based access and a stable identity per source.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Process-scoped identity of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl SourceId {
    /// Derive an id from a path.
    ///
    /// The path string is lower-cased so `C:\Shots\a.JPG` and `c:/shots/a.jpg`
    /// style variants produced by different listing code agree.
    pub fn from_path(path: &Path) -> Self {
        let normalized = path.to_string_lossy().replace('\\', "/").to_lowercase();
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A single decodable source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub path: PathBuf,
}

impl SourceDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: SourceId::from_path(&path),
            path,
        }
    }
}

/// Ordered list of sources the viewer navigates through.
pub trait SourceSequence: Send + Sync {
    /// Number of sources.
    fn len(&self) -> usize;

    /// Source at `index`, or `None` when out of range.
    fn get(&self, index: usize) -> Option<SourceDescriptor>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `Vec`-backed sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageList {
    sources: Vec<SourceDescriptor>,
}

impl ImageList {
    pub fn new(sources: Vec<SourceDescriptor>) -> Self {
        Self { sources }
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            sources: paths.into_iter().map(SourceDescriptor::new).collect(),
        }
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }
}

impl SourceSequence for ImageList {
    fn len(&self) -> usize {
        self.sources.len()
    }

    fn get(&self, index: usize) -> Option<SourceDescriptor> {
        self.sources.get(index).cloned()
    }
}

/// Whether two sequences list the same sources in the same order.
pub fn same_sources(a: &dyn SourceSequence, b: &dyn SourceSequence) -> bool {
    a.len() == b.len() && (0..a.len()).all(|i| a.get(i).map(|s| s.id) == b.get(i).map(|s| s.id))
}
