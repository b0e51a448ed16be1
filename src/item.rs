//! Item identifiers and item origin collaborators.
//!
//! An `ItemId` is the stable, opaque key for one browsable image. Equality
//! and hash define cache identity across every layer of the pipeline, and
//! `cache_key` derives a deterministic, filesystem-safe name for disk-cache
//! entries so they survive across runs.

use crate::decode;
use crate::error::Result;
use crate::window::Resolution;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stable identifier for one browsable image.
///
/// Backed by a local file path or a remote asset id; cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId(Arc<str>);

impl ItemId {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic, filesystem-safe disk-cache file name.
    ///
    /// Keeps a sanitized stem for debuggability and appends a stable 64-bit
    /// FNV-1a hash of the full key so distinct items never collide.
    pub fn cache_key(&self) -> String {
        let last = self.0.rsplit(['/', '\\']).next().unwrap_or("");
        let stem = match last.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => last,
        };
        let sanitized: String = stem
            .chars()
            .take(40)
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("{sanitized}-{:016x}", fnv1a(self.0.as_bytes()))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// FNV-1a 64-bit hash.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Where the bytes for an item come from.
#[derive(Debug, Clone)]
pub enum ItemOrigin {
    /// A readable file on the local filesystem.
    Local(PathBuf),
    /// An asset served by the remote collaborator.
    Remote { asset: String },
}

/// Supplies the origin for each item identifier.
///
/// The ordered item list itself is owned by the caller; the pipeline only
/// resolves identifiers it is asked about.
pub trait ItemSource: Send + Sync {
    fn origin(&self, id: &ItemId) -> Option<ItemOrigin>;
}

/// Fetches encoded image bytes for a remote asset, pre-scaled to (or near)
/// the target resolution.
pub trait RemoteFetch: Send + Sync {
    fn fetch(&self, asset: &str, target: Resolution) -> Result<Vec<u8>>;
}

/// Item source backed by a local screenshot directory.
///
/// Scans one level deep for supported image files and exposes them in sorted
/// order, each resolving to a `Local` origin.
pub struct DirectorySource {
    items: Vec<ItemId>,
    origins: HashMap<ItemId, PathBuf>,
}

impl DirectorySource {
    pub fn scan(dir: &Path) -> Self {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| decode::is_supported(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        paths.sort();

        let mut items = Vec::with_capacity(paths.len());
        let mut origins = HashMap::with_capacity(paths.len());
        for path in paths {
            let id = ItemId::new(path.to_string_lossy());
            items.push(id.clone());
            origins.insert(id, path);
        }
        Self { items, origins }
    }

    /// Ordered item list for the scanned directory.
    pub fn items(&self) -> &[ItemId] {
        &self.items
    }
}

impl ItemSource for DirectorySource {
    fn origin(&self, id: &ItemId) -> Option<ItemOrigin> {
        self.origins.get(id).cloned().map(ItemOrigin::Local)
    }
}
