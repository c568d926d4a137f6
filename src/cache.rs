//! Explicit memoization of loaded sources.
//!
//! Entries are keyed by source path and key column, and stamped with the file's
//! modification time. A lookup re-stats the file and reloads on any change.
//! Shapefiles are stamped with the later of the `.shp` and `.dbf` times.

use crate::data;
use crate::error::{LoadError, LoadResult};
use crate::spatial::AreaTree;
use crate::types::{BoundaryCollection, StatisticTable};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

type SourceKey = (PathBuf, String);

struct Entry<T> {
    modified: SystemTime,
    value: Arc<T>,
}

struct Memo<T> {
    entries: HashMap<SourceKey, Entry<T>>,
}

impl<T> Memo<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn get_or_load<F>(&mut self, path: &Path, column: &str, load: F) -> LoadResult<Arc<T>>
    where
        F: FnOnce(&Path, &str) -> LoadResult<T>,
    {
        let modified = source_modified(path).map_err(|e| LoadError::unreadable(path, e))?;
        let key = (path.to_path_buf(), column.to_string());

        if let Some(entry) = self.entries.get(&key) {
            if entry.modified == modified {
                debug!("Cache hit for {:?}", path);
                return Ok(Arc::clone(&entry.value));
            }
        }

        let value = Arc::new(load(path, column)?);
        self.entries.insert(
            key,
            Entry {
                modified,
                value: Arc::clone(&value),
            },
        );
        Ok(value)
    }

    fn invalidate(&mut self, path: &Path) {
        self.entries.retain(|(p, _), _| p != path);
    }
}

/// Modification time of a source, including the attribute table of a shapefile.
fn source_modified(path: &Path) -> std::io::Result<SystemTime> {
    let modified = fs::metadata(path)?.modified()?;
    let is_shapefile = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("shp"));
    if !is_shapefile {
        return Ok(modified);
    }
    match fs::metadata(path.with_extension("dbf")).and_then(|m| m.modified()) {
        Ok(dbf) => Ok(modified.max(dbf)),
        Err(_) => Ok(modified),
    }
}

pub struct SourceCache {
    boundaries: Memo<BoundaryCollection>,
    statistics: Memo<StatisticTable>,
    // Trees are tied to the exact collection they were built from.
    trees: HashMap<SourceKey, (Arc<BoundaryCollection>, Arc<AreaTree>)>,
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self {
            boundaries: Memo::new(),
            statistics: Memo::new(),
            trees: HashMap::new(),
        }
    }

    pub fn boundaries(
        &mut self,
        path: &Path,
        key_property: &str,
    ) -> LoadResult<Arc<BoundaryCollection>> {
        self.boundaries
            .get_or_load(path, key_property, data::load_boundaries)
    }

    pub fn statistics(&mut self, path: &Path, key_column: &str) -> LoadResult<Arc<StatisticTable>> {
        self.statistics
            .get_or_load(path, key_column, data::load_statistics)
    }

    /// Boundaries together with their spatial index, rebuilt only when the
    /// boundaries are reloaded.
    pub fn indexed_boundaries(
        &mut self,
        path: &Path,
        key_property: &str,
    ) -> LoadResult<(Arc<BoundaryCollection>, Arc<AreaTree>)> {
        let areas = self.boundaries(path, key_property)?;
        let key = (path.to_path_buf(), key_property.to_string());

        if let Some((built_from, tree)) = self.trees.get(&key) {
            if Arc::ptr_eq(built_from, &areas) {
                return Ok((areas, Arc::clone(tree)));
            }
        }

        debug!("Building spatial index for {:?}", path);
        let tree = Arc::new(AreaTree::build(&areas));
        self.trees
            .insert(key, (Arc::clone(&areas), Arc::clone(&tree)));
        Ok((areas, tree))
    }

    /// Drops every entry loaded from `path`.
    pub fn invalidate(&mut self, path: &Path) {
        self.boundaries.invalidate(path);
        self.statistics.invalidate(path);
        self.trees.retain(|(p, _), _| p != path);
    }

    pub fn clear(&mut self) {
        self.boundaries.entries.clear();
        self.statistics.entries.clear();
        self.trees.clear();
    }

    pub fn len(&self) -> usize {
        self.boundaries.entries.len() + self.statistics.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
