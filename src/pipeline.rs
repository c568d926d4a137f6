//! Load, join, classify and render one geographic level.

use crate::cache::SourceCache;
use crate::config::{LevelConfig, RenderOptions};
use crate::error::LoadError;
use crate::processing::{classify, Classification};
use crate::render::{build_map, MapArtifact};
use crate::types::StatisticTable;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RenderedLevel {
    pub artifact: MapArtifact,
    pub classification: Classification,
    pub table: Arc<StatisticTable>,
}

/// Boundary failures abort the level. A statistics failure is reported as a
/// notice on the map and the level is drawn with fallback styling.
pub fn render_level(
    cache: &mut SourceCache,
    level: &LevelConfig,
    opts: &RenderOptions,
) -> Result<RenderedLevel, LoadError> {
    info!("Rendering level '{}'", level.name);

    let boundaries = cache.boundaries(&level.boundaries, &level.join_column_shape)?;

    let mut notices = Vec::new();
    let table = match &level.statistics {
        Some(path) => match cache.statistics(path, level.csv_key()) {
            Ok(table) => table,
            Err(e) => {
                warn!("Statistics for '{}' unavailable: {}", level.name, e);
                notices.push(format!("Statistics could not be loaded: {}", e));
                Arc::new(StatisticTable::default())
            }
        },
        None => Arc::new(StatisticTable::default()),
    };

    let classification = classify(&boundaries, &table, opts);
    classification.report.log(&level.name);

    let artifact = build_map(&boundaries, &classification, opts, notices);
    Ok(RenderedLevel {
        artifact,
        classification,
        table,
    })
}
