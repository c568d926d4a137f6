use crate::config::RenderOptions;
use crate::scale::ColorScale;
use crate::types::{Area, BoundaryCollection, StatisticRow, StatisticTable};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Styling and display data for one area, index-aligned with the boundary collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedArea {
    pub key: String,
    pub value: Option<f64>,
    pub fill: String,
    pub tooltip: Vec<(String, String)>,
    pub label: String,
}

impl ClassifiedArea {
    pub fn is_fallback(&self) -> bool {
        self.value.is_none()
    }
}

/// Keys that did not line up between the two sources. Informational only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinReport {
    /// Areas without a statistics row
    pub unmatched_areas: Vec<String>,
    /// Statistics rows without an area
    pub unused_rows: Vec<String>,
    /// Matched areas whose value field was absent or not numeric
    pub missing_value: Vec<String>,
}

impl JoinReport {
    pub fn log(&self, level: &str) {
        if !self.unmatched_areas.is_empty() {
            warn!(
                "{}: {} areas have no statistics row",
                level,
                self.unmatched_areas.len()
            );
            debug!("{}: unmatched areas {:?}", level, self.unmatched_areas);
        }
        if !self.unused_rows.is_empty() {
            warn!(
                "{}: {} statistics rows match no area",
                level,
                self.unused_rows.len()
            );
            debug!("{}: unused rows {:?}", level, self.unused_rows);
        }
        if !self.missing_value.is_empty() {
            warn!(
                "{}: {} areas lack a numeric value",
                level,
                self.missing_value.len()
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub areas: Vec<ClassifiedArea>,
    /// Present when at least one area has a numeric value.
    pub scale: Option<ColorScale>,
    pub report: JoinReport,
}

/// Joins statistics onto areas and derives fill, tooltip and label for each.
///
/// The scale domain covers the matched values only. Anything that cannot be
/// joined or has no numeric value gets `opts.fallback_fill`.
pub fn classify(
    boundaries: &BoundaryCollection,
    table: &StatisticTable,
    opts: &RenderOptions,
) -> Classification {
    let mut report = JoinReport::default();
    let mut used = HashSet::new();

    let joined: Vec<(&Area, Option<&StatisticRow>, Option<f64>)> = boundaries
        .areas
        .iter()
        .map(|area| {
            let row = table.get(&area.key);
            match row {
                Some(_) => {
                    used.insert(area.key.as_str());
                }
                None => report.unmatched_areas.push(area.key.clone()),
            }
            let value = row.and_then(|r| r.number(&opts.value_field));
            if row.is_some() && value.is_none() {
                report.missing_value.push(area.key.clone());
            }
            (area, row, value)
        })
        .collect();

    report.unused_rows = table
        .rows()
        .iter()
        .filter(|r| !used.contains(r.key.as_str()))
        .map(|r| r.key.clone())
        .collect();

    let scale = ColorScale::from_values(opts.scheme, joined.iter().filter_map(|(_, _, v)| *v));

    let areas = joined
        .into_iter()
        .map(|(area, row, value)| {
            let fill = match (value, scale) {
                (Some(v), Some(scale)) => scale.color(v).to_hex(),
                _ => opts.fallback_fill.clone(),
            };
            ClassifiedArea {
                key: area.key.clone(),
                value,
                fill,
                tooltip: tooltip(area, row, &opts.tooltip_fields),
                label: label(area, row, &opts.label_field),
            }
        })
        .collect::<Vec<_>>();

    info!(
        "Classified {} areas ({} with values)",
        areas.len(),
        areas.iter().filter(|a| !a.is_fallback()).count()
    );

    Classification {
        areas,
        scale,
        report,
    }
}

/// Area properties take precedence over joined statistic fields.
fn lookup<'a>(area: &'a Area, row: Option<&'a StatisticRow>, field: &str) -> Option<&'a Value> {
    area.properties
        .get(field)
        .or_else(|| row.and_then(|r| r.fields.get(field)))
        .filter(|v| !v.is_null())
}

fn tooltip(area: &Area, row: Option<&StatisticRow>, fields: &[String]) -> Vec<(String, String)> {
    fields
        .iter()
        .filter_map(|field| {
            lookup(area, row, field).map(|v| (field.clone(), display_value(v)))
        })
        .collect()
}

fn label(area: &Area, row: Option<&StatisticRow>, field: &str) -> String {
    lookup(area, row, field)
        .map(display_value)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| area.key.clone())
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
