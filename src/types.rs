use geo::{Centroid, MultiPolygon, Point};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A named region from a boundary file.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
    pub properties: Map<String, Value>,
}

impl Area {
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }
}

/// One record of the statistics table. Empty cells are absent from `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticRow {
    pub key: String,
    pub fields: Map<String, Value>,
}

impl StatisticRow {
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryCollection {
    pub areas: Vec<Area>,
}

impl BoundaryCollection {
    pub fn new(areas: Vec<Area>) -> Self {
        Self { areas }
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }
}

/// Statistic rows indexed by key, preserving file order for display.
#[derive(Debug, Clone, Default)]
pub struct StatisticTable {
    pub columns: Vec<String>,
    rows: Vec<StatisticRow>,
    index: HashMap<String, usize>,
}

impl StatisticTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Inserts a row unless its key is already present. Returns false on duplicates.
    pub fn insert(&mut self, row: StatisticRow) -> bool {
        if self.index.contains_key(&row.key) {
            return false;
        }
        self.index.insert(row.key.clone(), self.rows.len());
        self.rows.push(row);
        true
    }

    pub fn get(&self, key: &str) -> Option<&StatisticRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn rows(&self) -> &[StatisticRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_table_keeps_first_duplicate() {
        let mut table = StatisticTable::default();
        assert!(table.insert(row("A", 1.0)));
        assert!(!table.insert(row("A", 2.0)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("A").and_then(|r| r.number("value")), Some(1.0));
    }

    #[test]
    fn test_area_centroid() {
        let area = square("A", 10.0, 40.0);
        let c = area.centroid().unwrap();
        assert!((c.x() - 10.5).abs() < 1e-9);
        assert!((c.y() - 40.5).abs() < 1e-9);
    }

    #[test]
    fn test_number_ignores_text() {
        let mut r = row("A", 3.0);
        r.fields.insert("label".to_string(), Value::String("x".to_string()));
        assert_eq!(r.number("label"), None);
        assert_eq!(r.number("missing"), None);
    }
}
