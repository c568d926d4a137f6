use crate::error::{LoadError, LoadResult};
use crate::types::{Area, BoundaryCollection, StatisticRow, StatisticTable};
use calamine::{open_workbook_auto, Data, Range, Reader};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::GeoJson;
use serde_json::{Map, Number, Value};
use shapefile::dbase::FieldValue;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Loads a statistics table keyed by `key_column`, choosing the reader from
/// the file extension (CSV or a spreadsheet workbook).
pub fn load_statistics(path: &Path, key_column: &str) -> LoadResult<StatisticTable> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let file = File::open(path).map_err(|e| LoadError::unreadable(path, e))?;
    let table = match extension.as_str() {
        "csv" => read_statistics(file, path, key_column)?,
        "xlsx" | "xls" | "xlsm" | "ods" => {
            drop(file);
            load_workbook(path, key_column)?
        }
        other => {
            return Err(LoadError::malformed(
                path,
                format!("unsupported table format '{}'", other),
            ))
        }
    };
    info!("Loaded statistics for {} areas from {:?}", table.len(), path);
    Ok(table)
}

fn clean_header(h: &str) -> String {
    h.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
        .to_string()
}

/// Accumulates rows under trimmed headers, skipping empty and duplicate keys.
struct TableBuilder<'a> {
    path: &'a Path,
    key_idx: usize,
    table: StatisticTable,
}

impl<'a> TableBuilder<'a> {
    fn new(path: &'a Path, headers: Vec<String>, key_column: &str) -> LoadResult<Self> {
        let key_column = key_column.trim();
        let key_idx = headers
            .iter()
            .position(|h| h == key_column)
            .ok_or_else(|| {
                LoadError::malformed(path, format!("key column '{}' not found", key_column))
            })?;
        Ok(Self {
            path,
            key_idx,
            table: StatisticTable::new(headers),
        })
    }

    fn push<I>(&mut self, key: String, cells: I)
    where
        I: IntoIterator<Item = Option<Value>>,
    {
        if key.is_empty() {
            return;
        }

        let mut fields = Map::new();
        for (idx, cell) in cells.into_iter().enumerate() {
            if idx == self.key_idx {
                continue;
            }
            let (Some(name), Some(value)) = (self.table.columns.get(idx), cell) else {
                continue;
            };
            fields.insert(name.clone(), value);
        }

        if !self.table.insert(StatisticRow { key: key.clone(), fields }) {
            warn!("Duplicate key '{}' in {:?}; keeping the first row", key, self.path);
        }
    }

    fn finish(self) -> StatisticTable {
        self.table
    }
}

/// Parses CSV from any reader; `path` is only used in errors and logs.
pub fn read_statistics<R: Read>(
    reader: R,
    path: &Path,
    key_column: &str,
) -> LoadResult<StatisticTable> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| csv_error(path, e))?
        .iter()
        .map(clean_header)
        .collect();

    let mut builder = TableBuilder::new(path, headers, key_column)?;

    for (line, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => match e.into_kind() {
                csv::ErrorKind::Io(io) => return Err(LoadError::unreadable(path, io)),
                kind => {
                    warn!("Skipping unparsable row {} in {:?}: {:?}", line + 1, path, kind);
                    continue;
                }
            },
        };

        let key = record.get(builder.key_idx).unwrap_or("").trim().to_string();
        builder.push(key, record.iter().map(parse_cell));
    }

    Ok(builder.finish())
}

fn csv_error(path: &Path, err: csv::Error) -> LoadError {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => LoadError::unreadable(path, io),
        kind => LoadError::malformed(path, format!("{:?}", kind)),
    }
}

/// Empty cells are absent; finite numbers become JSON numbers, the rest text.
fn parse_cell(cell: &str) -> Option<Value> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    let number = cell
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .and_then(Number::from_f64);
    Some(match number {
        Some(n) => Value::Number(n),
        None => Value::String(cell.to_string()),
    })
}

/// Reads the first worksheet of a workbook.
fn load_workbook(path: &Path, key_column: &str) -> LoadResult<StatisticTable> {
    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::malformed(path, "workbook has no worksheets"))?
        .map_err(|e| workbook_error(path, e))?;
    read_worksheet(&range, path, key_column)
}

fn workbook_error(path: &Path, err: calamine::Error) -> LoadError {
    match err {
        calamine::Error::Io(io) => LoadError::unreadable(path, io),
        other => LoadError::malformed(path, other),
    }
}

/// First row is the header; cells follow the same rules as CSV cells.
pub fn read_worksheet(
    range: &Range<Data>,
    path: &Path,
    key_column: &str,
) -> LoadResult<StatisticTable> {
    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| LoadError::malformed(path, "worksheet is empty"))?
        .iter()
        .map(|cell| clean_header(&cell.to_string()))
        .collect();

    let mut builder = TableBuilder::new(path, headers, key_column)?;

    for row in rows {
        let key = row.get(builder.key_idx).map(worksheet_key).unwrap_or_default();
        builder.push(key, row.iter().map(worksheet_cell));
    }

    Ok(builder.finish())
}

/// Text keys are kept verbatim; numeric keys are normalised like GeoJSON keys.
fn worksheet_key(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        other => worksheet_cell(other)
            .as_ref()
            .and_then(json_key)
            .unwrap_or_default(),
    }
}

fn worksheet_cell(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::Int(i) => Some(Value::from(*i)),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::String(s) => parse_cell(s),
        other => parse_cell(&other.to_string()),
    }
}

/// Loads polygon boundaries, choosing the reader from the file extension.
pub fn load_boundaries(path: &Path, key_property: &str) -> LoadResult<BoundaryCollection> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let collection = match extension.as_str() {
        "shp" => load_shapefile(path, key_property)?,
        "json" | "geojson" => {
            let file = File::open(path).map_err(|e| LoadError::unreadable(path, e))?;
            read_geojson(BufReader::new(file), path, key_property)?
        }
        other => {
            return Err(LoadError::malformed(
                path,
                format!("unsupported geometry format '{}'", other),
            ))
        }
    };

    info!("Loaded {} areas from {:?}", collection.len(), path);
    Ok(collection)
}

/// Collects areas while enforcing key uniqueness.
struct AreaCollector<'a> {
    path: &'a Path,
    seen: HashSet<String>,
    areas: Vec<Area>,
}

impl<'a> AreaCollector<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            seen: HashSet::new(),
            areas: Vec::new(),
        }
    }

    fn push(&mut self, area: Area) {
        if !self.seen.insert(area.key.clone()) {
            warn!(
                "Duplicate area key '{}' in {:?}; keeping the first feature",
                area.key, self.path
            );
            return;
        }
        self.areas.push(area);
    }

    fn finish(self) -> BoundaryCollection {
        BoundaryCollection::new(self.areas)
    }
}

pub fn read_geojson<R: Read>(
    reader: R,
    path: &Path,
    key_property: &str,
) -> LoadResult<BoundaryCollection> {
    // Loads the whole document into memory.
    let geojson = GeoJson::from_reader(reader).map_err(|e| LoadError::malformed(path, e))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(LoadError::malformed(path, "GeoJSON must be a FeatureCollection")),
    };

    let mut areas = AreaCollector::new(path);

    for (idx, feature) in collection.features.into_iter().enumerate() {
        let properties = feature.properties.unwrap_or_default();

        let Some(key) = properties.get(key_property).and_then(json_key) else {
            warn!(
                "Feature {} in {:?} has no usable '{}' property; skipped",
                idx, path, key_property
            );
            continue;
        };

        let geometry = match feature.geometry {
            Some(geometry) => {
                let converted: geo::Geometry<f64> = geometry.value.try_into().map_err(|e| {
                    LoadError::malformed(path, format!("feature '{}': {}", key, e))
                })?;
                match converted {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        warn!("Feature '{}' is not a polygon; skipped", key);
                        continue;
                    }
                }
            }
            None => {
                warn!("Feature '{}' has no geometry; skipped", key);
                continue;
            }
        };

        areas.push(Area {
            key,
            geometry,
            properties,
        });
    }

    Ok(areas.finish())
}

fn json_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(number_key).unwrap_or_else(|| n.to_string()),
        }),
        _ => None,
    }
}

/// Integral floats print without a fractional part so they match CSV keys.
fn number_key(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

fn load_shapefile(path: &Path, key_property: &str) -> LoadResult<BoundaryCollection> {
    let mut reader = shapefile::Reader::from_path(path).map_err(|e| match e {
        shapefile::Error::IoError(io) => LoadError::unreadable(path, io),
        other => LoadError::malformed(path, other),
    })?;

    let mut areas = AreaCollector::new(path);

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| LoadError::malformed(path, e))?;

        let properties: Map<String, Value> = record
            .into_iter()
            .filter_map(|(name, value)| field_to_json(value).map(|v| (name.trim().to_string(), v)))
            .collect();

        let Some(key) = properties.get(key_property).and_then(json_key) else {
            debug!("Shape without '{}' attribute in {:?}; skipped", key_property, path);
            continue;
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| LoadError::malformed(path, format!("{:?}", e)))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| LoadError::malformed(path, format!("{:?}", e)))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| LoadError::malformed(path, format!("{:?}", e)))?,
            _ => {
                warn!("Shape '{}' is not a polygon; skipped", key);
                continue;
            }
        };

        areas.push(Area {
            key,
            geometry,
            properties,
        });
    }

    Ok(areas.finish())
}

fn field_to_json(value: FieldValue) -> Option<Value> {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| Value::String(s.to_string()))
        }
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            Number::from_f64(n).map(Value::Number)
        }
        FieldValue::Float(Some(f)) => Number::from_f64(f as f64).map(Value::Number),
        FieldValue::Integer(i) => Some(Value::from(i)),
        FieldValue::Logical(Some(b)) => Some(Value::Bool(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CSV: &str = " quartiere , percentuale ,population,note\n\
                       Navile,23.5,68000,\n\
                       Savena , 20 ,59000,ok\n\
                       ,99,1,\n\
                       Navile,1,1,dup\n";

    #[test]
    fn test_csv_trims_headers_and_cells() {
        let table = read_statistics(CSV.as_bytes(), Path::new("q.csv"), "quartiere").unwrap();
        assert_eq!(table.columns, vec!["quartiere", "percentuale", "population", "note"]);
        assert_eq!(table.len(), 2);

        let navile = table.get("Navile").unwrap();
        assert_eq!(navile.number("percentuale"), Some(23.5));
        assert_eq!(navile.number("population"), Some(68000.0));
        // empty cell is absent
        assert!(navile.fields.get("note").is_none());

        let savena = table.get("Savena").unwrap();
        assert_eq!(savena.number("percentuale"), Some(20.0));
        assert_eq!(savena.fields.get("note"), Some(&Value::String("ok".into())));
    }

    #[test]
    fn test_csv_missing_key_column_is_malformed() {
        let err = read_statistics(CSV.as_bytes(), Path::new("q.csv"), "municipio").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_csv_non_numeric_value_stays_text() {
        let csv = "id,value\nA,n/a\nB,NaN\n";
        let table = read_statistics(csv.as_bytes(), Path::new("t.csv"), "id").unwrap();
        assert_eq!(table.get("A").unwrap().number("value"), None);
        assert_eq!(table.get("B").unwrap().number("value"), None);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_statistics(&dir.path().join("nope.csv"), "id").unwrap_err();
        assert!(err.is_unreadable());
        let err = load_boundaries(&dir.path().join("nope.geojson"), "id").unwrap_err();
        assert!(err.is_unreadable());
    }

    const GEOJSON: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"id": "A", "name": "Alpha"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type": "Feature", "properties": {"id": 7},
         "geometry": {"type": "MultiPolygon", "coordinates": [[[[2,0],[3,0],[3,1],[2,1],[2,0]]]]}},
        {"type": "Feature", "properties": {"name": "no key"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
        {"type": "Feature", "properties": {"id": "P"},
         "geometry": {"type": "Point", "coordinates": [0,0]}},
        {"type": "Feature", "properties": {"id": "N"}, "geometry": null},
        {"type": "Feature", "properties": {"id": "A"},
         "geometry": {"type": "Polygon", "coordinates": [[[5,5],[6,5],[6,6],[5,5]]]}}
      ]
    }"#;

    #[test]
    fn test_geojson_tolerates_bad_features() {
        let collection = read_geojson(GEOJSON.as_bytes(), Path::new("b.geojson"), "id").unwrap();
        let keys: Vec<&str> = collection.areas.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "7"]);
        assert_eq!(
            collection.areas[0].properties.get("name"),
            Some(&Value::String("Alpha".into()))
        );
    }

    #[test]
    fn test_geojson_must_be_collection() {
        let doc = r#"{"type": "Point", "coordinates": [0, 0]}"#;
        let err = read_geojson(doc.as_bytes(), Path::new("p.json"), "id").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));

        let err = read_geojson("not json".as_bytes(), Path::new("p.json"), "id").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_load_boundaries_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("areas.json");
        fs::write(&path, GEOJSON).unwrap();
        let collection = load_boundaries(&path, "id").unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_number_key() {
        assert_eq!(number_key(3.0), "3");
        assert_eq!(number_key(3.5), "3.5");
        assert_eq!(json_key(&serde_json::json!(12)), Some("12".to_string()));
        assert_eq!(json_key(&serde_json::json!(" X ")), Some("X".to_string()));
        assert_eq!(json_key(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_worksheet_rows() {
        let mut range = Range::new((0, 0), (4, 2));
        range.set_value((0, 0), Data::String(" municipio ".to_string()));
        range.set_value((0, 1), Data::String("percentuale".to_string()));
        range.set_value((0, 2), Data::String("population".to_string()));
        range.set_value((1, 0), Data::String("I".to_string()));
        range.set_value((1, 1), Data::Float(35.5));
        range.set_value((1, 2), Data::Int(80000));
        range.set_value((2, 0), Data::Float(2.0));
        range.set_value((2, 1), Data::String(" 42 ".to_string()));
        range.set_value((3, 1), Data::Float(1.0));
        range.set_value((4, 0), Data::String("I".to_string()));
        range.set_value((4, 1), Data::Float(0.0));

        let table = read_worksheet(&range, Path::new("m.xlsx"), "municipio").unwrap();
        assert_eq!(table.columns, vec!["municipio", "percentuale", "population"]);
        // empty key row skipped, duplicate "I" ignored
        assert_eq!(table.len(), 2);

        let first = table.get("I").unwrap();
        assert_eq!(first.number("percentuale"), Some(35.5));
        assert_eq!(first.number("population"), Some(80000.0));

        let second = table.get("2").unwrap();
        assert_eq!(second.number("percentuale"), Some(42.0));
        assert!(second.fields.get("population").is_none());
    }

    #[test]
    fn test_worksheet_missing_key_column() {
        let mut range = Range::new((0, 0), (1, 0));
        range.set_value((0, 0), Data::String("id".to_string()));
        let err = read_worksheet(&range, Path::new("m.xlsx"), "municipio").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_statistics_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_statistics(&dir.path().join("absent.xlsx"), "id").unwrap_err();
        assert!(err.is_unreadable());

        let broken = dir.path().join("broken.xlsx");
        fs::write(&broken, b"this is not a zip archive").unwrap();
        let err = load_statistics(&broken, "id").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));

        let other = dir.path().join("table.parquet");
        fs::write(&other, b"").unwrap();
        let err = load_statistics(&other, "id").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));

        let csv = dir.path().join("table.CSV");
        fs::write(&csv, "id,value\nA,1\n").unwrap();
        assert_eq!(load_statistics(&csv, "id").unwrap().len(), 1);
    }

    mod shapefiles {
        use super::*;
        use shapefile::dbase::{FieldName, Record, TableWriterBuilder};
        use shapefile::{Point, Polygon, PolygonRing};

        fn table_builder() -> TableWriterBuilder {
            TableWriterBuilder::new()
                .add_character_field(FieldName::try_from("municipio").unwrap(), 20)
                .add_numeric_field(FieldName::try_from("code").unwrap(), 10, 0)
        }

        fn record(name: &str, code: f64) -> Record {
            let mut record = Record::default();
            record.insert(
                "municipio".to_string(),
                FieldValue::Character(Some(name.to_string())),
            );
            record.insert("code".to_string(), FieldValue::Numeric(Some(code)));
            record
        }

        fn square(x: f64) -> Polygon {
            Polygon::new(PolygonRing::Outer(vec![
                Point::new(x, 0.0),
                Point::new(x, 1.0),
                Point::new(x + 1.0, 1.0),
                Point::new(x + 1.0, 0.0),
                Point::new(x, 0.0),
            ]))
        }

        fn write_polygons(path: &Path) {
            let mut writer = shapefile::Writer::from_path(path, table_builder()).unwrap();
            writer
                .write_shape_and_record(&square(0.0), &record("I", 7.0))
                .unwrap();
            writer
                .write_shape_and_record(&square(2.0), &record("II", 8.0))
                .unwrap();
        }

        #[test]
        fn test_attributes_become_properties() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("municipi.shp");
            write_polygons(&path);

            let collection = load_boundaries(&path, "municipio").unwrap();
            let keys: Vec<&str> = collection.areas.iter().map(|a| a.key.as_str()).collect();
            assert_eq!(keys, vec!["I", "II"]);

            let props = &collection.areas[0].properties;
            assert_eq!(props.get("municipio"), Some(&Value::String("I".into())));
            assert_eq!(props.get("code").and_then(Value::as_f64), Some(7.0));
            assert_eq!(collection.areas[0].geometry.0.len(), 1);
        }

        #[test]
        fn test_numeric_key_is_normalised() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("municipi.shp");
            write_polygons(&path);

            let collection = load_boundaries(&path, "code").unwrap();
            let keys: Vec<&str> = collection.areas.iter().map(|a| a.key.as_str()).collect();
            assert_eq!(keys, vec!["7", "8"]);
        }

        #[test]
        fn test_non_polygon_shapes_skipped() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("points.shp");
            {
                let mut writer = shapefile::Writer::from_path(&path, table_builder()).unwrap();
                writer
                    .write_shape_and_record(&Point::new(0.5, 0.5), &record("I", 7.0))
                    .unwrap();
            }

            let collection = load_boundaries(&path, "municipio").unwrap();
            assert!(collection.is_empty());
        }

        #[test]
        fn test_load_errors() {
            let dir = tempfile::tempdir().unwrap();

            let err = load_boundaries(&dir.path().join("absent.shp"), "municipio").unwrap_err();
            assert!(err.is_unreadable());

            let garbage = dir.path().join("garbage.shp");
            fs::write(&garbage, vec![0u8; 200]).unwrap();
            fs::write(dir.path().join("garbage.dbf"), vec![0u8; 200]).unwrap();
            let err = load_boundaries(&garbage, "municipio").unwrap_err();
            assert!(matches!(err, LoadError::Malformed { .. }));
        }
    }
}
