//! Integration tests for the command line interface

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const QUARTIERI: &str = r#"{"type": "FeatureCollection", "features": [
  {"type": "Feature", "properties": {"quartiere": "Navile", "name": "Navile"},
   "geometry": {"type": "Polygon", "coordinates": [[[11.30,44.50],[11.36,44.50],[11.36,44.54],[11.30,44.54],[11.30,44.50]]]}},
  {"type": "Feature", "properties": {"quartiere": "Savena", "name": "Savena"},
   "geometry": {"type": "Polygon", "coordinates": [[[11.36,44.46],[11.40,44.46],[11.40,44.49],[11.36,44.49],[11.36,44.46]]]}},
  {"type": "Feature", "properties": {"quartiere": "Reno"},
   "geometry": {"type": "Polygon", "coordinates": [[[11.26,44.48],[11.30,44.48],[11.30,44.51],[11.26,44.51],[11.26,44.48]]]}}
]}"#;

fn setup(dir: &Path) {
    fs::write(dir.join("quartieri.geojson"), QUARTIERI).unwrap();
    fs::write(
        dir.join("quartieri.csv"),
        "quartiere ,percentuale\nNavile,23.5\nSavena,20\n",
    )
    .unwrap();
    fs::write(
        dir.join("config.toml"),
        r#"
[render]
value_field = "percentuale"
tooltip_fields = ["name", "percentuale"]

[[levels]]
name = "quartieri"
title = "Quartieri"
boundaries = "quartieri.geojson"
statistics = "quartieri.csv"
join_column_shape = "quartiere"
line_color = "blue"

[[levels]]
name = "municipi"
boundaries = "municipi.geojson"
join_column_shape = "municipio"

[output]
dir = "maps"
"#,
    )
    .unwrap();
}

fn cmd() -> Command {
    Command::cargo_bin("choropleth").unwrap()
}

#[test]
fn test_cli_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_generate_single_level() {
    let dir = TempDir::new().unwrap();
    setup(dir.path());

    cmd()
        .arg("generate")
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .args(["--level", "quartieri", "--tiles", "carto-db-positron", "--no-labels"])
        .assert()
        .success();

    let html = fs::read_to_string(dir.path().join("maps/map_quartieri.html")).unwrap();
    assert!(html.contains("<title>Quartieri</title>"));
    assert!(html.contains("basemaps.cartocdn.com"));
    assert!(html.contains("\"legend\":{"));
    assert!(html.contains("\"labels\":null"));
    assert!(!dir.path().join("maps/map_municipi.html").exists());
}

#[test]
fn test_generate_reports_missing_boundaries() {
    let dir = TempDir::new().unwrap();
    setup(dir.path());
    let out = dir.path().join("out");

    cmd()
        .arg("generate")
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not be rendered"));

    // the healthy level is still written, the broken one leaves nothing behind
    assert!(out.join("map_quartieri.html").exists());
    assert!(!out.join("map_municipi.html").exists());
}

#[test]
fn test_generate_unknown_level() {
    let dir = TempDir::new().unwrap();
    setup(dir.path());

    cmd()
        .arg("generate")
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .args(["--level", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown level"));
}

#[test]
fn test_missing_config() {
    let dir = TempDir::new().unwrap();
    cmd()
        .arg("generate")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}
