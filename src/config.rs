use crate::render::TileStyle;
use crate::scale::ColorScheme;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub render: RenderDefaults,
    pub levels: Vec<LevelConfig>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Styling applied to every level unless the level overrides it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderDefaults {
    pub value_field: String,
    pub show_labels: bool,
    pub tiles: TileStyle,
    pub tooltip_fields: Vec<String>,
    pub label_field: String,
    pub zoom: u8,
    pub scheme: ColorScheme,
    pub legend_caption: String,
    pub fallback_fill: String,
    pub fill_opacity: f64,
    pub line_weight: f64,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            value_field: "value".to_string(),
            show_labels: true,
            tiles: TileStyle::OpenStreetMap,
            tooltip_fields: Vec::new(),
            label_field: "name".to_string(),
            zoom: 12,
            scheme: ColorScheme::YlOrRd,
            legend_caption: "Value".to_string(),
            fallback_fill: "#3388ff".to_string(),
            fill_opacity: 0.7,
            line_weight: 1.0,
        }
    }
}

/// One geographic level: a boundary file paired with its statistics.
#[derive(Debug, Deserialize, Clone)]
pub struct LevelConfig {
    pub name: String,
    pub title: Option<String>,
    pub boundaries: PathBuf,
    pub statistics: Option<PathBuf>,
    pub join_column_shape: String,
    pub join_column_csv: Option<String>,
    #[serde(default = "default_line_color")]
    pub line_color: String,
    pub value_field: Option<String>,
    pub tooltip_fields: Option<Vec<String>>,
    pub label_field: Option<String>,
    pub legend_caption: Option<String>,
    pub scheme: Option<ColorScheme>,
}

fn default_line_color() -> String {
    "black".to_string()
}

impl LevelConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Key column of the statistics table; defaults to the boundary key property.
    pub fn csv_key(&self) -> &str {
        self.join_column_csv
            .as_deref()
            .unwrap_or(&self.join_column_shape)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("maps"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8501 }
    }
}

/// Fully resolved options for rendering one level.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub title: String,
    pub value_field: String,
    pub show_labels: bool,
    pub tiles: TileStyle,
    pub tooltip_fields: Vec<String>,
    pub label_field: String,
    pub zoom: u8,
    pub scheme: ColorScheme,
    pub legend_caption: String,
    pub fallback_fill: String,
    pub fill_opacity: f64,
    pub line_weight: f64,
    pub line_color: String,
}

/// Per-invocation choices made on the command line or in the dashboard.
#[derive(Debug, Clone, Default)]
pub struct RenderOverrides {
    pub labels: Option<bool>,
    pub tiles: Option<TileStyle>,
    pub value_field: Option<String>,
    pub zoom: Option<u8>,
}

impl RenderOptions {
    pub fn apply(mut self, overrides: &RenderOverrides) -> Self {
        if let Some(labels) = overrides.labels {
            self.show_labels = labels;
        }
        if let Some(tiles) = overrides.tiles {
            self.tiles = tiles;
        }
        if let Some(field) = overrides.value_field.as_ref().filter(|f| !f.trim().is_empty()) {
            self.value_field = field.trim().to_string();
        }
        if let Some(zoom) = overrides.zoom {
            self.zoom = zoom;
        }
        self
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml(&content)?;
        Ok(config.relative_to(path.parent().unwrap_or_else(|| Path::new("."))))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves relative source paths against the directory holding the config file.
    fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        for level in &mut self.levels {
            level.boundaries = resolve(&level.boundaries);
            level.statistics = level.statistics.as_deref().map(resolve);
        }
        self.output.dir = resolve(&self.output.dir);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            bail!("Configuration declares no [[levels]]");
        }
        let mut seen = HashSet::new();
        for level in &self.levels {
            if !seen.insert(level.name.as_str()) {
                bail!("Duplicate level name: {}", level.name);
            }
            let extension = level
                .boundaries
                .extension()
                .and_then(|e| e.to_str())
                .map(|s| s.to_lowercase())
                .ok_or_else(|| anyhow!("Boundary file of level '{}' has no extension", level.name))?;
            if !matches!(extension.as_str(), "shp" | "json" | "geojson") {
                bail!(
                    "Unsupported boundary format '{}' for level '{}'",
                    extension,
                    level.name
                );
            }
        }
        Ok(())
    }

    pub fn level(&self, name: &str) -> Option<&LevelConfig> {
        self.levels.iter().find(|l| l.name == name)
    }

    pub fn options_for(&self, level: &LevelConfig) -> RenderOptions {
        let d = &self.render;
        let label_field = level
            .label_field
            .clone()
            .unwrap_or_else(|| d.label_field.clone());
        let mut tooltip_fields = level
            .tooltip_fields
            .clone()
            .unwrap_or_else(|| d.tooltip_fields.clone());
        if tooltip_fields.is_empty() {
            tooltip_fields.push(label_field.clone());
        }

        RenderOptions {
            title: level.title().to_string(),
            value_field: level
                .value_field
                .clone()
                .unwrap_or_else(|| d.value_field.clone()),
            show_labels: d.show_labels,
            tiles: d.tiles,
            tooltip_fields,
            label_field,
            zoom: d.zoom,
            scheme: level.scheme.unwrap_or(d.scheme),
            legend_caption: level
                .legend_caption
                .clone()
                .unwrap_or_else(|| d.legend_caption.clone()),
            fallback_fill: d.fallback_fill.clone(),
            fill_opacity: d.fill_opacity,
            line_weight: d.line_weight,
            line_color: level.line_color.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[render]
tooltip_fields = ["name", "value", "population"]
tiles = "carto-db-positron"

[[levels]]
name = "quartieri"
title = "Quartieri"
boundaries = "data/quartieri.geojson"
statistics = "data/quartieri.csv"
join_column_shape = "quartiere"
line_color = "blue"

[[levels]]
name = "municipi"
boundaries = "data/municipi.shp"
join_column_shape = "municipio"
join_column_csv = "MUNICIPIO"
value_field = "percentuale"
legend_caption = "Percentuale"
scheme = "yl-gn"
tooltip_fields = []
"#;

    #[test]
    fn test_parse_and_resolve_options() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.levels.len(), 2);
        assert_eq!(config.server.port, 8501);

        let q = config.level("quartieri").unwrap();
        assert_eq!(q.csv_key(), "quartiere");
        let opts = config.options_for(q);
        assert_eq!(opts.title, "Quartieri");
        assert_eq!(opts.tiles, TileStyle::CartoDbPositron);
        assert_eq!(opts.tooltip_fields, vec!["name", "value", "population"]);
        assert_eq!(opts.line_color, "blue");
        assert_eq!(opts.scheme, ColorScheme::YlOrRd);

        let m = config.level("municipi").unwrap();
        assert_eq!(m.csv_key(), "MUNICIPIO");
        let opts = config.options_for(m);
        assert_eq!(opts.title, "municipi");
        assert_eq!(opts.value_field, "percentuale");
        assert_eq!(opts.scheme, ColorScheme::YlGn);
        assert_eq!(opts.line_color, "black");
        // an empty tooltip list falls back to the label field
        assert_eq!(opts.tooltip_fields, vec!["name"]);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let opts = config
            .options_for(&config.levels[0])
            .apply(&RenderOverrides {
                labels: Some(false),
                tiles: Some(TileStyle::StamenToner),
                value_field: Some("  ".to_string()),
                zoom: Some(10),
            });
        assert!(!opts.show_labels);
        assert_eq!(opts.tiles, TileStyle::StamenToner);
        assert_eq!(opts.value_field, "value");
        assert_eq!(opts.zoom, 10);
    }

    #[test]
    fn test_rejects_duplicate_levels() {
        let toml = r#"
[[levels]]
name = "a"
boundaries = "a.geojson"
join_column_shape = "id"

[[levels]]
name = "a"
boundaries = "b.geojson"
join_column_shape = "id"
"#;
        let err = AppConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("Duplicate level name"));
    }

    #[test]
    fn test_rejects_unknown_boundary_format() {
        let toml = r#"
[[levels]]
name = "a"
boundaries = "a.kml"
join_column_shape = "id"
"#;
        assert!(AppConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_paths_resolved_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(
            config.levels[0].boundaries,
            dir.path().join("data/quartieri.geojson")
        );
        assert_eq!(config.output.dir, dir.path().join("maps"));
    }
}
