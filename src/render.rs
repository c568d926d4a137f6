use crate::config::RenderOptions;
use crate::processing::Classification;
use crate::types::BoundaryCollection;
use anyhow::{anyhow, Context, Result};
use geo::Centroid;
use geojson::{Feature, FeatureCollection, Geometry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::fs;
use std::path::Path;
use tracing::info;

/// Used when there is no geometry to center on (Bologna).
pub const FALLBACK_CENTER: [f64; 2] = [44.4949, 11.3426];

const LEGEND_STOPS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TileStyle {
    OpenStreetMap,
    StamenTerrain,
    StamenToner,
    CartoDbPositron,
}

impl TileStyle {
    pub const ALL: &[TileStyle] = &[
        Self::OpenStreetMap,
        Self::StamenTerrain,
        Self::StamenToner,
        Self::CartoDbPositron,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenStreetMap => "OpenStreetMap",
            Self::StamenTerrain => "Stamen Terrain",
            Self::StamenToner => "Stamen Toner",
            Self::CartoDbPositron => "CartoDB positron",
        }
    }

    /// Identifier used in configuration files and query strings.
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenStreetMap => "open-street-map",
            Self::StamenTerrain => "stamen-terrain",
            Self::StamenToner => "stamen-toner",
            Self::CartoDbPositron => "carto-db-positron",
        }
    }

    pub fn layer(&self) -> TileLayer {
        const OSM: &str = "&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors";
        let (url, attribution) = match self {
            Self::OpenStreetMap => (
                "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
                OSM.to_string(),
            ),
            Self::StamenTerrain => (
                "https://tiles.stadiamaps.com/tiles/stamen_terrain/{z}/{x}/{y}{r}.png".to_string(),
                format!("&copy; Stadia Maps &copy; Stamen Design {}", OSM),
            ),
            Self::StamenToner => (
                "https://tiles.stadiamaps.com/tiles/stamen_toner/{z}/{x}/{y}{r}.png".to_string(),
                format!("&copy; Stadia Maps &copy; Stamen Design {}", OSM),
            ),
            Self::CartoDbPositron => (
                "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png".to_string(),
                format!("{} &copy; <a href=\"https://carto.com/attributions\">CARTO</a>", OSM),
            ),
        };
        TileLayer {
            name: self.name().to_string(),
            url,
            attribution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileLayer {
    pub name: String,
    pub url: String,
    pub attribution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryStyle {
    pub color: String,
    pub weight: f64,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryLayer {
    pub name: String,
    pub style: GeometryStyle,
    pub features: FeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub caption: String,
    pub min: f64,
    pub max: f64,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelMarker {
    pub lat: f64,
    pub lon: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelLayer {
    pub name: String,
    pub markers: Vec<LabelMarker>,
}

/// Everything needed to draw one map. The static page and the dashboard both
/// draw from this structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapArtifact {
    pub title: String,
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub zoom: u8,
    pub tiles: TileLayer,
    pub geometry: GeometryLayer,
    pub legend: Option<Legend>,
    pub labels: Option<LabelLayer>,
    pub layer_control: bool,
    pub notices: Vec<String>,
}

impl MapArtifact {
    pub fn feature_count(&self) -> usize {
        self.geometry.features.features.len()
    }
}

/// Mean of area centroids as `[lat, lon]`, or `None` without usable geometry.
pub fn map_center(boundaries: &BoundaryCollection) -> Option<[f64; 2]> {
    let centroids: Vec<_> = boundaries
        .areas
        .iter()
        .filter_map(|a| a.geometry.centroid())
        .collect();
    if centroids.is_empty() {
        return None;
    }
    let n = centroids.len() as f64;
    let lat = centroids.iter().map(|p| p.y()).sum::<f64>() / n;
    let lon = centroids.iter().map(|p| p.x()).sum::<f64>() / n;
    Some([lat, lon])
}

/// Composes the map layers from a classification of `boundaries`.
pub fn build_map(
    boundaries: &BoundaryCollection,
    classification: &Classification,
    opts: &RenderOptions,
    notices: Vec<String>,
) -> MapArtifact {
    let features = boundaries
        .areas
        .iter()
        .zip(&classification.areas)
        .map(|(area, class)| {
            let mut properties = Map::new();
            properties.insert("key".to_string(), json!(class.key));
            properties.insert("fill".to_string(), json!(class.fill));
            properties.insert("value".to_string(), json!(class.value));
            properties.insert("label".to_string(), json!(class.label));
            properties.insert("tooltip".to_string(), json!(class.tooltip));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&area.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let legend = classification
        .scale
        .filter(|s| !s.is_degenerate())
        .map(|s| Legend {
            caption: opts.legend_caption.clone(),
            min: s.min,
            max: s.max,
            colors: s.legend_stops(LEGEND_STOPS),
        });

    let labels = if opts.show_labels && !boundaries.is_empty() {
        let markers = boundaries
            .areas
            .iter()
            .zip(&classification.areas)
            .filter_map(|(area, class)| {
                area.centroid().map(|c| LabelMarker {
                    lat: c.y(),
                    lon: c.x(),
                    text: class.label.clone(),
                })
            })
            .collect();
        Some(LabelLayer {
            name: "Labels".to_string(),
            markers,
        })
    } else {
        None
    };

    MapArtifact {
        title: opts.title.clone(),
        center: map_center(boundaries).unwrap_or(FALLBACK_CENTER),
        zoom: opts.zoom,
        tiles: opts.tiles.layer(),
        geometry: GeometryLayer {
            name: opts.title.clone(),
            style: GeometryStyle {
                color: opts.line_color.clone(),
                weight: opts.line_weight,
                fill_opacity: opts.fill_opacity,
            },
            features: FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
        },
        legend,
        layer_control: labels.is_some(),
        labels,
        notices,
    }
}

/// JSON for embedding inside a `<script>` element.
pub fn artifact_json(artifact: &MapArtifact) -> Result<String> {
    let json = serde_json::to_string(artifact).context("Failed to serialize map")?;
    Ok(json.replace("</", "<\\/"))
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
pub const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

/// Draws a serialized `MapArtifact` with Leaflet. Shared by the static page
/// and the dashboard.
pub const DRAW_MAP_JS: &str = r#"
function escapeHtml(s) {
  return String(s).replace(/[&<>"']/g, function (c) {
    return {'&': '&amp;', '<': '&lt;', '>': '&gt;', '"': '&quot;', "'": '&#39;'}[c];
  });
}

function drawChoropleth(containerId, artifact, previous) {
  if (previous) { previous.remove(); }
  var map = L.map(containerId).setView(artifact.center, artifact.zoom);
  L.tileLayer(artifact.tiles.url, {attribution: artifact.tiles.attribution, maxZoom: 19}).addTo(map);

  var style = artifact.geometry.style;
  var areas = L.geoJSON(artifact.geometry.features, {
    style: function (feature) {
      return {fillColor: feature.properties.fill, color: style.color,
              weight: style.weight, fillOpacity: style.fill_opacity};
    },
    onEachFeature: function (feature, layer) {
      var rows = feature.properties.tooltip;
      if (rows.length > 0) {
        var html = '<table>' + rows.map(function (r) {
          return '<tr><th>' + escapeHtml(r[0]) + '</th><td>' + escapeHtml(r[1]) + '</td></tr>';
        }).join('') + '</table>';
        layer.bindTooltip(html, {sticky: false});
      }
    }
  }).addTo(map);

  var overlays = {};
  overlays[artifact.geometry.name] = areas;

  if (artifact.labels) {
    var labels = L.layerGroup(artifact.labels.markers.map(function (m) {
      return L.marker([m.lat, m.lon], {icon: L.divIcon({
        className: 'area-label', iconSize: [150, 36], iconAnchor: [75, 18],
        html: '<div>' + escapeHtml(m.text) + '</div>'})});
    })).addTo(map);
    overlays[artifact.labels.name] = labels;
  }

  if (artifact.layer_control) {
    L.control.layers(null, overlays).addTo(map);
  }

  if (artifact.legend) {
    var legend = L.control({position: 'bottomright'});
    legend.onAdd = function () {
      var div = L.DomUtil.create('div', 'legend');
      var lg = artifact.legend;
      div.innerHTML = '<div class="caption">' + escapeHtml(lg.caption) + '</div>' +
        '<div class="bar" style="background: linear-gradient(to right, ' + lg.colors.join(', ') + ')"></div>' +
        '<div class="range"><span>' + lg.min + '</span><span>' + lg.max + '</span></div>';
      return div;
    };
    legend.addTo(map);
  }

  if (artifact.notices.length > 0) {
    var notice = L.control({position: 'topright'});
    notice.onAdd = function () {
      var div = L.DomUtil.create('div', 'notice');
      div.innerHTML = artifact.notices.map(escapeHtml).join('<br>');
      return div;
    };
    notice.addTo(map);
  }
  return map;
}
"#;

pub const MAP_CSS: &str = r#"
.area-label div { font-size: 10pt; color: black; text-align: center; }
.legend { background: white; padding: 6px 8px; border-radius: 4px; min-width: 180px; font: 12px sans-serif; }
.legend .bar { height: 10px; margin: 4px 0; }
.legend .range { display: flex; justify-content: space-between; }
.notice { background: #fff3cd; padding: 6px 8px; border-radius: 4px; font: 12px sans-serif; }
"#;

/// Self-contained Leaflet page for one map.
pub fn to_html(artifact: &MapArtifact) -> Result<String> {
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="{leaflet_css}">
    <script src="{leaflet_js}"></script>
    <style>html, body, #map {{ height: 100%; margin: 0; }}{css}</style>
</head>
<body>
    <div id="map"></div>
    <script>{draw}</script>
    <script>drawChoropleth('map', {data});</script>
</body>
</html>
"#,
        title = html_escape(&artifact.title),
        leaflet_css = LEAFLET_CSS,
        leaflet_js = LEAFLET_JS,
        css = MAP_CSS,
        draw = DRAW_MAP_JS,
        data = artifact_json(artifact)?,
    ))
}

/// Writes the page next to `path` first and renames it into place.
pub fn save_html(artifact: &MapArtifact, path: &Path) -> Result<()> {
    let html = to_html(artifact)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).context("Failed to create output directory")?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Output path has no file name: {:?}", path))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    fs::write(&temp_path, html)
        .with_context(|| format!("Failed to write temporary map {:?}", temp_path))?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to move map into place at {:?}", path));
    }

    info!("Map saved to {:?}", path);
    Ok(())
}
