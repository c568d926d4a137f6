use crate::cache::SourceCache;
use crate::config::{AppConfig, LevelConfig, RenderOverrides};
use crate::error::LoadError;
use crate::pipeline::render_level;
use crate::render::{html_escape, MapArtifact, TileStyle, DRAW_MAP_JS, LEAFLET_CSS, LEAFLET_JS, MAP_CSS};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub struct AppState {
    pub config: AppConfig,
    pub cache: Mutex<SourceCache>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(SourceCache::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, SourceCache> {
        // Entries are only inserted whole, so a poisoned cache is still consistent.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn level(&self, name: &str) -> Result<&LevelConfig, ApiError> {
        self.config
            .level(name)
            .ok_or_else(|| ApiError::UnknownLevel(name.to_string()))
    }
}

#[derive(Debug)]
pub enum ApiError {
    UnknownLevel(String),
    Load(LoadError),
}

impl From<LoadError> for ApiError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::UnknownLevel(name) => (StatusCode::NOT_FOUND, format!("unknown level '{}'", name)),
            Self::Load(e) => {
                warn!("Load failure for {:?}: {}", e.path(), e);
                let status = if e.is_unreadable() {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::UNPROCESSABLE_ENTITY
                };
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
pub struct LevelInfo {
    name: String,
    title: String,
}

#[derive(Serialize)]
pub struct DashboardOptions {
    levels: Vec<LevelInfo>,
    tiles: Vec<TileInfo>,
    show_labels: bool,
    default_tiles: &'static str,
}

#[derive(Serialize)]
pub struct TileInfo {
    id: &'static str,
    name: &'static str,
}

#[derive(Deserialize, Default)]
pub struct MapParams {
    level: String,
    labels: Option<bool>,
    tiles: Option<TileStyle>,
    value_field: Option<String>,
    zoom: Option<u8>,
}

impl MapParams {
    fn overrides(&self) -> RenderOverrides {
        RenderOverrides {
            labels: self.labels,
            tiles: self.tiles,
            value_field: self.value_field.clone(),
            zoom: self.zoom,
        }
    }
}

#[derive(Deserialize)]
pub struct LevelParams {
    level: String,
}

#[derive(Deserialize)]
pub struct PointParams {
    level: String,
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct StatsRow {
    key: String,
    label: String,
    value: Option<f64>,
    fields: Map<String, Value>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    value_field: String,
    columns: Vec<String>,
    rows: Vec<StatsRow>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    key: String,
    properties: Map<String, Value>,
    statistics: Option<Map<String, Value>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/levels", get(levels_handler))
        .route("/api/map", get(map_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/query", get(query_handler))
        .route("/api/reload", post(reload_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(config));
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting dashboard on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_handler() -> Html<String> {
    Html(dashboard_html())
}

async fn levels_handler(State(state): State<Arc<AppState>>) -> Json<DashboardOptions> {
    let render = &state.config.render;
    Json(DashboardOptions {
        levels: state
            .config
            .levels
            .iter()
            .map(|l| LevelInfo {
                name: l.name.clone(),
                title: l.title().to_string(),
            })
            .collect(),
        tiles: TileStyle::ALL
            .iter()
            .map(|t| TileInfo {
                id: t.id(),
                name: t.name(),
            })
            .collect(),
        show_labels: render.show_labels,
        default_tiles: render.tiles.id(),
    })
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MapParams>,
) -> Result<Json<MapArtifact>, ApiError> {
    let level = state.level(&params.level)?;
    let opts = state.config.options_for(level).apply(&params.overrides());
    let rendered = render_level(&mut state.cache(), level, &opts)?;
    Ok(Json(rendered.artifact))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LevelParams>,
) -> Result<Json<StatsResponse>, ApiError> {
    let level = state.level(&params.level)?;
    let opts = state.config.options_for(level);
    let rendered = render_level(&mut state.cache(), level, &opts)?;

    let rows = rendered
        .classification
        .areas
        .iter()
        .map(|area| StatsRow {
            key: area.key.clone(),
            label: area.label.clone(),
            value: area.value,
            fields: rendered
                .table
                .get(&area.key)
                .map(|r| r.fields.clone())
                .unwrap_or_default(),
        })
        .collect();

    Ok(Json(StatsResponse {
        value_field: opts.value_field,
        columns: rendered.table.columns.clone(),
        rows,
    }))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointParams>,
) -> Result<Json<Option<QueryResponse>>, ApiError> {
    let level = state.level(&params.level)?;
    let (areas, tree, table) = {
        let mut cache = state.cache();
        let (areas, tree) =
            cache.indexed_boundaries(&level.boundaries, &level.join_column_shape)?;
        let table = match &level.statistics {
            Some(path) => match cache.statistics(path, level.csv_key()) {
                Ok(table) => Some(table),
                Err(e) => {
                    warn!("Statistics for '{}' unavailable: {}", level.name, e);
                    None
                }
            },
            None => None,
        };
        (areas, tree, table)
    };

    let hit = tree.locate(&areas, params.lon, params.lat);

    Ok(Json(hit.map(|area| QueryResponse {
        key: area.key.clone(),
        properties: area.properties.clone(),
        statistics: table
            .as_ref()
            .and_then(|t| t.get(&area.key))
            .map(|r| r.fields.clone()),
    })))
}

/// Drops all cached sources so the next request re-reads them.
async fn reload_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.cache().clear();
    info!("Source cache cleared");
    StatusCode::NO_CONTENT
}

fn dashboard_html() -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <link rel="stylesheet" href="{leaflet_css}">
    <script src="{leaflet_js}"></script>
    <style>
    body {{ margin: 0; font-family: sans-serif; display: flex; height: 100vh; }}
    #sidebar {{ width: 240px; padding: 12px; background: #f0f2f6; box-sizing: border-box; }}
    #sidebar label {{ display: block; margin: 12px 0 4px; }}
    #sidebar select {{ width: 100%; }}
    #main {{ flex: 1; display: flex; }}
    #map {{ flex: 3; }}
    #stats {{ flex: 1; padding: 12px; overflow: auto; font-size: 13px; }}
    #stats table {{ border-collapse: collapse; width: 100%; }}
    #stats td, #stats th {{ border-bottom: 1px solid #ddd; padding: 2px 4px; text-align: left; }}
    .bar {{ background: #fd8d3c; height: 8px; }}
    .error {{ color: #b00020; }}
    {css}
    </style>
</head>
<body>
    <div id="sidebar">
        <h3>Configuration</h3>
        <label for="level">Map</label>
        <select id="level"></select>
        <label><input type="checkbox" id="labels"> Show labels</label>
        <label for="tiles">Map style</label>
        <select id="tiles"></select>
    </div>
    <div id="main">
        <div id="map"></div>
        <div id="stats"></div>
    </div>
    <script>{draw}</script>
    <script>
    var current = null;
    var $ = function (id) {{ return document.getElementById(id); }};

    function showError(message) {{
        $('stats').innerHTML = '<p class="error">' + escapeHtml(message) + '</p>';
    }}

    function barChart(title, rows, values) {{
        var max = Math.max.apply(null, values.filter(function (v) {{ return v !== null; }}).concat([0]));
        var html = '<h4>' + escapeHtml(title) + '</h4><table>';
        rows.forEach(function (r, i) {{
            var v = values[i];
            var width = (v !== null && max > 0) ? Math.round(100 * v / max) : 0;
            html += '<tr><td>' + escapeHtml(r.label) + '</td><td style="width: 60%">' +
                '<div class="bar" style="width: ' + width + '%"></div></td></tr>';
        }});
        return html + '</table>';
    }}

    function renderStats(stats) {{
        var columns = stats.columns.filter(function (c) {{
            return stats.rows.some(function (r) {{ return c in r.fields; }});
        }});
        var html = '<h3>Statistics</h3><table><tr><th>Area</th>' + columns.map(function (c) {{
            return '<th>' + escapeHtml(c) + '</th>';
        }}).join('') + '</tr>';
        stats.rows.forEach(function (r) {{
            html += '<tr><td>' + escapeHtml(r.label) + '</td>' + columns.map(function (c) {{
                return '<td>' + (c in r.fields ? escapeHtml(r.fields[c]) : '') + '</td>';
            }}).join('') + '</tr>';
        }});
        html += '</table>';

        html += barChart(stats.value_field, stats.rows, stats.rows.map(function (r) {{ return r.value; }}));
        columns.forEach(function (c) {{
            if (c === stats.value_field) {{ return; }}
            var values = stats.rows.map(function (r) {{
                return typeof r.fields[c] === 'number' ? r.fields[c] : null;
            }});
            if (values.some(function (v) {{ return v !== null; }})) {{
                html += barChart(c, stats.rows, values);
            }}
        }});
        $('stats').innerHTML = html;
    }}

    function refresh() {{
        var level = $('level').value;
        var query = 'level=' + encodeURIComponent(level) +
            '&labels=' + $('labels').checked + '&tiles=' + $('tiles').value;
        fetch('/api/map?' + query).then(function (resp) {{
            return resp.json().then(function (body) {{
                if (!resp.ok) {{ throw new Error(body.error); }}
                current = drawChoropleth('map', body, current);
            }});
        }}).catch(function (e) {{ showError(e.message); }});
        fetch('/api/stats?level=' + encodeURIComponent(level)).then(function (resp) {{
            return resp.json().then(function (body) {{
                if (resp.ok) {{ renderStats(body); }}
            }});
        }});
    }}

    fetch('/api/levels').then(function (r) {{ return r.json(); }}).then(function (opts) {{
        opts.levels.forEach(function (l) {{ $('level').add(new Option(l.title, l.name)); }});
        opts.tiles.forEach(function (t) {{ $('tiles').add(new Option(t.name, t.id, false, t.id === opts.default_tiles)); }});
        $('labels').checked = opts.show_labels;
        ['level', 'labels', 'tiles'].forEach(function (id) {{ $(id).addEventListener('change', refresh); }});
        refresh();
    }});
    </script>
</body>
</html>
"#,
        title = html_escape("Interactive map dashboard"),
        leaflet_css = LEAFLET_CSS,
        leaflet_js = LEAFLET_JS,
        css = MAP_CSS,
        draw = DRAW_MAP_JS,
    )
}
