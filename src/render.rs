use crate::config::{AppConfig, OutputFormat};
use crate::types::JoinedRecord;
use anyhow::{anyhow, Context, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes the configured map artifact and returns its path. Records without
/// a color are skipped by every format.
pub fn write_artifact(config: &AppConfig, records: &[JoinedRecord]) -> Result<PathBuf> {
    let path = config.output.path.clone();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
    }

    match config.output.format {
        OutputFormat::Html => {
            let html = render_html(config, records)?;
            fs::write(&path, html)
                .with_context(|| format!("Failed to write map HTML: {:?}", path))?;
        }
        OutputFormat::Svg => {
            let svg = render_svg(config, records)?;
            fs::write(&path, svg)
                .with_context(|| format!("Failed to write map SVG: {:?}", path))?;
        }
        OutputFormat::Png => {
            render_png(config, records, &path)?;
        }
    }

    info!(path = %path.display(), "Wrote map artifact");
    Ok(path)
}

// ---------------------------------------------------------------------------
// Interactive HTML (Leaflet)
// ---------------------------------------------------------------------------

const HTML_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Food Access Bivariate Choropleth</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
  html, body, #map { height: 100%; margin: 0; }
  .tract-tooltip {
    background-color: #F0EFEF;
    border: 1px solid black;
    border-radius: 3px;
  }
</style>
</head>
<body>
<div id="map"></div>
__LEGEND__
<script>
  var map = L.map('map').setView([__LAT__, __LON__], __ZOOM__);

  L.tileLayer('https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png', {
    attribution: '&copy; OpenStreetMap contributors &copy; CARTO',
    subdomains: 'abcd',
    maxZoom: 20
  }).addTo(map);

  var tracts = __GEOJSON__;

  var choropleth = L.geoJSON(tracts, {
    style: function (feature) {
      return {
        fillColor: feature.properties.color,
        color: 'black',
        weight: 0.2,
        fillOpacity: 0.7
      };
    },
    onEachFeature: function (feature, layer) {
      var p = feature.properties;
      layer.bindTooltip(
        'Census Tract: ' + p.tract_id +
        '<br>% People of Color: ' + p.percent_poc.toFixed(1) +
        '<br>Limited Access Score: ' + p.access_score.toFixed(1),
        { sticky: false, className: 'tract-tooltip' }
      );
    }
  }).addTo(map);

  L.control.layers(null, { 'Bivariate Choropleth': choropleth }).addTo(map);
</script>
</body>
</html>
"##;

fn render_html(config: &AppConfig, records: &[JoinedRecord]) -> Result<String> {
    let collection = feature_collection(records);
    let data = serde_json::to_string(&collection)
        .context("Failed to serialize joined records as GeoJSON")?;

    Ok(HTML_TEMPLATE
        .replace("__LEGEND__", &legend_html(config))
        .replace("__LAT__", &config.output.map_center[0].to_string())
        .replace("__LON__", &config.output.map_center[1].to_string())
        .replace("__ZOOM__", &config.output.zoom.to_string())
        .replace("__GEOJSON__", &data))
}

/// Serializes the colored records back into a feature collection for the
/// Leaflet overlay. Properties carry the tooltip fields plus the color the
/// style callback reads.
fn feature_collection(records: &[JoinedRecord]) -> geojson::FeatureCollection {
    let features = records
        .iter()
        .filter(|r| r.color.is_some())
        .map(|r| {
            let mut properties = serde_json::Map::new();
            properties.insert("tract_id".to_string(), serde_json::Value::from(r.tract_id.0));
            properties.insert("percent_poc".to_string(), serde_json::Value::from(r.percent_poc));
            properties.insert("access_score".to_string(), serde_json::Value::from(r.access_score));
            if let Some(class) = r.bi_class {
                properties.insert("bi_class".to_string(), serde_json::Value::from(class.code()));
            }
            if let Some(color) = &r.color {
                properties.insert("color".to_string(), serde_json::Value::from(color.clone()));
            }
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&r.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Fixed-position 3x3 legend block. Columns run high-to-low demographic
/// class, rows high-to-low access class, matching the published layout.
fn legend_html(config: &AppConfig) -> String {
    let swatch = |code: &str| -> String {
        let color = config
            .colors
            .get(code)
            .map(String::as_str)
            .unwrap_or("#ffffff");
        format!(r#"<div style="flex: 1; background-color: {};"></div>"#, color)
    };
    let column = |codes: [&str; 3]| -> String {
        format!(
            r#"<div style="flex: 1; display: flex; flex-direction: column;">{}{}{}</div>"#,
            swatch(codes[0]),
            swatch(codes[1]),
            swatch(codes[2])
        )
    };

    format!(
        r#"<div style="
    position: fixed;
    bottom: 50px;
    left: 50px;
    width: 190px;
    height: 150px;
    background-color: white;
    border: 2px solid grey;
    z-index: 9999;
    font-size: 12px;
    ">
    <div style="text-align: center;">Bivariate Legend</div>
    <div style="display: flex; height: 110px;">
        <div style="flex: 1.4; display: flex; flex-direction: column;">
            <div style="flex: 1;">High % POC</div>
            <div style="flex: 1;"></div>
            <div style="flex: 1;">Low % POC</div>
        </div>
        {col_high}{col_mid}{col_low}
        <div style="flex: 1.4; display: flex; flex-direction: column;">
            <div style="flex: 1;">High Access</div>
            <div style="flex: 1;"></div>
            <div style="flex: 1;">Low Access</div>
        </div>
    </div>
</div>"#,
        col_high = column(["33", "32", "31"]),
        col_mid = column(["23", "22", "21"]),
        col_low = column(["13", "12", "11"])
    )
}

// ---------------------------------------------------------------------------
// Static projection shared by the SVG and PNG renderers
// ---------------------------------------------------------------------------

struct Viewport {
    min_x: f64,
    max_y: f64,
    scale: f64,
    width: u32,
    height: u32,
}

fn mercator_y(lat: f64) -> f64 {
    let lat_rad = lat.to_radians();
    (lat_rad.tan() + 1.0 / lat_rad.cos()).ln()
}

fn inverse_mercator_y(y: f64) -> f64 {
    y.sinh().atan().to_degrees()
}

impl Viewport {
    /// Fits the colored records into `width` pixels, Web-Mercator projected,
    /// with a small margin. `None` when there is nothing to render.
    fn fit<'a>(records: impl Iterator<Item = &'a JoinedRecord>, width: u32) -> Option<Viewport> {
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;

        for record in records {
            if let Some(rect) = record.geometry.bounding_rect() {
                min_lon = min_lon.min(rect.min().x);
                max_lon = max_lon.max(rect.max().x);
                min_lat = min_lat.min(rect.min().y);
                max_lat = max_lat.max(rect.max().y);
            }
        }

        if !min_lon.is_finite() || min_lon >= max_lon || min_lat >= max_lat {
            return None;
        }

        let margin_x = (max_lon - min_lon) * 0.02;
        let margin_y = (max_lat - min_lat) * 0.02;
        let min_x = (min_lon - margin_x).to_radians();
        let max_x = (max_lon + margin_x).to_radians();
        let min_y = mercator_y(min_lat - margin_y);
        let max_y = mercator_y(max_lat + margin_y);

        let scale = width as f64 / (max_x - min_x);
        let height = ((max_y - min_y) * scale).ceil() as u32;

        Some(Viewport {
            min_x,
            max_y,
            scale,
            width,
            height: height.max(1),
        })
    }

    fn to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon.to_radians() - self.min_x) * self.scale,
            (self.max_y - mercator_y(lat)) * self.scale,
        )
    }

    fn to_lon_lat(&self, px: f64, py: f64) -> (f64, f64) {
        (
            (self.min_x + px / self.scale).to_degrees(),
            inverse_mercator_y(self.max_y - py / self.scale),
        )
    }
}

/// Legend grid shared by the static renderers: rows run access class 3 down
/// to 1, columns demographic class 1 up to 3.
const LEGEND_GRID: [[&str; 3]; 3] = [
    ["13", "23", "33"],
    ["12", "22", "32"],
    ["11", "21", "31"],
];

// ---------------------------------------------------------------------------
// Static SVG
// ---------------------------------------------------------------------------

fn render_svg(config: &AppConfig, records: &[JoinedRecord]) -> Result<String> {
    let colored: Vec<&JoinedRecord> = records.iter().filter(|r| r.color.is_some()).collect();
    let viewport = Viewport::fit(colored.iter().copied(), config.output.image_width)
        .ok_or_else(|| anyhow!("No colored records to render"))?;

    let mut body = String::new();
    for record in &colored {
        let color = record.color.as_deref().unwrap_or("#ffffff");
        body.push_str(&format!(
            r#"<path d="{}" fill="{}" fill-rule="evenodd" fill-opacity="0.7" stroke="black" stroke-width="0.2"/>"#,
            svg_path(&record.geometry, &viewport),
            color
        ));
        body.push('\n');
    }

    Ok(format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">\n\
         <rect width=\"{w}\" height=\"{h}\" fill=\"white\"/>\n\
         {body}{legend}</svg>\n",
        w = viewport.width,
        h = viewport.height,
        body = body,
        legend = svg_legend(config, viewport.height)
    ))
}

fn svg_path(geometry: &MultiPolygon<f64>, viewport: &Viewport) -> String {
    let mut d = String::new();
    for polygon in &geometry.0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
            for (i, coord) in ring.0.iter().enumerate() {
                let (x, y) = viewport.to_pixel(coord.x, coord.y);
                let command = if i == 0 { 'M' } else { 'L' };
                d.push_str(&format!("{}{:.1} {:.1} ", command, x, y));
            }
            d.push_str("Z ");
        }
    }
    d
}

fn svg_legend(config: &AppConfig, height: u32) -> String {
    let cell = 24.0;
    let x0 = 30.0;
    let y0 = height as f64 - 50.0 - 3.0 * cell;

    let mut out = String::new();
    out.push_str(&format!(
        r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="12">Bivariate Legend</text>"#,
        x0,
        y0 - 10.0
    ));
    out.push('\n');

    for (row, codes) in LEGEND_GRID.iter().enumerate() {
        for (col, code) in codes.iter().enumerate() {
            let color = config
                .colors
                .get(*code)
                .map(String::as_str)
                .unwrap_or("#ffffff");
            out.push_str(&format!(
                r#"<rect x="{:.1}" y="{:.1}" width="{cell}" height="{cell}" fill="{color}" stroke="grey" stroke-width="0.5"/>"#,
                x0 + col as f64 * cell,
                y0 + row as f64 * cell,
            ));
            out.push('\n');
        }
    }

    // Axis labels: demographic share grows to the right, limited access grows upward.
    out.push_str(&format!(
        r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="11">% people of color &#8594;</text>"#,
        x0,
        y0 + 3.0 * cell + 16.0
    ));
    out.push('\n');
    out.push_str(&format!(
        r#"<text x="{x:.1}" y="{y:.1}" font-family="sans-serif" font-size="11" transform="rotate(-90 {x:.1} {y:.1})">limited access &#8594;</text>"#,
        x = x0 - 8.0,
        y = y0 + 3.0 * cell
    ));
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Static PNG
// ---------------------------------------------------------------------------

struct TractShape {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for TractShape {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

fn render_png(config: &AppConfig, records: &[JoinedRecord], path: &Path) -> Result<()> {
    let colored: Vec<(&JoinedRecord, Rgba<u8>)> = records
        .iter()
        .filter_map(|r| r.color.as_deref().map(|c| (r, hex_to_rgba(c))))
        .collect();

    let viewport = Viewport::fit(colored.iter().map(|(r, _)| *r), config.output.image_width)
        .ok_or_else(|| anyhow!("No colored records to render"))?;

    let shapes: Vec<TractShape> = colored
        .iter()
        .enumerate()
        .filter_map(|(index, (record, _))| {
            record.geometry.bounding_rect().map(|rect| TractShape {
                index,
                aabb: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            })
        })
        .collect();
    let tree = RTree::bulk_load(shapes);

    let width = viewport.width as usize;
    let height = viewport.height as usize;
    let mut buffer = vec![255u8; width * height * 4];

    buffer
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(row, pixels)| {
            for col in 0..width {
                let (lon, lat) = viewport.to_lon_lat(col as f64 + 0.5, row as f64 + 0.5);
                let point = Point::new(lon, lat);
                let probe = AABB::from_point([lon, lat]);

                for candidate in tree.locate_in_envelope_intersecting(&probe) {
                    let (record, color) = &colored[candidate.index];
                    if record.geometry.contains(&point) {
                        pixels[col * 4..col * 4 + 4].copy_from_slice(&color.0);
                        break;
                    }
                }
            }
        });

    draw_png_legend(config, &mut buffer, width, height);

    let image = RgbaImage::from_raw(viewport.width, viewport.height, buffer)
        .ok_or_else(|| anyhow!("Image buffer size mismatch"))?;
    image
        .save(path)
        .with_context(|| format!("Failed to write map PNG: {:?}", path))?;
    Ok(())
}

fn draw_png_legend(config: &AppConfig, buffer: &mut [u8], width: usize, height: usize) {
    let cell = 18usize;
    let x0 = 16usize;
    let block = 3 * cell;
    if height < block + 32 || width < block + 32 {
        return;
    }
    let y0 = height - 16 - block;

    let border = Rgba([90u8, 90, 90, 255]);
    for y in (y0 - 1)..=(y0 + block) {
        put_px(buffer, width, x0 - 1, y, border);
        put_px(buffer, width, x0 + block, y, border);
    }
    for x in (x0 - 1)..=(x0 + block) {
        put_px(buffer, width, x, y0 - 1, border);
        put_px(buffer, width, x, y0 + block, border);
    }

    for (row, codes) in LEGEND_GRID.iter().enumerate() {
        for (col, code) in codes.iter().enumerate() {
            let color = config
                .colors
                .get(*code)
                .map(String::as_str)
                .map(hex_to_rgba)
                .unwrap_or(Rgba([255, 255, 255, 255]));
            for dy in 0..cell {
                for dx in 0..cell {
                    put_px(buffer, width, x0 + col * cell + dx, y0 + row * cell + dy, color);
                }
            }
        }
    }
}

fn put_px(buffer: &mut [u8], width: usize, x: usize, y: usize, color: Rgba<u8>) {
    let offset = (y * width + x) * 4;
    if offset + 4 <= buffer.len() {
        buffer[offset..offset + 4].copy_from_slice(&color.0);
    }
}

fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
    let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
    let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0);
    Rgba([r, g, b, 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::types::{BiClass, TractId};
    use geo::{LineString, Polygon};
    use std::env;

    fn record(id: u64, lon: f64, lat: f64, code: (u8, u8), color: &str) -> JoinedRecord {
        let geometry = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![
                (lon, lat),
                (lon + 0.4, lat),
                (lon + 0.4, lat + 0.4),
                (lon, lat + 0.4),
                (lon, lat),
            ]),
            vec![],
        )]);
        JoinedRecord {
            tract_id: TractId(id),
            percent_poc: 45.0,
            access_score: 85.0,
            geometry,
            bi_class: Some(BiClass::new(code.0, code.1)),
            color: Some(color.to_string()),
        }
    }

    fn sample_records() -> Vec<JoinedRecord> {
        vec![
            record(53033000100, -120.0, 47.0, (3, 2), "#8c62aa"),
            record(53033000200, -119.4, 47.0, (1, 1), "#e8e8e8"),
        ]
    }

    #[test]
    fn html_embeds_data_legend_and_controls() {
        let config = AppConfig::default();
        let html = render_html(&config, &sample_records()).unwrap();

        assert!(html.contains("53033000100"));
        assert!(html.contains("#8c62aa"));
        assert!(html.contains("Bivariate Legend"));
        assert!(html.contains("L.control.layers"));
        assert!(html.contains("bindTooltip"));
        assert!(html.contains("[47.5, -120], 6") || html.contains("[47.5, -120]"));
    }

    #[test]
    fn html_skips_uncolored_records() {
        let config = AppConfig::default();
        let mut records = sample_records();
        records[1].color = None;
        records[1].bi_class = None;

        let html = render_html(&config, &records).unwrap();
        assert!(html.contains("53033000100"));
        assert!(!html.contains("53033000200"));
    }

    #[test]
    fn svg_draws_one_path_per_colored_record() {
        let mut config = AppConfig::default();
        config.output.image_width = 200;
        let svg = render_svg(&config, &sample_records()).unwrap();

        assert_eq!(svg.matches("<path ").count(), 2);
        assert!(svg.contains("#8c62aa"));
        assert!(svg.contains("% people of color"));
        assert!(svg.contains("limited access"));
    }

    #[test]
    fn svg_requires_renderable_records() {
        let config = AppConfig::default();
        assert!(render_svg(&config, &[]).is_err());
    }

    #[test]
    fn png_writes_nonempty_file() {
        let mut config = AppConfig::default();
        config.output.image_width = 120;
        config.output.format = OutputFormat::Png;
        config.output.path = env::temp_dir().join("food_access_map_test_render.png");
        let _ = std::fs::remove_file(&config.output.path);

        let path = write_artifact(&config, &sample_records()).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn viewport_round_trips_coordinates() {
        let records = sample_records();
        let viewport = Viewport::fit(records.iter(), 400).unwrap();

        let (px, py) = viewport.to_pixel(-119.8, 47.2);
        let (lon, lat) = viewport.to_lon_lat(px, py);
        assert!((lon - -119.8).abs() < 1e-9);
        assert!((lat - 47.2).abs() < 1e-9);
    }

    #[test]
    fn viewport_rejects_empty_input() {
        assert!(Viewport::fit(std::iter::empty(), 400).is_none());
    }

    #[test]
    fn hex_parsing_matches_channels() {
        assert_eq!(hex_to_rgba("#8c62aa"), Rgba([0x8c, 0x62, 0xaa, 255]));
        assert_eq!(hex_to_rgba("e8e8e8"), Rgba([0xe8, 0xe8, 0xe8, 255]));
    }
}
