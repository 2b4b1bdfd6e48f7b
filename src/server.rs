use crate::config::AppConfig;
use crate::types::JoinedRecord;
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{Point, Rect};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

// Wrapper for RTree indexing
pub struct TractIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for TractIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub records: Vec<JoinedRecord>,
    pub tree: RTree<TractIndex>,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct TractResponse {
    tract_id: u64,
    percent_people_of_color: f64,
    limited_access_score: f64,
    bi_class: Option<String>,
    color: Option<String>,
}

/// Serves the rendered artifact directory plus a point-lookup API:
/// `GET /api/tract?lat=..&lon=..` returns the tract under the point.
pub async fn start_server(config: AppConfig, records: Vec<JoinedRecord>) -> Result<()> {
    info!("Building spatial index for tract lookup");
    let tree_items: Vec<TractIndex> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let rect = record.geometry.bounding_rect().unwrap_or(Rect::new(
                geo::Coord { x: 0.0, y: 0.0 },
                geo::Coord { x: 0.0, y: 0.0 },
            ));
            TractIndex {
                index,
                aabb: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            }
        })
        .collect();
    let tree = RTree::bulk_load(tree_items);

    let state = Arc::new(AppState { records, tree });

    let artifact_dir = config
        .output
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let app = Router::new()
        .route("/api/tract", get(tract_handler))
        .fallback_service(ServeDir::new(artifact_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn tract_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<TractResponse>> {
    let point = Point::new(params.lon, params.lat);
    let envelope = AABB::from_point([params.lon, params.lat]);

    let candidates = state.tree.locate_in_envelope_intersecting(&envelope);

    for candidate in candidates {
        if let Some(record) = state.records.get(candidate.index) {
            if record.geometry.contains(&point) {
                return Json(Some(TractResponse {
                    tract_id: record.tract_id.0,
                    percent_people_of_color: record.percent_poc,
                    limited_access_score: record.access_score,
                    bi_class: record.bi_class.map(|c| c.code()),
                    color: record.color.clone(),
                }));
            }
        }
    }

    Json(None)
}
