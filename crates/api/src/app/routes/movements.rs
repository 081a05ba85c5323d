use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    response::Response,
    routing::get,
    Json, Router,
};

use taller_core::MovementId;
use taller_inventory::MovementRequest;

use crate::app::dto::{self, MovementQuery};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// The movement log is append-only: no PUT or DELETE.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_movements).post(record_movement))
        .route("/:id", get(get_movement))
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<MovementQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (page, filter) = query.split();
    let movements = services
        .run(move |svc| Ok(svc.ledger.list_movements(&filter)))
        .await?;
    Ok(dto::page(movements, page))
}

pub async fn get_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: MovementId = dto::parse_id(&id)?;
    let movement = services.run(move |svc| svc.ledger.get_movement(id)).await?;
    Ok(dto::ok(movement))
}

pub async fn record_movement(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<MovementRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let movement = services
        .run(move |svc| svc.ledger.record_movement(request))
        .await?;
    Ok(dto::created(movement))
}
