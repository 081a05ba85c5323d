use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use taller_core::ReservationId;
use taller_inventory::StockKey;

use crate::app::dto::{self, ConsumeRequest, ReservationQuery, ReserveRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// Standalone holds. Holds opened by a sales order answer `conflict` here;
/// they move only through the order's own actions.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_reservations).post(reserve))
        .route("/:id", get(get_reservation))
        .route("/:id/release", post(release_reservation))
        .route("/:id/consume", post(consume_reservation))
        .route("/:id/cancel", post(cancel_reservation))
}

pub async fn list_reservations(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ReservationQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (page, filter) = query.split();
    let holds = services
        .run(move |svc| Ok(svc.ledger.list_reservations(&filter)))
        .await?;
    Ok(dto::page(holds, page))
}

pub async fn get_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: ReservationId = dto::parse_id(&id)?;
    let hold = services.run(move |svc| svc.ledger.get_reservation(id)).await?;
    Ok(dto::ok(hold))
}

pub async fn reserve(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let (item, warehouse, quantity) = body.validate()?;
    let hold = services
        .run(move |svc| svc.ledger.reserve(StockKey::new(item, warehouse), quantity))
        .await?;
    Ok(dto::created(hold))
}

pub async fn release_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: ReservationId = dto::parse_id(&id)?;
    let hold = services
        .run(move |svc| svc.ledger.release_reservation(id))
        .await?;
    Ok(dto::ok(hold))
}

pub async fn cancel_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: ReservationId = dto::parse_id(&id)?;
    let hold = services
        .run(move |svc| svc.ledger.cancel_reservation(id))
        .await?;
    Ok(dto::ok(hold))
}

/// Body is optional; without `quantity` everything outstanding is consumed.
pub async fn consume_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id: ReservationId = dto::parse_id(&id)?;
    let request: ConsumeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ConsumeRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let (hold, movement) = services
        .run(move |svc| svc.ledger.consume_reservation(id, request.quantity))
        .await?;
    Ok(dto::ok(json!({ "reservation": hold, "movement": movement })))
}
