use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Path, Query},
    response::Response,
    routing::get,
    Router,
};

use taller_core::{ItemId, WarehouseId};
use taller_inventory::StockKey;

use crate::app::dto::{self, StockQuery};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_stock))
        .route("/audit", get(audit_stock))
        .route("/:item/:warehouse", get(get_stock))
}

pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<StockQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (page, filter) = query.split();
    let rows = services.run(move |svc| svc.ledger.list_stock(&filter)).await?;
    Ok(dto::page(rows, page))
}

/// A row that was never touched reads as zero.
pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path((item, warehouse)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let key = StockKey::new(
        dto::parse_id::<ItemId>(&item)?,
        dto::parse_id::<WarehouseId>(&warehouse)?,
    );
    let row = services.run(move |svc| svc.ledger.get_stock(key)).await?;
    Ok(dto::ok(row))
}

/// Rows whose quantity disagrees with a replay of the movement log.
pub async fn audit_stock(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Response, ApiError> {
    let mismatches = services.run(|svc| Ok(svc.ledger.audit())).await?;
    Ok(dto::ok(mismatches))
}
