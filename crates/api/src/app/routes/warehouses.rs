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

use taller_core::WarehouseId;
use taller_inventory::{NewWarehouse, WarehousePatch};

use crate::app::dto::{self, PageQuery};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_warehouses).post(create_warehouse))
        .route(
            "/:id",
            get(get_warehouse).put(update_warehouse).delete(delete_warehouse),
        )
}

pub async fn list_warehouses(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(page) = query?;
    let warehouses = services.run(|svc| svc.ledger.list_warehouses()).await?;
    Ok(dto::page(warehouses, page))
}

pub async fn get_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let wh = services.run(move |svc| svc.ledger.get_warehouse(id)).await?;
    Ok(dto::ok(wh))
}

pub async fn create_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewWarehouse>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let wh = services.run(move |svc| svc.ledger.create_warehouse(body)).await?;
    Ok(dto::created(wh))
}

pub async fn update_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<WarehousePatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let Json(patch) = body?;
    let wh = services
        .run(move |svc| svc.ledger.update_warehouse(id, patch))
        .await?;
    Ok(dto::ok(wh))
}

/// Refused while any stock row in the warehouse still holds units.
pub async fn delete_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let wh = services.run(move |svc| svc.ledger.delete_warehouse(id)).await?;
    Ok(dto::ok(wh))
}
