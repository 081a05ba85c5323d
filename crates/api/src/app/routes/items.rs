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

use taller_core::ItemId;
use taller_inventory::{ItemPatch, NewItem};

use crate::app::dto::{self, ItemQuery};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_items).post(create_item))
        .route("/:id", get(get_item).put(update_item).delete(delete_item))
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ItemQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (page, filter) = query.split();
    let items = services.run(move |svc| svc.ledger.list_items(&filter)).await?;
    Ok(dto::page(items, page))
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: ItemId = dto::parse_id(&id)?;
    let item = services.run(move |svc| svc.ledger.get_item(id)).await?;
    Ok(dto::ok(item))
}

pub async fn create_item(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewItem>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let item = services.run(move |svc| svc.ledger.create_item(body)).await?;
    Ok(dto::created(item))
}

pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<ItemPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id: ItemId = dto::parse_id(&id)?;
    let Json(patch) = body?;
    let item = services.run(move |svc| svc.ledger.update_item(id, patch)).await?;
    Ok(dto::ok(item))
}

/// Soft delete: the item stays readable, flagged `eliminado`.
pub async fn delete_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: ItemId = dto::parse_id(&id)?;
    let item = services.run(move |svc| svc.ledger.delete_item(id)).await?;
    Ok(dto::ok(item))
}
