//! Items demo application
//!
//! A small CRUD surface over the profiled [`Engine`]: every statement these
//! handlers issue shows up under the request that issued it.

use crate::engine::{Engine, Statement};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

const ITEMS_TABLE: &str = "items";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Create the items table if it does not exist
pub async fn ensure_schema(engine: &Engine) -> Result<(), crate::engine::EngineError> {
    engine
        .execute(&Statement::text(
            "CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT
            )",
        ))
        .await?;
    Ok(())
}

/// POST /items
pub async fn create_item(
    State(engine): State<Arc<Engine>>,
    Json(payload): Json<ItemPayload>,
) -> Result<(StatusCode, Json<Item>), AppError> {
    let insert = Statement::insert(ITEMS_TABLE)
        .value("name", payload.name.as_str())
        .value("description", payload.description.clone());
    let result = engine.execute(&insert.into()).await?;

    let item = Item {
        id: result.last_insert_rowid(),
        name: payload.name,
        description: payload.description,
    };
    tracing::debug!(item_id = item.id, "Item created");

    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /items
pub async fn list_items(State(engine): State<Arc<Engine>>) -> Result<Json<Vec<Item>>, AppError> {
    let select = Statement::select(ITEMS_TABLE).order_by("id", false);
    let rows = engine.fetch_all(&select.into()).await?;

    Ok(Json(rows.iter().map(item_from_row).collect()))
}

/// PUT /items/{id}
pub async fn update_item(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i64>,
    Json(payload): Json<ItemPayload>,
) -> Result<Json<Item>, AppError> {
    find_item(&engine, id).await?;

    let update = Statement::update(ITEMS_TABLE)
        .set("name", payload.name.as_str())
        .set("description", payload.description.clone())
        .filter("id", id);
    engine.execute(&update.into()).await?;

    Ok(Json(Item {
        id,
        name: payload.name,
        description: payload.description,
    }))
}

/// DELETE /items/{id}
pub async fn delete_item(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    find_item(&engine, id).await?;

    let delete = Statement::delete(ITEMS_TABLE).filter("id", id);
    engine.execute(&delete.into()).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn find_item(engine: &Engine, id: i64) -> Result<Item, AppError> {
    let select = Statement::select(ITEMS_TABLE).filter("id", id).limit(1);
    engine
        .fetch_optional(&select.into())
        .await?
        .as_ref()
        .map(item_from_row)
        .ok_or_else(|| AppError::NotFound(format!("item {}", id)))
}

fn item_from_row(row: &SqliteRow) -> Item {
    Item {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}
