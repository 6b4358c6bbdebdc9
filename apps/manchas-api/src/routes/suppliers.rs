//! Suppliers.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use manchas_checkout::SupplierData;
use manchas_core::DocumentType;

use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_suppliers).post(create_supplier))
        .route(
            "/{id}",
            get(get_supplier).put(update_supplier).delete(delete_supplier),
        )
        .route("/{id}/state", patch(set_supplier_state))
}

#[derive(Debug, Deserialize)]
struct DatosProveedor {
    #[serde(default)]
    nombre: String,
    tipo_documento: DocumentType,
    #[serde(default)]
    numero_documento: String,
    #[serde(default)]
    telefono: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl From<DatosProveedor> for SupplierData {
    fn from(body: DatosProveedor) -> Self {
        SupplierData {
            name: body.nombre,
            document_type: body.tipo_documento,
            document_number: body.numero_documento,
            phone: body.telefono,
            email: body.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EstadoProveedor {
    activo: bool,
}

#[derive(Debug, Deserialize)]
struct FiltroProveedores {
    #[serde(default)]
    activos: bool,
}

async fn list_suppliers(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<FiltroProveedores>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(filter) = filter?;
    let suppliers = state.engines.catalog.list_suppliers(filter.activos).await?;
    Ok(Json(json!({ "ok": true, "proveedores": suppliers })))
}

async fn get_supplier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let supplier = state.engines.catalog.get_supplier(&id).await?;
    Ok(Json(json!({ "ok": true, "proveedor": supplier })))
}

async fn create_supplier(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DatosProveedor>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = payload?;
    let supplier = state.engines.catalog.create_supplier(body.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id_proveedor": supplier.id, "proveedor": supplier })),
    ))
}

async fn update_supplier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<DatosProveedor>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let supplier = state
        .engines
        .catalog
        .update_supplier(&id, body.into())
        .await?;
    Ok(Json(json!({ "ok": true, "proveedor": supplier })))
}

async fn set_supplier_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<EstadoProveedor>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let supplier = state
        .engines
        .catalog
        .set_supplier_active(&id, body.activo)
        .await?;
    Ok(Json(json!({ "ok": true, "proveedor": supplier })))
}

async fn delete_supplier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engines.catalog.delete_supplier(&id).await?;
    Ok(Json(json!({ "ok": true, "msg": format!("Proveedor {} eliminado", id) })))
}
