//! Supplier purchases.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use manchas_checkout::{CheckoutError, NewPurchase, NewPurchaseLine, UpdatePurchase};
use manchas_core::money::{decimal, decimal_opt};
use manchas_core::pricing::percent_to_bps;
use manchas_core::{Money, PurchaseStatus};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_purchase).get(list_purchases))
        .route("/{id}", get(get_purchase).put(update_purchase))
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Deserialize)]
struct DetalleCompra {
    #[serde(default)]
    id_producto: String,
    #[serde(default)]
    cantidad: i64,
    #[serde(with = "decimal")]
    precio_costo_unitario: Money,
    /// Percentage, `20`, `12.5` or `"12.5"`.
    #[serde(default)]
    margen_aplicado: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NuevaCompra {
    #[serde(default)]
    id_proveedor: String,
    #[serde(default)]
    numero_referencia: Option<String>,
    #[serde(default)]
    fecha_compra: Option<String>,
    #[serde(default)]
    detalles: Vec<DetalleCompra>,
}

#[derive(Debug, Deserialize)]
struct CambioCompra {
    #[serde(default)]
    id_proveedor: String,
    #[serde(default)]
    numero_referencia: Option<String>,
    estado_compra: PurchaseStatus,
    #[serde(default, with = "decimal_opt")]
    monto_pagado: Option<Money>,
}

/// Percentage to basis points, parsed from the number's decimal text.
fn margin_bps(raw: &Value) -> ApiResult<i64> {
    let text = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(ApiError::bad_request(format!(
                "margen_aplicado inválido: {}",
                other
            )))
        }
    };
    percent_to_bps(&text).map_err(|e| CheckoutError::from(e).into())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates.
fn parse_purchase_date(raw: &str) -> ApiResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::bad_request(format!("fecha_compra inválida: {}", raw)))
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_purchase(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NuevaCompra>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = payload?;

    let purchase_date = body
        .fecha_compra
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(parse_purchase_date)
        .transpose()?;

    let mut lines = Vec::with_capacity(body.detalles.len());
    for d in body.detalles {
        lines.push(NewPurchaseLine {
            margin_bps: d.margen_aplicado.as_ref().map(margin_bps).transpose()?,
            product_id: d.id_producto,
            quantity: d.cantidad,
            unit_cost: d.precio_costo_unitario,
        });
    }

    let request = NewPurchase {
        supplier_id: body.id_proveedor,
        reference: body.numero_referencia,
        purchase_date,
        lines,
    };

    let detail = state.engines.purchases.create_purchase(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id_compra": detail.purchase.id, "compra": detail })),
    ))
}

async fn list_purchases(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let purchases = state.engines.purchases.list_purchases().await?;
    Ok(Json(json!({ "ok": true, "compras": purchases })))
}

async fn get_purchase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let purchase = state.engines.purchases.get_purchase(&id).await?;
    Ok(Json(json!({ "ok": true, "compra": purchase })))
}

async fn update_purchase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CambioCompra>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let update = UpdatePurchase {
        supplier_id: body.id_proveedor,
        reference: body.numero_referencia,
        status: body.estado_compra,
        amount_paid: body.monto_pagado,
    };

    let purchase = state.engines.purchases.update_purchase(&id, update).await?;
    Ok(Json(json!({ "ok": true, "compra": purchase })))
}
