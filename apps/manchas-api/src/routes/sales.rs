//! Sales: direct checkout, listing and the fulfilment state machine.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use manchas_checkout::{CartItem, SaleCustomer};
use manchas_core::money::decimal;
use manchas_core::{Money, SaleStatus};

use crate::error::{ApiError, ApiResult};
use crate::{user_id, AppState};

/// Largest accepted delivery photo.
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_sale).get(list_sales))
        .route("/{id}", get(get_sale))
        .route("/{id}/mark-sent", put(mark_sent))
        .route(
            "/{id}/confirm-delivery",
            post(confirm_delivery).layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + 64 * 1024)),
        )
        .route("/{id}/cancel", put(cancel_sale))
}

// =============================================================================
// Payloads
// =============================================================================

/// Storefront cart line.
#[derive(Debug, Deserialize)]
pub struct ItemCarrito {
    #[serde(default)]
    pub id_producto: String,
    #[serde(default)]
    pub cantidad: i64,
    #[serde(rename = "precioUnitario", alias = "precioVenta", with = "decimal")]
    pub precio_unitario: Money,
}

impl From<ItemCarrito> for CartItem {
    fn from(item: ItemCarrito) -> Self {
        CartItem {
            product_id: item.id_producto,
            quantity: item.cantidad,
            unit_price: item.precio_unitario,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ClienteVenta {
    nombre_completo: String,
    telefono: String,
    direccion: String,
    ciudad: String,
    notas_adicionales: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NuevaVenta {
    #[serde(alias = "cliente")]
    customer: ClienteVenta,
    #[serde(default)]
    items: Vec<ItemCarrito>,
}

#[derive(Debug, Serialize)]
struct VentaCreada {
    ok: bool,
    id_venta: String,
    #[serde(with = "decimal")]
    total: Money,
}

#[derive(Debug, Deserialize)]
struct FiltroVentas {
    estado: Option<SaleStatus>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_sale(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NuevaVenta>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<VentaCreada>)> {
    let Json(body) = payload?;
    let customer = SaleCustomer {
        name: body.customer.nombre_completo,
        phone: body.customer.telefono,
        address: body.customer.direccion,
        city: body.customer.ciudad,
        notes: body.customer.notas_adicionales,
    };
    let items: Vec<CartItem> = body.items.into_iter().map(CartItem::from).collect();

    let user = user_id(&headers);
    let sale = state
        .engines
        .sales
        .create_sale(user.as_deref(), customer, &items)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(VentaCreada {
            ok: true,
            id_venta: sale.id,
            total: sale.total,
        }),
    ))
}

async fn list_sales(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<FiltroVentas>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(filter) = filter?;
    let sales = state.engines.sales.list_sales(filter.estado).await?;
    Ok(Json(json!({ "ok": true, "ventas": sales })))
}

async fn get_sale(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let sale = state.engines.sales.get_sale(&id).await?;
    Ok(Json(json!({ "ok": true, "venta": sale })))
}

async fn mark_sent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let sale = state.engines.sales.mark_sent(&id).await?;
    Ok(Json(json!({ "ok": true, "venta": sale })))
}

/// Stores the `image` field under `<uploads>/deliveries` and closes the sale.
async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Solicitud multipart inválida: {}", e)))?
    {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Error leyendo la imagen: {}", e)))?;
            upload = Some((filename, data.to_vec()));
            break;
        }
    }

    let (filename, data) = upload
        .filter(|(_, data)| !data.is_empty())
        .ok_or_else(|| ApiError::bad_request("Se requiere una imagen de confirmación de entrega"))?;
    if data.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::bad_request("La imagen supera el tamaño máximo de 10MB"));
    }

    let ext = FsPath::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .filter(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "Formato de imagen no soportado. Formatos permitidos: {}",
                IMAGE_EXTENSIONS.join(", ")
            ))
        })?;

    let dir = state.uploads_dir.join("deliveries");
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), ext));
    tokio::fs::write(&path, &data).await?;

    let stored = path.to_string_lossy().to_string();
    match state.engines.sales.confirm_delivery(&id, &stored).await {
        Ok(sale) => {
            info!(sale_id = %id, size = data.len(), "Delivery photo stored");
            Ok(Json(json!({ "ok": true, "venta": sale })))
        }
        Err(e) => {
            if let Err(io) = tokio::fs::remove_file(&path).await {
                warn!(path = %stored, error = %io, "Failed to remove rejected delivery photo");
            }
            Err(e.into())
        }
    }
}

async fn cancel_sale(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let sale = state.engines.sales.cancel_sale(&id).await?;
    Ok(Json(json!({ "ok": true, "venta": sale })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{get, json_request, multipart_request, seed_product, send, test_app};

    fn sale_body(product_id: &str, quantity: i64, price: i64) -> Value {
        json!({
            "customer": {
                "nombreCompleto": "Laura Gómez",
                "telefono": "3004567890",
                "direccion": "Carrera 15 # 80-12",
                "ciudad": "Bogotá"
            },
            "items": [{ "id_producto": product_id, "cantidad": quantity, "precioUnitario": price }]
        })
    }

    #[tokio::test]
    async fn test_create_sale_then_reject_oversell() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;

        let (status, body) =
            send(&app.router, json_request("POST", "/sales", sale_body(&bone.id, 3, 1000))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["ok"], true);
        assert_eq!(body["total"], 3000);
        let sale_id = body["id_venta"].as_str().unwrap().to_string();

        let (status, body) =
            send(&app.router, json_request("POST", "/sales", sale_body(&bone.id, 3, 1000))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(body["msg"].as_str().unwrap().contains("Stock insuficiente"));

        let stock = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 2);

        let (status, body) = send(&app.router, get(&format!("/sales/{}", sale_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["venta"]["status"], "completed");
        assert_eq!(body["venta"]["lines"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_product_is_rejected() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        app.db
            .products()
            .set_state(&bone.id, manchas_core::ProductState::Inactive)
            .await
            .unwrap();

        let (status, body) =
            send(&app.router, json_request("POST", "/sales", sale_body(&bone.id, 1, 1000))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert_eq!(body["msg"], "El producto Hueso Carnaza no está activo");

        let stock = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 5);
    }

    #[tokio::test]
    async fn test_missing_customer_fields() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let mut body = sale_body(&bone.id, 1, 1000);
        body["customer"]["direccion"] = json!("");
        body["customer"]["ciudad"] = json!(" ");

        let (status, body) = send(&app.router, json_request("POST", "/sales", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Missing required fields: direccion, ciudad");
    }

    #[tokio::test]
    async fn test_list_filter_and_lifecycle() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let (_, created) =
            send(&app.router, json_request("POST", "/sales", sale_body(&bone.id, 2, 1000))).await;
        let id = created["id_venta"].as_str().unwrap().to_string();

        let (status, body) =
            send(&app.router, json_request("PUT", &format!("/sales/{}/mark-sent", id), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["venta"]["status"], "sent");

        let (_, body) = send(&app.router, get("/sales?estado=sent")).await;
        assert_eq!(body["ventas"].as_array().unwrap().len(), 1);
        let (_, body) = send(&app.router, get("/sales?estado=completed")).await;
        assert!(body["ventas"].as_array().unwrap().is_empty());

        let (status, body) =
            send(&app.router, json_request("PUT", &format!("/sales/{}/cancel", id), json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);

        let (status, _) = send(&app.router, get("/sales?estado=shipped")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let (_, created) =
            send(&app.router, json_request("POST", "/sales", sale_body(&bone.id, 4, 1000))).await;
        let id = created["id_venta"].as_str().unwrap();

        let (status, body) =
            send(&app.router, json_request("PUT", &format!("/sales/{}/cancel", id), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["venta"]["status"], "cancelled");

        let stock = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 5);
    }

    #[tokio::test]
    async fn test_confirm_delivery_rejects_direct_sale_and_discards_photo() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let (_, created) =
            send(&app.router, json_request("POST", "/sales", sale_body(&bone.id, 1, 1000))).await;
        let id = created["id_venta"].as_str().unwrap();
        send(&app.router, json_request("PUT", &format!("/sales/{}/mark-sent", id), json!({}))).await;

        let uri = format!("/sales/{}/confirm-delivery", id);
        let (status, _) = send(&app.router, multipart_request(&uri, "entrega.jpg", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app.router, multipart_request(&uri, "entrega.gif", b"GIF89a")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send(&app.router, multipart_request(&uri, "entrega.jpg", b"\xff\xd8\xff\xe0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["msg"].as_str().unwrap().contains("PSE"));

        let leftovers = std::fs::read_dir(app.uploads.path().join("deliveries")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_unknown_sale() {
        let app = test_app().await;
        let (status, body) = send(&app.router, get("/sales/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }
}
