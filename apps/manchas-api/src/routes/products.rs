//! Product catalog maintenance.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use manchas_checkout::{NewProduct, UpdateProduct};
use manchas_core::money::{decimal, decimal_opt};
use manchas_core::{Money, ProductCategory, ProductState};

use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route(
            "/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/{id}/state", patch(set_product_state))
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NuevoProducto {
    #[serde(default)]
    nombre: String,
    categoria: ProductCategory,
    #[serde(default)]
    descripcion: Option<String>,
    #[serde(default)]
    estado: Option<ProductState>,
    #[serde(default, with = "decimal")]
    precio_venta: Money,
    #[serde(default)]
    stock: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CambioProducto {
    #[serde(default)]
    nombre: String,
    categoria: ProductCategory,
    #[serde(default)]
    descripcion: Option<String>,
    /// Reprices from the last purchase margin when present.
    #[serde(default, with = "decimal_opt")]
    precio_costo: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct CambioEstado {
    estado: ProductState,
}

#[derive(Debug, Deserialize)]
struct FiltroProductos {
    categoria: Option<ProductCategory>,
    estado: Option<ProductState>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_products(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<FiltroProductos>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(filter) = filter?;
    let products = state
        .engines
        .catalog
        .list_products(filter.categoria, filter.estado)
        .await?;
    Ok(Json(json!({ "ok": true, "total": products.len(), "productos": products })))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let product = state.engines.catalog.get_product(&id).await?;
    Ok(Json(json!({ "ok": true, "producto": product })))
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NuevoProducto>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = payload?;
    let product = state
        .engines
        .catalog
        .create_product(NewProduct {
            name: body.nombre,
            category: body.categoria,
            description: body.descripcion,
            state: body.estado,
            sell_price: body.precio_venta,
            stock: body.stock,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id_producto": product.id, "producto": product })),
    ))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CambioProducto>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let product = state
        .engines
        .catalog
        .update_product(
            &id,
            UpdateProduct {
                name: body.nombre,
                category: body.categoria,
                description: body.descripcion,
                cost_price: body.precio_costo,
            },
        )
        .await?;
    Ok(Json(json!({ "ok": true, "producto": product })))
}

async fn set_product_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CambioEstado>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let product = state
        .engines
        .catalog
        .set_product_state(&id, body.estado)
        .await?;
    Ok(Json(json!({ "ok": true, "producto": product })))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engines.catalog.delete_product(&id).await?;
    Ok(Json(json!({ "ok": true, "msg": format!("Producto {} eliminado", id) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{get, json_request, seed_product, send, test_app};

    #[tokio::test]
    async fn test_create_filter_and_deactivate() {
        let app = test_app().await;
        seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;

        let (status, body) = send(
            &app.router,
            json_request(
                "POST",
                "/products",
                json!({ "nombre": "Pelota Goma", "categoria": "toys", "precioVenta": 12000.5 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["producto"]["state"], "active");
        let id = body["id_producto"].as_str().unwrap().to_string();
        let stored = app.db.products().get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.sell_price.cents(), 1_200_050);
        assert_eq!(stored.stock, 0);

        let (status, body) = send(&app.router, get("/products?categoria=toys")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["productos"][0]["name"], "Pelota Goma");

        let (status, body) = send(
            &app.router,
            json_request("PATCH", &format!("/products/{}/state", id), json!({ "estado": "inactive" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["producto"]["state"], "inactive");

        let (_, body) = send(&app.router, get("/products?estado=active")).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["productos"][0]["name"], "Hueso Carnaza");

        let (status, _) = send(&app.router, get("/products?estado=archivado")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_and_duplicate_name() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        seed_product(&app.db, "Pelota Goma", 800, 2).await;

        let (status, body) = send(
            &app.router,
            json_request(
                "PUT",
                &format!("/products/{}", bone.id),
                json!({ "nombre": "Hueso Carnaza XL", "categoria": "snacks", "precioCosto": 600 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["producto"]["name"], "Hueso Carnaza XL");
        let stored = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap();
        assert_eq!(stored.cost_price, Money::from_major(600));
        // No purchase margin on record.
        assert_eq!(stored.sell_price, Money::from_major(1000));

        let (status, body) = send(
            &app.router,
            json_request(
                "PUT",
                &format!("/products/{}", bone.id),
                json!({ "nombre": "Pelota Goma", "categoria": "snacks" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);

        let (status, _) = send(
            &app.router,
            json_request(
                "PUT",
                "/products/missing",
                json!({ "nombre": "Collar Cuero", "categoria": "accessories" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_sold_product_conflicts() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let spare = seed_product(&app.db, "Pelota Goma", 800, 2).await;

        let sale = json!({
            "customer": {
                "nombreCompleto": "Laura Gómez",
                "telefono": "3004567890",
                "direccion": "Carrera 15 # 80-12",
                "ciudad": "Bogotá"
            },
            "items": [{ "id_producto": bone.id, "cantidad": 1, "precioUnitario": 1000 }]
        });
        let (status, _) = send(&app.router, json_request("POST", "/sales", sale)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app.router,
            json_request("DELETE", &format!("/products/{}", bone.id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["msg"].as_str().unwrap().contains("desactívelo"));

        let (status, _) = send(
            &app.router,
            json_request("DELETE", &format!("/products/{}", spare.id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app.router, get(&format!("/products/{}", spare.id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
