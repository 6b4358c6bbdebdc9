//! # Payment Routes
//!
//! PSE bank transfers through the aggregator and cash codes paid at the
//! counter. The webhook is the only unauthenticated write; it is trusted
//! only after its checksum verifies.
//!
//! ```text
//! POST /pse/initiate ──► pending payment + payment link ──► customer pays
//!                                                              │
//!      POST /webhook ◄─────────── aggregator ◄─────────────────┘
//!  GET /pse/status/{ref} (poll fallback)
//!
//! POST /cash/initiate ──► pending payment + code ──► POST /cash/confirm
//! ```

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use manchas_checkout::{
    BankPaymentRequest, CartItem, CashPaymentRequest, PaymentCustomer, WebhookEvent,
};
use manchas_core::money::decimal;
use manchas_core::{DocumentType, Money, Payment, PaymentMethod, PaymentStatus, PersonType};

use crate::error::{ApiError, ApiResult};
use crate::routes::sales::ItemCarrito;
use crate::{user_id, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pse/banks", get(list_banks))
        .route("/pse/initiate", post(initiate_pse))
        .route("/pse/status/{reference}", get(pse_status))
        .route("/cash/initiate", post(initiate_cash))
        .route("/cash/confirm", post(confirm_cash))
        .route("/cash/status/{code}", get(cash_status))
        .route("/webhook", post(webhook))
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DatosCliente {
    tipo_persona: Option<PersonType>,
    tipo_documento: Option<DocumentType>,
    documento: String,
    #[serde(alias = "nombreCompleto")]
    nombre_completo: String,
    email: String,
    telefono: Option<String>,
    #[serde(alias = "direccion")]
    direccion_entrega: String,
    ciudad: String,
    #[serde(rename = "notasAdicionales")]
    notas_adicionales: Option<String>,
}

impl From<DatosCliente> for PaymentCustomer {
    fn from(c: DatosCliente) -> Self {
        PaymentCustomer {
            full_name: c.nombre_completo,
            email: c.email,
            phone: c.telefono,
            document_type: c.tipo_documento.unwrap_or_default(),
            document_number: c.documento,
            person_type: c.tipo_persona,
            address: c.direccion_entrega,
            city: c.ciudad,
            notes: c.notas_adicionales,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PagoPse {
    #[serde(default)]
    banco_codigo: String,
    #[serde(flatten)]
    cliente: DatosCliente,
    #[serde(default)]
    items: Vec<ItemCarrito>,
}

#[derive(Debug, Deserialize)]
struct PagoEfectivo {
    #[serde(flatten)]
    cliente: DatosCliente,
    #[serde(default)]
    items: Vec<ItemCarrito>,
}

#[derive(Debug, Deserialize)]
struct ConfirmacionEfectivo {
    #[serde(default)]
    codigo: String,
}

/// What the storefront sees of a payment.
#[derive(Debug, Serialize)]
struct ResumenPago {
    referencia: String,
    estado: PaymentStatus,
    metodo_pago: PaymentMethod,
    #[serde(with = "decimal")]
    monto: Money,
    id_venta: Option<String>,
    url_redireccion: Option<String>,
    fecha_creacion: DateTime<Utc>,
}

impl From<Payment> for ResumenPago {
    fn from(p: Payment) -> Self {
        ResumenPago {
            referencia: p.reference,
            estado: p.status,
            metodo_pago: p.method,
            monto: p.amount,
            id_venta: p.sale_id,
            url_redireccion: p.redirect_url,
            fecha_creacion: p.created_at,
        }
    }
}

fn required_user(headers: &HeaderMap) -> ApiResult<String> {
    user_id(headers).ok_or(ApiError::Unauthorized)
}

fn cart(items: Vec<ItemCarrito>) -> Vec<CartItem> {
    items.into_iter().map(CartItem::from).collect()
}

// =============================================================================
// PSE
// =============================================================================

async fn list_banks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let banks = state.engines.payments.list_banks().await?;
    Ok(Json(json!({ "ok": true, "bancos": banks })))
}

async fn initiate_pse(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PagoPse>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let user = required_user(&headers)?;
    let Json(body) = payload?;

    let request = BankPaymentRequest {
        bank_code: body.banco_codigo,
        customer: body.cliente.into(),
        items: cart(body.items),
    };
    let initiated = state
        .engines
        .payments
        .initiate_bank_payment(&user, request)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "referencia": initiated.reference,
        "link_id": initiated.link_id,
        "redirect_url": initiated.redirect_url,
        "monto": ResumenMonto(initiated.amount),
    })))
}

/// Polls the aggregator for a pending PSE payment.
async fn pse_status(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<Json<Value>> {
    let payment = state.engines.payments.poll_status(&reference).await?;
    Ok(Json(json!({ "ok": true, "pago": ResumenPago::from(payment) })))
}

// =============================================================================
// Cash
// =============================================================================

async fn initiate_cash(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PagoEfectivo>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = required_user(&headers)?;
    let Json(body) = payload?;

    let request = CashPaymentRequest {
        customer: body.cliente.into(),
        items: cart(body.items),
    };
    let initiated = state
        .engines
        .payments
        .initiate_cash_payment(&user, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "referencia": initiated.reference,
            "codigo": initiated.code,
            "fecha_expiracion": initiated.expires_at,
            "monto": ResumenMonto(initiated.amount),
        })),
    ))
}

async fn confirm_cash(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfirmacionEfectivo>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let change = state
        .engines
        .payments
        .confirm_cash_payment(&body.codigo)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "id_venta": change.sale.as_ref().map(|s| s.id.clone()),
        "pago": ResumenPago::from(change.payment),
    })))
}

async fn cash_status(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<Value>> {
    let cash = state.engines.payments.cash_status(&code).await?;
    Ok(Json(json!({
        "ok": true,
        "codigo": cash.ticket.code,
        "estado_ticket": cash.ticket.status,
        "fecha_expiracion": cash.ticket.expires_at,
        "fecha_pago": cash.ticket.paid_at,
        "pago": ResumenPago::from(cash.payment),
    })))
}

// =============================================================================
// Webhook
// =============================================================================

/// Aggregator event. Answers 200 once applied (or already applied) so the
/// aggregator stops retrying; any error status makes it retry.
async fn webhook(State(state): State<Arc<AppState>>, body: String) -> ApiResult<Json<Value>> {
    let event: WebhookEvent = serde_json::from_str(&body).map_err(|e| {
        warn!(error = %e, "Malformed webhook payload");
        ApiError::bad_request("Webhook inválido")
    })?;

    let change = state.engines.reconciliation.handle_webhook(&event).await?;
    info!(
        reference = %change.payment.reference,
        status = %change.payment.status,
        applied = change.applied,
        "Webhook processed"
    );

    Ok(Json(json!({ "success": true })))
}

/// Decimal amount in JSON.
struct ResumenMonto(Money);

impl Serialize for ResumenMonto {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        decimal::serialize(&self.0, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        get, json_request, multipart_request, seed_product, send, test_app, TestApp, EVENTS_SECRET,
    };
    use axum::body::Body;
    use axum::http::Request;
    use manchas_core::signature::{compute_checksum, SignedFields};

    fn payer(product_id: &str, quantity: i64) -> Value {
        json!({
            "banco_codigo": "1007",
            "tipo_persona": "natural",
            "tipo_documento": "CC",
            "documento": "1020304050",
            "nombre_completo": "Laura Gómez",
            "email": "laura@example.com",
            "telefono": "3004567890",
            "direccion_entrega": "Carrera 15 # 80-12",
            "ciudad": "Bogotá",
            "items": [{ "id_producto": product_id, "cantidad": quantity, "precioVenta": 1000 }]
        })
    }

    fn webhook_request(reference: &str, amount_in_cents: i64, status: &str, secret: &str) -> Request<Body> {
        let timestamp = 1_718_000_000;
        let checksum = compute_checksum(
            &SignedFields {
                reference,
                transaction_id: "12345-1718000000-99999",
                amount_in_cents,
                status,
                timestamp,
            },
            secret,
        );
        let event = json!({
            "event": "transaction.updated",
            "data": { "transaction": {
                "id": "12345-1718000000-99999",
                "reference": reference,
                "amount_in_cents": amount_in_cents,
                "status": status
            }},
            "timestamp": timestamp,
            "signature": { "checksum": checksum }
        });
        Request::builder()
            .method("POST")
            .uri("/payments/webhook")
            .header("content-type", "application/json")
            .body(Body::from(event.to_string()))
            .unwrap()
    }

    async fn start_pse(app: &TestApp, product_id: &str, quantity: i64) -> String {
        let (status, body) = send(
            &app.router,
            json_request("POST", "/payments/pse/initiate", payer(product_id, quantity)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["referencia"].as_str().unwrap().to_string()
    }

    async fn sale_count(app: &TestApp) -> usize {
        app.db.sales().list(None).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_banks_sorted_by_name() {
        let app = test_app().await;
        let (status, body) = send(&app.router, get("/payments/pse/banks")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["bancos"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["financial_institution_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["BANCOLOMBIA", "DAVIVIENDA"]);
        assert_eq!(body["bancos"][0]["type"], "persona_natural");
    }

    #[tokio::test]
    async fn test_pse_requires_user_and_fields() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;

        let anonymous = Request::builder()
            .method("POST")
            .uri("/payments/pse/initiate")
            .header("content-type", "application/json")
            .body(Body::from(payer(&bone.id, 1).to_string()))
            .unwrap();
        let (status, _) = send(&app.router, anonymous).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app.router,
            json_request("POST", "/payments/pse/initiate", json!({ "items": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["msg"],
            "Missing required fields: banco_codigo, documento, nombreCompleto, email, direccion, ciudad, items"
        );
    }

    #[tokio::test]
    async fn test_webhook_approval_is_idempotent() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let reference = start_pse(&app, &bone.id, 2).await;

        let stock = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 5);

        let (status, _) = send(
            &app.router,
            webhook_request(&reference, 200_000, "APPROVED", "wrong-secret"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(sale_count(&app).await, 0);

        for _ in 0..2 {
            let (status, body) = send(
                &app.router,
                webhook_request(&reference, 200_000, "APPROVED", EVENTS_SECRET),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
        }
        assert_eq!(sale_count(&app).await, 1);

        let stock = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 3);

        let (_, body) = send(&app.router, get(&format!("/payments/pse/status/{}", reference))).await;
        assert_eq!(body["pago"]["estado"], "approved");
        assert_eq!(body["pago"]["monto"], 2000);
        assert!(body["pago"]["id_venta"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_amount_mismatch_rejected() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let reference = start_pse(&app, &bone.id, 1).await;

        let (status, _) = send(
            &app.router,
            webhook_request(&reference, 1, "APPROVED", EVENTS_SECRET),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(sale_count(&app).await, 0);
    }

    #[tokio::test]
    async fn test_pse_poll_keeps_pending_without_transaction() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let reference = start_pse(&app, &bone.id, 1).await;

        let (status, body) = send(&app.router, get(&format!("/payments/pse/status/{}", reference))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pago"]["estado"], "pending");
        assert_eq!(body["pago"]["metodo_pago"], "PSE");

        let (status, _) = send(&app.router, get("/payments/pse/status/MP-0-0")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pse_sale_through_delivery() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let reference = start_pse(&app, &bone.id, 1).await;
        send(
            &app.router,
            webhook_request(&reference, 100_000, "APPROVED", EVENTS_SECRET),
        )
        .await;

        let (_, body) = send(&app.router, get(&format!("/payments/pse/status/{}", reference))).await;
        let sale_id = body["pago"]["id_venta"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app.router,
            json_request("PUT", &format!("/sales/{}/mark-sent", sale_id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app.router,
            multipart_request(
                &format!("/sales/{}/confirm-delivery", sale_id),
                "entrega.JPG",
                b"\xff\xd8\xff\xe0photo",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["venta"]["status"], "received");
        let image = body["venta"]["delivery_image"].as_str().unwrap();
        assert!(image.ends_with(".jpg"));
        assert!(std::path::Path::new(image).exists());
    }

    #[tokio::test]
    async fn test_cash_flow() {
        let app = test_app().await;
        let bone = seed_product(&app.db, "Hueso Carnaza", 1000, 5).await;
        let mut body = payer(&bone.id, 3);
        body.as_object_mut().unwrap().remove("banco_codigo");

        let (status, initiated) =
            send(&app.router, json_request("POST", "/payments/cash/initiate", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(initiated["monto"], 3000);
        let code = initiated["codigo"].as_str().unwrap().to_string();
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let (_, status_body) = send(&app.router, get(&format!("/payments/cash/status/{}", code))).await;
        assert_eq!(status_body["estado_ticket"], "pending");
        assert_eq!(status_body["pago"]["estado"], "pending");

        let (status, confirmed) = send(
            &app.router,
            json_request("POST", "/payments/cash/confirm", json!({ "codigo": code })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(confirmed["pago"]["estado"], "approved");
        assert!(confirmed["id_venta"].is_string());

        let stock = app.db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 2);

        let (status, _) = send(
            &app.router,
            json_request("POST", "/payments/cash/confirm", json!({ "codigo": code })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(sale_count(&app).await, 1);

        let (status, _) = send(
            &app.router,
            json_request("POST", "/payments/cash/confirm", json!({ "codigo": "0000000000" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_webhook() {
        let app = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/payments/webhook")
            .header("content-type", "application/json")
            .body(Body::from("{\"event\":"))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Webhook inválido");
    }
}
