//! Payment HTTP surface under /api/v1/payments
//!
//! Request decoding and edge authentication live upstream; these handlers
//! translate between the wire and the payment service.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::middleware::error::{app_error_response, get_request_id_from_headers, ErrorResponse};
use crate::payments::types::{InitiatePaymentRequest, PaymentResponse};
use crate::services::payment_service::{ClientInfo, PaymentService};

#[derive(Clone)]
pub struct PaymentApiState {
    pub service: Arc<PaymentService>,
}

pub fn routes(state: PaymentApiState) -> Router {
    Router::new()
        .route("/api/v1/payments/initiate", post(initiate_payment))
        .route("/api/v1/payments/status/{id}", get(get_payment_status))
        .with_state(state)
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string()),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
    }
}

/// POST /api/v1/payments/initiate
///
/// Accepted (202) for both fresh and duplicate requests; the body carries
/// the authoritative transaction either way.
async fn initiate_payment(
    State(state): State<PaymentApiState>,
    headers: HeaderMap,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), (StatusCode, Json<ErrorResponse>)> {
    let request_id = get_request_id_from_headers(&headers);
    let client = client_info(&headers);

    state
        .service
        .initiate_payment(payload, client)
        .await
        .map(|response| (StatusCode::ACCEPTED, Json(response)))
        .map_err(|e| app_error_response(e, request_id))
}

/// GET /api/v1/payments/status/{id}
///
/// `{id}` is tried as a transaction id first, then as a reference id.
async fn get_payment_status(
    State(state): State<PaymentApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PaymentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request_id = get_request_id_from_headers(&headers);

    state
        .service
        .get_payment_status(&id)
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}
