use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};

use super::{parse_tag, AppState, CallerId};
use crate::{
    entities::payment_process, errors::ServiceError, services::payments::CheckoutIntent,
    ApiResponse,
};

/// Start a payment with a provider
///
/// Opens a checkout session with the provider named in the path and returns
/// the stored payment process. Its `data` carries what the client needs to
/// finish paying (a redirect URL or client secret).
#[utoipa::path(
    post,
    path = "/api/v1/payments/{tag}/checkout",
    params(
        ("tag" = String, Path, description = "Provider tag: stripe, pay-fast, mtn, moya-sar, paypal or mercado-pago"),
        ("x-user-id" = i64, Header, description = "Caller id set by the authentication gateway")
    ),
    request_body = CheckoutIntent,
    responses(
        (status = 201, description = "Checkout session opened", body = ApiResponse<payment_process::Model>,
            headers(("X-Request-Id" = String, description = "Unique request identifier"))
        ),
        (status = 400, description = "Invalid intent or provider disabled", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing caller identity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown provider or target", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(tag): Path<String>,
    Json(intent): Json<CheckoutIntent>,
) -> Result<(StatusCode, Json<ApiResponse<payment_process::Model>>), ServiceError> {
    let tag = parse_tag(&tag)?;
    let process = state
        .checkout
        .process_transaction(user_id, tag, intent)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(process))))
}
