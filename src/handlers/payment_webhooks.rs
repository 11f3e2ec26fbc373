use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, warn};

use super::{parse_tag, AppState};
use crate::{errors::ServiceError, services::payments::WebhookRequest};

// POST /api/v1/webhooks/{tag}
/// Receive a payment provider webhook
///
/// Replays, conflicting statuses and unknown tokens are acknowledged with
/// 200 so the provider stops retrying. Rejections carry no detail.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/{tag}",
    params(("tag" = String, Path, description = "Provider tag")),
    request_body(content = String, description = "Provider payload, JSON or form encoded"),
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Webhook rejected", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown provider", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let tag = match parse_tag(&tag) {
        Ok(tag) => tag,
        Err(err) => return err.into_response(),
    };

    let request = WebhookRequest {
        headers,
        query,
        body,
    };
    match state.webhooks.handle_webhook(tag, request).await {
        Ok(result) => {
            debug!(?result, "webhook reconciled");
            (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
        }
        Err(ServiceError::ValidationError(reason) | ServiceError::SerializationError(reason)) => {
            warn!(provider = %tag, %reason, "malformed webhook");
            ServiceError::ValidationError("Malformed webhook payload".into()).into_response()
        }
        Err(err) => err.into_response(),
    }
}
