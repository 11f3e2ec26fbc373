use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    pointer_str, read_json,
    signature::{constant_time_eq, header_parts, hmac_sha256_hex},
    CheckoutRequest, CheckoutSession, PaymentGateway, ProviderCredentials, WebhookNotification,
    WebhookRequest,
};
use crate::{entities::PaymentTag, errors::ServiceError};

const API_BASE: &str = "https://api.mercadopago.com";

/// MercadoPago Checkout Pro preferences.
///
/// Payload settings: `access_token`, `webhook_secret`.
#[derive(Clone)]
pub struct MercadoPagoGateway {
    http: reqwest::Client,
}

impl MercadoPagoGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

/// Checks the `x-signature` header against the notification manifest.
fn verify_signature(
    secret: &str,
    header: &str,
    data_id: &str,
    request_id: &str,
) -> Result<(), ServiceError> {
    let mut ts = None;
    let mut v1 = None;
    for (key, value) in header_parts(header) {
        match key {
            "ts" => ts = Some(value),
            "v1" => v1 = Some(value),
            _ => {}
        }
    }
    let (ts, v1) = ts.zip(v1).ok_or_else(|| {
        ServiceError::WebhookRejected("mercado pago signature header is incomplete".into())
    })?;

    let manifest = format!(
        "id:{};request-id:{};ts:{};",
        data_id.to_lowercase(),
        request_id,
        ts
    );
    if constant_time_eq(v1, &hmac_sha256_hex(secret, &manifest)) {
        Ok(())
    } else {
        Err(ServiceError::WebhookRejected("mercado pago signature mismatch".into()))
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn tag(&self) -> PaymentTag {
        PaymentTag::MercadoPago
    }

    #[instrument(skip(self, credentials, request), fields(payable = %request.payable))]
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let access_token = credentials.require(self.tag(), "access_token")?;
        let base = credentials.base_url(API_BASE, API_BASE);
        let reference = Uuid::new_v4().to_string();
        let unit_price = request.amount.to_f64().ok_or_else(|| {
            ServiceError::ValidationError(format!("amount {} is out of range", request.amount))
        })?;

        let response = self
            .http
            .post(format!("{}/checkout/preferences", base))
            .bearer_auth(access_token)
            .json(&json!({
                "items": [{
                    "title": request.description,
                    "quantity": 1,
                    "currency_id": request.currency,
                    "unit_price": unit_price,
                }],
                "payer": {
                    "name": request.payer.first_name,
                    "surname": request.payer.last_name,
                    "email": request.payer.email,
                },
                "external_reference": reference,
                "notification_url": request.callback_url,
                "back_urls": {
                    "success": request.success_url,
                    "failure": request.cancel_url,
                    "pending": request.success_url,
                },
                "auto_return": "approved",
            }))
            .send()
            .await?;
        let preference = read_json(self.tag(), response).await?;

        let url_key = if credentials.sandbox {
            "sandbox_init_point"
        } else {
            "init_point"
        };
        Ok(CheckoutSession {
            process_id: reference,
            data: json!({
                "preference_id": preference.get("id"),
                "url": preference.get(url_key).or_else(|| preference.get("init_point")),
            }),
        })
    }

    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError> {
        let secret = credentials.webhook_secret(self.tag(), "webhook_secret")?;
        let body = request.json()?;

        let data_id = request
            .query
            .get("data.id")
            .cloned()
            .or_else(|| pointer_str(&body, "/data/id"))
            .ok_or_else(|| ServiceError::ValidationError("mercado pago notification has no data.id".into()))?;
        let header = request
            .header("x-signature")
            .ok_or_else(|| ServiceError::WebhookRejected("missing x-signature header".into()))?;
        let request_id = request.header("x-request-id").unwrap_or_default();
        verify_signature(secret, header, &data_id, request_id)?;

        let kind = request
            .query
            .get("type")
            .cloned()
            .or_else(|| pointer_str(&body, "/type"));
        if kind.as_deref().is_some_and(|kind| kind != "payment") {
            debug!(?kind, "ignoring non-payment notification");
            return Ok(None);
        }

        let access_token = credentials.webhook_secret(self.tag(), "access_token")?;
        let base = credentials.base_url(API_BASE, API_BASE);
        let response = self
            .http
            .get(format!("{}/v1/payments/{}", base, data_id))
            .bearer_auth(access_token)
            .send()
            .await?;
        let payment = read_json(self.tag(), response).await?;

        let token = pointer_str(&payment, "/external_reference");
        let status = pointer_str(&payment, "/status");
        Ok(token
            .zip(status)
            .map(|(token, status)| WebhookNotification { token, status }))
    }
}
