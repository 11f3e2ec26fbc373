use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use super::{
    pointer_str, read_json, CheckoutRequest, CheckoutSession, PaymentGateway,
    ProviderCredentials, WebhookNotification, WebhookRequest,
};
use crate::{entities::PaymentTag, errors::ServiceError};

const API_BASE: &str = "https://api-m.paypal.com";
const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";

/// Transmission headers PayPal signs its webhooks with, paired with the
/// field name the verification API expects.
const TRANSMISSION_HEADERS: [(&str, &str); 5] = [
    ("paypal-auth-algo", "auth_algo"),
    ("paypal-cert-url", "cert_url"),
    ("paypal-transmission-id", "transmission_id"),
    ("paypal-transmission-sig", "transmission_sig"),
    ("paypal-transmission-time", "transmission_time"),
];

const ORDER_APPROVED: &str = "CHECKOUT.ORDER.APPROVED";

/// PayPal Orders v2.
///
/// Payload settings: `client_id`, `client_secret`, `webhook_id`.
#[derive(Clone)]
pub struct PaypalGateway {
    http: reqwest::Client,
}

impl PaypalGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn access_token(
        &self,
        base: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String, ServiceError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", base))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body = read_json(self.tag(), response).await?;
        pointer_str(&body, "/access_token")
            .ok_or_else(|| ServiceError::ExternalServiceError("paypal returned no access token".into()))
    }

    /// Captures an approved order. The request id makes retried deliveries
    /// replay the first capture instead of charging again.
    #[instrument(skip(self, base, access))]
    async fn capture(&self, base: &str, access: &str, order_id: &str) -> Result<String, ServiceError> {
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders/{}/capture", base, order_id))
            .bearer_auth(access)
            .header("PayPal-Request-Id", format!("capture-{}", order_id))
            .json(&json!({}))
            .send()
            .await?;
        let order = read_json(self.tag(), response).await?;
        capture_status(&order)
            .ok_or_else(|| ServiceError::ExternalServiceError("paypal capture returned no status".into()))
    }
}

/// Status reported by an order capture: the capture's own status when
/// present, else the order's.
fn capture_status(order: &Value) -> Option<String> {
    pointer_str(order, "/purchase_units/0/payments/captures/0/status")
        .or_else(|| pointer_str(order, "/status"))
}

/// The link the buyer follows to approve the order.
fn approve_link(order: &Value) -> Option<String> {
    order
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| matches!(link.get("rel").and_then(Value::as_str), Some("approve" | "payer-action")))
        .and_then(|link| pointer_str(link, "/href"))
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn tag(&self) -> PaymentTag {
        PaymentTag::Paypal
    }

    #[instrument(skip(self, credentials, request), fields(payable = %request.payable))]
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let client_id = credentials.require(self.tag(), "client_id")?;
        let client_secret = credentials.require(self.tag(), "client_secret")?;
        let base = credentials.base_url(API_BASE, SANDBOX_API_BASE);

        let token = self.access_token(&base, client_id, client_secret).await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", base))
            .bearer_auth(token)
            .json(&json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": request.payable.to_string(),
                    "description": request.description,
                    "amount": {
                        "currency_code": request.currency,
                        "value": format!("{:.2}", request.amount),
                    },
                }],
                "application_context": {
                    "return_url": request.success_url,
                    "cancel_url": request.cancel_url,
                },
            }))
            .send()
            .await?;
        let order = read_json(self.tag(), response).await?;

        let order_id = pointer_str(&order, "/id")
            .ok_or_else(|| ServiceError::ExternalServiceError("paypal returned no order id".into()))?;

        Ok(CheckoutSession {
            process_id: order_id,
            data: json!({ "url": approve_link(&order) }),
        })
    }

    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError> {
        let webhook_id = credentials.webhook_secret(self.tag(), "webhook_id")?;
        let client_id = credentials.webhook_secret(self.tag(), "client_id")?;
        let client_secret = credentials.webhook_secret(self.tag(), "client_secret")?;
        let event = request.json()?;

        let mut verification = serde_json::Map::new();
        for (header, field) in TRANSMISSION_HEADERS {
            let value = request.header(header).ok_or_else(|| {
                ServiceError::WebhookRejected(format!("missing {} header", header))
            })?;
            verification.insert(field.to_string(), Value::String(value.to_string()));
        }
        verification.insert("webhook_id".into(), Value::String(webhook_id.to_string()));
        verification.insert("webhook_event".into(), event.clone());

        let base = credentials.base_url(API_BASE, SANDBOX_API_BASE);
        let access = self.access_token(&base, client_id, client_secret).await?;
        let response = self
            .http
            .post(format!("{}/v1/notifications/verify-webhook-signature", base))
            .bearer_auth(&access)
            .json(&Value::Object(verification))
            .send()
            .await?;
        let verdict = read_json(self.tag(), response).await?;
        if pointer_str(&verdict, "/verification_status").as_deref() != Some("SUCCESS") {
            return Err(ServiceError::WebhookRejected("paypal signature verification failed".into()));
        }

        // An approved order only moves money once it is captured.
        if pointer_str(&event, "/event_type").as_deref() == Some(ORDER_APPROVED) {
            let order_id = pointer_str(&event, "/resource/id").ok_or_else(|| {
                ServiceError::ValidationError("paypal approval carries no order id".into())
            })?;
            let status = self.capture(&base, &access, &order_id).await?;
            return Ok(Some(WebhookNotification {
                token: order_id,
                status,
            }));
        }

        let token = pointer_str(&event, "/resource/supplementary_data/related_ids/order_id")
            .or_else(|| pointer_str(&event, "/resource/id"));
        let status = pointer_str(&event, "/resource/status");
        match (token, status) {
            (Some(token), Some(status)) => Ok(Some(WebhookNotification { token, status })),
            _ => {
                warn!(event_type = ?event.get("event_type"), "paypal event carries no payment status");
                Ok(None)
            }
        }
    }
}
