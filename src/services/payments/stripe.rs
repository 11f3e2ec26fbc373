use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{instrument, warn};

use super::{
    minor_units, pointer_str, read_json,
    signature::{constant_time_eq, header_parts, hmac_sha256_hex},
    CheckoutRequest, CheckoutSession, PaymentGateway, ProviderCredentials, WebhookNotification,
    WebhookRequest,
};
use crate::{entities::PaymentTag, errors::ServiceError};

const API_BASE: &str = "https://api.stripe.com";
const SIGNATURE_HEADER: &str = "stripe-signature";

/// Card payments through Stripe PaymentIntents.
///
/// Payload settings: `secret_key`, `webhook_secret`.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    tolerance: Duration,
}

impl StripeGateway {
    pub fn new(http: reqwest::Client, tolerance: Duration) -> Self {
        Self { http, tolerance }
    }

    fn verify_signature(
        &self,
        secret: &str,
        header: &str,
        body: &str,
        now: i64,
    ) -> Result<(), ServiceError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for (key, value) in header_parts(header) {
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| ServiceError::WebhookRejected("stripe signature has no timestamp".into()))?;
        if (now - timestamp).unsigned_abs() > self.tolerance.as_secs() {
            return Err(ServiceError::WebhookRejected(
                "stripe signature timestamp outside tolerance".into(),
            ));
        }

        let expected = hmac_sha256_hex(secret, &format!("{}.{}", timestamp, body));
        if signatures.iter().any(|sig| constant_time_eq(sig, &expected)) {
            Ok(())
        } else {
            Err(ServiceError::WebhookRejected("stripe signature mismatch".into()))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn tag(&self) -> PaymentTag {
        PaymentTag::Stripe
    }

    #[instrument(skip(self, credentials, request), fields(payable = %request.payable))]
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let secret_key = credentials.require(self.tag(), "secret_key")?;
        let base = credentials.base_url(API_BASE, API_BASE);

        let mut form = vec![
            ("amount", minor_units(request.amount)?.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("description", request.description.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[payable_type]", request.payable.kind.to_string()),
            ("metadata[payable_id]", request.payable.id.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
        ];
        if let Some(email) = &request.payer.email {
            form.push(("receipt_email", email.clone()));
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", base))
            .bearer_auth(secret_key)
            .form(&form)
            .send()
            .await?;
        let body = read_json(self.tag(), response).await?;

        let intent_id = pointer_str(&body, "/id").ok_or_else(|| {
            ServiceError::ExternalServiceError("stripe returned no payment intent id".into())
        })?;

        Ok(CheckoutSession {
            process_id: intent_id,
            data: json!({
                "client_secret": body.get("client_secret"),
                "status": body.get("status"),
            }),
        })
    }

    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError> {
        let secret = credentials.webhook_secret(self.tag(), "webhook_secret")?;
        let header = request
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| ServiceError::WebhookRejected("missing stripe-signature header".into()))?;
        let body = std::str::from_utf8(&request.body)
            .map_err(|_| ServiceError::ValidationError("webhook body is not UTF-8".into()))?;

        self.verify_signature(secret, header, body, Utc::now().timestamp())?;

        let event = request.json()?;
        let token = pointer_str(&event, "/data/object/id");
        let status = pointer_str(&event, "/data/object/status");
        match (token, status) {
            (Some(token), Some(status)) => Ok(Some(WebhookNotification { token, status })),
            _ => {
                warn!(event_type = ?event.get("type"), "stripe event carries no payment status");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(reqwest::Client::new(), Duration::from_secs(300))
    }

    #[test]
    fn accepts_signature_within_tolerance() {
        let body = r#"{"id":"evt_1"}"#;
        let sig = hmac_sha256_hex("whsec", &format!("1700000000.{}", body));
        let header = format!("t=1700000000,v1={}", sig);

        assert!(gateway()
            .verify_signature("whsec", &header, body, 1_700_000_100)
            .is_ok());
    }

    #[test]
    fn rejects_stale_or_forged_signatures() {
        let body = r#"{"id":"evt_1"}"#;
        let sig = hmac_sha256_hex("whsec", &format!("1700000000.{}", body));
        let header = format!("t=1700000000,v1={}", sig);

        assert!(matches!(
            gateway().verify_signature("whsec", &header, body, 1_700_001_000),
            Err(ServiceError::WebhookRejected(_))
        ));
        assert!(matches!(
            gateway().verify_signature("other", &header, body, 1_700_000_000),
            Err(ServiceError::WebhookRejected(_))
        ));
        assert!(matches!(
            gateway().verify_signature("whsec", "v1=abc", body, 1_700_000_000),
            Err(ServiceError::WebhookRejected(_))
        ));
    }
}
