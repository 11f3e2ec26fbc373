use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

use super::{
    minor_units, pointer_str, read_json, signature::constant_time_eq, CheckoutRequest,
    CheckoutSession, PaymentGateway, ProviderCredentials, WebhookNotification, WebhookRequest,
};
use crate::{entities::PaymentTag, errors::ServiceError};

const API_BASE: &str = "https://api.moyasar.com";

/// Moyasar hosted invoices.
///
/// Payload settings: `secret_key`, `webhook_secret`.
#[derive(Clone)]
pub struct MoyasarGateway {
    http: reqwest::Client,
}

impl MoyasarGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PaymentGateway for MoyasarGateway {
    fn tag(&self) -> PaymentTag {
        PaymentTag::MoyaSar
    }

    #[instrument(skip(self, credentials, request), fields(payable = %request.payable))]
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let secret_key = credentials.require(self.tag(), "secret_key")?;
        let base = credentials.base_url(API_BASE, API_BASE);

        let response = self
            .http
            .post(format!("{}/v1/invoices", base))
            .basic_auth(secret_key, Some(""))
            .json(&json!({
                "amount": minor_units(request.amount)?,
                "currency": request.currency,
                "description": request.description,
                "callback_url": request.callback_url,
                "success_url": request.success_url,
                "back_url": request.cancel_url,
                "metadata": {
                    "payable_type": request.payable.kind,
                    "payable_id": request.payable.id,
                    "user_id": request.user_id,
                },
            }))
            .send()
            .await?;
        let body = read_json(self.tag(), response).await?;

        let invoice_id = pointer_str(&body, "/id").ok_or_else(|| {
            ServiceError::ExternalServiceError("moyasar returned no invoice id".into())
        })?;

        Ok(CheckoutSession {
            process_id: invoice_id,
            data: json!({ "url": body.get("url") }),
        })
    }

    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError> {
        let secret = credentials.webhook_secret(self.tag(), "webhook_secret")?;
        let event = request.json()?;

        let presented = pointer_str(&event, "/secret_token")
            .ok_or_else(|| ServiceError::WebhookRejected("moyasar event has no secret_token".into()))?;
        if !constant_time_eq(&presented, secret) {
            return Err(ServiceError::WebhookRejected("moyasar secret_token mismatch".into()));
        }

        let token = pointer_str(&event, "/data/invoice_id")
            .or_else(|| pointer_str(&event, "/data/id"))
            .ok_or_else(|| ServiceError::ValidationError("moyasar event has no invoice id".into()))?;
        let status = pointer_str(&event, "/data/status")
            .ok_or_else(|| ServiceError::ValidationError("moyasar event has no status".into()))?;

        Ok(Some(WebhookNotification { token, status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn event(body: serde_json::Value) -> WebhookRequest {
        WebhookRequest {
            body: Bytes::from(body.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invoice_id_wins_over_payment_id() {
        let creds = ProviderCredentials::new(json!({"webhook_secret": "tok"}), false);
        let parsed = MoyasarGateway::new(reqwest::Client::new())
            .parse_webhook(
                &creds,
                &event(json!({
                    "secret_token": "tok",
                    "data": {"id": "pay_1", "invoice_id": "inv_1", "status": "paid"}
                })),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(parsed.token, "inv_1");
        assert_eq!(parsed.status, "paid");
    }

    #[tokio::test]
    async fn wrong_secret_token_is_rejected() {
        let creds = ProviderCredentials::new(json!({"webhook_secret": "tok"}), false);
        let result = MoyasarGateway::new(reqwest::Client::new())
            .parse_webhook(
                &creds,
                &event(json!({"secret_token": "nope", "data": {"id": "inv_1", "status": "paid"}})),
            )
            .await;

        assert!(matches!(result, Err(ServiceError::WebhookRejected(_))));
    }
}
