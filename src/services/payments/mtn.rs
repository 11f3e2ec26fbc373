use async_trait::async_trait;
use serde_json::json;
use tracing::{instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{
    pointer_str, read_json, signature::constant_time_eq, CheckoutRequest, CheckoutSession,
    PaymentGateway, ProviderCredentials, WebhookNotification, WebhookRequest,
};
use crate::{entities::PaymentTag, errors::ServiceError};

const API_BASE: &str = "https://proxy.momoapi.mtn.com";
const SANDBOX_API_BASE: &str = "https://sandbox.momodeveloper.mtn.com";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// MTN Mobile Money collections (request-to-pay).
///
/// Payload settings: `api_user`, `api_key`, `subscription_key`,
/// `callback_secret`, and `target_environment` outside the sandbox.
///
/// MTN does not sign its callbacks, so the callback URL handed to MTN carries
/// `callback_secret` as a `token` query parameter and webhooks without it are
/// rejected.
#[derive(Clone)]
pub struct MtnGateway {
    http: reqwest::Client,
}

impl MtnGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn target_environment<'a>(&self, credentials: &'a ProviderCredentials) -> Result<&'a str, ServiceError> {
        match credentials.get("target_environment") {
            Some(env) => Ok(env),
            None if credentials.sandbox => Ok("sandbox"),
            None => credentials.require(self.tag(), "target_environment"),
        }
    }

    async fn access_token(
        &self,
        base: &str,
        credentials: &ProviderCredentials,
    ) -> Result<String, ServiceError> {
        let response = self
            .http
            .post(format!("{}/collection/token/", base))
            .basic_auth(
                credentials.require(self.tag(), "api_user")?,
                Some(credentials.require(self.tag(), "api_key")?),
            )
            .header(SUBSCRIPTION_HEADER, credentials.require(self.tag(), "subscription_key")?)
            .send()
            .await?;
        let body = read_json(self.tag(), response).await?;
        pointer_str(&body, "/access_token")
            .ok_or_else(|| ServiceError::ExternalServiceError("mtn returned no access token".into()))
    }
}

/// Appends the shared callback secret to the notification URL.
fn signed_callback(callback_url: &str, secret: &str) -> Result<String, ServiceError> {
    let mut url = Url::parse(callback_url)
        .map_err(|e| ServiceError::InternalError(format!("invalid callback url: {}", e)))?;
    url.query_pairs_mut().append_pair("token", secret);
    Ok(url.into())
}

#[async_trait]
impl PaymentGateway for MtnGateway {
    fn tag(&self) -> PaymentTag {
        PaymentTag::Mtn
    }

    #[instrument(skip(self, credentials, request), fields(payable = %request.payable))]
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let phone = request
            .payer
            .phone
            .as_deref()
            .map(|p| p.trim().trim_start_matches('+'))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("phone is required for MTN payments".into()))?;
        let callback_secret = credentials.require(self.tag(), "callback_secret")?;
        let subscription_key = credentials.require(self.tag(), "subscription_key")?;
        let environment = self.target_environment(credentials)?;
        let base = credentials.base_url(API_BASE, SANDBOX_API_BASE);

        let token = self.access_token(&base, credentials).await?;
        let reference_id = Uuid::new_v4().to_string();

        let response = self
            .http
            .post(format!("{}/collection/v1_0/requesttopay", base))
            .bearer_auth(token)
            .header("X-Reference-Id", &reference_id)
            .header("X-Target-Environment", environment)
            .header("X-Callback-Url", signed_callback(&request.callback_url, callback_secret)?)
            .header(SUBSCRIPTION_HEADER, subscription_key)
            .json(&json!({
                "amount": request.amount.normalize().to_string(),
                "currency": request.currency,
                "externalId": reference_id,
                "payer": { "partyIdType": "MSISDN", "partyId": phone },
                "payerMessage": request.description,
                "payeeNote": request.description,
            }))
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %super::truncate(&body, 512), "mtn request-to-pay was not accepted");
            return Err(ServiceError::ExternalServiceError(format!(
                "mtn responded with {}",
                status
            )));
        }

        Ok(CheckoutSession {
            process_id: reference_id.clone(),
            data: json!({
                "reference_id": reference_id,
                "phone": phone,
            }),
        })
    }

    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError> {
        let secret = credentials.webhook_secret(self.tag(), "callback_secret")?;
        let presented = request
            .query
            .get("token")
            .ok_or_else(|| ServiceError::WebhookRejected("mtn callback has no token".into()))?;
        if !constant_time_eq(presented, secret) {
            return Err(ServiceError::WebhookRejected("mtn callback token mismatch".into()));
        }

        let body = request.json()?;
        let token = pointer_str(&body, "/externalId")
            .or_else(|| pointer_str(&body, "/referenceId"))
            .ok_or_else(|| ServiceError::ValidationError("mtn callback has no reference".into()))?;
        let status = pointer_str(&body, "/status")
            .ok_or_else(|| ServiceError::ValidationError("mtn callback has no status".into()))?;

        Ok(Some(WebhookNotification { token, status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn creds() -> ProviderCredentials {
        ProviderCredentials::new(json!({"callback_secret": "s3cret"}), true)
    }

    fn callback(query_token: Option<&str>, body: serde_json::Value) -> WebhookRequest {
        let mut request = WebhookRequest {
            body: Bytes::from(body.to_string()),
            ..Default::default()
        };
        if let Some(token) = query_token {
            request.query.insert("token".into(), token.into());
        }
        request
    }

    #[test]
    fn callback_url_carries_secret() {
        let url = signed_callback("https://api.example.com/api/v1/webhooks/mtn", "a b").unwrap();
        assert_eq!(url, "https://api.example.com/api/v1/webhooks/mtn?token=a+b");
    }

    #[tokio::test]
    async fn reads_external_id_then_reference_id() {
        let gateway = MtnGateway::new(reqwest::Client::new());

        let parsed = gateway
            .parse_webhook(
                &creds(),
                &callback(Some("s3cret"), json!({"referenceId": "ref-1", "status": "SUCCESSFUL"})),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(parsed.token, "ref-1");
        assert_eq!(parsed.status, "SUCCESSFUL");
    }

    #[tokio::test]
    async fn rejects_callbacks_without_the_secret() {
        let gateway = MtnGateway::new(reqwest::Client::new());
        let body = json!({"externalId": "ref-1", "status": "SUCCESSFUL"});

        for token in [None, Some("wrong")] {
            let result = gateway.parse_webhook(&creds(), &callback(token, body.clone())).await;
            assert!(matches!(result, Err(ServiceError::WebhookRejected(_))));
        }
    }
}
