use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;
use url::form_urlencoded;
use uuid::Uuid;

use super::{
    signature::{constant_time_eq, md5_hex},
    CheckoutRequest, CheckoutSession, PaymentGateway, ProviderCredentials, WebhookNotification,
    WebhookRequest,
};
use crate::{entities::PaymentTag, errors::ServiceError};

const PROCESS_URL: &str = "https://www.payfast.co.za/eng/process";
const SANDBOX_PROCESS_URL: &str = "https://sandbox.payfast.co.za/eng/process";

/// Correlation fields in the order they are tried.
const TOKEN_FIELDS: [&str; 3] = ["m_payment_id", "payment_id", "pf_payment_id"];

/// PayFast hosted checkout. No API call is made: the buyer is redirected to a
/// signed URL and PayFast reports back through an ITN post.
///
/// Payload settings: `merchant_id`, `merchant_key`, `passphrase`.
#[derive(Clone, Debug, Default)]
pub struct PayFastGateway;

impl PayFastGateway {
    pub fn new() -> Self {
        Self
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `k=v&k=v` over non-empty values, keeping the given order.
fn param_string<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| format!("{}={}", key, encode(value.trim())))
        .collect::<Vec<_>>()
        .join("&")
}

fn sign(params: &str, passphrase: &str) -> String {
    md5_hex(&format!("{}&passphrase={}", params, encode(passphrase)))
}

#[async_trait]
impl PaymentGateway for PayFastGateway {
    fn tag(&self) -> PaymentTag {
        PaymentTag::PayFast
    }

    #[instrument(skip(self, credentials, request), fields(payable = %request.payable))]
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let merchant_id = credentials.require(self.tag(), "merchant_id")?;
        let merchant_key = credentials.require(self.tag(), "merchant_key")?;
        let passphrase = credentials.require(self.tag(), "passphrase")?;

        let payment_key = Uuid::new_v4().to_string();
        let amount = format!("{:.2}", request.amount);

        let mut params = BTreeMap::new();
        params.insert("merchant_id", merchant_id.to_string());
        params.insert("merchant_key", merchant_key.to_string());
        params.insert("return_url", request.success_url.clone());
        params.insert("cancel_url", request.cancel_url.clone());
        params.insert("notify_url", request.callback_url.clone());
        params.insert("m_payment_id", payment_key.clone());
        params.insert("amount", amount);
        params.insert("item_name", request.description.clone());
        params.insert("custom_str1", request.payable.to_string());
        if let Some(first) = &request.payer.first_name {
            params.insert("name_first", first.clone());
        }
        if let Some(last) = &request.payer.last_name {
            params.insert("name_last", last.clone());
        }
        if let Some(email) = &request.payer.email {
            params.insert("email_address", email.clone());
        }

        let query = param_string(params.iter().map(|(k, v)| (*k, v.as_str())));
        let signature = sign(&query, passphrase);
        let base = credentials.base_url(PROCESS_URL, SANDBOX_PROCESS_URL);

        Ok(CheckoutSession {
            process_id: payment_key,
            data: json!({
                "url": format!("{}?{}&signature={}", base, query, signature),
            }),
        })
    }

    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError> {
        let passphrase = credentials.webhook_secret(self.tag(), "passphrase")?;

        let fields: Vec<(String, String)> = form_urlencoded::parse(&request.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let field = |name: &str| -> Option<String> {
            fields
                .iter()
                .find(|(key, value)| key == name && !value.trim().is_empty())
                .map(|(_, value)| value.trim().to_string())
        };

        let received = field("signature")
            .ok_or_else(|| ServiceError::WebhookRejected("payfast ITN is unsigned".into()))?;
        // Checkout signs key-sorted parameters while ITNs are signed in posted
        // order; either form authenticates.
        let mut unsigned: Vec<(&str, &str)> = fields
            .iter()
            .filter(|(key, _)| key != "signature")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let posted = sign(&param_string(unsigned.iter().copied()), passphrase);
        unsigned.sort_by(|a, b| a.0.cmp(b.0));
        let sorted = sign(&param_string(unsigned.iter().copied()), passphrase);

        let received = received.to_ascii_lowercase();
        if !constant_time_eq(&received, &posted) && !constant_time_eq(&received, &sorted) {
            return Err(ServiceError::WebhookRejected("payfast signature mismatch".into()));
        }

        let token = TOKEN_FIELDS
            .iter()
            .find_map(|name| field(*name))
            .ok_or_else(|| ServiceError::ValidationError("payfast ITN has no payment id".into()))?;
        let status = field("payment_status")
            .ok_or_else(|| ServiceError::ValidationError("payfast ITN has no payment_status".into()))?;

        Ok(Some(WebhookNotification { token, status }))
    }
}

/// Form body of a correctly signed ITN, for tests.
#[cfg(test)]
pub(crate) fn signed_itn(pairs: &[(&str, &str)], passphrase: &str) -> String {
    let params = param_string(pairs.iter().copied());
    format!("{}&signature={}", params, sign(&params, passphrase))
}
