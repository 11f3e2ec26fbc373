pub mod checkout;
pub mod health;
pub mod payment_webhooks;

use std::str::FromStr;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::{entities::PaymentTag, errors::ServiceError};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Header the upstream authentication layer sets to the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, as asserted by the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(CallerId)
            .ok_or_else(|| ServiceError::Unauthorized("missing or invalid x-user-id".into()))
    }
}

/// Resolves a route segment to a provider; unknown segments are 404s.
pub(crate) fn parse_tag(segment: &str) -> Result<PaymentTag, ServiceError> {
    PaymentTag::from_str(segment)
        .map_err(|_| ServiceError::NotFound(format!("Payment provider {} not found", segment)))
}
