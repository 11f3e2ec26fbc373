use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Payments API",
        version = "0.2.1",
        description = r#"
# Marketplace Payments API

Checkout initiation and payment webhook reconciliation for marketplace orders,
bookings and other payables.

## Providers

`stripe`, `pay-fast`, `mtn`, `moya-sar`, `paypal` and `mercado-pago`. The
provider tag is the last path segment of both endpoints.

## Authentication

Checkout calls are expected behind an authentication gateway that sets the
caller's id in the `x-user-id` header. Webhooks are authenticated per
provider (signatures, shared secrets or provider-side verification).

## Error Handling

Errors use one body shape with a provider-agnostic `code`:

```json
{
  "error": "Bad Request",
  "code": "coupon_unavailable",
  "message": "Coupon unavailable: WELCOME10",
  "request_id": "req-abc123xyz",
  "timestamp": "2025-01-09T10:30:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Checkout initiation"),
        (name = "Webhooks", description = "Provider callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::checkout::create_checkout,
        crate::handlers::payment_webhooks::receive_webhook,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::services::payments::CheckoutIntent,
            crate::entities::payment_process::Model,
            crate::entities::PayableKind,
            crate::entities::PaymentTag,
            crate::entities::TransactionStatus,
            crate::handlers::health::HealthResponse,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_both_payment_endpoints() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Marketplace Payments API"));
        assert!(json.contains("/api/v1/payments/{tag}/checkout"));
        assert!(json.contains("/api/v1/webhooks/{tag}"));
        assert!(json.contains("CheckoutIntent"));
    }
}
