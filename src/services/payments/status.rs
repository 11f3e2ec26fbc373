use crate::entities::{PaymentTag, TransactionStatus};

/// Maps a provider's raw status word onto a transaction status.
///
/// Matching ignores case and surrounding whitespace. Anything a provider
/// reports that is not listed here is treated as still in progress.
pub fn map_provider_status(tag: PaymentTag, raw: &str) -> TransactionStatus {
    let raw = raw.trim().to_ascii_lowercase();
    let raw = raw.as_str();

    match tag {
        PaymentTag::Stripe => match raw {
            "succeeded" => TransactionStatus::Paid,
            "canceled" | "failed" | "requires_payment_method" => TransactionStatus::Canceled,
            _ => TransactionStatus::Progress,
        },
        PaymentTag::PayFast => match raw {
            "complete" => TransactionStatus::Paid,
            "canceled" | "cancelled" | "failed" => TransactionStatus::Canceled,
            _ => TransactionStatus::Progress,
        },
        PaymentTag::Mtn => match raw {
            "successful" => TransactionStatus::Paid,
            "failed" | "rejected" | "timeout" => TransactionStatus::Canceled,
            _ => TransactionStatus::Progress,
        },
        PaymentTag::MoyaSar => match raw {
            "paid" | "captured" => TransactionStatus::Paid,
            "failed" => TransactionStatus::Canceled,
            "refunded" | "voided" => TransactionStatus::Refund,
            _ => TransactionStatus::Progress,
        },
        PaymentTag::Paypal => match raw {
            "completed" => TransactionStatus::Paid,
            "declined" | "denied" | "voided" => TransactionStatus::Canceled,
            "refunded" | "partially_refunded" => TransactionStatus::Refund,
            _ => TransactionStatus::Progress,
        },
        PaymentTag::MercadoPago => match raw {
            "approved" => TransactionStatus::Paid,
            "rejected" | "cancelled" => TransactionStatus::Canceled,
            "refunded" | "charged_back" => TransactionStatus::Refund,
            _ => TransactionStatus::Progress,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_success_maps_to_paid() {
        assert_eq!(
            map_provider_status(PaymentTag::Stripe, "succeeded"),
            TransactionStatus::Paid
        );
        assert_eq!(
            map_provider_status(PaymentTag::Stripe, "requires_payment_method"),
            TransactionStatus::Canceled
        );
        assert_eq!(
            map_provider_status(PaymentTag::Stripe, "processing"),
            TransactionStatus::Progress
        );
    }

    #[test]
    fn matching_ignores_case() {
        assert_eq!(
            map_provider_status(PaymentTag::PayFast, "COMPLETE"),
            TransactionStatus::Paid
        );
        assert_eq!(
            map_provider_status(PaymentTag::Mtn, " Successful "),
            TransactionStatus::Paid
        );
        assert_eq!(
            map_provider_status(PaymentTag::Paypal, "PARTIALLY_REFUNDED"),
            TransactionStatus::Refund
        );
    }

    #[test]
    fn refunds_map_for_providers_that_report_them() {
        assert_eq!(
            map_provider_status(PaymentTag::MoyaSar, "refunded"),
            TransactionStatus::Refund
        );
        assert_eq!(
            map_provider_status(PaymentTag::MercadoPago, "charged_back"),
            TransactionStatus::Refund
        );
    }

    #[test]
    fn unknown_words_stay_in_progress() {
        for tag in [
            PaymentTag::Stripe,
            PaymentTag::PayFast,
            PaymentTag::Mtn,
            PaymentTag::MoyaSar,
            PaymentTag::Paypal,
            PaymentTag::MercadoPago,
        ] {
            assert_eq!(map_provider_status(tag, "weird"), TransactionStatus::Progress);
            assert_eq!(map_provider_status(tag, ""), TransactionStatus::Progress);
        }
    }
}
