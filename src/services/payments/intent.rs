use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::Payer;
use crate::{
    entities::{PayableKind, PayableRef},
    errors::ServiceError,
};

/// Generic checkout request. Exactly one target id must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "booking_id": 42,
    "email": "buyer@example.com",
    "firstname": "Ada",
    "lastname": "Lovelace",
    "phone": "+27820000000"
}))]
pub struct CheckoutIntent {
    pub order_id: Option<i64>,
    pub cart_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub gift_cart_id: Option<i64>,
    pub member_ship_id: Option<i64>,
    pub parcel_id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub ads_package_id: Option<i64>,
    pub wallet_id: Option<i64>,

    /// Amount to charge. Ignored for orders and bookings, whose stored total is used.
    #[validate(custom = "validate_total_price")]
    #[schema(value_type = Option<String>, example = "149.99")]
    pub total_price: Option<Decimal>,
    /// ISO 4217 code; defaults to the order's or the platform's currency.
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate(length(min = 5, max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub firstname: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub lastname: Option<String>,
    /// Client flavour hint (e.g. `mobile`), stored with the process data.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Largest amount a single checkout may charge.
pub const MAX_CHECKOUT_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

fn validate_total_price(total: &Decimal) -> Result<(), ValidationError> {
    if *total <= Decimal::ZERO {
        let mut err = ValidationError::new("total_price");
        err.message = Some("total_price must be greater than zero".into());
        return Err(err);
    }
    if *total > MAX_CHECKOUT_AMOUNT {
        let mut err = ValidationError::new("total_price");
        err.message = Some(format!("total_price must not exceed {}", MAX_CHECKOUT_AMOUNT).into());
        return Err(err);
    }
    Ok(())
}

impl CheckoutIntent {
    /// The one payable this intent points at.
    pub fn target(&self) -> Result<PayableRef, ServiceError> {
        let candidates = [
            (PayableKind::Order, self.order_id),
            (PayableKind::Cart, self.cart_id),
            (PayableKind::Booking, self.booking_id),
            (PayableKind::GiftCart, self.gift_cart_id),
            (PayableKind::MemberShip, self.member_ship_id),
            (PayableKind::Parcel, self.parcel_id),
            (PayableKind::Subscription, self.subscription_id),
            (PayableKind::AdsPackage, self.ads_package_id),
            (PayableKind::Wallet, self.wallet_id),
        ];

        let mut set = candidates
            .into_iter()
            .filter_map(|(kind, id)| id.map(|id| PayableRef::new(kind, id)));
        match (set.next(), set.next()) {
            (Some(target), None) => Ok(target),
            (None, _) => Err(ServiceError::ValidationError(
                "one of order_id, cart_id, booking_id, gift_cart_id, member_ship_id, parcel_id, \
                 subscription_id, ads_package_id or wallet_id is required"
                    .into(),
            )),
            (Some(_), Some(_)) => Err(ServiceError::ValidationError(
                "only one checkout target may be given".into(),
            )),
        }
    }

    pub fn payer(&self) -> Payer {
        Payer {
            first_name: self.firstname.clone(),
            last_name: self.lastname.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}
