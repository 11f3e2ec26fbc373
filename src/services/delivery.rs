use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{order::DeliveryType, shop};

/// Drop-off coordinates supplied with an order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryAddress {
    pub latitude: f64,
    pub longitude: f64,
}

/// Resolves the delivery fee of one subject from its shop's delivery rules.
pub trait DeliveryFeeResolver: Send + Sync {
    fn delivery_fee(
        &self,
        shop: Option<&shop::Model>,
        delivery_type: Option<DeliveryType>,
        address: Option<&DeliveryAddress>,
    ) -> Decimal;
}

/// Base price plus a per-kilometre rate over the great-circle distance.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShopDeliveryRates;

impl DeliveryFeeResolver for ShopDeliveryRates {
    fn delivery_fee(
        &self,
        shop: Option<&shop::Model>,
        delivery_type: Option<DeliveryType>,
        address: Option<&DeliveryAddress>,
    ) -> Decimal {
        let (Some(shop), Some(DeliveryType::Delivery), Some(address)) =
            (shop, delivery_type, address)
        else {
            return Decimal::ZERO;
        };

        let distance = match (shop.latitude, shop.longitude) {
            (Some(lat), Some(lon)) => {
                haversine_km(lat, lon, address.latitude, address.longitude)
            }
            _ => return shop.delivery_price.max(Decimal::ZERO),
        };

        let km = Decimal::from_f64(distance)
            .unwrap_or_default()
            .round_dp(2);
        (shop.delivery_price + shop.price_per_km * km).max(Decimal::ZERO)
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let radius_km = 6371.0_f64;
    let (lat1_rad, lon1_rad) = (lat1.to_radians(), lon1.to_radians());
    let (lat2_rad, lon2_rad) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;
    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    radius_km * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn shop(lat: Option<f64>, lon: Option<f64>) -> shop::Model {
        shop::Model {
            id: 1,
            user_id: 1,
            tax: Decimal::ZERO,
            percentage: Decimal::ZERO,
            by_subscription: false,
            visibility: true,
            delivery_price: dec!(5),
            price_per_km: dec!(2),
            latitude: lat,
            longitude: lon,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    const HERE: DeliveryAddress = DeliveryAddress {
        latitude: 0.0,
        longitude: 0.0,
    };

    #[test]
    fn pickup_and_missing_address_are_free() {
        let shop = shop(Some(0.0), Some(0.0));
        let rates = ShopDeliveryRates;
        assert_eq!(
            rates.delivery_fee(Some(&shop), Some(DeliveryType::Pickup), Some(&HERE)),
            Decimal::ZERO
        );
        assert_eq!(
            rates.delivery_fee(Some(&shop), Some(DeliveryType::Delivery), None),
            Decimal::ZERO
        );
        assert_eq!(rates.delivery_fee(Some(&shop), None, Some(&HERE)), Decimal::ZERO);
    }

    #[test]
    fn shop_without_coordinates_charges_base_price() {
        let shop = shop(None, None);
        assert_eq!(
            ShopDeliveryRates.delivery_fee(Some(&shop), Some(DeliveryType::Delivery), Some(&HERE)),
            dec!(5)
        );
    }

    #[test]
    fn distance_rate_is_added_to_base_price() {
        // One degree of latitude is about 111.19 km.
        let shop = shop(Some(1.0), Some(0.0));
        let fee =
            ShopDeliveryRates.delivery_fee(Some(&shop), Some(DeliveryType::Delivery), Some(&HERE));
        assert_eq!(fee, dec!(5) + dec!(2) * dec!(111.19));
    }
}
