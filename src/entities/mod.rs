pub mod booking;
pub mod booking_extra_time;
pub mod coupon;
pub mod coupon_redemption;
pub mod order;
pub mod order_detail;
pub mod payable;
pub mod payment;
pub mod payment_payload;
pub mod payment_process;
pub mod shop;
pub mod shop_subscription;
pub mod transaction;
pub mod user_order_stats;

pub use payable::{PayableKind, PayableRef};
pub use payment::PaymentTag;
pub use transaction::TransactionStatus;
