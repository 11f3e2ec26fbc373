// Pricing
pub mod coupons;
pub mod delivery;
pub mod pricing;
pub mod stats;

// Payments
pub mod payments;
pub mod transactions;

// Downstream effects
pub mod notifications;
