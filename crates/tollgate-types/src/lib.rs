//! Core types for the tollgate metering service.
//!
//! This crate is the leaf of the workspace: it has no tollgate dependencies
//! and defines everything the other crates share.
//!
//! - [`money`] -- decimal money arithmetic and the cost formulas
//! - [`validate`] -- field validators for user/model/reservation ids and amounts
//! - [`error`] -- the [`BillingError`] taxonomy surfaced at the RPC boundary
//! - [`record`] -- ledger records (reservations, log entries)
//! - [`pricing`] -- per-model unit prices and the pricing table
//! - [`rates`] -- the exchange-rate table
//! - [`monitor`] -- monitoring thresholds, metrics snapshots, alerts
//! - [`config`] -- typed service configuration

pub mod config;
pub mod error;
pub mod money;
pub mod monitor;
pub mod pricing;
pub mod rates;
pub mod record;
pub mod validate;

pub use config::Config;
pub use error::{BillingError, Result};
pub use money::quantize;
pub use monitor::{Alert, MetricsSnapshot, Thresholds};
pub use pricing::{ModelPrices, PricingInfo, PricingTable};
pub use rates::RateTable;
pub use record::{
    AdjustmentLogEntry, DepositLogEntry, Endpoint, Reservation, ReservationStatus,
    TransactionLogEntry,
};
