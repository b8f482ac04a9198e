//! Billing core for tollgate.
//!
//! Owns the in-process state the RPC surface serves from:
//!
//! - [`PricingService`] -- per-model unit prices, hot-swappable from the
//!   store or an external feed
//! - [`ExchangeService`] -- presentation-only currency rates with an hourly
//!   background refresher
//! - [`Monitor`] -- operation counters, threshold evaluation, cooldown-
//!   throttled alerts
//! - [`BillingEngine`] -- the reserve/commit state machine over the ledger
//!
//! All persistent state lives in the [`tollgate_ledger::LedgerStore`]; the
//! services here hold only snapshots (pricing, rates) and volatile counters
//! (monitoring). Deployment topology is a run-time choice: the services call
//! each other directly, never over RPC.

pub mod engine;
pub mod exchange;
pub mod monitor;
pub mod pricing;

pub use engine::{
    AdjustOutcome, BalanceOutcome, BillingEngine, ChargeOutcome, ChargeRequest, CommitOutcome,
    CommitRequest, ReserveOutcome, ReserveRequest, ServiceStats,
};
pub use exchange::ExchangeService;
pub use monitor::Monitor;
pub use pricing::PricingService;
