//! Risk management for funded-account trading.
//!
//! Enforces the program rule set before any order reaches the gateway:
//! - Daily loss limit and trailing maximum drawdown
//! - Consecutive-loss circuit breaker
//! - Trading-hours window and pre-close blackout
//! - Scaling-plan and budget-capped position sizing
//! - Consistency-ratio monitoring

mod governor;
mod hours;
mod signal;
mod sizing;

pub use governor::{
    AccountRiskState, HaltReason, NoOpenPositions, RiskGovernor, UnrealizedPnlSource,
};
pub use hours::TradingHours;
pub use signal::{Signal, TradeAuthorization};
pub use sizing::{contracts_for, scaling_plan_max};
