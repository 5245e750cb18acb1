//! The strategy-facing boundary types.
//!
//! Strategies hand the core a [`Signal`]; the governor answers with a
//! [`TradeAuthorization`]. Denial is a normal return, never an error.

use crate::gateway::{OrderSide, OrderType};
use rust_decimal::Decimal;

/// A trade intent produced by the strategy layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    pub order_type: OrderType,
    /// Optional upper bound on contracts from the strategy.
    pub quantity_hint: Option<u32>,
}

/// The governor's verdict on a signal.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeAuthorization {
    pub authorized: bool,
    /// Contracts to trade; zero when denied.
    pub quantity: u32,
    /// Why the signal was denied, when it was.
    pub reason: Option<String>,
}

impl TradeAuthorization {
    pub fn granted(quantity: u32) -> Self {
        Self {
            authorized: true,
            quantity,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            quantity: 0,
            reason: Some(reason.into()),
        }
    }
}
