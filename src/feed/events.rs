//! Realtime event variants and payload normalization.
//!
//! Hub payloads arrive as loosely-shaped JSON. Each event type has one
//! normalizer that coerces it into a typed variant; a payload that cannot be
//! normalized yields `None` and is dropped by the feed — it never propagates
//! an error.

use crate::gateway::{OrderSide, PositionType};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;

/// The closed set of realtime event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Account,
    Order,
    Position,
    Trade,
    Quote,
}

/// Account-level update (balance, tradability).
#[derive(Debug, Clone, PartialEq)]
pub struct AccountEvent {
    pub account_id: Option<i64>,
    pub balance: Option<Decimal>,
    pub can_trade: Option<bool>,
}

/// Order lifecycle update.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub order_id: Option<i64>,
    pub account_id: Option<i64>,
    pub symbol: Option<String>,
    pub status: Option<i64>,
    pub side: Option<OrderSide>,
    pub size: Option<Decimal>,
    pub price: Option<Decimal>,
}

/// Open-position update with unrealized P&L (recomputed from the latest
/// cached quote when the payload omits it).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEvent {
    pub position_id: Option<i64>,
    pub account_id: Option<i64>,
    pub symbol: String,
    pub contract_id: Option<String>,
    pub side: PositionType,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Option<Decimal>,
}

/// A fill (user hub) or market trade (market hub). Fills carry the account id
/// and, on closing trades, realized P&L.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub trade_id: Option<i64>,
    pub order_id: Option<i64>,
    pub account_id: Option<i64>,
    pub symbol: String,
    pub side: Option<OrderSide>,
    pub size: Option<Decimal>,
    pub price: Option<Decimal>,
    pub profit_and_loss: Option<Decimal>,
    pub fees: Decimal,
    pub voided: bool,
}

/// Best-price update from the market hub.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteEvent {
    pub symbol: String,
    pub price: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

/// A normalized realtime event.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Account(AccountEvent),
    Order(OrderEvent),
    Position(PositionEvent),
    Trade(TradeEvent),
    Quote(QuoteEvent),
}

impl FeedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FeedEvent::Account(_) => EventKind::Account,
            FeedEvent::Order(_) => EventKind::Order,
            FeedEvent::Position(_) => EventKind::Position,
            FeedEvent::Trade(_) => EventKind::Trade,
            FeedEvent::Quote(_) => EventKind::Quote,
        }
    }
}

/// Stateful payload normalizer. Keeps the latest quote per symbol so
/// position updates can recompute unrealized P&L when the gateway omits it.
#[derive(Debug, Default)]
pub struct Normalizer {
    latest_quotes: HashMap<String, Decimal>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one payload into its event variant, or `None` when the
    /// payload is unusable.
    pub fn normalize(&mut self, kind: EventKind, payload: &Value) -> Option<FeedEvent> {
        match kind {
            EventKind::Quote => self.normalize_quote(payload).map(FeedEvent::Quote),
            EventKind::Position => self.normalize_position(payload).map(FeedEvent::Position),
            EventKind::Trade => normalize_trade(payload).map(FeedEvent::Trade),
            EventKind::Order => normalize_order(payload).map(FeedEvent::Order),
            EventKind::Account => normalize_account(payload).map(FeedEvent::Account),
        }
    }

    /// Latest known price for a symbol.
    pub fn latest_quote(&self, symbol: &str) -> Option<Decimal> {
        self.latest_quotes.get(symbol).copied()
    }

    fn normalize_quote(&mut self, payload: &Value) -> Option<QuoteEvent> {
        let symbol = extract_symbol(payload)?;
        let bid = first_decimal(payload, &["bidPrice", "bid"]);
        let ask = first_decimal(payload, &["askPrice", "ask"]);
        let price =
            first_decimal(payload, &["price", "lastPrice", "close"]).or(bid).or(ask)?;

        self.latest_quotes.insert(symbol.clone(), price);

        Some(QuoteEvent {
            symbol,
            price,
            bid,
            ask,
        })
    }

    fn normalize_position(&mut self, payload: &Value) -> Option<PositionEvent> {
        let symbol = extract_symbol(payload)?;

        let side_code = first_i64(payload, &["type", "side"]).unwrap_or(1);
        let side = if side_code == 1 {
            PositionType::Long
        } else {
            PositionType::Short
        };

        let quantity = first_decimal(payload, &["size", "quantity"]).unwrap_or(Decimal::ZERO);
        let entry_price = first_decimal(payload, &["averagePrice", "entryPrice", "price"])
            .unwrap_or(Decimal::ZERO);
        let current_price = first_decimal(payload, &["marketPrice", "markPrice", "lastPrice"])
            .or_else(|| self.latest_quotes.get(&symbol).copied())
            .unwrap_or(entry_price);

        let direction = match side {
            PositionType::Long => Decimal::ONE,
            PositionType::Short => -Decimal::ONE,
        };
        let unrealized_pnl = first_decimal(
            payload,
            &["floatingProfitLoss", "profitAndLoss", "unrealizedPnL"],
        )
        .unwrap_or_else(|| (current_price - entry_price) * quantity.abs() * direction);

        Some(PositionEvent {
            position_id: first_i64(payload, &["id", "positionId"]),
            account_id: first_i64(payload, &["accountId"]),
            symbol,
            contract_id: first_str(payload, &["contractId"]),
            side,
            quantity,
            entry_price,
            current_price,
            unrealized_pnl,
            realized_pnl: first_decimal(payload, &["realizedProfitLoss", "realizedPnL"]),
        })
    }
}

fn normalize_trade(payload: &Value) -> Option<TradeEvent> {
    let symbol = extract_symbol(payload)?;
    Some(TradeEvent {
        trade_id: first_i64(payload, &["id", "tradeId"]),
        order_id: first_i64(payload, &["orderId"]),
        account_id: first_i64(payload, &["accountId"]),
        symbol,
        side: first_i64(payload, &["side"])
            .and_then(|code| OrderSide::from_code(code as i32)),
        size: first_decimal(payload, &["size", "quantity"]),
        price: first_decimal(payload, &["price"]),
        profit_and_loss: first_decimal(payload, &["profitAndLoss"]),
        fees: first_decimal(payload, &["fees"]).unwrap_or(Decimal::ZERO),
        voided: payload.get("voided").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn normalize_order(payload: &Value) -> Option<OrderEvent> {
    // Orders are useful even when the contract id is missing; require only
    // that the payload is an object.
    if !payload.is_object() {
        return None;
    }
    Some(OrderEvent {
        order_id: first_i64(payload, &["id", "orderId"]),
        account_id: first_i64(payload, &["accountId"]),
        symbol: extract_symbol(payload),
        status: first_i64(payload, &["status"]),
        side: first_i64(payload, &["side"])
            .and_then(|code| OrderSide::from_code(code as i32)),
        size: first_decimal(payload, &["size", "quantity"]),
        price: first_decimal(payload, &["limitPrice", "price"]),
    })
}

fn normalize_account(payload: &Value) -> Option<AccountEvent> {
    if !payload.is_object() {
        return None;
    }
    Some(AccountEvent {
        account_id: first_i64(payload, &["id", "accountId"]),
        balance: first_decimal(payload, &["balance"]),
        can_trade: payload.get("canTrade").and_then(Value::as_bool),
    })
}

/// Pull a symbol out of a payload: an explicit `symbol`/`symbolId` field, or
/// the fourth segment of a dotted contract id (`CON.F.US.MES.U25` → `MES`).
pub fn extract_symbol(payload: &Value) -> Option<String> {
    if let Some(symbol) = first_str(payload, &["symbol", "symbolId"]) {
        return Some(symbol.to_uppercase());
    }

    let contract_id = first_str(payload, &["contractId", "id"])?;
    let parts: Vec<&str> = contract_id.split('.').collect();
    if parts.len() >= 4 {
        return Some(parts[3].to_uppercase());
    }
    None
}

fn first_str(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

fn first_i64(payload: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| payload.get(key).and_then(Value::as_i64))
}

fn first_decimal(payload: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|key| coerce_decimal(payload.get(key)?))
}

/// Coerce a JSON number or numeric string into a `Decimal`.
fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn symbol_from_dotted_contract_id() {
        let payload = json!({"contractId": "CON.F.US.MES.U25"});
        assert_eq!(extract_symbol(&payload), Some("MES".to_string()));

        let explicit = json!({"symbol": "mnq"});
        assert_eq!(extract_symbol(&explicit), Some("MNQ".to_string()));

        let short = json!({"contractId": "MES.U25"});
        assert_eq!(extract_symbol(&short), None);
    }

    #[test]
    fn quote_coerces_numeric_strings_and_caches() {
        let mut normalizer = Normalizer::new();
        let payload = json!({
            "contractId": "CON.F.US.MES.U25",
            "lastPrice": "4512.25",
            "bidPrice": 4512.0,
            "askPrice": 4512.5
        });

        let event = normalizer.normalize(EventKind::Quote, &payload).unwrap();
        let FeedEvent::Quote(quote) = event else {
            panic!("expected quote");
        };
        assert_eq!(quote.symbol, "MES");
        assert_eq!(quote.price, dec!(4512.25));
        assert_eq!(quote.bid, Some(dec!(4512.0)));
        assert_eq!(normalizer.latest_quote("MES"), Some(dec!(4512.25)));
    }

    #[test]
    fn position_recomputes_unrealized_pnl_from_cached_quote() {
        let mut normalizer = Normalizer::new();
        normalizer.normalize(
            EventKind::Quote,
            &json!({"contractId": "CON.F.US.MES.U25", "lastPrice": 4010.0}),
        );

        let payload = json!({
            "id": 7,
            "accountId": 42,
            "contractId": "CON.F.US.MES.U25",
            "type": 1,
            "size": 2,
            "averagePrice": 4000.0
        });
        let event = normalizer.normalize(EventKind::Position, &payload).unwrap();
        let FeedEvent::Position(position) = event else {
            panic!("expected position");
        };

        assert_eq!(position.side, PositionType::Long);
        assert_eq!(position.current_price, dec!(4010.0));
        // (4010 - 4000) * 2 long
        assert_eq!(position.unrealized_pnl, dec!(20.0));
    }

    #[test]
    fn position_prefers_gateway_supplied_pnl() {
        let mut normalizer = Normalizer::new();
        let payload = json!({
            "contractId": "CON.F.US.MNQ.U25",
            "type": 2,
            "size": 1,
            "averagePrice": 18000.0,
            "floatingProfitLoss": -37.5
        });
        let event = normalizer.normalize(EventKind::Position, &payload).unwrap();
        let FeedEvent::Position(position) = event else {
            panic!("expected position");
        };
        assert_eq!(position.side, PositionType::Short);
        assert_eq!(position.unrealized_pnl, dec!(-37.5));
    }

    #[test]
    fn fill_carries_realized_pnl_and_fees() {
        let payload = json!({
            "id": 310,
            "orderId": 99,
            "accountId": 42,
            "contractId": "CON.F.US.MES.U25",
            "side": 1,
            "size": 1,
            "price": 4005.0,
            "profitAndLoss": 25.0,
            "fees": 1.35,
            "voided": false
        });
        let event = normalize_trade(&payload).unwrap();
        assert_eq!(event.side, Some(OrderSide::Sell));
        assert_eq!(event.profit_and_loss, Some(dec!(25.0)));
        assert_eq!(event.fees, dec!(1.35));
    }

    #[test]
    fn half_turn_fill_has_no_pnl() {
        let payload = json!({
            "accountId": 42,
            "contractId": "CON.F.US.MES.U25",
            "side": 0,
            "size": 1,
            "price": 4000.0
        });
        let event = normalize_trade(&payload).unwrap();
        assert_eq!(event.profit_and_loss, None);
        assert!(!event.voided);
    }

    #[test]
    fn malformed_payloads_normalize_to_none() {
        let mut normalizer = Normalizer::new();
        assert!(normalizer.normalize(EventKind::Quote, &json!("just a string")).is_none());
        assert!(normalizer.normalize(EventKind::Quote, &json!({"noSymbol": true})).is_none());
        assert!(normalizer.normalize(EventKind::Trade, &json!({})).is_none());
        assert!(normalizer.normalize(EventKind::Position, &json!(null)).is_none());
    }
}
