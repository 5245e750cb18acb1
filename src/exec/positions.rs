//! Live position book for one account.
//!
//! Fed by the realtime feed (position updates and quotes) and seeded from a
//! REST snapshot at startup. The aggregate unrealized P&L flows into
//! position sizing through the `UnrealizedPnlSource` seam.

use crate::feed::{PositionEvent, QuoteEvent};
use crate::gateway::{PositionRecord, PositionType};
use crate::risk::UnrealizedPnlSource;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// One open position as the book sees it.
#[derive(Debug, Clone, Serialize)]
pub struct LivePosition {
    pub symbol: String,
    pub contract_id: Option<String>,
    pub side: PositionType,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl LivePosition {
    fn direction(&self) -> Decimal {
        match self.side {
            PositionType::Long => Decimal::ONE,
            PositionType::Short => -Decimal::ONE,
        }
    }

    fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.quantity.abs() * self.direction();
    }
}

/// Positions keyed by symbol.
#[derive(Default)]
pub struct PositionBook {
    positions: RwLock<HashMap<String, LivePosition>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a REST position snapshot (marked at entry until quotes flow).
    pub fn seed(&self, records: &[PositionRecord]) {
        let mut positions = self.positions.write();
        positions.clear();
        for record in records {
            let Some(symbol) = symbol_from_contract_id(&record.contract_id) else {
                continue;
            };
            positions.insert(
                symbol.clone(),
                LivePosition {
                    symbol,
                    contract_id: Some(record.contract_id.clone()),
                    side: record.position_type,
                    quantity: Decimal::from(record.size),
                    entry_price: record.average_price,
                    current_price: record.average_price,
                    unrealized_pnl: Decimal::ZERO,
                },
            );
        }
        debug!(count = positions.len(), "Position book seeded");
    }

    /// Fold in a realtime position update; a zero-quantity update closes it.
    pub fn apply_position(&self, event: &PositionEvent) {
        let mut positions = self.positions.write();
        if event.quantity.is_zero() {
            if positions.remove(&event.symbol).is_some() {
                debug!(symbol = %event.symbol, "Position closed");
            }
            return;
        }

        positions.insert(
            event.symbol.clone(),
            LivePosition {
                symbol: event.symbol.clone(),
                contract_id: event.contract_id.clone(),
                side: event.side,
                quantity: event.quantity,
                entry_price: event.entry_price,
                current_price: event.current_price,
                unrealized_pnl: event.unrealized_pnl,
            },
        );
    }

    /// Re-mark the matching position from a quote.
    pub fn apply_quote(&self, event: &QuoteEvent) {
        if let Some(position) = self.positions.write().get_mut(&event.symbol) {
            position.mark(event.price);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<LivePosition> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn snapshot(&self) -> Vec<LivePosition> {
        self.positions.read().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }
}

impl UnrealizedPnlSource for PositionBook {
    fn total_unrealized_pnl(&self) -> Decimal {
        self.positions
            .read()
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }
}

fn symbol_from_contract_id(contract_id: &str) -> Option<String> {
    let parts: Vec<&str> = contract_id.split('.').collect();
    (parts.len() >= 4).then(|| parts[3].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_mes(quantity: Decimal, entry: Decimal) -> PositionEvent {
        PositionEvent {
            position_id: Some(1),
            account_id: Some(42),
            symbol: "MES".to_string(),
            contract_id: Some("CON.F.US.MES.U25".to_string()),
            side: PositionType::Long,
            quantity,
            entry_price: entry,
            current_price: entry,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: None,
        }
    }

    #[test]
    fn quotes_remark_open_positions() {
        let book = PositionBook::new();
        book.apply_position(&long_mes(dec!(2), dec!(4000)));

        book.apply_quote(&QuoteEvent {
            symbol: "MES".to_string(),
            price: dec!(4010),
            bid: None,
            ask: None,
        });

        let position = book.get("MES").unwrap();
        assert_eq!(position.current_price, dec!(4010));
        assert_eq!(position.unrealized_pnl, dec!(20));
        assert_eq!(book.total_unrealized_pnl(), dec!(20));
    }

    #[test]
    fn short_positions_gain_when_price_falls() {
        let book = PositionBook::new();
        let mut event = long_mes(dec!(1), dec!(4000));
        event.side = PositionType::Short;
        book.apply_position(&event);

        book.apply_quote(&QuoteEvent {
            symbol: "MES".to_string(),
            price: dec!(3990),
            bid: None,
            ask: None,
        });
        assert_eq!(book.get("MES").unwrap().unrealized_pnl, dec!(10));
    }

    #[test]
    fn zero_quantity_update_closes_the_position() {
        let book = PositionBook::new();
        book.apply_position(&long_mes(dec!(2), dec!(4000)));
        assert!(!book.is_empty());

        book.apply_position(&long_mes(Decimal::ZERO, dec!(4000)));
        assert!(book.is_empty());
        assert_eq!(book.total_unrealized_pnl(), Decimal::ZERO);
    }

    #[test]
    fn seeding_replaces_the_book() {
        let book = PositionBook::new();
        book.apply_position(&long_mes(dec!(2), dec!(4000)));

        let record = PositionRecord {
            id: 5,
            account_id: 42,
            contract_id: "CON.F.US.MNQ.U25".to_string(),
            creation_timestamp: chrono::Utc::now(),
            position_type: PositionType::Short,
            size: 1,
            average_price: dec!(18000),
        };
        book.seed(std::slice::from_ref(&record));

        assert!(book.get("MES").is_none());
        let position = book.get("MNQ").unwrap();
        assert_eq!(position.quantity, dec!(1));
        assert_eq!(position.side, PositionType::Short);
    }
}
