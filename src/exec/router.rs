//! Signal-to-order routing and fill reconciliation.
//!
//! Every signal passes through the governor before it can reach the gateway;
//! fills coming back on the user channel reconcile into realized P&L. The
//! router also carries the flatten escape hatch used on operator demand.

use crate::feed::TradeEvent;
use crate::gateway::{GatewayClient, GatewayResult, OrderType, PlaceOrderRequest};
use crate::risk::{RiskGovernor, Signal};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of submitting a signal. Denial is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Placed { order_id: i64, quantity: u32 },
    Denied { reason: String },
}

/// Routes authorized signals to the gateway for one account.
pub struct OrderRouter {
    client: Arc<GatewayClient>,
    governor: Arc<RiskGovernor>,
    account_id: i64,
}

impl OrderRouter {
    pub fn new(client: Arc<GatewayClient>, governor: Arc<RiskGovernor>, account_id: i64) -> Self {
        Self {
            client,
            governor,
            account_id,
        }
    }

    /// Authorize, size and place one signal.
    pub async fn submit(&self, signal: &Signal) -> GatewayResult<SubmitOutcome> {
        self.submit_at(signal, chrono::Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        signal: &Signal,
        now: chrono::DateTime<chrono::Utc>,
    ) -> GatewayResult<SubmitOutcome> {
        let authorization = self.governor.authorize_at(signal, now);
        if !authorization.authorized {
            let reason = authorization
                .reason
                .unwrap_or_else(|| "denied by risk governor".to_string());
            info!(symbol = %signal.symbol, %reason, "Signal denied");
            return Ok(SubmitOutcome::Denied { reason });
        }

        let contract = self.client.instrument(&signal.symbol, true).await?;
        let request = PlaceOrderRequest {
            account_id: self.account_id,
            contract_id: contract.id,
            order_type: signal.order_type,
            side: signal.side,
            size: authorization.quantity,
            limit_price: matches!(signal.order_type, OrderType::Limit | OrderType::StopLimit)
                .then_some(signal.entry_price),
            stop_price: matches!(signal.order_type, OrderType::Stop | OrderType::StopLimit)
                .then_some(signal.entry_price),
            trail_price: None,
            custom_tag: None,
            linked_order_id: None,
        };

        let order_id = self.client.place_order(&request).await?;
        info!(
            order_id,
            symbol = %signal.symbol,
            side = ?signal.side,
            quantity = authorization.quantity,
            "Order submitted"
        );

        Ok(SubmitOutcome::Placed {
            order_id,
            quantity: authorization.quantity,
        })
    }

    /// Reconcile a fill into realized P&L. Market trades, other accounts'
    /// fills, voided fills and half-turn fills are ignored.
    pub fn record_fill(&self, trade: &TradeEvent) {
        if trade.voided || trade.account_id != Some(self.account_id) {
            return;
        }
        let Some(pnl) = trade.profit_and_loss else {
            return;
        };

        let net = pnl - trade.fees;
        info!(
            symbol = %trade.symbol,
            gross = %pnl,
            fees = %trade.fees,
            net = %net,
            "Fill reconciled into realized P&L"
        );
        self.governor.update_pnl(net);
    }

    /// Cancel every working order and close every open position.
    pub async fn flatten_all(&self) -> GatewayResult<()> {
        let orders = self.client.search_open_orders(self.account_id).await?;
        for order in &orders {
            if let Err(e) = self.client.cancel_order(self.account_id, order.id).await {
                warn!(order_id = order.id, error = %e, "Cancel failed during flatten");
            }
        }

        let positions = self.client.search_positions(self.account_id).await?;
        for position in &positions {
            self.client
                .close_position(self.account_id, &position.contract_id)
                .await?;
            info!(contract = %position.contract_id, "Position flattened");
        }

        Ok(())
    }
}
