//! Fixed-fractional position sizing under program rules.
//!
//! Contracts = floor(riskDollars / riskPerContract), clamped by the scaling
//! plan, the configured maximum, and the remaining daily-loss budget.
//! The result is never negative or fractional; zero means reject.

use crate::config::{RiskProfileConfig, ScalingTier};
use crate::risk::signal::Signal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Maximum contracts the scaling plan allows at this balance.
pub fn scaling_plan_max(plan: &[ScalingTier], balance: Decimal) -> u32 {
    for tier in plan {
        match tier.up_to {
            Some(up_to) if balance < up_to => return tier.max_contracts,
            Some(_) => continue,
            None => return tier.max_contracts,
        }
    }
    plan.last().map(|tier| tier.max_contracts).unwrap_or(0)
}

/// Size a signal against the account's balance and remaining daily budget.
pub fn contracts_for(
    profile: &RiskProfileConfig,
    signal: &Signal,
    balance: Decimal,
    remaining_daily_budget: Decimal,
    tick_value: Decimal,
) -> u32 {
    let stop_distance = (signal.entry_price - signal.stop_loss).abs();
    let risk_per_contract = stop_distance * tick_value;
    if risk_per_contract <= Decimal::ZERO {
        return 0;
    }

    let risk_dollars = balance * profile.risk_per_trade_percent / dec!(100);
    let mut contracts = (risk_dollars / risk_per_contract)
        .floor()
        .to_u32()
        .unwrap_or(0);

    contracts = contracts
        .min(scaling_plan_max(&profile.scaling_plan, balance))
        .min(profile.max_position_size)
        .max(profile.min_position_size);

    // The whole position's risk must fit inside the budgeted share of the
    // remaining daily loss allowance.
    let budget_cap = remaining_daily_budget * profile.daily_budget_fraction;
    if Decimal::from(contracts) * risk_per_contract > budget_cap {
        contracts = (budget_cap / risk_per_contract).floor().to_u32().unwrap_or(0);
    }

    contracts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn signal(entry: Decimal, stop: Decimal) -> Signal {
        Signal {
            symbol: "MES".to_string(),
            side: OrderSide::Buy,
            entry_price: entry,
            stop_loss: stop,
            take_profit: None,
            order_type: OrderType::Market,
            quantity_hint: None,
        }
    }

    #[test]
    fn worked_example_clamps_to_plan_max() {
        // riskDollars = 50000 * 1.5% = 750; riskPerContract = 10 * 5 = 50;
        // raw 15 contracts, clamped by the plan/configured max of 5.
        let profile = RiskProfileConfig::default();
        let quantity = contracts_for(
            &profile,
            &signal(dec!(4000), dec!(3990)),
            dec!(50000),
            dec!(1000),
            dec!(5),
        );
        assert_eq!(quantity, 5);
    }

    #[test]
    fn zero_stop_distance_rejects() {
        let profile = RiskProfileConfig::default();
        let quantity = contracts_for(
            &profile,
            &signal(dec!(4000), dec!(4000)),
            dec!(50000),
            dec!(1000),
            dec!(5),
        );
        assert_eq!(quantity, 0);
    }

    #[test]
    fn budget_cap_shrinks_the_position() {
        let profile = RiskProfileConfig::default();
        // riskPerContract = 50; only $120 of budgeted risk left (150 * 0.8).
        let quantity = contracts_for(
            &profile,
            &signal(dec!(4000), dec!(3990)),
            dec!(50000),
            dec!(150),
            dec!(5),
        );
        assert_eq!(quantity, 2);
    }

    #[test]
    fn exhausted_budget_rejects_even_minimum_size() {
        let profile = RiskProfileConfig::default();
        let quantity = contracts_for(
            &profile,
            &signal(dec!(4000), dec!(3990)),
            dec!(50000),
            Decimal::ZERO,
            dec!(5),
        );
        assert_eq!(quantity, 0);

        let quantity = contracts_for(
            &profile,
            &signal(dec!(4000), dec!(3990)),
            dec!(50000),
            dec!(-200),
            dec!(5),
        );
        assert_eq!(quantity, 0);
    }

    #[test]
    fn scaling_plan_tiers_by_balance() {
        let plan = RiskProfileConfig::default().scaling_plan;
        assert_eq!(scaling_plan_max(&plan, dec!(1000)), 2);
        assert_eq!(scaling_plan_max(&plan, dec!(1500)), 3);
        assert_eq!(scaling_plan_max(&plan, dec!(4999)), 4);
        assert_eq!(scaling_plan_max(&plan, dec!(50000)), 5);
    }

    #[test]
    fn tiny_risk_still_honors_minimum_size() {
        let profile = RiskProfileConfig::default();
        // riskDollars = 750, riskPerContract = 100 * 5 = 500 -> raw 1.
        let quantity = contracts_for(
            &profile,
            &signal(dec!(4000), dec!(3900)),
            dec!(50000),
            dec!(1000),
            dec!(5),
        );
        assert_eq!(quantity, 1);
    }
}
