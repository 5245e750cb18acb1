//! The per-account risk governor.
//!
//! One instance per account, owned by that account's execution context and
//! shared by `Arc` — risk state is never global. The governor consumes
//! realized-P&L updates and answers authorization queries; it never raises,
//! denial is always a normal return.

use crate::config::RiskProfileConfig;
use crate::risk::hours::TradingHours;
use crate::risk::signal::{Signal, TradeAuthorization};
use crate::risk::sizing;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Why trading latched into the halted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum HaltReason {
    DailyLossLimit,
    TrailingDrawdown,
    ConsecutiveLosses,
    OutsideTradingHours,
    PreCloseBlackout,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyLossLimit => write!(f, "approaching daily loss limit"),
            Self::TrailingDrawdown => write!(f, "approaching trailing max drawdown"),
            Self::ConsecutiveLosses => write!(f, "consecutive-loss circuit breaker"),
            Self::OutsideTradingHours => write!(f, "outside trading hours"),
            Self::PreCloseBlackout => write!(f, "inside pre-close blackout"),
        }
    }
}

/// Rolling risk state for one account. `high_water_mark` only ever rises;
/// `trading_halted`, once set, clears only via daily rollover.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountRiskState {
    pub high_water_mark: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub best_day_profit: Decimal,
    pub consecutive_losses: u32,
    pub trading_halted: bool,
    pub halted_reason: Option<HaltReason>,
    pub current_trading_day: Option<NaiveDate>,
}

/// Source of aggregate unrealized P&L, fed by the live position book.
pub trait UnrealizedPnlSource: Send + Sync {
    fn total_unrealized_pnl(&self) -> Decimal;
}

/// No open positions; used before a book exists.
pub struct NoOpenPositions;

impl UnrealizedPnlSource for NoOpenPositions {
    fn total_unrealized_pnl(&self) -> Decimal {
        Decimal::ZERO
    }
}

/// Rule engine gating every order for one account.
pub struct RiskGovernor {
    profile: RiskProfileConfig,
    hours: TradingHours,
    unrealized: Arc<dyn UnrealizedPnlSource>,
    state: Mutex<AccountRiskState>,
}

impl RiskGovernor {
    pub fn new(
        profile: RiskProfileConfig,
        hours: TradingHours,
        unrealized: Arc<dyn UnrealizedPnlSource>,
    ) -> Self {
        let state = AccountRiskState {
            high_water_mark: profile.account_size,
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            best_day_profit: Decimal::ZERO,
            consecutive_losses: 0,
            trading_halted: false,
            halted_reason: None,
            current_trading_day: None,
        };
        Self {
            profile,
            hours,
            unrealized,
            state: Mutex::new(state),
        }
    }

    /// Whether trading is currently allowed. Evaluates every halt trigger
    /// and latches the first one that fires.
    pub fn can_trade(&self) -> bool {
        self.can_trade_at(Utc::now())
    }

    pub fn can_trade_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        self.roll_if_new_day(&mut state, now);

        if state.trading_halted {
            return false;
        }

        if !self.hours.is_open_at(now) {
            Self::halt(&mut state, HaltReason::OutsideTradingHours);
            return false;
        }

        if self.hours.in_blackout_at(now) {
            Self::halt(&mut state, HaltReason::PreCloseBlackout);
            return false;
        }

        let loss_trigger = self.profile.daily_loss_limit * self.profile.daily_loss_halt_fraction;
        if state.daily_pnl <= -loss_trigger {
            Self::halt(&mut state, HaltReason::DailyLossLimit);
            return false;
        }

        // Trailing drawdown: halt inside the final buffer above the ceiling.
        let balance = self.profile.account_size + state.total_pnl;
        let floor = state.high_water_mark - self.profile.max_drawdown_limit;
        let buffer = self.profile.max_drawdown_limit * self.profile.drawdown_halt_buffer;
        if balance <= floor + buffer {
            Self::halt(&mut state, HaltReason::TrailingDrawdown);
            return false;
        }

        if state.consecutive_losses >= self.profile.max_consecutive_losses {
            Self::halt(&mut state, HaltReason::ConsecutiveLosses);
            return false;
        }

        true
    }

    /// Authorize and size a signal.
    pub fn authorize(&self, signal: &Signal) -> TradeAuthorization {
        self.authorize_at(signal, Utc::now())
    }

    pub fn authorize_at(&self, signal: &Signal, now: DateTime<Utc>) -> TradeAuthorization {
        if !self.can_trade_at(now) {
            let reason = self
                .state
                .lock()
                .halted_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "trading halted".to_string());
            return TradeAuthorization::denied(reason);
        }

        if self.hours.in_blackout_at(now) {
            return TradeAuthorization::denied(HaltReason::PreCloseBlackout.to_string());
        }

        let quantity = self.position_size(signal);
        if quantity == 0 {
            return TradeAuthorization::denied("position size computed to zero");
        }

        TradeAuthorization::granted(quantity)
    }

    /// Contracts for a signal under the current account state. Zero rejects.
    pub fn position_size(&self, signal: &Signal) -> u32 {
        let (balance, remaining_budget) = {
            let state = self.state.lock();
            let balance = self.profile.account_size
                + state.total_pnl
                + self.unrealized.total_unrealized_pnl();
            let loss_so_far = if state.daily_pnl < Decimal::ZERO {
                -state.daily_pnl
            } else {
                Decimal::ZERO
            };
            (balance, self.profile.daily_loss_limit - loss_so_far)
        };

        let tick_value = self
            .profile
            .tick_values
            .get(&signal.symbol)
            .copied()
            .unwrap_or(self.profile.default_tick_value);

        let mut quantity =
            sizing::contracts_for(&self.profile, signal, balance, remaining_budget, tick_value);
        if let Some(hint) = signal.quantity_hint {
            quantity = quantity.min(hint);
        }
        quantity
    }

    /// Fold one realized-P&L delta into the rolling state.
    pub fn update_pnl(&self, delta: Decimal) {
        let mut state = self.state.lock();

        state.total_pnl += delta;
        state.daily_pnl += delta;

        let balance = self.profile.account_size + state.total_pnl;
        if balance > state.high_water_mark {
            state.high_water_mark = balance;
        }

        if state.daily_pnl > state.best_day_profit {
            state.best_day_profit = state.daily_pnl;
        }

        if delta < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }

        debug!(
            delta = %delta,
            daily_pnl = %state.daily_pnl,
            total_pnl = %state.total_pnl,
            "Realized P&L updated"
        );

        // The consistency rule warns, it does not halt.
        if state.total_pnl > Decimal::ZERO {
            let ratio = state.best_day_profit / state.total_pnl;
            if ratio > self.profile.consistency_threshold {
                warn!(
                    ratio = %ratio,
                    threshold = %self.profile.consistency_threshold,
                    "Consistency ratio above threshold"
                );
            }
        }
    }

    /// Explicit daily rollover; also invoked lazily by every evaluation.
    pub fn roll_daily(&self) {
        self.roll_daily_at(Utc::now());
    }

    pub fn roll_daily_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        self.roll_if_new_day(&mut state, now);
    }

    /// Copy of the current state for dashboards.
    pub fn snapshot(&self) -> AccountRiskState {
        self.state.lock().clone()
    }

    fn roll_if_new_day(&self, state: &mut AccountRiskState, now: DateTime<Utc>) {
        let today = self.hours.trading_day_at(now);
        match state.current_trading_day {
            // First evaluation pins the trading day; nothing to roll from.
            None => state.current_trading_day = Some(today),
            Some(day) if day != today => {
                state.current_trading_day = Some(today);
                state.daily_pnl = Decimal::ZERO;
                state.consecutive_losses = 0;
                state.trading_halted = false;
                state.halted_reason = None;
                debug!(%today, "Daily risk tracking reset");
            }
            Some(_) => {}
        }
    }

    fn halt(state: &mut AccountRiskState, reason: HaltReason) {
        if !state.trading_halted {
            state.trading_halted = true;
            state.halted_reason = Some(reason);
            error!(%reason, "Trading halted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingHoursConfig;
    use crate::gateway::{OrderSide, OrderType};
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;
    use rust_decimal_macros::dec;

    fn chicago(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Chicago
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("unambiguous local time")
            .with_timezone(&Utc)
    }

    fn governor() -> RiskGovernor {
        RiskGovernor::new(
            RiskProfileConfig::default(),
            TradingHours::from_config(&TradingHoursConfig::default()).unwrap(),
            Arc::new(NoOpenPositions),
        )
    }

    fn mes_signal() -> Signal {
        Signal {
            symbol: "MES".to_string(),
            side: OrderSide::Buy,
            entry_price: dec!(4000),
            stop_loss: dec!(3990),
            take_profit: Some(dec!(4020)),
            order_type: OrderType::Market,
            quantity_hint: None,
        }
    }

    // Mid-session on a Tuesday, well clear of the blackout.
    const OPEN: (i32, u32, u32, u32, u32) = (2025, 6, 3, 10, 0);

    fn open_time() -> DateTime<Utc> {
        chicago(OPEN.0, OPEN.1, OPEN.2, OPEN.3, OPEN.4)
    }

    #[test]
    fn daily_loss_halt_latches_until_rollover() {
        let governor = governor();
        let now = open_time();
        assert!(governor.can_trade_at(now));

        governor.update_pnl(dec!(-950));
        assert!(!governor.can_trade_at(now));
        assert_eq!(
            governor.snapshot().halted_reason,
            Some(HaltReason::DailyLossLimit)
        );

        // Profitable trades do not clear the latch.
        governor.update_pnl(dec!(500));
        assert!(!governor.can_trade_at(now));

        // A new trading day does.
        let next_day = chicago(2025, 6, 4, 10, 0);
        assert!(governor.can_trade_at(next_day));
        let state = governor.snapshot();
        assert_eq!(state.daily_pnl, Decimal::ZERO);
        assert!(!state.trading_halted);
        // Total P&L persists across the roll.
        assert_eq!(state.total_pnl, dec!(-450));
    }

    #[test]
    fn three_consecutive_losses_trip_the_breaker() {
        let governor = governor();
        let now = open_time();

        governor.update_pnl(dec!(-50));
        governor.update_pnl(dec!(-50));
        assert!(governor.can_trade_at(now));

        governor.update_pnl(dec!(-50));
        assert!(!governor.can_trade_at(now));
        assert_eq!(
            governor.snapshot().halted_reason,
            Some(HaltReason::ConsecutiveLosses)
        );
    }

    #[test]
    fn winning_trade_resets_the_loss_streak() {
        let governor = governor();
        governor.update_pnl(dec!(-50));
        governor.update_pnl(dec!(-50));
        governor.update_pnl(dec!(25));
        assert_eq!(governor.snapshot().consecutive_losses, 0);
    }

    #[test]
    fn trailing_drawdown_halts_inside_the_buffer() {
        let governor = governor();

        // Spread the loss over days so neither the daily limit nor the
        // streak breaker fires first.
        governor.update_pnl(dec!(-900));
        assert!(governor.can_trade_at(chicago(2025, 6, 3, 10, 0)));
        governor.update_pnl(dec!(-900));
        assert!(governor.can_trade_at(chicago(2025, 6, 4, 10, 0)));
        governor.update_pnl(dec!(-100));

        // Balance 48100 == floor 48000 + buffer 100.
        assert!(!governor.can_trade_at(chicago(2025, 6, 5, 10, 0)));
        assert_eq!(
            governor.snapshot().halted_reason,
            Some(HaltReason::TrailingDrawdown)
        );
    }

    #[test]
    fn high_water_mark_is_monotone() {
        let governor = governor();
        governor.update_pnl(dec!(1000));
        assert_eq!(governor.snapshot().high_water_mark, dec!(51000));
        governor.update_pnl(dec!(-400));
        assert_eq!(governor.snapshot().high_water_mark, dec!(51000));
        governor.update_pnl(dec!(600));
        assert_eq!(governor.snapshot().high_water_mark, dec!(51200));
    }

    #[test]
    fn halts_outside_hours_and_in_blackout() {
        {
            let governor = governor();
            assert!(!governor.can_trade_at(chicago(2025, 6, 3, 16, 0)));
            assert_eq!(
                governor.snapshot().halted_reason,
                Some(HaltReason::OutsideTradingHours)
            );
        }

        let governor = governor();
        assert!(!governor.can_trade_at(chicago(2025, 6, 3, 14, 50)));
        assert_eq!(
            governor.snapshot().halted_reason,
            Some(HaltReason::PreCloseBlackout)
        );
    }

    #[test]
    fn authorize_sizes_the_worked_example() {
        let governor = governor();
        let auth = governor.authorize_at(&mes_signal(), open_time());
        assert!(auth.authorized);
        assert_eq!(auth.quantity, 5);
        assert_eq!(auth.reason, None);
    }

    #[test]
    fn authorize_honors_the_quantity_hint() {
        let governor = governor();
        let mut signal = mes_signal();
        signal.quantity_hint = Some(2);
        let auth = governor.authorize_at(&signal, open_time());
        assert_eq!(auth.quantity, 2);
    }

    #[test]
    fn authorize_denies_when_halted_with_reason() {
        let governor = governor();
        governor.update_pnl(dec!(-960));
        let auth = governor.authorize_at(&mes_signal(), open_time());
        assert!(!auth.authorized);
        assert_eq!(auth.quantity, 0);
        assert!(auth.reason.unwrap().contains("daily loss"));
    }

    #[test]
    fn authorize_denies_zero_sized_signals() {
        let governor = governor();
        let mut signal = mes_signal();
        signal.stop_loss = signal.entry_price;
        let auth = governor.authorize_at(&signal, open_time());
        assert!(!auth.authorized);
        assert!(auth.reason.unwrap().contains("zero"));
    }

    #[test]
    fn unrealized_pnl_feeds_the_sizing_balance() {
        struct Fixed(Decimal);
        impl UnrealizedPnlSource for Fixed {
            fn total_unrealized_pnl(&self) -> Decimal {
                self.0
            }
        }

        // A deeply negative open position shrinks the sizing balance:
        // (50000 - 40000) * 1.5% = 150 risk dollars -> floor(150/50) = 3.
        let governor = RiskGovernor::new(
            RiskProfileConfig::default(),
            TradingHours::from_config(&TradingHoursConfig::default()).unwrap(),
            Arc::new(Fixed(dec!(-40000))),
        );
        let auth = governor.authorize_at(&mes_signal(), open_time());
        assert!(auth.authorized);
        assert_eq!(auth.quantity, 3);
    }

    #[test]
    fn best_day_profit_tracks_across_days() {
        let governor = governor();
        governor.roll_daily_at(chicago(2025, 6, 3, 10, 0));
        governor.update_pnl(dec!(400));
        governor.roll_daily_at(chicago(2025, 6, 4, 10, 0));
        governor.update_pnl(dec!(150));
        let state = governor.snapshot();
        assert_eq!(state.best_day_profit, dec!(400));
        assert_eq!(state.daily_pnl, dec!(150));
    }
}
