//! Configuration management for the execution core.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway endpoints and credentials
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Per-lane rate limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Retry and backoff parameters for the request pipeline
    #[serde(default)]
    pub retry: RetryConfig,
    /// Realtime feed reconnect parameters
    #[serde(default)]
    pub feed: FeedConfig,
    /// Trading-hours window
    #[serde(default)]
    pub hours: TradingHoursConfig,
    /// Default risk profile, applied to accounts without an override
    #[serde(default)]
    pub risk: RiskProfileConfig,
    /// Accounts to run, one bot per entry
    #[serde(default = "default_accounts")]
    pub accounts: Vec<AccountConfig>,
}

/// Authentication flow selector for the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Username + API key (`/Auth/loginKey`), the standard flow
    LoginKey,
    /// Application credentials (`/Auth/loginApp`)
    LoginApp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// User hub URL (account/order/position/trade channel)
    #[serde(default = "default_user_hub_url")]
    pub user_hub_url: String,
    /// Market hub URL (quote/trade channel)
    #[serde(default = "default_market_hub_url")]
    pub market_hub_url: String,
    /// Which login flow to use
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    /// Username for the loginKey flow
    #[serde(default)]
    pub username: String,
    /// API key for the loginKey flow
    #[serde(default)]
    pub api_key: String,
    /// Username for the loginApp flow
    #[serde(default)]
    pub app_username: String,
    /// Password for the loginApp flow
    #[serde(default)]
    pub app_password: String,
    /// Device id for the loginApp flow
    #[serde(default = "default_device_id")]
    pub app_device_id: String,
    /// Application id for the loginApp flow
    #[serde(default)]
    pub app_id: String,
    /// Verify key for the loginApp flow
    #[serde(default)]
    pub app_verify_key: String,
    /// Run `/Auth/validate` after each login
    #[serde(default = "default_validate_tokens")]
    pub validate_tokens: bool,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// General lane: maximum requests per window
    #[serde(default = "default_general_max_requests")]
    pub general_max_requests: usize,
    /// General lane: window length in seconds
    #[serde(default = "default_general_window_secs")]
    pub general_window_secs: u64,
    /// Historical lane: maximum requests per window
    #[serde(default = "default_historical_max_requests")]
    pub historical_max_requests: usize,
    /// Historical lane: window length in seconds
    #[serde(default = "default_historical_window_secs")]
    pub historical_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per request before surfacing a retryable failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in milliseconds; attempt n sleeps `base * 2^n`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Wait applied to a 429 response without a Retry-After header, in seconds
    #[serde(default = "default_throttle_fallback_secs")]
    pub throttle_fallback_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Initial reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Maximum reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingHoursConfig {
    /// IANA timezone the session and the trading day are defined in
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Session open, HH:MM local (the session wraps midnight when open > close)
    #[serde(default = "default_session_open")]
    pub session_open: String,
    /// Session close, HH:MM local
    #[serde(default = "default_session_close")]
    pub session_close: String,
    /// No new entries at or after this time, HH:MM local
    #[serde(default = "default_entry_cutoff")]
    pub entry_cutoff: String,
}

/// One tier of a scaling plan: up to `up_to` in balance, at most
/// `max_contracts` per position. A tier without `up_to` is the catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingTier {
    #[serde(default)]
    pub up_to: Option<Decimal>,
    pub max_contracts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfileConfig {
    /// Starting account size in dollars
    #[serde(default = "default_account_size")]
    pub account_size: Decimal,
    /// Daily realized loss limit in dollars
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
    /// Trailing maximum drawdown from the high-water mark, in dollars
    #[serde(default = "default_max_drawdown_limit")]
    pub max_drawdown_limit: Decimal,
    /// Best day / total profit ratio that triggers a consistency warning
    #[serde(default = "default_consistency_threshold")]
    pub consistency_threshold: Decimal,
    /// Percent of balance risked per trade (1.5 = 1.5%)
    #[serde(default = "default_risk_per_trade_percent")]
    pub risk_per_trade_percent: Decimal,
    /// Minimum contracts per position
    #[serde(default = "default_min_position_size")]
    pub min_position_size: u32,
    /// Maximum contracts per position
    #[serde(default = "default_max_position_size")]
    pub max_position_size: u32,
    /// Fraction of the daily loss limit that halts trading (0.95 = 95%)
    #[serde(default = "default_daily_loss_halt_fraction")]
    pub daily_loss_halt_fraction: Decimal,
    /// Fraction of the drawdown allowance kept as buffer above the ceiling
    #[serde(default = "default_drawdown_halt_buffer")]
    pub drawdown_halt_buffer: Decimal,
    /// Losing trades in a row before the circuit breaker halts
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Fraction of the remaining daily budget a single position may risk
    #[serde(default = "default_daily_budget_fraction")]
    pub daily_budget_fraction: Decimal,
    /// Balance-tiered contract caps
    #[serde(default = "default_scaling_plan")]
    pub scaling_plan: Vec<ScalingTier>,
    /// Per-symbol dollar value of one tick of stop distance
    #[serde(default = "default_tick_values")]
    pub tick_values: HashMap<String, Decimal>,
    /// Tick value applied to symbols missing from the table
    #[serde(default = "default_tick_value_fallback")]
    pub default_tick_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Display name for logs and status
    #[serde(default = "default_account_name")]
    pub name: String,
    /// Gateway account id; resolved from `/Account/search` when absent
    #[serde(default)]
    pub account_id: Option<i64>,
    /// Symbols this bot watches and trades
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Risk profile override; falls back to the top-level profile
    #[serde(default)]
    pub risk: Option<RiskProfileConfig>,
}

// Default value functions

fn default_base_url() -> String {
    "https://api.topstepx.com/api".to_string()
}

fn default_user_hub_url() -> String {
    "https://rtc.topstepx.com/hubs/user".to_string()
}

fn default_market_hub_url() -> String {
    "https://rtc.topstepx.com/hubs/market".to_string()
}

fn default_auth_mode() -> AuthMode {
    AuthMode::LoginKey
}

fn default_device_id() -> String {
    "combine-pilot".to_string()
}

fn default_validate_tokens() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_general_max_requests() -> usize {
    200 // gateway allows 200 req / 60s on general endpoints
}

fn default_general_window_secs() -> u64 {
    60
}

fn default_historical_max_requests() -> usize {
    50 // bulk/historical endpoints are limited to 50 req / 30s
}

fn default_historical_window_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_throttle_fallback_secs() -> u64 {
    60
}

fn default_reconnect_initial_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_session_open() -> String {
    "17:00".to_string()
}

fn default_session_close() -> String {
    "15:10".to_string()
}

fn default_entry_cutoff() -> String {
    "14:45".to_string()
}

fn default_account_size() -> Decimal {
    Decimal::new(50_000, 0) // $50K evaluation account
}

fn default_daily_loss_limit() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_max_drawdown_limit() -> Decimal {
    Decimal::new(2_000, 0)
}

fn default_consistency_threshold() -> Decimal {
    Decimal::new(50, 2) // best day must stay under 50% of total profit
}

fn default_risk_per_trade_percent() -> Decimal {
    Decimal::new(15, 1) // 1.5%
}

fn default_min_position_size() -> u32 {
    1
}

fn default_max_position_size() -> u32 {
    5
}

fn default_daily_loss_halt_fraction() -> Decimal {
    Decimal::new(95, 2) // 0.95
}

fn default_drawdown_halt_buffer() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_daily_budget_fraction() -> Decimal {
    Decimal::new(80, 2) // 0.80
}

fn default_scaling_plan() -> Vec<ScalingTier> {
    // $50K evaluation plan
    vec![
        ScalingTier {
            up_to: Some(Decimal::new(1_500, 0)),
            max_contracts: 2,
        },
        ScalingTier {
            up_to: Some(Decimal::new(3_000, 0)),
            max_contracts: 3,
        },
        ScalingTier {
            up_to: Some(Decimal::new(5_000, 0)),
            max_contracts: 4,
        },
        ScalingTier {
            up_to: None,
            max_contracts: 5,
        },
    ]
}

fn default_tick_values() -> HashMap<String, Decimal> {
    HashMap::from([
        ("MES".to_string(), Decimal::new(5, 0)),
        ("MNQ".to_string(), Decimal::new(2, 0)),
        ("MGC".to_string(), Decimal::new(1, 0)),
    ])
}

fn default_tick_value_fallback() -> Decimal {
    Decimal::ONE
}

fn default_account_name() -> String {
    "primary".to_string()
}

fn default_symbols() -> Vec<String> {
    vec!["MES".to_string()]
}

fn default_accounts() -> Vec<AccountConfig> {
    vec![AccountConfig::default()]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("CPILOT"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate_credentials()?;

        anyhow::ensure!(
            self.rate_limits.general_max_requests > 0
                && self.rate_limits.historical_max_requests > 0,
            "rate limit capacities must be positive"
        );

        anyhow::ensure!(self.retry.max_retries > 0, "max_retries must be >= 1");

        anyhow::ensure!(
            self.feed.reconnect_initial_ms > 0
                && self.feed.reconnect_initial_ms <= self.feed.reconnect_max_ms,
            "reconnect_initial_ms must be positive and <= reconnect_max_ms"
        );

        anyhow::ensure!(!self.accounts.is_empty(), "at least one account is required");

        self.risk.validate()?;
        for account in &self.accounts {
            anyhow::ensure!(
                !account.symbols.is_empty(),
                "account '{}' has no symbols configured",
                account.name
            );
            if let Some(risk) = &account.risk {
                risk.validate()
                    .with_context(|| format!("risk profile for account '{}'", account.name))?;
            }
        }

        Ok(())
    }
}

impl GatewayConfig {
    /// Check that the credentials required by the configured auth mode are present.
    pub fn validate_credentials(&self) -> Result<()> {
        match self.auth_mode {
            AuthMode::LoginKey => {
                anyhow::ensure!(
                    !self.username.is_empty() && !self.api_key.is_empty(),
                    "auth mode 'login_key' requires gateway.username and gateway.api_key"
                );
            }
            AuthMode::LoginApp => {
                anyhow::ensure!(
                    !self.app_username.is_empty()
                        && !self.app_password.is_empty()
                        && !self.app_id.is_empty()
                        && !self.app_verify_key.is_empty(),
                    "auth mode 'login_app' requires app_username, app_password, app_id and app_verify_key"
                );
            }
        }
        Ok(())
    }
}

impl RiskProfileConfig {
    /// Validate profile values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.account_size > Decimal::ZERO, "account_size must be positive");
        anyhow::ensure!(
            self.daily_loss_limit > Decimal::ZERO && self.max_drawdown_limit > Decimal::ZERO,
            "loss and drawdown limits must be positive"
        );
        anyhow::ensure!(
            self.risk_per_trade_percent > Decimal::ZERO
                && self.risk_per_trade_percent < Decimal::new(100, 0),
            "risk_per_trade_percent must be in (0, 100)"
        );
        anyhow::ensure!(
            self.min_position_size >= 1 && self.min_position_size <= self.max_position_size,
            "min_position_size must be >= 1 and <= max_position_size"
        );
        anyhow::ensure!(
            self.daily_loss_halt_fraction > Decimal::ZERO
                && self.daily_loss_halt_fraction <= Decimal::ONE,
            "daily_loss_halt_fraction must be in (0, 1]"
        );
        anyhow::ensure!(
            self.daily_budget_fraction > Decimal::ZERO
                && self.daily_budget_fraction <= Decimal::ONE,
            "daily_budget_fraction must be in (0, 1]"
        );
        anyhow::ensure!(
            !self.scaling_plan.is_empty(),
            "scaling_plan must have at least one tier"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            rate_limits: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            feed: FeedConfig::default(),
            hours: TradingHoursConfig::default(),
            risk: RiskProfileConfig::default(),
            accounts: default_accounts(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_hub_url: default_user_hub_url(),
            market_hub_url: default_market_hub_url(),
            auth_mode: default_auth_mode(),
            username: String::new(),
            api_key: String::new(),
            app_username: String::new(),
            app_password: String::new(),
            app_device_id: default_device_id(),
            app_id: String::new(),
            app_verify_key: String::new(),
            validate_tokens: default_validate_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_max_requests: default_general_max_requests(),
            general_window_secs: default_general_window_secs(),
            historical_max_requests: default_historical_max_requests(),
            historical_window_secs: default_historical_window_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            throttle_fallback_secs: default_throttle_fallback_secs(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl Default for TradingHoursConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            session_open: default_session_open(),
            session_close: default_session_close(),
            entry_cutoff: default_entry_cutoff(),
        }
    }
}

impl Default for RiskProfileConfig {
    fn default() -> Self {
        Self {
            account_size: default_account_size(),
            daily_loss_limit: default_daily_loss_limit(),
            max_drawdown_limit: default_max_drawdown_limit(),
            consistency_threshold: default_consistency_threshold(),
            risk_per_trade_percent: default_risk_per_trade_percent(),
            min_position_size: default_min_position_size(),
            max_position_size: default_max_position_size(),
            daily_loss_halt_fraction: default_daily_loss_halt_fraction(),
            drawdown_halt_buffer: default_drawdown_halt_buffer(),
            max_consecutive_losses: default_max_consecutive_losses(),
            daily_budget_fraction: default_daily_budget_fraction(),
            scaling_plan: default_scaling_plan(),
            tick_values: default_tick_values(),
            default_tick_value: default_tick_value_fallback(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            name: default_account_name(),
            account_id: None,
            symbols: default_symbols(),
            risk: None,
        }
    }
}

impl AccountConfig {
    /// The effective risk profile for this account.
    pub fn effective_risk<'a>(&'a self, fallback: &'a RiskProfileConfig) -> &'a RiskProfileConfig {
        self.risk.as_ref().unwrap_or(fallback)
    }
}
