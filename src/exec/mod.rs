//! Per-account execution wiring.
//!
//! An [`AccountBot`] is one independent unit of execution: it owns its own
//! credential authority, gateway client, realtime feed, position book and
//! risk governor, so nothing is shared across accounts. The control plane
//! reads [`BotStatus`] snapshots; it has no mutating surface and cannot
//! bypass the governor.

mod positions;
mod router;

pub use positions::{LivePosition, PositionBook};
pub use router::{OrderRouter, SubmitOutcome};

use crate::config::{AccountConfig, Config};
use crate::feed::{EventKind, FeedEvent, FeedState, RealtimeFeed};
use crate::gateway::{CredentialAuthority, GatewayClient, GatewayResult};
use crate::risk::{AccountRiskState, RiskGovernor, Signal, TradingHours, UnrealizedPnlSource};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Read-only snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub name: String,
    pub account_id: i64,
    pub feed_state: FeedState,
    pub risk: AccountRiskState,
    pub positions: Vec<LivePosition>,
}

/// One account's execution context.
pub struct AccountBot {
    name: String,
    account_id: i64,
    client: Arc<GatewayClient>,
    feed: Arc<RealtimeFeed>,
    governor: Arc<RiskGovernor>,
    book: Arc<PositionBook>,
    router: Arc<OrderRouter>,
}

impl AccountBot {
    /// Build the bot for one configured account, resolving the account id
    /// and watched contract ids through the gateway.
    pub async fn build(config: &Config, account: &AccountConfig) -> Result<Self> {
        let auth = Arc::new(
            CredentialAuthority::new(config.gateway.clone())
                .context("building credential authority")?,
        );
        let client = Arc::new(
            GatewayClient::new(
                &config.gateway,
                &config.rate_limits,
                config.retry.clone(),
                auth.clone(),
            )
            .context("building gateway client")?,
        );

        let account_id = match account.account_id {
            Some(id) => id,
            None => {
                let resolved = client
                    .active_account()
                    .await
                    .context("resolving default account")?;
                info!(account = %account.name, account_id = resolved.id, "Resolved gateway account");
                resolved.id
            }
        };

        let mut contract_ids = Vec::with_capacity(account.symbols.len());
        for symbol in &account.symbols {
            let contract = client
                .instrument(symbol, true)
                .await
                .with_context(|| format!("resolving contract for {symbol}"))?;
            contract_ids.push(contract.id);
        }

        let book = Arc::new(PositionBook::new());
        let hours = TradingHours::from_config(&config.hours)?;
        let profile = account.effective_risk(&config.risk).clone();
        let governor = Arc::new(RiskGovernor::new(
            profile,
            hours,
            book.clone() as Arc<dyn UnrealizedPnlSource>,
        ));

        let feed = Arc::new(RealtimeFeed::new(
            &config.gateway,
            &config.feed,
            auth,
            account_id,
            contract_ids,
        ));
        let router = Arc::new(OrderRouter::new(client.clone(), governor.clone(), account_id));

        Ok(Self {
            name: account.name.clone(),
            account_id,
            client,
            feed,
            governor,
            book,
            router,
        })
    }

    /// Seed state, wire feed handlers and start the realtime loop.
    pub async fn start(&self) {
        match self.client.search_positions(self.account_id).await {
            Ok(records) => self.book.seed(&records),
            Err(e) => {
                // Start with an empty book; realtime updates repair it.
                warn!(account = %self.name, error = %e, "Position snapshot failed at startup");
            }
        }

        let book = self.book.clone();
        self.feed.on(
            EventKind::Position,
            Arc::new(move |event| {
                if let FeedEvent::Position(position) = event {
                    book.apply_position(position);
                }
            }),
        );

        let book = self.book.clone();
        self.feed.on(
            EventKind::Quote,
            Arc::new(move |event| {
                if let FeedEvent::Quote(quote) = event {
                    book.apply_quote(quote);
                }
            }),
        );

        let router = self.router.clone();
        self.feed.on(
            EventKind::Trade,
            Arc::new(move |event| {
                if let FeedEvent::Trade(trade) = event {
                    router.record_fill(trade);
                }
            }),
        );

        self.feed.connect();
        info!(account = %self.name, account_id = self.account_id, "Account bot started");
    }

    /// Submit a strategy signal through the governor.
    pub async fn submit_signal(&self, signal: &Signal) -> GatewayResult<SubmitOutcome> {
        self.router.submit(signal).await
    }

    /// Cancel all working orders and close all open positions.
    pub async fn flatten(&self) -> GatewayResult<()> {
        self.router.flatten_all().await
    }

    /// Stop the realtime loop and leave the bot inert.
    pub async fn shutdown(&self) {
        self.feed.disconnect().await;
        info!(account = %self.name, "Account bot stopped");
    }

    pub fn status(&self) -> BotStatus {
        BotStatus {
            name: self.name.clone(),
            account_id: self.account_id,
            feed_state: self.feed.state(),
            risk: self.governor.snapshot(),
            positions: self.book.snapshot(),
        }
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn governor(&self) -> &Arc<RiskGovernor> {
        &self.governor
    }
}
