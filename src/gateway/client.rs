//! Gateway REST client: one retrying request primitive, typed operations on top.

use crate::config::{GatewayConfig, RateLimitConfig, RetryConfig};
use crate::gateway::auth::CredentialAuthority;
use crate::gateway::error::{FailureKind, GatewayError, GatewayResult};
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::types::*;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Which admission lane a request goes through.
///
/// Bulk/historical endpoints share a tight quota; everything else uses the
/// looser general lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    General,
    Historical,
}

/// ProjectX gateway client.
pub struct GatewayClient {
    http: Client,
    base_url: String,
    auth: Arc<CredentialAuthority>,
    general: RateLimiter,
    historical: RateLimiter,
    retry: RetryConfig,
    /// Contract lookups keyed by `SYMBOL|live`.
    instruments: Mutex<HashMap<String, Contract>>,
}

impl GatewayClient {
    /// Create a new client sharing the account's credential authority.
    pub fn new(
        gateway: &GatewayConfig,
        rate_limits: &RateLimitConfig,
        retry: RetryConfig,
        auth: Arc<CredentialAuthority>,
    ) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(gateway.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: gateway.base_url.trim_end_matches('/').to_string(),
            auth,
            general: RateLimiter::new(
                rate_limits.general_max_requests,
                rate_limits.general_window_secs,
            ),
            historical: RateLimiter::new(
                rate_limits.historical_max_requests,
                rate_limits.historical_window_secs,
            ),
            retry,
            instruments: Mutex::new(HashMap::new()),
        })
    }

    fn limiter(&self, lane: Lane) -> &RateLimiter {
        match lane {
            Lane::General => &self.general,
            Lane::Historical => &self.historical,
        }
    }

    /// The request primitive underlying every operation.
    ///
    /// Per attempt: acquire the lane's slot, attach a fresh bearer token,
    /// issue the call, classify the outcome. 429 waits out Retry-After
    /// without consuming the attempt budget; 5xx, transport faults and
    /// malformed 2xx bodies back off exponentially; other 4xx surface
    /// immediately.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        lane: Lane,
        body: Option<&Value>,
    ) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;

        loop {
            self.limiter(lane).acquire().await;
            let auth_header = self.auth.bearer_header().await?;

            debug!(%method, %path, attempt, "API request");
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, auth_header);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let outcome: GatewayResult<T> = match builder.send().await {
                Err(e) => Err(GatewayError::transport(format!(
                    "Request error on {method} {path}: {e}"
                ))),
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = retry_after_secs(&response)
                            .unwrap_or(self.retry.throttle_fallback_secs);
                        warn!(%path, wait_secs = wait, "Gateway throttled request; waiting");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }
                    match response.text().await {
                        Err(e) => Err(GatewayError::transport(format!(
                            "Failed to read response body: {e}"
                        ))),
                        Ok(text) => classify_response::<T>(status, &text),
                    }
                }
            };

            match outcome {
                Ok(value) => {
                    debug!(%method, %path, "API response ok");
                    return Ok(value);
                }
                Err(err) if err.kind == FailureKind::Authentication => {
                    self.auth.invalidate().await;
                    return Err(err);
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_retries => {
                    let backoff = Duration::from_millis(
                        self.retry
                            .backoff_base_ms
                            .saturating_mul(1u64 << attempt.min(10)),
                    );
                    warn!(
                        %path,
                        attempt = attempt + 1,
                        max = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retryable gateway failure; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        lane: Lane,
        body: &B,
    ) -> GatewayResult<T> {
        let body = serde_json::to_value(body)
            .map_err(|e| GatewayError::malformed(format!("Failed to encode request: {e}")))?;
        self.request(Method::POST, path, lane, Some(&body)).await
    }

    // ==================== Accounts ====================

    /// List gateway accounts.
    #[instrument(skip(self))]
    pub async fn search_accounts(&self, only_active: bool) -> GatewayResult<Vec<Account>> {
        let response: AccountSearchResponse = self
            .post(
                "/Account/search",
                Lane::General,
                &AccountSearchRequest {
                    only_active_accounts: only_active,
                },
            )
            .await?;
        Ok(ensure_envelope(response, "Account search")?.accounts)
    }

    /// Resolve the default tradable account.
    #[instrument(skip(self))]
    pub async fn active_account(&self) -> GatewayResult<Account> {
        let accounts = self.search_accounts(true).await?;
        accounts
            .into_iter()
            .find(|a| a.can_trade && a.is_visible)
            .ok_or_else(|| GatewayError::rejected("No tradable account available", 404))
    }

    // ==================== Contracts ====================

    /// Search contracts by text. A live search that comes back empty is
    /// retried once against the non-live catalog.
    #[instrument(skip(self))]
    pub async fn search_contracts(
        &self,
        search_text: &str,
        live: bool,
    ) -> GatewayResult<Vec<Contract>> {
        let response: ContractSearchResponse = self
            .post(
                "/Contract/search",
                Lane::General,
                &ContractSearchRequest {
                    search_text: search_text.to_string(),
                    live,
                },
            )
            .await?;
        let contracts = ensure_envelope(response, "Contract search")?.contracts;

        if contracts.is_empty() && live {
            warn!(%search_text, "Live contract search returned no rows; retrying non-live");
            let response: ContractSearchResponse = self
                .post(
                    "/Contract/search",
                    Lane::General,
                    &ContractSearchRequest {
                        search_text: search_text.to_string(),
                        live: false,
                    },
                )
                .await?;
            return Ok(ensure_envelope(response, "Contract search")?.contracts);
        }

        Ok(contracts)
    }

    /// Fetch a contract by its full id.
    #[instrument(skip(self))]
    pub async fn contract_by_id(&self, contract_id: &str) -> GatewayResult<Contract> {
        let response: ContractByIdResponse = self
            .post(
                "/Contract/searchById",
                Lane::General,
                &ContractByIdRequest {
                    contract_id: contract_id.to_string(),
                },
            )
            .await?;
        ensure_envelope(response, "Contract lookup")?
            .contract
            .ok_or_else(|| GatewayError::rejected(format!("Unknown contract {contract_id}"), 404))
    }

    /// Look up the instrument for a symbol, serving repeats from the cache.
    #[instrument(skip(self))]
    pub async fn instrument(&self, symbol: &str, live: bool) -> GatewayResult<Contract> {
        let key = format!("{}|{live}", symbol.to_uppercase());
        if let Some(contract) = self.instruments.lock().get(&key) {
            return Ok(contract.clone());
        }

        let symbol_upper = symbol.to_uppercase();
        let contracts = self.search_contracts(&symbol_upper, live).await?;
        let contract = contracts
            .iter()
            .find(|c| c.symbol().is_some_and(|s| s == symbol_upper))
            .or_else(|| contracts.iter().find(|c| c.active_contract))
            .or_else(|| contracts.first())
            .cloned()
            .ok_or_else(|| {
                GatewayError::rejected(format!("No contract found for {symbol_upper}"), 404)
            })?;

        self.instruments.lock().insert(key, contract.clone());
        Ok(contract)
    }

    // ==================== Orders ====================

    /// Place an order; returns the gateway order id.
    #[instrument(skip(self, request), fields(contract = %request.contract_id, size = request.size))]
    pub async fn place_order(&self, request: &PlaceOrderRequest) -> GatewayResult<i64> {
        let response: PlaceOrderResponse =
            self.post("/Order/place", Lane::General, request).await?;
        Ok(ensure_envelope(response, "Order placement")?.order_id)
    }

    /// Cancel a working order.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, account_id: i64, order_id: i64) -> GatewayResult<()> {
        let response: StatusResponse = self
            .post(
                "/Order/cancel",
                Lane::General,
                &CancelOrderRequest {
                    account_id,
                    order_id,
                },
            )
            .await?;
        ensure_envelope(response, "Order cancel").map(|_| ())
    }

    /// List working orders for an account.
    #[instrument(skip(self))]
    pub async fn search_open_orders(&self, account_id: i64) -> GatewayResult<Vec<Order>> {
        let response: OrderSearchResponse = self
            .post(
                "/Order/searchOpen",
                Lane::General,
                &OpenOrderSearchRequest { account_id },
            )
            .await?;
        Ok(ensure_envelope(response, "Open order search")?.orders)
    }

    // ==================== Positions ====================

    /// List open positions for an account.
    #[instrument(skip(self))]
    pub async fn search_positions(&self, account_id: i64) -> GatewayResult<Vec<PositionRecord>> {
        let response: PositionSearchResponse = self
            .post(
                "/Position/searchOpen",
                Lane::General,
                &PositionSearchRequest { account_id },
            )
            .await?;
        Ok(ensure_envelope(response, "Position search")?.positions)
    }

    /// Flatten the position on one contract.
    #[instrument(skip(self))]
    pub async fn close_position(&self, account_id: i64, contract_id: &str) -> GatewayResult<()> {
        let response: StatusResponse = self
            .post(
                "/Position/closeContract",
                Lane::General,
                &ClosePositionRequest {
                    account_id,
                    contract_id: contract_id.to_string(),
                },
            )
            .await?;
        ensure_envelope(response, "Position close").map(|_| ())
    }

    // ==================== Trades ====================

    /// List fills since `start` (optionally bounded by `end`).
    #[instrument(skip(self))]
    pub async fn search_trades(
        &self,
        account_id: i64,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> GatewayResult<Vec<TradeRecord>> {
        let response: TradeSearchResponse = self
            .post(
                "/Trade/search",
                Lane::General,
                &TradeSearchRequest {
                    account_id,
                    start_timestamp: start,
                    end_timestamp: end,
                },
            )
            .await?;
        Ok(ensure_envelope(response, "Trade search")?.trades)
    }

    // ==================== History ====================

    /// Retrieve historical bars. Goes through the tight historical lane.
    #[instrument(skip(self, request), fields(contract = %request.contract_id))]
    pub async fn retrieve_bars(&self, request: &RetrieveBarsRequest) -> GatewayResult<Vec<Bar>> {
        let response: RetrieveBarsResponse = self
            .post("/History/retrieveBars", Lane::Historical, request)
            .await?;
        Ok(ensure_envelope(response, "Bar retrieval")?.bars)
    }
}

impl Contract {
    /// Symbol embedded in a dotted contract id (`CON.F.US.MES.U25` → `MES`).
    pub fn symbol(&self) -> Option<&str> {
        let mut parts = self.id.split('.');
        parts.nth(3)
    }
}

/// Map an HTTP outcome to the failure taxonomy, or parse the 2xx body.
fn classify_response<T: DeserializeOwned>(status: StatusCode, text: &str) -> GatewayResult<T> {
    if status.is_server_error() {
        return Err(GatewayError::upstream(
            format!("Gateway error {}: {}", status.as_u16(), excerpt(text)),
            502,
        ));
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(GatewayError::authentication(format!(
            "Gateway rejected token: {}",
            excerpt(text)
        )));
    }

    if status.is_client_error() {
        return Err(match serde_json::from_str::<Value>(text) {
            Ok(body) => {
                let message = body
                    .get("errorMessage")
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), excerpt(text)));
                let mut err = GatewayError::rejected(message, status.as_u16());
                if let Some(code) = body.get("errorCode").and_then(Value::as_i64) {
                    err = err.with_code(code);
                }
                err.with_details(body)
            }
            Err(_) => GatewayError::rejected(
                format!("HTTP {}: {}", status.as_u16(), excerpt(text)),
                status.as_u16(),
            ),
        });
    }

    serde_json::from_str(text).map_err(|e| {
        GatewayError::malformed(format!("Invalid JSON from gateway ({status}): {e}"))
    })
}

/// Reject gateway envelopes that report failure despite HTTP 200.
fn ensure_envelope<E: Envelope>(response: E, operation: &str) -> GatewayResult<E> {
    if response.success() && response.error_code() == 0 {
        return Ok(response);
    }
    let code = response.error_code();
    let message = response
        .error_message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{operation} failed (errorCode={code})"));
    Err(GatewayError::rejected(message, 502).with_code(code))
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_client(server: &MockServer, max_retries: u32) -> GatewayClient {
        let gateway = GatewayConfig {
            base_url: server.uri(),
            username: "trader".to_string(),
            api_key: "key-123".to_string(),
            validate_tokens: false,
            ..GatewayConfig::default()
        };
        let retry = RetryConfig {
            max_retries,
            backoff_base_ms: 10,
            throttle_fallback_secs: 1,
        };

        Mock::given(method("POST"))
            .and(path("/Auth/loginKey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tok-test",
                "success": true,
                "errorCode": 0,
                "errorMessage": null
            })))
            .mount(server)
            .await;

        let auth = Arc::new(CredentialAuthority::new(gateway.clone()).unwrap());
        GatewayClient::new(&gateway, &RateLimitConfig::default(), retry, auth).unwrap()
    }

    fn accounts_body() -> serde_json::Value {
        serde_json::json!({
            "accounts": [{
                "id": 42,
                "name": "EVAL-50K",
                "balance": 50000.0,
                "canTrade": true,
                "isVisible": true
            }],
            "success": true,
            "errorCode": 0,
            "errorMessage": null
        })
    }

    #[tokio::test]
    async fn server_errors_retry_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Account/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Account/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(accounts_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, 3).await;
        let accounts = client.search_accounts(true).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, 42);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Account/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server, 3).await;
        let err = client.search_accounts(true).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::UpstreamServer);
        assert_eq!(err.status, 502);
    }

    #[tokio::test]
    async fn throttle_does_not_consume_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Account/search"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "0"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Account/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(accounts_body()))
            .expect(1)
            .mount(&server)
            .await;

        // A single-attempt budget still succeeds: the 429 wait is free.
        let client = test_client(&server, 1).await;
        let accounts = client.search_accounts(true).await.unwrap();
        assert_eq!(accounts[0].name, "EVAL-50K");
    }

    #[tokio::test]
    async fn client_errors_fail_fast_with_structured_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Order/place"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errorCode": 5,
                "errorMessage": "Order size exceeds limit"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, 3).await;
        let request = PlaceOrderRequest {
            account_id: 42,
            contract_id: "CON.F.US.MES.U25".to_string(),
            order_type: OrderType::Market,
            side: OrderSide::Buy,
            size: 100,
            limit_price: None,
            stop_price: None,
            trail_price: None,
            custom_tag: None,
            linked_order_id: None,
        };
        let err = client.place_order(&request).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Rejected);
        assert_eq!(err.status, 400);
        assert_eq!(err.error_code, Some(5));
        assert!(err.message.contains("exceeds limit"));
    }

    #[tokio::test]
    async fn non_json_success_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Account/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let client = test_client(&server, 1).await;
        let err = client.search_accounts(true).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn envelope_failure_maps_to_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Order/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "errorCode": 7,
                "errorMessage": "Order already filled"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, 3).await;
        let err = client.cancel_order(42, 99).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Rejected);
        assert_eq!(err.error_code, Some(7));
    }

    #[tokio::test]
    async fn live_contract_search_falls_back_to_non_live() {
        let server = MockServer::start().await;
        let empty = serde_json::json!({
            "contracts": [],
            "success": true,
            "errorCode": 0,
            "errorMessage": null
        });
        let found = serde_json::json!({
            "contracts": [{
                "id": "CON.F.US.MES.U25",
                "name": "MESU25",
                "description": "Micro E-mini S&P 500",
                "tickSize": 0.25,
                "tickValue": 1.25,
                "activeContract": true
            }],
            "success": true,
            "errorCode": 0,
            "errorMessage": null
        });

        Mock::given(method("POST"))
            .and(path("/Contract/search"))
            .and(body_partial_json(serde_json::json!({"live": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Contract/search"))
            .and(body_partial_json(serde_json::json!({"live": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(found))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, 3).await;
        let contracts = client.search_contracts("MES", true).await.unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].symbol(), Some("MES"));
    }

    #[tokio::test]
    async fn instrument_lookup_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Contract/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "contracts": [{
                    "id": "CON.F.US.MNQ.U25",
                    "name": "MNQU25",
                    "description": "Micro E-mini Nasdaq-100",
                    "tickSize": 0.25,
                    "tickValue": 0.5,
                    "activeContract": true
                }],
                "success": true,
                "errorCode": 0,
                "errorMessage": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, 3).await;
        let first = client.instrument("mnq", true).await.unwrap();
        let second = client.instrument("MNQ", true).await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
