//! Wire types for the ProjectX gateway REST API.
//!
//! Every response carries a `{success, errorCode, errorMessage}` envelope;
//! only `success == true && errorCode == 0` counts as fully successful.
//! Sides and order types travel as numeric codes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Common accessors over the gateway response envelope.
pub trait Envelope {
    fn success(&self) -> bool;
    fn error_code(&self) -> i64;
    fn error_message(&self) -> Option<&str>;
}

macro_rules! impl_envelope {
    ($($ty:ty),+ $(,)?) => {
        $(impl Envelope for $ty {
            fn success(&self) -> bool {
                self.success
            }
            fn error_code(&self) -> i64 {
                self.error_code
            }
            fn error_message(&self) -> Option<&str> {
                self.error_message.as_deref()
            }
        })+
    };
}

// ==================== Authentication ====================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginKeyRequest {
    pub user_name: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAppRequest {
    pub user_name: String,
    pub password: String,
    pub device_id: String,
    pub app_id: String,
    pub verify_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ==================== Accounts ====================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSearchRequest {
    pub only_active_accounts: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub balance: Decimal,
    pub can_trade: bool,
    pub is_visible: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSearchResponse {
    #[serde(default)]
    pub accounts: Vec<Account>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ==================== Contracts ====================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSearchRequest {
    pub search_text: String,
    pub live: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractByIdRequest {
    pub contract_id: String,
}

/// A tradable instrument, e.g. `CON.F.US.MES.U25`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tick_size: Decimal,
    pub tick_value: Decimal,
    pub active_contract: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSearchResponse {
    #[serde(default)]
    pub contracts: Vec<Contract>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractByIdResponse {
    #[serde(default)]
    pub contract: Option<Contract>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ==================== Orders ====================

/// Order side as the gateway encodes it: 0 = buy, 1 = sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn code(self) -> i32 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(OrderSide::Buy),
            1 => Some(OrderSide::Sell),
            _ => None,
        }
    }

    /// The side that flattens this one.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl Serialize for OrderSide {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for OrderSide {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        OrderSide::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown order side code {code}")))
    }
}

/// Order type codes: 1 limit, 2 market, 3 stop-limit, 4 stop, 5 trailing stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    Stop,
    TrailingStop,
}

impl OrderType {
    pub fn code(self) -> i32 {
        match self {
            OrderType::Limit => 1,
            OrderType::Market => 2,
            OrderType::StopLimit => 3,
            OrderType::Stop => 4,
            OrderType::TrailingStop => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(OrderType::Limit),
            2 => Some(OrderType::Market),
            3 => Some(OrderType::StopLimit),
            4 => Some(OrderType::Stop),
            5 => Some(OrderType::TrailingStop),
            _ => None,
        }
    }
}

impl Serialize for OrderType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for OrderType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        OrderType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown order type code {code}")))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub account_id: i64,
    pub contract_id: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub size: u32,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub limit_price: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub stop_price: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub trail_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_order_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    #[serde(default)]
    pub order_id: i64,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub account_id: i64,
    pub order_id: i64,
}

/// Envelope-only response for operations returning no payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderSearchRequest {
    pub account_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub update_timestamp: Option<DateTime<Utc>>,
    pub status: i32,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub size: u32,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSearchResponse {
    #[serde(default)]
    pub orders: Vec<Order>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ==================== Positions ====================

/// Position direction: 1 = long, 2 = short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionType {
    Long,
    Short,
}

impl PositionType {
    pub fn code(self) -> i32 {
        match self {
            PositionType::Long => 1,
            PositionType::Short => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(PositionType::Long),
            2 => Some(PositionType::Short),
            _ => None,
        }
    }
}

impl Serialize for PositionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for PositionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        PositionType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown position type code {code}")))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSearchRequest {
    pub account_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub size: u32,
    pub average_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSearchResponse {
    #[serde(default)]
    pub positions: Vec<PositionRecord>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    pub account_id: i64,
    pub contract_id: String,
}

// ==================== Trades ====================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSearchRequest {
    pub account_id: i64,
    pub start_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,
}

/// A half-turn or round-turn fill. `profit_and_loss` is absent on fills
/// that open or extend a position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    pub creation_timestamp: DateTime<Utc>,
    pub price: Decimal,
    #[serde(default)]
    pub profit_and_loss: Option<Decimal>,
    #[serde(default)]
    pub fees: Decimal,
    pub side: OrderSide,
    pub size: u32,
    #[serde(default)]
    pub voided: bool,
    pub order_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSearchResponse {
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ==================== History ====================

/// Bar aggregation unit: 1 second, 2 minute, 3 hour, 4 day, 5 week, 6 month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl BarUnit {
    pub fn code(self) -> i32 {
        match self {
            BarUnit::Second => 1,
            BarUnit::Minute => 2,
            BarUnit::Hour => 3,
            BarUnit::Day => 4,
            BarUnit::Week => 5,
            BarUnit::Month => 6,
        }
    }
}

impl Serialize for BarUnit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveBarsRequest {
    pub contract_id: String,
    pub live: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub unit: BarUnit,
    pub unit_number: u32,
    pub limit: u32,
    pub include_partial_bar: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveBarsResponse {
    #[serde(default)]
    pub bars: Vec<Bar>,
    pub success: bool,
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl_envelope!(
    TokenResponse,
    AccountSearchResponse,
    ContractSearchResponse,
    ContractByIdResponse,
    PlaceOrderResponse,
    StatusResponse,
    OrderSearchResponse,
    PositionSearchResponse,
    TradeSearchResponse,
    RetrieveBarsResponse,
);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_request_serializes_numeric_codes() {
        let request = PlaceOrderRequest {
            account_id: 42,
            contract_id: "CON.F.US.MES.U25".to_string(),
            order_type: OrderType::Limit,
            side: OrderSide::Sell,
            size: 2,
            limit_price: Some(dec!(4512.25)),
            stop_price: None,
            trail_price: None,
            custom_tag: None,
            linked_order_id: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["side"], 1);
        assert_eq!(value["limitPrice"], 4512.25);
        assert!(value.get("stopPrice").is_none());
    }

    #[test]
    fn position_response_parses_numeric_side() {
        let body = serde_json::json!({
            "positions": [{
                "id": 9,
                "accountId": 42,
                "contractId": "CON.F.US.MNQ.U25",
                "creationTimestamp": "2024-06-03T14:05:00Z",
                "type": 2,
                "size": 3,
                "averagePrice": 18250.5
            }],
            "success": true,
            "errorCode": 0,
            "errorMessage": null
        });

        let parsed: PositionSearchResponse = serde_json::from_value(body).unwrap();
        assert!(parsed.success());
        let position = &parsed.positions[0];
        assert_eq!(position.position_type, PositionType::Short);
        assert_eq!(position.average_price, dec!(18250.5));
    }

    #[test]
    fn unknown_side_code_is_an_error() {
        let err = serde_json::from_value::<OrderSide>(serde_json::json!(7));
        assert!(err.is_err());
    }

    #[test]
    fn envelope_error_fields_surface() {
        let body = serde_json::json!({
            "orderId": 0,
            "success": false,
            "errorCode": 3,
            "errorMessage": "Insufficient margin"
        });
        let parsed: PlaceOrderResponse = serde_json::from_value(body).unwrap();
        assert!(!parsed.success());
        assert_eq!(parsed.error_code(), 3);
        assert_eq!(parsed.error_message(), Some("Insufficient margin"));
    }
}
