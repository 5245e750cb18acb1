//! ProjectX gateway integration.
//!
//! Provides the authenticated, rate-limited, retrying REST pipeline:
//! - Token lifecycle with single-flight refresh
//! - Per-lane sliding-window admission control
//! - One request primitive with a closed failure taxonomy
//! - Typed operations (accounts, contracts, orders, positions, trades, bars)

mod auth;
mod client;
mod error;
mod rate_limit;
mod types;

pub use auth::{CredentialAuthority, Token};
pub use client::{GatewayClient, Lane};
pub use error::{FailureKind, GatewayError, GatewayResult};
pub use rate_limit::RateLimiter;
pub use types::*;
