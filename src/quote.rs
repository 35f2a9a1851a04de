//! Swap route feasibility check against an external quote API

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result as EyreResult, WrapErr};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::RelayerError;

/// Default quote service base URL
pub const DEFAULT_QUOTE_API_URL: &str = "https://quote-api.jup.ag/v6";

/// Result of a route check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteCheck {
    /// A route exists. `minimum_out` accounts for the requested slippage.
    Feasible { out_amount: u64, minimum_out: u64 },
    Infeasible,
}

#[async_trait]
pub trait RouteChecker: Send + Sync {
    async fn check_route(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<RouteCheck, RelayerError>;
}

/// Quote response fields used for the feasibility decision
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default)]
    out_amount: Option<String>,
    #[serde(default)]
    other_amount_threshold: Option<String>,
}

/// `amount` reduced by `slippage_bps`, rounded down
pub fn apply_slippage(amount: u64, slippage_bps: u16) -> u64 {
    let kept = 10_000u128.saturating_sub(slippage_bps as u128);
    ((amount as u128 * kept) / 10_000) as u64
}

pub struct HttpRouteChecker {
    base_url: String,
    client: Client,
}

impl HttpRouteChecker {
    pub fn new(base_url: &str, timeout: Duration) -> EyreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl RouteChecker for HttpRouteChecker {
    async fn check_route(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<RouteCheck, RelayerError> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", max_slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Quote request failed");
                RelayerError::infrastructure(format!("quote service unreachable: {}", e))
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RelayerError::infrastructure(format!(
                "quote service returned {}",
                status
            )));
        }
        if !status.is_success() {
            // The quote API answers 4xx when no route exists
            debug!(%status, input_mint, output_mint, "No route from quote service");
            return Ok(RouteCheck::Infeasible);
        }

        let quote: QuoteResponse = response.json().await.map_err(|e| {
            RelayerError::infrastructure(format!("invalid quote response: {}", e))
        })?;
        Ok(evaluate_quote(&quote, max_slippage_bps))
    }
}

fn evaluate_quote(quote: &QuoteResponse, max_slippage_bps: u16) -> RouteCheck {
    let out_amount = quote
        .out_amount
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if out_amount == 0 {
        return RouteCheck::Infeasible;
    }
    let minimum_out = quote
        .other_amount_threshold
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or_else(|| apply_slippage(out_amount, max_slippage_bps));
    RouteCheck::Feasible {
        out_amount,
        minimum_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(out: Option<&str>, threshold: Option<&str>) -> QuoteResponse {
        QuoteResponse {
            out_amount: out.map(str::to_string),
            other_amount_threshold: threshold.map(str::to_string),
        }
    }

    #[test]
    fn test_zero_or_missing_out_amount_is_infeasible() {
        assert_eq!(evaluate_quote(&quote(None, None), 50), RouteCheck::Infeasible);
        assert_eq!(evaluate_quote(&quote(Some("0"), None), 50), RouteCheck::Infeasible);
        assert_eq!(
            evaluate_quote(&quote(Some("garbage"), None), 50),
            RouteCheck::Infeasible
        );
    }

    #[test]
    fn test_threshold_preferred_over_computed_minimum() {
        assert_eq!(
            evaluate_quote(&quote(Some("1000"), Some("990")), 50),
            RouteCheck::Feasible {
                out_amount: 1000,
                minimum_out: 990
            }
        );
        assert_eq!(
            evaluate_quote(&quote(Some("1000"), None), 50),
            RouteCheck::Feasible {
                out_amount: 1000,
                minimum_out: 995
            }
        );
    }

    #[test]
    fn test_apply_slippage() {
        assert_eq!(apply_slippage(10_000, 0), 10_000);
        assert_eq!(apply_slippage(10_000, 5_000), 5_000);
        assert_eq!(apply_slippage(999, 100), 989);
        assert_eq!(apply_slippage(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_quote_response_parses_camel_case() {
        let parsed: QuoteResponse =
            serde_json::from_str(r#"{"outAmount":"42","otherAmountThreshold":"40","routePlan":[]}"#)
                .unwrap();
        assert_eq!(parsed.out_amount.as_deref(), Some("42"));
        assert_eq!(parsed.other_amount_threshold.as_deref(), Some("40"));
    }
}
