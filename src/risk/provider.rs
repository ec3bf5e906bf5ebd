// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pluggable risk signal sources.
//!
//! Providers never fail outward: every error is logged and surfaces as
//! `None`, which the aggregator treats as "no usable signal".

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::types::{RiskLevel, SignalReport};

/// Internal provider failure. Logged, never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum SignalProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Strategy interface over one external risk source.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Threat-risk signal for a wallet.
    async fn check_wallet_safety(&self, address: &str, chain: &str) -> Option<SignalReport>;

    async fn check_contract_safety(&self, address: &str, chain: &str) -> Option<SignalReport>;

    async fn check_url_safety(&self, url: &str) -> Option<SignalReport>;
}

/// Provider used when no risk source is configured. Always yields `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSignalProvider;

#[async_trait]
impl SignalProvider for NullSignalProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn check_wallet_safety(&self, _address: &str, _chain: &str) -> Option<SignalReport> {
        None
    }

    async fn check_contract_safety(&self, _address: &str, _chain: &str) -> Option<SignalReport> {
        None
    }

    async fn check_url_safety(&self, _url: &str) -> Option<SignalReport> {
        None
    }
}

/// Log a provider failure and convert it to `None`.
pub(crate) fn report_or_log(
    provider: &str,
    check: &str,
    result: Result<SignalReport, SignalProviderError>,
) -> Option<SignalReport> {
    match result {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(provider, check, error = %e, "Risk signal provider failed");
            None
        }
    }
}

/// Decode a provider body into a [`SignalReport`].
///
/// Accepts the fields at the top level or under `data`, in camelCase or
/// snake_case. A body with neither a score nor a level is rejected.
pub fn parse_report(body: &Value) -> Result<SignalReport, SignalProviderError> {
    let body = match body.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => body,
    };
    if !body.is_object() {
        return Err(SignalProviderError::InvalidResponse(
            "expected a JSON object".to_string(),
        ));
    }

    let risk_score = match field(body, "riskScore", "risk_score") {
        Some(v) => Some(v.as_f64().filter(|s| s.is_finite()).ok_or_else(|| {
            SignalProviderError::InvalidResponse(format!("riskScore is not a number: {v}"))
        })?),
        None => None,
    };
    let risk_level = field(body, "riskLevel", "risk_level")
        .and_then(Value::as_str)
        .and_then(RiskLevel::parse);

    if risk_score.is_none() && risk_level.is_none() {
        return Err(SignalProviderError::InvalidResponse(
            "neither riskScore nor riskLevel present".to_string(),
        ));
    }

    let reasons = field(body, "reasons", "reasons")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(SignalReport {
        risk_score,
        risk_level,
        reasons,
    })
}

fn field<'a>(body: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    body.get(camel)
        .or_else(|| body.get(snake))
        .filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_top_level_and_wrapped_bodies() {
        let top = parse_report(&json!({
            "riskScore": 35,
            "riskLevel": "HIGH",
            "reasons": ["Interacted with mixer", 7]
        }))
        .unwrap();
        assert_eq!(top.risk_score, Some(35.0));
        assert_eq!(top.risk_level, Some(RiskLevel::High));
        assert_eq!(top.reasons, vec!["Interacted with mixer"]);

        let wrapped = parse_report(&json!({"data": {"risk_level": "low"}})).unwrap();
        assert_eq!(wrapped.risk_score, None);
        assert_eq!(wrapped.risk_level, Some(RiskLevel::Low));
        assert!(wrapped.reasons.is_empty());
    }

    #[test]
    fn rejects_bodies_without_signal() {
        assert!(parse_report(&json!({"reasons": ["hmm"]})).is_err());
        assert!(parse_report(&json!({"riskLevel": "unheard-of"})).is_err());
        assert!(parse_report(&json!({"riskScore": "high"})).is_err());
        assert!(parse_report(&json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn null_provider_yields_nothing() {
        let provider = NullSignalProvider;
        assert!(provider.check_wallet_safety("0xabc", "avalanche").await.is_none());
        assert!(provider.check_contract_safety("0xabc", "avalanche").await.is_none());
        assert!(provider.check_url_safety("https://example.com").await.is_none());
    }
}
