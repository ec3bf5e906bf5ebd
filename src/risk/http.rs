// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! REST risk provider.
//!
//! `POST {base}/v1/threat-risk`, `/v1/contract-risk` and `/v1/url-risk`
//! with an `X-API-Key` header; the body shape is decoded by
//! [`parse_report`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use zeroize::Zeroizing;

use super::provider::{parse_report, report_or_log, SignalProvider, SignalProviderError};
use super::types::SignalReport;

pub struct HttpSignalProvider {
    name: String,
    base_url: String,
    api_key: Zeroizing<String>,
    http: Client,
}

impl fmt::Debug for HttpSignalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSignalProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpSignalProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SignalProviderError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| SignalProviderError::Request(format!("invalid base URL: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignalProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: Zeroizing::new(api_key.into()),
            http,
        })
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, SignalProviderError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("X-API-Key", self.api_key.as_str())
            .json(payload)
            .send()
            .await
            .map_err(|e| SignalProviderError::Request(format!("POST {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SignalProviderError::Status { status, body });
        }

        response.json().await.map_err(|e| {
            SignalProviderError::InvalidResponse(format!("POST {path} invalid JSON: {e}"))
        })
    }

    async fn check(&self, path: &str, payload: Value) -> Result<SignalReport, SignalProviderError> {
        let body = self.post_json(path, &payload).await?;
        parse_report(&body)
    }
}

#[async_trait]
impl SignalProvider for HttpSignalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_wallet_safety(&self, address: &str, chain: &str) -> Option<SignalReport> {
        let result = self
            .check("/v1/threat-risk", json!({ "address": address, "chain": chain }))
            .await;
        report_or_log(&self.name, "wallet", result)
    }

    async fn check_contract_safety(&self, address: &str, chain: &str) -> Option<SignalReport> {
        let result = self
            .check("/v1/contract-risk", json!({ "address": address, "chain": chain }))
            .await;
        report_or_log(&self.name, "contract", result)
    }

    async fn check_url_safety(&self, url: &str) -> Option<SignalReport> {
        let result = self.check("/v1/url-risk", json!({ "url": url })).await;
        report_or_log(&self.name, "url", result)
    }
}
