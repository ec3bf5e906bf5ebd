// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Risk provider reached through a JSON-RPC tool-call server.
//!
//! Each check is a `tools/call` request naming one of the tools below. The
//! result is read from `structuredContent` when present, otherwise from
//! the first `text` content item, which must hold a JSON report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use zeroize::Zeroizing;

use super::provider::{parse_report, report_or_log, SignalProvider, SignalProviderError};
use super::types::SignalReport;

pub const WALLET_TOOL: &str = "check_wallet_safety";
pub const CONTRACT_TOOL: &str = "check_contract_safety";
pub const URL_TOOL: &str = "check_url_safety";

pub struct ToolCallSignalProvider {
    name: String,
    endpoint: String,
    api_key: Option<Zeroizing<String>>,
    http: Client,
    next_id: AtomicU64,
}

impl fmt::Debug for ToolCallSignalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallSignalProvider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ToolCallSignalProvider {
    pub fn new(
        name: impl Into<String>,
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SignalProviderError> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| SignalProviderError::Request(format!("invalid endpoint: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignalProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            endpoint: parsed.to_string(),
            api_key: api_key.map(Zeroizing::new),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<SignalReport, SignalProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments },
        });

        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SignalProviderError::Request(format!("{tool} call failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SignalProviderError::Status { status, body });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| SignalProviderError::InvalidResponse(format!("{tool}: invalid JSON: {e}")))?;
        parse_tool_result(&envelope)
    }
}

/// Extract the report from a JSON-RPC `tools/call` response envelope.
pub fn parse_tool_result(envelope: &Value) -> Result<SignalReport, SignalProviderError> {
    if let Some(error) = envelope.get("error") {
        return Err(SignalProviderError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    let result = envelope
        .get("result")
        .ok_or_else(|| SignalProviderError::InvalidResponse("missing result".to_string()))?;

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(SignalProviderError::InvalidResponse(
            "tool reported an error".to_string(),
        ));
    }

    if let Some(structured) = result.get("structuredContent") {
        return parse_report(structured);
    }

    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                (item.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| item.get("text").and_then(Value::as_str))
                    .flatten()
            })
        })
        .ok_or_else(|| SignalProviderError::InvalidResponse("no text content".to_string()))?;

    let body: Value = serde_json::from_str(text)
        .map_err(|e| SignalProviderError::InvalidResponse(format!("text content is not JSON: {e}")))?;
    parse_report(&body)
}

#[async_trait]
impl SignalProvider for ToolCallSignalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_wallet_safety(&self, address: &str, chain: &str) -> Option<SignalReport> {
        let result = self
            .call_tool(WALLET_TOOL, json!({ "address": address, "chain": chain }))
            .await;
        report_or_log(&self.name, WALLET_TOOL, result)
    }

    async fn check_contract_safety(&self, address: &str, chain: &str) -> Option<SignalReport> {
        let result = self
            .call_tool(CONTRACT_TOOL, json!({ "address": address, "chain": chain }))
            .await;
        report_or_log(&self.name, CONTRACT_TOOL, result)
    }

    async fn check_url_safety(&self, url: &str) -> Option<SignalReport> {
        let result = self.call_tool(URL_TOOL, json!({ "url": url })).await;
        report_or_log(&self.name, URL_TOOL, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::http::tests::serve_once;
    use crate::risk::types::RiskLevel;

    #[test]
    fn reads_text_content() {
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "content": [
                    { "type": "image", "data": "..." },
                    { "type": "text", "text": "{\"riskScore\": 55, \"reasons\": [\"Phishing reports\"]}" }
                ]
            }
        });
        let report = parse_tool_result(&envelope).unwrap();
        assert_eq!(report.risk_score, Some(55.0));
        assert_eq!(report.reasons, vec!["Phishing reports"]);
    }

    #[test]
    fn prefers_structured_content() {
        let envelope = json!({
            "result": {
                "structuredContent": { "riskLevel": "medium" },
                "content": [{ "type": "text", "text": "not json" }]
            }
        });
        let report = parse_tool_result(&envelope).unwrap();
        assert_eq!(report.risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn surfaces_rpc_and_tool_errors() {
        let rpc = parse_tool_result(&json!({
            "error": { "code": -32601, "message": "Method not found" }
        }));
        assert!(matches!(rpc, Err(SignalProviderError::Rpc { code: -32601, .. })));

        let tool = parse_tool_result(&json!({
            "result": { "isError": true, "content": [] }
        }));
        assert!(tool.is_err());

        assert!(parse_tool_result(&json!({ "result": { "content": [] } })).is_err());
    }

    #[tokio::test]
    async fn sends_tools_call_request() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "structuredContent": { "riskScore": 90, "riskLevel": "critical" } }
        })
        .to_string();
        let (base, server) = serve_once("200 OK", body).await;
        let provider = ToolCallSignalProvider::new(
            "tool",
            &format!("{base}/rpc"),
            Some("token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let report = provider
            .check_contract_safety("0xfeed", "avalanche")
            .await
            .unwrap();
        assert_eq!(report.risk_score, Some(90.0));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /rpc "));
        assert!(request.contains("\"method\":\"tools/call\""));
        assert!(request.contains(CONTRACT_TOOL));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer token"));
    }
}
