// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Risk signal aggregation.
//!
//! This module provides functionality for:
//! - The `SignalProvider` strategy trait and its null object
//! - REST and JSON-RPC tool-call provider transports
//! - Score composition into a single `RiskAssessment`
//! - A short-lived LRU cache for wallet assessments

pub mod aggregator;
pub mod cache;
pub mod http;
pub mod provider;
pub mod tool;
pub mod types;

pub use aggregator::{RiskSignalAggregator, DEFAULT_SIGNAL_TIMEOUT, STANDARD_TRANSFER_NOTE};
pub use cache::AssessmentCache;
pub use http::HttpSignalProvider;
pub use provider::{NullSignalProvider, SignalProvider, SignalProviderError};
pub use tool::ToolCallSignalProvider;
pub use types::{EnhancedAssessment, RiskAssessment, RiskLevel, SignalReport};
