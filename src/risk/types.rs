// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Risk levels, provider reports, and aggregated assessments.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider name recorded on the neutral fallback assessment.
pub const FALLBACK_PROVIDER: &str = "fallback";

/// Score given when no provider produced a usable signal.
pub const FALLBACK_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// `>=80 low, >=60 medium, >=30 high, else critical`.
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => RiskLevel::Low,
            60..=79 => RiskLevel::Medium,
            30..=59 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Ordering used to pick the worst of several assessments.
    pub fn priority(self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }

    /// Points subtracted when a provider reports only a level.
    pub fn penalty(self) -> f64 {
        match self {
            RiskLevel::Low => 0.0,
            RiskLevel::Medium => 20.0,
            RiskLevel::High => 50.0,
            RiskLevel::Critical => 80.0,
        }
    }

    /// Case-insensitive parse of a provider label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            RiskLevel::Low => "Safe to proceed with direct transfer",
            RiskLevel::Medium => "Proceed with escrow protection",
            RiskLevel::High => "Use escrow and verify the counterparty before releasing funds",
            RiskLevel::Critical => "Block this transaction",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one provider said about one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalReport {
    pub risk_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub reasons: Vec<String>,
}

impl SignalReport {
    /// Points this report subtracts from the starting score of 100.
    pub fn penalty(&self) -> f64 {
        match (self.risk_score, self.risk_level) {
            (Some(score), _) => score,
            (None, Some(level)) => level.penalty(),
            (None, None) => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentMetadata {
    pub providers: Vec<String>,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    /// Always within `0..=100`; `risk_level` is derived from it.
    pub score: u8,
    pub reasons: Vec<String>,
    pub recommendation: String,
    pub metadata: AssessmentMetadata,
}

impl RiskAssessment {
    /// Combine provider reports: start at 100, subtract each penalty, clamp.
    pub fn from_reports<'a>(
        reports: impl IntoIterator<Item = (&'a str, &'a SignalReport)>,
        elapsed: Duration,
    ) -> Self {
        let mut score = 100.0;
        let mut providers = Vec::new();
        let mut reasons = Vec::new();

        for (name, report) in reports {
            score -= report.penalty();
            providers.push(name.to_string());
            reasons.extend(report.reasons.iter().cloned());
        }

        let score = clamp_score(score);
        let risk_level = RiskLevel::from_score(score);
        if reasons.is_empty() {
            reasons.push("No risk signals reported".to_string());
        }

        Self {
            risk_level,
            score,
            reasons,
            recommendation: risk_level.recommendation().to_string(),
            metadata: AssessmentMetadata {
                providers,
                response_time_ms: elapsed.as_millis() as u64,
                timestamp: Utc::now(),
            },
        }
    }

    /// Neutral assessment used whenever signals are unavailable.
    ///
    /// The level is pinned to medium rather than derived from the score.
    pub fn fallback(elapsed: Duration) -> Self {
        let risk_level = RiskLevel::Medium;
        Self {
            risk_level,
            score: FALLBACK_SCORE,
            reasons: vec!["Risk signals unavailable; using neutral assessment".to_string()],
            recommendation: risk_level.recommendation().to_string(),
            metadata: AssessmentMetadata {
                providers: vec![FALLBACK_PROVIDER.to_string()],
                response_time_ms: elapsed.as_millis() as u64,
                timestamp: Utc::now(),
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.providers == [FALLBACK_PROVIDER]
    }
}

fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0).round() as u8
}

/// Buyer, vendor and transfer assessments plus the worst of the three.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedAssessment {
    pub overall: RiskAssessment,
    pub buyer: RiskAssessment,
    pub vendor: RiskAssessment,
    pub transaction: RiskAssessment,
}

/// Highest priority wins; on ties the earliest entry is kept.
pub fn worst_of<'a>(assessments: &[&'a RiskAssessment]) -> Option<&'a RiskAssessment> {
    assessments.iter().copied().fold(None, |worst, candidate| match worst {
        Some(w) if w.risk_level.priority() >= candidate.risk_level.priority() => Some(w),
        _ => Some(candidate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(score: Option<f64>, level: Option<RiskLevel>) -> SignalReport {
        SignalReport {
            risk_score: score,
            risk_level: level,
            reasons: vec![],
        }
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(79), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Critical);
    }

    #[test]
    fn numeric_score_takes_precedence_over_level() {
        let r = report(Some(5.0), Some(RiskLevel::Critical));
        assert_eq!(r.penalty(), 5.0);
        assert_eq!(report(None, Some(RiskLevel::High)).penalty(), 50.0);
        assert_eq!(report(None, None).penalty(), 0.0);
    }

    #[test]
    fn composition_clamps_to_range() {
        let a = report(Some(70.0), None);
        let b = report(None, Some(RiskLevel::Critical));
        let assessment =
            RiskAssessment::from_reports([("a", &a), ("b", &b)], Duration::from_millis(12));
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert_eq!(assessment.metadata.providers, vec!["a", "b"]);

        let bonus = report(Some(-40.0), None);
        let assessment = RiskAssessment::from_reports([("x", &bonus)], Duration::ZERO);
        assert_eq!(assessment.score, 100);
    }

    #[test]
    fn single_medium_report_still_scores_low() {
        let r = SignalReport {
            risk_score: None,
            risk_level: Some(RiskLevel::Medium),
            reasons: vec!["New wallet".to_string()],
        };
        let assessment = RiskAssessment::from_reports([("p", &r)], Duration::ZERO);
        assert_eq!(assessment.score, 80);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.reasons, vec!["New wallet"]);
    }

    #[test]
    fn fallback_shape() {
        let fallback = RiskAssessment::fallback(Duration::from_millis(3));
        assert_eq!(fallback.score, 50);
        assert_eq!(fallback.risk_level, RiskLevel::Medium);
        assert_eq!(fallback.metadata.providers, vec!["fallback"]);
        assert!(fallback.is_fallback());
    }

    #[test]
    fn worst_of_keeps_first_on_tie() {
        let mut high_a = RiskAssessment::fallback(Duration::ZERO);
        high_a.risk_level = RiskLevel::High;
        high_a.reasons = vec!["a".into()];
        let mut high_b = high_a.clone();
        high_b.reasons = vec!["b".into()];
        let low = RiskAssessment::from_reports(std::iter::empty(), Duration::ZERO);

        let worst = worst_of(&[&low, &high_a, &high_b]).unwrap();
        assert_eq!(worst.reasons, vec!["a"]);
        assert!(worst_of(&[]).is_none());
    }

    #[test]
    fn level_labels() {
        assert_eq!(RiskLevel::parse(" HIGH "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("severe"), None);
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"critical\""
        );
    }
}
