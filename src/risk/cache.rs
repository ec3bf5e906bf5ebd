// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for wallet assessments.
//!
//! Wallet checks repeat heavily (the same vendor is assessed for every
//! buyer), so successful assessments are kept for a short TTL. Fallback
//! assessments are never cached.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::types::RiskAssessment;

struct CacheEntry {
    assessment: RiskAssessment,
    inserted_at: Instant,
}

pub struct AssessmentCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl AssessmentCache {
    /// `capacity` is clamped to at least one entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    fn key(address: &str, chain: &str) -> String {
        format!("{}:{}", chain.to_lowercase(), address.to_lowercase())
    }

    /// Cached assessment, or `None` if absent or expired.
    pub fn get(&self, address: &str, chain: &str) -> Option<RiskAssessment> {
        let key = Self::key(address, chain);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.assessment.clone());
            }
            cache.pop(&key);
        }
        None
    }

    pub fn put(&self, address: &str, chain: &str, assessment: &RiskAssessment) {
        if assessment.is_fallback() {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                Self::key(address, chain),
                CacheEntry {
                    assessment: assessment.clone(),
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, address: &str, chain: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&Self::key(address, chain));
        }
    }
}
