//! Two-tier episode memory.
//!
//! Episodes land in a short-term tier and are consolidated into a long-term
//! tier: entries above the promotion threshold are promoted, entries older
//! than the TTL are expired. The engine only sees the [`MemoryStore`] trait,
//! so deployments can swap this for an external service.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::contracts::{
    BackendResult, ConsolidateReport, Episode, EpisodeFilters, MemoryStore,
};

/// Tuning knobs for the tiered store
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Hours an unpromoted short-term episode survives
    pub stm_ttl_hours: i64,
    /// Minimum quality for promotion into the long-term tier
    pub ltm_promotion_threshold: f64,
    /// Hard cap on short-term entries; oldest are dropped beyond this
    pub stm_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            stm_ttl_hours: 24,
            ltm_promotion_threshold: 0.8,
            stm_capacity: 1000,
        }
    }
}

#[derive(Default)]
struct Tiers {
    short_term: Vec<Episode>,
    long_term: Vec<Episode>,
}

/// In-process tiered implementation of [`MemoryStore`]
pub struct TieredMemoryStore {
    config: MemoryConfig,
    tiers: RwLock<Tiers>,
}

impl TieredMemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            tiers: RwLock::new(Tiers::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MemoryConfig::default())
    }

    /// Entry counts per tier (short-term, long-term)
    pub fn tier_sizes(&self) -> (usize, usize) {
        let tiers = self.tiers.read().unwrap_or_else(|p| p.into_inner());
        (tiers.short_term.len(), tiers.long_term.len())
    }

    fn matches(episode: &Episode, query_text: &str, filters: &EpisodeFilters) -> bool {
        if !query_text.is_empty() {
            let needle = query_text.to_lowercase();
            let hit = episode.query_text.to_lowercase().contains(&needle)
                || episode.answer_text.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        if let Some(ref user) = filters.user_id {
            if episode.user_id.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if let Some(ref strategy) = filters.strategy {
            if &episode.strategy_used != strategy {
                return false;
            }
        }
        if let Some(min_quality) = filters.min_quality {
            if episode.quality < min_quality {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl MemoryStore for TieredMemoryStore {
    async fn append(&self, episode: Episode) -> BackendResult<()> {
        let mut tiers = self.tiers.write().unwrap_or_else(|p| p.into_inner());
        debug!(episode_id = %episode.id, session = %episode.session_id, "episode appended");
        tiers.short_term.push(episode);

        let capacity = self.config.stm_capacity;
        if tiers.short_term.len() > capacity {
            let overflow = tiers.short_term.len() - capacity;
            tiers.short_term.drain(..overflow);
        }
        Ok(())
    }

    async fn recent(&self, session_id: Option<&str>, n: usize) -> BackendResult<Vec<Episode>> {
        let tiers = self.tiers.read().unwrap_or_else(|p| p.into_inner());
        let mut episodes: Vec<Episode> = tiers
            .short_term
            .iter()
            .chain(tiers.long_term.iter())
            .filter(|e| session_id.map(|sid| e.session_id == sid).unwrap_or(true))
            .cloned()
            .collect();

        episodes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        episodes.truncate(n);
        Ok(episodes)
    }

    async fn search(
        &self,
        query_text: &str,
        filters: EpisodeFilters,
    ) -> BackendResult<Vec<Episode>> {
        let tiers = self.tiers.read().unwrap_or_else(|p| p.into_inner());
        let mut hits: Vec<Episode> = tiers
            .short_term
            .iter()
            .chain(tiers.long_term.iter())
            .filter(|e| Self::matches(e, query_text, &filters))
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(hits)
    }

    async fn consolidate(&self) -> BackendResult<ConsolidateReport> {
        let mut tiers = self.tiers.write().unwrap_or_else(|p| p.into_inner());
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.stm_ttl_hours);
        let threshold = self.config.ltm_promotion_threshold;

        let mut promoted = Vec::new();
        let mut kept = Vec::new();
        let mut expired = 0usize;

        for episode in tiers.short_term.drain(..) {
            if episode.quality >= threshold {
                promoted.push(episode);
            } else if episode.timestamp < cutoff {
                expired += 1;
            } else {
                kept.push(episode);
            }
        }

        let report = ConsolidateReport {
            promoted: promoted.len(),
            expired,
        };
        tiers.long_term.extend(promoted);
        tiers.short_term = kept;

        if report.promoted > 0 || report.expired > 0 {
            info!(promoted = report.promoted, expired = report.expired, "memory consolidated");
        }
        Ok(report)
    }
}
