//! Feature flags with per-user rollout.
//!
//! A flag is a name mapped to an enablement rule: `All`, `Percentage`
//! (stable-hash bucketing on user id), or `Whitelist`. `is_enabled` is pure;
//! the table itself is the only persisted engine state besides the
//! participant registry, written as a small JSON file with atomic replace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::info;

use crate::config::FlagConfig;
use crate::error::CoreResult;
use crate::persist;

/// How a flag applies across users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutRule {
    All,
    Percentage,
    Whitelist,
}

impl RolloutRule {
    fn from_name(name: &str) -> Self {
        match name {
            "percentage" => Self::Percentage,
            "whitelist" => Self::Whitelist,
            _ => Self::All,
        }
    }
}

/// A single feature flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    pub rule: RolloutRule,
    pub rollout_percentage: f64,
    pub whitelist: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureFlag {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: false,
            rule: RolloutRule::All,
            rollout_percentage: 100.0,
            whitelist: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn from_config(name: &str, cfg: &FlagConfig) -> Self {
        Self {
            name: name.to_string(),
            enabled: cfg.enabled,
            rule: RolloutRule::from_name(&cfg.strategy),
            rollout_percentage: cfg.rollout_percentage.clamp(0.0, 100.0),
            whitelist: cfg.whitelist.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Pure per-user check.
    pub fn is_enabled_for(&self, user_id: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.rule {
            RolloutRule::All => true,
            RolloutRule::Whitelist => user_id
                .map(|uid| self.whitelist.iter().any(|w| w == uid))
                .unwrap_or(false),
            RolloutRule::Percentage => user_id
                .map(|uid| (stable_bucket(uid) as f64) < self.rollout_percentage)
                .unwrap_or(false),
        }
    }
}

/// Stable 0..100 bucket for a user id. Must not vary across processes, so
/// this is a fixed FNV-1a fold rather than the std hasher.
fn stable_bucket(user_id: &str) -> u8 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in user_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % 100) as u8
}

/// Process-wide flag table with JSON persistence
pub struct FlagStore {
    flags: RwLock<BTreeMap<String, FeatureFlag>>,
    path: Option<PathBuf>,
}

impl FlagStore {
    /// Build from configuration, preferring a previously persisted table
    /// when one exists on disk.
    pub fn open(
        config: &BTreeMap<String, FlagConfig>,
        path: Option<PathBuf>,
    ) -> CoreResult<Self> {
        let mut flags: BTreeMap<String, FeatureFlag> = config
            .iter()
            .map(|(name, cfg)| (name.clone(), FeatureFlag::from_config(name, cfg)))
            .collect();

        if let Some(ref p) = path {
            if let Some(saved) = persist::load_json::<Vec<FeatureFlag>>(p)? {
                for flag in saved {
                    flags.insert(flag.name.clone(), flag);
                }
                info!(count = flags.len(), "feature flags restored from disk");
            }
        }

        Ok(Self {
            flags: RwLock::new(flags),
            path,
        })
    }

    /// Memory-only table, used by tests. Builds straight from configuration
    /// without touching the fallible persistence path.
    pub fn ephemeral(config: &BTreeMap<String, FlagConfig>) -> Self {
        let flags = config
            .iter()
            .map(|(name, cfg)| (name.clone(), FeatureFlag::from_config(name, cfg)))
            .collect();
        Self {
            flags: RwLock::new(flags),
            path: None,
        }
    }

    pub fn is_enabled(&self, name: &str, user_id: Option<&str>) -> bool {
        let flags = self.flags.read().unwrap_or_else(|p| p.into_inner());
        flags
            .get(name)
            .map(|f| f.is_enabled_for(user_id))
            .unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<FeatureFlag> {
        let flags = self.flags.read().unwrap_or_else(|p| p.into_inner());
        flags.get(name).cloned()
    }

    pub fn list(&self) -> Vec<FeatureFlag> {
        let flags = self.flags.read().unwrap_or_else(|p| p.into_inner());
        flags.values().cloned().collect()
    }

    /// Toggle a flag, creating it with the `All` rule when unknown.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> CoreResult<()> {
        {
            let mut flags = self.flags.write().unwrap_or_else(|p| p.into_inner());
            let flag = flags
                .entry(name.to_string())
                .or_insert_with(|| FeatureFlag::new(name));
            flag.enabled = enabled;
            flag.updated_at = Utc::now();
        }
        info!(flag = name, enabled, "feature flag updated");
        self.save()
    }

    pub fn set_rollout_percentage(&self, name: &str, percentage: f64) -> CoreResult<()> {
        {
            let mut flags = self.flags.write().unwrap_or_else(|p| p.into_inner());
            let flag = flags
                .entry(name.to_string())
                .or_insert_with(|| FeatureFlag::new(name));
            flag.rule = RolloutRule::Percentage;
            flag.rollout_percentage = percentage.clamp(0.0, 100.0);
            flag.updated_at = Utc::now();
        }
        self.save()
    }

    fn save(&self) -> CoreResult<()> {
        if let Some(ref path) = self.path {
            let flags = self.flags.read().unwrap_or_else(|p| p.into_inner());
            let list: Vec<&FeatureFlag> = flags.values().collect();
            persist::save_json_atomic(path, &list)?;
        }
        Ok(())
    }
}
