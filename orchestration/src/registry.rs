//! Backend registry — capability tags and live health per backend.
//!
//! Built once at startup and passed to dependents; nothing resolves
//! backends through a global. Reads dominate, so health counters sit
//! behind a reader-writer lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use backends::{Capability, CapabilityMap, Health};

/// Identity of a dispatchable backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    ToolServer,
    LocalReasoner,
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolServer => write!(f, "tool_server"),
            Self::LocalReasoner => write!(f, "local_reasoner"),
        }
    }
}

/// Rolling health counters for one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub available: bool,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: u64,
    pub last_status: Health,
}

impl BackendHealth {
    fn healthy() -> Self {
        Self {
            available: true,
            success_count: 0,
            error_count: 0,
            avg_latency_ms: 0,
            last_status: Health::Ok,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn record_success(&mut self, latency_ms: u64) {
        self.avg_latency_ms = (self.avg_latency_ms * self.success_count + latency_ms)
            / (self.success_count + 1);
        self.success_count += 1;
        self.available = true;
        self.last_status = Health::Ok;
    }

    fn record_failure(&mut self) {
        self.error_count += 1;
    }
}

/// Registry entry: identity, advertised capabilities, live health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub id: BackendId,
    pub capabilities: Vec<Capability>,
    pub health: BackendHealth,
}

impl BackendEntry {
    /// Usable means reachable and not failing most of the time.
    pub fn is_usable(&self) -> bool {
        self.health.available && self.health.success_rate() >= 0.5
    }
}

/// Snapshot handed to the pure routing function: capability tags plus
/// availability, nothing that changes under the router's feet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSummary {
    pub id: BackendId,
    pub capabilities: Vec<Capability>,
    pub available: bool,
}

impl BackendSummary {
    pub fn advertises(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Process-wide backend registry
pub struct BackendRegistry {
    entries: RwLock<HashMap<BackendId, BackendEntry>>,
    capability_map: CapabilityMap,
}

impl BackendRegistry {
    /// Registry with the tool server always present and the local reasoner
    /// registered only when enabled.
    pub fn new(capability_map: CapabilityMap, local_reasoner_enabled: bool) -> Self {
        let mut entries = HashMap::new();

        let tool_caps: Vec<Capability> = capability_map.tags();
        entries.insert(
            BackendId::ToolServer,
            BackendEntry {
                id: BackendId::ToolServer,
                capabilities: tool_caps,
                health: BackendHealth::healthy(),
            },
        );

        if local_reasoner_enabled {
            entries.insert(
                BackendId::LocalReasoner,
                BackendEntry {
                    id: BackendId::LocalReasoner,
                    capabilities: vec![
                        Capability::ConversationalResponder,
                        Capability::Retriever,
                    ],
                    health: BackendHealth::healthy(),
                },
            );
        }

        Self {
            entries: RwLock::new(entries),
            capability_map,
        }
    }

    pub fn capability_map(&self) -> &CapabilityMap {
        &self.capability_map
    }

    /// Immutable snapshot for routing; deterministic ordering.
    pub fn summaries(&self) -> Vec<BackendSummary> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<BackendSummary> = entries
            .values()
            .map(|e| BackendSummary {
                id: e.id,
                capabilities: e.capabilities.clone(),
                available: e.is_usable(),
            })
            .collect();
        out.sort_by_key(|s| s.id as u8);
        out
    }

    pub fn entry(&self, id: BackendId) -> Option<BackendEntry> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(&id).cloned()
    }

    pub fn record_success(&self, id: BackendId, latency_ms: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = entries.get_mut(&id) {
            entry.health.record_success(latency_ms);
        }
    }

    pub fn record_failure(&self, id: BackendId) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = entries.get_mut(&id) {
            entry.health.record_failure();
        }
    }

    pub fn set_status(&self, id: BackendId, status: Health) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = entries.get_mut(&id) {
            entry.health.last_status = status;
            entry.health.available = status != Health::Down;
        }
    }

    /// Backends currently advertising a capability, usable first.
    pub fn providers_of(&self, capability: &Capability) -> Vec<BackendId> {
        self.summaries()
            .into_iter()
            .filter(|s| s.available && s.advertises(capability))
            .map(|s| s.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(CapabilityMap::identity(), true)
    }

    #[test]
    fn test_summaries_are_sorted_and_complete() {
        let reg = registry();
        let summaries = reg.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, BackendId::ToolServer);
        assert!(summaries[0].advertises(&Capability::ImageAnalyzer));
        assert!(summaries[1].advertises(&Capability::ConversationalResponder));
    }

    #[test]
    fn test_reasoner_absent_when_disabled() {
        let reg = BackendRegistry::new(CapabilityMap::identity(), false);
        assert_eq!(reg.summaries().len(), 1);
        assert!(reg.entry(BackendId::LocalReasoner).is_none());
    }

    #[test]
    fn test_failures_make_backend_unusable() {
        let reg = registry();
        reg.record_success(BackendId::ToolServer, 20);
        for _ in 0..3 {
            reg.record_failure(BackendId::ToolServer);
        }
        let entry = reg.entry(BackendId::ToolServer).unwrap();
        assert!(entry.health.success_rate() < 0.5);
        assert!(!entry.is_usable());

        let summaries = reg.summaries();
        assert!(!summaries[0].available);
    }

    #[test]
    fn test_down_status_marks_unavailable() {
        let reg = registry();
        reg.set_status(BackendId::ToolServer, Health::Down);
        assert!(reg.providers_of(&Capability::Retriever).is_empty() || {
            // reasoner also advertises retriever and stays usable
            reg.providers_of(&Capability::Retriever) == vec![BackendId::LocalReasoner]
        });
        reg.set_status(BackendId::ToolServer, Health::Ok);
        assert!(reg
            .providers_of(&Capability::Retriever)
            .contains(&BackendId::ToolServer));
    }
}
