//! Backend adapters for the orchestration engine.
//!
//! Three external collaborators sit behind the traits in [`contracts`]:
//! the remote tool server, the local generative reasoner, and the episode
//! memory store. [`capability`] maps the engine's logical capability tags
//! to concrete tool names.

pub mod capability;
pub mod contracts;
pub mod memory;
pub mod reasoner;
pub mod tool_server;

pub use capability::{Capability, CapabilityMap};
pub use contracts::{
    BackendError, BackendResult, CallerIdentity, ConsolidateReport, Episode, EpisodeFilters,
    EpisodeStatus, Health, LocalReasoner, MemoryStore, ReasonerReply, ReasonerStats,
    ToolCallOutcome, ToolDefinition, ToolServer,
};
pub use memory::{MemoryConfig, TieredMemoryStore};
pub use reasoner::HttpReasoner;
pub use tool_server::HttpToolServer;
