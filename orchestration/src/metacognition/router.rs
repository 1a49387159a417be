//! Routing policy.
//!
//! A pure function over `(MetaState, available backends, options)`: the same
//! triple always yields the same decision. Order of checks: modality first,
//! then the strategy arm over complexity bands, then the ensemble rule.

use backends::Capability;

use crate::query::{Modality, QueryOptions};
use crate::registry::{BackendId, BackendSummary};

use super::{DecisionStrategy, MetaState, RouteDecision};

fn available(backends: &[BackendSummary], id: BackendId) -> bool {
    backends.iter().any(|b| b.id == id && b.available)
}

fn provider_of(backends: &[BackendSummary], capability: &Capability) -> Option<BackendId> {
    backends
        .iter()
        .find(|b| b.available && b.advertises(capability))
        .map(|b| b.id)
}

pub fn route(
    state: &MetaState,
    backends: &[BackendSummary],
    options: &QueryOptions,
) -> RouteDecision {
    let mut rationale: Vec<String> = state.diagnostics.clone();

    // Non-text modality wins outright when a matching capability exists.
    let modality_capability = match state.modality {
        Modality::Image => Some(Capability::ImageAnalyzer),
        Modality::Audio => Some(Capability::AudioTranscriber),
        Modality::Mixed => Some(Capability::ImageAnalyzer),
        Modality::Text => None,
    };
    if let Some(cap) = modality_capability {
        if let Some(primary) = provider_of(backends, &cap) {
            rationale.push(format!(
                "{} modality served by {} via {}",
                state.modality, primary, cap
            ));
            return RouteDecision {
                primary,
                use_ensemble: false,
                rationale,
            };
        }
        rationale.push(format!(
            "{} modality but no backend advertises {}, falling through to text routing",
            state.modality, cap
        ));
    }

    let tools_up = available(backends, BackendId::ToolServer);
    let reasoner_up = available(backends, BackendId::LocalReasoner);
    let complexity = state.complexity;
    let composite = state.composite;

    let primary = match state.resolved_strategy {
        DecisionStrategy::Conservative => {
            if tools_up {
                rationale.push("conservative: proven remote tools preferred".to_string());
                BackendId::ToolServer
            } else {
                rationale.push("conservative: tools unavailable, local reasoner".to_string());
                BackendId::LocalReasoner
            }
        }
        DecisionStrategy::Exploratory => {
            if composite >= 0.5 && reasoner_up {
                rationale.push(format!(
                    "exploratory: composite {composite:.2} supports the local reasoner"
                ));
                BackendId::LocalReasoner
            } else {
                rationale.push(format!(
                    "exploratory: composite {composite:.2} too low or reasoner down, using tools"
                ));
                BackendId::ToolServer
            }
        }
        DecisionStrategy::Balanced | DecisionStrategy::Adaptive => {
            if complexity < 0.5 {
                rationale.push(format!("balanced: complexity {complexity:.2} → tools"));
                BackendId::ToolServer
            } else if complexity < 0.7 {
                rationale.push(format!(
                    "balanced: complexity {complexity:.2} → tools with retrieval"
                ));
                BackendId::ToolServer
            } else if reasoner_up {
                rationale.push(format!(
                    "balanced: complexity {complexity:.2} → local reasoner"
                ));
                BackendId::LocalReasoner
            } else {
                rationale.push(format!(
                    "balanced: complexity {complexity:.2} but reasoner down, using tools"
                ));
                BackendId::ToolServer
            }
        }
    };

    let use_ensemble = composite < 0.5
        && state.criticality >= 0.7
        && options.allow_ensemble
        && tools_up
        && reasoner_up;
    if use_ensemble {
        rationale.push(format!(
            "ensemble: composite {composite:.2} below 0.5 with criticality {:.2}",
            state.criticality
        ));
    }

    RouteDecision {
        primary,
        use_ensemble,
        rationale,
    }
}
