//! Scenario simulation and hypothesis testing.
//!
//! Both are pure evaluators over their inputs; the only side effect is
//! updating the stored record with the result.

use serde::Serialize;

use super::{Hypothesis, HypothesisOutcome, Scenario, ScenarioAssumptions};

/// Result of simulating a scenario
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub success_probability: f64,
    pub risk_factors: Vec<String>,
    pub recommended_approach: String,
}

/// Score a scenario's assumptions. Base 0.7, adjusted by complexity,
/// resource availability, and constraint load; clamped to [0.10, 0.95].
pub fn simulate_assumptions(assumptions: &ScenarioAssumptions) -> SimulationResult {
    let mut probability: f64 = 0.7;

    match assumptions.complexity.as_str() {
        "high" => probability -= 0.2,
        "low" => probability += 0.1,
        _ => {}
    }
    if assumptions.available_resources.len() < 2 {
        probability -= 0.15;
    }
    if assumptions.constraints.len() > 3 {
        probability -= 0.1;
    }

    let probability = probability.clamp(0.10, 0.95);
    let recommended_approach = if probability < 0.6 {
        "adaptive".to_string()
    } else {
        "direct".to_string()
    };

    SimulationResult {
        success_probability: probability,
        risk_factors: assumptions.constraints.clone(),
        recommended_approach,
    }
}

/// Apply a simulation result to the stored scenario.
pub fn apply_simulation(scenario: &mut Scenario, result: &SimulationResult) {
    scenario.simulated_success_probability = Some(result.success_probability);
    scenario.reasoning = format!(
        "complexity={} resources={} constraints={} → p={:.2}, approach={}",
        if scenario.assumptions.complexity.is_empty() {
            "medium"
        } else {
            &scenario.assumptions.complexity
        },
        scenario.assumptions.available_resources.len(),
        scenario.assumptions.constraints.len(),
        result.success_probability,
        result.recommended_approach
    );
}

/// Likelihood table for the Bayesian update, bucketed by the fraction of
/// criteria the test run met: `(P(evidence | true), P(evidence | false))`.
fn likelihoods(criteria_ratio: f64) -> (f64, f64) {
    if criteria_ratio >= 0.8 {
        (0.9, 0.2)
    } else if criteria_ratio >= 0.4 {
        (0.5, 0.5)
    } else {
        (0.2, 0.9)
    }
}

/// Posterior confidence from the prior and the criteria-met ratio.
pub fn posterior_confidence(prior: f64, criteria_ratio: f64) -> f64 {
    let (l_true, l_false) = likelihoods(criteria_ratio);
    let numerator = prior * l_true;
    let denominator = numerator + (1.0 - prior) * l_false;
    if denominator <= f64::EPSILON {
        return 0.05;
    }
    (numerator / denominator).clamp(0.05, 0.95)
}

/// Outcome bucket for a completed test run.
pub fn outcome_for_ratio(criteria_ratio: f64) -> HypothesisOutcome {
    if criteria_ratio >= 0.8 {
        HypothesisOutcome::Confirmed
    } else if criteria_ratio >= 0.4 {
        HypothesisOutcome::Inconclusive
    } else {
        HypothesisOutcome::Refuted
    }
}

/// Evaluate test output against the hypothesis criteria and update it.
/// Returns the outcome.
pub fn apply_test_result(hypothesis: &mut Hypothesis, output: &str) -> HypothesisOutcome {
    let output_lower = output.to_lowercase();
    let mut met = 0usize;

    for criterion in &hypothesis.criteria {
        if output_lower.contains(&criterion.to_lowercase()) {
            met += 1;
            hypothesis.evidence.push(format!("met: {criterion}"));
        } else {
            hypothesis.evidence.push(format!("not met: {criterion}"));
        }
    }

    let ratio = if hypothesis.criteria.is_empty() {
        0.0
    } else {
        met as f64 / hypothesis.criteria.len() as f64
    };

    let outcome = outcome_for_ratio(ratio);
    hypothesis.posterior_confidence = posterior_confidence(hypothesis.prior_confidence, ratio);
    hypothesis.outcome = outcome;
    hypothesis.tested_at = Some(chrono::Utc::now());
    outcome
}
