//! Structured commit messages.
//!
//! ```text
//! [self-mod] prompt_change: system
//!
//! Hypothesis: Shorter answers cost less
//! Change: Be concise.
//! Test recommendation: apply
//! Reasoning: simulated cost drop
//! Speed change: +0.0%
//! Cost change: +12.5%
//! Success rate change: -0.4%
//! Modification-Id: mod-1
//! Test duration: 500ms
//! ```
//!
//! The output depends only on its inputs.

use maple_evolution_types::{ModificationTestResult, SelfModification};

/// Subject line: `<marker> <type>: <target>`.
pub fn commit_subject(marker: &str, modification: &SelfModification) -> String {
    format!(
        "{} {}: {}",
        marker, modification.modification_type, modification.target
    )
}

/// Full commit message for a tested modification.
pub fn build_commit_message(
    marker: &str,
    modification: &SelfModification,
    test_result: &ModificationTestResult,
) -> String {
    let impact = &test_result.performance_impact;
    let body = [
        format!("Hypothesis: {}", modification.hypothesis),
        format!("Change: {}", modification.change),
        format!("Test recommendation: {}", test_result.recommendation),
        format!("Reasoning: {}", test_result.reasoning),
        format!("Speed change: {}", signed_pct(impact.speed_change)),
        format!("Cost change: {}", signed_pct(impact.cost_change)),
        format!("Success rate change: {}", signed_pct(impact.success_rate_change)),
        format!("Modification-Id: {}", modification.id),
        format!("Test duration: {}ms", test_result.test_duration_ms),
    ];
    format!("{}\n\n{}", commit_subject(marker, modification), body.join("\n"))
}

fn signed_pct(value: f64) -> String {
    format!("{value:+.1}%")
}
