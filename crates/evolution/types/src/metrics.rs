//! Production telemetry and the metrics derived from it.
//!
//! A [`Turn`] is one execution unit of the agent, carrying zero or more
//! tool calls. [`ProductionMetrics`] summarizes a window of turns:
//!
//! - `avg_latency_ms = Σ tool-call duration / max(1, #tool calls)`
//! - `avg_cost_cents = Σ turn cost / max(1, #turns)`
//! - `success_rate   = #tool calls without error / max(1, #tool calls)`
//!
//! An empty window reports `success_rate = 1.0` with every other field zero.
//! That optimistic default is deliberate: no data is not evidence of failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

// ── Telemetry ──────────────────────────────────────────────────────────

/// A single tool invocation within a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// A successful call.
    pub fn ok(duration_ms: f64) -> Self {
        Self {
            duration_ms,
            error: None,
        }
    }

    /// A failed call.
    pub fn failed(duration_ms: f64, error: impl Into<String>) -> Self {
        Self {
            duration_ms,
            error: Some(error.into()),
        }
    }
}

/// One execution unit of the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub agent_id: AgentId,
    pub occurred_at: DateTime<Utc>,
    pub tool_calls: Vec<ToolCall>,
    pub cost_cents: f64,
}

// ── Production Metrics ─────────────────────────────────────────────────

/// Aggregate production performance over a measurement window.
///
/// A window with no turns is optimistic (`success_rate` 1.0), but turns that
/// made no tool calls report `success_rate` 0.0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionMetrics {
    pub avg_latency_ms: f64,
    pub avg_cost_cents: f64,
    /// Fraction of tool calls that completed without error (0.0–1.0).
    pub success_rate: f64,
    /// Number of turns observed.
    pub total_operations: u64,
    pub measurement_period_days: f64,
}

impl ProductionMetrics {
    /// Metrics for a window with no telemetry.
    pub fn empty(measurement_period_days: f64) -> Self {
        Self {
            avg_latency_ms: 0.0,
            avg_cost_cents: 0.0,
            success_rate: 1.0,
            total_operations: 0,
            measurement_period_days,
        }
    }

    /// All-zero placeholder for a window that has not been measured yet.
    pub fn pending() -> Self {
        Self {
            avg_latency_ms: 0.0,
            avg_cost_cents: 0.0,
            success_rate: 0.0,
            total_operations: 0,
            measurement_period_days: 0.0,
        }
    }

    /// Derive metrics from a slice of turns.
    pub fn from_turns(turns: &[Turn], measurement_period_days: f64) -> Self {
        let mut acc = MetricsAccumulator::default();
        for turn in turns {
            acc.add_turn(turn);
        }
        acc.finish(measurement_period_days)
    }
}

// ── Accumulator ────────────────────────────────────────────────────────

/// Streaming reduction of turns into [`ProductionMetrics`].
///
/// Lets callers fold paged telemetry without holding the whole window.
#[derive(Clone, Debug, Default)]
pub struct MetricsAccumulator {
    turns: u64,
    tool_calls: u64,
    failed_calls: u64,
    total_duration_ms: f64,
    total_cost_cents: f64,
}

impl MetricsAccumulator {
    /// Fold one turn into the running totals.
    pub fn add_turn(&mut self, turn: &Turn) {
        self.turns += 1;
        self.total_cost_cents += turn.cost_cents;
        for call in &turn.tool_calls {
            self.tool_calls += 1;
            self.total_duration_ms += call.duration_ms;
            if call.error.is_some() {
                self.failed_calls += 1;
            }
        }
    }

    /// Number of turns folded so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Produce the final metrics.
    pub fn finish(&self, measurement_period_days: f64) -> ProductionMetrics {
        if self.turns == 0 {
            return ProductionMetrics::empty(measurement_period_days);
        }
        let calls = self.tool_calls.max(1) as f64;
        ProductionMetrics {
            avg_latency_ms: self.total_duration_ms / calls,
            avg_cost_cents: self.total_cost_cents / self.turns.max(1) as f64,
            success_rate: (self.tool_calls - self.failed_calls) as f64 / calls,
            total_operations: self.turns,
            measurement_period_days,
        }
    }
}
