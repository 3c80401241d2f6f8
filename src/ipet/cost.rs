//! Per-edge cycle costs.
//!
//! The architectural cost model lives outside this crate; the builder only
//! needs a way to ask for the cycle cost of a flow edge. Implement
//! [`CostModel`] to plug in a real timing table.

use rustc_hash::FxHashMap;

use crate::{ipet::FlowEdge, model::Program};

/// Assigns cycle costs to flow edges.
///
/// The builder queries the model once per declared edge and records non-zero
/// costs as ILP objective coefficients. Costs must be deterministic for a
/// given edge.
pub trait CostModel {
    /// Returns the cycle cost attributed to traversing `edge`.
    fn edge_cost(&self, program: &Program, edge: &FlowEdge) -> i64;
}

/// A cost model that assigns no cost to any edge.
///
/// Useful when instruction timing is disabled or for structural tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCost;

impl CostModel for ZeroCost {
    fn edge_cost(&self, _program: &Program, _edge: &FlowEdge) -> i64 {
        0
    }
}

/// A cost model backed by an explicit per-edge table.
#[derive(Debug, Default)]
pub struct TableCost {
    default: i64,
    table: FxHashMap<FlowEdge, i64>,
}

impl TableCost {
    /// Creates a table model that falls back to `default` for unknown edges.
    #[must_use]
    pub fn new(default: i64) -> Self {
        Self {
            default,
            table: FxHashMap::default(),
        }
    }

    /// Sets the cost of a specific edge.
    pub fn set(&mut self, edge: FlowEdge, cost: i64) {
        self.table.insert(edge, cost);
    }
}

impl CostModel for TableCost {
    fn edge_cost(&self, _program: &Program, edge: &FlowEdge) -> i64 {
        self.table.get(edge).copied().unwrap_or(self.default)
    }
}
