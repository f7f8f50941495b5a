//! Recorded exploration decisions
//!
//! Every choice a strategy makes during one iteration is appended to a
//! [`Schedule`]. Feeding the same schedule back to the same program reproduces
//! the iteration exactly.

use crate::ids::OperationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single recorded choice at one scheduling point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Decision {
    /// The operation chosen to run next
    Operation(OperationId),
    /// A nondeterministic boolean
    Boolean(bool),
    /// A nondeterministic integer in `0..max`
    Integer(u32),
}

impl Decision {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Decision::Operation(_) => "operation",
            Decision::Boolean(_) => "boolean",
            Decision::Integer(_) => "integer",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Operation(id) => write!(f, "{}", id),
            Decision::Boolean(value) => write!(f, "bool:{}", value),
            Decision::Integer(value) => write!(f, "int:{}", value),
        }
    }
}

/// Ordered decisions of one iteration, the unit of replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule(Vec<Decision>);

impl Schedule {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, decision: Decision) {
        self.0.push(decision);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<Decision> {
        self.0.get(index).copied()
    }

    /// Number of scheduling (operation) decisions
    pub fn operation_steps(&self) -> usize {
        self.0
            .iter()
            .filter(|d| matches!(d, Decision::Operation(_)))
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl From<Vec<Decision>> for Schedule {
    fn from(decisions: Vec<Decision>) -> Self {
        Self(decisions)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, decision) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", decision)?;
        }
        Ok(())
    }
}
