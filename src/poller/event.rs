//! Resource kinds and the notifications published by the supervisor.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ModbusError;

/// Bit-addressable resource a polling task samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Coils,
    DiscreteInputs,
}

impl ResourceKind {
    /// Every kind, in task slot order.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Coils, ResourceKind::DiscreteInputs];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Coils => "coils",
            ResourceKind::DiscreteInputs => "discreteInputs",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            ResourceKind::Coils => 0,
            ResourceKind::DiscreteInputs => 1,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModbusError::Validation(format!("unknown resource kind {s:?}")))
    }
}

/// Notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PollEvent {
    /// Point `index` of the sampled block has a new value.
    Changed {
        kind: ResourceKind,
        index: usize,
        value: bool,
    },
    /// The task stopped because a read failed.
    Failed { kind: ResourceKind, message: String },
}

impl PollEvent {
    pub fn kind(&self) -> ResourceKind {
        match self {
            PollEvent::Changed { kind, .. } | PollEvent::Failed { kind, .. } => *kind,
        }
    }
}
