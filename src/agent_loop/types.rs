//! Loop state machine types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one loop run, attached to every log line of the run.
pub type RunId = Uuid;

/// States of one agent-loop run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LoopState {
    AwaitingModelTurn,
    ExecutingTools,
    Done,
    Aborted,
    Error,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Error)
    }
}
