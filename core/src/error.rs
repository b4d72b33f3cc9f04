use thiserror::Error;

use crate::graph::ModuleId;
use crate::module::UnitType;
use crate::registry::KindId;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Failed to construct module `{kind}`: {reason}")]
    Construction { kind: String, reason: String },

    #[error("Unknown module kind {0:?}")]
    UnknownKind(KindId),

    #[error("Module `{kind}` does not support command `{command}`")]
    UnsupportedCommand {
        kind: &'static str,
        command: &'static str,
    },

    #[error("Unit mismatch: expected {expected:?}, got {found:?}")]
    UnitMismatch { expected: UnitType, found: UnitType },

    #[error("Module `{kind}` cannot {operation}")]
    Direction {
        kind: &'static str,
        operation: &'static str,
    },

    #[error("Invalid module handle {0:?}")]
    InvalidModule(ModuleId),

    #[error("Module {0:?} re-entered while busy (cyclic graph?)")]
    Reentrant(ModuleId),

    #[error("Module {0:?} has no link in the requested direction")]
    NotConnected(ModuleId),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ModemError {
    pub(crate) fn construction(kind: &str, reason: impl Into<String>) -> Self {
        ModemError::Construction {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModemError>;

/// Logic defects in how a state machine was built. These are not runtime data
/// problems, so the engine panics with this message instead of returning it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("call stack overflow in machine `{machine}`: depth {depth} exceeds {max}")]
    StackOverflow {
        machine: String,
        depth: usize,
        max: usize,
    },

    #[error("frame arena overflow in machine `{machine}`: {requested} words requested, {available} free")]
    ArenaOverflow {
        machine: String,
        requested: usize,
        available: usize,
    },

    #[error("return with empty call stack in machine `{machine}`")]
    StackUnderflow { machine: String },
}
