//! Soft-signals: edge-triggered flags shared by timers, modules and state
//! machines within one session.
//!
//! A `SignalBus` is a fixed-size bitset plus a handle allocator. Handles are
//! handed out by name so each collaborator owns its ids instead of relying on
//! a process-wide numbering convention. Timers live in the same namespace:
//! a timer armed on a `SignalId` sets that signal when it expires.
//!
//! Each id is meant to have a single consumer. `test_and_clear` consumes the
//! edge, so two pollers of the same id would race for it.

use crate::error::{ModemError, Result};
use crate::MAX_SIGNALS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u8);

impl SignalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_SIGNALS);
        SignalId(index as u8)
    }
}

pub struct SignalBus {
    flags: u64,
    names: Vec<String>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            flags: 0,
            names: Vec::with_capacity(MAX_SIGNALS),
        }
    }

    /// Reserve a fresh id. Fails once all `MAX_SIGNALS` ids are taken.
    pub fn allocate(&mut self, name: &str) -> Result<SignalId> {
        if self.names.len() >= MAX_SIGNALS {
            return Err(ModemError::ResourceExhausted(format!(
                "soft-signal table full ({} ids), cannot allocate `{}`",
                MAX_SIGNALS, name
            )));
        }
        let id = SignalId(self.names.len() as u8);
        self.names.push(name.to_string());
        log::debug!("allocated soft-signal {} `{}`", id.0, name);
        Ok(id)
    }

    pub fn name(&self, id: SignalId) -> &str {
        self.names.get(id.index()).map(String::as_str).unwrap_or("?")
    }

    pub fn allocated(&self) -> usize {
        self.names.len()
    }

    pub fn set(&mut self, id: SignalId) {
        self.flags |= 1u64 << id.0;
    }

    pub fn clear(&mut self, id: SignalId) {
        self.flags &= !(1u64 << id.0);
    }

    pub fn clear_all(&mut self) {
        self.flags = 0;
    }

    pub fn peek(&self, id: SignalId) -> bool {
        self.flags & (1u64 << id.0) != 0
    }

    /// Read the flag and reset it in one step.
    pub fn test_and_clear(&mut self, id: SignalId) -> bool {
        let was_set = self.peek(id);
        self.clear(id);
        was_set
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
