//! Software fax modem core
//!
//! A pull/push graph of DSP and framing modules, soft-signals and timers for
//! discrete events, and a cooperative stackful state machine engine that runs
//! the T.30 answering side on top, all driven one audio quantum at a time.

pub mod bits;
pub mod capture;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod event;
pub mod fax;
pub mod framing;
pub mod fsk;
pub mod graph;
pub mod hdlc;
pub mod line;
pub mod module;
pub mod plumbing;
pub mod registry;
pub mod resample;
pub mod siggen;
pub mod signal;
pub mod timer;

pub use config::{FaxConfig, LineConfig};
pub use driver::Driver;
pub use engine::{Context, MachineId, Scheduler, StateMachine, Transition};
pub use error::{ConfigurationError, ModemError, Result};
pub use event::{SessionEvent, TerminationReason};
pub use graph::{Graph, ModuleId};
pub use module::{Block, Buffer, Command, Module, Reply, UnitType};
pub use registry::{ModuleConfig, Registry};
pub use signal::{SignalBus, SignalId};
pub use timer::{HardTimer, TimerBank};

// Timing
pub const SAMPLE_RATE: usize = 8000; // one engine tick per sample

// Engine limits
pub const MAX_SIGNALS: usize = 64; // soft-signals and timers share these ids
pub const MAX_STACK_DEPTH: usize = 16;
pub const MAX_TRANSITIONS_PER_PASS: usize = 32;
pub const MAX_MACHINES: usize = 16;
