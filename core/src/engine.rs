//! Cooperative, stackful state machine engine.
//!
//! A machine is a set of states (a `Copy` enum) and a `step` function that
//! runs one state to completion and says what happens next through a
//! `Transition`. The engine keeps, per machine, the current position, a
//! bounded call stack of (return state, argument, frame) records, the frame
//! arena and a return register. Nothing here blocks: waiting is a call into
//! the engine's built-in wait subroutine, which tests a soft-signal once per
//! pass and returns to the caller's chosen state once it is set.
//!
//! `Scheduler::run_all` gives every live machine one pass in registration
//! order. Within a pass a machine keeps running for as long as its states
//! chain without yielding, up to `MAX_TRANSITIONS_PER_PASS`; beyond that the
//! pass is abandoned and reported as a run-away.
//!
//! Call-stack and arena overflows are construction bugs in a machine, not
//! runtime conditions, so they panic with a `ConfigurationError` message.

use std::any::Any;
use std::fmt;

use crate::error::{ConfigurationError, ModemError, Result};
use crate::event::SessionEvent;
use crate::graph::Graph;
use crate::signal::{SignalBus, SignalId};
use crate::timer::TimerBank;
use crate::{MAX_MACHINES, MAX_STACK_DEPTH, MAX_TRANSITIONS_PER_PASS};

/// Default size of the per-machine frame arena, in `i64` words
pub const DEFAULT_ARENA_WORDS: usize = 256;

/// What a state asks the engine to do after it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// Move to `S` and give up the rest of this pass; `S` runs next pass.
    Jump(S),
    /// Run `S` immediately, in this same pass. Counts toward the run-away cap.
    Continue(S),
    /// Stay in this state and run it again next pass.
    Yield,
    /// Push `ret` with `arg`, allocate the callee's frame and run `callee`
    /// in this pass.
    Call { callee: S, arg: i64, ret: S },
    /// Pop the current frame, store the value in the return register and
    /// resume the caller's return state in this pass.
    Return(i64),
    /// Call the wait subroutine on `signal`, arming its timer for `ticks`
    /// first when given. Returns to `then` once the signal is consumed.
    Wait {
        signal: SignalId,
        ticks: Option<u64>,
        then: S,
    },
    /// Stop the machine for good. Its stack is discarded.
    Exit,
}

/// Where a machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor<S> {
    At(S),
    /// Inside the wait subroutine
    Waiting { signal: SignalId, then: S },
    Finished,
}

pub trait StateMachine: 'static {
    type State: Copy + PartialEq + fmt::Debug + 'static;

    fn name(&self) -> &str;

    fn initial(&self) -> Self::State;

    /// Words of private frame memory `state` needs when entered via `Call`.
    fn frame_size(&self, _state: Self::State) -> usize {
        0
    }

    /// Total frame arena for this machine.
    fn arena_words(&self) -> usize {
        DEFAULT_ARENA_WORDS
    }

    /// Run `state` to completion.
    fn step(&mut self, state: Self::State, cx: &mut Context<'_>) -> Transition<Self::State>;
}

/// Shared session resources a pass runs against.
pub struct Env<'a> {
    pub graph: &'a mut Graph,
    pub signals: &'a mut SignalBus,
    pub timers: &'a mut TimerBank,
    pub events: &'a mut Vec<SessionEvent>,
}

/// What a state function sees while it runs.
pub struct Context<'c> {
    pub graph: &'c mut Graph,
    pub signals: &'c mut SignalBus,
    pub timers: &'c mut TimerBank,
    events: &'c mut Vec<SessionEvent>,
    arg: i64,
    ret: i64,
    frame: &'c mut [i64],
}

impl<'c> Context<'c> {
    /// Argument of the innermost call, 0 outside any call.
    pub fn arg(&self) -> i64 {
        self.arg
    }

    /// Value of the most recent `Return`.
    pub fn ret(&self) -> i64 {
        self.ret
    }

    /// Private memory of the innermost call; empty outside any call.
    pub fn frame(&mut self) -> &mut [i64] {
        &mut *self.frame
    }

    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    /// Arm `signal`'s timer. Shorthand for going through `timers`.
    pub fn arm(&mut self, signal: SignalId, ticks: u64) {
        self.timers.arm_one_shot(self.signals, signal, ticks);
    }

    pub fn emit(&mut self, event: SessionEvent) {
        log::debug!("event: {:?}", event);
        self.events.push(event);
    }
}

#[derive(Debug)]
struct Frame<S> {
    ret: S,
    arg: i64,
    base: usize,
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Yielded,
    Finished,
    RunAway,
}

/// Engine-side state of one machine.
struct Runner<M: StateMachine> {
    machine: M,
    cursor: Cursor<M::State>,
    stack: Vec<Frame<M::State>>,
    arena: Vec<i64>,
    arena_top: usize,
    ret: i64,
}

impl<M: StateMachine> Runner<M> {
    fn new(machine: M) -> Self {
        let cursor = Cursor::At(machine.initial());
        let arena = vec![0; machine.arena_words()];
        Self {
            machine,
            cursor,
            stack: Vec::with_capacity(MAX_STACK_DEPTH),
            arena,
            arena_top: 0,
            ret: 0,
        }
    }

    fn push(&mut self, ret: M::State, arg: i64, size: usize) {
        if self.stack.len() >= MAX_STACK_DEPTH {
            let error = ConfigurationError::StackOverflow {
                machine: self.machine.name().to_string(),
                depth: self.stack.len() + 1,
                max: MAX_STACK_DEPTH,
            };
            log::error!("{}", error);
            panic!("{}", error);
        }
        let available = self.arena.len() - self.arena_top;
        if size > available {
            let error = ConfigurationError::ArenaOverflow {
                machine: self.machine.name().to_string(),
                requested: size,
                available,
            };
            log::error!("{}", error);
            panic!("{}", error);
        }
        let base = self.arena_top;
        self.arena[base..base + size].fill(0);
        self.arena_top += size;
        self.stack.push(Frame {
            ret,
            arg,
            base,
            size,
        });
    }

    fn pop(&mut self) -> M::State {
        let Some(frame) = self.stack.pop() else {
            let error = ConfigurationError::StackUnderflow {
                machine: self.machine.name().to_string(),
            };
            log::error!("{}", error);
            panic!("{}", error);
        };
        self.arena_top = frame.base;
        frame.ret
    }

    fn step(&mut self, state: M::State, env: &mut Env<'_>) -> Transition<M::State> {
        let (arg, frame) = match self.stack.last() {
            Some(f) => (f.arg, &mut self.arena[f.base..f.base + f.size]),
            None => (0, &mut self.arena[..0]),
        };
        let mut cx = Context {
            graph: &mut *env.graph,
            signals: &mut *env.signals,
            timers: &mut *env.timers,
            events: &mut *env.events,
            arg,
            ret: self.ret,
            frame,
        };
        self.machine.step(state, &mut cx)
    }

    fn run_pass(&mut self, env: &mut Env<'_>) -> Outcome {
        let mut transitions = 0;
        loop {
            if transitions > MAX_TRANSITIONS_PER_PASS {
                return Outcome::RunAway;
            }
            let state = match self.cursor {
                Cursor::Finished => return Outcome::Finished,
                Cursor::Waiting { signal, then } => {
                    if !env.signals.test_and_clear(signal) {
                        return Outcome::Yielded;
                    }
                    self.pop();
                    self.ret = 0;
                    self.cursor = Cursor::At(then);
                    transitions += 1;
                    continue;
                }
                Cursor::At(state) => state,
            };

            match self.step(state, env) {
                Transition::Jump(next) => {
                    self.cursor = Cursor::At(next);
                    return Outcome::Yielded;
                }
                Transition::Yield => return Outcome::Yielded,
                Transition::Continue(next) => {
                    self.cursor = Cursor::At(next);
                }
                Transition::Call { callee, arg, ret } => {
                    let size = self.machine.frame_size(callee);
                    self.push(ret, arg, size);
                    self.cursor = Cursor::At(callee);
                }
                Transition::Return(value) => {
                    let ret = self.pop();
                    self.ret = value;
                    self.cursor = Cursor::At(ret);
                }
                Transition::Wait {
                    signal,
                    ticks,
                    then,
                } => {
                    if let Some(ticks) = ticks {
                        env.timers.arm_one_shot(env.signals, signal, ticks);
                    }
                    self.push(then, signal.index() as i64, 0);
                    self.cursor = Cursor::Waiting { signal, then };
                }
                Transition::Exit => {
                    self.stack.clear();
                    self.arena_top = 0;
                    self.cursor = Cursor::Finished;
                    return Outcome::Finished;
                }
            }
            transitions += 1;
        }
    }
}

/// Object-safe face of a `Runner`, so one scheduler can hold machines with
/// different state types.
trait Runnable {
    fn name(&self) -> &str;
    fn pass(&mut self, env: &mut Env<'_>) -> Outcome;
    fn depth(&self) -> usize;
    fn finished(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<M: StateMachine> Runnable for Runner<M> {
    fn name(&self) -> &str {
        self.machine.name()
    }

    fn pass(&mut self, env: &mut Env<'_>) -> Outcome {
        self.run_pass(env)
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn finished(&self) -> bool {
        self.cursor == Cursor::Finished
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineId(pub usize);

/// Result of one `run_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Machines given a pass
    pub ran: usize,
    /// Machines that exited during this pass
    pub finished: Vec<MachineId>,
    /// Machines whose pass hit the transition cap
    pub runaway: Vec<MachineId>,
}

pub struct Scheduler {
    machines: Vec<(MachineId, Box<dyn Runnable>)>,
    next_id: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            machines: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a machine at the end of the run order, seeded with its initial
    /// state.
    pub fn spawn<M: StateMachine>(&mut self, machine: M) -> Result<MachineId> {
        if self.machines.len() >= MAX_MACHINES {
            return Err(ModemError::ResourceExhausted(format!(
                "scheduler full ({} machines), cannot add `{}`",
                MAX_MACHINES,
                machine.name()
            )));
        }
        let id = MachineId(self.next_id);
        self.next_id += 1;
        log::debug!("scheduler: spawn {:?} `{}`", id, machine.name());
        self.machines.push((id, Box::new(Runner::new(machine))));
        Ok(id)
    }

    /// Unlink a machine. Its call stack is dropped as is.
    pub fn kill(&mut self, id: MachineId) -> bool {
        let before = self.machines.len();
        self.machines.retain(|(m, _)| *m != id);
        let killed = self.machines.len() != before;
        if killed {
            log::debug!("scheduler: killed {:?}", id);
        }
        killed
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// True once every machine has exited (or none are linked).
    pub fn all_finished(&self) -> bool {
        self.machines.iter().all(|(_, r)| r.finished())
    }

    /// One pass over every live machine, in registration order.
    pub fn run_all(&mut self, env: &mut Env<'_>) -> PassReport {
        let mut report = PassReport::default();
        for (id, runner) in self.machines.iter_mut() {
            if runner.finished() {
                continue;
            }
            report.ran += 1;
            match runner.pass(env) {
                Outcome::Yielded => {}
                Outcome::Finished => {
                    log::debug!("scheduler: `{}` finished", runner.name());
                    report.finished.push(*id);
                }
                Outcome::RunAway => {
                    log::error!(
                        "scheduler: `{}` exceeded {} transitions in one pass, pass aborted",
                        runner.name(),
                        MAX_TRANSITIONS_PER_PASS
                    );
                    report.runaway.push(*id);
                }
            }
        }
        report
    }

    fn runner<M: StateMachine>(&self, id: MachineId) -> Option<&Runner<M>> {
        self.machines
            .iter()
            .find(|(m, _)| *m == id)
            .and_then(|(_, r)| r.as_any().downcast_ref::<Runner<M>>())
    }

    /// Typed access to a machine's own data.
    pub fn machine<M: StateMachine>(&self, id: MachineId) -> Option<&M> {
        self.runner::<M>(id).map(|r| &r.machine)
    }

    pub fn machine_mut<M: StateMachine>(&mut self, id: MachineId) -> Option<&mut M> {
        self.machines
            .iter_mut()
            .find(|(m, _)| *m == id)
            .and_then(|(_, r)| r.as_any_mut().downcast_mut::<Runner<M>>())
            .map(|r| &mut r.machine)
    }

    pub fn cursor<M: StateMachine>(&self, id: MachineId) -> Option<Cursor<M::State>> {
        self.runner::<M>(id).map(|r| r.cursor)
    }

    /// Current call-stack depth, waits included.
    pub fn depth(&self, id: MachineId) -> Option<usize> {
        self.machines
            .iter()
            .find(|(m, _)| *m == id)
            .map(|(_, r)| r.depth())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
