//! Line initialisation: an AT command handshake with the line device, run
//! before any sample clock exists and therefore timed by the hard timer.

use std::collections::VecDeque;
use std::io;

use crate::config::LineConfig;
use crate::engine::{Context, StateMachine, Transition};
use crate::error::Result;
use crate::event::{SessionEvent, TerminationReason};
use crate::signal::{SignalBus, SignalId};
use crate::timer::HardTimer;

/// Command channel to a modem-like line device.
pub trait LineDevice {
    fn send(&mut self, command: &str) -> io::Result<()>;

    /// Next complete response line, if one has arrived. Must not block.
    fn poll_response(&mut self) -> Option<String>;
}

/// Soft-signals a line initialisation raises for the machines gated on it.
/// `settled` goes up when the handshake ends either way; `failed` goes up
/// alongside it when the line never became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSignals {
    pub settled: SignalId,
    pub failed: SignalId,
}

impl LineSignals {
    pub fn allocate(bus: &mut SignalBus) -> Result<Self> {
        Ok(Self {
            settled: bus.allocate("line-settled")?,
            failed: bus.allocate("line-failed")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    SendCommand,
    AwaitResponse,
    Ready,
    Failed,
}

pub struct LineInit<D: LineDevice> {
    device: D,
    commands: Vec<String>,
    timeout_ms: u64,
    retries: u32,
    signals: LineSignals,
    index: usize,
    attempts: u32,
    timer: HardTimer,
    log: Vec<(String, String)>,
}

impl<D: LineDevice> LineInit<D> {
    pub fn new(device: D, config: &LineConfig, signals: LineSignals) -> Self {
        Self {
            device,
            commands: config.init_commands.clone(),
            timeout_ms: config.response_timeout_ms,
            retries: config.retries,
            signals,
            index: 0,
            attempts: 0,
            timer: HardTimer::new(),
            log: Vec::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// (command, response) pairs seen so far; a timeout records an empty
    /// response.
    pub fn exchanges(&self) -> &[(String, String)] {
        &self.log
    }

    fn retry_or_fail(&mut self) -> Transition<LineState> {
        if self.attempts > self.retries {
            log::warn!(
                "line: `{}` failed after {} attempts",
                self.commands[self.index],
                self.attempts
            );
            return Transition::Continue(LineState::Failed);
        }
        Transition::Jump(LineState::SendCommand)
    }
}

impl<D: LineDevice + 'static> StateMachine for LineInit<D> {
    type State = LineState;

    fn name(&self) -> &str {
        "line-init"
    }

    fn initial(&self) -> LineState {
        LineState::SendCommand
    }

    fn step(&mut self, state: LineState, cx: &mut Context<'_>) -> Transition<LineState> {
        match state {
            LineState::SendCommand => {
                let Some(command) = self.commands.get(self.index) else {
                    return Transition::Continue(LineState::Ready);
                };
                self.attempts += 1;
                log::debug!("line: -> {} (attempt {})", command, self.attempts);
                if let Err(e) = self.device.send(command) {
                    log::warn!("line: write failed: {}", e);
                    self.log.push((command.clone(), String::new()));
                    return self.retry_or_fail();
                }
                let ms = self.timeout_ms;
                self.timer.arm(ms / 1000, ((ms % 1000) * 1000) as u32);
                Transition::Jump(LineState::AwaitResponse)
            }
            LineState::AwaitResponse => {
                while let Some(response) = self.device.poll_response() {
                    let response = response.trim().to_string();
                    // Echo and unsolicited blank lines
                    if response.is_empty() || response == self.commands[self.index] {
                        continue;
                    }
                    log::debug!("line: <- {}", response);
                    self.log
                        .push((self.commands[self.index].clone(), response.clone()));
                    self.timer.disarm();
                    if response == "OK" {
                        self.index += 1;
                        self.attempts = 0;
                        return Transition::Continue(LineState::SendCommand);
                    }
                    return self.retry_or_fail();
                }
                if self.timer.expired() {
                    log::warn!("line: no answer to `{}`", self.commands[self.index]);
                    self.log.push((self.commands[self.index].clone(), String::new()));
                    self.timer.disarm();
                    return self.retry_or_fail();
                }
                Transition::Yield
            }
            LineState::Ready => {
                log::info!("line: ready after {} command(s)", self.commands.len());
                cx.signals.set(self.signals.settled);
                cx.emit(SessionEvent::LineReady);
                Transition::Exit
            }
            LineState::Failed => {
                cx.signals.set(self.signals.failed);
                cx.signals.set(self.signals.settled);
                cx.emit(SessionEvent::CallTerminated {
                    reason: TerminationReason::LineFailure,
                });
                Transition::Exit
            }
        }
    }
}

/// In-memory device answering from a script, for tests and dry runs.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    /// Responses queued per command sent, in order
    script: VecDeque<Vec<String>>,
    pending: VecDeque<String>,
    pub sent: Vec<String>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the lines the device will produce after the next command.
    /// An empty list makes the device stay silent for that command.
    pub fn then_reply(mut self, lines: &[&str]) -> Self {
        self.script
            .push_back(lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// A device that answers `OK` to everything.
    pub fn agreeable(commands: usize) -> Self {
        (0..commands).fold(Self::new(), |device, _| device.then_reply(&["OK"]))
    }
}

impl LineDevice for ScriptedDevice {
    fn send(&mut self, command: &str) -> io::Result<()> {
        self.sent.push(command.to_string());
        if let Some(lines) = self.script.pop_front() {
            self.pending.extend(lines);
        }
        Ok(())
    }

    fn poll_response(&mut self) -> Option<String> {
        self.pending.pop_front()
    }
}
