//! Top-level loop: one audio quantum per `step`.
//!
//! Order within a step: run every state machine once, push the received
//! samples into the receive chain, demand one quantum of transmit samples
//! from the line sink, then advance the timers by the quantum. A machine that
//! switches the line source therefore takes effect from the first sample of
//! the same quantum.

use crate::engine::{Env, MachineId, PassReport, Scheduler, StateMachine};
use crate::error::{ModemError, Result};
use crate::event::SessionEvent;
use crate::graph::{Graph, ModuleId};
use crate::module::{Block, Buffer, Command, Reply};
use crate::registry::Registry;
use crate::signal::SignalBus;
use crate::timer::TimerBank;

/// 20 ms at 8 kHz
pub const DEFAULT_QUANTUM: usize = 160;

pub struct Driver {
    registry: Registry,
    graph: Graph,
    signals: SignalBus,
    timers: TimerBank,
    scheduler: Scheduler,
    events: Vec<SessionEvent>,
    quantum: usize,
    tx_line: Option<ModuleId>,
    rx_head: Option<ModuleId>,
}

/// What one step produced.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Exactly one quantum of transmit samples (silence without a line sink)
    pub samples: Vec<i16>,
    pub report: PassReport,
}

impl Driver {
    pub fn new(quantum: usize) -> Result<Self> {
        if quantum == 0 || quantum > crate::SAMPLE_RATE {
            return Err(ModemError::construction(
                "driver",
                format!("quantum {} outside 1..={}", quantum, crate::SAMPLE_RATE),
            ));
        }
        Ok(Self {
            registry: Registry::with_builtins(),
            graph: Graph::new(),
            signals: SignalBus::new(),
            timers: TimerBank::new(),
            scheduler: Scheduler::new(),
            events: Vec::new(),
            quantum,
            tx_line: None,
            rx_head: None,
        })
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn signals_mut(&mut self) -> &mut SignalBus {
        &mut self.signals
    }

    pub fn timers(&self) -> &TimerBank {
        &self.timers
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Registry, graph and signal bus together, for building chains.
    pub fn parts_mut(&mut self) -> (&Registry, &mut Graph, &mut SignalBus) {
        (&self.registry, &mut self.graph, &mut self.signals)
    }

    /// Sink the transmit side is demanded through.
    pub fn set_tx_line(&mut self, line: ModuleId) {
        self.tx_line = Some(line);
    }

    /// Module received samples are pushed into.
    pub fn set_rx_head(&mut self, head: ModuleId) {
        self.rx_head = Some(head);
    }

    pub fn spawn<M: StateMachine>(&mut self, machine: M) -> Result<MachineId> {
        self.scheduler.spawn(machine)
    }

    /// Events raised since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn step(&mut self, rx: &[i16]) -> Result<StepOutput> {
        let report = {
            let mut env = Env {
                graph: &mut self.graph,
                signals: &mut self.signals,
                timers: &mut self.timers,
                events: &mut self.events,
            };
            self.scheduler.run_all(&mut env)
        };

        if let Some(head) = self.rx_head {
            let mut offset = 0;
            while offset < rx.len() {
                let taken = self.graph.push(
                    head,
                    Block::Samples(&rx[offset..]),
                    &mut self.signals,
                )?;
                if taken == 0 {
                    log::warn!(
                        "driver: receive chain stalled, dropping {} samples",
                        rx.len() - offset
                    );
                    break;
                }
                offset += taken;
            }
        }

        let mut samples = Vec::with_capacity(self.quantum);
        if let Some(line) = self.tx_line {
            self.graph.demand(line, self.quantum, &mut self.signals)?;
            if let Reply::Data(Buffer::Samples(out)) = self.graph.command(line, Command::Drain)? {
                samples = out;
            }
        }
        if samples.len() != self.quantum {
            if self.tx_line.is_some() {
                log::debug!(
                    "driver: transmit chain gave {} of {} samples",
                    samples.len(),
                    self.quantum
                );
            }
            samples.resize(self.quantum, 0);
        }

        self.timers.tick(&mut self.signals, self.quantum as u64);
        Ok(StepOutput { samples, report })
    }

    /// Step with a silent receive line until every machine has exited or
    /// `max_ticks` have passed. Returns the transmitted audio.
    pub fn run_until_done(&mut self, max_ticks: u64) -> Result<Vec<i16>> {
        let silence = vec![0i16; self.quantum];
        let mut audio = Vec::new();
        let start = self.now();
        while self.now() - start < max_ticks {
            if !self.scheduler.is_empty() && self.scheduler.all_finished() {
                break;
            }
            audio.extend(self.step(&silence)?.samples);
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Capture, CaptureConfig};
    use crate::module::UnitType;
    use crate::siggen::{SigGen, SigGenConfig};

    #[test]
    fn test_quantum_bounds() {
        assert!(Driver::new(0).is_err());
        assert!(Driver::new(crate::SAMPLE_RATE + 1).is_err());
        assert_eq!(Driver::new(160).unwrap().quantum(), 160);
    }

    #[test]
    fn test_step_advances_clock_and_fills_quantum() {
        let mut driver = Driver::new(80).unwrap();
        let tone = driver.graph_mut().insert(Box::new(
            SigGen::new(SigGenConfig::tone(1000.0, 1000.0)).unwrap(),
        ));
        let line = driver.graph_mut().insert(Box::new(
            Capture::new(CaptureConfig::new(UnitType::Samples16, 1000)).unwrap(),
        ));
        driver.graph_mut().connect(tone, line).unwrap();
        driver.set_tx_line(line);

        let out = driver.step(&[]).unwrap();
        assert_eq!(out.samples.len(), 80);
        assert!(out.samples.iter().any(|&s| s != 0));
        assert_eq!(driver.now(), 80);
    }

    #[test]
    fn test_no_line_gives_silence() {
        let mut driver = Driver::new(40).unwrap();
        let out = driver.step(&[1, 2, 3]).unwrap();
        assert_eq!(out.samples, vec![0; 40]);
    }
}
