//! T.30 answering side: frame toolkit, session chains and the two answer
//! machines.

pub mod answer;
pub mod chain;
pub mod frames;
pub mod negotiate;

use crate::config::FaxConfig;
use crate::driver::Driver;
use crate::engine::MachineId;
use crate::error::Result;
use crate::line::LineSignals;

pub use answer::{AnswerMachine, AnswerState};
pub use chain::{FaxChains, TxSource};
pub use negotiate::{NegotiateMachine, NegotiateState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// CED, CSI + DIS, listen, hang up
    Linear,
    /// Full phase B negotiation with retries
    Negotiate,
}

/// Build the fax chains in `driver`, wire them to its line, and spawn the
/// answer machine for `mode`. When `line` is given the machine holds off
/// until the line initialisation settles and exits if it failed.
pub fn spawn_answer(
    driver: &mut Driver,
    config: &FaxConfig,
    mode: AnswerMode,
    line: Option<LineSignals>,
) -> Result<MachineId> {
    let (registry, graph, signals) = driver.parts_mut();
    let chains = FaxChains::build(graph, registry, signals, config)?;
    let timer = signals.allocate("fax-timer")?;
    driver.set_tx_line(chains.line);
    driver.set_rx_head(chains.demodulator);

    log::info!("fax: answering in {:?} mode", mode);
    match mode {
        AnswerMode::Linear => {
            let mut machine = AnswerMachine::new(chains, timer, config);
            if let Some(line) = line {
                machine = machine.after(line);
            }
            driver.spawn(machine)
        }
        AnswerMode::Negotiate => {
            let mut machine = NegotiateMachine::new(chains, timer, config);
            if let Some(line) = line {
                machine = machine.after(line);
            }
            driver.spawn(machine)
        }
    }
}
