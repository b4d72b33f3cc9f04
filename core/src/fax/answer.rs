//! Linear answer sequence: CED, CSI + DIS, listen, hang up. No retries.

use crate::config::{ms_to_ticks, FaxConfig};
use crate::engine::{Context, StateMachine, Transition};
use crate::event::{SessionEvent, TerminationReason};
use crate::fax::chain::{FaxChains, TxSource};
use crate::fax::frames::{self, FaxFrame, Fcf};
use crate::line::LineSignals;
use crate::signal::SignalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerState {
    AwaitLine,
    LineSettled,
    StartAnswerIncoming,
    DoCed,
    DoneCed,
    StartDis,
    DoDis,
    DoneDis,
    HuntForDcsOrDtc,
    DoHardExit,
}

pub struct AnswerMachine {
    chains: FaxChains,
    timer: SignalId,
    line: Option<LineSignals>,
    csi: Vec<u8>,
    dis: Vec<u8>,
    pre_ced: u64,
    ced: u64,
    post_ced: u64,
    dis_hold: u64,
    hunt: u64,
    trace: Vec<(u64, AnswerState)>,
    received: Vec<FaxFrame>,
}

impl AnswerMachine {
    pub fn new(chains: FaxChains, timer: SignalId, config: &FaxConfig) -> Self {
        Self {
            chains,
            timer,
            line: None,
            csi: frames::build_csi(&config.local_id),
            dis: frames::build_dis(&config.capabilities),
            pre_ced: ms_to_ticks(config.pre_ced_ms),
            ced: ms_to_ticks(config.ced_ms),
            post_ced: ms_to_ticks(config.post_ced_ms),
            dis_hold: ms_to_ticks(config.dis_hold_ms),
            hunt: ms_to_ticks(config.hunt_ms),
            trace: Vec::new(),
            received: Vec::new(),
        }
    }

    /// Hold off answering until the line initialisation settles, and give
    /// up if it failed.
    pub fn after(mut self, line: LineSignals) -> Self {
        self.line = Some(line);
        self
    }

    /// Every state run, with the tick it ran at.
    pub fn trace(&self) -> &[(u64, AnswerState)] {
        &self.trace
    }

    /// First tick `state` ran at.
    pub fn entered(&self, state: AnswerState) -> Option<u64> {
        self.trace.iter().find(|(_, s)| *s == state).map(|(t, _)| *t)
    }

    pub fn received(&self) -> &[FaxFrame] {
        &self.received
    }

    fn wait(&self, ticks: u64, then: AnswerState) -> Transition<AnswerState> {
        Transition::Wait {
            signal: self.timer,
            ticks: Some(ticks),
            then,
        }
    }

    fn switch(&mut self, cx: &mut Context<'_>, source: TxSource) {
        if let Err(e) = self.chains.transmit(cx.graph, source) {
            log::error!("answer: cannot switch line to {:?}: {}", source, e);
        }
    }
}

impl StateMachine for AnswerMachine {
    type State = AnswerState;

    fn name(&self) -> &str {
        "fax-answer"
    }

    fn initial(&self) -> AnswerState {
        AnswerState::AwaitLine
    }

    fn step(&mut self, state: AnswerState, cx: &mut Context<'_>) -> Transition<AnswerState> {
        self.trace.push((cx.now(), state));
        match state {
            AnswerState::AwaitLine => match self.line {
                Some(line) => Transition::Wait {
                    signal: line.settled,
                    ticks: None,
                    then: AnswerState::LineSettled,
                },
                None => Transition::Continue(AnswerState::StartAnswerIncoming),
            },
            AnswerState::LineSettled => {
                let failed = self.line.is_some_and(|line| cx.signals.test_and_clear(line.failed));
                if failed {
                    // Line init has already reported the failure
                    log::warn!("answer: line failed, not answering");
                    return Transition::Exit;
                }
                Transition::Continue(AnswerState::StartAnswerIncoming)
            }
            AnswerState::StartAnswerIncoming => {
                log::info!("answer: incoming call at tick {}", cx.now());
                self.switch(cx, TxSource::Silence);
                self.wait(self.pre_ced, AnswerState::DoCed)
            }
            AnswerState::DoCed => {
                self.switch(cx, TxSource::Ced);
                self.wait(self.ced, AnswerState::DoneCed)
            }
            AnswerState::DoneCed => {
                self.switch(cx, TxSource::Silence);
                self.wait(self.post_ced, AnswerState::StartDis)
            }
            AnswerState::StartDis => {
                for frame in [self.csi.clone(), self.dis.clone()] {
                    let fcf = frame[1];
                    if let Err(e) = self.chains.queue_frame(cx.graph, frame) {
                        log::error!("answer: cannot queue frame {:#04x}: {}", fcf, e);
                    }
                    cx.emit(SessionEvent::FrameSent { fcf });
                }
                self.switch(cx, TxSource::V21);
                log::info!("answer: sending CSI and DIS");
                Transition::Continue(AnswerState::DoDis)
            }
            AnswerState::DoDis => self.wait(self.dis_hold, AnswerState::DoneDis),
            AnswerState::DoneDis => {
                match self.chains.tx_idle(cx.graph) {
                    Ok(true) => self.switch(cx, TxSource::Silence),
                    // Leave the carrier up rather than cut a frame in half
                    Ok(false) => log::warn!("answer: DIS still on the line after hold time"),
                    Err(e) => log::error!("answer: framer unavailable: {}", e),
                }
                Transition::Continue(AnswerState::HuntForDcsOrDtc)
            }
            AnswerState::HuntForDcsOrDtc => self.wait(self.hunt, AnswerState::DoHardExit),
            AnswerState::DoHardExit => {
                loop {
                    match self.chains.take_frame(cx.graph) {
                        Ok(Some(raw)) => {
                            if let Some(frame) = FaxFrame::parse(&raw) {
                                log::info!("answer: heard {:?}", frame.fcf);
                                cx.emit(SessionEvent::FrameReceived {
                                    fcf: frame.fcf.to_byte(false),
                                });
                                self.received.push(frame);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::error!("answer: deframer unavailable: {}", e);
                            break;
                        }
                    }
                }
                if self.received.iter().any(|f| f.fcf == Fcf::Dcs) {
                    log::info!("answer: DCS heard, linear sequence does not continue");
                }
                self.switch(cx, TxSource::Silence);
                cx.emit(SessionEvent::CallTerminated {
                    reason: TerminationReason::AnswerSequenceDone,
                });
                Transition::Exit
            }
        }
    }
}
