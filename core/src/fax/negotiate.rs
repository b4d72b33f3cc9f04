//! Answering-side phase B negotiation.
//!
//! After CED the machine sends CSI + DIS and calls the response subroutine,
//! which returns the FCF of the final frame heard, or one of the negative
//! codes below. The dispatcher then answers DCS with CFR, repeats DIS after a
//! T4 timeout, asks for a repeat (CRP) after an FCS error and otherwise
//! disconnects. Both repetition paths are bounded by the configured limits.

use crate::config::{ms_to_ticks, FaxConfig};
use crate::engine::{Context, StateMachine, Transition};
use crate::error::Result;
use crate::event::{SessionEvent, TerminationReason};
use crate::fax::chain::{FaxChains, TxSource};
use crate::fax::frames::{self, DisCapabilities, FaxFrame, Fcf};
use crate::line::LineSignals;
use crate::signal::SignalId;

/// Response subroutine: a frame failed its FCS
pub const RESPONSE_FCS_ERROR: i64 = -1;
/// Response subroutine: T4 or T2 ran out
pub const RESPONSE_TIMEOUT: i64 = -2;
/// Response subroutine: the session graph failed
pub const RESPONSE_FAULT: i64 = -3;

// Response subroutine frame words
const PHASE: usize = 0;
const FRAMES_SEEN: usize = 1;

const PHASE_T4: i64 = 0;
const PHASE_T2: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiateState {
    AwaitLine,
    LineSettled,
    Start,
    Ced,
    CedDone,
    SendDis,
    DisSent,
    Dispatch,
    SendCrp,
    SendDcn,
    Terminate,
    // Subroutines
    AwaitTxDone,
    ResponseReceived,
    ResponseWait,
}

pub struct NegotiateMachine {
    chains: FaxChains,
    timer: SignalId,
    line: Option<LineSignals>,
    csi: Vec<u8>,
    dis: Vec<u8>,
    pre_ced: u64,
    ced: u64,
    post_ced: u64,
    t4: u64,
    t2: u64,
    dis_limit: u32,
    crp_limit: u32,
    dis_sent: u32,
    crp_sent: u32,
    reason: Option<TerminationReason>,
    remote: Option<DisCapabilities>,
    remote_id: Option<String>,
    preliminary: Vec<FaxFrame>,
    trace: Vec<(u64, NegotiateState)>,
}

impl NegotiateMachine {
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
            t4: ms_to_ticks(config.t4_ms),
            t2: ms_to_ticks(config.t2_ms),
            dis_limit: config.dis_retries,
            crp_limit: config.crp_retries,
            dis_sent: 0,
            crp_sent: 0,
            reason: None,
            remote: None,
            remote_id: None,
            preliminary: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn after(mut self, line: LineSignals) -> Self {
        self.line = Some(line);
        self
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        self.reason
    }

    /// Capabilities the remote chose in DCS.
    pub fn remote_capabilities(&self) -> Option<&DisCapabilities> {
        self.remote.as_ref()
    }

    /// Identifier from the remote's TSI, if it sent one.
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    /// Non-final frames that preceded a final one (TSI, NSS).
    pub fn preliminary(&self) -> &[FaxFrame] {
        &self.preliminary
    }

    pub fn dis_sent(&self) -> u32 {
        self.dis_sent
    }

    pub fn crp_sent(&self) -> u32 {
        self.crp_sent
    }

    pub fn trace(&self) -> &[(u64, NegotiateState)] {
        &self.trace
    }

    fn send(&mut self, cx: &mut Context<'_>, frames: Vec<Vec<u8>>) -> Result<()> {
        for frame in frames {
            let fcf = frame[1];
            self.chains.queue_frame(cx.graph, frame)?;
            cx.emit(SessionEvent::FrameSent { fcf });
        }
        self.chains.transmit(cx.graph, TxSource::V21)
    }

    /// Send `frames`, wait for them to leave, then go to `then`.
    fn send_then(
        &mut self,
        cx: &mut Context<'_>,
        frames: Vec<Vec<u8>>,
        then: NegotiateState,
    ) -> Transition<NegotiateState> {
        match self.send(cx, frames) {
            Ok(()) => Transition::Call {
                callee: NegotiateState::AwaitTxDone,
                arg: 0,
                ret: then,
            },
            Err(e) => self.fault(e),
        }
    }

    fn fault(&mut self, error: crate::error::ModemError) -> Transition<NegotiateState> {
        log::error!("negotiate: session graph failed: {}", error);
        self.reason.get_or_insert(TerminationReason::LineFailure);
        Transition::Continue(NegotiateState::Terminate)
    }

    fn finish(&mut self, reason: TerminationReason) -> Transition<NegotiateState> {
        self.reason = Some(reason);
        Transition::Continue(NegotiateState::Terminate)
    }

    /// Poll the deframer inside the response subroutine.
    fn poll_response(&mut self, cx: &mut Context<'_>) -> Result<Transition<NegotiateState>> {
        if cx.signals.test_and_clear(self.chains.fcs_error) {
            log::warn!("negotiate: FCS error in response");
            return Ok(Transition::Return(RESPONSE_FCS_ERROR));
        }

        if cx.signals.test_and_clear(self.chains.frame) {
            while let Some(raw) = self.chains.take_frame(cx.graph)? {
                let Some(frame) = FaxFrame::parse(&raw) else {
                    log::warn!("negotiate: ignoring malformed frame {:02x?}", raw);
                    continue;
                };
                cx.frame()[FRAMES_SEEN] += 1;
                cx.emit(SessionEvent::FrameReceived {
                    fcf: frame.fcf.to_byte(false),
                });
                if frame.last {
                    let byte = frame.fcf.to_byte(false) as i64;
                    if frame.fcf == Fcf::Dcs {
                        self.remote = Some(frames::parse_dcs(&frame.fif));
                    }
                    // Anything after the final frame is stale
                    self.chains.flush_rx(cx.graph, cx.signals)?;
                    cx.timers.disarm(self.timer);
                    return Ok(Transition::Return(byte));
                }
                log::debug!("negotiate: preliminary {:?}", frame.fcf);
                if frame.fcf == Fcf::Tsi {
                    self.remote_id = Some(frames::parse_id(&frame.fif));
                }
                self.preliminary.push(frame);
            }
        }

        if cx.frame()[PHASE] == PHASE_T4 && cx.signals.test_and_clear(self.chains.flag) {
            // Flags mean a response is under way; give it T2 to complete
            cx.frame()[PHASE] = PHASE_T2;
            let t2 = self.t2;
            cx.arm(self.timer, t2);
        }

        if cx.signals.test_and_clear(self.timer) {
            let phase = if cx.frame()[PHASE] == PHASE_T4 { "T4" } else { "T2" };
            log::warn!(
                "negotiate: {} expired after {} frame(s)",
                phase,
                cx.frame()[FRAMES_SEEN]
            );
            return Ok(Transition::Return(RESPONSE_TIMEOUT));
        }
        Ok(Transition::Yield)
    }

    fn dispatch(&mut self, cx: &mut Context<'_>) -> Transition<NegotiateState> {
        let response = cx.ret();
        match response {
            RESPONSE_TIMEOUT => {
                if self.dis_sent > self.dis_limit {
                    log::warn!("negotiate: no response to {} DIS", self.dis_sent);
                    return self.finish(TerminationReason::Timeout);
                }
                Transition::Continue(NegotiateState::SendDis)
            }
            RESPONSE_FCS_ERROR => {
                if self.crp_sent >= self.crp_limit {
                    self.reason = Some(TerminationReason::RetryLimit);
                    return Transition::Continue(NegotiateState::SendDcn);
                }
                Transition::Continue(NegotiateState::SendCrp)
            }
            RESPONSE_FAULT => self.finish(TerminationReason::LineFailure),
            byte => match Fcf::from_byte(byte as u8) {
                Fcf::Dcs => {
                    log::info!("negotiate: DCS accepted, sending CFR");
                    self.reason = Some(TerminationReason::Completed);
                    self.send_then(
                        cx,
                        vec![frames::build_simple(Fcf::Cfr)],
                        NegotiateState::Terminate,
                    )
                }
                Fcf::Dcn => {
                    log::info!("negotiate: remote disconnected");
                    self.finish(TerminationReason::RemoteDisconnect)
                }
                Fcf::Crp => {
                    if self.crp_sent >= self.crp_limit {
                        self.reason = Some(TerminationReason::RetryLimit);
                        return Transition::Continue(NegotiateState::SendDcn);
                    }
                    self.crp_sent += 1;
                    log::info!("negotiate: remote asked for a repeat");
                    Transition::Continue(NegotiateState::SendDis)
                }
                other => {
                    log::warn!("negotiate: unexpected {:?} in phase B", other);
                    self.reason = Some(TerminationReason::Unsupported);
                    Transition::Continue(NegotiateState::SendDcn)
                }
            },
        }
    }
}

impl StateMachine for NegotiateMachine {
    type State = NegotiateState;

    fn name(&self) -> &str {
        "fax-negotiate"
    }

    fn initial(&self) -> NegotiateState {
        NegotiateState::AwaitLine
    }

    fn frame_size(&self, state: NegotiateState) -> usize {
        match state {
            NegotiateState::ResponseReceived => 2,
            _ => 0,
        }
    }

    fn step(&mut self, state: NegotiateState, cx: &mut Context<'_>) -> Transition<NegotiateState> {
        if self.trace.last().map(|(_, s)| *s) != Some(state) {
            self.trace.push((cx.now(), state));
        }
        match state {
            NegotiateState::AwaitLine => match self.line {
                Some(line) => Transition::Wait {
                    signal: line.settled,
                    ticks: None,
                    then: NegotiateState::LineSettled,
                },
                None => Transition::Continue(NegotiateState::Start),
            },
            NegotiateState::LineSettled => {
                let failed = self.line.is_some_and(|line| cx.signals.test_and_clear(line.failed));
                if failed {
                    // Reported by line init; nothing went out on the line
                    log::warn!("negotiate: line failed, not answering");
                    self.reason = Some(TerminationReason::LineFailure);
                    return Transition::Exit;
                }
                Transition::Continue(NegotiateState::Start)
            }
            NegotiateState::Start => {
                log::info!("negotiate: answering");
                if let Err(e) = self.chains.transmit(cx.graph, TxSource::Silence) {
                    return self.fault(e);
                }
                Transition::Wait {
                    signal: self.timer,
                    ticks: Some(self.pre_ced),
                    then: NegotiateState::Ced,
                }
            }
            NegotiateState::Ced => {
                if let Err(e) = self.chains.transmit(cx.graph, TxSource::Ced) {
                    return self.fault(e);
                }
                Transition::Wait {
                    signal: self.timer,
                    ticks: Some(self.ced),
                    then: NegotiateState::CedDone,
                }
            }
            NegotiateState::CedDone => {
                if let Err(e) = self.chains.transmit(cx.graph, TxSource::Silence) {
                    return self.fault(e);
                }
                Transition::Wait {
                    signal: self.timer,
                    ticks: Some(self.post_ced),
                    then: NegotiateState::SendDis,
                }
            }
            NegotiateState::SendDis => {
                self.dis_sent += 1;
                log::info!("negotiate: DIS #{}", self.dis_sent);
                let burst = vec![self.csi.clone(), self.dis.clone()];
                self.send_then(cx, burst, NegotiateState::DisSent)
            }
            NegotiateState::DisSent => {
                if cx.ret() == RESPONSE_FAULT {
                    return self.finish(TerminationReason::LineFailure);
                }
                Transition::Call {
                    callee: NegotiateState::ResponseReceived,
                    arg: self.dis_sent as i64,
                    ret: NegotiateState::Dispatch,
                }
            }
            NegotiateState::Dispatch => self.dispatch(cx),
            NegotiateState::SendCrp => {
                self.crp_sent += 1;
                log::info!("negotiate: CRP #{}", self.crp_sent);
                self.send_then(
                    cx,
                    vec![frames::build_simple(Fcf::Crp)],
                    NegotiateState::DisSent,
                )
            }
            NegotiateState::SendDcn => {
                log::info!("negotiate: sending DCN");
                self.send_then(
                    cx,
                    vec![frames::build_simple(Fcf::Dcn)],
                    NegotiateState::Terminate,
                )
            }
            NegotiateState::Terminate => {
                if let Err(e) = self.chains.transmit(cx.graph, TxSource::Silence) {
                    log::error!("negotiate: cannot silence line: {}", e);
                }
                let reason = *self.reason.get_or_insert(TerminationReason::Completed);
                log::info!("negotiate: call terminated, {}", reason);
                cx.emit(SessionEvent::CallTerminated { reason });
                Transition::Exit
            }

            NegotiateState::AwaitTxDone => match self.chains.tx_idle(cx.graph) {
                Ok(true) => match self.chains.transmit(cx.graph, TxSource::Silence) {
                    Ok(()) => Transition::Return(0),
                    Err(e) => {
                        log::error!("negotiate: cannot silence line: {}", e);
                        Transition::Return(RESPONSE_FAULT)
                    }
                },
                Ok(false) => Transition::Yield,
                Err(e) => {
                    log::error!("negotiate: framer unavailable: {}", e);
                    Transition::Return(RESPONSE_FAULT)
                }
            },
            NegotiateState::ResponseReceived => {
                if let Err(e) = self.chains.flush_rx(cx.graph, cx.signals) {
                    log::error!("negotiate: deframer unavailable: {}", e);
                    return Transition::Return(RESPONSE_FAULT);
                }
                cx.frame()[PHASE] = PHASE_T4;
                let t4 = self.t4;
                cx.arm(self.timer, t4);
                Transition::Continue(NegotiateState::ResponseWait)
            }
            NegotiateState::ResponseWait => match self.poll_response(cx) {
                Ok(transition) => transition,
                Err(e) => {
                    log::error!("negotiate: deframer unavailable: {}", e);
                    Transition::Return(RESPONSE_FAULT)
                }
            },
        }
    }
}
