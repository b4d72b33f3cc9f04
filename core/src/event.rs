//! Events surfaced from state machines to whatever drives the session.

use std::fmt;

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Negotiation reached an agreed set of capabilities
    Completed,
    /// The linear answer sequence ran to its end
    AnswerSequenceDone,
    /// The remote sent DCN
    RemoteDisconnect,
    /// The remote sent a command this side does not handle
    Unsupported,
    /// Too many FCS errors in a row
    RetryLimit,
    /// No response after the last DIS repetition
    Timeout,
    /// The line device never acknowledged initialisation
    LineFailure,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::Completed => "negotiation completed",
            TerminationReason::AnswerSequenceDone => "answer sequence done",
            TerminationReason::RemoteDisconnect => "remote disconnected",
            TerminationReason::Unsupported => "unsupported command from remote",
            TerminationReason::RetryLimit => "retry limit reached",
            TerminationReason::Timeout => "timed out waiting for remote",
            TerminationReason::LineFailure => "line initialisation failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LineReady,
    /// A control frame was queued for transmission; `fcf` without the X bit
    FrameSent { fcf: u8 },
    /// A good control frame arrived
    FrameReceived { fcf: u8 },
    CallTerminated { reason: TerminationReason },
}
