//! HDLC framer and deframer modules built on the `framing` primitives.

use std::collections::VecDeque;

use crate::error::{ModemError, Result};
use crate::framing::{self, DeframeEvent, Deframer};
use crate::graph::Port;
use crate::module::{Block, Command, Module, Reply, UnitType};
use crate::registry::{HDLCRX, HDLCTX};
use crate::signal::SignalId;

/// Address octet used on the fax control channel
pub const BROADCAST_ADDRESS: u8 = 0xFF;

#[derive(Debug, Clone)]
pub struct HdlcEncoderConfig {
    /// Prepended to every frame when set
    pub address: Option<u8>,
    /// Flags sent before the first frame of a burst
    pub preamble_flags: usize,
}

impl Default for HdlcEncoderConfig {
    fn default() -> Self {
        Self {
            address: Some(BROADCAST_ADDRESS),
            // One second of flags at 300 bit/s
            preamble_flags: 38,
        }
    }
}

/// Frames in, stuffed bits out.
///
/// Frames arrive either through `Command::SendFrame` (then leave as the
/// downstream pulls) or as pushed `Bytes` blocks, one frame per block, which
/// are flushed downstream at once. With nothing queued the output idles at
/// mark (ones).
pub struct HdlcEncoder {
    config: HdlcEncoderConfig,
    bits: VecDeque<u8>,
    out: Vec<u8>,
    frames_sent: u64,
}

impl HdlcEncoder {
    pub fn new(config: HdlcEncoderConfig) -> Self {
        Self {
            config,
            bits: VecDeque::new(),
            out: Vec::new(),
            frames_sent: 0,
        }
    }

    fn queue_frame(&mut self, payload: &[u8]) {
        let mut bits = Vec::new();
        if self.bits.is_empty() {
            for _ in 0..self.config.preamble_flags.max(1) {
                framing::push_flag(&mut bits);
            }
        }
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend(self.config.address);
        frame.extend_from_slice(payload);
        framing::push_stuffed_frame(&frame, &mut bits);
        // Closing flag, plus a spare so the line can drop as soon as the
        // queue empties without clipping the closing one
        framing::push_flag(&mut bits);
        framing::push_flag(&mut bits);
        log::debug!("hdlctx: queued {} byte frame as {} bits", frame.len(), bits.len());
        self.bits.extend(bits);
        self.frames_sent += 1;
    }
}

impl Module for HdlcEncoder {
    fn kind(&self) -> &'static str {
        HDLCTX
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(UnitType::Bytes)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::BitsUnpacked)
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        let Block::Bytes(payload) = block else {
            return Err(ModemError::UnitMismatch {
                expected: UnitType::Bytes,
                found: block.unit(),
            });
        };
        self.queue_frame(payload);
        self.out.clear();
        self.out.extend(self.bits.drain(..));
        port.emit(Block::BitsUnpacked(&self.out))?;
        Ok(payload.len())
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        self.out.clear();
        let take = units.min(self.bits.len());
        self.out.extend(self.bits.drain(..take));
        self.out.resize(units, 1);
        port.emit(Block::BitsUnpacked(&self.out))?;
        Ok(())
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::SendFrame(payload) => {
                self.queue_frame(&payload);
                Ok(Reply::Ack)
            }
            Command::IsIdle => Ok(Reply::Idle(self.bits.is_empty())),
            Command::Counters => Ok(Reply::Counters {
                good: self.frames_sent,
                bad: 0,
            }),
            Command::Reset => {
                self.bits.clear();
                Ok(Reply::Ack)
            }
            other => Err(ModemError::UnsupportedCommand {
                kind: HDLCTX,
                command: other.name(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HdlcDecoderConfig {
    /// Set on every flag
    pub flag: Option<SignalId>,
    /// Set when a frame with a good FCS completes
    pub frame: Option<SignalId>,
    /// Set when an octet-aligned frame fails its FCS
    pub fcs_error: Option<SignalId>,
}

/// Bits in, frames out.
///
/// Good frames (FCS stripped, address kept) are queued for `TakeFrame` and
/// emitted downstream as one `Bytes` block each.
pub struct HdlcDecoder {
    config: HdlcDecoderConfig,
    deframer: Deframer,
    frames: VecDeque<Vec<u8>>,
    good: u64,
    bad: u64,
}

impl HdlcDecoder {
    pub fn new(config: HdlcDecoderConfig) -> Self {
        Self {
            config,
            deframer: Deframer::new(),
            frames: VecDeque::new(),
            good: 0,
            bad: 0,
        }
    }
}

impl Module for HdlcDecoder {
    fn kind(&self) -> &'static str {
        HDLCRX
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(UnitType::BitsUnpacked)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::Bytes)
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        let Block::BitsUnpacked(bits) = block else {
            return Err(ModemError::UnitMismatch {
                expected: UnitType::BitsUnpacked,
                found: block.unit(),
            });
        };
        for &bit in bits {
            let Some(event) = self.deframer.push(bit) else {
                continue;
            };
            // Every event except an abort was triggered by a flag
            if event != DeframeEvent::Abort {
                if let Some(id) = self.config.flag {
                    port.signals().set(id);
                }
            }
            match event {
                DeframeEvent::Flag => {}
                DeframeEvent::Frame(frame) => {
                    self.good += 1;
                    log::debug!("hdlcrx: good frame, {} bytes", frame.len());
                    if let Some(id) = self.config.frame {
                        port.signals().set(id);
                    }
                    port.emit(Block::Bytes(&frame))?;
                    self.frames.push_back(frame);
                }
                DeframeEvent::FcsError(len) => {
                    self.bad += 1;
                    log::warn!("hdlcrx: FCS error on {} byte frame", len);
                    if let Some(id) = self.config.fcs_error {
                        port.signals().set(id);
                    }
                }
                DeframeEvent::Abort => log::debug!("hdlcrx: abort"),
            }
        }
        Ok(bits.len())
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        // Frames are not a fixed bit count; pull enough bits for `units` bytes
        // of payload without stuffing and let framing decide what comes out.
        if let Some(bits) = port.pull(units * 8)?.and_then(|b| b.into_bits()) {
            self.handle_input(Block::BitsUnpacked(&bits), port)?;
        }
        Ok(())
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::TakeFrame => Ok(Reply::Frame(self.frames.pop_front())),
            Command::Counters => Ok(Reply::Counters {
                good: self.good,
                bad: self.bad,
            }),
            Command::IsIdle => Ok(Reply::Idle(self.frames.is_empty())),
            Command::Reset => {
                self.deframer.reset();
                self.frames.clear();
                Ok(Reply::Ack)
            }
            other => Err(ModemError::UnsupportedCommand {
                kind: HDLCRX,
                command: other.name(),
            }),
        }
    }
}
