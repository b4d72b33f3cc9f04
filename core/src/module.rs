//! The processing-unit contract shared by every DSP and framing module.
//!
//! A module consumes typed blocks (`handle_input`), answers pull requests
//! (`handle_demand`) and takes out-of-band `Command`s. It never touches its
//! own links: the `Port` handed to each callback is the only way to reach the
//! rest of the graph.

use crate::error::{ModemError, Result};
use crate::graph::Port;

/// What one "unit" of data means on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitType {
    /// Signed 16-bit audio samples
    Samples16,
    /// Bits packed LSB-first, eight per byte
    BitsPacked,
    /// One bit per byte, value 0 or 1
    BitsUnpacked,
    /// Whole octets
    Bytes,
}

/// Borrowed view of a block of units.
#[derive(Debug, Clone, Copy)]
pub enum Block<'a> {
    Samples(&'a [i16]),
    BitsPacked { data: &'a [u8], bits: usize },
    BitsUnpacked(&'a [u8]),
    Bytes(&'a [u8]),
}

impl<'a> Block<'a> {
    pub fn unit(&self) -> UnitType {
        match self {
            Block::Samples(_) => UnitType::Samples16,
            Block::BitsPacked { .. } => UnitType::BitsPacked,
            Block::BitsUnpacked(_) => UnitType::BitsUnpacked,
            Block::Bytes(_) => UnitType::Bytes,
        }
    }

    /// Length in units, not bytes.
    pub fn len(&self) -> usize {
        match self {
            Block::Samples(s) => s.len(),
            Block::BitsPacked { bits, .. } => *bits,
            Block::BitsUnpacked(b) | Block::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Units from `start` onwards, used to retry after partial consumption.
    ///
    /// Packed bits can only be split on a byte boundary: `None` when `start`
    /// falls inside an octet.
    pub fn tail(&self, start: usize) -> Option<Block<'a>> {
        let tail = match *self {
            Block::Samples(s) => Block::Samples(&s[start.min(s.len())..]),
            Block::BitsPacked { data, bits } => {
                if start >= bits {
                    return Some(Block::BitsPacked {
                        data: &data[data.len()..],
                        bits: 0,
                    });
                }
                if start % 8 != 0 {
                    return None;
                }
                let byte = (start / 8).min(data.len());
                Block::BitsPacked {
                    data: &data[byte..],
                    bits: bits.saturating_sub(byte * 8),
                }
            }
            Block::BitsUnpacked(b) => Block::BitsUnpacked(&b[start.min(b.len())..]),
            Block::Bytes(b) => Block::Bytes(&b[start.min(b.len())..]),
        };
        Some(tail)
    }

    pub fn to_buffer(&self) -> Buffer {
        let mut buffer = Buffer::empty(self.unit());
        // Same unit by construction
        let _ = buffer.append(*self);
        buffer
    }
}

/// Owned block of units.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Samples(Vec<i16>),
    BitsPacked { data: Vec<u8>, bits: usize },
    BitsUnpacked(Vec<u8>),
    Bytes(Vec<u8>),
}

impl Buffer {
    pub fn empty(unit: UnitType) -> Self {
        match unit {
            UnitType::Samples16 => Buffer::Samples(Vec::new()),
            UnitType::BitsPacked => Buffer::BitsPacked {
                data: Vec::new(),
                bits: 0,
            },
            UnitType::BitsUnpacked => Buffer::BitsUnpacked(Vec::new()),
            UnitType::Bytes => Buffer::Bytes(Vec::new()),
        }
    }

    pub fn unit(&self) -> UnitType {
        self.as_block().unit()
    }

    pub fn len(&self) -> usize {
        self.as_block().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_block(&self) -> Block<'_> {
        match self {
            Buffer::Samples(s) => Block::Samples(s),
            Buffer::BitsPacked { data, bits } => Block::BitsPacked { data, bits: *bits },
            Buffer::BitsUnpacked(b) => Block::BitsUnpacked(b),
            Buffer::Bytes(b) => Block::Bytes(b),
        }
    }

    pub fn append(&mut self, block: Block<'_>) -> Result<()> {
        match (self, block) {
            (Buffer::Samples(dst), Block::Samples(src)) => dst.extend_from_slice(src),
            (Buffer::BitsUnpacked(dst), Block::BitsUnpacked(src)) => dst.extend_from_slice(src),
            (Buffer::Bytes(dst), Block::Bytes(src)) => dst.extend_from_slice(src),
            (Buffer::BitsPacked { data, bits }, Block::BitsPacked { data: src, bits: n }) => {
                for i in 0..n {
                    let bit = src[i / 8] >> (i % 8) & 1;
                    if *bits % 8 == 0 {
                        data.push(0);
                    }
                    if let Some(last) = data.last_mut() {
                        *last |= bit << (*bits % 8);
                    }
                    *bits += 1;
                }
            }
            (dst, src) => {
                return Err(ModemError::UnitMismatch {
                    expected: dst.unit(),
                    found: src.unit(),
                })
            }
        }
        Ok(())
    }

    pub fn into_samples(self) -> Option<Vec<i16>> {
        match self {
            Buffer::Samples(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_bits(self) -> Option<Vec<u8>> {
        match self {
            Buffer::BitsUnpacked(b) => Some(b),
            _ => None,
        }
    }

    /// Raw storage for byte-like units (bytes and packed bits).
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Buffer::Bytes(b) => Some(b),
            Buffer::BitsPacked { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Out-of-band control. Each module accepts the subset that makes sense for
/// it and answers `UnsupportedCommand` for the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Enable(bool),
    SetFrequency(f32),
    SetScale(f32),
    SendFrame(Vec<u8>),
    IsIdle,
    TakeFrame,
    Drain,
    Counters,
    Reset,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Enable(_) => "enable",
            Command::SetFrequency(_) => "set-frequency",
            Command::SetScale(_) => "set-scale",
            Command::SendFrame(_) => "send-frame",
            Command::IsIdle => "is-idle",
            Command::TakeFrame => "take-frame",
            Command::Drain => "drain",
            Command::Counters => "counters",
            Command::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Idle(bool),
    Frame(Option<Vec<u8>>),
    Data(Buffer),
    Counters { good: u64, bad: u64 },
}

pub trait Module {
    /// Registry name of the kind, used in diagnostics.
    fn kind(&self) -> &'static str;

    /// Unit accepted by `handle_input`; `None` for pure sources.
    fn input_unit(&self) -> Option<UnitType>;

    /// Unit emitted downstream; `None` for pure sinks.
    fn output_unit(&self) -> Option<UnitType>;

    /// Fan-out modules keep every downstream link `connect` gives them
    /// instead of replacing the previous one.
    fn fan_out(&self) -> bool {
        false
    }

    /// Accept `block`, possibly emitting derived data through `port`.
    /// Returns how many units were consumed; fewer than `block.len()` means
    /// backpressure and the caller retries the rest later.
    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize>;

    /// Produce `units` output units through `port`, pulling from upstream if
    /// this module is a filter.
    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()>;

    fn command(&mut self, command: Command) -> Result<Reply> {
        Err(ModemError::UnsupportedCommand {
            kind: self.kind(),
            command: command.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_append_crosses_bytes() {
        let mut buffer = Buffer::empty(UnitType::BitsPacked);
        buffer
            .append(Block::BitsPacked {
                data: &[0b101],
                bits: 3,
            })
            .unwrap();
        buffer
            .append(Block::BitsPacked {
                data: &[0xFF],
                bits: 7,
            })
            .unwrap();
        assert_eq!(buffer.len(), 10);
        assert_eq!(
            buffer,
            Buffer::BitsPacked {
                data: vec![0b1111_1101, 0b11],
                bits: 10
            }
        );
    }

    #[test]
    fn test_append_rejects_other_unit() {
        let mut buffer = Buffer::empty(UnitType::Samples16);
        match buffer.append(Block::Bytes(&[1, 2])) {
            Err(ModemError::UnitMismatch { expected, found }) => {
                assert_eq!(expected, UnitType::Samples16);
                assert_eq!(found, UnitType::Bytes);
            }
            _ => panic!("Expected UnitMismatch error"),
        }
    }

    #[test]
    fn test_tail() {
        let samples = [1i16, 2, 3, 4];
        let block = Block::Samples(&samples);
        assert_eq!(block.tail(3).map(|b| b.len()), Some(1));
        assert_eq!(block.tail(10).map(|b| b.len()), Some(0));
        let packed = Block::BitsPacked {
            data: &[0xAA, 0x55],
            bits: 12,
        };
        assert_eq!(packed.tail(8).map(|b| b.len()), Some(4));
        assert_eq!(packed.tail(12).map(|b| b.len()), Some(0));
    }

    #[test]
    fn test_packed_tail_refuses_mid_octet_split() {
        let packed = Block::BitsPacked {
            data: &[0xAA, 0x55],
            bits: 12,
        };
        // Splitting at bit 5 would resend bits 0..5 of the first byte
        assert!(packed.tail(5).is_none());
        assert!(packed.tail(9).is_none());
        assert!(packed.tail(0).is_some());
    }
}
