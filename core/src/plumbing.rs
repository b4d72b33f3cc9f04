//! Unit-preserving and unit-converting glue modules.

use crate::error::{ModemError, Result};
use crate::graph::Port;
use crate::module::{Block, Module, UnitType};
use crate::registry::{PACK, REPLICATE};

/// Forwards every block to all of its downstream links.
pub struct Replicate {
    unit: UnitType,
}

impl Replicate {
    pub fn new(unit: UnitType) -> Self {
        Self { unit }
    }
}

impl Module for Replicate {
    fn kind(&self) -> &'static str {
        REPLICATE
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(self.unit)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(self.unit)
    }

    fn fan_out(&self) -> bool {
        true
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        port.emit(block)
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        if let Some(buffer) = port.pull(units)? {
            port.emit(buffer.as_block())?;
        }
        Ok(())
    }
}

/// One-bit-per-byte in, eight-bits-per-byte (LSB first) out.
///
/// Output is emitted a whole octet at a time; trailing bits wait for the next
/// block.
pub struct Pack {
    partial: u8,
    count: usize,
    out: Vec<u8>,
}

impl Pack {
    pub fn new() -> Self {
        Self {
            partial: 0,
            count: 0,
            out: Vec::new(),
        }
    }

    fn pack(&mut self, bits: &[u8]) {
        self.out.clear();
        for &bit in bits {
            self.partial |= ((bit != 0) as u8) << self.count;
            self.count += 1;
            if self.count == 8 {
                self.out.push(self.partial);
                self.partial = 0;
                self.count = 0;
            }
        }
    }
}

impl Default for Pack {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Pack {
    fn kind(&self) -> &'static str {
        PACK
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(UnitType::BitsUnpacked)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::BitsPacked)
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        let Block::BitsUnpacked(bits) = block else {
            return Err(ModemError::UnitMismatch {
                expected: UnitType::BitsUnpacked,
                found: block.unit(),
            });
        };
        self.pack(bits);
        if !self.out.is_empty() {
            port.emit(Block::BitsPacked {
                data: &self.out,
                bits: self.out.len() * 8,
            })?;
        }
        Ok(bits.len())
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        let wanted = units.saturating_sub(self.count);
        if let Some(bits) = port.pull(wanted)?.and_then(|b| b.into_bits()) {
            self.handle_input(Block::BitsUnpacked(&bits), port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Capture, CaptureConfig};
    use crate::graph::Graph;
    use crate::module::{Buffer, Command, Reply};
    use crate::signal::SignalBus;

    #[test]
    fn test_replicate_feeds_every_branch() {
        let mut graph = Graph::new();
        let mut bus = SignalBus::new();
        let fan = graph.insert(Box::new(Replicate::new(UnitType::Samples16)));
        let a = graph.insert(Box::new(
            Capture::new(CaptureConfig::new(UnitType::Samples16, 100)).unwrap(),
        ));
        let b = graph.insert(Box::new(
            Capture::new(CaptureConfig::new(UnitType::Samples16, 100)).unwrap(),
        ));
        graph.connect(fan, a).unwrap();
        graph.connect(fan, b).unwrap();
        assert_eq!(graph.sendto(fan).unwrap(), &[a, b]);

        graph.push(fan, Block::Samples(&[1, 2, 3]), &mut bus).unwrap();
        for sink in [a, b] {
            assert_eq!(
                graph.command(sink, Command::Drain).unwrap(),
                Reply::Data(Buffer::Samples(vec![1, 2, 3]))
            );
        }
    }

    #[test]
    fn test_pack_lsb_first_across_blocks() {
        let mut graph = Graph::new();
        let mut bus = SignalBus::new();
        let pack = graph.insert(Box::new(Pack::new()));
        let sink = graph.insert(Box::new(
            Capture::new(CaptureConfig::new(UnitType::BitsPacked, 64)).unwrap(),
        ));
        graph.connect(pack, sink).unwrap();

        graph
            .push(pack, Block::BitsUnpacked(&[0, 1, 1, 1, 1]), &mut bus)
            .unwrap();
        graph
            .push(pack, Block::BitsUnpacked(&[1, 1, 0, 1]), &mut bus)
            .unwrap();
        assert_eq!(
            graph.command(sink, Command::Drain).unwrap(),
            Reply::Data(Buffer::BitsPacked {
                data: vec![0x7E],
                bits: 8
            })
        );
    }
}
