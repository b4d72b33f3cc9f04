//! Line sink: records whatever reaches it, up to a fixed capacity.

use crate::error::{ModemError, Result};
use crate::graph::Port;
use crate::module::{Block, Buffer, Command, Module, Reply, UnitType};
use crate::registry::CAPTURE;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub unit: UnitType,
    /// Units held before backpressure
    pub capacity: usize,
}

impl CaptureConfig {
    pub fn new(unit: UnitType, capacity: usize) -> Self {
        Self { unit, capacity }
    }
}

/// Terminal module of a chain. In pull mode it is the module the driver
/// demands from; in push mode it consumes only what fits and reports the rest
/// as not consumed.
pub struct Capture {
    capacity: usize,
    recorded: Buffer,
    total: u64,
    dropped: u64,
}

impl Capture {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(ModemError::construction(CAPTURE, "capacity must be non-zero"));
        }
        Ok(Self {
            capacity: config.capacity,
            recorded: Buffer::empty(config.unit),
            total: 0,
            dropped: 0,
        })
    }

    fn free(&self) -> usize {
        self.capacity.saturating_sub(self.recorded.len())
    }

    /// Record as much of `block` as fits, returning the units taken.
    fn record(&mut self, block: Block<'_>) -> Result<usize> {
        let free = self.free();
        let take = match block {
            // Packed bits split only on octet boundaries
            Block::BitsPacked { bits, .. } if bits > free => free / 8 * 8,
            _ => block.len().min(free),
        };
        let head = head(block, take);
        self.recorded.append(head)?;
        self.total += take as u64;
        if take < block.len() {
            self.dropped += (block.len() - take) as u64;
            log::warn!(
                "capture: full at {} units, refused {}",
                self.capacity,
                block.len() - take
            );
        }
        Ok(take)
    }
}

fn head(block: Block<'_>, len: usize) -> Block<'_> {
    match block {
        Block::Samples(s) => Block::Samples(&s[..len.min(s.len())]),
        Block::BitsPacked { data, bits } => {
            let bits = len.min(bits);
            Block::BitsPacked {
                data: &data[..bits.div_ceil(8).min(data.len())],
                bits,
            }
        }
        Block::BitsUnpacked(b) => Block::BitsUnpacked(&b[..len.min(b.len())]),
        Block::Bytes(b) => Block::Bytes(&b[..len.min(b.len())]),
    }
}

impl Module for Capture {
    fn kind(&self) -> &'static str {
        CAPTURE
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(self.recorded.unit())
    }

    fn output_unit(&self) -> Option<UnitType> {
        None
    }

    fn handle_input(&mut self, block: Block<'_>, _port: &mut Port<'_>) -> Result<usize> {
        self.record(block)
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        let wanted = units.min(self.free());
        if wanted < units {
            log::warn!("capture: demand of {} trimmed to {}", units, wanted);
        }
        if wanted == 0 {
            return Ok(());
        }
        match port.pull(wanted)? {
            Some(buffer) => {
                self.record(buffer.as_block())?;
                Ok(())
            }
            None => Err(ModemError::NotConnected(port.id())),
        }
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Drain => {
                let unit = self.recorded.unit();
                Ok(Reply::Data(std::mem::replace(
                    &mut self.recorded,
                    Buffer::empty(unit),
                )))
            }
            Command::Counters => Ok(Reply::Counters {
                good: self.total,
                bad: self.dropped,
            }),
            Command::IsIdle => Ok(Reply::Idle(self.recorded.is_empty())),
            Command::Reset => {
                self.recorded = Buffer::empty(self.recorded.unit());
                self.total = 0;
                self.dropped = 0;
                Ok(Reply::Ack)
            }
            other => Err(ModemError::UnsupportedCommand {
                kind: CAPTURE,
                command: other.name(),
            }),
        }
    }
}
