use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::error::{ModemError, Result};
use crate::graph::Port;
use crate::module::{Block, Command, Module, Reply, UnitType};
use crate::registry::{FSKDEMOD, FSKMOD};

// V.21 300 bit/s FSK
//
// Channel 1 (originating direction): mark 980 Hz, space 1180 Hz
// Channel 2 (answering direction):   mark 1650 Hz, space 1850 Hz
//
// T.30 runs its whole control phase on channel 2, in both directions.

/// V.21 symbol rate
pub const V21_BAUD: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V21Channel {
    Channel1,
    Channel2,
}

impl V21Channel {
    /// (mark, space) in Hz; mark carries binary 1
    pub fn tones(self) -> (f32, f32) {
        match self {
            V21Channel::Channel1 => (980.0, 1180.0),
            V21Channel::Channel2 => (1650.0, 1850.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FskConfig {
    pub channel: V21Channel,
    pub rate: u32,
    pub baud: u32,
    /// Modulator peak amplitude
    pub scale: f32,
    /// Demodulator carrier-detect level, as a peak amplitude
    pub carrier_threshold: f32,
}

impl FskConfig {
    pub fn v21(channel: V21Channel) -> Self {
        Self {
            channel,
            rate: crate::SAMPLE_RATE as u32,
            baud: V21_BAUD,
            scale: 8000.0,
            carrier_threshold: 200.0,
        }
    }

    fn validate(&self, kind: &str) -> Result<()> {
        if self.rate == 0 || self.baud == 0 {
            return Err(ModemError::construction(kind, "rate and baud must be non-zero"));
        }
        if self.baud * 4 > self.rate {
            return Err(ModemError::construction(
                kind,
                format!("baud {} too high for rate {}", self.baud, self.rate),
            ));
        }
        let (mark, space) = self.channel.tones();
        if mark.max(space) >= self.rate as f32 / 2.0 {
            return Err(ModemError::construction(
                kind,
                format!("tones above Nyquist for rate {}", self.rate),
            ));
        }
        if !(0.0..=i16::MAX as f32).contains(&self.scale) {
            return Err(ModemError::construction(kind, format!("scale {} out of range", self.scale)));
        }
        Ok(())
    }
}

/// Continuous-phase FSK modulator: unpacked bits in, samples out.
///
/// In pull mode it asks upstream for exactly the bits the requested samples
/// span and pads with mark (idle) if upstream runs dry.
pub struct FskModulator {
    rate: u32,
    baud: u32,
    scale: f64,
    mark_step: f64,
    space_step: f64,
    phase: f64,
    /// Progress through the current bit, in units of 1/(rate*baud) s
    clock: u32,
    current: Option<u8>,
    bits: VecDeque<u8>,
    out: Vec<i16>,
}

impl FskModulator {
    pub fn new(config: FskConfig) -> Result<Self> {
        config.validate(FSKMOD)?;
        let (mark, space) = config.channel.tones();
        Ok(Self {
            rate: config.rate,
            baud: config.baud,
            scale: config.scale as f64,
            mark_step: 2.0 * PI * mark as f64 / config.rate as f64,
            space_step: 2.0 * PI * space as f64 / config.rate as f64,
            phase: 0.0,
            clock: 0,
            current: None,
            bits: VecDeque::new(),
            out: Vec::new(),
        })
    }

    /// How many new bits `samples` more samples will start.
    fn bits_needed(&self, samples: usize) -> usize {
        let mut clock = self.clock;
        let mut have = self.current.is_some();
        let mut needed = 0;
        for _ in 0..samples {
            if !have {
                needed += 1;
                have = true;
            }
            clock += self.baud;
            if clock >= self.rate {
                clock -= self.rate;
                have = false;
            }
        }
        needed
    }

    fn next_sample(&mut self) -> i16 {
        let bit = match self.current {
            Some(bit) => bit,
            None => {
                let bit = self.bits.pop_front().unwrap_or(1);
                self.current = Some(bit);
                bit
            }
        };
        self.phase += if bit != 0 { self.mark_step } else { self.space_step };
        if self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        self.clock += self.baud;
        if self.clock >= self.rate {
            self.clock -= self.rate;
            self.current = None;
        }
        (self.phase.sin() * self.scale).round() as i16
    }

    fn is_idle(&self) -> bool {
        self.current.is_none() && self.bits.is_empty()
    }
}

impl Module for FskModulator {
    fn kind(&self) -> &'static str {
        FSKMOD
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(UnitType::BitsUnpacked)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::Samples16)
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        let Block::BitsUnpacked(bits) = block else {
            return Err(ModemError::UnitMismatch {
                expected: UnitType::BitsUnpacked,
                found: block.unit(),
            });
        };
        self.bits.extend(bits.iter().map(|&b| (b != 0) as u8));
        self.out.clear();
        while !self.is_idle() {
            let sample = self.next_sample();
            self.out.push(sample);
        }
        port.emit(Block::Samples(&self.out))?;
        Ok(bits.len())
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        let needed = self.bits_needed(units);
        if needed > self.bits.len() {
            let shortfall = needed - self.bits.len();
            if let Some(bits) = port.pull(shortfall)?.and_then(|b| b.into_bits()) {
                self.bits.extend(bits.iter().map(|&b| (b != 0) as u8));
            }
        }
        self.out.clear();
        for _ in 0..units {
            let sample = self.next_sample();
            self.out.push(sample);
        }
        port.emit(Block::Samples(&self.out))?;
        Ok(())
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::IsIdle => Ok(Reply::Idle(self.is_idle())),
            Command::SetScale(scale) => {
                self.scale = scale as f64;
                Ok(Reply::Ack)
            }
            Command::Reset => {
                self.bits.clear();
                self.current = None;
                self.clock = 0;
                self.phase = 0.0;
                Ok(Reply::Ack)
            }
            other => Err(ModemError::UnsupportedCommand {
                kind: FSKMOD,
                command: other.name(),
            }),
        }
    }
}

/// Non-coherent FSK demodulator: samples in, unpacked bits out.
///
/// Mark and space energies come from sliding quadrature correlators one bit
/// long. The bit clock re-centres on every decision edge and samples the
/// decision once per bit. Below the carrier threshold nothing is emitted.
pub struct FskDemodulator {
    rate: u32,
    baud: u32,
    mark_step: f64,
    space_step: f64,
    mark_phase: f64,
    space_phase: f64,
    /// Per-sample correlator products: mark I/Q, space I/Q
    ring: Vec<[f32; 4]>,
    cursor: usize,
    sums: [f32; 4],
    threshold: f32,
    last: Option<u8>,
    clock: u32,
    out: Vec<u8>,
}

impl FskDemodulator {
    pub fn new(config: FskConfig) -> Result<Self> {
        config.validate(FSKDEMOD)?;
        let (mark, space) = config.channel.tones();
        let window = (config.rate as f32 / config.baud as f32).round() as usize;
        // Correlator output for a tone of this peak amplitude is window * amp / 2
        let level = window as f32 * config.carrier_threshold / 2.0;
        Ok(Self {
            rate: config.rate,
            baud: config.baud,
            mark_step: 2.0 * PI * mark as f64 / config.rate as f64,
            space_step: 2.0 * PI * space as f64 / config.rate as f64,
            mark_phase: 0.0,
            space_phase: 0.0,
            ring: vec![[0.0; 4]; window],
            cursor: 0,
            sums: [0.0; 4],
            threshold: level * level,
            last: None,
            clock: 0,
            out: Vec::new(),
        })
    }

    fn correlate(&mut self, sample: i16) -> (f32, f32) {
        let x = sample as f32;
        let products = [
            x * self.mark_phase.cos() as f32,
            x * self.mark_phase.sin() as f32,
            x * self.space_phase.cos() as f32,
            x * self.space_phase.sin() as f32,
        ];
        self.mark_phase += self.mark_step;
        if self.mark_phase >= 2.0 * PI {
            self.mark_phase -= 2.0 * PI;
        }
        self.space_phase += self.space_step;
        if self.space_phase >= 2.0 * PI {
            self.space_phase -= 2.0 * PI;
        }

        let old = self.ring[self.cursor];
        self.ring[self.cursor] = products;
        self.cursor += 1;
        if self.cursor == self.ring.len() {
            self.cursor = 0;
            // Recompute from scratch once per window to stop rounding drift
            self.sums = [0.0; 4];
            for p in &self.ring {
                for k in 0..4 {
                    self.sums[k] += p[k];
                }
            }
        } else {
            for k in 0..4 {
                self.sums[k] += products[k] - old[k];
            }
        }

        let mark = self.sums[0] * self.sums[0] + self.sums[1] * self.sums[1];
        let space = self.sums[2] * self.sums[2] + self.sums[3] * self.sums[3];
        (mark, space)
    }

    fn demodulate(&mut self, sample: i16) -> Option<u8> {
        let (mark, space) = self.correlate(sample);
        if mark.max(space) < self.threshold {
            self.last = None;
            self.clock = 0;
            return None;
        }
        let decision = (mark > space) as u8;
        if self.last.is_some_and(|last| last != decision) {
            self.clock = self.rate / 2;
        }
        self.last = Some(decision);
        self.clock += self.baud;
        if self.clock >= self.rate {
            self.clock -= self.rate;
            return Some(decision);
        }
        None
    }
}

impl Module for FskDemodulator {
    fn kind(&self) -> &'static str {
        FSKDEMOD
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(UnitType::Samples16)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::BitsUnpacked)
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        let Block::Samples(samples) = block else {
            return Err(ModemError::UnitMismatch {
                expected: UnitType::Samples16,
                found: block.unit(),
            });
        };
        self.out.clear();
        for &sample in samples {
            if let Some(bit) = self.demodulate(sample) {
                self.out.push(bit);
            }
        }
        if !self.out.is_empty() {
            port.emit(Block::BitsUnpacked(&self.out))?;
        }
        Ok(samples.len())
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        // Roughly rate/baud samples per bit, plus one bit of slack
        let per_bit = (self.rate / self.baud) as usize + 1;
        if let Some(samples) = port.pull((units + 1) * per_bit)?.and_then(|b| b.into_samples()) {
            self.handle_input(Block::Samples(&samples), port)?;
        }
        Ok(())
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Reset => {
                self.ring.iter_mut().for_each(|p| *p = [0.0; 4]);
                self.sums = [0.0; 4];
                self.cursor = 0;
                self.last = None;
                self.clock = 0;
                Ok(Reply::Ack)
            }
            other => Err(ModemError::UnsupportedCommand {
                kind: FSKDEMOD,
                command: other.name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modulate(bits: &[u8], channel: V21Channel) -> Vec<i16> {
        let mut modulator = FskModulator::new(FskConfig::v21(channel)).unwrap();
        modulator.bits.extend(bits.iter().copied());
        let mut samples = Vec::new();
        while !modulator.is_idle() {
            samples.push(modulator.next_sample());
        }
        samples
    }

    fn demodulate(samples: &[i16], channel: V21Channel) -> Vec<u8> {
        let mut demodulator = FskDemodulator::new(FskConfig::v21(channel)).unwrap();
        samples
            .iter()
            .filter_map(|&s| demodulator.demodulate(s))
            .collect()
    }

    #[test]
    fn test_samples_per_bit() {
        // 8000 / 300 = 26.67 samples per bit on average
        let samples = modulate(&[1; 300], V21Channel::Channel2);
        assert_eq!(samples.len(), 8000);
    }

    #[test]
    fn test_bits_needed_matches_consumption() {
        let modulator = FskModulator::new(FskConfig::v21(V21Channel::Channel2)).unwrap();
        assert_eq!(modulator.bits_needed(0), 0);
        assert_eq!(modulator.bits_needed(1), 1);
        assert_eq!(modulator.bits_needed(27), 2);
        assert_eq!(modulator.bits_needed(8000), 300);
    }

    #[test]
    fn test_silence_yields_no_bits() {
        assert!(demodulate(&[0; 4000], V21Channel::Channel2).is_empty());
    }

    #[test]
    fn test_recovers_alternating_pattern() {
        let mut bits = vec![1u8; 16];
        for i in 0..64 {
            bits.push((i % 2) as u8);
        }
        bits.extend([1u8; 8]);
        for channel in [V21Channel::Channel1, V21Channel::Channel2] {
            let mut samples = vec![0i16; 100];
            samples.extend(modulate(&bits, channel));
            let recovered = demodulate(&samples, channel);
            let pattern: Vec<u8> = (0..64).map(|i| (i % 2) as u8).collect();
            assert!(
                recovered.windows(64).any(|w| w == pattern.as_slice()),
                "pattern not recovered on {:?}",
                channel
            );
        }
    }

    #[test]
    fn test_construction_checks() {
        let mut config = FskConfig::v21(V21Channel::Channel2);
        config.rate = 3000;
        assert!(FskModulator::new(config.clone()).is_err());
        config.rate = 8000;
        config.baud = 0;
        assert!(FskDemodulator::new(config).is_err());
    }
}
