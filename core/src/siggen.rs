use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::error::{ModemError, Result};
use crate::graph::Port;
use crate::module::{Block, Command, Module, Reply, UnitType};
use crate::registry::{SIGGEN, SILENCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigGenMode {
    /// Sine wave at `frequency`, `scale` peak amplitude
    Sinusoid,
    /// Uniformly random bits, one per unit
    RandomBits,
}

#[derive(Debug, Clone)]
pub struct SigGenConfig {
    pub rate: u32,
    pub frequency: f32,
    pub scale: f32,
    pub mode: SigGenMode,
    /// Start producing immediately; a disabled generator emits silence
    /// (or idle ones in bit mode).
    pub enabled: bool,
    /// Fixed seed for the random-bit mode
    pub seed: Option<u64>,
}

impl SigGenConfig {
    pub fn tone(frequency: f32, scale: f32) -> Self {
        Self {
            rate: crate::SAMPLE_RATE as u32,
            frequency,
            scale,
            mode: SigGenMode::Sinusoid,
            enabled: true,
            seed: None,
        }
    }

    pub fn random_bits(seed: Option<u64>) -> Self {
        Self {
            rate: crate::SAMPLE_RATE as u32,
            frequency: 0.0,
            scale: 0.0,
            mode: SigGenMode::RandomBits,
            enabled: true,
            seed,
        }
    }
}

/// Tone or random-bit source.
pub struct SigGen {
    config: SigGenConfig,
    phase: f64,
    step: f64,
    rng: StdRng,
    samples: Vec<i16>,
    bits: Vec<u8>,
}

impl SigGen {
    pub fn new(config: SigGenConfig) -> Result<Self> {
        if config.rate == 0 {
            return Err(ModemError::construction(SIGGEN, "rate must be non-zero"));
        }
        if config.mode == SigGenMode::Sinusoid {
            check_frequency(config.frequency, config.rate)?;
            check_scale(config.scale)?;
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let step = 2.0 * PI * config.frequency as f64 / config.rate as f64;
        Ok(Self {
            config,
            phase: 0.0,
            step,
            rng,
            samples: Vec::new(),
            bits: Vec::new(),
        })
    }

    fn fill_samples(&mut self, units: usize) {
        self.samples.clear();
        if !self.config.enabled {
            self.samples.resize(units, 0);
            return;
        }
        let scale = self.config.scale as f64;
        for _ in 0..units {
            self.samples.push((self.phase.sin() * scale).round() as i16);
            self.phase += self.step;
            if self.phase >= 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }
    }

    fn fill_bits(&mut self, units: usize) {
        self.bits.clear();
        if !self.config.enabled {
            self.bits.resize(units, 1);
            return;
        }
        for _ in 0..units {
            self.bits.push(self.rng.gen::<bool>() as u8);
        }
    }
}

fn check_frequency(frequency: f32, rate: u32) -> Result<()> {
    if !(0.0..rate as f32 / 2.0).contains(&frequency) {
        return Err(ModemError::construction(
            SIGGEN,
            format!("frequency {} Hz outside 0..{} Hz", frequency, rate / 2),
        ));
    }
    Ok(())
}

fn check_scale(scale: f32) -> Result<()> {
    if !(0.0..=i16::MAX as f32).contains(&scale) {
        return Err(ModemError::construction(
            SIGGEN,
            format!("scale {} outside 0..={}", scale, i16::MAX),
        ));
    }
    Ok(())
}

impl Module for SigGen {
    fn kind(&self) -> &'static str {
        SIGGEN
    }

    fn input_unit(&self) -> Option<UnitType> {
        None
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(match self.config.mode {
            SigGenMode::Sinusoid => UnitType::Samples16,
            SigGenMode::RandomBits => UnitType::BitsUnpacked,
        })
    }

    fn handle_input(&mut self, _block: Block<'_>, _port: &mut Port<'_>) -> Result<usize> {
        Err(ModemError::Direction {
            kind: SIGGEN,
            operation: "accept input",
        })
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        match self.config.mode {
            SigGenMode::Sinusoid => {
                self.fill_samples(units);
                port.emit(Block::Samples(&self.samples))?;
            }
            SigGenMode::RandomBits => {
                self.fill_bits(units);
                port.emit(Block::BitsUnpacked(&self.bits))?;
            }
        }
        Ok(())
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Enable(on) => {
                if on && !self.config.enabled {
                    self.phase = 0.0;
                }
                self.config.enabled = on;
            }
            Command::SetFrequency(frequency) => {
                check_frequency(frequency, self.config.rate)?;
                self.config.frequency = frequency;
                self.step = 2.0 * PI * frequency as f64 / self.config.rate as f64;
            }
            Command::SetScale(scale) => {
                check_scale(scale)?;
                self.config.scale = scale;
            }
            Command::IsIdle => return Ok(Reply::Idle(!self.config.enabled)),
            Command::Reset => self.phase = 0.0,
            other => {
                return Err(ModemError::UnsupportedCommand {
                    kind: SIGGEN,
                    command: other.name(),
                })
            }
        }
        Ok(Reply::Ack)
    }
}

/// Source of zero samples.
pub struct Silence;

impl Module for Silence {
    fn kind(&self) -> &'static str {
        SILENCE
    }

    fn input_unit(&self) -> Option<UnitType> {
        None
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::Samples16)
    }

    fn handle_input(&mut self, _block: Block<'_>, _port: &mut Port<'_>) -> Result<usize> {
        Err(ModemError::Direction {
            kind: SILENCE,
            operation: "accept input",
        })
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        let zeros = vec![0i16; units];
        port.emit(Block::Samples(&zeros))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_frequency_above_nyquist() {
        match SigGen::new(SigGenConfig::tone(4100.0, 1000.0)) {
            Err(ModemError::Construction { kind, reason }) => {
                assert_eq!(kind, SIGGEN);
                assert!(reason.contains("4100"));
            }
            _ => panic!("Expected Construction error"),
        }
    }

    #[test]
    fn test_rejects_bad_scale() {
        assert!(SigGen::new(SigGenConfig::tone(1000.0, 40000.0)).is_err());
        assert!(SigGen::new(SigGenConfig::tone(1000.0, -1.0)).is_err());
    }

    #[test]
    fn test_tone_amplitude() {
        let mut gen = SigGen::new(SigGenConfig::tone(2100.0, 8000.0)).unwrap();
        gen.fill_samples(800);
        let peak = gen.samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 7800 && peak <= 8000, "peak {}", peak);
        assert_eq!(gen.samples[0], 0);
    }

    #[test]
    fn test_disabled_tone_is_silent() {
        let mut gen = SigGen::new(SigGenConfig::tone(1000.0, 8000.0)).unwrap();
        gen.command(Command::Enable(false)).unwrap();
        gen.fill_samples(100);
        assert!(gen.samples.iter().all(|&s| s == 0));
        assert_eq!(gen.command(Command::IsIdle).unwrap(), Reply::Idle(true));
    }

    #[test]
    fn test_seeded_bits_repeat() {
        let mut a = SigGen::new(SigGenConfig::random_bits(Some(7))).unwrap();
        let mut b = SigGen::new(SigGenConfig::random_bits(Some(7))).unwrap();
        a.fill_bits(64);
        b.fill_bits(64);
        assert_eq!(a.bits, b.bits);
        assert!(a.bits.iter().all(|&bit| bit <= 1));
        assert!(a.bits.iter().any(|&bit| bit == 1));
        assert!(a.bits.iter().any(|&bit| bit == 0));
    }

    #[test]
    fn test_unsupported_command() {
        let mut gen = SigGen::new(SigGenConfig::tone(1000.0, 100.0)).unwrap();
        match gen.command(Command::TakeFrame) {
            Err(ModemError::UnsupportedCommand { kind, command }) => {
                assert_eq!(kind, SIGGEN);
                assert_eq!(command, "take-frame");
            }
            _ => panic!("Expected UnsupportedCommand error"),
        }
    }
}
