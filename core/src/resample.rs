/// Rational sample-rate conversion with a polyphase FIR filter
///
/// The input is conceptually zero-stuffed by `upfactor`, low-pass filtered
/// with `coefficients`, and decimated by `downfactor`. Only the filter branch
/// that lands on an output sample is evaluated.
use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::error::{ModemError, Result};
use crate::graph::Port;
use crate::module::{Block, Command, Module, Reply, UnitType};
use crate::registry::RATECONV;

/// Output held back for a slow consumer before pushed input is refused
pub const PENDING_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct RateConverterConfig {
    pub upfactor: usize,
    pub downfactor: usize,
    /// Total taps; must be a multiple of `upfactor`
    pub filter_length: usize,
    pub coefficients: Vec<f32>,
    pub output_scale: f32,
}

impl RateConverterConfig {
    /// Windowed-sinc low-pass with `taps_per_phase` taps per polyphase branch,
    /// cut off at the narrower of the two Nyquist limits. Unity passband gain.
    pub fn lowpass(upfactor: usize, downfactor: usize, taps_per_phase: usize) -> Self {
        let filter_length = upfactor * taps_per_phase;
        let cutoff = 0.5 / upfactor.max(downfactor).max(1) as f64;
        let centre = (filter_length as f64 - 1.0) / 2.0;

        let mut coefficients: Vec<f64> = (0..filter_length)
            .map(|k| {
                let x = k as f64 - centre;
                let sinc = if x.abs() < 1e-9 {
                    2.0 * cutoff
                } else {
                    (2.0 * PI * cutoff * x).sin() / (PI * x)
                };
                // Hamming window
                let window = if filter_length > 1 {
                    0.54 - 0.46 * (2.0 * PI * k as f64 / (filter_length as f64 - 1.0)).cos()
                } else {
                    1.0
                };
                sinc * window
            })
            .collect();

        // Zero-stuffing divides the passband level by `upfactor`; make it back.
        let sum: f64 = coefficients.iter().sum();
        if sum.abs() > 1e-12 {
            for c in coefficients.iter_mut() {
                *c *= upfactor as f64 / sum;
            }
        }

        Self {
            upfactor,
            downfactor,
            filter_length,
            coefficients: coefficients.into_iter().map(|c| c as f32).collect(),
            output_scale: 1.0,
        }
    }
}

pub struct RateConverter {
    up: usize,
    down: usize,
    taps_per_phase: usize,
    coefficients: Vec<f32>,
    output_scale: f32,
    /// Most recent input first
    history: VecDeque<f32>,
    /// Position of the next output, in upsampled ticks, relative to the next
    /// input sample
    phase: usize,
    pending: VecDeque<i16>,
    out: Vec<i16>,
}

impl RateConverter {
    pub fn new(config: RateConverterConfig) -> Result<Self> {
        if config.upfactor == 0 || config.downfactor == 0 {
            return Err(ModemError::construction(
                RATECONV,
                "upfactor and downfactor must be non-zero",
            ));
        }
        if config.filter_length == 0 || config.filter_length % config.upfactor != 0 {
            return Err(ModemError::construction(
                RATECONV,
                format!(
                    "filter_length {} is not a non-zero multiple of upfactor {}",
                    config.filter_length, config.upfactor
                ),
            ));
        }
        if config.coefficients.len() != config.filter_length {
            return Err(ModemError::construction(
                RATECONV,
                format!(
                    "{} coefficients supplied for filter_length {}",
                    config.coefficients.len(),
                    config.filter_length
                ),
            ));
        }

        let taps_per_phase = config.filter_length / config.upfactor;
        Ok(Self {
            up: config.upfactor,
            down: config.downfactor,
            taps_per_phase,
            coefficients: config.coefficients,
            output_scale: config.output_scale,
            history: VecDeque::from(vec![0.0; taps_per_phase]),
            phase: 0,
            pending: VecDeque::new(),
            out: Vec::new(),
        })
    }

    /// Input samples needed before at least `outputs` more samples exist.
    /// Rounds up so the consumer is never starved.
    pub fn inputs_for(&self, outputs: usize) -> usize {
        if outputs == 0 {
            return 0;
        }
        // Output k (0-based) sits at virtual index phase + k * down; it is
        // produced once m inputs cover it, i.e. m * up > that index.
        let last = self.phase + (outputs - 1) * self.down;
        last / self.up + 1
    }

    fn process(&mut self, sample: i16) {
        self.history.pop_back();
        self.history.push_front(sample as f32);
        while self.phase < self.up {
            let acc: f32 = self
                .history
                .iter()
                .enumerate()
                .map(|(i, &x)| self.coefficients[self.phase + i * self.up] * x)
                .sum();
            let y = (acc * self.output_scale).round();
            self.pending
                .push_back(y.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            self.phase += self.down;
        }
        self.phase -= self.up;
    }

    /// Emit up to `limit` pending samples; whatever downstream refuses stays
    /// queued for the next call.
    fn flush(&mut self, limit: usize, port: &mut Port<'_>) -> Result<()> {
        let count = limit.min(self.pending.len());
        if count == 0 {
            return Ok(());
        }
        self.out.clear();
        self.out.extend(self.pending.drain(..count));
        let consumed = port.emit(Block::Samples(&self.out))?;
        if consumed < count {
            log::debug!(
                "rateconv: downstream took {} of {} samples, requeueing",
                consumed,
                count
            );
            for &s in self.out[consumed..].iter().rev() {
                self.pending.push_front(s);
            }
        }
        Ok(())
    }
}

impl Module for RateConverter {
    fn kind(&self) -> &'static str {
        RATECONV
    }

    fn input_unit(&self) -> Option<UnitType> {
        Some(UnitType::Samples16)
    }

    fn output_unit(&self) -> Option<UnitType> {
        Some(UnitType::Samples16)
    }

    fn handle_input(&mut self, block: Block<'_>, port: &mut Port<'_>) -> Result<usize> {
        let Block::Samples(samples) = block else {
            return Err(ModemError::UnitMismatch {
                expected: UnitType::Samples16,
                found: block.unit(),
            });
        };
        // Stop taking input once the backlog is full so the caller sees the
        // backpressure instead of the queue growing without bound.
        let mut taken = 0;
        for &s in samples {
            if self.pending.len() >= PENDING_LIMIT {
                self.flush(usize::MAX, port)?;
                if self.pending.len() >= PENDING_LIMIT {
                    break;
                }
            }
            self.process(s);
            taken += 1;
        }
        self.flush(usize::MAX, port)?;
        if taken < samples.len() {
            log::warn!(
                "rateconv: backlog full, took {} of {} samples",
                taken,
                samples.len()
            );
        }
        Ok(taken)
    }

    fn handle_demand(&mut self, units: usize, port: &mut Port<'_>) -> Result<()> {
        if self.pending.len() < units {
            let wanted = self.inputs_for(units - self.pending.len());
            if let Some(buffer) = port.pull(wanted)? {
                if buffer.len() < wanted {
                    log::debug!("rateconv: upstream short, {} of {} samples", buffer.len(), wanted);
                }
                if let Some(samples) = buffer.into_samples() {
                    for s in samples {
                        self.process(s);
                    }
                }
            }
        }
        self.flush(units, port)
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Reset => {
                self.history.iter_mut().for_each(|x| *x = 0.0);
                self.phase = 0;
                self.pending.clear();
                Ok(Reply::Ack)
            }
            Command::SetScale(scale) => {
                self.output_scale = scale;
                Ok(Reply::Ack)
            }
            other => Err(ModemError::UnsupportedCommand {
                kind: RATECONV,
                command: other.name(),
            }),
        }
    }
}
