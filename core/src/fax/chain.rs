//! The transmit and receive module chains an answering fax session runs on.
//!
//! Transmit: one of {silence, CED tone, V.21 modulator fed by the HDLC framer}
//! is connected to the line capture at any time. Receive: V.21 demodulator
//! into the HDLC deframer, which raises the session's flag/frame/FCS signals.

use crate::capture::CaptureConfig;
use crate::config::FaxConfig;
use crate::error::Result;
use crate::fsk::{FskConfig, V21Channel};
use crate::graph::{Graph, ModuleId};
use crate::hdlc::{HdlcDecoderConfig, HdlcEncoderConfig, BROADCAST_ADDRESS};
use crate::module::{Command, Reply, UnitType};
use crate::registry::{ModuleConfig, Registry, CAPTURE, FSKDEMOD, FSKMOD, HDLCRX, HDLCTX, SIGGEN, SILENCE};
use crate::siggen::SigGenConfig;
use crate::signal::{SignalBus, SignalId};
use crate::SAMPLE_RATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSource {
    Silence,
    Ced,
    V21,
}

/// Handles into the session graph plus the receive-side signals.
#[derive(Debug, Clone)]
pub struct FaxChains {
    pub silence: ModuleId,
    pub ced: ModuleId,
    pub framer: ModuleId,
    pub modulator: ModuleId,
    pub line: ModuleId,
    pub demodulator: ModuleId,
    pub deframer: ModuleId,
    pub flag: SignalId,
    pub frame: SignalId,
    pub fcs_error: SignalId,
    source: TxSource,
}

impl FaxChains {
    pub fn build(
        graph: &mut Graph,
        registry: &Registry,
        signals: &mut SignalBus,
        config: &FaxConfig,
    ) -> Result<Self> {
        let flag = signals.allocate("hdlc-flag")?;
        let frame = signals.allocate("hdlc-frame")?;
        let fcs_error = signals.allocate("hdlc-fcs-error")?;

        let silence = graph.insert(registry.create_named(SILENCE, &ModuleConfig::Silence)?);
        let ced = graph.insert(registry.create_named(
            SIGGEN,
            &ModuleConfig::SigGen(SigGenConfig::tone(config.ced_frequency, config.ced_amplitude)),
        )?);

        let mut fsk = FskConfig::v21(V21Channel::Channel2);
        fsk.scale = config.v21_amplitude;
        let framer = graph.insert(registry.create_named(
            HDLCTX,
            &ModuleConfig::HdlcEncoder(HdlcEncoderConfig {
                address: Some(BROADCAST_ADDRESS),
                preamble_flags: config.preamble_flags,
            }),
        )?);
        let modulator =
            graph.insert(registry.create_named(FSKMOD, &ModuleConfig::FskModulator(fsk.clone()))?);
        let line = graph.insert(registry.create_named(
            CAPTURE,
            &ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, SAMPLE_RATE)),
        )?);
        graph.connect(framer, modulator)?;
        graph.connect(silence, line)?;

        let demodulator =
            graph.insert(registry.create_named(FSKDEMOD, &ModuleConfig::FskDemodulator(fsk))?);
        let deframer = graph.insert(registry.create_named(
            HDLCRX,
            &ModuleConfig::HdlcDecoder(HdlcDecoderConfig {
                flag: Some(flag),
                frame: Some(frame),
                fcs_error: Some(fcs_error),
            }),
        )?);
        graph.connect(demodulator, deframer)?;

        Ok(Self {
            silence,
            ced,
            framer,
            modulator,
            line,
            demodulator,
            deframer,
            flag,
            frame,
            fcs_error,
            source: TxSource::Silence,
        })
    }

    pub fn source(&self) -> TxSource {
        self.source
    }

    /// Put `source` on the line.
    pub fn transmit(&mut self, graph: &mut Graph, source: TxSource) -> Result<()> {
        let module = match source {
            TxSource::Silence => self.silence,
            TxSource::Ced => self.ced,
            TxSource::V21 => self.modulator,
        };
        if source == TxSource::Ced {
            graph.command(self.ced, Command::Reset)?;
        }
        graph.connect(module, self.line)?;
        log::debug!("line source {:?} -> {:?}", self.source, source);
        self.source = source;
        Ok(())
    }

    pub fn queue_frame(&self, graph: &mut Graph, frame: Vec<u8>) -> Result<()> {
        graph.command(self.framer, Command::SendFrame(frame))?;
        Ok(())
    }

    /// All queued frames have left the framer. The modulator may still be
    /// finishing the last bit.
    pub fn tx_idle(&self, graph: &mut Graph) -> Result<bool> {
        Ok(matches!(
            graph.command(self.framer, Command::IsIdle)?,
            Reply::Idle(true)
        ))
    }

    pub fn take_frame(&self, graph: &mut Graph) -> Result<Option<Vec<u8>>> {
        match graph.command(self.deframer, Command::TakeFrame)? {
            Reply::Frame(frame) => Ok(frame),
            _ => Ok(None),
        }
    }

    /// Forget anything received so far.
    pub fn flush_rx(&self, graph: &mut Graph, signals: &mut SignalBus) -> Result<()> {
        while self.take_frame(graph)?.is_some() {}
        signals.clear(self.flag);
        signals.clear(self.frame);
        signals.clear(self.fcs_error);
        Ok(())
    }
}
