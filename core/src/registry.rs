//! Module kinds by name, and their constructors.

use crate::capture::{Capture, CaptureConfig};
use crate::error::{ModemError, Result};
use crate::fsk::{FskConfig, FskDemodulator, FskModulator};
use crate::hdlc::{HdlcDecoder, HdlcDecoderConfig, HdlcEncoder, HdlcEncoderConfig};
use crate::module::{Module, UnitType};
use crate::plumbing::{Pack, Replicate};
use crate::resample::{RateConverter, RateConverterConfig};
use crate::siggen::{SigGen, SigGenConfig, Silence};

pub const SIGGEN: &str = "siggen";
pub const SILENCE: &str = "silence";
pub const RATECONV: &str = "rateconv";
pub const FSKMOD: &str = "fskmod";
pub const FSKDEMOD: &str = "fskdemod";
pub const HDLCTX: &str = "hdlctx";
pub const HDLCRX: &str = "hdlcrx";
pub const REPLICATE: &str = "replicate";
pub const PACK: &str = "pack";
pub const CAPTURE: &str = "capture";

/// Typed construction parameters, one variant per kind.
#[derive(Debug, Clone)]
pub enum ModuleConfig {
    SigGen(SigGenConfig),
    Silence,
    RateConverter(RateConverterConfig),
    FskModulator(FskConfig),
    FskDemodulator(FskConfig),
    HdlcEncoder(HdlcEncoderConfig),
    HdlcDecoder(HdlcDecoderConfig),
    Replicate { unit: UnitType },
    Pack,
    Capture(CaptureConfig),
}

impl ModuleConfig {
    fn variant_name(&self) -> &'static str {
        match self {
            ModuleConfig::SigGen(_) => "SigGen",
            ModuleConfig::Silence => "Silence",
            ModuleConfig::RateConverter(_) => "RateConverter",
            ModuleConfig::FskModulator(_) => "FskModulator",
            ModuleConfig::FskDemodulator(_) => "FskDemodulator",
            ModuleConfig::HdlcEncoder(_) => "HdlcEncoder",
            ModuleConfig::HdlcDecoder(_) => "HdlcDecoder",
            ModuleConfig::Replicate { .. } => "Replicate",
            ModuleConfig::Pack => "Pack",
            ModuleConfig::Capture(_) => "Capture",
        }
    }

    /// Error for a constructor handed another kind's parameters.
    pub fn mismatch(&self, kind: &str) -> ModemError {
        ModemError::construction(
            kind,
            format!("unexpected {} configuration", self.variant_name()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindId(pub usize);

pub type Constructor = fn(&ModuleConfig) -> Result<Box<dyn Module>>;

struct Entry {
    name: String,
    constructor: Constructor,
}

pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry preloaded with every built-in kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SIGGEN, construct_siggen);
        registry.register(SILENCE, construct_silence);
        registry.register(RATECONV, construct_rateconv);
        registry.register(FSKMOD, construct_fskmod);
        registry.register(FSKDEMOD, construct_fskdemod);
        registry.register(HDLCTX, construct_hdlctx);
        registry.register(HDLCRX, construct_hdlcrx);
        registry.register(REPLICATE, construct_replicate);
        registry.register(PACK, construct_pack);
        registry.register(CAPTURE, construct_capture);
        registry
    }

    /// Append a kind. Names are metadata only: registering a name twice
    /// yields two distinct kinds.
    pub fn register(&mut self, name: &str, constructor: Constructor) -> KindId {
        let id = KindId(self.entries.len());
        self.entries.push(Entry {
            name: name.to_string(),
            constructor,
        });
        id
    }

    /// First kind registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<KindId> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(KindId)
    }

    pub fn name(&self, kind: KindId) -> Option<&str> {
        self.entries.get(kind.0).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a new instance. A failed constructor leaves nothing behind.
    pub fn create(&self, kind: KindId, config: &ModuleConfig) -> Result<Box<dyn Module>> {
        let entry = self
            .entries
            .get(kind.0)
            .ok_or(ModemError::UnknownKind(kind))?;
        let module = (entry.constructor)(config).map_err(|e| {
            log::warn!("construction of `{}` failed: {}", entry.name, e);
            e
        })?;
        Ok(module)
    }

    pub fn create_named(&self, name: &str, config: &ModuleConfig) -> Result<Box<dyn Module>> {
        let kind = self
            .lookup(name)
            .ok_or_else(|| ModemError::construction(name, "no such kind registered"))?;
        self.create(kind, config)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn construct_siggen(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::SigGen(c) => Ok(Box::new(SigGen::new(c.clone())?)),
        other => Err(other.mismatch(SIGGEN)),
    }
}

fn construct_silence(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::Silence => Ok(Box::new(Silence)),
        other => Err(other.mismatch(SILENCE)),
    }
}

fn construct_rateconv(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::RateConverter(c) => Ok(Box::new(RateConverter::new(c.clone())?)),
        other => Err(other.mismatch(RATECONV)),
    }
}

fn construct_fskmod(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::FskModulator(c) => Ok(Box::new(FskModulator::new(c.clone())?)),
        other => Err(other.mismatch(FSKMOD)),
    }
}

fn construct_fskdemod(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::FskDemodulator(c) => Ok(Box::new(FskDemodulator::new(c.clone())?)),
        other => Err(other.mismatch(FSKDEMOD)),
    }
}

fn construct_hdlctx(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::HdlcEncoder(c) => Ok(Box::new(HdlcEncoder::new(c.clone()))),
        other => Err(other.mismatch(HDLCTX)),
    }
}

fn construct_hdlcrx(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::HdlcDecoder(c) => Ok(Box::new(HdlcDecoder::new(c.clone()))),
        other => Err(other.mismatch(HDLCRX)),
    }
}

fn construct_replicate(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::Replicate { unit } => Ok(Box::new(Replicate::new(*unit))),
        other => Err(other.mismatch(REPLICATE)),
    }
}

fn construct_pack(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::Pack => Ok(Box::new(Pack::new())),
        other => Err(other.mismatch(PACK)),
    }
}

fn construct_capture(config: &ModuleConfig) -> Result<Box<dyn Module>> {
    match config {
        ModuleConfig::Capture(c) => Ok(Box::new(Capture::new(c.clone())?)),
        other => Err(other.mismatch(CAPTURE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = Registry::with_builtins();
        for name in [
            SIGGEN, SILENCE, RATECONV, FSKMOD, FSKDEMOD, HDLCTX, HDLCRX, REPLICATE, PACK, CAPTURE,
        ] {
            let kind = registry.lookup(name).expect(name);
            assert_eq!(registry.name(kind), Some(name));
        }
    }

    #[test]
    fn test_duplicate_names_get_distinct_ids() {
        let mut registry = Registry::new();
        let a = registry.register("tone", construct_siggen);
        let b = registry.register("tone", construct_silence);
        assert_ne!(a, b);
        assert_eq!(registry.lookup("tone"), Some(a));
        assert!(registry.create(b, &ModuleConfig::Silence).is_ok());
    }

    #[test]
    fn test_wrong_config_is_construction_error() {
        let registry = Registry::with_builtins();
        let kind = registry.lookup(SIGGEN).unwrap();
        match registry.create(kind, &ModuleConfig::Silence) {
            Err(ModemError::Construction { kind, reason }) => {
                assert_eq!(kind, SIGGEN);
                assert!(reason.contains("Silence"));
            }
            _ => panic!("Expected Construction error"),
        }
    }

    #[test]
    fn test_unknown_kind() {
        let registry = Registry::new();
        match registry.create(KindId(7), &ModuleConfig::Silence) {
            Err(ModemError::UnknownKind(KindId(7))) => {}
            _ => panic!("Expected UnknownKind error"),
        }
    }
}
