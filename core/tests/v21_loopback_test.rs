// ============================================================================
// V.21 LOOPBACK TESTS
// ============================================================================
// HDLC framer -> FSK modulator -> (noise) -> FSK demodulator -> HDLC deframer
// all built through the registry, the way a session builds its chains.
// ============================================================================

mod common;

use common::init_logging;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use softfax_core::capture::CaptureConfig;
use softfax_core::fax::frames::{self, DisCapabilities, FaxFrame, Fcf};
use softfax_core::fsk::{FskConfig, V21Channel};
use softfax_core::hdlc::{HdlcDecoderConfig, HdlcEncoderConfig};
use softfax_core::registry::{CAPTURE, FSKDEMOD, FSKMOD, HDLCRX, HDLCTX};
use softfax_core::{
    Block, Buffer, Command, Graph, ModuleConfig, ModuleId, Registry, Reply, SignalBus, UnitType,
};

struct Link {
    graph: Graph,
    bus: SignalBus,
    framer: ModuleId,
    line: ModuleId,
    demodulator: ModuleId,
    deframer: ModuleId,
}

impl Link {
    fn new(channel: V21Channel, preamble_flags: usize) -> Self {
        let registry = Registry::with_builtins();
        let mut graph = Graph::new();
        let mut bus = SignalBus::new();
        let flag = bus.allocate("flag").expect("Failed to allocate");
        let frame = bus.allocate("frame").expect("Failed to allocate");
        let fcs_error = bus.allocate("fcs").expect("Failed to allocate");

        let mut insert = |kind: &str, config: ModuleConfig| {
            graph.insert(
                registry
                    .create_named(kind, &config)
                    .expect("Failed to create module"),
            )
        };
        let framer = insert(
            HDLCTX,
            ModuleConfig::HdlcEncoder(HdlcEncoderConfig {
                preamble_flags,
                ..HdlcEncoderConfig::default()
            }),
        );
        let modulator = insert(FSKMOD, ModuleConfig::FskModulator(FskConfig::v21(channel)));
        let line = insert(
            CAPTURE,
            ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, 200_000)),
        );
        let demodulator = insert(FSKDEMOD, ModuleConfig::FskDemodulator(FskConfig::v21(channel)));
        let deframer = insert(
            HDLCRX,
            ModuleConfig::HdlcDecoder(HdlcDecoderConfig {
                flag: Some(flag),
                frame: Some(frame),
                fcs_error: Some(fcs_error),
            }),
        );
        graph.connect(framer, modulator).expect("Failed to connect");
        graph.connect(modulator, line).expect("Failed to connect");
        graph.connect(demodulator, deframer).expect("Failed to connect");

        Self {
            graph,
            bus,
            framer,
            line,
            demodulator,
            deframer,
        }
    }

    fn transmit(&mut self, frame: &[u8]) -> Vec<i16> {
        self.graph
            .push(self.framer, Block::Bytes(frame), &mut self.bus)
            .expect("Failed to transmit");
        match self.graph.command(self.line, Command::Drain).expect("Failed to drain") {
            Reply::Data(Buffer::Samples(samples)) => samples,
            other => panic!("unexpected reply {:?}", other),
        }
    }

    fn receive(&mut self, audio: &[i16]) -> Vec<Vec<u8>> {
        for chunk in audio.chunks(160) {
            self.graph
                .push(self.demodulator, Block::Samples(chunk), &mut self.bus)
                .expect("Failed to receive");
        }
        let mut frames = Vec::new();
        while let Reply::Frame(Some(frame)) = self
            .graph
            .command(self.deframer, Command::TakeFrame)
            .expect("Failed to take frame")
        {
            frames.push(frame);
        }
        frames
    }

    fn counters(&mut self) -> (u64, u64) {
        match self
            .graph
            .command(self.deframer, Command::Counters)
            .expect("Failed to read counters")
        {
            Reply::Counters { good, bad } => (good, bad),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}

/// White Gaussian noise with standard deviation `sigma`, framed by silence.
fn add_noise(audio: &[i16], sigma: f32, seed: u64) -> Vec<i16> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, sigma).expect("Failed to create distribution");
    let mut noisy: Vec<i16> = vec![0; 400];
    noisy.extend(audio.iter().map(|&s| {
        let noise = normal.sample(&mut rng).clamp(i16::MIN as f32, i16::MAX as f32);
        s.saturating_add(noise as i16)
    }));
    noisy.extend(std::iter::repeat(0).take(400));
    noisy
}

#[test]
fn test_clean_loopback_both_channels() {
    init_logging();
    let dis = frames::build_dis(&DisCapabilities::default());
    for channel in [V21Channel::Channel1, V21Channel::Channel2] {
        let mut link = Link::new(channel, 10);
        let audio = link.transmit(&dis);
        let received = link.receive(&audio);

        assert_eq!(received.len(), 1, "{:?}", channel);
        let frame = FaxFrame::parse(&received[0]).expect("Failed to parse DIS");
        assert_eq!(frame.fcf, Fcf::Dis);
        assert!(frame.last);
        assert_eq!(frame.to_bytes(false), dis);
    }
}

#[test]
fn test_noisy_loopback_recovers_every_frame() {
    init_logging();
    let sent = vec![
        frames::build_nsf(),
        frames::build_csi("+44 1632 960000"),
        frames::build_dis(&DisCapabilities::default()),
    ];
    let mut link = Link::new(V21Channel::Channel2, 10);
    let mut audio = Vec::new();
    for frame in &sent {
        audio.extend(link.transmit(frame));
    }

    // About 15 dB SNR against the 8000 peak carrier
    let received = link.receive(&add_noise(&audio, 1000.0, 42));
    let parsed: Vec<Fcf> = received
        .iter()
        .map(|f| FaxFrame::parse(f).expect("Failed to parse").fcf)
        .collect();
    assert_eq!(parsed, vec![Fcf::Nsf, Fcf::Csi, Fcf::Dis]);
    assert_eq!(
        frames::parse_id(&FaxFrame::parse(&received[1]).expect("Failed to parse").fif),
        "+44 1632 960000"
    );
    assert_eq!(link.counters(), (3, 0));
}
