// ============================================================================
// GRAPH TESTS
// ============================================================================
// Module lifecycle through the registry, link rules, demand-driven chains
// and cycle detection.
// ============================================================================

use softfax_core::capture::CaptureConfig;
use softfax_core::registry::{CAPTURE, RATECONV, REPLICATE, SIGGEN};
use softfax_core::resample::RateConverterConfig;
use softfax_core::siggen::SigGenConfig;
use softfax_core::{
    Block, Buffer, Command, Graph, ModemError, ModuleConfig, ModuleId, Registry, Reply, SignalBus,
    UnitType,
};

fn create(graph: &mut Graph, registry: &Registry, kind: &str, config: ModuleConfig) -> ModuleId {
    let kind = registry.lookup(kind).expect("Kind not registered");
    graph
        .create(registry, kind, &config)
        .expect("Failed to create module")
}

fn drain(graph: &mut Graph, sink: ModuleId) -> Vec<i16> {
    match graph.command(sink, Command::Drain).expect("Failed to drain") {
        Reply::Data(Buffer::Samples(samples)) => samples,
        other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn test_demand_through_rate_converter_is_exact() {
    let registry = Registry::with_builtins();
    let mut graph = Graph::new();
    let mut bus = SignalBus::new();

    let tone = create(
        &mut graph,
        &registry,
        SIGGEN,
        ModuleConfig::SigGen(SigGenConfig::tone(440.0, 10_000.0)),
    );
    let conv = create(
        &mut graph,
        &registry,
        RATECONV,
        ModuleConfig::RateConverter(RateConverterConfig::lowpass(3, 2, 16)),
    );
    let sink = create(
        &mut graph,
        &registry,
        CAPTURE,
        ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, 100_000)),
    );
    graph.connect(tone, conv).expect("Failed to connect");
    graph.connect(conv, sink).expect("Failed to connect");

    for units in [1, 7, 160, 333, 1000] {
        graph.demand(sink, units, &mut bus).expect("Demand failed");
        assert_eq!(drain(&mut graph, sink).len(), units, "demand of {}", units);
    }

    // Past the filter warm-up the 440 Hz tone survives at 12 kHz
    graph.demand(sink, 12_000, &mut bus).expect("Demand failed");
    let out = drain(&mut graph, sink);
    let peak = out[1000..].iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    assert!(peak > 9000, "peak {} too low", peak);
}

#[test]
fn test_cycle_is_reported_not_recursed() {
    let registry = Registry::with_builtins();
    let mut graph = Graph::new();
    let mut bus = SignalBus::new();

    let fan = create(
        &mut graph,
        &registry,
        REPLICATE,
        ModuleConfig::Replicate {
            unit: UnitType::Samples16,
        },
    );
    let conv = create(
        &mut graph,
        &registry,
        RATECONV,
        ModuleConfig::RateConverter(RateConverterConfig::lowpass(1, 1, 4)),
    );
    graph.connect(fan, conv).expect("Failed to connect");
    graph.connect(conv, fan).expect("Failed to connect");

    let result = graph.push(fan, Block::Samples(&[1000; 32]), &mut bus);
    assert!(matches!(result, Err(ModemError::Reentrant(id)) if id == fan));

    // Both modules are back in place afterwards
    assert_eq!(graph.kind(fan).expect("Module lost"), REPLICATE);
    assert!(graph.command(conv, Command::Reset).is_ok());
}

#[test]
fn test_unit_mismatch_refuses_link() {
    let registry = Registry::with_builtins();
    let mut graph = Graph::new();

    let bits = create(
        &mut graph,
        &registry,
        SIGGEN,
        ModuleConfig::SigGen(SigGenConfig::random_bits(Some(7))),
    );
    let sink = create(
        &mut graph,
        &registry,
        CAPTURE,
        ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, 16)),
    );
    assert!(matches!(
        graph.connect(bits, sink),
        Err(ModemError::UnitMismatch {
            expected: UnitType::Samples16,
            found: UnitType::BitsUnpacked,
        })
    ));
    assert_eq!(graph.recvfrom(sink).expect("Module lost"), None);

    // Sinks have no output side at all
    assert!(matches!(
        graph.connect(sink, bits),
        Err(ModemError::Direction { .. })
    ));
}

#[test]
fn test_reconnect_replaces_link() {
    let registry = Registry::with_builtins();
    let mut graph = Graph::new();
    let tone = create(
        &mut graph,
        &registry,
        SIGGEN,
        ModuleConfig::SigGen(SigGenConfig::tone(1000.0, 1000.0)),
    );
    let first = create(
        &mut graph,
        &registry,
        CAPTURE,
        ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, 16)),
    );
    let second = create(
        &mut graph,
        &registry,
        CAPTURE,
        ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, 16)),
    );

    graph.connect(tone, first).expect("Failed to connect");
    graph.connect(tone, second).expect("Failed to connect");
    assert_eq!(graph.sendto(tone).expect("Module lost"), &[second]);
    assert_eq!(graph.recvfrom(first).expect("Module lost"), None);
    assert_eq!(graph.recvfrom(second).expect("Module lost"), Some(tone));
}

#[test]
fn test_removed_module_is_invalid() {
    let registry = Registry::with_builtins();
    let mut graph = Graph::new();
    let mut bus = SignalBus::new();
    let tone = create(
        &mut graph,
        &registry,
        SIGGEN,
        ModuleConfig::SigGen(SigGenConfig::tone(1000.0, 1000.0)),
    );
    let sink = create(
        &mut graph,
        &registry,
        CAPTURE,
        ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, 16)),
    );
    graph.connect(tone, sink).expect("Failed to connect");

    graph.remove(tone).expect("Failed to remove");
    assert!(!graph.contains(tone));
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.recvfrom(sink).expect("Module lost"), None);
    assert!(matches!(
        graph.demand(tone, 4, &mut bus),
        Err(ModemError::InvalidModule(id)) if id == tone
    ));
    assert!(matches!(graph.remove(tone), Err(ModemError::InvalidModule(_))));

    // The sink now has nothing to pull from
    assert!(matches!(
        graph.demand(sink, 4, &mut bus),
        Err(ModemError::NotConnected(id)) if id == sink
    ));
}

#[test]
fn test_failed_construction_leaves_graph_unchanged() {
    let registry = Registry::with_builtins();
    let mut graph = Graph::new();
    let kind = registry.lookup(SIGGEN).expect("Kind not registered");

    // Above Nyquist
    let bad = ModuleConfig::SigGen(SigGenConfig::tone(5000.0, 1000.0));
    assert!(matches!(
        graph.create(&registry, kind, &bad),
        Err(ModemError::Construction { .. })
    ));
    // Another kind's parameters
    assert!(graph.create(&registry, kind, &ModuleConfig::Pack).is_err());
    assert!(graph.is_empty());
}

#[test]
fn test_duplicate_names_are_distinct_kinds() {
    let mut registry = Registry::with_builtins();
    let before = registry.len();
    let again = registry.register(SIGGEN, |config| {
        Registry::with_builtins().create_named(CAPTURE, config)
    });
    assert_eq!(registry.len(), before + 1);
    assert_ne!(registry.lookup(SIGGEN), Some(again));
    assert_eq!(registry.name(again), Some(SIGGEN));
}
