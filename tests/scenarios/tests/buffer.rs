//! Bounded buffer: wait/pulse over a single wait set

use config::{Configuration, StrategyKind};
use runtime::{TestEngine, ViolationKind, WakeMode};
use scenarios::bounded_buffer::bounded_buffer;
use scenarios::init_logging;

fn random(iterations: u64) -> Configuration {
    Configuration::default()
        .with_strategy(StrategyKind::Random)
        .with_iterations(iterations)
        .with_seed(17)
        .with_stop_at_first_bug(false)
}

#[test]
fn test_single_slot_with_single_pulse_deadlocks() {
    init_logging();
    let engine = TestEngine::new(
        Configuration::default()
            .with_strategy(StrategyKind::Dfs)
            .with_iterations(100_000),
    );
    let report = engine
        .run(|rt| bounded_buffer(rt, 1, WakeMode::One))
        .unwrap();

    let bug = report.first_bug().expect("pulse can wake the wrong reader");
    assert_eq!(bug.kind, ViolationKind::Deadlock);
    assert!(bug.message.starts_with("no operation is enabled"));
    assert!(bug.message.contains("waiting for a pulse"));

    let replayed = engine
        .replay(&bug.schedule, |rt| bounded_buffer(rt, 1, WakeMode::One))
        .unwrap()
        .unwrap();
    assert_eq!(replayed.kind, ViolationKind::Deadlock);
    assert_eq!(replayed.message, bug.message);
}

#[test]
fn test_single_slot_with_pulse_all_never_deadlocks() {
    init_logging();
    let engine = TestEngine::new(random(100));
    let report = engine
        .run(|rt| bounded_buffer(rt, 1, WakeMode::All))
        .unwrap();

    assert!(!report.has_bugs(), "{:?}", report.first_bug());
    assert_eq!(report.iterations, 100);
    assert_eq!(report.bound_hits, 0);
}

#[test]
fn test_more_slots_than_readers_never_deadlocks() {
    init_logging();
    let engine = TestEngine::new(random(100));
    for mode in [WakeMode::One, WakeMode::All] {
        let report = engine.run(|rt| bounded_buffer(rt, 3, mode)).unwrap();
        assert!(!report.has_bugs(), "{:?}: {:?}", mode, report.first_bug());
        assert_eq!(report.bound_hits, 0);
    }
}
