//! Lock-striped stack under three locking disciplines

use config::{Configuration, StrategyKind};
use runtime::{TestEngine, ViolationKind};
use scenarios::init_logging;
use scenarios::safe_stack::{safe_stack, Discipline};

fn random(iterations: u64, seed: u64) -> Configuration {
    Configuration::default()
        .with_strategy(StrategyKind::Random)
        .with_iterations(iterations)
        .with_seed(seed)
}

#[test]
fn test_coarse_lock_keeps_slots_exclusive() {
    init_logging();
    let engine = TestEngine::new(random(50, 1).with_stop_at_first_bug(false));
    let report = engine
        .run(|rt| safe_stack(rt, Discipline::Coarse))
        .unwrap();

    assert!(!report.has_bugs(), "{:?}", report.first_bug());
    assert_eq!(report.iterations, 50);
}

#[test]
fn test_missing_compare_hands_one_slot_to_two_workers() {
    init_logging();
    let engine = TestEngine::new(random(500, 2));
    let report = engine
        .run(|rt| safe_stack(rt, Discipline::Unchecked))
        .unwrap();

    let bug = report.first_bug().expect("unchecked swap must race");
    assert_eq!(bug.kind, ViolationKind::Assertion);
    assert!(bug.message.starts_with("worker"));

    let replayed = engine
        .replay(&bug.schedule, |rt| safe_stack(rt, Discipline::Unchecked))
        .unwrap()
        .unwrap();
    assert_eq!(replayed.message, bug.message);
}

#[test]
fn test_striped_stack_only_fails_its_own_assertions() {
    init_logging();
    let engine = TestEngine::new(random(30, 3).with_stop_at_first_bug(false));
    let report = engine
        .run(|rt| safe_stack(rt, Discipline::Striped))
        .unwrap();

    assert_eq!(report.iterations, 30);
    assert!(report
        .bugs
        .iter()
        .all(|bug| bug.kind == ViolationKind::Assertion));
}

#[test]
fn test_slot_array_feeds_the_state_abstraction() {
    init_logging();
    let engine = TestEngine::new(random(5, 4).with_stop_at_first_bug(false));
    let report = engine
        .run(|rt| safe_stack(rt, Discipline::Coarse))
        .unwrap();

    assert!(report.coverage.distinct_states > 10);
}
