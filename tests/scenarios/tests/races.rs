//! Numeric races between tasks: only a handful of interleavings break them

use config::{Configuration, QLearningParams, StrategyKind};
use runtime::{TestEngine, ViolationKind};
use scenarios::fib::{fib, FIB_LIMIT};
use scenarios::init_logging;
use scenarios::triangular::Triangular;

fn dfs(iterations: u64) -> Configuration {
    Configuration::default()
        .with_strategy(StrategyKind::Dfs)
        .with_iterations(iterations)
}

#[test]
fn test_dfs_finds_the_fibonacci_alternation() {
    init_logging();
    let engine = TestEngine::new(dfs(100_000));
    let report = engine.run(|rt| fib(rt, 5, FIB_LIMIT)).unwrap();

    let bug = report.first_bug().expect("strict alternation must be reached");
    assert_eq!(bug.kind, ViolationKind::Assertion);
    assert!(bug.message.starts_with("fibonacci race reached"));
    assert!(bug.message.contains("144"));
    assert!(bug.seed.is_none());

    let replayed = engine
        .replay(&bug.schedule, |rt| fib(rt, 5, FIB_LIMIT))
        .unwrap()
        .expect("replay must hit the same assertion");
    assert_eq!(replayed.message, bug.message);
    assert_eq!(replayed.steps, bug.steps);
}

#[test]
fn test_short_fibonacci_race_is_exhausted_cleanly() {
    init_logging();
    let engine = TestEngine::new(dfs(10_000).with_stop_at_first_bug(false));
    let report = engine.run(|rt| fib(rt, 2, FIB_LIMIT)).unwrap();

    assert!(!report.has_bugs());
    assert!(report.exhausted);
    assert!(report.iterations > 1);
    assert_eq!(report.bound_hits, 0);
}

#[test]
fn test_random_finds_the_fibonacci_alternation() {
    init_logging();
    let engine = TestEngine::new(
        Configuration::default()
            .with_strategy(StrategyKind::Random)
            .with_iterations(20_000)
            .with_seed(42),
    );
    let report = engine.run(|rt| fib(rt, 5, FIB_LIMIT)).unwrap();

    let bug = report.first_bug().unwrap();
    assert_eq!(bug.kind, ViolationKind::Assertion);
    assert!(bug.seed.is_some());
    assert!(report.iterations <= 20_000);
}

#[test]
fn test_qlearning_finds_a_shorter_fibonacci_alternation() {
    init_logging();
    let engine = TestEngine::new(
        Configuration::default()
            .with_strategy(StrategyKind::QLearning)
            .with_iterations(2_000)
            .with_seed(3)
            .with_qlearning(QLearningParams::default()),
    );
    let report = engine.run(|rt| fib(rt, 3, 21)).unwrap();

    let bug = report.first_bug().expect("alternation over three rounds reaches 21");
    assert_eq!(bug.kind, ViolationKind::Assertion);
    assert!(report.coverage.distinct_states > 1);
    assert_eq!(report.strategy, "qlearning");
}

#[test]
fn test_dfs_finds_the_triangular_race() {
    init_logging();
    let engine = TestEngine::new(dfs(100_000));
    let setup = |rt: &runtime::Runtime| Triangular::new(2).spawn(rt);
    let report = engine.run(setup).unwrap();

    let bug = report.first_bug().expect("late read of j must be found");
    assert_eq!(bug.kind, ViolationKind::Assertion);
    assert!(bug.message.contains("limit 10"));

    let replayed = engine.replay(&bug.schedule, setup).unwrap().unwrap();
    assert_eq!(replayed.message, bug.message);
}

#[test]
fn test_triangular_limit_grows_with_rounds() {
    assert_eq!(Triangular::new(2).limit(), 10);
    assert_eq!(Triangular::new(5).limit(), 16);
    assert_eq!((Triangular::new(1).i, Triangular::new(1).j), (3, 6));
}
