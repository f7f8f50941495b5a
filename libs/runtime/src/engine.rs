//! Test Engine
//!
//! Drives a test closure through many iterations. Each iteration gets a fresh
//! [`Runtime`]; the closure sets the program up (creates actors, registers
//! monitors, spawns tasks) and the engine then runs the scheduler until the
//! program quiesces, a bug is found or the step bound is hit. The strategy
//! lives across iterations and is told after each one whether it found a bug.
//!
//! Bugs are collected into a [`TestReport`] together with the schedule that
//! reproduces them. Configuration and replay errors abort the session.

use crate::actors::DroppedEvent;
use crate::runtime::{IterationOutcome, Runtime, RuntimeSettings, TableCache};
use config::{Configuration, StrategyKind};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use strategies::{ExplorationStrategy, ReplayStrategy};
use tracing::{debug, info, warn};
use types::{Error, Result, Schedule, ViolationKind};

/// A bug found in one iteration, with everything needed to replay it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BugReport {
    pub iteration: u64,
    pub kind: ViolationKind,
    pub message: String,
    pub schedule: Schedule,
    pub steps: u64,
    /// Seed of the iteration for seeded strategies
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    /// Distinct program-state hashes seen at scheduling points
    pub distinct_states: usize,
    pub events_dispatched: u64,
}

/// Summary of an exploration session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub iterations: u64,
    pub bugs: Vec<BugReport>,
    pub total_steps: u64,
    /// Iterations cut short by the step bound
    pub bound_hits: u64,
    /// The strategy ran out of schedules before the iteration budget
    pub exhausted: bool,
    pub coverage: Coverage,
    pub strategy: String,
}

impl TestReport {
    pub fn has_bugs(&self) -> bool {
        !self.bugs.is_empty()
    }

    pub fn first_bug(&self) -> Option<&BugReport> {
        self.bugs.first()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// What one worker (or the sequential loop) produced
#[derive(Default)]
struct WorkerReport {
    iterations: u64,
    bugs: Vec<BugReport>,
    total_steps: u64,
    bound_hits: u64,
    exhausted: bool,
    states: HashSet<u64>,
    events_dispatched: u64,
    strategy: &'static str,
}

/// Runs test closures under the controlled scheduler
pub struct TestEngine {
    config: Configuration,
    dropped: Option<Sender<DroppedEvent>>,
}

impl TestEngine {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            dropped: None,
        }
    }

    /// Publish every dropped event on `sink`
    pub fn with_dropped_events(mut self, sink: Sender<DroppedEvent>) -> Self {
        self.dropped = Some(sink);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            max_steps: self.config.max_steps,
            liveness_threshold: self.config.liveness_threshold,
        }
    }

    /// Explore up to `iterations` schedules of `test`
    pub fn run<F>(&self, test: F) -> Result<TestReport>
    where
        F: Fn(&Runtime) -> Result<()>,
    {
        self.config.validate()?;
        info!(
            strategy = %self.config.strategy,
            iterations = self.config.iterations,
            seed = self.config.base_seed(),
            "Starting exploration"
        );
        let strategy = strategies::from_configuration(&self.config, self.config.base_seed());
        let worker = self.explore(strategy, 0, self.config.iterations, None, &test)?;
        let states = worker.states.len();
        Ok(self.summarize(vec![worker], states))
    }

    /// Run one iteration; any violation is returned as the error
    pub fn run_single<F>(&self, test: F) -> Result<()>
    where
        F: Fn(&Runtime) -> Result<()>,
    {
        self.config.validate()?;
        let strategy = strategies::from_configuration(&self.config, self.config.base_seed());
        let outcome = self.run_iteration(strategy, &TableCache::default(), &test);
        match outcome.violation {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Re-execute the iteration recorded in `schedule`
    pub fn replay<F>(&self, schedule: &Schedule, test: F) -> Result<Option<BugReport>>
    where
        F: Fn(&Runtime) -> Result<()>,
    {
        info!(decisions = schedule.len(), "Replaying schedule");
        let strategy = Box::new(ReplayStrategy::new(schedule.clone()));
        let outcome = self.run_iteration(strategy, &TableCache::default(), &test);

        let bug = match outcome.violation {
            Some(err) => match err.violation_kind() {
                Some(kind) => Some(BugReport {
                    iteration: 0,
                    kind,
                    message: err.message().to_string(),
                    schedule: outcome.schedule.clone(),
                    steps: outcome.steps,
                    seed: None,
                }),
                None => return Err(err),
            },
            None => None,
        };
        if outcome.schedule != *schedule {
            warn!(
                replayed = outcome.schedule.len(),
                recorded = schedule.len(),
                "Replay ended early"
            );
            return Err(Error::replay(format!(
                "program finished after {} of {} recorded decisions",
                outcome.schedule.len(),
                schedule.len()
            )));
        }
        Ok(bug)
    }

    /// Explore with `workers` threads, each owning its strategy and runtimes
    ///
    /// Iterations are split into contiguous blocks; worker `w` starts at
    /// global iteration `w * block` with seed `base + w * block`, so a random
    /// iteration sees the same seed as in a sequential run.
    pub fn run_parallel<F>(&self, test: F) -> Result<TestReport>
    where
        F: Fn(&Runtime) -> Result<()> + Sync,
    {
        self.config.validate()?;
        if self.config.strategy == StrategyKind::Dfs || self.config.workers == 1 {
            if self.config.workers > 1 {
                info!("Depth-first search cannot be partitioned, using one worker");
            }
            return self.run(test);
        }

        let iterations = self.config.iterations;
        let workers = (self.config.workers as u64).min(iterations).max(1);
        let block = iterations.div_ceil(workers);
        let base_seed = self.config.base_seed();
        let stop = AtomicBool::new(false);
        let merged_states = Mutex::new(HashSet::new());
        let (tx, rx) = unbounded();

        info!(workers, block, strategy = %self.config.strategy, "Starting parallel exploration");
        thread::scope(|scope| {
            for w in 0..workers {
                let first = w * block;
                if first >= iterations {
                    break;
                }
                let count = block.min(iterations - first);
                let tx = tx.clone();
                let (test, stop, merged_states) = (&test, &stop, &merged_states);
                scope.spawn(move || {
                    let seed = base_seed.wrapping_add(first);
                    let strategy = strategies::from_configuration(&self.config, seed);
                    let result = self.explore(strategy, first, count, Some(stop), test);
                    if let Ok(report) = &result {
                        merged_states.lock().extend(report.states.iter().copied());
                    } else {
                        stop.store(true, Ordering::Relaxed);
                    }
                    debug!(worker = w, first, count, "Worker finished");
                    let _ = tx.send(result);
                });
            }
        });
        drop(tx);

        let mut reports = Vec::new();
        for result in rx.iter() {
            reports.push(result?);
        }
        reports.sort_by_key(|r| r.bugs.first().map_or(u64::MAX, |b| b.iteration));
        let distinct = merged_states.lock().len();
        Ok(self.summarize(reports, distinct))
    }

    fn explore<F>(
        &self,
        mut strategy: Box<dyn ExplorationStrategy>,
        first_iteration: u64,
        iterations: u64,
        stop: Option<&AtomicBool>,
        test: &F,
    ) -> Result<WorkerReport>
    where
        F: Fn(&Runtime) -> Result<()>,
    {
        let tables = TableCache::default();
        let mut report = WorkerReport {
            strategy: strategy.name(),
            ..WorkerReport::default()
        };

        for n in 0..iterations {
            if stop.map_or(false, |s| s.load(Ordering::Relaxed)) {
                break;
            }
            let iteration = first_iteration + n;
            let seed = strategy.current_seed();
            let outcome = self.run_iteration(strategy, &tables, test);

            report.iterations += 1;
            report.total_steps += outcome.steps;
            report.bound_hits += u64::from(outcome.bound_hit);
            report.events_dispatched += outcome.events_dispatched;
            report.states.extend(outcome.states);
            strategy = outcome
                .strategy
                .ok_or_else(|| {
                    Error::configuration("strategy was not returned by the runtime", None)
                })?;

            let found_bug = match outcome.violation {
                None => false,
                Some(err) => {
                    let kind = err.violation_kind().ok_or_else(|| err.clone())?;
                    info!(
                        iteration,
                        %kind,
                        steps = outcome.steps,
                        seed = ?seed,
                        "Iteration found a bug"
                    );
                    report.bugs.push(BugReport {
                        iteration,
                        kind,
                        message: err.message().to_string(),
                        schedule: outcome.schedule,
                        steps: outcome.steps,
                        seed,
                    });
                    true
                }
            };

            if found_bug && self.config.stop_at_first_bug {
                if let Some(stop) = stop {
                    stop.store(true, Ordering::Relaxed);
                }
                break;
            }
            if !strategy.prepare_next_iteration(found_bug) {
                debug!(iteration, "Strategy exhausted");
                report.exhausted = true;
                break;
            }
        }
        Ok(report)
    }

    fn run_iteration<F>(
        &self,
        strategy: Box<dyn ExplorationStrategy>,
        tables: &TableCache,
        test: &F,
    ) -> IterationOutcome
    where
        F: Fn(&Runtime) -> Result<()>,
    {
        let runtime = Runtime::new(self.settings(), strategy, tables.clone(), self.dropped.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Err(err) = test(&runtime) {
                runtime.record_violation(err);
            }
            runtime.run_loop();
        }));
        if let Err(payload) = result {
            runtime.record_violation(Error::panicked(panic_message(payload.as_ref())));
        }
        runtime.teardown();
        runtime.finish()
    }

    fn summarize(&self, workers: Vec<WorkerReport>, distinct_states: usize) -> TestReport {
        let mut report = TestReport {
            iterations: 0,
            bugs: Vec::new(),
            total_steps: 0,
            bound_hits: 0,
            exhausted: false,
            coverage: Coverage {
                distinct_states,
                events_dispatched: 0,
            },
            strategy: self.config.strategy.to_string(),
        };
        for worker in workers {
            report.iterations += worker.iterations;
            report.total_steps += worker.total_steps;
            report.bound_hits += worker.bound_hits;
            report.exhausted |= worker.exhausted;
            report.coverage.events_dispatched += worker.events_dispatched;
            report.strategy = worker.strategy.to_string();
            report.bugs.extend(worker.bugs);
        }
        info!(
            iterations = report.iterations,
            bugs = report.bugs.len(),
            steps = report.total_steps,
            distinct_states = report.coverage.distinct_states,
            exhausted = report.exhausted,
            "Exploration finished"
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
