//! Failure detector
//!
//! A cluster manager creates the nodes and a detector, then optionally halts
//! every node. The detector pings each live node that has not answered yet,
//! starts a timer and waits: when all live nodes answer it cancels the timer,
//! otherwise it retries once per round and declares the silent nodes dead.
//!
//! The timer is a model: it fires through its default handler and answers a
//! cancel request nondeterministically, either cancelling cleanly or racing
//! with the timeout. The [`Safety`] monitor bounds the number of unanswered
//! pings per node.
//!
//! The detector never stops on its own; iterations end at the step bound.

use runtime::{
    ActorId, ActorTable, Context, DefaultEvent, Event, Monitor, MonitorTable, Result, Runtime,
    StateMachine,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use types::hash_of;

/// Most unanswered pings a node may have outstanding
pub const MAX_PENDING_PINGS: u32 = 3;

/// Attempts per round before silent nodes are declared dead
const ATTEMPTS_PER_ROUND: u32 = 2;

#[derive(Debug)]
struct Watch(Vec<ActorId>);

#[derive(Debug)]
pub struct RegisterClient(pub ActorId);

#[derive(Debug)]
pub struct UnregisterClient(pub ActorId);

#[derive(Debug)]
pub struct Ping(pub ActorId);

#[derive(Debug)]
pub struct Pong(pub ActorId);

#[derive(Debug)]
struct Unit;

#[derive(Debug)]
struct RoundDone;

#[derive(Debug)]
struct TimerCancelled;

#[derive(Debug)]
struct StartTimer {
    #[allow(dead_code)]
    millis: u64,
}

#[derive(Debug)]
struct CancelTimer;

#[derive(Debug)]
struct Timeout;

#[derive(Debug)]
struct CancelSuccess;

#[derive(Debug)]
struct CancelFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    Init,
    InjectFailures,
    Steady,
}

/// Creates the nodes and the detector
pub struct ClusterManager {
    nodes: usize,
    inject_failures: bool,
    members: Vec<ActorId>,
}

impl ClusterManager {
    pub fn new(nodes: usize, inject_failures: bool) -> Self {
        Self {
            nodes,
            inject_failures,
            members: Vec::new(),
        }
    }
}

impl StateMachine for ClusterManager {
    type State = ClusterState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(ClusterState::Init)
            .on_entry(ClusterState::Init, |m: &mut ClusterManager, ctx, _| {
                m.members = (0..m.nodes)
                    .map(|_| ctx.create_actor(Node, None))
                    .collect::<Result<Vec<_>>>()?;
                let detector = ctx.create_actor(
                    FailureDetector::default(),
                    Some(Event::new(Watch(m.members.clone()))),
                )?;
                ctx.send(detector, RegisterClient(ctx.id()));
                ctx.goto(if m.inject_failures {
                    ClusterState::InjectFailures
                } else {
                    ClusterState::Steady
                });
                Ok(())
            })
            .on_entry(ClusterState::InjectFailures, |m: &mut ClusterManager, ctx, _| {
                for node in &m.members {
                    ctx.send_event(*node, Event::halt());
                }
                debug!(nodes = m.members.len(), "Injected node failures");
                Ok(())
            })
            .state(ClusterState::Steady);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorState {
    Init,
    SendPing,
    WaitForCancelResponse,
    Reset,
}

/// Pings the watched nodes in rounds and tracks which are alive
#[derive(Default)]
pub struct FailureDetector {
    nodes: Vec<ActorId>,
    clients: BTreeSet<ActorId>,
    alive: BTreeSet<ActorId>,
    responses: BTreeSet<ActorId>,
    attempts: u32,
    timer: Option<ActorId>,
}

impl FailureDetector {
    fn start_timer(&self, ctx: &Context<Self>, millis: u64) {
        if let Some(timer) = self.timer {
            ctx.send(timer, StartTimer { millis });
        }
    }

    fn cancel_timer(&self, ctx: &Context<Self>) {
        if let Some(timer) = self.timer {
            ctx.send(timer, CancelTimer);
        }
    }

    fn silent(&self) -> impl Iterator<Item = &ActorId> + '_ {
        self.nodes
            .iter()
            .filter(|n| self.alive.contains(*n) && !self.responses.contains(*n))
    }
}

impl StateMachine for FailureDetector {
    type State = DetectorState;

    fn configure(table: &mut ActorTable<Self>) {
        use DetectorState::*;

        table
            .start(Init)
            .on_entry_with::<Watch, _>(Init, |m, ctx, watch| {
                m.nodes = watch.0.clone();
                m.alive = m.nodes.iter().copied().collect();
                m.timer = Some(ctx.create_actor(Timer { owner: ctx.id() }, None)?);
                ctx.raise(Unit);
                Ok(())
            })
            .on_do::<RegisterClient, _>(Init, |m, _ctx, register| {
                m.clients.insert(register.0);
                Ok(())
            })
            .on_do::<UnregisterClient, _>(Init, |m, _ctx, unregister| {
                m.clients.remove(&unregister.0);
                Ok(())
            })
            .on_push::<Unit>(Init, SendPing)
            .on_entry(SendPing, |m: &mut FailureDetector, ctx, _| {
                for node in m.silent() {
                    ctx.monitor::<Safety, _>(PingSent(*node))?;
                    ctx.send(*node, Ping(ctx.id()));
                }
                m.start_timer(ctx, 100);
                Ok(())
            })
            .on_goto::<RoundDone>(SendPing, Reset)
            .on_push::<TimerCancelled>(SendPing, WaitForCancelResponse)
            .on_do::<Pong, _>(SendPing, |m, ctx, pong| {
                if m.alive.contains(&pong.0) {
                    m.responses.insert(pong.0);
                    if m.responses.len() == m.alive.len() {
                        m.cancel_timer(ctx);
                        ctx.raise(TimerCancelled);
                    }
                }
                Ok(())
            })
            .on_do::<Timeout, _>(SendPing, |m, ctx, _timeout| {
                m.attempts += 1;
                if m.responses.len() < m.alive.len() && m.attempts < ATTEMPTS_PER_ROUND {
                    ctx.goto(SendPing);
                } else {
                    let dead: Vec<ActorId> = m.silent().copied().collect();
                    for node in &dead {
                        m.alive.remove(node);
                    }
                    if !dead.is_empty() {
                        debug!(detector = %ctx.id(), dead = dead.len(), "Declared nodes dead");
                    }
                    ctx.raise(RoundDone);
                }
                Ok(())
            })
            .on_do::<CancelSuccess, _>(WaitForCancelResponse, |_m, ctx, _| {
                ctx.raise(RoundDone);
                Ok(())
            })
            .on_do::<CancelFailure, _>(WaitForCancelResponse, |_m, ctx, _| {
                ctx.pop();
                Ok(())
            })
            .defer::<Timeout>(WaitForCancelResponse)
            .defer::<Pong>(WaitForCancelResponse)
            .on_entry(Reset, |m: &mut FailureDetector, ctx, _| {
                m.attempts = 0;
                m.responses.clear();
                m.start_timer(ctx, 1000);
                Ok(())
            })
            .on_goto::<Timeout>(Reset, SendPing)
            .ignore::<Pong>(Reset);
    }

    fn hashed_state(&self) -> Option<u64> {
        Some(hash_of(&(&self.alive, &self.responses, self.attempts)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    WaitPing,
}

/// Answers every ping
pub struct Node;

impl StateMachine for Node {
    type State = NodeState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(NodeState::WaitPing)
            .on_do::<Ping, _>(NodeState::WaitPing, |_m, ctx, ping| {
                ctx.monitor::<Safety, _>(PongSent(ctx.id()))?;
                ctx.send(ping.0, Pong(ctx.id()));
                Ok(())
            });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerState {
    WaitForReq,
    WaitForCancel,
}

/// Fires nondeterministically instead of after a delay
pub struct Timer {
    owner: ActorId,
}

impl StateMachine for Timer {
    type State = TimerState;

    fn configure(table: &mut ActorTable<Self>) {
        use TimerState::*;

        table
            .start(WaitForReq)
            .on_goto_with::<CancelTimer, _>(WaitForReq, WaitForReq, |m, ctx, _| {
                ctx.send(m.owner, CancelFailure);
                Ok(())
            })
            .on_goto::<StartTimer>(WaitForReq, WaitForCancel)
            .ignore::<StartTimer>(WaitForCancel)
            .on_goto_with::<CancelTimer, _>(WaitForCancel, WaitForReq, |m, ctx, _| {
                if ctx.random_boolean()? {
                    ctx.send(m.owner, CancelSuccess);
                } else {
                    ctx.send(m.owner, CancelFailure);
                    ctx.send(m.owner, Timeout);
                }
                Ok(())
            })
            .on_goto_with::<DefaultEvent, _>(WaitForCancel, WaitForReq, |m, ctx, _| {
                ctx.send(m.owner, Timeout);
                Ok(())
            });
    }
}

#[derive(Debug)]
struct PingSent(ActorId);

#[derive(Debug)]
struct PongSent(ActorId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyState {
    Watching,
}

/// Every node has at most [`MAX_PENDING_PINGS`] unanswered pings
#[derive(Default)]
pub struct Safety {
    pending: BTreeMap<ActorId, u32>,
}

impl Monitor for Safety {
    type State = SafetyState;

    fn configure(table: &mut MonitorTable<Self>) {
        table
            .start(SafetyState::Watching)
            .on_do::<PingSent, _>(SafetyState::Watching, |m, ctx, ping| {
                let count = m.pending.entry(ping.0).or_default();
                *count += 1;
                let count = *count;
                ctx.assert(
                    count <= MAX_PENDING_PINGS,
                    format!("{} ping count must be <= {}", ping.0, MAX_PENDING_PINGS),
                )
            })
            .on_do::<PongSent, _>(SafetyState::Watching, |m, ctx, pong| {
                let count = m.pending.get(&pong.0).copied().unwrap_or(0);
                ctx.assert(count > 0, format!("{} answered a ping nobody sent", pong.0))?;
                m.pending.insert(pong.0, count - 1);
                Ok(())
            });
    }

    fn hashed_state(&self) -> Option<u64> {
        Some(hash_of(&self.pending))
    }
}

/// Register [`Safety`] and start a cluster of `nodes`
pub fn failure_detector(rt: &Runtime, nodes: usize, inject_failures: bool) -> Result<()> {
    rt.register_monitor(Safety::default())?;
    rt.create_actor(ClusterManager::new(nodes, inject_failures), None)?;
    Ok(())
}
