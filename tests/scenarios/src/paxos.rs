//! Single-decree Paxos
//!
//! A cluster manager reserves ids by name (`p1..`, `a1..`, `l1..`), binds a
//! proposer, acceptor or learner to each, asks every proposer to propose its
//! own value and then halts up to `max_failures` acceptors chosen at random.
//!
//! Proposals are ordered by round, then by proposer name. A proposer that
//! collects promises from a majority adopts the value of the highest
//! proposal any of them already accepted, if there is one. The learner
//! learns a value once a majority of acceptors last accepted the same
//! proposal, and the [`Consensus`] monitor checks that every learned value
//! is the same.

use runtime::{
    ActorId, ActorTable, Event, Monitor, MonitorTable, Result, Runtime, StateMachine,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use types::hash_of;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Proposal {
    pub round: u32,
    pub proposer: String,
}

#[derive(Debug)]
pub struct ClientProposeValue(pub String);

#[derive(Debug)]
struct ProposalRequest {
    from: ActorId,
    proposal: Proposal,
}

#[derive(Debug)]
struct ProposalResponse {
    from: ActorId,
    previous: Option<(Proposal, String)>,
}

#[derive(Debug)]
struct AcceptRequest {
    proposal: Proposal,
    value: String,
}

#[derive(Debug)]
struct ValueAccepted {
    acceptor: ActorId,
    proposal: Proposal,
    value: String,
}

#[derive(Debug)]
struct ValueLearned(String);

/// Cluster shape of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaxosConfig {
    pub proposers: usize,
    pub acceptors: usize,
    pub learners: usize,
    pub max_failures: usize,
}

impl Default for PaxosConfig {
    fn default() -> Self {
        Self {
            proposers: 3,
            acceptors: 5,
            learners: 1,
            max_failures: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    Init,
}

pub struct ClusterManager {
    config: PaxosConfig,
}

fn reserve(rt: &Runtime, prefix: &str, count: usize) -> Vec<(String, ActorId)> {
    (1..=count)
        .map(|i| {
            let name = format!("{}{}", prefix, i);
            let id = rt.actor_id_from_name(&name);
            (name, id)
        })
        .collect()
}

fn ids(named: &[(String, ActorId)]) -> Vec<ActorId> {
    named.iter().map(|(_, id)| *id).collect()
}

impl StateMachine for ClusterManager {
    type State = ClusterState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(ClusterState::Init)
            .on_entry(ClusterState::Init, |m: &mut ClusterManager, ctx, _| {
                let rt = ctx.runtime();
                let proposers = reserve(rt, "p", m.config.proposers);
                let acceptors = reserve(rt, "a", m.config.acceptors);
                let learners = reserve(rt, "l", m.config.learners);

                for (name, id) in &proposers {
                    rt.create_actor_with_id(*id, Proposer::new(name, ids(&acceptors)), None)?;
                }
                for (_, id) in &acceptors {
                    rt.create_actor_with_id(*id, Acceptor::new(ids(&learners)), None)?;
                }
                for (_, id) in &learners {
                    rt.create_actor_with_id(*id, Learner::new(acceptors.len()), None)?;
                }

                for (i, (_, id)) in proposers.iter().enumerate() {
                    ctx.send(*id, ClientProposeValue(format!("v{}", i + 1)));
                }

                let mut failures = 0;
                for (name, id) in &acceptors {
                    if ctx.random_boolean()? && failures < m.config.max_failures {
                        failures += 1;
                        debug!(acceptor = %name, "Halting acceptor");
                        ctx.send_event(*id, Event::halt());
                    }
                }
                Ok(())
            });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProposerState {
    Ready,
    WaitingForAcks,
}

pub struct Proposer {
    name: String,
    acceptors: Vec<ActorId>,
    counter: u32,
    value: String,
    current: Option<Proposal>,
    promised: BTreeSet<ActorId>,
    previous: BTreeMap<ActorId, (Proposal, String)>,
    chosen: bool,
}

impl Proposer {
    pub fn new(name: &str, acceptors: Vec<ActorId>) -> Self {
        Self {
            name: name.to_string(),
            acceptors,
            counter: 0,
            value: String::new(),
            current: None,
            promised: BTreeSet::new(),
            previous: BTreeMap::new(),
            chosen: false,
        }
    }

    /// Value of the highest proposal already accepted by a promising acceptor
    fn highest_previous(&self) -> Option<&String> {
        self.previous
            .values()
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, value)| value)
    }
}

impl StateMachine for Proposer {
    type State = ProposerState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(ProposerState::Ready)
            .on_do::<ClientProposeValue, _>(ProposerState::Ready, |m, ctx, request| {
                m.value = request.0.clone();
                m.counter += 1;
                m.promised.clear();
                let proposal = Proposal {
                    round: m.counter,
                    proposer: m.name.clone(),
                };
                for acceptor in &m.acceptors {
                    ctx.send(
                        *acceptor,
                        ProposalRequest {
                            from: ctx.id(),
                            proposal: proposal.clone(),
                        },
                    );
                }
                m.current = Some(proposal);
                ctx.goto(ProposerState::WaitingForAcks);
                Ok(())
            })
            .on_do::<ProposalResponse, _>(ProposerState::WaitingForAcks, |m, ctx, response| {
                let Some(proposal) = m.current.clone() else {
                    return Ok(());
                };
                if let Some(previous) = &response.previous {
                    m.previous.insert(response.from, previous.clone());
                }
                m.promised.insert(response.from);

                let majority = m.promised.len() * 2 > m.acceptors.len();
                if !m.chosen && majority {
                    if let Some(value) = m.highest_previous().cloned() {
                        m.value = value;
                    }
                    m.chosen = true;
                    debug!(proposer = %m.name, value = %m.value, "Value chosen");
                    for acceptor in &m.promised {
                        ctx.send(
                            *acceptor,
                            AcceptRequest {
                                proposal: proposal.clone(),
                                value: m.value.clone(),
                            },
                        );
                    }
                } else if m.chosen {
                    ctx.send(
                        response.from,
                        AcceptRequest {
                            proposal,
                            value: m.value.clone(),
                        },
                    );
                }
                Ok(())
            });
    }

    fn hashed_state(&self) -> Option<u64> {
        Some(hash_of(&(self.chosen, self.counter, &self.value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptorState {
    Serving,
}

pub struct Acceptor {
    learners: Vec<ActorId>,
    promised: Option<Proposal>,
    accepted: Option<(Proposal, String)>,
}

impl Acceptor {
    pub fn new(learners: Vec<ActorId>) -> Self {
        Self {
            learners,
            promised: None,
            accepted: None,
        }
    }
}

impl StateMachine for Acceptor {
    type State = AcceptorState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(AcceptorState::Serving)
            .on_do::<ProposalRequest, _>(AcceptorState::Serving, |m, ctx, request| {
                let newer = m
                    .promised
                    .as_ref()
                    .map_or(true, |promised| request.proposal > *promised);
                if newer {
                    m.promised = Some(request.proposal.clone());
                    ctx.send(
                        request.from,
                        ProposalResponse {
                            from: ctx.id(),
                            previous: m.accepted.clone(),
                        },
                    );
                }
                Ok(())
            })
            .on_do::<AcceptRequest, _>(AcceptorState::Serving, |m, ctx, request| {
                if m.promised.as_ref() != Some(&request.proposal) {
                    return Ok(());
                }
                m.accepted = Some((request.proposal.clone(), request.value.clone()));
                for learner in &m.learners {
                    ctx.send(
                        *learner,
                        ValueAccepted {
                            acceptor: ctx.id(),
                            proposal: request.proposal.clone(),
                            value: request.value.clone(),
                        },
                    );
                }
                Ok(())
            });
    }

    fn hashed_state(&self) -> Option<u64> {
        Some(hash_of(&(&self.promised, &self.accepted)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LearnerState {
    Listening,
}

pub struct Learner {
    acceptors: usize,
    latest: BTreeMap<ActorId, Proposal>,
    values: BTreeMap<Proposal, String>,
    learned: Option<String>,
}

impl Learner {
    pub fn new(acceptors: usize) -> Self {
        Self {
            acceptors,
            latest: BTreeMap::new(),
            values: BTreeMap::new(),
            learned: None,
        }
    }

    /// Value of the proposal a majority of acceptors last accepted
    fn majority_value(&self) -> Option<String> {
        let mut counts: BTreeMap<&Proposal, usize> = BTreeMap::new();
        for proposal in self.latest.values() {
            *counts.entry(proposal).or_default() += 1;
        }
        counts
            .into_iter()
            .find(|(_, count)| count * 2 > self.acceptors)
            .and_then(|(proposal, _)| self.values.get(proposal).cloned())
    }
}

impl StateMachine for Learner {
    type State = LearnerState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(LearnerState::Listening)
            .on_do::<ValueAccepted, _>(LearnerState::Listening, |m, ctx, accepted| {
                m.latest.insert(accepted.acceptor, accepted.proposal.clone());
                m.values
                    .insert(accepted.proposal.clone(), accepted.value.clone());

                let Some(value) = m.majority_value() else {
                    return Ok(());
                };
                if let Some(learned) = &m.learned {
                    if *learned != value {
                        return ctx.assert(
                            false,
                            format!("conflicting values learned: {} then {}", learned, value),
                        );
                    }
                }
                m.learned = Some(value.clone());
                ctx.monitor::<Consensus, _>(ValueLearned(value))
            });
    }

    fn hashed_state(&self) -> Option<u64> {
        Some(hash_of(&self.learned))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusState {
    Undecided,
    Decided,
}

/// Every learner learns the same value
#[derive(Default)]
pub struct Consensus {
    decided: Option<String>,
}

impl Monitor for Consensus {
    type State = ConsensusState;

    fn configure(table: &mut MonitorTable<Self>) {
        table
            .start(ConsensusState::Undecided)
            .on_goto_with::<ValueLearned, _>(
                ConsensusState::Undecided,
                ConsensusState::Decided,
                |m, _ctx, learned| {
                    m.decided = Some(learned.0.clone());
                    Ok(())
                },
            )
            .on_do::<ValueLearned, _>(ConsensusState::Decided, |m, ctx, learned| {
                ctx.assert(
                    m.decided.as_deref() == Some(learned.0.as_str()),
                    format!(
                        "value {} learned after {:?} was decided",
                        learned.0, m.decided
                    ),
                )
            });
    }
}

/// Register [`Consensus`] and start the cluster
pub fn paxos(rt: &Runtime, config: PaxosConfig) -> Result<()> {
    rt.register_monitor(Consensus::default())?;
    rt.create_actor(ClusterManager { config }, None)?;
    Ok(())
}
