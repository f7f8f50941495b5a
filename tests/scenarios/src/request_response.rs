//! Request/response with a liveness obligation
//!
//! A client issues a batch of requests to a server and waits for every
//! reply. The [`Outstanding`] monitor is hot while any request is
//! unanswered. A lossy server drops replies nondeterministically, which
//! leaves the monitor hot once the program has nothing left to do.

use runtime::{ActorId, ActorTable, Monitor, MonitorTable, Result, Runtime, StateMachine};
use std::collections::BTreeSet;

#[derive(Debug)]
struct Request {
    from: ActorId,
    id: u32,
}

#[derive(Debug)]
struct Reply(u32);

#[derive(Debug)]
struct Issued(u32);

#[derive(Debug)]
struct Answered(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ClientState {
    Sending,
    Waiting,
    Done,
}

struct Client {
    server: ActorId,
    requests: u32,
    outstanding: BTreeSet<u32>,
}

impl StateMachine for Client {
    type State = ClientState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(ClientState::Sending)
            .on_entry(ClientState::Sending, |m: &mut Client, ctx, _| {
                for id in 0..m.requests {
                    ctx.monitor::<Outstanding, _>(Issued(id))?;
                    ctx.send(m.server, Request { from: ctx.id(), id });
                    m.outstanding.insert(id);
                }
                ctx.goto(ClientState::Waiting);
                Ok(())
            })
            .on_do::<Reply, _>(ClientState::Waiting, |m, ctx, reply| {
                if m.outstanding.remove(&reply.0) {
                    ctx.monitor::<Outstanding, _>(Answered(reply.0))?;
                }
                if m.outstanding.is_empty() {
                    ctx.goto(ClientState::Done);
                }
                Ok(())
            })
            .state(ClientState::Done);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ServerState {
    Serving,
}

struct Server {
    lossy: bool,
}

impl StateMachine for Server {
    type State = ServerState;

    fn configure(table: &mut ActorTable<Self>) {
        table
            .start(ServerState::Serving)
            .on_do::<Request, _>(ServerState::Serving, |m, ctx, request| {
                if !m.lossy || ctx.random_boolean()? {
                    ctx.send(request.from, Reply(request.id));
                }
                Ok(())
            });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutstandingState {
    Idle,
    Waiting,
}

/// Hot while a request is unanswered
#[derive(Default)]
pub struct Outstanding {
    open: usize,
}

impl Monitor for Outstanding {
    type State = OutstandingState;

    fn configure(table: &mut MonitorTable<Self>) {
        use OutstandingState::*;

        table
            .start(Idle)
            .cold(Idle)
            .hot(Waiting)
            .on_goto_with::<Issued, _>(Idle, Waiting, |m, _ctx, _| {
                m.open += 1;
                Ok(())
            })
            .on_do::<Issued, _>(Waiting, |m, _ctx, _| {
                m.open += 1;
                Ok(())
            })
            .on_do::<Answered, _>(Waiting, |m, ctx, _| {
                m.open = m.open.saturating_sub(1);
                if m.open == 0 {
                    ctx.goto(Idle);
                }
                Ok(())
            });
    }

    fn hashed_state(&self) -> Option<u64> {
        Some(self.open as u64)
    }
}

/// One client sending `requests` to one server
pub fn request_response(rt: &Runtime, requests: u32, lossy: bool) -> Result<()> {
    rt.register_monitor(Outstanding::default())?;
    let server = rt.create_actor(Server { lossy }, None)?;
    rt.create_actor(
        Client {
            server,
            requests,
            outstanding: BTreeSet::new(),
        },
        None,
    )?;
    Ok(())
}
