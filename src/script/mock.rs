//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::transport::Transport;
use crate::client::{Client, ClientBuilder};
use crate::error::TransportError;
use crate::job::SequentialJidGenerator;
use crate::script::ScriptSource;
use crate::wire::{Arg, FixedClock, Reply};

/// Timestamp every test client is pinned to.
pub(crate) const TEST_NOW: i64 = 1_700_000_000;

#[derive(Default)]
struct MockState {
    replies: VecDeque<Result<Reply, TransportError>>,
    calls: Vec<(String, Vec<Arg>)>,
    loaded: Vec<String>,
    flushed: bool,
}

/// Records every call and answers from a queue of scripted replies.
/// An empty queue answers `Reply::Okay`.
#[derive(Default)]
pub(crate) struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_reply(&self, reply: Reply) {
        self.state
            .lock()
            .expect("lock not poisoned")
            .replies
            .push_back(Ok(reply));
    }

    pub(crate) fn push_json(&self, json: &str) {
        self.push_reply(Reply::bytes(json));
    }

    pub(crate) fn push_error(&self, err: TransportError) {
        self.state
            .lock()
            .expect("lock not poisoned")
            .replies
            .push_back(Err(err));
    }

    /// While flushed, every evaluation misses until the next load.
    pub(crate) fn set_flushed(&self, flushed: bool) {
        self.state.lock().expect("lock not poisoned").flushed = flushed;
    }

    pub(crate) fn loads(&self) -> usize {
        self.state.lock().expect("lock not poisoned").loaded.len()
    }

    pub(crate) fn loaded_bodies(&self) -> Vec<String> {
        self.state.lock().expect("lock not poisoned").loaded.clone()
    }

    pub(crate) fn calls(&self) -> Vec<(String, Vec<Arg>)> {
        self.state.lock().expect("lock not poisoned").calls.clone()
    }

    pub(crate) fn last_args(&self) -> Vec<Arg> {
        self.calls()
            .pop()
            .map(|(_, args)| args)
            .expect("at least one call recorded")
    }

    /// Last call's arguments rendered as strings, without the qualifier
    /// and timestamp.
    pub(crate) fn last_call(&self) -> Vec<String> {
        let args = self.last_args();
        let mut out = vec![args[1].to_string()];
        out.extend(args[3..].iter().map(|a| a.to_string()));
        out
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn eval_sha(&self, hash: &str, args: &[Arg]) -> Result<Reply, TransportError> {
        let mut state = self.state.lock().expect("lock not poisoned");
        state.calls.push((hash.to_string(), args.to_vec()));
        if state.flushed {
            return Err(TransportError::NoScript(hash.to_string()));
        }
        state.replies.pop_front().unwrap_or(Ok(Reply::Okay))
    }

    async fn script_load(&self, body: &str) -> Result<String, TransportError> {
        let mut state = self.state.lock().expect("lock not poisoned");
        state.loaded.push(body.to_string());
        state.flushed = false;
        Ok(format!("hash-{}", state.loaded.len()))
    }
}

/// A client over `mock` with a fixed clock and sequential jids.
pub(crate) fn test_client(mock: &Arc<MockTransport>) -> Client {
    ClientBuilder::new(mock.clone(), ScriptSource::new("qless", "-- qless library"))
        .with_clock(Arc::new(FixedClock::new(TEST_NOW)))
        .with_jid_generator(Arc::new(SequentialJidGenerator::new("jid")))
        .with_worker_name("worker-1")
        .build()
}
