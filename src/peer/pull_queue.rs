//! FIFO queue of pending pull requests.

use std::{cell::RefCell, collections::HashMap, collections::VecDeque};

use futures::channel::oneshot;

use crate::rpc::SessionId;

use super::NegotiationError;

/// Completion outcome delivered to every waiter of a pull request.
pub type PullOutcome = Result<(), NegotiationError>;

/// One queued unit of pull work.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PullRequest {
    /// Session publishing the wanted track.
    pub session_id: SessionId,

    /// Name of the wanted track.
    pub track_name: String,
}

/// Actual data of the [`PullQueue`].
#[derive(Default)]
struct Inner {
    /// Requests awaiting processing, in submission order.
    queue: VecDeque<PullRequest>,

    /// Completion signals per request, covering both queued and in-flight
    /// requests so duplicates coalesce onto one network round trip.
    waiters: HashMap<PullRequest, Vec<oneshot::Sender<PullOutcome>>>,

    /// Whether a drain of this queue is currently running.
    busy: bool,
}

/// FIFO queue serializing pull requests against the shared peer connection.
///
/// Exactly one drain runs at a time; requests for the same
/// (session, track name) pair registered while one is queued or in flight
/// attach to its completion instead of enqueueing again.
#[derive(Default)]
pub struct PullQueue(RefCell<Inner>);

impl PullQueue {
    /// Creates a new empty [`PullQueue`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in the provided pull, enqueueing it unless an
    /// identical request is already pending.
    ///
    /// Returns the completion signal to await.
    pub fn register(
        &self,
        session_id: SessionId,
        track_name: String,
    ) -> oneshot::Receiver<PullOutcome> {
        let request = PullRequest {
            session_id,
            track_name,
        };
        let (tx, rx) = oneshot::channel();

        let mut inner = self.0.borrow_mut();
        let known = inner.waiters.contains_key(&request);
        inner.waiters.entry(request.clone()).or_default().push(tx);
        if !known {
            inner.queue.push_back(request);
        }

        rx
    }

    /// Attempts to become the drain of this queue.
    ///
    /// Returns `false` if a drain is already running.
    #[must_use]
    pub fn try_lead(&self) -> bool {
        let mut inner = self.0.borrow_mut();
        if inner.busy {
            false
        } else {
            inner.busy = true;
            true
        }
    }

    /// Pops the next request to process, if any.
    #[must_use]
    pub fn pop(&self) -> Option<PullRequest> {
        self.0.borrow_mut().queue.pop_front()
    }

    /// Completes the provided request, waking every coalesced waiter.
    pub fn complete(&self, request: &PullRequest, outcome: &PullOutcome) {
        let waiters = self.0.borrow_mut().waiters.remove(request);
        for tx in waiters.into_iter().flatten() {
            let _ = tx.send(outcome.clone());
        }
    }

    /// Releases the drain flag.
    pub fn release(&self) {
        self.0.borrow_mut().busy = false;
    }

    /// Fails every pending request and empties the queue.
    pub fn abort_all(&self, error: &NegotiationError) {
        let mut inner = self.0.borrow_mut();
        inner.queue.clear();
        let waiters = std::mem::take(&mut inner.waiters);
        drop(inner);
        for tx in waiters.into_iter().flat_map(|(_, txs)| txs) {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
