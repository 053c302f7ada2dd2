//! Signaling channel adapter.
//!
//! [`SignalingClient`] presents one request/response + publish/subscribe
//! contract over any [`SignalingTransport`] backend. Request sends are
//! retried on a fixed backoff until the channel reports ready, so callers
//! never observe a "channel not open" error; malformed responses are dropped
//! by the transport layer, leaving the corresponding request pending (callers
//! bound their own waits where needed).

pub mod contract;
pub mod protocol;
pub mod transport;

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use derive_more::Display;
use futures::{
    channel::{mpsc, oneshot},
    future::LocalBoxFuture,
    stream::{LocalBoxStream, StreamExt as _},
};
use futures_timer::Delay;
use tracerr::Traced;

#[doc(inline)]
pub use self::{
    contract::{ContractBus, ContractEvent, ContractTransport},
    protocol::{
        ClientMsg, EventKind, Method, ParticipantInfo, RoomId, ServerMsg,
        SessionId,
    },
    transport::{SignalingTransport, TransportError, TransportState},
};

/// Interval between send attempts while the channel is not open.
const SEND_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Errors of the [`SignalingClient`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum SignalingError {
    /// [`SignalingClient`] was dropped while a request was awaiting its
    /// response.
    #[display(fmt = "Signaling client has been dropped")]
    ClientGone,
}

/// Inner state of the [`SignalingClient`].
struct Inner {
    /// Waiters of in-flight requests, correlated per operation, FIFO.
    pending: HashMap<Method, VecDeque<oneshot::Sender<ServerMsg>>>,

    /// Pushed-notification subscribers, per topic.
    event_subs: HashMap<EventKind, Vec<mpsc::UnboundedSender<ServerMsg>>>,

    /// Incoming message stream, consumed once by [`SignalingClient::run`].
    rx: Option<LocalBoxStream<'static, ServerMsg>>,
}

/// Uniform signaling contract over a [`SignalingTransport`] backend.
pub struct SignalingClient {
    /// Underlying channel.
    transport: Rc<dyn SignalingTransport>,

    /// Mutable state of this client.
    inner: RefCell<Inner>,
}

impl SignalingClient {
    /// Creates a new [`SignalingClient`] over the provided transport.
    #[must_use]
    pub fn new(transport: Rc<dyn SignalingTransport>) -> Rc<Self> {
        let rx = transport.on_message();
        Rc::new(Self {
            transport,
            inner: RefCell::new(Inner {
                pending: HashMap::new(),
                event_subs: HashMap::new(),
                rx: Some(rx),
            }),
        })
    }

    /// Sends the provided request and resolves with the correlated response.
    ///
    /// If the channel is not open yet, the send is retried every second
    /// until it is; transport rejections are logged and retried the same
    /// way. Responses are matched to requests per operation in FIFO order.
    ///
    /// # Errors
    ///
    /// With [`SignalingError::ClientGone`] if this client is dropped before
    /// the response arrives.
    ///
    /// # Panics
    ///
    /// If the provided message is not a request/response operation.
    pub async fn request(
        &self,
        msg: ClientMsg,
    ) -> Result<ServerMsg, Traced<SignalingError>> {
        let method = msg
            .method()
            .unwrap_or_else(|| panic!("non-request message: {:?}", msg));

        let rx = loop {
            while !self.transport.state().is_open() {
                Delay::new(SEND_RETRY_INTERVAL).await;
            }

            let (tx, rx) = oneshot::channel();
            self.inner
                .borrow_mut()
                .pending
                .entry(method)
                .or_insert_with(VecDeque::new)
                .push_back(tx);

            match self.transport.send(&msg) {
                Ok(()) => break rx,
                Err(e) => {
                    log::warn!("Failed to send '{}' request: {}", method, e);
                    // Retract the waiter registered for this attempt.
                    if let Some(queue) =
                        self.inner.borrow_mut().pending.get_mut(&method)
                    {
                        queue.pop_back();
                    }
                    Delay::new(SEND_RETRY_INTERVAL).await;
                }
            }
        };

        rx.await
            .map_err(|_| tracerr::new!(SignalingError::ClientGone))
    }

    /// Sends the provided message without awaiting any response.
    ///
    /// Errors are logged and swallowed.
    pub fn send(&self, msg: &ClientMsg) {
        if let Err(e) = self.transport.send(msg) {
            log::warn!("Failed to send message: {}", e);
        }
    }

    /// Subscribes to pushed notifications of the provided [`EventKind`].
    ///
    /// Every registered subscriber receives every matching notification;
    /// dropping the returned stream unsubscribes it.
    pub fn subscribe(
        &self,
        kind: EventKind,
    ) -> LocalBoxStream<'static, ServerMsg> {
        let (tx, rx) = mpsc::unbounded();
        self.inner
            .borrow_mut()
            .event_subs
            .entry(kind)
            .or_insert_with(Vec::new)
            .push(tx);

        Box::pin(rx)
    }

    /// Returns the future driving message dispatch of this client.
    ///
    /// Must be polled (spawned) for any request or subscription to make
    /// progress. Resolves once the underlying channel's message stream
    /// ends.
    pub fn run(self: Rc<Self>) -> LocalBoxFuture<'static, ()> {
        let rx = self.inner.borrow_mut().rx.take();
        Box::pin(async move {
            let mut rx = match rx {
                Some(rx) => rx,
                None => {
                    log::error!("Signaling dispatch driver started twice");
                    return;
                }
            };
            while let Some(msg) = rx.next().await {
                self.route(msg);
            }
            log::debug!("Signaling channel message stream ended");
        })
    }

    /// Routes one incoming message to its request waiter or event
    /// subscribers.
    fn route(&self, msg: ServerMsg) {
        if let Some(method) = msg.method() {
            let waiter = self
                .inner
                .borrow_mut()
                .pending
                .get_mut(&method)
                .and_then(VecDeque::pop_front);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(msg);
                }
                None => {
                    log::debug!("Unexpected '{}' response dropped", method);
                }
            }
        } else if let Some(kind) = msg.event_kind() {
            if let Some(subs) =
                self.inner.borrow_mut().event_subs.get_mut(&kind)
            {
                subs.retain(|sub| sub.unbounded_send(msg.clone()).is_ok());
            }
        }
    }
}
