//! Negotiation over the shared peer connection.
//!
//! [`PeerConnection`] owns every offer/answer exchange against the single
//! underlying platform connection. The browser-side signaling state machine
//! rejects overlapping description exchanges, so all entry points here are
//! serialized: publishes and unpublishes await an idle negotiation phase,
//! pulls go through a FIFO queue with a single drain, and stray
//! renegotiation triggers are dropped while a cycle is in flight.

pub mod pull_queue;
pub mod registry;

use std::{rc::Rc, time::Duration};

use derive_more::Display;
use futures_timer::Delay;
use medea_reactive::ObservableCell;
use tracerr::Traced;

use crate::{
    media::{local, EncodingParameters, MediaKind},
    platform::{
        self, SdpKind, SessionDescription, SignalingState,
        TransceiverDirection,
    },
    rpc::{
        protocol::{PulledTracks, TrackInfo, TrackLocation},
        ClientMsg, RoomId, ServerMsg, SessionId, SignalingClient,
        SignalingError,
    },
    sdp,
};

#[doc(inline)]
pub use self::{
    pull_queue::{PullOutcome, PullQueue, PullRequest},
    registry::{TrackIdentity, TrackRegistry},
};

/// Maximum time to wait for the connection transport to become connected
/// before a pull is processed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between connection-state probes while waiting for the
/// transport.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Negotiation phase of the shared peer connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NegotiationState {
    /// No negotiation in flight.
    Idle,

    /// A local offer has been sent; awaiting the remote answer.
    OfferPending,

    /// A remote offer is being answered.
    AnswerPending,

    /// A follow-up renegotiation cycle is running.
    Renegotiating,
}

/// Errors occurring during negotiation.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum NegotiationError {
    /// Shared connection did not reach the connected state in time.
    #[display(fmt = "Peer connection was not connected in time")]
    ConnectTimeout,

    /// Underlying platform primitive failed.
    #[display(fmt = "Platform error: {}", _0)]
    Platform(platform::Error),

    /// Signaling backend responded with an unexpected message.
    #[display(fmt = "Unexpected response to '{}' request", _0)]
    UnexpectedResponse(&'static str),

    /// Signaling client failed the request.
    #[display(fmt = "Signaling error: {}", _0)]
    Signaling(SignalingError),

    /// Operation was abandoned before completion.
    #[display(fmt = "Negotiation was abandoned")]
    Abandoned,
}

impl From<platform::Error> for NegotiationError {
    fn from(err: platform::Error) -> Self {
        Self::Platform(err)
    }
}

impl From<SignalingError> for NegotiationError {
    fn from(err: SignalingError) -> Self {
        Self::Signaling(err)
    }
}

type Result<T> = std::result::Result<T, Traced<NegotiationError>>;

/// Releases the pull-queue drain flag when the drain stops, however it
/// stops.
struct DrainGuard<'a>(&'a PullQueue);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Restores the [`NegotiationState::Idle`] phase when a cycle ends,
/// successfully or not.
struct CycleGuard<'a>(&'a ObservableCell<NegotiationState>);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.set(NegotiationState::Idle);
    }
}

/// Negotiation sequencer of one session's shared peer connection.
pub struct PeerConnection {
    /// Underlying platform connection.
    peer: Rc<dyn platform::RtcPeerConnection>,

    /// Signaling channel of the session.
    signaling: Rc<SignalingClient>,

    /// Identity registry shared with the session controller.
    registry: Rc<TrackRegistry>,

    /// Queue serializing pull requests.
    pull_queue: PullQueue,

    /// Current negotiation phase; doubles as the renegotiation lock.
    state: ObservableCell<NegotiationState>,

    /// Room this connection belongs to.
    room_id: RoomId,

    /// Session this connection belongs to.
    session_id: SessionId,
}

impl PeerConnection {
    /// Creates a new [`PeerConnection`] for the provided session.
    #[must_use]
    pub fn new(
        peer: Rc<dyn platform::RtcPeerConnection>,
        signaling: Rc<SignalingClient>,
        registry: Rc<TrackRegistry>,
        room_id: RoomId,
        session_id: SessionId,
    ) -> Self {
        Self {
            peer,
            signaling,
            registry,
            pull_queue: PullQueue::new(),
            state: ObservableCell::new(NegotiationState::Idle),
            room_id,
            session_id,
        }
    }

    /// Returns the underlying platform connection.
    #[inline]
    #[must_use]
    pub fn platform_peer(&self) -> &Rc<dyn platform::RtcPeerConnection> {
        &self.peer
    }

    /// Returns the current [`NegotiationState`].
    #[must_use]
    pub fn negotiation_state(&self) -> NegotiationState {
        self.state.get()
    }

    /// Publishes the provided local tracks in a single negotiation round.
    ///
    /// Tracks already covered by a previous offer, or no longer live, are
    /// skipped; re-invoking with an already-published set is a no-op and
    /// contacts neither the connection nor the signaling channel. Tracks
    /// are marked published before the network round trip, so a publish
    /// re-invoked mid-flight cannot duplicate them.
    ///
    /// # Errors
    ///
    /// Errors if the platform rejects a description or the signaling
    /// channel fails the request.
    pub async fn publish(
        &self,
        tracks: &[Rc<local::Track>],
        encodings: Option<EncodingParameters>,
    ) -> Result<()> {
        let fresh: Vec<_> = tracks
            .iter()
            .filter(|track| {
                track.is_live() && !self.registry.is_published(&track.id())
            })
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let guard = self.begin_cycle(NegotiationState::OfferPending).await?;

        let mut attached = Vec::with_capacity(fresh.len());
        for track in &fresh {
            let transceiver = self.peer.add_transceiver(
                Rc::clone(track.platform_track()),
                TransceiverDirection::SEND,
            );
            if track.kind() == MediaKind::Video {
                if let Some(params) = encodings {
                    if let Err(e) = transceiver.set_send_encodings(params) {
                        log::warn!("Failed to apply encodings: {}", e);
                    }
                }
            }
            self.registry.mark_published(track.id());
            attached.push((Rc::clone(track), transceiver));
        }

        let offer = self.create_and_set_offer().await?;

        let track_infos = attached
            .iter()
            .map(|(track, transceiver)| TrackInfo {
                location: TrackLocation::Local,
                mid: transceiver.mid().unwrap_or_default(),
                track_name: track.id(),
            })
            .collect();

        let response = self
            .signaling
            .request(ClientMsg::PublishTracks {
                room_id: self.room_id.clone(),
                session_id: self.session_id.clone(),
                offer,
                tracks: track_infos,
            })
            .await
            .map_err(tracerr::map_from_and_wrap!(=> NegotiationError))?;

        let answer = match response {
            ServerMsg::PublishTracks(published) => {
                published.session_description
            }
            _ => {
                return Err(tracerr::new!(
                    NegotiationError::UnexpectedResponse("publish-tracks")
                ));
            }
        };
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| tracerr::new!(NegotiationError::Platform(e)))?;

        drop(guard);
        Ok(())
    }

    /// Requests forwarding of the provided remote track.
    ///
    /// Requests are processed strictly one at a time in submission order:
    /// the answer to a pull may carry a fresh remote offer demanding an
    /// immediate answer cycle against the same shared connection. A pair
    /// already pulled resolves immediately; a pair already queued or in
    /// flight attaches to the pending request (both callers resolve once
    /// it completes).
    ///
    /// # Errors
    ///
    /// Errors are contained to the individual pull: the queue always
    /// advances.
    pub async fn pull_track(
        &self,
        session_id: SessionId,
        track_name: String,
    ) -> Result<()> {
        if self.registry.has_pulled(&session_id, &track_name) {
            return Ok(());
        }

        let completion = self.pull_queue.register(session_id, track_name);
        if self.pull_queue.try_lead() {
            self.drain_pulls().await;
        }

        match completion.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(tracerr::new!(e)),
            Err(_) => Err(tracerr::new!(NegotiationError::Abandoned)),
        }
    }

    /// Processes queued pulls until the queue is empty.
    ///
    /// Requests enqueued while a drain is running are picked up by the same
    /// drain; each completed request wakes all its waiters and is marked
    /// pulled regardless of its outcome, so one failed pull never wedges
    /// the pipeline.
    async fn drain_pulls(&self) {
        let _guard = DrainGuard(&self.pull_queue);
        while let Some(request) = self.pull_queue.pop() {
            let outcome = self.process_pull(&request).await;
            if let Err(e) = &outcome {
                log::warn!(
                    "Pull of '{}' from {} failed: {}",
                    request.track_name,
                    request.session_id,
                    e,
                );
            }
            self.registry.mark_pulled(
                request.session_id.clone(),
                request.track_name.clone(),
            );
            self.pull_queue.complete(&request, &outcome);
        }
    }

    /// Performs the signaling round trip of one pull request.
    async fn process_pull(&self, request: &PullRequest) -> PullOutcome {
        self.wait_connected().await?;

        let response = self
            .signaling
            .request(ClientMsg::PullTracks {
                room_id: self.room_id.clone(),
                session_id: self.session_id.clone(),
                remote_session_id: request.session_id.clone(),
                track_name: request.track_name.clone(),
            })
            .await
            .map_err(|e| NegotiationError::from(e.into_inner()))?;

        let pulled = match response {
            ServerMsg::PullTracks(pulled) => pulled,
            _ => {
                return Err(NegotiationError::UnexpectedResponse(
                    "pull-tracks",
                ));
            }
        };

        if pulled.requires_immediate_renegotiation {
            self.answer_pull_offer(request, pulled).await?;
        }

        Ok(())
    }

    /// Applies the remote offer carried by a pull response and answers it.
    ///
    /// Identities of every media line of the offer are registered before
    /// the remote description is applied, so a `track` event firing during
    /// (or right after) the application always resolves.
    async fn answer_pull_offer(
        &self,
        request: &PullRequest,
        pulled: PulledTracks,
    ) -> PullOutcome {
        let offer = pulled.session_description.ok_or(
            NegotiationError::UnexpectedResponse("pull-tracks"),
        )?;

        for mid in sdp::media_line_mids(&offer.sdp) {
            self.registry.record_mapping(
                mid,
                request.session_id.clone(),
                request.track_name.clone(),
            );
        }

        let _guard = self
            .begin_cycle(NegotiationState::AnswerPending)
            .await
            .map_err(Traced::into_inner)?;

        self.peer
            .set_remote_description(offer)
            .await
            .map_err(NegotiationError::Platform)?;

        if self.peer.signaling_state() == SignalingState::HaveRemoteOffer {
            let answer = self.create_and_set_answer().await?;
            self.send_renegotiation(answer).await?;
        } else {
            // A concurrently completed cycle has already moved the
            // connection on; the SFU answer is in effect without our help.
            log::warn!(
                "Skipping local answer for pull of '{}': signaling state \
                 is not have-remote-offer",
                request.track_name,
            );
        }

        Ok(())
    }

    /// Runs a follow-up renegotiation cycle, triggered by a local change
    /// not tied to a pull.
    ///
    /// Returns `false` when another cycle is in flight: the trigger is
    /// dropped, not queued, since renegotiation converges on the final
    /// state rather than on individual triggers.
    ///
    /// # Errors
    ///
    /// Errors if the platform rejects a description or the signaling
    /// channel fails the request.
    pub async fn renegotiate(&self) -> Result<bool> {
        if self.state.get() != NegotiationState::Idle {
            log::debug!("Renegotiation already in flight, trigger dropped");
            return Ok(false);
        }

        self.state.set(NegotiationState::Renegotiating);
        let _guard = CycleGuard(&self.state);

        let answer = self
            .create_and_set_answer()
            .await
            .map_err(|e| tracerr::new!(e))?;
        self.send_renegotiation(answer)
            .await
            .map_err(|e| tracerr::new!(e))?;

        Ok(true)
    }

    /// Withdraws published tracks matching the provided kind filter.
    ///
    /// Tracks are processed strictly sequentially: every removal runs its
    /// own offer/answer cycle against the shared connection.
    ///
    /// # Errors
    ///
    /// Errors on the first failed removal; already processed tracks stay
    /// withdrawn.
    pub async fn unpublish(
        &self,
        kind_filter: Option<MediaKind>,
        force: bool,
    ) -> Result<()> {
        let senders: Vec<_> = self
            .peer
            .get_transceivers()
            .into_iter()
            .filter(|transceiver| {
                transceiver
                    .direction()
                    .contains(TransceiverDirection::SEND)
            })
            .filter_map(|transceiver| {
                transceiver
                    .send_track()
                    .map(|track| (transceiver, track))
            })
            .filter(|(_, track)| {
                kind_filter.map_or(true, |kind| track.kind() == kind)
                    && self.registry.is_published(&track.id())
            })
            .collect();

        for (transceiver, track) in senders {
            let mid = match transceiver.mid() {
                Some(mid) => mid,
                None => {
                    log::warn!("No mid for track {}, skipping", track.id());
                    continue;
                }
            };

            let guard =
                self.begin_cycle(NegotiationState::OfferPending).await?;

            track.stop();
            let offer = self.create_and_set_offer().await?;

            let response = self
                .signaling
                .request(ClientMsg::UnpublishTrack {
                    room_id: self.room_id.clone(),
                    session_id: self.session_id.clone(),
                    track_id: track.id(),
                    mid,
                    force,
                    session_description: offer,
                })
                .await
                .map_err(tracerr::map_from_and_wrap!(=> NegotiationError))?;

            match response {
                ServerMsg::UnpublishTrack(unpublished) => {
                    if let Some(answer) = unpublished.session_description {
                        self.peer
                            .set_remote_description(answer)
                            .await
                            .map_err(|e| {
                                tracerr::new!(NegotiationError::Platform(e))
                            })?;
                    }
                }
                _ => {
                    return Err(tracerr::new!(
                        NegotiationError::UnexpectedResponse(
                            "unpublish-track",
                        )
                    ));
                }
            }

            transceiver.stop();
            self.registry.unmark_published(&track.id());
            drop(guard);
        }

        Ok(())
    }

    /// Reports a changed forwarding status of a published track and runs
    /// the renegotiation cycle when the SFU demands one.
    ///
    /// # Errors
    ///
    /// Errors if the signaling channel fails the request or the demanded
    /// renegotiation fails.
    pub async fn update_track_status(
        &self,
        track_id: String,
        kind: MediaKind,
        enabled: bool,
        force: bool,
    ) -> Result<()> {
        let response = self
            .signaling
            .request(ClientMsg::UpdateTrackStatus {
                room_id: self.room_id.clone(),
                session_id: self.session_id.clone(),
                track_id,
                kind,
                enabled,
                force,
            })
            .await
            .map_err(tracerr::map_from_and_wrap!(=> NegotiationError))?;

        let ack = match response {
            ServerMsg::UpdateTrackStatus(ack) => ack,
            _ => {
                return Err(tracerr::new!(
                    NegotiationError::UnexpectedResponse(
                        "update-track-status",
                    )
                ));
            }
        };

        if ack.requires_immediate_renegotiation {
            let _ = self.renegotiate().await?;
        }

        Ok(())
    }

    /// Fails all pending pulls and closes the underlying connection.
    pub fn close(&self) {
        self.pull_queue.abort_all(&NegotiationError::Abandoned);
        self.peer.close();
    }

    /// Creates a local offer and applies it as the local description.
    async fn create_and_set_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer
            .create_offer()
            .await
            .map_err(|e| tracerr::new!(NegotiationError::Platform(e)))?;
        self.peer
            .set_local_description(offer.clone())
            .await
            .map_err(|e| tracerr::new!(NegotiationError::Platform(e)))?;

        Ok(offer)
    }

    /// Creates a local answer and applies it as the local description.
    async fn create_and_set_answer(
        &self,
    ) -> std::result::Result<SessionDescription, NegotiationError> {
        let answer = self
            .peer
            .create_answer()
            .await
            .map_err(NegotiationError::Platform)?;
        self.peer
            .set_local_description(answer.clone())
            .await
            .map_err(NegotiationError::Platform)?;

        Ok(answer)
    }

    /// Forwards the provided local description through the signaling
    /// channel's renegotiation operation and applies the follow-up
    /// description, when the backend returns one.
    async fn send_renegotiation(
        &self,
        desc: SessionDescription,
    ) -> std::result::Result<(), NegotiationError> {
        let response = self
            .signaling
            .request(ClientMsg::RenegotiateSession {
                room_id: self.room_id.clone(),
                session_id: self.session_id.clone(),
                sdp: desc.sdp,
                kind: desc.kind,
            })
            .await
            .map_err(|e| NegotiationError::from(e.into_inner()))?;

        match response {
            ServerMsg::RenegotiateSession(ack) => {
                if let Some(answer) = ack.session_description {
                    if answer.kind == SdpKind::Answer {
                        self.peer
                            .set_remote_description(answer)
                            .await
                            .map_err(NegotiationError::Platform)?;
                    }
                }
                Ok(())
            }
            _ => Err(NegotiationError::UnexpectedResponse(
                "renegotiate-session",
            )),
        }
    }

    /// Awaits the [`NegotiationState::Idle`] phase and claims the next
    /// cycle with the provided phase.
    ///
    /// The returned guard restores [`NegotiationState::Idle`] on drop, so
    /// no failure path can leave the lock held.
    async fn begin_cycle(
        &self,
        phase: NegotiationState,
    ) -> Result<CycleGuard<'_>> {
        loop {
            if self.state.get() == NegotiationState::Idle {
                self.state.set(phase);
                return Ok(CycleGuard(&self.state));
            }
            self.state
                .when_eq(NegotiationState::Idle)
                .await
                .map_err(|_| tracerr::new!(NegotiationError::Abandoned))?;
        }
    }

    /// Awaits the connected state of the underlying transport, probing it
    /// on a fixed interval for at most [`CONNECT_TIMEOUT`].
    ///
    /// Pulls are frequently requested right after a join, racing the
    /// initial transport establishment.
    async fn wait_connected(
        &self,
    ) -> std::result::Result<(), NegotiationError> {
        let mut waited = Duration::from_secs(0);
        loop {
            match self.peer.connection_state() {
                platform::PeerConnectionState::Connected => return Ok(()),
                platform::PeerConnectionState::Closed => {
                    return Err(NegotiationError::Abandoned);
                }
                _ => {
                    if waited >= CONNECT_TIMEOUT {
                        return Err(NegotiationError::ConnectTimeout);
                    }
                    Delay::new(CONNECT_POLL_INTERVAL).await;
                    waited += CONNECT_POLL_INTERVAL;
                }
            }
        }
    }
}
