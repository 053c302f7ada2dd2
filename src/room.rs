//! Room of media calls: join/leave lifecycle and remote-track discovery.

use std::{cell::RefCell, collections::HashMap, rc::Rc, time::Duration};

use derive_more::Display;
use futures::{
    channel::mpsc,
    future::LocalBoxFuture,
    stream::{self, FuturesUnordered, Fuse, LocalBoxStream},
    FutureExt as _, StreamExt as _,
};
use medea_reactive::ObservableCell;
use serde_json::Value;
use tracerr::Traced;

use crate::{
    client::Credentials,
    media::{
        local, remote, EncodingParameters, MediaKind, TrackStatus,
    },
    peer::{self, NegotiationError, TrackRegistry},
    platform::{
        self, IceServer, MediaStreamConstraints, PeerConnectionFactory,
        PeerConnectionState, TrackEvent, TransceiverDirection,
    },
    rpc::{
        protocol::{ParticipantInfo, TrackStateInfo},
        ClientMsg, EventKind, RoomId, ServerMsg, SessionId, SignalingClient,
        SignalingError,
    },
    utils,
};

/// Maximum time to wait for the ICE-server list before falling back to the
/// configured defaults.
const ICE_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum time to wait for the `leave-room` acknowledgement; cleanup
/// proceeds regardless.
const LEAVE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Pushed-notification topics the room driver listens to.
const ROOM_EVENTS: [EventKind; 7] = [
    EventKind::ParticipantJoined,
    EventKind::ParticipantLeft,
    EventKind::TrackPublished,
    EventKind::TrackUnpublished,
    EventKind::TrackStatusChanged,
    EventKind::DataMessage,
    EventKind::RoomMetadataUpdated,
];

/// Configuration of a [`Room`].
#[derive(Clone, Debug)]
pub struct RoomOptions {
    /// ICE servers to use when the backend does not provide any.
    pub default_ice_servers: Vec<IceServer>,

    /// Interval of the participant-list discovery polling.
    pub poll_interval: Duration,

    /// Constraints for the local capture acquired on join.
    pub constraints: MediaStreamConstraints,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            default_ice_servers: Vec::new(),
            poll_interval: Duration::from_secs(10),
            constraints: MediaStreamConstraints::default(),
        }
    }
}

/// Events of a [`Room`] delivered to its subscribers.
#[derive(Clone)]
pub enum RoomEvent {
    /// A remote track arrived and its publisher identity is resolved.
    RemoteTrackAdded(remote::Track),

    /// A remote track was withdrawn by its publisher.
    RemoteTrackUnpublished {
        /// Session which withdrew the track.
        session_id: SessionId,

        /// Name of the withdrawn track.
        track_name: String,
    },

    /// A participant joined the room.
    ParticipantJoined(ParticipantInfo),

    /// A participant left the room.
    ParticipantLeft(SessionId),

    /// Forwarding status of a remote track changed.
    TrackStatusChanged {
        /// Session owning the track.
        session_id: SessionId,

        /// Name of the track.
        track_name: String,

        /// New status of the track.
        status: TrackStatus,
    },

    /// Application data message from another participant.
    DataMessage {
        /// Sending session.
        from: SessionId,

        /// Arbitrary application payload.
        message: Value,
    },

    /// Metadata of the room was updated.
    RoomMetadataUpdated(Value),

    /// Transport of the shared peer connection was lost; the room is being
    /// left.
    ConnectionLost,
}

/// Errors of a [`Room`].
#[derive(Clone, Debug, Display)]
pub enum RoomError {
    /// [`Room::join`] was called while a session is active.
    #[display(fmt = "Already joined a room")]
    AlreadyJoined,

    /// Operation requires an active session.
    #[display(fmt = "Not joined to any room")]
    NotJoined,

    /// Local capture tracks could not be acquired.
    #[display(fmt = "Failed to acquire local media: {}", _0)]
    MediaAcquisition(platform::Error),

    /// Platform failed to create the shared peer connection.
    #[display(fmt = "Failed to create peer connection: {}", _0)]
    PeerCreation(platform::Error),

    /// Negotiation against the shared connection failed.
    #[display(fmt = "{}", _0)]
    Negotiation(NegotiationError),

    /// Signaling request failed.
    #[display(fmt = "{}", _0)]
    Signaling(SignalingError),

    /// Signaling backend responded with an unexpected message.
    #[display(fmt = "Unexpected response to '{}' request", _0)]
    UnexpectedResponse(&'static str),
}

type Result<T> = std::result::Result<T, Traced<RoomError>>;

/// Active membership of a [`Room`].
///
/// `room_id` and `session_id` live and die together: a session cannot exist
/// without a room.
struct Session {
    /// Room the session belongs to.
    room_id: RoomId,

    /// Session assigned by the signaling backend.
    session_id: SessionId,

    /// Negotiation sequencer of the session's shared connection.
    peer: Rc<peer::PeerConnection>,
}

/// Actual data and logic of a [`Room`].
struct InnerRoom {
    /// Signaling channel of this room.
    signaling: Rc<SignalingClient>,

    /// Factory of platform peer connections.
    peer_factory: PeerConnectionFactory,

    /// Platform capture devices.
    media_devices: Rc<dyn platform::MediaDevices>,

    /// Configuration of this room.
    options: RoomOptions,

    /// Credentials shared with the owning client.
    credentials: Rc<Credentials>,

    /// Identity registry of the current session's connection.
    ///
    /// Mutated by the negotiation sequencer, read by the `track`-event
    /// handler; wiped on leave.
    registry: Rc<TrackRegistry>,

    /// Active membership, if any.
    session: RefCell<Option<Session>>,

    /// Bumped on every join/leave so the driver rebuilds per-session
    /// streams.
    session_epoch: ObservableCell<u64>,

    /// Local capture tracks.
    local_tracks: RefCell<Vec<Rc<local::Track>>>,

    /// Metadata announced on join.
    metadata: RefCell<Value>,

    /// Pending encoding constraints applied to published video.
    quality: RefCell<Option<EncodingParameters>>,

    /// [`RoomEvent`] subscribers.
    subs: RefCell<Vec<mpsc::UnboundedSender<RoomEvent>>>,

    /// `track` events whose media line has no registered identity yet.
    ///
    /// Re-resolved every time a new mapping is recorded; cleared on leave.
    pending_tracks: RefCell<Vec<TrackEvent>>,

    /// Last known per-track forwarding statuses of the local session.
    track_states: RefCell<HashMap<String, TrackStatus>>,

    /// Set once this room is closed for good.
    closed: ObservableCell<bool>,
}

/// Room of an SFU-backed multi-party call.
///
/// Orchestrates the join/leave lifecycle, publishes local tracks, discovers
/// and pulls remote ones (both by server push and by periodic polling), and
/// fans room events out to subscribers. [`Room::run`] must be spawned for
/// discovery and event delivery to make progress.
pub struct Room(Rc<InnerRoom>);

impl Room {
    /// Creates a new [`Room`].
    #[must_use]
    pub fn new(
        signaling: Rc<SignalingClient>,
        peer_factory: PeerConnectionFactory,
        media_devices: Rc<dyn platform::MediaDevices>,
        credentials: Rc<Credentials>,
        options: RoomOptions,
    ) -> Self {
        Self(Rc::new(InnerRoom {
            signaling,
            peer_factory,
            media_devices,
            options,
            credentials,
            registry: Rc::new(TrackRegistry::new()),
            session: RefCell::new(None),
            session_epoch: ObservableCell::new(0),
            local_tracks: RefCell::new(Vec::new()),
            metadata: RefCell::new(Value::Null),
            quality: RefCell::new(None),
            subs: RefCell::new(Vec::new()),
            pending_tracks: RefCell::new(Vec::new()),
            track_states: RefCell::new(HashMap::new()),
            closed: ObservableCell::new(false),
        }))
    }

    /// Subscribes to [`RoomEvent`]s of this room.
    ///
    /// Dropping the returned stream unsubscribes it.
    pub fn subscribe(&self) -> LocalBoxStream<'static, RoomEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.0.subs.borrow_mut().push(tx);

        Box::pin(rx)
    }

    /// Returns the future driving discovery and event delivery of this
    /// room.
    pub fn run(&self) -> LocalBoxFuture<'static, ()> {
        let inner = Rc::clone(&self.0);
        Box::pin(InnerRoom::run(inner))
    }

    /// Joins the provided room, announcing the provided metadata.
    ///
    /// Publishes local capture tracks and pulls every track already
    /// published by other participants; resolves only once all of that
    /// completes. Individual pull failures are logged and contained; local
    /// media acquisition failure fails the join.
    ///
    /// # Errors
    ///
    /// With [`RoomError::AlreadyJoined`] if a session is active, with
    /// [`RoomError::MediaAcquisition`]/[`RoomError::PeerCreation`] on
    /// resource-acquisition failures, or with signaling errors of the join
    /// request itself.
    pub async fn join(&self, room_id: RoomId, metadata: Value) -> Result<()> {
        self.0.join(room_id, metadata).await
    }

    /// Leaves the current room.
    ///
    /// Unpublishes all tracks, notifies the backend, closes the shared
    /// connection and wipes all per-session state. Partial failures are
    /// logged; cleanup proceeds regardless. A no-op without an active
    /// session.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for call-site uniformity.
    pub async fn leave(&self) -> Result<()> {
        self.0.leave().await;
        Ok(())
    }

    /// Publishes all not-yet-published live local tracks in one
    /// negotiation round.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session, or with
    /// the failure of the publish cycle.
    pub async fn publish_tracks(&self) -> Result<()> {
        let peer = self.0.require_peer()?;
        let tracks = self.0.local_tracks.borrow().clone();
        let quality = *self.0.quality.borrow();
        peer.publish(&tracks, quality).await.map_err(|e| {
            tracerr::new!(RoomError::Negotiation(e.into_inner()))
        })
    }

    /// Requests forwarding of the provided remote track.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session, or with
    /// the failure of this individual pull.
    pub async fn pull_track(
        &self,
        session_id: SessionId,
        track_name: String,
    ) -> Result<()> {
        let peer = self.0.require_peer()?;
        peer.pull_track(session_id, track_name).await.map_err(|e| {
            tracerr::new!(RoomError::Negotiation(e.into_inner()))
        })
    }

    /// Withdraws published tracks matching the provided kind filter.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session, or with
    /// the first failed removal.
    pub async fn unpublish_all(
        &self,
        kind_filter: Option<MediaKind>,
        force: bool,
    ) -> Result<()> {
        let peer = self.0.require_peer()?;
        peer.unpublish(kind_filter, force).await.map_err(|e| {
            tracerr::new!(RoomError::Negotiation(e.into_inner()))
        })
    }

    /// Enables or disables local tracks of the corresponding kinds and
    /// reports the change to the backend.
    ///
    /// Per-track reporting failures are logged and contained.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session.
    pub async fn toggle_media(
        &self,
        audio: Option<bool>,
        video: Option<bool>,
    ) -> Result<()> {
        self.0.toggle_media(audio, video).await
    }

    /// Stores encoding constraints for future publishes and applies them
    /// to currently sending video transceivers.
    pub fn set_media_quality(&self, params: EncodingParameters) {
        self.0.set_media_quality(params);
    }

    /// Broadcasts an application data message to the room.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session.
    pub fn send_data(&self, message: Value) -> Result<()> {
        let session = self.0.session.borrow();
        let session = session
            .as_ref()
            .ok_or_else(|| tracerr::new!(RoomError::NotJoined))?;
        self.0.signaling.send(&ClientMsg::DataMessage {
            from: session.session_id.clone(),
            message,
        });

        Ok(())
    }

    /// Lists participants of the current room.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session, or with
    /// signaling errors.
    pub async fn list_participants(&self) -> Result<Vec<ParticipantInfo>> {
        self.0.list_participants().await
    }

    /// Fetches per-track forwarding states of the local session.
    ///
    /// # Errors
    ///
    /// With [`RoomError::NotJoined`] without an active session, or with
    /// signaling errors.
    pub async fn session_state(&self) -> Result<Vec<TrackStateInfo>> {
        self.0.session_state().await
    }

    /// Returns the last fetched forwarding status of the provided track.
    ///
    /// Refreshes the session state beforehand.
    ///
    /// # Errors
    ///
    /// Same as [`Room::session_state`].
    pub async fn track_status(
        &self,
        track_name: &str,
    ) -> Result<Option<TrackStatus>> {
        let _ = self.session_state().await?;
        Ok(self.0.track_states.borrow().get(track_name).copied())
    }

    /// Adds a locally captured track to this room's local set.
    ///
    /// The track is published on the next [`Room::publish_tracks`] call.
    pub fn add_local_track(
        &self,
        track: Rc<dyn platform::MediaStreamTrack>,
    ) {
        self.0
            .local_tracks
            .borrow_mut()
            .push(Rc::new(local::Track::new(track)));
    }

    /// Returns the local capture tracks of this room.
    #[must_use]
    pub fn local_tracks(&self) -> Vec<Rc<local::Track>> {
        self.0.local_tracks.borrow().clone()
    }

    /// Returns the ID of the current session, if joined.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.0
            .session
            .borrow()
            .as_ref()
            .map(|s| s.session_id.clone())
    }

    /// Returns the ID of the current room, if joined.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        self.0.session.borrow().as_ref().map(|s| s.room_id.clone())
    }

    /// Returns the metadata announced on the last join.
    #[must_use]
    pub fn user_metadata(&self) -> Value {
        self.0.metadata.borrow().clone()
    }

    /// Closes this room for good, stopping its driver.
    pub fn close(&self) {
        self.0.closed.set(true);
    }
}

impl InnerRoom {
    /// Returns the negotiation sequencer of the active session.
    fn require_peer(&self) -> Result<Rc<peer::PeerConnection>> {
        self.session
            .borrow()
            .as_ref()
            .map(|s| Rc::clone(&s.peer))
            .ok_or_else(|| tracerr::new!(RoomError::NotJoined))
    }

    /// Delivers the provided event to every live subscriber.
    fn emit(&self, event: RoomEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    /// See [`Room::join`].
    async fn join(&self, room_id: RoomId, metadata: Value) -> Result<()> {
        if self.session.borrow().is_some() {
            return Err(tracerr::new!(RoomError::AlreadyJoined));
        }

        let user_id = self.credentials.user_id().unwrap_or_default();
        let response = self
            .signaling
            .request(ClientMsg::JoinRoom {
                room_id: room_id.clone(),
                user_id,
                metadata: metadata.clone(),
            })
            .await
            .map_err(|e| {
                tracerr::new!(RoomError::Signaling(e.into_inner()))
            })?;
        let joined = match response {
            ServerMsg::JoinRoom(joined) => joined,
            _ => {
                return Err(tracerr::new!(RoomError::UnexpectedResponse(
                    "join-room",
                )));
            }
        };
        *self.metadata.borrow_mut() = metadata;

        let ice_servers = self.fetch_ice_servers().await;
        let platform_peer = (self.peer_factory)(ice_servers)
            .map_err(|e| tracerr::new!(RoomError::PeerCreation(e)))?;
        let peer = Rc::new(peer::PeerConnection::new(
            platform_peer,
            Rc::clone(&self.signaling),
            Rc::clone(&self.registry),
            room_id.clone(),
            joined.session_id.clone(),
        ));
        *self.session.borrow_mut() = Some(Session {
            room_id,
            session_id: joined.session_id,
            peer: Rc::clone(&peer),
        });
        self.bump_epoch();

        if self.local_tracks.borrow().is_empty() {
            match self
                .media_devices
                .get_user_media(self.options.constraints)
                .await
            {
                Ok(tracks) => {
                    let mut local_tracks = self.local_tracks.borrow_mut();
                    local_tracks.extend(
                        tracks
                            .into_iter()
                            .map(|t| Rc::new(local::Track::new(t))),
                    );
                }
                Err(e) => {
                    // Capture failure is the one hard join failure; undo
                    // the half-established session.
                    self.session.borrow_mut().take();
                    peer.close();
                    self.registry.clear();
                    self.bump_epoch();
                    return Err(tracerr::new!(
                        RoomError::MediaAcquisition(e)
                    ));
                }
            }
        }

        let tracks = self.local_tracks.borrow().clone();
        let quality = *self.quality.borrow();
        if let Err(e) = peer.publish(&tracks, quality).await {
            log::warn!("Publishing local tracks on join failed: {}", e);
        }

        for participant in joined.other_sessions {
            for track_name in participant.published_tracks {
                if let Err(e) = peer
                    .pull_track(
                        participant.session_id.clone(),
                        track_name.clone(),
                    )
                    .await
                {
                    log::warn!(
                        "Initial pull of '{}' from {} failed: {}",
                        track_name,
                        participant.session_id,
                        e,
                    );
                }
            }
        }

        Ok(())
    }

    /// See [`Room::leave`].
    async fn leave(&self) {
        let session = match self.session.borrow_mut().take() {
            Some(session) => session,
            None => return,
        };

        if let Err(e) = session.peer.unpublish(None, false).await {
            log::warn!("Unpublishing on leave failed: {}", e);
        }

        let notify = self.signaling.request(ClientMsg::LeaveRoom {
            room_id: session.room_id.clone(),
            session_id: session.session_id.clone(),
        });
        if utils::timeout(LEAVE_NOTIFY_TIMEOUT, notify).await.is_none() {
            log::warn!("leave-room notification timed out");
        }

        session.peer.close();
        self.registry.clear();
        self.local_tracks.borrow_mut().retain(|t| t.is_live());
        self.pending_tracks.borrow_mut().clear();
        self.track_states.borrow_mut().clear();
        self.bump_epoch();
    }

    /// See [`Room::toggle_media`].
    async fn toggle_media(
        &self,
        audio: Option<bool>,
        video: Option<bool>,
    ) -> Result<()> {
        let peer = self.require_peer()?;
        let tracks = self.local_tracks.borrow().clone();
        for track in tracks {
            let desired = match track.kind() {
                MediaKind::Audio => audio,
                MediaKind::Video => video,
            };
            let enabled = match desired {
                Some(enabled) => enabled,
                None => continue,
            };

            track.set_enabled(enabled);
            if self.registry.is_published(&track.id()) {
                if let Err(e) = peer
                    .update_track_status(
                        track.id(),
                        track.kind(),
                        enabled,
                        false,
                    )
                    .await
                {
                    log::warn!(
                        "Status update of track {} failed: {}",
                        track.id(),
                        e,
                    );
                } else {
                    let status = if enabled {
                        TrackStatus::Enabled
                    } else {
                        TrackStatus::Disabled
                    };
                    let _ = self
                        .track_states
                        .borrow_mut()
                        .insert(track.id(), status);
                }
            }
        }

        Ok(())
    }

    /// See [`Room::set_media_quality`].
    fn set_media_quality(&self, params: EncodingParameters) {
        *self.quality.borrow_mut() = Some(params);

        let peer = match &*self.session.borrow() {
            Some(session) => Rc::clone(session.peer.platform_peer()),
            None => return,
        };
        for transceiver in peer.get_transceivers() {
            let sending = transceiver
                .direction()
                .contains(TransceiverDirection::SEND)
                && transceiver.send_track().map_or(false, |t| {
                    t.kind() == MediaKind::Video
                });
            if sending {
                if let Err(e) = transceiver.set_send_encodings(params) {
                    log::warn!("Failed to apply encodings: {}", e);
                }
            }
        }
    }

    /// See [`Room::list_participants`].
    async fn list_participants(&self) -> Result<Vec<ParticipantInfo>> {
        let (room_id, _) = self.require_session()?;
        let response = self
            .signaling
            .request(ClientMsg::GetParticipants { room_id })
            .await
            .map_err(|e| {
                tracerr::new!(RoomError::Signaling(e.into_inner()))
            })?;

        match response {
            ServerMsg::GetParticipants(list) => Ok(list.participants),
            _ => Err(tracerr::new!(RoomError::UnexpectedResponse(
                "get-participants",
            ))),
        }
    }

    /// See [`Room::session_state`].
    async fn session_state(&self) -> Result<Vec<TrackStateInfo>> {
        let (room_id, session_id) = self.require_session()?;
        let response = self
            .signaling
            .request(ClientMsg::GetSessionState {
                room_id,
                session_id,
            })
            .await
            .map_err(|e| {
                tracerr::new!(RoomError::Signaling(e.into_inner()))
            })?;

        match response {
            ServerMsg::GetSessionState(state) => {
                let mut cached = self.track_states.borrow_mut();
                for track in &state.tracks {
                    let _ = cached
                        .insert(track.track_name.clone(), track.status);
                }
                Ok(state.tracks)
            }
            _ => Err(tracerr::new!(RoomError::UnexpectedResponse(
                "get-session-state",
            ))),
        }
    }

    /// Returns IDs of the active session.
    fn require_session(&self) -> Result<(RoomId, SessionId)> {
        self.session
            .borrow()
            .as_ref()
            .map(|s| (s.room_id.clone(), s.session_id.clone()))
            .ok_or_else(|| tracerr::new!(RoomError::NotJoined))
    }

    /// Bumps the session epoch, making the driver rebuild per-session
    /// streams.
    fn bump_epoch(&self) {
        let next = self.session_epoch.get() + 1;
        self.session_epoch.set(next);
    }

    /// Fetches ICE servers from the backend, falling back to the
    /// configured defaults after a bounded wait.
    async fn fetch_ice_servers(&self) -> Vec<IceServer> {
        let request =
            self.signaling.request(ClientMsg::GetIceServers);
        match utils::timeout(ICE_FETCH_TIMEOUT, request).await {
            Some(Ok(ServerMsg::GetIceServers(list)))
                if !list.ice_servers.is_empty() =>
            {
                list.ice_servers
            }
            _ => {
                log::debug!("Falling back to default ICE servers");
                self.options.default_ice_servers.clone()
            }
        }
    }

    /// Event/discovery loop of this room.
    ///
    /// Selects over signaling notifications, per-session peer streams,
    /// mapping additions, poll ticks and in-flight operations until the
    /// room is closed.
    async fn run(this: Rc<Self>) {
        let mut signals = stream::select_all(
            ROOM_EVENTS
                .iter()
                .map(|kind| this.signaling.subscribe(*kind)),
        )
        .fuse();
        let mut poll = utils::intervals(this.options.poll_interval).fuse();
        let mut mappings = this.registry.on_mapping_added().fuse();
        let mut epochs = this.session_epoch.subscribe().fuse();
        let mut closed = this.closed.when_eq(true).fuse();
        let (mut tracks, mut conn_states) = this.session_streams();
        let mut ops: FuturesUnordered<LocalBoxFuture<'static, ()>> =
            FuturesUnordered::new();

        loop {
            futures::select! {
                _ = closed => break,
                _ = epochs.next() => {
                    let (t, c) = this.session_streams();
                    tracks = t;
                    conn_states = c;
                }
                msg = signals.next() => {
                    if let Some(msg) = msg {
                        this.handle_signal(msg, &mut ops);
                    }
                }
                event = tracks.next() => {
                    if let Some(event) = event {
                        this.handle_track_event(event);
                    }
                }
                state = conn_states.next() => {
                    if let Some(state) = state {
                        this.handle_connection_state(state, &mut ops);
                    }
                }
                _ = mappings.next() => this.flush_pending_tracks(),
                _ = poll.next() => {
                    let inner = Rc::clone(&this);
                    ops.push(Box::pin(async move {
                        inner.discover_once().await;
                    }));
                }
                _ = ops.select_next_some() => {}
            }
        }
    }

    /// Returns `track` and connection-state streams of the active
    /// session's connection, or pending streams without one.
    fn session_streams(
        &self,
    ) -> (
        Fuse<LocalBoxStream<'static, TrackEvent>>,
        Fuse<LocalBoxStream<'static, PeerConnectionState>>,
    ) {
        match &*self.session.borrow() {
            Some(session) => {
                let peer = session.peer.platform_peer();
                (
                    peer.on_track().fuse(),
                    peer.on_connection_state_change().fuse(),
                )
            }
            None => (
                stream::pending().boxed_local().fuse(),
                stream::pending().boxed_local().fuse(),
            ),
        }
    }

    /// Routes one pushed signaling notification.
    fn handle_signal(
        self: &Rc<Self>,
        msg: ServerMsg,
        ops: &mut FuturesUnordered<LocalBoxFuture<'static, ()>>,
    ) {
        match msg {
            ServerMsg::ParticipantJoined(info) => {
                self.emit(RoomEvent::ParticipantJoined(info));
            }
            ServerMsg::ParticipantLeft { session_id } => {
                self.emit(RoomEvent::ParticipantLeft(session_id));
            }
            ServerMsg::TrackPublished {
                session_id,
                track_name,
            } => {
                let own = self
                    .session
                    .borrow()
                    .as_ref()
                    .map(|s| s.session_id.clone());
                if own.as_ref() == Some(&session_id) {
                    return;
                }
                if self.registry.has_pulled(&session_id, &track_name) {
                    return;
                }
                let inner = Rc::clone(self);
                ops.push(Box::pin(async move {
                    inner.pull_discovered(session_id, track_name).await;
                }));
            }
            ServerMsg::TrackUnpublished {
                session_id,
                track_name,
            } => {
                self.emit(RoomEvent::RemoteTrackUnpublished {
                    session_id,
                    track_name,
                });
            }
            ServerMsg::TrackStatusChanged {
                session_id,
                track_name,
                status,
            } => {
                self.emit(RoomEvent::TrackStatusChanged {
                    session_id,
                    track_name,
                    status,
                });
            }
            ServerMsg::DataMessage { from, message } => {
                self.emit(RoomEvent::DataMessage { from, message });
            }
            ServerMsg::RoomMetadataUpdated { metadata } => {
                self.emit(RoomEvent::RoomMetadataUpdated(metadata));
            }
            _ => {}
        }
    }

    /// Pulls one discovered remote track, containing any failure.
    async fn pull_discovered(
        &self,
        session_id: SessionId,
        track_name: String,
    ) {
        let peer = match self.require_peer() {
            Ok(peer) => peer,
            Err(_) => return,
        };
        if let Err(e) =
            peer.pull_track(session_id.clone(), track_name.clone()).await
        {
            log::warn!(
                "Discovered pull of '{}' from {} failed: {}",
                track_name,
                session_id,
                e,
            );
        }
    }

    /// Resolves one received `track` event into a [`RoomEvent`], buffering
    /// it when its media line has no identity yet.
    fn handle_track_event(&self, event: TrackEvent) {
        match self.registry.resolve(&event.mid) {
            Some(identity) => {
                self.emit(RoomEvent::RemoteTrackAdded(remote::Track::new(
                    Rc::clone(&event.track),
                    identity.session_id,
                    identity.track_name,
                    event.mid,
                )));
            }
            None => {
                log::warn!(
                    "No identity for mid '{}' yet, buffering track",
                    event.mid,
                );
                self.pending_tracks.borrow_mut().push(event);
            }
        }
    }

    /// Retries resolution of buffered `track` events; unresolved entries
    /// stay buffered.
    fn flush_pending_tracks(&self) {
        let pending =
            std::mem::take(&mut *self.pending_tracks.borrow_mut());
        for event in pending {
            self.handle_track_event(event);
        }
    }

    /// Reacts to a connection-state change of the shared connection.
    fn handle_connection_state(
        self: &Rc<Self>,
        state: PeerConnectionState,
        ops: &mut FuturesUnordered<LocalBoxFuture<'static, ()>>,
    ) {
        match state {
            PeerConnectionState::Disconnected
            | PeerConnectionState::Failed => {
                log::warn!("Peer connection lost ({:?}), leaving", state);
                self.emit(RoomEvent::ConnectionLost);
                let inner = Rc::clone(self);
                ops.push(Box::pin(async move {
                    inner.leave().await;
                }));
            }
            _ => {}
        }
    }

    /// One discovery pass: diffs the participant list against the pulled
    /// index and pulls every unseen track.
    async fn discover_once(&self) {
        let (own, peer) = match &*self.session.borrow() {
            Some(session) => {
                (session.session_id.clone(), Rc::clone(&session.peer))
            }
            None => return,
        };

        let participants =
            match utils::timeout(self.options.poll_interval, async {
                self.list_participants().await
            })
            .await
            {
                Some(Ok(participants)) => participants,
                Some(Err(e)) => {
                    log::warn!("Participant poll failed: {}", e);
                    return;
                }
                None => {
                    log::warn!("Participant poll timed out");
                    return;
                }
            };

        for participant in participants {
            if participant.session_id == own {
                continue;
            }
            for track_name in participant.published_tracks {
                if self
                    .registry
                    .has_pulled(&participant.session_id, &track_name)
                {
                    continue;
                }
                if let Err(e) = peer
                    .pull_track(
                        participant.session_id.clone(),
                        track_name.clone(),
                    )
                    .await
                {
                    log::warn!(
                        "Polled pull of '{}' from {} failed: {}",
                        track_name,
                        participant.session_id,
                        e,
                    );
                }
            }
        }
    }
}
