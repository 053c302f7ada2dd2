//! Hand-rolled fakes of the platform and transport capability surfaces.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{channel::mpsc, future::LocalBoxFuture, stream::LocalBoxStream};
use tracerr::Traced;

use calls_client::{
    media::MediaKind,
    platform::{
        self, MediaStreamConstraints, PeerConnectionState,
        RtcPeerConnection, SdpKind, SessionDescription, SignalingState,
        TrackEvent, TrackReadyState, Transceiver, TransceiverDirection,
    },
    rpc::{
        contract::{ContractBus, ContractEvent},
        ClientMsg, RoomId, ServerMsg, SignalingTransport, TransportError,
        TransportState,
    },
    sdp, EncodingParameters,
};

/// Yields to the executor exactly once.
pub struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Lets every other spawned task make progress.
pub async fn yield_now() {
    YieldNow(false).await;
}

/// Spins the executor until the provided condition holds.
///
/// Panics after a bounded number of yields, to keep broken tests from
/// hanging.
pub async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        yield_now().await;
    }
    panic!("condition was not reached");
}

/// Fake of a platform media track.
pub struct FakeTrack {
    pub id: String,
    pub kind: MediaKind,
    pub enabled: Cell<bool>,
    pub state: Cell<TrackReadyState>,
}

impl FakeTrack {
    pub fn new(id: &str, kind: MediaKind) -> Rc<Self> {
        Rc::new(Self {
            id: id.to_owned(),
            kind,
            enabled: Cell::new(true),
            state: Cell::new(TrackReadyState::Live),
        })
    }
}

impl platform::MediaStreamTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn ready_state(&self) -> TrackReadyState {
        self.state.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn stop(&self) {
        self.state.set(TrackReadyState::Ended);
    }
}

/// Fake of a platform transceiver.
pub struct FakeTransceiver {
    pub mid: RefCell<Option<String>>,
    pub direction: Cell<TransceiverDirection>,
    pub track: RefCell<Option<Rc<dyn platform::MediaStreamTrack>>>,
    pub stopped: Cell<bool>,
    pub encodings: RefCell<Option<EncodingParameters>>,
}

impl FakeTransceiver {
    pub fn new(
        mid: Option<String>,
        direction: TransceiverDirection,
        track: Option<Rc<dyn platform::MediaStreamTrack>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            mid: RefCell::new(mid),
            direction: Cell::new(direction),
            track: RefCell::new(track),
            stopped: Cell::new(false),
            encodings: RefCell::new(None),
        })
    }
}

impl Transceiver for FakeTransceiver {
    fn mid(&self) -> Option<String> {
        self.mid.borrow().clone()
    }

    fn direction(&self) -> TransceiverDirection {
        self.direction.get()
    }

    fn set_direction(&self, direction: TransceiverDirection) {
        self.direction.set(direction);
    }

    fn send_track(&self) -> Option<Rc<dyn platform::MediaStreamTrack>> {
        if self.stopped.get() {
            None
        } else {
            self.track.borrow().clone()
        }
    }

    fn set_send_encodings(
        &self,
        params: EncodingParameters,
    ) -> Result<(), platform::Error> {
        *self.encodings.borrow_mut() = Some(params);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.set(true);
    }
}

/// Fake of a platform peer connection.
///
/// Generates SDP texts with one `a=mid:` line per transceiver, allocates
/// mids on offer creation, and materializes receiving transceivers for
/// unknown media lines of applied remote offers (optionally firing their
/// `track` events right away, before the application resolves).
pub struct FakePeer {
    pub transceivers: RefCell<Vec<Rc<FakeTransceiver>>>,
    next_mid: Cell<u32>,
    pub signaling: Cell<SignalingState>,
    pub connection: Cell<PeerConnectionState>,
    track_subs: RefCell<Vec<mpsc::UnboundedSender<TrackEvent>>>,
    state_subs: RefCell<Vec<mpsc::UnboundedSender<PeerConnectionState>>>,
    pub offers_created: Cell<u32>,
    pub answers_created: Cell<u32>,
    pub local_descriptions: RefCell<Vec<SessionDescription>>,
    pub remote_descriptions: RefCell<Vec<SessionDescription>>,
    pub fire_track_on_remote_offer: Cell<bool>,
    pub closed: Cell<bool>,
}

impl FakePeer {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            transceivers: RefCell::new(Vec::new()),
            next_mid: Cell::new(0),
            signaling: Cell::new(SignalingState::Stable),
            connection: Cell::new(PeerConnectionState::Connected),
            track_subs: RefCell::new(Vec::new()),
            state_subs: RefCell::new(Vec::new()),
            offers_created: Cell::new(0),
            answers_created: Cell::new(0),
            local_descriptions: RefCell::new(Vec::new()),
            remote_descriptions: RefCell::new(Vec::new()),
            fire_track_on_remote_offer: Cell::new(false),
            closed: Cell::new(false),
        })
    }

    /// Emits a `track` event for the provided media line.
    pub fn fire_track(&self, mid: &str) {
        let track: Rc<dyn platform::MediaStreamTrack> =
            FakeTrack::new(&format!("remote-{}", mid), MediaKind::Video);
        let event = TrackEvent {
            mid: mid.to_owned(),
            track,
        };
        self.track_subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    /// Changes the connection state, notifying subscribers.
    pub fn set_connection_state(&self, state: PeerConnectionState) {
        self.connection.set(state);
        self.state_subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(state).is_ok());
    }

    fn allocate_mids(&self) {
        for transceiver in self.transceivers.borrow().iter() {
            if transceiver.mid.borrow().is_none() {
                let mid = self.next_mid.get();
                self.next_mid.set(mid + 1);
                *transceiver.mid.borrow_mut() = Some(mid.to_string());
            }
        }
    }

    fn current_sdp(&self) -> String {
        let mut sdp = "v=0\r\n".to_owned();
        for transceiver in self.transceivers.borrow().iter() {
            if let Some(mid) = &*transceiver.mid.borrow() {
                sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
                sdp.push_str(&format!("a=mid:{}\r\n", mid));
            }
        }
        sdp
    }
}

#[async_trait(?Send)]
impl RtcPeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription, platform::Error> {
        self.allocate_mids();
        self.offers_created.set(self.offers_created.get() + 1);
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: self.current_sdp(),
        })
    }

    async fn create_answer(
        &self,
    ) -> Result<SessionDescription, platform::Error> {
        self.answers_created.set(self.answers_created.get() + 1);
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: self.current_sdp(),
        })
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), platform::Error> {
        match desc.kind {
            SdpKind::Offer => self.signaling.set(SignalingState::HaveLocalOffer),
            SdpKind::Answer => self.signaling.set(SignalingState::Stable),
        }
        self.local_descriptions.borrow_mut().push(desc);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), platform::Error> {
        match desc.kind {
            SdpKind::Answer => self.signaling.set(SignalingState::Stable),
            SdpKind::Offer => {
                let mut fresh = Vec::new();
                for mid in sdp::media_line_mids(&desc.sdp) {
                    let known = self
                        .transceivers
                        .borrow()
                        .iter()
                        .any(|t| t.mid.borrow().as_deref() == Some(mid.as_str()));
                    if !known {
                        self.transceivers.borrow_mut().push(
                            FakeTransceiver::new(
                                Some(mid.clone()),
                                TransceiverDirection::RECV,
                                None,
                            ),
                        );
                        fresh.push(mid);
                    }
                }
                self.signaling.set(SignalingState::HaveRemoteOffer);
                if self.fire_track_on_remote_offer.get() {
                    for mid in &fresh {
                        self.fire_track(mid);
                    }
                }
            }
        }
        self.remote_descriptions.borrow_mut().push(desc);
        Ok(())
    }

    fn add_transceiver(
        &self,
        track: Rc<dyn platform::MediaStreamTrack>,
        direction: TransceiverDirection,
    ) -> Rc<dyn Transceiver> {
        let transceiver = FakeTransceiver::new(None, direction, Some(track));
        self.transceivers.borrow_mut().push(Rc::clone(&transceiver));
        transceiver
    }

    fn get_transceivers(&self) -> Vec<Rc<dyn Transceiver>> {
        self.transceivers
            .borrow()
            .iter()
            .map(|t| Rc::clone(t) as Rc<dyn Transceiver>)
            .collect()
    }

    fn get_transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>> {
        self.transceivers
            .borrow()
            .iter()
            .find(|t| t.mid.borrow().as_deref() == Some(mid))
            .map(|t| Rc::clone(t) as Rc<dyn Transceiver>)
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.connection.get()
    }

    fn signaling_state(&self) -> SignalingState {
        self.signaling.get()
    }

    fn on_connection_state_change(
        &self,
    ) -> LocalBoxStream<'static, PeerConnectionState> {
        let (tx, rx) = mpsc::unbounded();
        self.state_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn on_track(&self) -> LocalBoxStream<'static, TrackEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.track_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn close(&self) {
        self.closed.set(true);
        self.connection.set(PeerConnectionState::Closed);
    }
}

/// Fake of platform capture devices, yielding preset tracks.
pub struct FakeDevices {
    pub tracks: RefCell<Vec<Rc<FakeTrack>>>,
    pub fail: Cell<bool>,
}

impl FakeDevices {
    pub fn new(tracks: Vec<Rc<FakeTrack>>) -> Rc<Self> {
        Rc::new(Self {
            tracks: RefCell::new(tracks),
            fail: Cell::new(false),
        })
    }
}

#[async_trait(?Send)]
impl platform::MediaDevices for FakeDevices {
    async fn get_user_media(
        &self,
        _constraints: MediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn platform::MediaStreamTrack>>, platform::Error> {
        if self.fail.get() {
            return Err(platform::Error::from("capture devices unavailable"));
        }
        Ok(self
            .tracks
            .borrow()
            .iter()
            .map(|t| Rc::clone(t) as Rc<dyn platform::MediaStreamTrack>)
            .collect())
    }
}

/// Scripted responder of a [`FakeTransport`].
pub type Responder = Box<dyn FnMut(&ClientMsg) -> Vec<ServerMsg>>;

/// Fake of a duplex signaling channel.
pub struct FakeTransport {
    pub state: Cell<TransportState>,
    pub sent: RefCell<Vec<ClientMsg>>,
    subs: RefCell<Vec<mpsc::UnboundedSender<ServerMsg>>>,
    responder: RefCell<Option<Responder>>,
}

impl FakeTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: Cell::new(TransportState::Open),
            sent: RefCell::new(Vec::new()),
            subs: RefCell::new(Vec::new()),
            responder: RefCell::new(None),
        })
    }

    pub fn set_responder(
        &self,
        responder: impl FnMut(&ClientMsg) -> Vec<ServerMsg> + 'static,
    ) {
        *self.responder.borrow_mut() = Some(Box::new(responder));
    }

    /// Delivers a server-pushed message to every subscriber.
    pub fn push(&self, msg: ServerMsg) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(msg.clone()).is_ok());
    }

    /// Number of sent messages matching the provided predicate.
    pub fn sent_count(&self, predicate: impl Fn(&ClientMsg) -> bool) -> usize {
        self.sent.borrow().iter().filter(|msg| predicate(msg)).count()
    }
}

impl SignalingTransport for FakeTransport {
    fn send(&self, msg: &ClientMsg) -> Result<(), Traced<TransportError>> {
        if !self.state.get().is_open() {
            return Err(tracerr::new!(TransportError::ClosedChannel));
        }
        self.sent.borrow_mut().push(msg.clone());
        let responses = self
            .responder
            .borrow_mut()
            .as_mut()
            .map(|responder| responder(msg))
            .unwrap_or_default();
        for response in responses {
            self.push(response);
        }
        Ok(())
    }

    fn on_message(&self) -> LocalBoxStream<'static, ServerMsg> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }
}

/// Fake of the smart-contract event bus.
pub struct FakeBus {
    pub submissions: RefCell<Vec<(RoomId, Vec<u8>)>>,
    subs: RefCell<Vec<mpsc::UnboundedSender<ContractEvent>>>,
    pub address: String,
    pub state: Cell<TransportState>,
}

impl FakeBus {
    pub fn new(address: &str) -> Rc<Self> {
        Rc::new(Self {
            submissions: RefCell::new(Vec::new()),
            subs: RefCell::new(Vec::new()),
            address: address.to_owned(),
            state: Cell::new(TransportState::Open),
        })
    }

    /// Emits a frontend-targeted contract event.
    pub fn emit(&self, room_id: &str, participant: &str, data: Vec<u8>) {
        let event = ContractEvent {
            room_id: RoomId::from(room_id),
            participant: participant.to_owned(),
            data,
        };
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}

impl ContractBus for FakeBus {
    fn forward_to_backend(
        &self,
        room_id: &RoomId,
        payload: Vec<u8>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<TransportError>>> {
        self.submissions
            .borrow_mut()
            .push((room_id.clone(), payload));
        Box::pin(futures::future::ok(()))
    }

    fn on_frontend_event(&self) -> LocalBoxStream<'static, ContractEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn participant_address(&self) -> String {
        self.address.clone()
    }
}
