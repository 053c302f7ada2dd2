//! Platform peer connection surface.

use std::rc::Rc;

use async_trait::async_trait;
use futures::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};

use super::{Error, MediaStreamTrack, Transceiver, TransceiverDirection};

/// [RTCSdpType][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// SDP offer.
    Offer,

    /// SDP answer.
    Answer,
}

/// [RTCSessionDescription][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtcsessiondescription-class
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SessionDescription {
    /// Type of this description.
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// SDP text of this description.
    pub sdp: String,
}

/// [RTCPeerConnectionState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnectionstate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerConnectionState {
    /// Connection is newly created.
    New,

    /// Transport establishment is in progress.
    Connecting,

    /// Transport is established.
    Connected,

    /// Transport lost connectivity, possibly transiently.
    Disconnected,

    /// Transport failed irrecoverably.
    Failed,

    /// Connection is closed.
    Closed,
}

/// [RTCSignalingState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcsignalingstate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalingState {
    /// No offer/answer exchange is in progress.
    Stable,

    /// A local offer has been applied.
    HaveLocalOffer,

    /// A remote offer has been applied.
    HaveRemoteOffer,
}

/// [`track` event][1] payload: the allocated media line identifier plus the
/// received platform track.
///
/// [1]: https://w3.org/TR/webrtc/#event-track
#[derive(Clone)]
pub struct TrackEvent {
    /// Media line the track arrived on.
    pub mid: String,

    /// Received platform track.
    pub track: Rc<dyn MediaStreamTrack>,
}

/// [ICE server][1] configuration entry.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtciceserver
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IceServer {
    /// URLs of this server.
    pub urls: Vec<String>,

    /// Username for authentication, if required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for authentication, if required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Abstraction over a platform [RTCPeerConnection][1].
///
/// The negotiation core is the only writer of the connection, so no method
/// here is expected to be re-entrant.
///
/// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
#[async_trait(?Send)]
pub trait RtcPeerConnection {
    /// Creates an SDP offer reflecting the current set of transceivers.
    ///
    /// # Errors
    ///
    /// Errors if the platform fails to produce an offer.
    async fn create_offer(&self) -> Result<SessionDescription, Error>;

    /// Creates an SDP answer to the currently applied remote offer.
    ///
    /// # Errors
    ///
    /// Errors if the platform fails to produce an answer.
    async fn create_answer(&self) -> Result<SessionDescription, Error>;

    /// Applies the provided [`SessionDescription`] as the local description.
    ///
    /// # Errors
    ///
    /// Errors if the description is rejected in the current signaling state.
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Error>;

    /// Applies the provided [`SessionDescription`] as the remote
    /// description.
    ///
    /// # Errors
    ///
    /// Errors if the description is rejected in the current signaling state.
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Error>;

    /// Creates a new [`Transceiver`] for the provided track with the
    /// provided direction.
    fn add_transceiver(
        &self,
        track: Rc<dyn MediaStreamTrack>,
        direction: TransceiverDirection,
    ) -> Rc<dyn Transceiver>;

    /// Returns all [`Transceiver`]s of this connection.
    fn get_transceivers(&self) -> Vec<Rc<dyn Transceiver>>;

    /// Lookups a [`Transceiver`] by the provided [`mid`].
    ///
    /// [`mid`]: https://w3.org/TR/webrtc/#dom-rtptransceiver-mid
    fn get_transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>>;

    /// Returns the current [`PeerConnectionState`] of this connection.
    fn connection_state(&self) -> PeerConnectionState;

    /// Returns the current [`SignalingState`] of this connection.
    fn signaling_state(&self) -> SignalingState;

    /// Subscribes to [`PeerConnectionState`] changes of this connection.
    fn on_connection_state_change(
        &self,
    ) -> LocalBoxStream<'static, PeerConnectionState>;

    /// Subscribes to [`track` events][1] of this connection.
    ///
    /// [1]: https://w3.org/TR/webrtc/#event-track
    fn on_track(&self) -> LocalBoxStream<'static, TrackEvent>;

    /// Closes this connection, releasing its transports.
    fn close(&self);
}

/// Factory creating platform peer connections for every new session.
pub type PeerConnectionFactory = Rc<
    dyn Fn(Vec<IceServer>) -> Result<Rc<dyn RtcPeerConnection>, Error>,
>;
