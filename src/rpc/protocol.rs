//! Typed messages of the signaling protocol.
//!
//! Every message travels as an adjacently tagged JSON object
//! (`{"type": "...", "payload": {...}}`) over whichever
//! [`SignalingTransport`] backend is in use. Requests and their responses
//! share the same tag; pushed notifications use the event tags.
//!
//! [`SignalingTransport`]: crate::rpc::SignalingTransport

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    media::{MediaKind, TrackStatus},
    platform::{IceServer, SdpKind, SessionDescription},
};

/// ID of a room.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, PartialEq, Deserialize, Serialize,
)]
pub struct RoomId(pub String);

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// ID of a participant session within a room, assigned by the signaling
/// backend on join.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, PartialEq, Deserialize, Serialize,
)]
pub struct SessionId(pub String);

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Placement of a track relative to the sending session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackLocation {
    /// Track is produced by the local session.
    Local,

    /// Track is forwarded from a remote session.
    Remote,
}

/// Metadata of one published track, sent along with a publish offer.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    /// Placement of the track.
    pub location: TrackLocation,

    /// Media line the track is negotiated on.
    pub mid: String,

    /// Application-level name of the track.
    pub track_name: String,
}

/// Description of one room participant.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    /// Session of the participant.
    pub session_id: SessionId,

    /// Names of the tracks the participant currently publishes.
    #[serde(default)]
    pub published_tracks: Vec<String>,

    /// Application metadata of the participant.
    #[serde(default)]
    pub metadata: Value,
}

/// Credentials issued by the `auth` operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    /// Bearer token for subsequent requests.
    pub token: String,

    /// ID of the authenticated user.
    pub user_id: String,
}

/// Response of the `create-room` operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    /// ID of the created room.
    pub room_id: RoomId,
}

/// Response of the `join-room` operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    /// Session assigned to the joining participant.
    pub session_id: SessionId,

    /// Participants already present in the room.
    #[serde(default)]
    pub other_sessions: Vec<ParticipantInfo>,
}

/// Response of the `publish-tracks` operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTracks {
    /// SFU answer to the publish offer.
    pub session_description: SessionDescription,
}

/// Response of the `pull-tracks` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulledTracks {
    /// Description to apply, when the pull requires renegotiation.
    #[serde(default)]
    pub session_description: Option<SessionDescription>,

    /// Whether the SFU demands an immediate offer/answer cycle to start
    /// forwarding the pulled track.
    #[serde(default)]
    pub requires_immediate_renegotiation: bool,
}

/// Response of the `renegotiate-session` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenegotiationAck {
    /// Follow-up description from the SFU, when any.
    #[serde(default)]
    pub session_description: Option<SessionDescription>,
}

/// Response of the `get-participants` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantList {
    /// Participants of the room.
    #[serde(default)]
    pub participants: Vec<ParticipantInfo>,
}

/// Response of the `get-ice-servers` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerList {
    /// ICE servers to configure the peer connection with.
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

/// Per-track state as reported by `get-session-state`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStateInfo {
    /// Name of the track.
    pub track_name: String,

    /// Current status of the track.
    pub status: TrackStatus,
}

/// Response of the `get-session-state` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// States of the session's tracks.
    #[serde(default)]
    pub tracks: Vec<TrackStateInfo>,
}

/// Response of the `unpublish-track` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpublishedTrack {
    /// SFU answer covering the removal, when any.
    #[serde(default)]
    pub session_description: Option<SessionDescription>,
}

/// Response of the `update-track-status` operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStatusAck {
    /// Whether the status change demands an immediate offer/answer cycle.
    #[serde(default)]
    pub requires_immediate_renegotiation: bool,
}

/// Acknowledgement without a meaningful payload.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Ack {}

/// Messages sent by this client to the signaling backend.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMsg {
    /// Obtain credentials for the provided username.
    #[serde(rename_all = "camelCase")]
    Auth {
        /// Username to authenticate as.
        username: String,
    },

    /// Create a new room.
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        /// Optional display name of the room.
        name: Option<String>,

        /// Application metadata of the room.
        metadata: Value,
    },

    /// Join an existing room.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room to join.
        room_id: RoomId,

        /// Authenticated user performing the join.
        user_id: String,

        /// Application metadata of the joining participant.
        metadata: Value,
    },

    /// Publish local tracks with a batched offer.
    #[serde(rename_all = "camelCase")]
    PublishTracks {
        /// Room of the publishing session.
        room_id: RoomId,

        /// Publishing session.
        session_id: SessionId,

        /// Local offer covering all newly attached tracks.
        offer: SessionDescription,

        /// Metadata of every track covered by the offer.
        tracks: Vec<TrackInfo>,
    },

    /// Request forwarding of one remote track.
    #[serde(rename_all = "camelCase")]
    PullTracks {
        /// Room of the pulling session.
        room_id: RoomId,

        /// Pulling session.
        session_id: SessionId,

        /// Session publishing the wanted track.
        remote_session_id: SessionId,

        /// Name of the wanted track.
        track_name: String,
    },

    /// Complete a renegotiation demanded by the SFU.
    #[serde(rename_all = "camelCase")]
    RenegotiateSession {
        /// Room of the session.
        room_id: RoomId,

        /// Session being renegotiated.
        session_id: SessionId,

        /// SDP of the local description.
        sdp: String,

        /// Type of the local description.
        #[serde(rename = "type")]
        kind: SdpKind,
    },

    /// List participants of a room.
    #[serde(rename_all = "camelCase")]
    GetParticipants {
        /// Room to list.
        room_id: RoomId,
    },

    /// Fetch ICE servers for the peer connection.
    GetIceServers,

    /// Fetch per-track state of a session.
    #[serde(rename_all = "camelCase")]
    GetSessionState {
        /// Room of the session.
        room_id: RoomId,

        /// Session to inspect.
        session_id: SessionId,
    },

    /// Withdraw one published track.
    #[serde(rename_all = "camelCase")]
    UnpublishTrack {
        /// Room of the session.
        room_id: RoomId,

        /// Session withdrawing the track.
        session_id: SessionId,

        /// ID of the withdrawn track.
        track_id: String,

        /// Media line the track was negotiated on.
        mid: String,

        /// Whether to close the track without renegotiation.
        force: bool,

        /// Fresh local offer covering the removal.
        session_description: SessionDescription,
    },

    /// Toggle the forwarding status of a published track.
    #[serde(rename_all = "camelCase")]
    UpdateTrackStatus {
        /// Room of the session.
        room_id: RoomId,

        /// Session owning the track.
        session_id: SessionId,

        /// ID of the track.
        track_id: String,

        /// Kind of the track.
        kind: MediaKind,

        /// Desired enabled state.
        enabled: bool,

        /// Whether to skip renegotiation.
        force: bool,
    },

    /// Leave a room.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Room being left.
        room_id: RoomId,

        /// Session leaving the room.
        session_id: SessionId,
    },

    /// Broadcast an application data message to the room.
    #[serde(rename_all = "camelCase")]
    DataMessage {
        /// Sending session.
        from: SessionId,

        /// Arbitrary application payload.
        message: Value,
    },
}

/// Messages received by this client from the signaling backend: responses to
/// [`ClientMsg`] requests and pushed notifications.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// Response to [`ClientMsg::Auth`].
    Auth(AuthInfo),

    /// Response to [`ClientMsg::CreateRoom`].
    CreateRoom(CreatedRoom),

    /// Response to [`ClientMsg::JoinRoom`].
    JoinRoom(JoinedRoom),

    /// Response to [`ClientMsg::PublishTracks`].
    PublishTracks(PublishedTracks),

    /// Response to [`ClientMsg::PullTracks`].
    PullTracks(PulledTracks),

    /// Response to [`ClientMsg::RenegotiateSession`].
    RenegotiateSession(RenegotiationAck),

    /// Response to [`ClientMsg::GetParticipants`].
    GetParticipants(ParticipantList),

    /// Response to [`ClientMsg::GetIceServers`].
    GetIceServers(IceServerList),

    /// Response to [`ClientMsg::GetSessionState`].
    GetSessionState(SessionState),

    /// Response to [`ClientMsg::UnpublishTrack`].
    UnpublishTrack(UnpublishedTrack),

    /// Response to [`ClientMsg::UpdateTrackStatus`].
    UpdateTrackStatus(TrackStatusAck),

    /// Response to [`ClientMsg::LeaveRoom`].
    LeaveRoom(Ack),

    /// A participant joined the room.
    ParticipantJoined(ParticipantInfo),

    /// A participant left the room.
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        /// Session of the leaving participant.
        session_id: SessionId,
    },

    /// A remote track became available for pulling.
    #[serde(rename_all = "camelCase")]
    TrackPublished {
        /// Session publishing the track.
        session_id: SessionId,

        /// Name of the published track.
        track_name: String,
    },

    /// A remote track was withdrawn.
    #[serde(rename_all = "camelCase")]
    TrackUnpublished {
        /// Session which withdrew the track.
        session_id: SessionId,

        /// Name of the withdrawn track.
        track_name: String,
    },

    /// Forwarding status of a remote track changed.
    #[serde(rename_all = "camelCase")]
    TrackStatusChanged {
        /// Session owning the track.
        session_id: SessionId,

        /// Name of the track.
        track_name: String,

        /// New status of the track.
        status: TrackStatus,
    },

    /// Application data message from another participant.
    #[serde(rename_all = "camelCase")]
    DataMessage {
        /// Sending session.
        from: SessionId,

        /// Arbitrary application payload.
        message: Value,
    },

    /// Metadata of the room was updated.
    #[serde(rename_all = "camelCase")]
    RoomMetadataUpdated {
        /// New metadata of the room.
        metadata: Value,
    },
}

/// Request/response operations of the signaling protocol.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum Method {
    /// `auth` operation.
    #[display(fmt = "auth")]
    Auth,

    /// `create-room` operation.
    #[display(fmt = "create-room")]
    CreateRoom,

    /// `join-room` operation.
    #[display(fmt = "join-room")]
    JoinRoom,

    /// `publish-tracks` operation.
    #[display(fmt = "publish-tracks")]
    PublishTracks,

    /// `pull-tracks` operation.
    #[display(fmt = "pull-tracks")]
    PullTracks,

    /// `renegotiate-session` operation.
    #[display(fmt = "renegotiate-session")]
    RenegotiateSession,

    /// `get-participants` operation.
    #[display(fmt = "get-participants")]
    GetParticipants,

    /// `get-ice-servers` operation.
    #[display(fmt = "get-ice-servers")]
    GetIceServers,

    /// `get-session-state` operation.
    #[display(fmt = "get-session-state")]
    GetSessionState,

    /// `unpublish-track` operation.
    #[display(fmt = "unpublish-track")]
    UnpublishTrack,

    /// `update-track-status` operation.
    #[display(fmt = "update-track-status")]
    UpdateTrackStatus,

    /// `leave-room` operation.
    #[display(fmt = "leave-room")]
    LeaveRoom,
}

/// Pushed notification topics of the signaling protocol.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum EventKind {
    /// `participant-joined` notifications.
    #[display(fmt = "participant-joined")]
    ParticipantJoined,

    /// `participant-left` notifications.
    #[display(fmt = "participant-left")]
    ParticipantLeft,

    /// `track-published` notifications.
    #[display(fmt = "track-published")]
    TrackPublished,

    /// `track-unpublished` notifications.
    #[display(fmt = "track-unpublished")]
    TrackUnpublished,

    /// `track-status-changed` notifications.
    #[display(fmt = "track-status-changed")]
    TrackStatusChanged,

    /// `data-message` notifications.
    #[display(fmt = "data-message")]
    DataMessage,

    /// `room-metadata-updated` notifications.
    #[display(fmt = "room-metadata-updated")]
    RoomMetadataUpdated,
}

impl ClientMsg {
    /// Returns the request/response [`Method`] of this message, if it
    /// expects a correlated response.
    #[must_use]
    pub fn method(&self) -> Option<Method> {
        match self {
            Self::Auth { .. } => Some(Method::Auth),
            Self::CreateRoom { .. } => Some(Method::CreateRoom),
            Self::JoinRoom { .. } => Some(Method::JoinRoom),
            Self::PublishTracks { .. } => Some(Method::PublishTracks),
            Self::PullTracks { .. } => Some(Method::PullTracks),
            Self::RenegotiateSession { .. } => {
                Some(Method::RenegotiateSession)
            }
            Self::GetParticipants { .. } => Some(Method::GetParticipants),
            Self::GetIceServers => Some(Method::GetIceServers),
            Self::GetSessionState { .. } => Some(Method::GetSessionState),
            Self::UnpublishTrack { .. } => Some(Method::UnpublishTrack),
            Self::UpdateTrackStatus { .. } => Some(Method::UpdateTrackStatus),
            Self::LeaveRoom { .. } => Some(Method::LeaveRoom),
            Self::DataMessage { .. } => None,
        }
    }

    /// Returns the room this message addresses, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::JoinRoom { room_id, .. }
            | Self::PublishTracks { room_id, .. }
            | Self::PullTracks { room_id, .. }
            | Self::RenegotiateSession { room_id, .. }
            | Self::GetParticipants { room_id }
            | Self::GetSessionState { room_id, .. }
            | Self::UnpublishTrack { room_id, .. }
            | Self::UpdateTrackStatus { room_id, .. }
            | Self::LeaveRoom { room_id, .. } => Some(room_id),
            Self::Auth { .. }
            | Self::CreateRoom { .. }
            | Self::GetIceServers
            | Self::DataMessage { .. } => None,
        }
    }
}

impl ServerMsg {
    /// Returns the [`Method`] this message responds to, if it is a response.
    #[must_use]
    pub fn method(&self) -> Option<Method> {
        match self {
            Self::Auth(_) => Some(Method::Auth),
            Self::CreateRoom(_) => Some(Method::CreateRoom),
            Self::JoinRoom(_) => Some(Method::JoinRoom),
            Self::PublishTracks(_) => Some(Method::PublishTracks),
            Self::PullTracks(_) => Some(Method::PullTracks),
            Self::RenegotiateSession(_) => Some(Method::RenegotiateSession),
            Self::GetParticipants(_) => Some(Method::GetParticipants),
            Self::GetIceServers(_) => Some(Method::GetIceServers),
            Self::GetSessionState(_) => Some(Method::GetSessionState),
            Self::UnpublishTrack(_) => Some(Method::UnpublishTrack),
            Self::UpdateTrackStatus(_) => Some(Method::UpdateTrackStatus),
            Self::LeaveRoom(_) => Some(Method::LeaveRoom),
            _ => None,
        }
    }

    /// Returns the [`EventKind`] of this message, if it is a pushed
    /// notification.
    #[must_use]
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            Self::ParticipantJoined(_) => Some(EventKind::ParticipantJoined),
            Self::ParticipantLeft { .. } => Some(EventKind::ParticipantLeft),
            Self::TrackPublished { .. } => Some(EventKind::TrackPublished),
            Self::TrackUnpublished { .. } => {
                Some(EventKind::TrackUnpublished)
            }
            Self::TrackStatusChanged { .. } => {
                Some(EventKind::TrackStatusChanged)
            }
            Self::DataMessage { .. } => Some(EventKind::DataMessage),
            Self::RoomMetadataUpdated { .. } => {
                Some(EventKind::RoomMetadataUpdated)
            }
            _ => None,
        }
    }
}
