//! Capability seam over the underlying RTC primitive.
//!
//! Everything the negotiation core needs from the environment — the peer
//! connection, its transceivers, media tracks and capture devices — is
//! expressed as object-safe traits here, so the core stays testable and
//! platform-agnostic. Concrete bindings (browser, native) live outside this
//! crate.

pub mod media_track;
pub mod peer_connection;
pub mod transceiver;

use std::borrow::Cow;

use derive_more::Display;

#[doc(inline)]
pub use self::{
    media_track::{
        MediaDevices, MediaStreamConstraints, MediaStreamTrack,
        TrackReadyState,
    },
    peer_connection::{
        IceServer, PeerConnectionFactory, PeerConnectionState,
        RtcPeerConnection, SdpKind, SessionDescription, SignalingState,
        TrackEvent,
    },
    transceiver::{Transceiver, TransceiverDirection},
};

/// Error returned by the underlying platform primitive.
///
/// Opaque to the negotiation core: it is only propagated and logged.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct Error(Cow<'static, str>);

impl Error {
    /// Returns the message of this [`Error`].
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Error {
    fn from(msg: &'static str) -> Self {
        Self(Cow::Borrowed(msg))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Self(Cow::Owned(msg))
    }
}
