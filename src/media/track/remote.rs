//! Remote media track received from the SFU.

use std::rc::Rc;

use crate::{media::MediaKind, platform, rpc::SessionId};

/// Media track received from a remote participant, with its publisher
/// identity resolved from the transport-level media line.
#[derive(Clone)]
pub struct Track(Rc<Inner>);

struct Inner {
    /// Underlying platform track.
    track: Rc<dyn platform::MediaStreamTrack>,

    /// Session of the remote participant publishing this track.
    session_id: SessionId,

    /// Application-level name of this track on the publisher side.
    track_name: String,

    /// Media line identifier this track arrived on.
    mid: String,
}

impl Track {
    /// Creates a new [`Track`] out of the received platform track and its
    /// resolved identity.
    #[must_use]
    pub fn new(
        track: Rc<dyn platform::MediaStreamTrack>,
        session_id: SessionId,
        track_name: String,
        mid: String,
    ) -> Self {
        Self(Rc::new(Inner {
            track,
            session_id,
            track_name,
            mid,
        }))
    }

    /// Returns the session of the publisher of this [`Track`].
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.0.session_id
    }

    /// Returns the publisher-side name of this [`Track`].
    #[inline]
    #[must_use]
    pub fn track_name(&self) -> &str {
        &self.0.track_name
    }

    /// Returns the media line identifier this [`Track`] arrived on.
    #[inline]
    #[must_use]
    pub fn mid(&self) -> &str {
        &self.0.mid
    }

    /// Returns the [`MediaKind`] of this [`Track`].
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.0.track.kind()
    }

    /// Returns the underlying platform track.
    #[must_use]
    pub fn platform_track(&self) -> &Rc<dyn platform::MediaStreamTrack> {
        &self.0.track
    }
}
