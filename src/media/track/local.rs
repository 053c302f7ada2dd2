//! Wrapper around a locally captured media track.

use std::rc::Rc;

use crate::{
    media::MediaKind,
    platform::{self, TrackReadyState},
};

/// Locally captured track destined for publication.
///
/// Thin strongly-typed handle over the platform track, so the rest of the
/// crate never touches the capability object directly.
#[derive(Clone)]
pub struct Track {
    /// Underlying platform track.
    track: Rc<dyn platform::MediaStreamTrack>,

    /// Kind of this track, cached at creation.
    kind: MediaKind,
}

impl Track {
    /// Creates a new [`Track`] from the provided platform track.
    #[must_use]
    pub fn new(track: Rc<dyn platform::MediaStreamTrack>) -> Self {
        let kind = track.kind();
        Self { track, kind }
    }

    /// Returns the unique identifier of this [`Track`].
    #[must_use]
    pub fn id(&self) -> String {
        self.track.id()
    }

    /// Returns the [`MediaKind`] of this [`Track`].
    #[inline]
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Indicates whether the underlying platform track is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.track.ready_state() == TrackReadyState::Live
    }

    /// Enables or disables the underlying platform track.
    pub fn set_enabled(&self, enabled: bool) {
        self.track.set_enabled(enabled);
    }

    /// Indicates whether the underlying platform track is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.track.enabled()
    }

    /// Permanently stops the underlying platform track.
    pub fn stop(&self) {
        self.track.stop();
    }

    /// Returns the underlying platform track.
    #[inline]
    #[must_use]
    pub fn platform_track(&self) -> &Rc<dyn platform::MediaStreamTrack> {
        &self.track
    }
}
