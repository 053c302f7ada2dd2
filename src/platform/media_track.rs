//! Platform media track and capture devices surface.

use std::rc::Rc;

use async_trait::async_trait;

use crate::media::MediaKind;

use super::Error;

/// [MediaStreamTrack.readyState][1] representation.
///
/// [1]: https://w3.org/TR/mediacapture-streams/#dfn-readystate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackReadyState {
    /// Track is active.
    Live,

    /// Track has ended and cannot be reused.
    Ended,
}

/// Abstraction over a platform [MediaStreamTrack][1].
///
/// [1]: https://w3.org/TR/mediacapture-streams/#dom-mediastreamtrack
pub trait MediaStreamTrack {
    /// Returns the unique identifier of this track.
    fn id(&self) -> String;

    /// Returns the [`MediaKind`] of this track.
    fn kind(&self) -> MediaKind;

    /// Returns the current readiness of this track.
    fn ready_state(&self) -> TrackReadyState;

    /// Enables or disables this track without renegotiation.
    fn set_enabled(&self, enabled: bool);

    /// Indicates whether this track is enabled.
    fn enabled(&self) -> bool;

    /// Permanently stops this track.
    fn stop(&self);
}

/// Constraints for acquiring local capture tracks.
#[derive(Clone, Copy, Debug)]
pub struct MediaStreamConstraints {
    /// Whether an audio track is requested.
    pub audio: bool,

    /// Whether a video track is requested.
    pub video: bool,
}

impl Default for MediaStreamConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Abstraction over platform media capture ([getUserMedia()][1] surface).
///
/// [1]: https://w3.org/TR/mediacapture-streams/#dom-mediadevices-getusermedia
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Acquires local capture tracks satisfying the provided
    /// [`MediaStreamConstraints`].
    ///
    /// # Errors
    ///
    /// Errors if the capture devices are unavailable or access is denied.
    async fn get_user_media(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn MediaStreamTrack>>, Error>;
}
