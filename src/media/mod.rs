//! Media tracks and their metadata.

pub mod track;

use derive_more::Display;
use serde::{Deserialize, Serialize};

#[doc(inline)]
pub use self::track::{local, remote};

/// [MediaStreamTrack.kind][1] representation.
///
/// [1]: https://w3.org/TR/mediacapture-streams/#dfn-kind
#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// Publication status of a track as reported by the SFU session state.
#[derive(
    Clone, Copy, Debug, Display, Eq, PartialEq, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Track is live and forwarded to subscribers.
    #[display(fmt = "enabled")]
    Enabled,

    /// Track is paused on the SFU.
    #[display(fmt = "disabled")]
    Disabled,
}

/// Constraints applied to outgoing media encodings.
///
/// Pending parameters are applied to every newly published video transceiver
/// and may be re-applied to live senders at any time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EncodingParameters {
    /// Maximum bitrate of the encoding, in bits per second.
    pub max_bitrate: Option<u32>,
}
