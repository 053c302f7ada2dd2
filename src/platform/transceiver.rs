//! Platform transceiver surface.

use std::rc::Rc;

use bitflags::bitflags;

use crate::media::EncodingParameters;

use super::{Error, MediaStreamTrack};

bitflags! {
    /// Representation of [RTCRtpTransceiverDirection][1].
    ///
    /// [`sendrecv` direction][2] can be represented by
    /// [`TransceiverDirection::all`] bitflag.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcrtptransceiverdirection
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcrtptransceiverdirection-sendrecv
    pub struct TransceiverDirection: u8 {
        /// [`inactive` direction][1] of transceiver.
        ///
        /// [1]: https://tinyurl.com/y2zslyw2
        const INACTIVE = 0b00;

        /// [`sendonly` direction][1] of transceiver.
        ///
        /// [1]: https://tinyurl.com/y6y2ye97
        const SEND = 0b01;

        /// [`recvonly` direction][1] of transceiver.
        ///
        /// [1]: https://tinyurl.com/y2nlxpzf
        const RECV = 0b10;
    }
}

/// Abstraction over a platform [RTCRtpTransceiver][1].
///
/// [1]: https://w3.org/TR/webrtc/#rtcrtptransceiver-interface
pub trait Transceiver {
    /// Returns the [`mid`] of this transceiver.
    ///
    /// `None` until a media line is allocated for it by a description
    /// exchange.
    ///
    /// [`mid`]: https://w3.org/TR/webrtc/#dom-rtptransceiver-mid
    fn mid(&self) -> Option<String>;

    /// Returns the current direction of this transceiver.
    fn direction(&self) -> TransceiverDirection;

    /// Changes the direction of this transceiver.
    fn set_direction(&self, direction: TransceiverDirection);

    /// Returns the local track being sent through this transceiver, if any.
    fn send_track(&self) -> Option<Rc<dyn MediaStreamTrack>>;

    /// Applies the provided [`EncodingParameters`] to the sending side of
    /// this transceiver.
    ///
    /// # Errors
    ///
    /// Errors if the platform rejects the parameters.
    fn set_send_encodings(
        &self,
        params: EncodingParameters,
    ) -> Result<(), Error>;

    /// Permanently stops this transceiver, removing its media line from
    /// future negotiations.
    fn stop(&self);
}
