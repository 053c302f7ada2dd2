//! Abstraction over the duplex signaling channel.

use derive_more::Display;
use futures::stream::LocalBoxStream;
use tracerr::Traced;

use super::protocol::{ClientMsg, ServerMsg};

/// States of a [`SignalingTransport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportState {
    /// Channel has been created but is not open yet.
    Connecting,

    /// Channel is open and ready to carry messages.
    Open,

    /// Channel is in the process of closing.
    Closing,

    /// Channel is closed or could not be opened.
    Closed,
}

impl TransportState {
    /// Indicates whether the channel can carry messages right now.
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Errors of a [`SignalingTransport`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum TransportError {
    /// Outgoing message cannot be serialized.
    #[display(fmt = "Failed to serialize client message: {}", _0)]
    SerializeMessage(String),

    /// Incoming frame cannot be decoded into a [`ServerMsg`].
    #[display(fmt = "Failed to decode server message: {}", _0)]
    DecodeMessage(String),

    /// Message was sent to a channel which is not open.
    #[display(fmt = "Underlying channel is closed")]
    ClosedChannel,

    /// Channel failed to carry the message.
    #[display(fmt = "Failed to send message: {}", _0)]
    SendMessage(String),
}

/// Duplex signaling channel between this client and the backend.
///
/// Implemented outside this crate for concrete channels (a WebSocket RPC
/// connection) and inside it for the smart-contract event bus
/// ([`ContractTransport`]).
///
/// Implementations decode incoming frames themselves and are expected to
/// log and drop malformed ones rather than surface them.
///
/// [`ContractTransport`]: crate::rpc::ContractTransport
pub trait SignalingTransport {
    /// Sends the provided [`ClientMsg`] to the backend.
    ///
    /// # Errors
    ///
    /// Errors if the channel is not open or rejects the message.
    fn send(&self, msg: &ClientMsg) -> Result<(), Traced<TransportError>>;

    /// Returns a stream of all [`ServerMsg`]s received by this channel.
    ///
    /// Every call returns a fresh subscription.
    fn on_message(&self) -> LocalBoxStream<'static, ServerMsg>;

    /// Returns the current [`TransportState`] of this channel.
    fn state(&self) -> TransportState;
}
