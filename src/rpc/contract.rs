//! Smart-contract event-bus signaling backend.
//!
//! Adapts a contract's `forwardEventToBackend` / frontend-event pair onto
//! the [`SignalingTransport`] contract. Outgoing messages are compressed
//! (zlib + base64 with a `zlib:` prefix, to keep transaction payloads small)
//! and submitted strictly one at a time; incoming event frames are decoded
//! decompress-first with a plain-JSON fallback, since the framing is not
//! self-describing.

use std::{cell::RefCell, io::Read as _, io::Write as _, rc::Rc};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use futures::{
    channel::mpsc,
    future::LocalBoxFuture,
    stream::{LocalBoxStream, StreamExt as _},
};
use serde_json::Value;
use tracerr::Traced;

use super::{
    protocol::{ClientMsg, RoomId, ServerMsg},
    transport::{SignalingTransport, TransportError, TransportState},
};

/// Prefix marking a base64-encoded zlib-compressed payload.
const COMPRESSED_PREFIX: &str = "zlib:";

/// One event emitted by the contract towards this client.
#[derive(Clone, Debug)]
pub struct ContractEvent {
    /// Room the event belongs to.
    pub room_id: RoomId,

    /// Wallet address of the participant the event is targeted at.
    pub participant: String,

    /// Raw event payload.
    pub data: Vec<u8>,
}

/// Capability surface of the signaling smart contract.
///
/// Wallet management, transaction signing, gas estimation and the actual
/// chain connection live behind this trait, outside this crate.
pub trait ContractBus {
    /// Submits the provided payload to the backend through the contract.
    ///
    /// Resolves once the submission is accepted by the chain.
    fn forward_to_backend(
        &self,
        room_id: &RoomId,
        payload: Vec<u8>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<TransportError>>>;

    /// Returns a stream of all frontend-targeted contract events.
    ///
    /// Every call returns a fresh subscription.
    fn on_frontend_event(&self) -> LocalBoxStream<'static, ContractEvent>;

    /// Returns the readiness of the chain connection.
    fn state(&self) -> TransportState;

    /// Returns the wallet address this client acts as.
    fn participant_address(&self) -> String;
}

/// [`SignalingTransport`] implementation over a [`ContractBus`].
pub struct ContractTransport {
    /// Underlying contract surface.
    bus: Rc<dyn ContractBus>,

    /// Sender side of the submission outbox.
    outbox_tx: mpsc::UnboundedSender<(RoomId, Vec<u8>)>,

    /// Receiver side of the submission outbox, consumed once by
    /// [`ContractTransport::run`].
    outbox_rx: RefCell<Option<mpsc::UnboundedReceiver<(RoomId, Vec<u8>)>>>,
}

impl ContractTransport {
    /// Creates a new [`ContractTransport`] over the provided bus.
    #[must_use]
    pub fn new(bus: Rc<dyn ContractBus>) -> Rc<Self> {
        let (outbox_tx, outbox_rx) = mpsc::unbounded();
        Rc::new(Self {
            bus,
            outbox_tx,
            outbox_rx: RefCell::new(Some(outbox_rx)),
        })
    }

    /// Returns the future draining the submission outbox.
    ///
    /// Submissions are awaited one at a time, in order: the contract is
    /// driven by a single wallet, so concurrent transactions would race
    /// their nonces. Must be polled (spawned) for [`SignalingTransport::send`]
    /// to make progress.
    pub fn run(self: Rc<Self>) -> LocalBoxFuture<'static, ()> {
        let rx = self.outbox_rx.borrow_mut().take();
        Box::pin(async move {
            let mut rx = match rx {
                Some(rx) => rx,
                None => {
                    log::error!("Contract outbox driver started twice");
                    return;
                }
            };
            while let Some((room_id, payload)) = rx.next().await {
                if let Err(e) =
                    self.bus.forward_to_backend(&room_id, payload).await
                {
                    log::warn!("Contract submission failed: {}", e);
                }
            }
        })
    }
}

impl SignalingTransport for ContractTransport {
    fn send(&self, msg: &ClientMsg) -> Result<(), Traced<TransportError>> {
        let room_id = msg.room_id().ok_or_else(|| {
            tracerr::new!(TransportError::SendMessage(
                "operation is not addressable through the contract"
                    .to_owned(),
            ))
        })?;

        let envelope = encode_envelope(msg)?;
        self.outbox_tx
            .unbounded_send((room_id.clone(), envelope))
            .map_err(|_| tracerr::new!(TransportError::ClosedChannel))
    }

    fn on_message(&self) -> LocalBoxStream<'static, ServerMsg> {
        let address = self.bus.participant_address();
        Box::pin(self.bus.on_frontend_event().filter_map(move |event| {
            let addressed_to_us =
                event.participant.eq_ignore_ascii_case(&address);
            futures::future::ready(if addressed_to_us {
                match decode_frame(&event.data) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        log::warn!("Dropping undecodable contract event: {}", e);
                        None
                    }
                }
            } else {
                None
            })
        }))
    }

    fn state(&self) -> TransportState {
        self.bus.state()
    }
}

/// Wraps the provided [`ClientMsg`] into a compressed contract envelope.
fn encode_envelope(
    msg: &ClientMsg,
) -> Result<Vec<u8>, Traced<TransportError>> {
    let value = serde_json::to_value(msg).map_err(|e| {
        tracerr::new!(TransportError::SerializeMessage(e.to_string()))
    })?;
    let kind = value.get("type").cloned().unwrap_or(Value::Null);
    let json = serde_json::to_vec(&value).map_err(|e| {
        tracerr::new!(TransportError::SerializeMessage(e.to_string()))
    })?;
    let envelope = serde_json::json!({
        "type": kind,
        "compressedData": compress_payload(&json)?,
    });

    serde_json::to_vec(&envelope).map_err(|e| {
        tracerr::new!(TransportError::SerializeMessage(e.to_string()))
    })
}

/// Compresses the provided bytes into a `zlib:`-prefixed base64 string.
fn compress_payload(data: &[u8]) -> Result<String, Traced<TransportError>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| {
        tracerr::new!(TransportError::SerializeMessage(e.to_string()))
    })?;
    let compressed = encoder.finish().map_err(|e| {
        tracerr::new!(TransportError::SerializeMessage(e.to_string()))
    })?;

    Ok(format!("{}{}", COMPRESSED_PREFIX, base64::encode(compressed)))
}

/// Decodes one raw contract frame into a [`ServerMsg`].
///
/// Attempted decodings, in order:
/// 1. `zlib:`-prefixed base64 of zlib-compressed JSON;
/// 2. raw zlib-compressed JSON;
/// 3. plain JSON.
///
/// A successfully parsed object carrying a `compressedData` string is
/// unwrapped through the same prefix decoding before the final parse.
fn decode_frame(data: &[u8]) -> Result<ServerMsg, TransportError> {
    let text = if let Some(prefixed) = strip_compressed_prefix(data) {
        decompress_prefixed(prefixed)?
    } else if let Ok(inflated) = inflate(data) {
        inflated
    } else {
        String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::DecodeMessage(e.to_string()))?
    };

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| TransportError::DecodeMessage(e.to_string()))?;

    let value = match value.get("compressedData").and_then(Value::as_str) {
        Some(inner) => {
            let inner = strip_compressed_prefix(inner.as_bytes())
                .ok_or_else(|| {
                    TransportError::DecodeMessage(
                        "compressedData without zlib prefix".to_owned(),
                    )
                })?;
            let text = decompress_prefixed(inner)?;
            serde_json::from_str(&text)
                .map_err(|e| TransportError::DecodeMessage(e.to_string()))?
        }
        None => value,
    };

    serde_json::from_value(value)
        .map_err(|e| TransportError::DecodeMessage(e.to_string()))
}

/// Returns the base64 remainder of a `zlib:`-prefixed frame.
fn strip_compressed_prefix(data: &[u8]) -> Option<&[u8]> {
    data.strip_prefix(COMPRESSED_PREFIX.as_bytes())
}

/// Decodes a base64-encoded zlib-compressed payload into text.
fn decompress_prefixed(b64: &[u8]) -> Result<String, TransportError> {
    let compressed = base64::decode(b64)
        .map_err(|e| TransportError::DecodeMessage(e.to_string()))?;
    inflate(&compressed)
        .map_err(|e| TransportError::DecodeMessage(e.to_string()))
}

/// Inflates zlib-compressed bytes into text.
fn inflate(data: &[u8]) -> std::io::Result<String> {
    let mut text = String::new();
    let _ = ZlibDecoder::new(data).read_to_string(&mut text)?;
    Ok(text)
}
