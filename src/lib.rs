//! Client library for SFU-based multi-party conference calls.
//!
//! Maintains one shared peer connection per joined room and negotiates
//! publication and pulling of media tracks against an SFU through an
//! out-of-band signaling channel. Two signaling backends are supported
//! behind one [`SignalingTransport`] contract: a duplex RPC channel (e.g. a
//! WebSocket) implemented by the embedder, and a smart-contract event bus
//! adapted by [`rpc::ContractTransport`].
//!
//! The RTC primitive itself (offer/answer creation, ICE, media capture) is
//! consumed through the capability traits of the [`platform`] module; the
//! library contains no platform bindings of its own.
//!
//! The library owns no executor. Spawn the driver futures on whatever
//! single-threaded executor hosts it:
//!
//! - [`CallsClient::run`] pumps signaling dispatch;
//! - [`Room::run`] pumps discovery and event delivery of one room;
//! - [`rpc::ContractTransport::run`] drains the contract submission outbox
//!   (contract backend only).
//!
//! [`SignalingTransport`]: crate::rpc::SignalingTransport

#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod media;
pub mod peer;
pub mod platform;
pub mod room;
pub mod rpc;
pub mod sdp;
pub mod utils;

#[doc(inline)]
pub use crate::{
    client::{CallsClient, ClientError, Credentials},
    media::{EncodingParameters, MediaKind, TrackStatus},
    peer::{NegotiationError, NegotiationState},
    room::{Room, RoomError, RoomEvent, RoomOptions},
    rpc::{RoomId, SessionId},
};
