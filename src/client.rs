//! Top-level entry point of the library.

use std::{cell::RefCell, rc::Rc};

use derive_more::Display;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracerr::Traced;

use crate::{
    platform::{self, PeerConnectionFactory},
    room::{Room, RoomOptions},
    rpc::{
        protocol::AuthInfo, ClientMsg, RoomId, ServerMsg, SignalingClient,
        SignalingError, SignalingTransport,
    },
};

/// Credentials of the authenticated user, shared between the client and its
/// rooms.
#[derive(Default)]
pub struct Credentials {
    /// Bearer token for backend requests.
    token: RefCell<Option<String>>,

    /// ID of the authenticated user.
    user_id: RefCell<Option<String>>,
}

impl Credentials {
    /// Stores the provided token and user ID.
    pub fn set(&self, token: String, user_id: String) {
        *self.token.borrow_mut() = Some(token);
        *self.user_id.borrow_mut() = Some(user_id);
    }

    /// Returns the stored bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    /// Returns the stored user ID, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.user_id.borrow().clone()
    }
}

/// Errors of the [`CallsClient`].
#[derive(Clone, Debug, Display)]
pub enum ClientError {
    /// Signaling request failed.
    #[display(fmt = "{}", _0)]
    Signaling(SignalingError),

    /// Signaling backend responded with an unexpected message.
    #[display(fmt = "Unexpected response to '{}' request", _0)]
    UnexpectedResponse(&'static str),
}

type Result<T> = std::result::Result<T, Traced<ClientError>>;

/// General library interface: authentication, room creation, and [`Room`]
/// instantiation.
///
/// Holds the signaling channel and platform factories shared by every
/// [`Room`] it creates. [`CallsClient::run`] must be spawned for any
/// signaling exchange to make progress.
pub struct CallsClient {
    /// Signaling channel shared with created rooms.
    signaling: Rc<SignalingClient>,

    /// Factory of platform peer connections.
    peer_factory: PeerConnectionFactory,

    /// Platform capture devices.
    media_devices: Rc<dyn platform::MediaDevices>,

    /// Configuration applied to created rooms.
    options: RoomOptions,

    /// Credentials shared with created rooms.
    credentials: Rc<Credentials>,
}

impl CallsClient {
    /// Creates a new [`CallsClient`] over the provided transport and
    /// platform capabilities.
    #[must_use]
    pub fn new(
        transport: Rc<dyn SignalingTransport>,
        peer_factory: PeerConnectionFactory,
        media_devices: Rc<dyn platform::MediaDevices>,
        options: RoomOptions,
    ) -> Self {
        Self {
            signaling: SignalingClient::new(transport),
            peer_factory,
            media_devices,
            options,
            credentials: Rc::new(Credentials::default()),
        }
    }

    /// Returns the future driving signaling dispatch of this client.
    ///
    /// Must be polled (spawned) for requests and subscriptions of this
    /// client and all its rooms to make progress.
    pub fn run(&self) -> LocalBoxFuture<'static, ()> {
        Rc::clone(&self.signaling).run()
    }

    /// Authenticates as the provided username, storing the returned
    /// credentials for subsequent requests.
    ///
    /// # Errors
    ///
    /// With [`ClientError::Signaling`] if the request fails, or with
    /// [`ClientError::UnexpectedResponse`] on a malformed response.
    pub async fn authorize(&self, username: &str) -> Result<AuthInfo> {
        let response = self
            .signaling
            .request(ClientMsg::Auth {
                username: username.to_owned(),
            })
            .await
            .map_err(|e| {
                tracerr::new!(ClientError::Signaling(e.into_inner()))
            })?;

        match response {
            ServerMsg::Auth(info) => {
                self.credentials
                    .set(info.token.clone(), info.user_id.clone());
                Ok(info)
            }
            _ => Err(tracerr::new!(ClientError::UnexpectedResponse("auth"))),
        }
    }

    /// Injects externally obtained credentials.
    pub fn set_token(&self, token: String, user_id: String) {
        self.credentials.set(token, user_id);
    }

    /// Returns the credentials store of this client.
    #[must_use]
    pub fn credentials(&self) -> Rc<Credentials> {
        Rc::clone(&self.credentials)
    }

    /// Creates a new room on the backend.
    ///
    /// # Errors
    ///
    /// With [`ClientError::Signaling`] if the request fails, or with
    /// [`ClientError::UnexpectedResponse`] on a malformed response.
    pub async fn create_room(
        &self,
        name: Option<String>,
        metadata: Value,
    ) -> Result<RoomId> {
        let response = self
            .signaling
            .request(ClientMsg::CreateRoom { name, metadata })
            .await
            .map_err(|e| {
                tracerr::new!(ClientError::Signaling(e.into_inner()))
            })?;

        match response {
            ServerMsg::CreateRoom(created) => Ok(created.room_id),
            _ => Err(tracerr::new!(ClientError::UnexpectedResponse(
                "create-room",
            ))),
        }
    }

    /// Instantiates a new [`Room`] sharing this client's signaling channel
    /// and platform capabilities.
    #[must_use]
    pub fn init_room(&self) -> Room {
        Room::new(
            Rc::clone(&self.signaling),
            Rc::clone(&self.peer_factory),
            Rc::clone(&self.media_devices),
            Rc::clone(&self.credentials),
            self.options.clone(),
        )
    }
}
