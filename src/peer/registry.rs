//! Identity registry of the shared peer connection.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use futures::stream::LocalBoxStream;
use medea_reactive::ObservableCell;

use crate::rpc::SessionId;

/// Application identity of one remote track.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackIdentity {
    /// Session publishing the track.
    pub session_id: SessionId,

    /// Publisher-side name of the track.
    pub track_name: String,
}

/// Actual data of the [`TrackRegistry`].
#[derive(Default)]
struct Inner {
    /// Media line identifier to the identity of the track it carries.
    ///
    /// Entries are pre-registered from the SDP text of a pull answer before
    /// the remote description is applied, so `track` events can always be
    /// resolved; they are never mutated afterwards, only added or wiped in
    /// bulk on leave.
    mids: HashMap<String, TrackIdentity>,

    /// IDs of the local tracks already covered by a publish offer.
    published: HashSet<String>,

    /// Per-remote-session names of the tracks already requested, guarding
    /// against duplicate pulls.
    pulled: HashMap<SessionId, HashSet<String>>,
}

/// Storage of the associations between transport-level track identifiers
/// and application identities, plus the published/pulled bookkeeping sets.
///
/// Pure data structure: performs no I/O.
pub struct TrackRegistry {
    /// Data of this registry.
    inner: RefCell<Inner>,

    /// Number of mappings recorded so far; bumped on every new mapping so
    /// buffered `track` events can be re-resolved.
    revision: ObservableCell<u64>,
}

impl TrackRegistry {
    /// Creates a new empty [`TrackRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner::default()),
            revision: ObservableCell::new(0),
        }
    }

    /// Records an association of the provided [`mid`] with the provided
    /// identity.
    ///
    /// Idempotent: re-recording the same `mid` overwrites silently. Empty
    /// `mid`s are rejected with a log entry.
    ///
    /// [`mid`]: https://w3.org/TR/webrtc/#dom-rtptransceiver-mid
    pub fn record_mapping(
        &self,
        mid: String,
        session_id: SessionId,
        track_name: String,
    ) {
        if mid.is_empty() {
            log::warn!("Refusing to map an empty mid");
            return;
        }

        let identity = TrackIdentity {
            session_id,
            track_name,
        };
        let changed = self
            .inner
            .borrow_mut()
            .mids
            .insert(mid, identity)
            .is_none();
        if changed {
            let next = self.revision.get() + 1;
            self.revision.set(next);
        }
    }

    /// Resolves the provided [`mid`] into the identity of the track it
    /// carries.
    ///
    /// [`mid`]: https://w3.org/TR/webrtc/#dom-rtptransceiver-mid
    #[must_use]
    pub fn resolve(&self, mid: &str) -> Option<TrackIdentity> {
        self.inner.borrow().mids.get(mid).cloned()
    }

    /// Returns the number of recorded mappings.
    #[must_use]
    pub fn mappings_len(&self) -> usize {
        self.inner.borrow().mids.len()
    }

    /// Subscribes to additions of new mappings.
    pub fn on_mapping_added(&self) -> LocalBoxStream<'static, u64> {
        self.revision.subscribe()
    }

    /// Marks the provided local track ID as covered by a publish offer.
    pub fn mark_published(&self, track_id: String) {
        let _ = self.inner.borrow_mut().published.insert(track_id);
    }

    /// Removes the provided local track ID from the published set.
    pub fn unmark_published(&self, track_id: &str) {
        let _ = self.inner.borrow_mut().published.remove(track_id);
    }

    /// Indicates whether the provided local track ID is already covered by
    /// a publish offer.
    #[must_use]
    pub fn is_published(&self, track_id: &str) -> bool {
        self.inner.borrow().published.contains(track_id)
    }

    /// Marks the provided (session, track name) pair as requested.
    pub fn mark_pulled(&self, session_id: SessionId, track_name: String) {
        let _ = self
            .inner
            .borrow_mut()
            .pulled
            .entry(session_id)
            .or_insert_with(HashSet::new)
            .insert(track_name);
    }

    /// Indicates whether the provided (session, track name) pair has
    /// already been requested.
    #[must_use]
    pub fn has_pulled(&self, session_id: &SessionId, track_name: &str) -> bool {
        self.inner
            .borrow()
            .pulled
            .get(session_id)
            .map_or(false, |names| names.contains(track_name))
    }

    /// Wipes all mappings and bookkeeping sets.
    ///
    /// Called exactly once per session, on leave.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.mids.clear();
        inner.published.clear();
        inner.pulled.clear();
    }
}

impl Default for TrackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
