//! Negotiation state machine behavior, driven through the public API
//! against fake platform and transport capabilities.

mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use futures::{
    executor::LocalPool, join, task::LocalSpawnExt as _, StreamExt as _,
};
use serde_json::json;

use calls_client::{
    media::MediaKind,
    peer::{self, NegotiationState, TrackRegistry},
    platform::{
        PeerConnectionFactory, RtcPeerConnection, SdpKind,
        SessionDescription,
    },
    rpc::{
        protocol::{
            Ack, IceServerList, JoinedRoom, ParticipantInfo, PublishedTracks,
            PulledTracks, RenegotiationAck, SessionState, TrackStatusAck,
            UnpublishedTrack,
        },
        ClientMsg, ServerMsg, SignalingClient, SignalingTransport,
    },
    CallsClient, Room, RoomEvent, RoomOptions,
};

use common::{
    until, yield_now, FakeDevices, FakePeer, FakeTrack, FakeTransport,
};

/// Everything a negotiation test needs.
#[allow(dead_code)]
struct TestBed {
    pool: LocalPool,
    transport: Rc<FakeTransport>,
    peers: Rc<RefCell<Vec<Rc<FakePeer>>>>,
    devices: Rc<FakeDevices>,
    client: CallsClient,
    room: Room,
}

fn is_pull(msg: &ClientMsg) -> bool {
    matches!(msg, ClientMsg::PullTracks { .. })
}

fn is_publish(msg: &ClientMsg) -> bool {
    matches!(msg, ClientMsg::PublishTracks { .. })
}

fn is_renegotiate(msg: &ClientMsg) -> bool {
    matches!(msg, ClientMsg::RenegotiateSession { .. })
}

/// Responder covering every operation except `pull-tracks`, which tests
/// script themselves.
fn base_responder(
    other_sessions: Vec<ParticipantInfo>,
) -> impl FnMut(&ClientMsg) -> Vec<ServerMsg> {
    move |msg| match msg {
        ClientMsg::JoinRoom { .. } => {
            vec![ServerMsg::JoinRoom(JoinedRoom {
                session_id: "s1".into(),
                other_sessions: other_sessions.clone(),
            })]
        }
        ClientMsg::GetIceServers => {
            vec![ServerMsg::GetIceServers(IceServerList::default())]
        }
        ClientMsg::PublishTracks { offer, .. } => {
            vec![ServerMsg::PublishTracks(PublishedTracks {
                session_description: SessionDescription {
                    kind: SdpKind::Answer,
                    sdp: offer.sdp.clone(),
                },
            })]
        }
        ClientMsg::RenegotiateSession { .. } => {
            vec![ServerMsg::RenegotiateSession(RenegotiationAck::default())]
        }
        ClientMsg::UnpublishTrack {
            session_description, ..
        } => vec![ServerMsg::UnpublishTrack(UnpublishedTrack {
            session_description: Some(SessionDescription {
                kind: SdpKind::Answer,
                sdp: session_description.sdp.clone(),
            }),
        })],
        ClientMsg::UpdateTrackStatus { .. } => {
            vec![ServerMsg::UpdateTrackStatus(TrackStatusAck::default())]
        }
        ClientMsg::GetSessionState { .. } => {
            vec![ServerMsg::GetSessionState(SessionState::default())]
        }
        ClientMsg::LeaveRoom { .. } => {
            vec![ServerMsg::LeaveRoom(Ack::default())]
        }
        _ => Vec::new(),
    }
}

/// Plain pull response without any renegotiation demand.
fn plain_pull_response() -> ServerMsg {
    ServerMsg::PullTracks(PulledTracks::default())
}

/// Pull response carrying a remote offer for the provided media line.
fn renegotiating_pull_response(mid: &str) -> ServerMsg {
    ServerMsg::PullTracks(PulledTracks {
        session_description: Some(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("v=0\r\na=mid:{}\r\n", mid),
        }),
        requires_immediate_renegotiation: true,
    })
}

fn setup(tracks: Vec<Rc<FakeTrack>>) -> TestBed {
    let pool = LocalPool::new();
    let spawner = pool.spawner();

    let transport = FakeTransport::new();
    let peers: Rc<RefCell<Vec<Rc<FakePeer>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let factory: PeerConnectionFactory = {
        let peers = Rc::clone(&peers);
        Rc::new(move |_ice| {
            let peer = FakePeer::new();
            peers.borrow_mut().push(Rc::clone(&peer));
            Ok(peer as Rc<dyn RtcPeerConnection>)
        })
    };
    let devices = FakeDevices::new(tracks);

    let options = RoomOptions {
        poll_interval: Duration::from_secs(600),
        ..RoomOptions::default()
    };
    let client = CallsClient::new(
        Rc::clone(&transport) as Rc<dyn SignalingTransport>,
        factory,
        Rc::clone(&devices) as Rc<dyn calls_client::platform::MediaDevices>,
        options,
    );
    let room = client.init_room();

    spawner.spawn_local(client.run()).unwrap();
    spawner.spawn_local(room.run()).unwrap();

    TestBed {
        pool,
        transport,
        peers,
        devices,
        client,
        room,
    }
}

#[test]
fn publish_is_idempotent() {
    let mut bed = setup(vec![FakeTrack::new("v1", MediaKind::Video)]);
    bed.transport.set_responder(base_responder(Vec::new()));

    let room = &bed.room;
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();
    assert_eq!(bed.transport.sent_count(is_publish), 1);

    bed.pool.run_until(room.publish_tracks()).unwrap();

    // Re-publishing the same set performs no further round trips.
    assert_eq!(bed.transport.sent_count(is_publish), 1);
    assert_eq!(bed.peers.borrow()[0].offers_created.get(), 1);
}

#[test]
fn publish_batches_tracks_into_one_offer() {
    let mut bed = setup(vec![
        FakeTrack::new("a1", MediaKind::Audio),
        FakeTrack::new("v1", MediaKind::Video),
    ]);
    bed.transport.set_responder(base_responder(Vec::new()));

    bed.pool
        .run_until(bed.room.join("r1".into(), json!({})))
        .unwrap();

    assert_eq!(bed.transport.sent_count(is_publish), 1);
    assert_eq!(bed.peers.borrow()[0].offers_created.get(), 1);
    let batched = bed
        .transport
        .sent
        .borrow()
        .iter()
        .find_map(|msg| match msg {
            ClientMsg::PublishTracks { tracks, .. } => Some(tracks.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(batched, 2);
}

#[test]
fn pulls_are_processed_fifo_one_at_a_time() {
    let mut bed = setup(Vec::new());
    bed.transport.set_responder(base_responder(Vec::new()));

    let room = &bed.room;
    let transport = Rc::clone(&bed.transport);
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();

    bed.pool.run_until(async {
        let pull_a = room.pull_track("s2".into(), "a".into());
        let pull_b = room.pull_track("s2".into(), "b".into());
        let pull_c = room.pull_track("s3".into(), "c".into());

        let control = async {
            for expected in 1..=3 {
                until(|| transport.sent_count(is_pull) == expected).await;
                // Give every other task ample chances to over-send.
                for _ in 0..50 {
                    yield_now().await;
                }
                assert_eq!(transport.sent_count(is_pull), expected);
                transport.push(plain_pull_response());
            }
        };

        let (ra, rb, rc, ()) = join!(pull_a, pull_b, pull_c, control);
        ra.unwrap();
        rb.unwrap();
        rc.unwrap();
    });

    let order: Vec<_> = bed
        .transport
        .sent
        .borrow()
        .iter()
        .filter_map(|msg| match msg {
            ClientMsg::PullTracks {
                remote_session_id,
                track_name,
                ..
            } => Some((remote_session_id.0.clone(), track_name.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ("s2".to_owned(), "a".to_owned()),
            ("s2".to_owned(), "b".to_owned()),
            ("s3".to_owned(), "c".to_owned()),
        ],
    );
}

#[test]
fn duplicate_pulls_share_one_request() {
    let mut bed = setup(Vec::new());
    bed.transport.set_responder(base_responder(Vec::new()));

    let room = &bed.room;
    let transport = Rc::clone(&bed.transport);
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();

    bed.pool.run_until(async {
        let first = room.pull_track("s2".into(), "video".into());
        let second = room.pull_track("s2".into(), "video".into());

        let control = async {
            until(|| transport.sent_count(is_pull) == 1).await;
            for _ in 0..50 {
                yield_now().await;
            }
            assert_eq!(transport.sent_count(is_pull), 1);
            transport.push(plain_pull_response());
        };

        let (r1, r2, ()) = join!(first, second, control);
        r1.unwrap();
        r2.unwrap();
    });

    assert_eq!(bed.transport.sent_count(is_pull), 1);

    // A later pull of the same pair is a no-op as well.
    bed.pool
        .run_until(bed.room.pull_track("s2".into(), "video".into()))
        .unwrap();
    assert_eq!(bed.transport.sent_count(is_pull), 1);
}

#[test]
fn mapping_is_registered_before_track_events_resolve() {
    let mut bed = setup(Vec::new());
    bed.transport.set_responder({
        let mut base = base_responder(Vec::new());
        move |msg| match msg {
            ClientMsg::PullTracks { .. } => {
                vec![renegotiating_pull_response("1")]
            }
            other => base(other),
        }
    });

    let room = &bed.room;
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();
    bed.peers.borrow()[0].fire_track_on_remote_offer.set(true);

    let mut events = room.subscribe();
    bed.pool.run_until(async {
        room.pull_track("s2".into(), "v2".into()).await.unwrap();

        match events.next().await.unwrap() {
            RoomEvent::RemoteTrackAdded(track) => {
                assert_eq!(track.session_id().0, "s2");
                assert_eq!(track.track_name(), "v2");
                assert_eq!(track.mid(), "1");
            }
            _ => panic!("expected a remote track event"),
        }
    });
}

#[test]
fn renegotiation_triggers_are_dropped_while_a_cycle_is_in_flight() {
    let mut pool = LocalPool::new();
    let spawner = pool.spawner();

    let transport = FakeTransport::new();
    // `renegotiate-session` responses are withheld and pushed manually.
    transport.set_responder({
        move |msg| match msg {
            ClientMsg::PullTracks { .. } => {
                vec![renegotiating_pull_response("9")]
            }
            _ => Vec::new(),
        }
    });

    let signaling = SignalingClient::new(
        Rc::clone(&transport) as Rc<dyn SignalingTransport>
    );
    spawner.spawn_local(Rc::clone(&signaling).run()).unwrap();

    let fake_peer = FakePeer::new();
    let negotiator = peer::PeerConnection::new(
        Rc::clone(&fake_peer) as Rc<dyn RtcPeerConnection>,
        Rc::clone(&signaling),
        Rc::new(TrackRegistry::new()),
        "r1".into(),
        "s1".into(),
    );

    pool.run_until(async {
        let pull = negotiator.pull_track("s2".into(), "v".into());

        let control = async {
            until(|| transport.sent_count(is_renegotiate) == 1).await;
            assert_eq!(
                negotiator.negotiation_state(),
                NegotiationState::AnswerPending,
            );

            // The concurrent trigger is dropped, not queued.
            let ran = negotiator.renegotiate().await.unwrap();
            assert!(!ran);

            transport
                .push(ServerMsg::RenegotiateSession(RenegotiationAck::default()));
        };

        let (pull_result, ()) = join!(pull, control);
        pull_result.unwrap();
    });

    // Exactly one answer cycle ran, and the lock is released.
    assert_eq!(fake_peer.answers_created.get(), 1);
    assert_eq!(transport.sent_count(is_renegotiate), 1);
    assert_eq!(negotiator.negotiation_state(), NegotiationState::Idle);
}

#[test]
fn leave_clears_state_and_rejoin_starts_from_scratch() {
    let mut bed = setup(vec![FakeTrack::new("v1", MediaKind::Video)]);
    let remote = ParticipantInfo {
        session_id: "s2".into(),
        published_tracks: vec!["v2".to_owned()],
        metadata: json!(null),
    };
    bed.transport.set_responder({
        let mut base = base_responder(vec![remote]);
        move |msg| match msg {
            ClientMsg::PullTracks { .. } => vec![plain_pull_response()],
            other => base(other),
        }
    });

    let room = &bed.room;
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();
    assert_eq!(bed.transport.sent_count(is_publish), 1);
    assert_eq!(bed.transport.sent_count(is_pull), 1);

    bed.pool.run_until(room.leave()).unwrap();
    assert!(bed.peers.borrow()[0].closed.get());
    assert_eq!(
        bed.transport
            .sent_count(|m| matches!(m, ClientMsg::LeaveRoom { .. })),
        1,
    );
    assert!(room.session_id().is_none());

    // Unpublished-then-removed tracks need a fresh ID to be re-published.
    *bed.devices.tracks.borrow_mut() =
        vec![FakeTrack::new("v1-next", MediaKind::Video)];

    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();

    // The previous session left no residue: everything is renegotiated
    // and repulled from a clean slate on a fresh connection.
    assert_eq!(bed.peers.borrow().len(), 2);
    assert_eq!(bed.transport.sent_count(is_publish), 2);
    assert_eq!(bed.transport.sent_count(is_pull), 2);
}

#[test]
fn unpublish_runs_sequentially_and_clears_published_marks() {
    let mut bed = setup(vec![
        FakeTrack::new("a1", MediaKind::Audio),
        FakeTrack::new("v1", MediaKind::Video),
    ]);
    bed.transport.set_responder(base_responder(Vec::new()));

    let room = &bed.room;
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();

    bed.pool.run_until(room.unpublish_all(None, false)).unwrap();

    let unpublished = bed
        .transport
        .sent_count(|m| matches!(m, ClientMsg::UnpublishTrack { .. }));
    assert_eq!(unpublished, 2);
    assert!(bed.peers.borrow()[0]
        .transceivers
        .borrow()
        .iter()
        .all(|t| t.stopped.get()));

    // Nothing is live to publish anymore.
    bed.pool.run_until(room.publish_tracks()).unwrap();
    assert_eq!(bed.transport.sent_count(is_publish), 1);
}

#[test]
fn toggle_media_reports_track_status() {
    let mut bed = setup(vec![
        FakeTrack::new("a1", MediaKind::Audio),
        FakeTrack::new("v1", MediaKind::Video),
    ]);
    bed.transport.set_responder(base_responder(Vec::new()));

    let room = &bed.room;
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();

    bed.pool
        .run_until(room.toggle_media(None, Some(false)))
        .unwrap();

    let updates: Vec<_> = bed
        .transport
        .sent
        .borrow()
        .iter()
        .filter_map(|msg| match msg {
            ClientMsg::UpdateTrackStatus {
                track_id,
                kind,
                enabled,
                ..
            } => Some((track_id.clone(), *kind, *enabled)),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![("v1".to_owned(), MediaKind::Video, false)]);

    let video = &bed.devices.tracks.borrow()[1];
    assert!(!video.enabled.get());
}

#[test]
fn capture_failure_fails_join_and_rolls_back() {
    let mut bed = setup(Vec::new());
    bed.transport.set_responder(base_responder(Vec::new()));
    bed.devices.fail.set(true);

    let room = &bed.room;
    let result = bed.pool.run_until(room.join("r1".into(), json!({})));

    assert!(result.is_err());
    assert!(room.session_id().is_none());
    assert!(bed.peers.borrow()[0].closed.get());

    // The failed join is recoverable.
    bed.devices.fail.set(false);
    *bed.devices.tracks.borrow_mut() =
        vec![FakeTrack::new("v1", MediaKind::Video)];
    bed.pool
        .run_until(room.join("r1".into(), json!({})))
        .unwrap();
    assert_eq!(bed.transport.sent_count(is_publish), 1);
}

#[test]
fn join_publish_pull_end_to_end() {
    let mut bed = setup(vec![FakeTrack::new("v1", MediaKind::Video)]);
    bed.transport.set_responder({
        let mut base = base_responder(Vec::new());
        move |msg| match msg {
            ClientMsg::PullTracks { .. } => {
                vec![renegotiating_pull_response("1")]
            }
            other => base(other),
        }
    });

    let room = &bed.room;
    bed.pool
        .run_until(room.join("R1".into(), json!({})))
        .unwrap();
    assert_eq!(room.room_id().unwrap().0, "R1");
    assert_eq!(room.session_id().unwrap().0, "s1");

    // One offer with exactly one track entry went out, and its answer was
    // applied.
    {
        let sent = bed.transport.sent.borrow();
        let (offer_mid, track_name) = sent
            .iter()
            .find_map(|msg| match msg {
                ClientMsg::PublishTracks { tracks, .. } => Some((
                    tracks[0].mid.clone(),
                    tracks[0].track_name.clone(),
                )),
                _ => None,
            })
            .unwrap();
        assert_eq!(offer_mid, "0");
        assert_eq!(track_name, "v1");
    }
    let peer = Rc::clone(&bed.peers.borrow()[0]);
    assert_eq!(peer.remote_descriptions.borrow().len(), 1);
    peer.fire_track_on_remote_offer.set(true);

    // Another session publishes "v2"; discovery picks it up.
    let mut events = room.subscribe();
    let transport = Rc::clone(&bed.transport);
    bed.pool.run_until(async {
        transport.push(ServerMsg::TrackPublished {
            session_id: "S2".into(),
            track_name: "v2".to_owned(),
        });

        loop {
            match events.next().await.unwrap() {
                RoomEvent::RemoteTrackAdded(track) => {
                    assert_eq!(track.session_id().0, "S2");
                    assert_eq!(track.track_name(), "v2");
                    assert_eq!(track.mid(), "1");
                    break;
                }
                _ => continue,
            }
        }
    });

    assert_eq!(bed.transport.sent_count(is_pull), 1);
    assert_eq!(bed.transport.sent_count(is_renegotiate), 1);
    // The SFU's offer was applied and answered on the shared connection.
    assert_eq!(peer.answers_created.get(), 1);
}
