//! End-to-end room tests driven through the registry, with mock sinks
//! standing in for the transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use trailsync_core::config::{SessionConfigUpdate, TimerConfigUpdate};
use trailsync_core::envelope::{
    ClientCommand, ClientEnvelope, Header, Phase, ResponseBody, ServerEnvelope,
};
use trailsync_core::error::RoomError;
use trailsync_room::{Connection, RoomRegistry};
use trailsync_timer::TimerCallbacks;
use trailsync_test_support::{CollectingSink, FixedClock, StalledSink};

struct TestClient {
    conn: Arc<Connection>,
    delivered: Arc<Mutex<Vec<ServerEnvelope>>>,
}

fn open_client(registry: &Arc<RoomRegistry>) -> TestClient {
    let sink = CollectingSink::new();
    let delivered = sink.delivered();
    let conn = registry.open_connection(Box::new(sink));
    TestClient { conn, delivered }
}

fn open_stalled_client(registry: &Arc<RoomRegistry>) -> Arc<Connection> {
    registry.open_connection(Box::new(StalledSink))
}

fn envelope(user_id: &str, room_id: &str, command: ClientCommand) -> ClientEnvelope {
    ClientEnvelope {
        header: Header {
            protocol: String::new(),
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
        },
        command,
    }
}

impl TestClient {
    fn protocols(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|frame| frame.header.protocol.clone())
            .collect()
    }

    fn count_protocol(&self, protocol: &str) -> usize {
        self.protocols().iter().filter(|p| *p == protocol).count()
    }
}

/// Lets the dispatcher, drain, and scheduler tasks catch up without
/// advancing paused time.
async fn settle() {
    for _ in 0..40 {
        tokio::task::yield_now().await;
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn new_registry() -> Arc<RoomRegistry> {
    RoomRegistry::new(Arc::new(FixedClock::default()))
}

#[tokio::test(start_paused = true)]
async fn test_create_and_join_share_roster() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(registry.room_count(), 1);
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();
    assert_eq!(room.host_id().as_deref(), Some("u1"));

    let bob = open_client(&registry);
    registry
        .route(
            &bob.conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(room.hiker_count(), 2);
    let roster = room.roster_snapshot();
    assert!(roster["u1"].is_host);
    assert!(!roster["u2"].is_host);

    {
        let frames = alice.delivered.lock().unwrap();
        assert!(matches!(
            &frames[0].response,
            ResponseBody::RoomCreated { message, .. } if message == "room created"
        ));
    }
    // The creator hears about the join; the joiner gets the full welcome.
    assert_eq!(alice.count_protocol("join"), 1);
    {
        let frames = bob.delivered.lock().unwrap();
        assert!(matches!(
            &frames[0].response,
            ResponseBody::JoinWelcome { hikers, message, .. }
                if hikers.len() == 2 && message == "joined room"
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_room_is_answered_on_the_wire() {
    let registry = new_registry();
    let client = open_client(&registry);
    registry
        .route(
            &client.conn,
            envelope("u1", "no-such-room", ClientCommand::Join { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(registry.room_count(), 0);
    assert!(client.conn.room_id().is_none());
    let frames = client.delivered.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.protocol, "Error");
    assert!(matches!(
        &frames[0].response,
        ResponseBody::ErrorNotice { message } if message == "Room ID Does Not Exist"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_pause_penalty_applies_to_hiker_and_session() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    let bob = open_client(&registry);
    registry
        .route(
            &bob.conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Start))
        .await
        .unwrap();
    settle().await;
    assert_eq!(room.timer_snapshot().phase, Phase::Focus);

    // Drive progress deterministically instead of waiting out real ticks.
    for _ in 0..100 {
        room.on_tick().await;
    }
    settle().await;
    let session = room.session_snapshot();
    assert!(close(session.distance, 2.0), "distance {}", session.distance);
    let roster = room.roster_snapshot();
    assert!(close(roster["u2"].distance, 1.0));

    registry
        .route(&bob.conn, envelope("u2", &room_id, ClientCommand::Pause))
        .await
        .unwrap();
    settle().await;

    // First strike: 10% off the collective and the pauser's distance.
    let session = room.session_snapshot();
    assert_eq!(session.strikes, 1);
    assert!(close(session.distance, 1.8), "distance {}", session.distance);
    let roster = room.roster_snapshot();
    assert!(roster["u2"].is_paused);
    assert!(close(roster["u2"].distance, 0.9));
    assert!(close(roster["u1"].distance, 1.0));
    assert_eq!(bob.count_protocol("pause"), 1);
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::PauseNotice { paused_hiker_id, .. } if paused_hiker_id == "u2"
    )));

    // A second pause while already paused is rejected without mutation.
    registry
        .route(&bob.conn, envelope("u2", &room_id, ClientCommand::Pause))
        .await
        .unwrap();
    settle().await;
    let session = room.session_snapshot();
    assert_eq!(session.strikes, 1);
    assert!(close(session.distance, 1.8));

    // Paused hikers accrue nothing.
    for _ in 0..10 {
        room.on_tick().await;
    }
    settle().await;
    let roster = room.roster_snapshot();
    assert!(close(roster["u1"].distance, 1.1));
    assert!(close(roster["u2"].distance, 0.9));
    assert!(close(room.session_snapshot().distance, 1.9));

    registry
        .route(&bob.conn, envelope("u2", &room_id, ClientCommand::Resume))
        .await
        .unwrap();
    settle().await;
    assert!(!room.roster_snapshot()["u2"].is_paused);
    assert_eq!(alice.count_protocol("resume"), 1);

    // Resuming an unpaused hiker changes nothing.
    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Resume))
        .await
        .unwrap();
    settle().await;
    assert_eq!(room.session_snapshot().strikes, 1);
    assert_eq!(bob.count_protocol("resume"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_resets_session_timer_and_hikers() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Start))
        .await
        .unwrap();
    settle().await;
    for _ in 0..30 {
        room.on_tick().await;
    }
    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Pause))
        .await
        .unwrap();
    settle().await;
    assert!(room.session_snapshot().distance > 0.0);

    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::End))
        .await
        .unwrap();
    settle().await;

    let session = room.session_snapshot();
    assert!(close(session.distance, 0.0));
    assert_eq!(session.level, 1);
    assert_eq!(session.strikes, 0);
    assert_eq!(session.tokens_earned, 0);

    let timer = room.timer_snapshot();
    assert_eq!(timer.phase, Phase::Idle);
    assert!(!timer.is_running);
    assert_eq!(timer.completed_sets, 0);

    let roster = room.roster_snapshot();
    assert!(close(roster["u1"].distance, 0.0));
    assert!(!roster["u1"].is_paused);
    assert!(!roster["u1"].is_ready);
    assert_eq!(alice.count_protocol("end"), 1);
    // The room survives an end; membership is intact.
    assert_eq!(room.hiker_count(), 1);
    assert_eq!(registry.room_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_config_is_host_only() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    let bob = open_client(&registry);
    registry
        .route(
            &bob.conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    let update = ClientCommand::UpdateConfig {
        timer: Some(TimerConfigUpdate {
            focus_time: Some(600),
            short_break_time: None,
            long_break_time: None,
            sets: None,
            pace: None,
            auto_continue: None,
        }),
        session: Some(SessionConfigUpdate {
            name: Some("morning hike".to_owned()),
        }),
    };

    registry
        .route(&bob.conn, envelope("u2", &room_id, update.clone()))
        .await
        .unwrap();
    settle().await;
    assert_eq!(room.timer_snapshot().focus_time, 1500);
    assert!(bob.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::Failure { message, .. } if message == "only the host can update settings"
    )));

    registry
        .route(&alice.conn, envelope("u1", &room_id, update))
        .await
        .unwrap();
    settle().await;
    assert_eq!(room.timer_snapshot().focus_time, 600);
    assert_eq!(room.session_snapshot().name, "morning hike");
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::ConfigUpdated { message, .. } if message == "Session Updated"
    )));
    assert!(bob.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::ConfigUpdated { message, .. } if message == "Settings Updated"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_joining_running_session_is_auto_ready() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Start))
        .await
        .unwrap();
    settle().await;

    let bob = open_client(&registry);
    registry
        .route(
            &bob.conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    let roster = room.roster_snapshot();
    assert!(roster["u2"].is_ready);
    assert!(!roster["u1"].is_ready);
}

#[tokio::test(start_paused = true)]
async fn test_leave_promotes_earliest_surviving_joiner() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    let bob = open_client(&registry);
    let carol = open_client(&registry);
    registry
        .route(
            &bob.conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    registry
        .route(
            &carol.conn,
            envelope("u3", &room_id, ClientCommand::Join { username: "carol".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(room.hiker_count(), 3);

    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Leave))
        .await
        .unwrap();
    settle().await;

    assert_eq!(room.hiker_count(), 2);
    assert_eq!(room.host_id().as_deref(), Some("u2"));
    assert!(alice.conn.room_id().is_none());
    assert!(bob.delivered.lock().unwrap().iter().any(|frame| {
        frame.header.protocol == "newHost"
            && matches!(
                &frame.response,
                ResponseBody::Roster { message, .. } if message == "bob is the new host"
            )
    }));
    assert_eq!(carol.count_protocol("leave"), 1);

    // The last hiker out closes the room.
    registry
        .route(&bob.conn, envelope("u2", &room_id, ClientCommand::Leave))
        .await
        .unwrap();
    registry
        .route(&carol.conn, envelope("u3", &room_id, ClientCommand::Leave))
        .await
        .unwrap();
    settle().await;
    assert_eq!(registry.room_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_acts_as_leave() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    let bob = open_client(&registry);
    registry
        .route(
            &bob.conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    registry.disconnect(&bob.conn).await;
    settle().await;

    assert_eq!(room.hiker_count(), 1);
    assert!(bob.conn.room_id().is_none());
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::Roster { message, .. } if message == "Hiker bob has left"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_is_evicted_after_three_drops() {
    let registry = RoomRegistry::with_outbox_capacity(Arc::new(FixedClock::default()), 1);
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    let bob_conn = open_stalled_client(&registry);
    registry
        .route(
            &bob_conn,
            envelope("u2", &room_id, ClientCommand::Join { username: "bob".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(room.hiker_count(), 2);

    // Bob's drain is wedged on its first frame; his queue holds one more.
    // Each subsequent broadcast times out and counts a drop; the third
    // drop evicts him.
    for _ in 0..4 {
        registry
            .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Ready))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(room.hiker_count(), 1);
    assert_eq!(room.host_id().as_deref(), Some("u1"));
    assert_eq!(registry.room_count(), 1);
    assert_eq!(alice.count_protocol("kicked"), 1);
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::Roster { message, .. } if message == "bob has been kicked from the room"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_evicting_last_hiker_closes_room() {
    let registry = RoomRegistry::with_outbox_capacity(Arc::new(FixedClock::default()), 1);
    let conn = open_stalled_client(&registry);
    registry
        .route(
            &conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = conn.room_id().unwrap();
    assert_eq!(registry.room_count(), 1);

    // Direct replies back up behind the wedged drain until the host is
    // evicted; an empty room deregisters itself.
    for _ in 0..4 {
        registry
            .route(&conn, envelope("u1", &room_id, ClientCommand::Ready))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(registry.room_count(), 0);
    // A further frame is answered with the unknown-room error; the wedged
    // connection cannot even take that, which surfaces as a delivery failure.
    let err = registry
        .route(&conn, envelope("u1", &room_id, ClientCommand::Ready))
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::DeliveryFailed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_second_create_is_rejected_without_leaking_a_room() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    assert_eq!(registry.room_count(), 1);

    // A second create on the same connection must not allocate a new room
    // or rebind the connection away from its existing membership.
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(registry.room_count(), 1);
    assert_eq!(alice.conn.room_id().unwrap(), room_id);
    assert_eq!(registry.room(&room_id).unwrap().hiker_count(), 1);
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::Failure { message, .. } if message == "already in a room"
    )));

    // With no orphaned membership left behind, disconnecting empties the
    // one room and deregisters it.
    registry.disconnect(&alice.conn).await;
    settle().await;
    assert_eq!(registry.room_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tick_during_break_broadcasts_without_accruing_distance() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();

    registry
        .route(
            &alice.conn,
            envelope(
                "u1",
                &room_id,
                ClientCommand::UpdateConfig {
                    timer: Some(TimerConfigUpdate {
                        focus_time: Some(100),
                        short_break_time: Some(20),
                        long_break_time: Some(50),
                        sets: Some(2),
                        pace: Some(3.6),
                        auto_continue: None,
                    }),
                    session: None,
                },
            ),
        )
        .await
        .unwrap();
    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::Start))
        .await
        .unwrap();
    settle().await;

    // Ride out the focus phase into the first break.
    tokio::time::sleep(Duration::from_secs(105)).await;
    settle().await;
    assert_eq!(room.timer_snapshot().phase, Phase::Break);

    let session_distance = room.session_snapshot().distance;
    let hiker_distance = room.roster_snapshot()["u1"].distance;
    let updates_before = alice.count_protocol("update");

    for _ in 0..5 {
        room.on_tick().await;
    }
    settle().await;

    // Snapshots still go out, but nothing accrues outside of focus.
    assert_eq!(alice.count_protocol("update"), updates_before + 5);
    assert!(close(room.session_snapshot().distance, session_distance));
    assert!(close(room.roster_snapshot()["u1"].distance, hiker_distance));
}

#[tokio::test(start_paused = true)]
async fn test_extra_set_and_skip_break_notify_the_room() {
    let registry = new_registry();
    let alice = open_client(&registry);
    registry
        .route(
            &alice.conn,
            envelope("u1", "", ClientCommand::Create { username: "alice".to_owned() }),
        )
        .await
        .unwrap();
    settle().await;
    let room_id = alice.conn.room_id().unwrap();
    let room = registry.room(&room_id).unwrap();
    let sets_before = room.timer_snapshot().sets;

    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::ExtraSet))
        .await
        .unwrap();
    registry
        .route(&alice.conn, envelope("u1", &room_id, ClientCommand::SkipBreak))
        .await
        .unwrap();
    settle().await;

    assert_eq!(room.timer_snapshot().sets, sets_before + 1);
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::Notice { message, .. } if message == "Added full set, More Rewards!"
    )));
    assert!(alice.delivered.lock().unwrap().iter().any(|frame| matches!(
        &frame.response,
        ResponseBody::Notice { message, .. } if message == "Skipping Break"
    )));
}
