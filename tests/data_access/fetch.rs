//! Fetch cases: invalid, remote-only, local-only and reconciling streams.

use data_access::rooms::{Room, RoomRequests};
use data_access::{
    AccessRequest, DataAccess, DataAccessError, LocalQuery, LocalStore, Predicate,
    RemoteFailure, RemoteOperation, StatusClass, SyncState,
};
use serde_json::json;

use crate::support::{ids, room, room_json, seed, ScriptedRemote};

fn live_rooms() -> LocalQuery<Room> {
    LocalQuery::filter(Predicate::eq("live", true))
}

#[test]
fn remote_fetch_outside_runtime_fails_the_stream() {
    let remote = ScriptedRemote::new();
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());

    let mut remote_only =
        access.fetch(AccessRequest::<Room>::remote_only(RemoteOperation::get("/rooms")));
    assert!(matches!(
        remote_only.try_next(),
        Some(Err(DataAccessError::NoRuntime))
    ));

    let mut reconciling = access.fetch(RoomRequests::my_rooms_live());
    assert!(matches!(
        reconciling.try_next(),
        Some(Err(DataAccessError::NoRuntime))
    ));
    assert_eq!(remote.call_count(), 0);
    assert_eq!(store.observer_count(), 0);
}

#[tokio::test]
async fn invalid_request_fails_without_touching_anything() {
    let remote = ScriptedRemote::new();
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());

    let mut stream = access.fetch(AccessRequest::<Room>::new());
    match stream.next().await {
        Some(Err(DataAccessError::InvalidRequest { record_type })) => {
            assert_eq!(record_type, "rooms")
        }
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
    assert_eq!(remote.call_count(), 0);
    assert_eq!(store.observer_count(), 0);
}

#[tokio::test]
async fn local_only_stream_follows_commits() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());
    seed(&store, &[room("1", "a", true), room("2", "b", false)]);

    let mut stream = access.fetch(AccessRequest::local_only(live_rooms()));
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["1"]);
    assert_eq!(stream.sync_state(), SyncState::LocalOnly);

    seed(&store, &[room("3", "c", true)]);
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["1", "3"]);

    // a commit that cannot change the matched set is not re-emitted
    seed(&store, &[room("4", "d", false)]);
    assert!(stream.try_next().is_none());

    // leaving the set is
    seed(&store, &[room("1", "a", false)]);
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["3"]);
}

#[tokio::test]
async fn first_snapshot_is_local_while_remote_pending() {
    let remote = ScriptedRemote::gated().respond_ok(json!([room_json("9", "remote", true)]));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());
    seed(
        &store,
        &[room("1", "a", true), room("2", "b", true), room("3", "c", false)],
    );

    let mut stream = access.fetch(AccessRequest::both(
        live_rooms(),
        RemoteOperation::get("/api/v1/rooms"),
    ));
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["1", "2"]);
    assert_eq!(stream.sync_state(), SyncState::RemotePending);

    remote.open();
    assert_eq!(stream.settled().await, SyncState::RemoteApplied);
    assert_eq!(
        ids(&stream.try_next().unwrap().unwrap()),
        vec!["1", "2", "9"]
    );
}

#[tokio::test]
async fn merge_updates_in_place_without_duplicates() {
    let remote = ScriptedRemote::new().respond_ok(json!([
        room_json("2", "b-updated", true),
        room_json("4", "d", true),
        room_json("5", "e", true),
    ]));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);
    seed(
        &store,
        &[room("1", "a", true), room("2", "b", true), room("3", "c", false)],
    );

    let mut stream = access.fetch(RoomRequests::my_rooms_live());
    let initial = stream.try_next().unwrap().unwrap();
    assert_eq!(initial.len(), 2);

    stream.settled().await;
    let merged = stream.try_next().unwrap().unwrap();
    assert_eq!(ids(&merged), vec!["1", "2", "4", "5"]);
    assert_eq!(merged[1].name, "b-updated");
    assert!(stream.try_next().is_none());
    assert_eq!(store.count::<Room>().unwrap(), 5);
}

#[tokio::test]
async fn empty_store_converges_to_remote_set() {
    let remote = ScriptedRemote::new().respond_ok(json!([
        room_json("a", "one", true),
        room_json("b", "two", true),
        room_json("c", "three", true),
    ]));
    let access = DataAccess::new(LocalStore::in_memory(), remote);

    let mut stream = access.fetch(RoomRequests::my_rooms());
    assert!(stream.try_next().unwrap().unwrap().is_empty());

    stream.settled().await;
    let converged = stream.try_next().unwrap().unwrap();
    assert_eq!(ids(&converged), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn remote_failure_never_reaches_reconciling_stream() {
    let remote = ScriptedRemote::new().respond_status(500);
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);
    let errors = access.remote_errors();
    seed(&store, &[room("1", "a", true)]);

    let mut stream = access.fetch(RoomRequests::my_rooms());
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["1"]);

    assert_eq!(stream.settled().await, SyncState::RemoteFailed);
    assert!(stream.try_next().is_none());
    assert_eq!(errors.borrow().as_ref().and_then(|e| e.status()), Some(500));

    // still live after the failure
    seed(&store, &[room("2", "b", true)]);
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["1", "2"]);
}

#[tokio::test]
async fn side_channel_clears_after_successful_refresh() {
    let remote = ScriptedRemote::new()
        .respond_status(503)
        .respond_ok(json!([]));
    let access = DataAccess::new(LocalStore::in_memory(), remote);
    let errors = access.remote_errors();

    let mut first = access.fetch(RoomRequests::my_rooms());
    first.settled().await;
    assert!(errors.borrow().is_some());
    first.cancel();

    let mut second = access.fetch(RoomRequests::my_rooms());
    assert_eq!(second.settled().await, SyncState::RemoteApplied);
    assert!(errors.borrow().is_none());
}

#[tokio::test]
async fn remote_only_failure_ends_the_stream() {
    let remote = ScriptedRemote::new().respond_status(401);
    let access = DataAccess::new(LocalStore::in_memory(), remote);

    let mut stream = access.fetch(AccessRequest::<Room>::remote_only(RemoteOperation::get(
        "/api/v1/rooms",
    )));
    match stream.next().await {
        Some(Err(DataAccessError::Remote(failure))) => {
            assert_eq!(failure.status(), Some(401));
            assert_eq!(failure.class(), Some(StatusClass::Unauthorized));
        }
        other => panic!("expected a remote failure, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
    assert_eq!(stream.sync_state(), SyncState::RemoteFailed);
}

#[tokio::test]
async fn remote_only_emits_once_and_drops_bad_elements() {
    let remote = ScriptedRemote::new().respond_ok(json!([
        room_json("1", "a", true),
        { "id": "2", "isLive": "yes" },
        room_json("3", "c", false),
    ]));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);

    let mut stream = access.fetch(AccessRequest::<Room>::remote_only(RemoteOperation::get(
        "/api/v1/rooms",
    )));
    let records = stream.next().await.unwrap().unwrap();
    assert_eq!(ids(&records), vec!["1", "3"]);
    assert!(stream.next().await.is_none());

    // temporary context: nothing persisted
    assert_eq!(store.count::<Room>().unwrap(), 0);
}

#[tokio::test]
async fn remote_only_total_decode_failure_is_a_remote_error() {
    let remote = ScriptedRemote::new().respond_ok(json!([{ "nope": true }, 42]));
    let access = DataAccess::new(LocalStore::in_memory(), remote);

    let mut stream = access.fetch(AccessRequest::<Room>::remote_only(RemoteOperation::get(
        "/api/v1/rooms",
    )));
    assert!(matches!(
        stream.next().await,
        Some(Err(DataAccessError::Remote(RemoteFailure::Payload(_))))
    ));
}

#[tokio::test]
async fn remote_only_rejects_scalar_payload() {
    let remote = ScriptedRemote::new().respond_ok(json!("surprise"));
    let access = DataAccess::new(LocalStore::in_memory(), remote);

    let mut stream = access.fetch(AccessRequest::<Room>::remote_only(RemoteOperation::get(
        "/api/v1/rooms",
    )));
    assert!(matches!(
        stream.next().await,
        Some(Err(DataAccessError::Remote(RemoteFailure::Payload(_))))
    ));
}

#[tokio::test]
async fn reconciling_merge_drops_only_bad_elements() {
    let remote = ScriptedRemote::new().respond_ok(json!([
        room_json("1", "a", true),
        room_json("2", "b", true),
        { "id": 3, "name": "bad id" },
        room_json("4", "d", true),
    ]));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);

    let mut stream = access.fetch(RoomRequests::my_rooms());
    stream.settled().await;
    assert_eq!(store.count::<Room>().unwrap(), 3);
    let _initial = stream.try_next().unwrap().unwrap();
    assert_eq!(
        ids(&stream.try_next().unwrap().unwrap()),
        vec!["1", "2", "4"]
    );
}

#[tokio::test]
async fn cancelled_stream_ignores_late_remote_completion() {
    let remote = ScriptedRemote::gated().respond_ok(json!([room_json("9", "late", true)]));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());
    seed(&store, &[room("1", "a", true)]);

    let mut stream = access.fetch(RoomRequests::my_rooms());
    assert_eq!(ids(&stream.try_next().unwrap().unwrap()), vec!["1"]);
    tokio::task::yield_now().await;

    stream.cancel();
    assert_eq!(store.observer_count(), 0);
    assert_eq!(stream.sync_state(), SyncState::Cancelled);

    remote.open();
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.count::<Room>().unwrap(), 1);

    seed(&store, &[room("2", "b", true)]);
    assert!(stream.try_next().is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn dropping_a_stream_unregisters_its_observer() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());

    let stream = access.fetch(AccessRequest::local_only(LocalQuery::<Room>::all()));
    assert_eq!(store.observer_count(), 1);
    drop(stream);
    assert_eq!(store.observer_count(), 0);
}

#[tokio::test]
async fn reload_cancels_previous_stream_first() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());

    let mut old = access.fetch(AccessRequest::local_only(live_rooms()));
    old.try_next();
    old.cancel();
    let mut fresh = access.fetch(AccessRequest::local_only(live_rooms()));
    fresh.try_next();

    seed(&store, &[room("1", "a", true)]);
    assert!(old.try_next().is_none());
    assert_eq!(ids(&fresh.try_next().unwrap().unwrap()), vec!["1"]);
    assert_eq!(store.observer_count(), 1);
}

#[tokio::test]
async fn subscription_delivers_to_callbacks() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let subscription = access
        .fetch(AccessRequest::local_only(live_rooms()))
        .subscribe(
            move |rooms: Vec<Room>| {
                let _ = tx.send(rooms.len());
            },
            |err| panic!("unexpected error: {err}"),
        );
    assert_eq!(rx.recv().await, Some(0));

    seed(&store, &[room("1", "a", true)]);
    assert_eq!(rx.recv().await, Some(1));

    subscription.cancel();
    assert_eq!(store.observer_count(), 0);
}
