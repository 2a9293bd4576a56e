//! Save and delete, with their storage-location policies.

use data_access::rooms::{Room, RoomRequests};
use data_access::{
    AccessRequest, DataAccess, DataAccessError, LocalQuery, LocalStore, Method, Predicate,
    RemoteOperation, StorageLocation, StoreError,
};
use serde_json::json;

use crate::support::{room, room_json, seed, FlakyPersistence, ScriptedRemote};

fn with_record(room: Room) -> AccessRequest<Room> {
    AccessRequest::both(
        LocalQuery::with_record(room.clone()),
        RemoteOperation::post("/rooms").with_parameters(serde_json::to_value(room).unwrap()),
    )
}

#[tokio::test]
async fn create_is_invisible_until_saved() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());

    let mut created: Room = access.create().unwrap();
    assert_eq!(store.count::<Room>().unwrap(), 0);

    created.name = "New".into();
    access
        .save(AccessRequest::local_only(LocalQuery::with_record(created.clone())))
        .await
        .unwrap();
    assert_eq!(store.get::<Room>(&created.id).unwrap().name, "New");
}

#[tokio::test]
async fn abandoned_create_is_never_committed() {
    let remote = ScriptedRemote::new().respond_status(500).respond_ok(json!({}));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);

    let mut lobby: Room = access.create().unwrap();
    lobby.name = "Lobby".into();
    access.save(with_record(lobby.clone())).await.unwrap_err();

    let mut stage: Room = access.create().unwrap();
    stage.name = "Stage".into();
    access
        .save(with_record(stage).stored(StorageLocation::RemoteOnly))
        .await
        .unwrap();

    access
        .save(AccessRequest::local_only(LocalQuery::with_record(room(
            "other", "x", false,
        ))))
        .await
        .unwrap();

    let names: Vec<String> = store
        .query(&LocalQuery::<Room>::all())
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["x"]);
    assert!(!store.main_context().has_changes());
}

#[tokio::test]
async fn local_only_save_survives_remote_failure() {
    let remote = ScriptedRemote::new().respond_status(500);
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());
    let errors = access.remote_errors();

    access
        .save(RoomRequests::create(room("r1", "Lobby", true)))
        .await
        .unwrap();

    assert_eq!(store.get::<Room>("r1").unwrap().name, "Lobby");
    assert_eq!(remote.calls()[0].method, Method::Post);
    assert!(errors.borrow().is_some());
}

#[tokio::test]
async fn save_with_both_aborts_on_remote_failure() {
    let remote = ScriptedRemote::new().respond_status(422);
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);

    let err = access
        .save(with_record(room("r1", "Lobby", true)))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(422));
    assert_eq!(store.count::<Room>().unwrap(), 0);
}

#[tokio::test]
async fn save_with_both_keeps_server_echo() {
    let remote = ScriptedRemote::new().respond_ok(json!({
        "id": "r1",
        "name": "Lobby",
        "isLive": true,
        "capacity": 12
    }));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);

    access
        .save(with_record(room("r1", "Lobby", true)))
        .await
        .unwrap();
    assert_eq!(store.get::<Room>("r1").unwrap().capacity, 12);
}

#[tokio::test]
async fn save_ignores_echo_for_another_id() {
    let remote = ScriptedRemote::new().respond_ok(room_json("other", "x", false));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);

    access
        .save(with_record(room("r1", "Lobby", true)))
        .await
        .unwrap();
    assert_eq!(store.get::<Room>("r1").unwrap().name, "Lobby");
    assert_eq!(store.count::<Room>().unwrap(), 1);
}

#[tokio::test]
async fn remote_only_save_never_touches_store() {
    let remote = ScriptedRemote::new().respond_ok(json!({}));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());

    access
        .save(with_record(room("r1", "Lobby", true)).stored(StorageLocation::RemoteOnly))
        .await
        .unwrap();
    assert_eq!(remote.call_count(), 1);
    assert_eq!(store.count::<Room>().unwrap(), 0);
}

#[tokio::test]
async fn save_notifies_live_streams() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());

    let mut stream = access.fetch(AccessRequest::local_only(LocalQuery::<Room>::all()));
    assert!(stream.try_next().unwrap().unwrap().is_empty());

    access
        .save(AccessRequest::local_only(LocalQuery::with_record(room(
            "r1", "Lobby", true,
        ))))
        .await
        .unwrap();
    assert_eq!(stream.try_next().unwrap().unwrap().len(), 1);
}

#[tokio::test]
async fn store_failure_is_recoverable() {
    let persistence = FlakyPersistence::new();
    let store = LocalStore::open(persistence.clone()).unwrap();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());

    persistence.set_failing(true);
    let err = access
        .save(AccessRequest::local_only(LocalQuery::with_record(room(
            "r1", "Lobby", true,
        ))))
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::Store(StoreError::Storage(_))));
    assert_eq!(store.count::<Room>().unwrap(), 0);

    // staged change survives the failed commit
    persistence.set_failing(false);
    store.save(&store.main_context()).unwrap();
    assert_eq!(store.get::<Room>("r1").unwrap().name, "Lobby");
}

#[tokio::test]
async fn delete_runs_remote_first_then_local() {
    let remote = ScriptedRemote::new().respond_ok(json!(null));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());
    seed(
        &store,
        &[room("1", "a", true), room("2", "b", false), room("3", "c", true)],
    );

    let removed = access.delete(RoomRequests::delete_all_rooms()).await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(remote.calls()[0].method, Method::Delete);
    assert_eq!(store.count::<Room>().unwrap(), 0);
}

#[tokio::test]
async fn delete_with_both_keeps_local_on_remote_failure() {
    let remote = ScriptedRemote::new().respond_status(403);
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);
    seed(&store, &[room("1", "a", true)]);

    let err = access
        .delete(RoomRequests::delete_all_rooms())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(store.count::<Room>().unwrap(), 1);
}

#[tokio::test]
async fn local_only_delete_treats_remote_as_best_effort() {
    let remote = ScriptedRemote::new().respond_status(500);
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote);
    let errors = access.remote_errors();
    seed(&store, &[room("1", "a", true), room("2", "b", false)]);

    let removed = access
        .delete(
            AccessRequest::both(
                LocalQuery::<Room>::filter(Predicate::eq("live", true)),
                RemoteOperation::delete("/rooms"),
            )
            .stored(StorageLocation::LocalOnly),
        )
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(errors.borrow().is_some());
}

#[tokio::test]
async fn delete_skips_non_delete_remote_operations() {
    let remote = ScriptedRemote::new();
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());
    seed(&store, &[room("1", "a", true)]);

    let removed = access.delete(RoomRequests::my_rooms()).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn remote_only_delete_leaves_store_alone() {
    let remote = ScriptedRemote::new().respond_ok(json!(null));
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), remote.clone());
    seed(&store, &[room("1", "a", true)]);

    let removed = access
        .delete(AccessRequest::<Room>::remote_only(RemoteOperation::delete("/rooms")))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(remote.call_count(), 1);
    assert_eq!(store.count::<Room>().unwrap(), 1);
}

#[tokio::test]
async fn delete_all_locally_streams_empty_snapshot() {
    let store = LocalStore::in_memory();
    let access = DataAccess::new(store.clone(), ScriptedRemote::new());
    seed(&store, &[room("1", "a", true)]);

    let mut stream = access.fetch(AccessRequest::local_only(LocalQuery::<Room>::all()));
    assert_eq!(stream.try_next().unwrap().unwrap().len(), 1);

    access
        .delete(RoomRequests::delete_all_rooms_locally())
        .await
        .unwrap();
    assert!(stream.try_next().unwrap().unwrap().is_empty());
}
