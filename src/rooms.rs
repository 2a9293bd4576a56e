//! Rooms: the sample record type and its named request constructors.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::query::{LocalQuery, Predicate};
use crate::request::{AccessRequest, RemoteOperation, StorageLocation};
use crate::Record;

/// A chat room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Record)]
#[record(collection = "rooms")]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(rename = "isLive")]
    #[record(rename = "isLive")]
    pub live: bool,
    #[serde(default)]
    #[record(default)]
    pub capacity: i64,
    #[serde(default)]
    pub topic: Option<String>,
}

impl PartialEq for Room {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Room {}

impl Hash for Room {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Named constructors for every room use case.
pub struct RoomRequests;

impl RoomRequests {
    pub const LIST_PATH: &'static str = "/api/v1/rooms";
    pub const ROOMS_PATH: &'static str = "/rooms";
    pub const ROOM_PATH: &'static str = "/room";

    /// All rooms, refreshed from the server.
    pub fn my_rooms() -> AccessRequest<Room> {
        AccessRequest::both(LocalQuery::all(), RemoteOperation::get(Self::LIST_PATH))
    }

    /// Live rooms only, refreshed from the server.
    pub fn my_rooms_live() -> AccessRequest<Room> {
        AccessRequest::both(
            LocalQuery::filter(Predicate::eq("live", true)),
            RemoteOperation::get(Self::LIST_PATH),
        )
    }

    /// One room by id.
    pub fn room(id: &str) -> AccessRequest<Room> {
        AccessRequest::both(
            LocalQuery::by_id(id),
            RemoteOperation::get(Self::ROOM_PATH).with_parameters(json!({ "id": id })),
        )
    }

    /// Create a room locally and announce it to the server on a best-effort basis.
    pub fn create(room: Room) -> AccessRequest<Room> {
        let body = serde_json::to_value(&room).unwrap_or_default();
        AccessRequest::both(
            LocalQuery::with_record(room),
            RemoteOperation::post(Self::ROOMS_PATH).with_parameters(body),
        )
        .stored(StorageLocation::LocalOnly)
    }

    /// Delete every room on the server, then locally.
    pub fn delete_all_rooms() -> AccessRequest<Room> {
        AccessRequest::both(LocalQuery::all(), RemoteOperation::delete(Self::ROOMS_PATH))
    }

    /// Delete every room from the local store only.
    pub fn delete_all_rooms_locally() -> AccessRequest<Room> {
        AccessRequest::local_only(LocalQuery::all())
    }
}
