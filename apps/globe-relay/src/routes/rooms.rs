//! Read-only room inspection endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::relay::server::{check_party, check_room_name};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/parties/{party}/rooms", get(list_rooms))
        .route("/parties/{party}/rooms/{room}/members", get(list_members))
}

// ---------------------------------------------------------------------------
// GET /api/v1/parties/:party/rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomInfo {
    pub name: String,
    pub member_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListRoomsResponse {
    pub data: Vec<RoomInfo>,
}

#[utoipa::path(
    get,
    path = "/api/v1/parties/{party}/rooms",
    tag = "Rooms",
    params(
        ("party" = String, Path, description = "Party name"),
    ),
    responses(
        (status = 200, description = "Rooms with at least one member", body = ListRoomsResponse),
        (status = 404, description = "Unknown party", body = ApiErrorBody),
    ),
)]
pub async fn list_rooms(
    State(state): State<AppState>,
    Path(party): Path<String>,
) -> Result<Json<ListRoomsResponse>, ApiError> {
    check_party(&state, &party)?;

    let data = state
        .rooms()
        .rooms()
        .into_iter()
        .map(|summary| RoomInfo {
            name: summary.name,
            member_count: summary.member_count,
        })
        .collect();

    Ok(Json(ListRoomsResponse { data }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/parties/:party/rooms/:room/members
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListMembersResponse {
    pub room: String,
    pub members: Vec<MemberInfo>,
}

#[utoipa::path(
    get,
    path = "/api/v1/parties/{party}/rooms/{room}/members",
    tag = "Rooms",
    params(
        ("party" = String, Path, description = "Party name"),
        ("room" = String, Path, description = "Room name"),
    ),
    responses(
        (status = 200, description = "Current members; empty when the room is absent", body = ListMembersResponse),
        (status = 400, description = "Invalid room name", body = ApiErrorBody),
        (status = 404, description = "Unknown party", body = ApiErrorBody),
    ),
)]
pub async fn list_members(
    State(state): State<AppState>,
    Path((party, room)): Path<(String, String)>,
) -> Result<Json<ListMembersResponse>, ApiError> {
    check_party(&state, &party)?;
    check_room_name(&room)?;

    let members = state
        .rooms()
        .members(&room)
        .into_iter()
        .map(|marker| MemberInfo {
            id: marker.id.to_string(),
            lat: marker.lat,
            lng: marker.lng,
        })
        .collect();

    Ok(Json(ListMembersResponse { room, members }))
}
