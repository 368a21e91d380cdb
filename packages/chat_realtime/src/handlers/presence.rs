//! Read-only presence queries for the request layer.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;

use crate::AppState;
use crate::directory::UserId;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceList {
    pub online_user_ids: Vec<UserId>,
    pub connected_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: UserId,
    pub online: bool,
}

pub async fn list_presence_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(PresenceList {
        online_user_ids: state.hub.list_online_users(),
        connected_count: state.hub.connected_count(),
    })
}

pub async fn user_presence_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let online = state.hub.is_user_online(&user_id);
    Json(UserPresence { user_id, online })
}
