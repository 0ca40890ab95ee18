use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, warn};
use uuid::Uuid;

use lifeline_db::models::ProfileChanges;
use lifeline_types::api::{AvailabilityRequest, Claims, ProfileUpdate};
use lifeline_types::events::GatewayEvent;
use lifeline_types::models::Profile;

use crate::auth::{AppState, validate_username};
use crate::error::{ApiError, ApiJson};

/// Usernames are unique; surface the collision in plain words.
pub(crate) fn username_taken(err: ApiError) -> ApiError {
    match err {
        ApiError::Conflict(_) => ApiError::Conflict("Username is already taken.".into()),
        other => other,
    }
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Profile>, ApiError> {
    Ok(Json(state.caller(&claims).await?))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Profile>, ApiError> {
    state
        .db_call(move |db| db.get_profile(user_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Profile not found."))
}

/// `PATCH /profiles/me`. Role and verification flags are not part of
/// [`ProfileUpdate`], so they cannot be changed here.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    if let Some(username) = &update.username {
        validate_username(username.trim())?;
    }
    let changes = ProfileChanges::from_update(&update)?;

    let user_id = claims.sub;
    let profile = state
        .db_call(move |db| db.update_profile(user_id, &changes))
        .await
        .map_err(username_taken)?;

    info!("Profile {} updated by owner", user_id);
    state
        .dispatcher
        .send_to_user(user_id, GatewayEvent::ProfileUpdated { profile_id: user_id })
        .await;

    Ok(Json(profile))
}

/// `POST /profiles/me/availability`
pub async fn set_availability(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<AvailabilityRequest>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    state
        .db_call(move |db| db.set_availability(user_id, req.available))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /profiles`: every profile, highest role first. Admins only.
pub async fn list_profiles(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let caller = state.caller(&claims).await?;
    if !caller.role.is_admin() {
        warn!("{} ({}) tried to list profiles", caller.username, caller.role);
        return Err(ApiError::forbidden(
            "Permission denied. You must be an Admin or Super Admin.",
        ));
    }
    Ok(Json(state.db_call(|db| db.list_profiles()).await?))
}
