use axum::{Extension, Json, extract::State};
use serde_json::{Value, json};
use tracing::{info, warn};

use lifeline_db::models::ProfileChanges;
use lifeline_db::profiles::{DEFAULT_SUSPENSION_DAYS, MAX_SUSPENSION_DAYS};
use lifeline_types::api::{
    Claims, FunctionCall, SetRolePayload, SetVerificationPayload, SuspendUserPayload,
    UpdateUserProfilePayload,
};
use lifeline_types::events::GatewayEvent;
use lifeline_types::models::{Profile, ReportStatus, Role};

use crate::auth::{AppState, validate_username};
use crate::decode_payload;
use crate::error::{ApiError, ApiJson};
use crate::profiles::username_taken;

const DEFAULT_SUSPENSION_REASON: &str = "Inappropriate behavior";

/// `POST /functions/admin-manager`. The caller's role is re-read for every
/// call so a demotion takes effect immediately.
pub async fn admin_manager(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(call): ApiJson<FunctionCall>,
) -> Result<Json<Value>, ApiError> {
    let action = call
        .action
        .ok_or_else(|| ApiError::bad_request("Missing required field: action"))?;
    let caller = state.caller(&claims).await?;

    match action.as_str() {
        "set_role" => set_role(&state, &caller, decode_payload(call.payload)?).await,
        "set_verification_status" => {
            set_verification_status(&state, &caller, decode_payload(call.payload)?).await
        }
        "update_user_profile" => {
            update_user_profile(&state, &caller, decode_payload(call.payload)?).await
        }
        "suspend_user" => suspend_user(&state, &caller, decode_payload(call.payload)?).await,
        other => Err(ApiError::bad_request(format!("Invalid action: {other}"))),
    }
}

fn require_admin(caller: &Profile, action: &str) -> Result<(), ApiError> {
    if !caller.role.is_admin() {
        warn!("{} ({}) attempted {} without admin role", caller.username, caller.role, action);
        return Err(ApiError::forbidden(
            "Permission denied. You must be an Admin or Super Admin.",
        ));
    }
    Ok(())
}

async fn target_profile(state: &AppState, target: uuid::Uuid) -> Result<Profile, ApiError> {
    state
        .db_call(move |db| db.get_profile(target))
        .await?
        .ok_or_else(|| ApiError::not_found("Target user not found."))
}

async fn set_role(
    state: &AppState,
    caller: &Profile,
    payload: SetRolePayload,
) -> Result<Json<Value>, ApiError> {
    if caller.role != Role::SuperAdmin {
        warn!("{} ({}) attempted set_role", caller.username, caller.role);
        return Err(ApiError::forbidden("Permission denied. You must be a Super Admin."));
    }

    let target = target_profile(state, payload.target_user_id).await?;
    let new_role = payload.new_role;
    state
        .db_call(move |db| db.set_role(target.id, new_role))
        .await?;

    info!(
        "{} changed role of {} from {} to {}",
        caller.username, target.username, target.role, new_role
    );
    state
        .dispatcher
        .send_to_user(target.id, GatewayEvent::ProfileUpdated { profile_id: target.id })
        .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("User role updated to {new_role}."),
    })))
}

async fn set_verification_status(
    state: &AppState,
    caller: &Profile,
    payload: SetVerificationPayload,
) -> Result<Json<Value>, ApiError> {
    require_admin(caller, "set_verification_status")?;

    let target = target_profile(state, payload.target_user_id).await?;
    let (kind, status) = (payload.kind, payload.status);
    state
        .db_call(move |db| db.set_verification(target.id, kind, status))
        .await?;

    info!("{} set {} verification of {} to {}", caller.username, kind, target.username, status);
    state
        .dispatcher
        .send_to_user(target.id, GatewayEvent::ProfileUpdated { profile_id: target.id })
        .await;

    Ok(Json(json!({ "success": true, "message": "Verification status updated." })))
}

async fn update_user_profile(
    state: &AppState,
    caller: &Profile,
    payload: UpdateUserProfilePayload,
) -> Result<Json<Value>, ApiError> {
    require_admin(caller, "update_user_profile")?;

    let (Some(target_id), Some(updates)) = (payload.target_user_id, payload.updates) else {
        return Err(ApiError::bad_request("Missing target_user_id or updates payload."));
    };
    if let Some(username) = &updates.fields.username {
        validate_username(username.trim())?;
    }
    let changes = ProfileChanges::from_admin_update(&updates)?;
    let target = target_profile(state, target_id).await?;

    state
        .db_call(move |db| db.update_profile(target.id, &changes))
        .await
        .map_err(username_taken)?;

    info!("{} edited profile of {}", caller.username, target.username);
    state
        .dispatcher
        .send_to_user(target.id, GatewayEvent::ProfileUpdated { profile_id: target.id })
        .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Profile for user {target_id} updated."),
    })))
}

async fn suspend_user(
    state: &AppState,
    caller: &Profile,
    payload: SuspendUserPayload,
) -> Result<Json<Value>, ApiError> {
    if !caller.role.is_staff() {
        warn!("{} ({}) attempted suspend_user", caller.username, caller.role);
        return Err(ApiError::forbidden(
            "Permission denied. You must be a Moderator or above.",
        ));
    }

    let target = target_profile(state, payload.target_user_id).await?;
    if !caller.role.outranks(target.role) {
        warn!("{} tried to suspend {} ({})", caller.username, target.username, target.role);
        return Err(ApiError::forbidden(
            "You cannot suspend a user with an equal or higher role.",
        ));
    }

    let days = payload.suspension_duration_days.unwrap_or(DEFAULT_SUSPENSION_DAYS);
    if days == 0 {
        return Err(ApiError::bad_request("Suspension must last at least one day."));
    }
    if days > MAX_SUSPENSION_DAYS {
        return Err(ApiError::bad_request(format!(
            "Suspension cannot exceed {MAX_SUSPENSION_DAYS} days."
        )));
    }
    let reason = payload
        .suspension_reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_SUSPENSION_REASON.to_string());
    let report = payload.report_id.map(|id| (id, caller.id));

    let target_id = target.id;
    let until = state
        .db_call(move |db| db.suspend_user(target_id, days, &reason, report))
        .await?;

    info!("{} suspended {} until {}", caller.username, target.username, until);
    state
        .dispatcher
        .send_to_user(target.id, GatewayEvent::ProfileUpdated { profile_id: target.id })
        .await;
    if let Some(report_id) = payload.report_id {
        state.dispatcher.broadcast(GatewayEvent::ReportChanged {
            report_id,
            status: ReportStatus::Resolved,
        });
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("User {} suspended for {} days.", target.username, days),
        "suspended_until": until,
    })))
}
