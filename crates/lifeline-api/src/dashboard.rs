use axum::{Extension, Json, extract::State};
use serde_json::{Value, json};

use lifeline_types::api::{Claims, DashboardData};

use crate::auth::AppState;
use crate::error::ApiError;

const RECENT_CHATS: usize = 3;

/// `POST /functions/fetch-dashboard`: the caller's home screen in one call.
pub async fn fetch_dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    let user_id = claims.sub;
    let data = state
        .db_call(move |db| {
            let active_alerts_count = db.count_active_alerts(user_id)?;
            // Summaries come back ordered by latest activity.
            let mut recent_chats = db.list_channel_summaries(user_id)?;
            recent_chats.truncate(RECENT_CHATS);
            let badges = db.user_badges(user_id)?;
            Ok(DashboardData {
                active_alerts_count,
                recent_chats,
                badges,
            })
        })
        .await?;

    Ok(Json(json!({ "success": true, "data": data })))
}
