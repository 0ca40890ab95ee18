pub mod admin;
pub mod alerts;
pub mod auth;
pub mod badges;
pub mod dashboard;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod profiles;
pub mod reports;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use serde::de::DeserializeOwned;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::require_auth;

/// Every REST and function route. The WebSocket gateway is mounted by the
/// server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        // Function endpoints
        .route("/functions/alert-manager", post(alerts::alert_manager))
        .route("/functions/admin-manager", post(admin::admin_manager))
        .route("/functions/award-admin-badge", post(badges::award_admin_badge))
        .route("/functions/award-badges", post(badges::award_badges))
        .route("/functions/fetch-dashboard", post(dashboard::fetch_dashboard))
        // Profiles
        .route("/profiles", get(profiles::list_profiles))
        .route("/profiles/me", get(profiles::get_me).patch(profiles::update_me))
        .route("/profiles/me/availability", post(profiles::set_availability))
        .route("/profiles/me/badges", get(badges::my_badges))
        .route("/profiles/{user_id}", get(profiles::get_profile))
        .route("/profiles/{user_id}/badges", get(badges::profile_badges))
        // Alerts
        .route("/alerts", get(alerts::list_alerts))
        .route("/alerts/{alert_id}", get(alerts::get_alert))
        .route("/alerts/{alert_id}/offers", get(alerts::list_offers))
        .route("/feedback", post(alerts::leave_feedback))
        .route("/badges", get(badges::list_badges))
        // Chat
        .route("/channels", get(messages::list_channels))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        // Moderation
        .route("/reports", get(reports::list_reports).post(reports::create_report))
        .route("/reports/{report_id}/review", post(reports::review_report))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// Decode a function-call payload. An absent payload reads as `{}`.
pub(crate) fn decode_payload<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, ApiError> {
    let payload = match payload {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| ApiError::bad_request(format!("Invalid payload: {e}")))
}
