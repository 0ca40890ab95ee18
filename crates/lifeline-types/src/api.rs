use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ReportCategory, Role, VerificationKind};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Function endpoints --

/// Envelope for `alert-manager` and `admin-manager`.
///
/// `payload` is decoded per action so that a missing action and a malformed
/// payload produce different errors.
#[derive(Debug, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAlertPayload {
    #[serde(default)]
    pub initial_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendOfferPayload {
    pub alert_id: Option<Uuid>,
    pub offer_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AcceptOfferPayload {
    pub offer_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelAlertPayload {
    pub alert_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveAlertPayload {
    pub alert_id: Option<Uuid>,
    /// Kept as a string so an unknown value gets its own error message.
    pub outcome: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRolePayload {
    pub target_user_id: Uuid,
    pub new_role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetVerificationPayload {
    pub target_user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: VerificationKind,
    pub status: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserProfilePayload {
    pub target_user_id: Option<Uuid>,
    pub updates: Option<AdminProfileUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct SuspendUserPayload {
    pub target_user_id: Uuid,
    #[serde(default)]
    pub report_id: Option<Uuid>,
    #[serde(default)]
    pub suspension_reason: Option<String>,
    #[serde(default)]
    pub suspension_duration_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AwardAdminBadgeRequest {
    pub user_id: Option<Uuid>,
    pub badge_id: Option<Uuid>,
}

// -- Profiles --

/// Fields a user may edit on their own profile.
///
/// For the text and picker fields an empty string clears the value. Unknown
/// keys (including `role`) are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub state_region: Option<String>,
    pub profession: Option<String>,
    pub mood_status: Option<String>,
    pub professional_type: Option<String>,
    pub military_branch: Option<String>,
    pub avatar_url: Option<String>,
}

/// Profile edit performed by an admin: the owner's fields plus verification.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AdminProfileUpdate {
    #[serde(flatten)]
    pub fields: ProfileUpdate,
    pub professional_verified: Option<bool>,
    pub military_verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvailabilityRequest {
    pub available: bool,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: Uuid,
    pub alert_id: Option<Uuid>,
    pub other_participant: ParticipantSummary,
    pub last_message: Option<LastMessage>,
    pub has_unread_messages: bool,
    pub created_at: DateTime<Utc>,
}

// -- Moderation --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReportRequest {
    pub reported_user_id: Uuid,
    #[serde(default)]
    pub channel_id: Option<Uuid>,
    pub category: ReportCategory,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackRequest {
    pub alert_id: Uuid,
    pub supporter_id: Uuid,
    pub rating: u8,
    #[serde(default)]
    pub comments: Option<String>,
}

// -- Dashboard --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub active_alerts_count: u32,
    pub recent_chats: Vec<ChannelSummary>,
    pub badges: Vec<BadgeSummary>,
}
