use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or submitted string is not a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a snake_case string enum with `as_str`, `Display` and `FromStr`.
/// The same strings are used on the wire (serde) and in SQLite columns.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $value)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $value ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $value => Ok($name::$variant), )+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

string_enum! {
    pub enum Role: "role" {
        User => "user",
        Support => "support",
        Moderator => "moderator",
        Admin => "admin",
        SuperAdmin => "super_admin",
    }
}

impl Role {
    fn rank(self) -> u8 {
        match self {
            Role::User => 0,
            Role::Support => 1,
            Role::Moderator => 2,
            Role::Admin => 3,
            Role::SuperAdmin => 4,
        }
    }

    /// Moderator or above.
    pub fn is_staff(self) -> bool {
        self.rank() >= Role::Moderator.rank()
    }

    /// Admin or super admin.
    pub fn is_admin(self) -> bool {
        self.rank() >= Role::Admin.rank()
    }

    pub fn outranks(self, other: Role) -> bool {
        self.rank() > other.rank()
    }
}

string_enum! {
    pub enum AlertStatus: "alert status" {
        Active => "active",
        Acknowledged => "acknowledged",
        Fulfilled => "fulfilled",
        Resolved => "resolved",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// How a closed alert ended.
    pub enum ResolutionType: "resolution type" {
        Good => "good",
        Bad => "bad",
        UserCancelled => "user_cancelled",
    }
}

string_enum! {
    /// Outcome reported by the alert creator when resolving.
    pub enum Outcome: "outcome" {
        Good => "good",
        Bad => "bad",
    }
}

impl From<Outcome> for ResolutionType {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Good => ResolutionType::Good,
            Outcome::Bad => ResolutionType::Bad,
        }
    }
}

string_enum! {
    pub enum OfferStatus: "offer status" {
        Pending => "pending",
        Accepted => "accepted",
    }
}

string_enum! {
    pub enum ReportStatus: "report status" {
        Pending => "pending",
        Reviewed => "reviewed",
        Resolved => "resolved",
    }
}

string_enum! {
    pub enum ReportCategory: "report category" {
        Harassment => "harassment",
        Spam => "spam",
        InappropriateContent => "inappropriate_content",
        Other => "other",
    }
}

string_enum! {
    pub enum MoodStatus: "mood status" {
        Great => "great",
        Good => "good",
        Okay => "okay",
        Struggling => "struggling",
        NeedSupport => "need_support",
        Critical => "critical",
    }
}

string_enum! {
    pub enum ProfessionalType: "professional type" {
        Paramedic => "paramedic",
        RegisteredNurse => "registered_nurse",
        Counselor => "counselor",
        Therapist => "therapist",
        SocialWorker => "social_worker",
        Psychologist => "psychologist",
        Psychiatrist => "psychiatrist",
        MedicalDoctor => "medical_doctor",
    }
}

string_enum! {
    pub enum MilitaryBranch: "military branch" {
        Army => "army",
        Navy => "navy",
        AirForce => "air_force",
        Marines => "marines",
        CoastGuard => "coast_guard",
        SpaceForce => "space_force",
    }
}

string_enum! {
    pub enum VerificationKind: "verification type" {
        Military => "military",
        Professional => "professional",
    }
}

string_enum! {
    pub enum BadgeKind: "badge kind" {
        Milestone => "milestone",
        Admin => "admin",
    }
}

/// Leading integer of a milestone threshold such as `"3 alerts"`.
/// Thresholds without one are never eligible.
pub fn milestone_threshold(threshold: &str) -> Option<u32> {
    let digits: String = threshold
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub phone_number: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub state_region: Option<String>,
    pub profession: Option<String>,
    pub mood_status: Option<MoodStatus>,
    pub professional_type: Option<ProfessionalType>,
    pub professional_verified: bool,
    pub military_branch: Option<MilitaryBranch>,
    pub military_verified: bool,
    pub is_available_for_support: bool,
    pub suspended_until: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_suspended_at(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisAlert {
    pub id: Uuid,
    pub created_by: Uuid,
    pub creator_username: String,
    pub creator_avatar_url: Option<String>,
    pub status: AlertStatus,
    pub initial_message: String,
    pub resolution_type: Option<ResolutionType>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseOffer {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub responder_id: Uuid,
    pub responder_username: String,
    pub responder_avatar_url: Option<String>,
    pub offer_message: String,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub alert_id: Option<Uuid>,
    pub participant_ids: [Uuid; 2],
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant_ids.contains(&user_id)
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participant_ids {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reporter_username: String,
    pub reported_user_id: Uuid,
    pub reported_username: String,
    pub channel_id: Option<Uuid>,
    pub category: ReportCategory,
    pub comments: Option<String>,
    pub status: ReportStatus,
    pub handled_by: Option<Uuid>,
    pub handled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub kind: BadgeKind,
    pub threshold: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupporterFeedback {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub supporter_id: Uuid,
    pub activator_id: Uuid,
    pub rating: u8,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ranks() {
        assert!(Role::SuperAdmin.is_admin());
        assert!(Role::Admin.is_admin());
        assert!(!Role::Moderator.is_admin());
        assert!(Role::Moderator.is_staff());
        assert!(!Role::Support.is_staff());
        assert!(Role::Admin.outranks(Role::Moderator));
        assert!(!Role::Admin.outranks(Role::Admin));
    }

    #[test]
    fn enum_strings_match_serde() {
        for role in Role::ALL {
            let json = serde_json::to_string(role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        assert_eq!(
            "inappropriate_content".parse::<ReportCategory>().unwrap(),
            ReportCategory::InappropriateContent
        );
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = "meh".parse::<Outcome>().unwrap_err();
        assert_eq!(err.kind, "outcome");
        assert_eq!(err.value, "meh");
    }

    #[test]
    fn threshold_parsing() {
        assert_eq!(milestone_threshold("3 alerts"), Some(3));
        assert_eq!(milestone_threshold("10"), Some(10));
        assert_eq!(milestone_threshold(" 1 alert"), Some(1));
        assert_eq!(milestone_threshold("alerts: 3"), None);
        assert_eq!(milestone_threshold(""), None);
    }

    #[test]
    fn other_participant() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let channel = Channel {
            id: Uuid::new_v4(),
            alert_id: None,
            participant_ids: [a, b],
            created_at: Utc::now(),
        };
        assert_eq!(channel.other_participant(a), Some(b));
        assert_eq!(channel.other_participant(b), Some(a));
        assert_eq!(channel.other_participant(Uuid::new_v4()), None);
    }
}
