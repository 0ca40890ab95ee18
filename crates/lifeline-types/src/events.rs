use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AlertStatus, Channel, CrisisAlert, Message, ReportStatus, ResponseOffer};

/// Who should receive a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every connected client.
    Everyone,
    /// Clients subscribed to this chat channel or alert id.
    Scope(Uuid),
    /// Clients whose role is moderator or above.
    Staff,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A community member raised a new alert
    AlertCreated { alert: CrisisAlert },

    /// An alert moved to a new lifecycle state
    AlertUpdated { alert_id: Uuid, status: AlertStatus },

    /// A support offer arrived on an alert (alert-scoped)
    OfferCreated { offer: ResponseOffer },

    /// Sent privately to the responder whose offer was accepted
    OfferAccepted {
        alert_id: Uuid,
        offer_id: Uuid,
        channel_id: Uuid,
        message: String,
    },

    /// Sent privately to both participants of a new chat
    ChannelCreated { channel: Channel },

    /// A chat message was posted (channel-scoped)
    MessageCreate { message: Message },

    /// A participant started typing (channel-scoped)
    TypingStart {
        channel_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    /// The recipient's own profile changed
    ProfileUpdated { profile_id: Uuid },

    /// The recipient earned a badge
    BadgeAwarded { badge_id: Uuid, badge_name: String },

    /// A report was filed or changed status (staff only)
    ReportChanged { report_id: Uuid, status: ReportStatus },
}

impl GatewayEvent {
    pub fn audience(&self) -> Audience {
        match self {
            Self::MessageCreate { message } => Audience::Scope(message.channel_id),
            Self::TypingStart { channel_id, .. } => Audience::Scope(*channel_id),
            Self::OfferCreated { offer } => Audience::Scope(offer.alert_id),
            Self::ReportChanged { .. } => Audience::Staff,
            _ => Audience::Everyone,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving scoped events for these chat channel or alert ids
    Subscribe { scopes: Vec<Uuid> },

    /// Stop receiving scoped events for these ids
    Unsubscribe { scopes: Vec<Uuid> },

    /// Indicate typing in a channel
    StartTyping { channel_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"Subscribe","data":{{"scopes":["{id}"]}}}}"#);
        match serde_json::from_str::<GatewayCommand>(&raw).unwrap() {
            GatewayCommand::Subscribe { scopes } => assert_eq!(scopes, vec![id]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn audiences() {
        let channel_id = Uuid::new_v4();
        let typing = GatewayEvent::TypingStart {
            channel_id,
            user_id: Uuid::new_v4(),
            username: "sam".into(),
        };
        assert_eq!(typing.audience(), Audience::Scope(channel_id));

        let report = GatewayEvent::ReportChanged {
            report_id: Uuid::new_v4(),
            status: ReportStatus::Pending,
        };
        assert_eq!(report.audience(), Audience::Staff);

        let updated = GatewayEvent::AlertUpdated {
            alert_id: Uuid::new_v4(),
            status: AlertStatus::Fulfilled,
        };
        assert_eq!(updated.audience(), Audience::Everyone);
    }
}
