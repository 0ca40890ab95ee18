use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use lifeline_types::lifecycle::Transition;
use lifeline_types::models::{
    AlertStatus, Channel, CrisisAlert, OfferStatus, ResolutionType, ResponseOffer,
    SupporterFeedback,
};

use crate::models::{parsed, parsed_opt};
use crate::{Database, DbError, Result};

const ALERT_SELECT: &str = "SELECT a.id, a.created_by, p.username, p.avatar_url, a.status,
        a.initial_message, a.resolution_type, a.resolved_at, a.created_at
     FROM crisis_alerts a
     JOIN profiles p ON p.id = a.created_by";

const OFFER_SELECT: &str = "SELECT o.id, o.alert_id, o.responder_id, p.username, p.avatar_url,
        o.offer_message, o.status, o.created_at
     FROM response_offers o
     JOIN profiles p ON p.id = o.responder_id";

/// Result of a successful `send_offer`.
#[derive(Debug, Clone)]
pub struct SentOffer {
    pub offer: ResponseOffer,
    pub previous: AlertStatus,
    pub status: AlertStatus,
}

/// Result of a successful `accept_offer`.
#[derive(Debug, Clone)]
pub struct AcceptedOffer {
    pub alert_id: Uuid,
    pub offer_id: Uuid,
    pub responder_id: Uuid,
    pub channel: Channel,
}

impl Database {
    /// Open a new alert. A user may hold only one `active` alert at a time.
    pub fn create_alert(&self, creator: Uuid, initial_message: &str) -> Result<CrisisAlert> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM crisis_alerts WHERE created_by = ?1 AND status = 'active'",
                    [creator.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(DbError::rejected("An active alert already exists for this user."));
            }

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO crisis_alerts (id, created_by, status, initial_message) VALUES (?1, ?2, 'active', ?3)",
                params![id.to_string(), creator.to_string(), initial_message],
            )?;
            let alert = query_alert(&tx, id)?.ok_or(DbError::NotFound("Alert"))?;

            tx.commit()?;
            Ok(alert)
        })
    }

    pub fn get_alert(&self, id: Uuid) -> Result<Option<CrisisAlert>> {
        self.with_conn(|conn| query_alert(conn, id))
    }

    /// Community feed: active alerts raised by anyone but `viewer`, newest first.
    pub fn list_active_alerts(&self, viewer: Uuid) -> Result<Vec<CrisisAlert>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{ALERT_SELECT} WHERE a.status = 'active' AND a.created_by != ?1
                 ORDER BY a.created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([viewer.to_string()], alert_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_active_alerts(&self, creator: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM crisis_alerts WHERE created_by = ?1 AND status = 'active'",
                [creator.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Record an offer and move the alert to `fulfilled`, atomically.
    pub fn send_offer(
        &self,
        alert_id: Uuid,
        responder_id: Uuid,
        offer_message: &str,
        max_responders: u32,
    ) -> Result<SentOffer> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let (creator, previous) = alert_owner_and_status(&tx, alert_id)?;
            if creator == responder_id {
                return Err(DbError::rejected("You cannot respond to your own alert."));
            }
            let status = previous
                .apply(Transition::SendOffer)
                .map_err(|e| DbError::rejected(e.to_string()))?;

            let already: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM response_offers WHERE alert_id = ?1 AND responder_id = ?2)",
                params![alert_id.to_string(), responder_id.to_string()],
                |row| row.get(0),
            )?;
            if already {
                return Err(DbError::rejected("You have already offered support on this alert."));
            }

            let offers: u32 = tx.query_row(
                "SELECT COUNT(*) FROM response_offers WHERE alert_id = ?1",
                [alert_id.to_string()],
                |row| row.get(0),
            )?;
            if offers >= max_responders {
                return Err(DbError::rejected("This alert already has enough responders."));
            }

            let offer_id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO response_offers (id, alert_id, responder_id, offer_message) VALUES (?1, ?2, ?3, ?4)",
                params![offer_id.to_string(), alert_id.to_string(), responder_id.to_string(), offer_message],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO alert_responders (alert_id, responder_id) VALUES (?1, ?2)",
                params![alert_id.to_string(), responder_id.to_string()],
            )?;
            apply_transition(&tx, alert_id, Transition::SendOffer)?;

            let sql = format!("{OFFER_SELECT} WHERE o.id = ?1");
            let offer = tx.query_row(&sql, [offer_id.to_string()], offer_from_row)?;

            tx.commit()?;
            debug!("Offer {} recorded on alert {} ({} -> {})", offer_id, alert_id, previous, status);
            Ok(SentOffer { offer, previous, status })
        })
    }

    /// Accept a pending offer: open a chat channel between the alert creator
    /// and the responder, and move the alert to `acknowledged`.
    pub fn accept_offer(&self, offer_id: Uuid, activator: Uuid) -> Result<AcceptedOffer> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let offer: Option<(Uuid, Uuid, OfferStatus)> = tx
                .query_row(
                    "SELECT alert_id, responder_id, status FROM response_offers WHERE id = ?1",
                    [offer_id.to_string()],
                    |row| Ok((parsed(row, 0)?, parsed(row, 1)?, parsed(row, 2)?)),
                )
                .optional()?;
            let (alert_id, responder_id, offer_status) = offer.ok_or(DbError::NotFound("Offer"))?;

            let (creator, status) = alert_owner_and_status(&tx, alert_id)?;
            if creator != activator {
                return Err(DbError::rejected("Only the alert creator can accept offers."));
            }
            if offer_status != OfferStatus::Pending {
                return Err(DbError::rejected("This offer has already been accepted."));
            }
            status
                .apply(Transition::AcceptOffer)
                .map_err(|e| DbError::rejected(e.to_string()))?;

            let channel_id = Uuid::new_v4();
            let created_at: String = tx.query_row(
                "INSERT INTO channels (id, alert_id, participant_a, participant_b)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING created_at",
                params![
                    channel_id.to_string(),
                    alert_id.to_string(),
                    creator.to_string(),
                    responder_id.to_string()
                ],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE response_offers SET status = 'accepted' WHERE id = ?1 AND status = 'pending'",
                [offer_id.to_string()],
            )?;
            apply_transition(&tx, alert_id, Transition::AcceptOffer)?;

            tx.commit()?;

            let created_at = created_at
                .parse()
                .map_err(|e| DbError::Other(anyhow::anyhow!("bad channel created_at: {}", e)))?;
            Ok(AcceptedOffer {
                alert_id,
                offer_id,
                responder_id,
                channel: Channel {
                    id: channel_id,
                    alert_id: Some(alert_id),
                    participant_ids: [creator, responder_id],
                    created_at,
                },
            })
        })
    }

    /// Cancel or resolve an alert owned by `owner`. A single guarded UPDATE:
    /// if it matches nothing the alert is missing, not theirs, or closed.
    pub fn close_alert(&self, alert_id: Uuid, owner: Uuid, transition: Transition) -> Result<AlertStatus> {
        let resolution = match transition {
            Transition::Cancel => ResolutionType::UserCancelled,
            Transition::Resolve(outcome) => outcome.into(),
            other => {
                return Err(DbError::Other(anyhow::anyhow!("{:?} does not close an alert", other)));
            }
        };

        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE crisis_alerts
                 SET status = ?3, resolution_type = ?4,
                     resolved_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND created_by = ?2 AND {}",
                status_guard(transition)
            );
            let changed = conn.execute(
                &sql,
                params![
                    alert_id.to_string(),
                    owner.to_string(),
                    transition.target().as_str(),
                    resolution.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(DbError::rejected(
                    "Alert not found, not owned by you, or already closed.",
                ));
            }
            Ok(transition.target())
        })
    }

    /// Offers on an alert, oldest first.
    pub fn list_offers(&self, alert_id: Uuid) -> Result<Vec<ResponseOffer>> {
        self.with_conn(|conn| {
            let sql = format!("{OFFER_SELECT} WHERE o.alert_id = ?1 ORDER BY o.created_at ASC, o.rowid ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([alert_id.to_string()], offer_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of distinct alerts this user has responded to.
    pub fn count_responses(&self, responder_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| count_responses(conn, responder_id))
    }

    /// Feedback from an alert's creator about the supporter they chatted with.
    pub fn leave_feedback(
        &self,
        alert_id: Uuid,
        activator: Uuid,
        supporter_id: Uuid,
        rating: u8,
        comments: Option<&str>,
    ) -> Result<SupporterFeedback> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let (creator, _) = alert_owner_and_status(&tx, alert_id)?;
            if creator != activator {
                return Err(DbError::rejected("Only the alert creator can leave feedback."));
            }

            let supported: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM response_offers
                   WHERE alert_id = ?1 AND responder_id = ?2 AND status = 'accepted')",
                params![alert_id.to_string(), supporter_id.to_string()],
                |row| row.get(0),
            )?;
            if !supported {
                return Err(DbError::rejected("That user did not support this alert."));
            }

            let already: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM supporter_feedback WHERE alert_id = ?1 AND activator_id = ?2)",
                params![alert_id.to_string(), activator.to_string()],
                |row| row.get(0),
            )?;
            if already {
                return Err(DbError::rejected("Feedback already submitted for this alert."));
            }

            let id = Uuid::new_v4();
            let created_at: String = tx.query_row(
                "INSERT INTO supporter_feedback (id, alert_id, supporter_id, activator_id, rating, comments)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING created_at",
                params![
                    id.to_string(),
                    alert_id.to_string(),
                    supporter_id.to_string(),
                    activator.to_string(),
                    rating,
                    comments
                ],
                |row| row.get(0),
            )?;
            tx.commit()?;

            Ok(SupporterFeedback {
                id,
                alert_id,
                supporter_id,
                activator_id: activator,
                rating,
                comments: comments.map(str::to_string),
                created_at: created_at
                    .parse()
                    .map_err(|e| DbError::Other(anyhow::anyhow!("bad feedback created_at: {}", e)))?,
            })
        })
    }
}

pub(crate) fn count_responses(conn: &Connection, responder_id: Uuid) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(DISTINCT r.alert_id)
         FROM alert_responders r
         JOIN crisis_alerts a ON a.id = r.alert_id
         WHERE r.responder_id = ?1",
        [responder_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// `status IN ('active', ...)` for the transition's source states. The values
/// are static enum strings, never user input.
fn status_guard(transition: Transition) -> String {
    let list: Vec<String> = transition
        .sources()
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("status IN ({})", list.join(", "))
}

fn apply_transition(conn: &Connection, alert_id: Uuid, transition: Transition) -> Result<()> {
    let sql = format!(
        "UPDATE crisis_alerts SET status = ?2 WHERE id = ?1 AND {}",
        status_guard(transition)
    );
    let changed = conn.execute(&sql, params![alert_id.to_string(), transition.target().as_str()])?;
    if changed == 0 {
        return Err(DbError::rejected("The alert changed state, please try again."));
    }
    Ok(())
}

fn alert_owner_and_status(conn: &Connection, alert_id: Uuid) -> Result<(Uuid, AlertStatus)> {
    conn.query_row(
        "SELECT created_by, status FROM crisis_alerts WHERE id = ?1",
        [alert_id.to_string()],
        |row| Ok((parsed(row, 0)?, parsed(row, 1)?)),
    )
    .optional()?
    .ok_or(DbError::NotFound("Alert"))
}

fn query_alert(conn: &Connection, id: Uuid) -> Result<Option<CrisisAlert>> {
    let sql = format!("{ALERT_SELECT} WHERE a.id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], alert_from_row).optional()?)
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<CrisisAlert> {
    Ok(CrisisAlert {
        id: parsed(row, 0)?,
        created_by: parsed(row, 1)?,
        creator_username: row.get(2)?,
        creator_avatar_url: row.get(3)?,
        status: parsed(row, 4)?,
        initial_message: row.get(5)?,
        resolution_type: parsed_opt(row, 6)?,
        resolved_at: parsed_opt(row, 7)?,
        created_at: parsed(row, 8)?,
    })
}

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<ResponseOffer> {
    Ok(ResponseOffer {
        id: parsed(row, 0)?,
        alert_id: parsed(row, 1)?,
        responder_id: parsed(row, 2)?,
        responder_username: row.get(3)?,
        responder_avatar_url: row.get(4)?,
        offer_message: row.get(5)?,
        status: parsed(row, 6)?,
        created_at: parsed(row, 7)?,
    })
}
