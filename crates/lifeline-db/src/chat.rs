use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use lifeline_types::api::{ChannelSummary, LastMessage, ParticipantSummary};
use lifeline_types::models::{Channel, Message};

use crate::models::{parsed, parsed_opt};
use crate::{Database, DbError, Result};

impl Database {
    pub fn get_channel(&self, id: Uuid) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            let channel = conn
                .query_row(
                    "SELECT id, alert_id, participant_a, participant_b, created_at FROM channels WHERE id = ?1",
                    [id.to_string()],
                    channel_from_row,
                )
                .optional()?;
            Ok(channel)
        })
    }

    pub fn insert_message(&self, channel_id: Uuid, sender_id: Uuid, content: &str) -> Result<Message> {
        self.with_conn(|conn| {
            let id = Uuid::new_v4();
            let (created_at, seq): (String, i64) = conn.query_row(
                "INSERT INTO messages (id, channel_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)
                 RETURNING created_at, rowid",
                params![id.to_string(), channel_id.to_string(), sender_id.to_string(), content],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            // The sender has obviously seen their own message.
            mark_read(conn, channel_id, sender_id, &created_at, seq)?;

            Ok(Message {
                id,
                channel_id,
                sender_id,
                content: content.to_string(),
                created_at: created_at
                    .parse()
                    .map_err(|e| DbError::Other(anyhow::anyhow!("bad message created_at: {}", e)))?,
            })
        })
    }

    /// Up to `limit` messages older than the message `before` (if given),
    /// oldest first. Ties on `created_at` are broken by insertion order.
    pub fn get_messages(&self, channel_id: Uuid, limit: u32, before: Option<Uuid>) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let cursor = match before {
                Some(id) => Some(
                    conn.query_row(
                        "SELECT created_at, rowid FROM messages WHERE id = ?1 AND channel_id = ?2",
                        [id.to_string(), channel_id.to_string()],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?
                    .ok_or(DbError::NotFound("Message"))?,
                ),
                None => None,
            };
            let (before_at, before_seq) = cursor.unzip();

            let mut stmt = conn.prepare(
                "SELECT id, channel_id, sender_id, content, created_at
                 FROM messages
                 WHERE channel_id = ?1 AND (?2 IS NULL OR (created_at, rowid) < (?2, ?3))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4",
            )?;
            let mut rows = stmt
                .query_map(
                    params![channel_id.to_string(), before_at, before_seq, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Move the caller's read mark to the channel's newest message.
    pub fn mark_channel_read(&self, channel_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            let latest: Option<(String, i64)> = conn
                .query_row(
                    "SELECT created_at, rowid FROM messages WHERE channel_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    [channel_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((at, seq)) = latest {
                mark_read(conn, channel_id, user_id, &at, seq)?;
            }
            Ok(())
        })
    }

    /// The user's chats with the other participant, last message and unread
    /// flag. Most recent activity first; chats without messages go last.
    pub fn list_channel_summaries(&self, user_id: Uuid) -> Result<Vec<ChannelSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.alert_id, c.created_at,
                        o.id, o.username, o.avatar_url,
                        lm.content, lm.sender_id, lm.created_at,
                        EXISTS(
                            SELECT 1 FROM messages m
                            LEFT JOIN channel_reads r
                                   ON r.channel_id = m.channel_id AND r.user_id = ?1
                            WHERE m.channel_id = c.id
                              AND m.sender_id != ?1
                              AND (r.user_id IS NULL
                                   OR (m.created_at, m.rowid) > (r.last_read_at, r.last_read_seq))
                        )
                 FROM channels c
                 JOIN profiles o ON o.id = CASE WHEN c.participant_a = ?1
                                                THEN c.participant_b ELSE c.participant_a END
                 LEFT JOIN messages lm ON lm.id = (
                     SELECT m.id FROM messages m WHERE m.channel_id = c.id
                     ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1)
                 WHERE c.participant_a = ?1 OR c.participant_b = ?1
                 ORDER BY lm.created_at IS NULL, lm.created_at DESC, c.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], summary_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Read marks only move forward.
fn mark_read(conn: &Connection, channel_id: Uuid, user_id: Uuid, at: &str, seq: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO channel_reads (channel_id, user_id, last_read_at, last_read_seq)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(channel_id, user_id) DO UPDATE
         SET last_read_at = excluded.last_read_at, last_read_seq = excluded.last_read_seq
         WHERE (excluded.last_read_at, excluded.last_read_seq)
             > (channel_reads.last_read_at, channel_reads.last_read_seq)",
        params![channel_id.to_string(), user_id.to_string(), at, seq],
    )?;
    Ok(())
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: parsed(row, 0)?,
        alert_id: parsed_opt(row, 1)?,
        participant_ids: [parsed(row, 2)?, parsed(row, 3)?],
        created_at: parsed(row, 4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parsed(row, 0)?,
        channel_id: parsed(row, 1)?,
        sender_id: parsed(row, 2)?,
        content: row.get(3)?,
        created_at: parsed(row, 4)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelSummary> {
    let last_message = match row.get::<_, Option<String>>(6)? {
        Some(content) => Some(LastMessage {
            content,
            sender_id: parsed(row, 7)?,
            created_at: parsed(row, 8)?,
        }),
        None => None,
    };

    Ok(ChannelSummary {
        id: parsed(row, 0)?,
        alert_id: parsed_opt(row, 1)?,
        created_at: parsed(row, 2)?,
        other_participant: ParticipantSummary {
            id: parsed(row, 3)?,
            username: row.get(4)?,
            avatar_url: row.get(5)?,
        },
        last_message,
        has_unread_messages: row.get(9)?,
    })
}
