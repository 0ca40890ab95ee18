use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id                       TEXT PRIMARY KEY,
            username                 TEXT NOT NULL UNIQUE,
            password                 TEXT NOT NULL,
            role                     TEXT NOT NULL DEFAULT 'user',
            full_name                TEXT,
            bio                      TEXT,
            avatar_url               TEXT,
            phone_number             TEXT,
            age                      INTEGER,
            city                     TEXT,
            state_region             TEXT,
            profession               TEXT,
            mood_status              TEXT,
            professional_type        TEXT,
            professional_verified    INTEGER NOT NULL DEFAULT 0,
            military_branch          TEXT,
            military_verified        INTEGER NOT NULL DEFAULT 0,
            is_available_for_support INTEGER NOT NULL DEFAULT 0,
            suspended_until          TEXT,
            suspension_reason        TEXT,
            created_at               TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at               TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS crisis_alerts (
            id               TEXT PRIMARY KEY,
            created_by       TEXT NOT NULL REFERENCES profiles(id),
            status           TEXT NOT NULL DEFAULT 'active',
            initial_message  TEXT NOT NULL,
            resolution_type  TEXT,
            resolved_at      TEXT,
            created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_status
            ON crisis_alerts(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_creator
            ON crisis_alerts(created_by, status);

        CREATE TABLE IF NOT EXISTS response_offers (
            id             TEXT PRIMARY KEY,
            alert_id       TEXT NOT NULL REFERENCES crisis_alerts(id),
            responder_id   TEXT NOT NULL REFERENCES profiles(id),
            offer_message  TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(alert_id, responder_id)
        );

        CREATE TABLE IF NOT EXISTS alert_responders (
            alert_id      TEXT NOT NULL REFERENCES crisis_alerts(id),
            responder_id  TEXT NOT NULL REFERENCES profiles(id),
            created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (alert_id, responder_id)
        );

        CREATE TABLE IF NOT EXISTS channels (
            id             TEXT PRIMARY KEY,
            alert_id       TEXT REFERENCES crisis_alerts(id),
            participant_a  TEXT NOT NULL REFERENCES profiles(id),
            participant_b  TEXT NOT NULL REFERENCES profiles(id),
            created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_channels_a ON channels(participant_a);
        CREATE INDEX IF NOT EXISTS idx_channels_b ON channels(participant_b);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            sender_id   TEXT NOT NULL REFERENCES profiles(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE TABLE IF NOT EXISTS channel_reads (
            channel_id    TEXT NOT NULL REFERENCES channels(id),
            user_id       TEXT NOT NULL REFERENCES profiles(id),
            last_read_at  TEXT NOT NULL,
            -- rowid of the newest read message; orders messages sharing a timestamp
            last_read_seq INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reports (
            id                TEXT PRIMARY KEY,
            reporter_id       TEXT NOT NULL REFERENCES profiles(id),
            reported_user_id  TEXT NOT NULL REFERENCES profiles(id),
            channel_id        TEXT REFERENCES channels(id),
            category          TEXT NOT NULL,
            comments          TEXT,
            status            TEXT NOT NULL DEFAULT 'pending',
            handled_by        TEXT REFERENCES profiles(id),
            handled_at        TEXT,
            created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS badges (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL UNIQUE,
            description  TEXT NOT NULL DEFAULT '',
            kind         TEXT NOT NULL,
            threshold    TEXT
        );

        CREATE TABLE IF NOT EXISTS user_badges (
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            badge_id    TEXT NOT NULL REFERENCES badges(id),
            earned_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            awarded_by  TEXT REFERENCES profiles(id),
            PRIMARY KEY (user_id, badge_id)
        );

        CREATE TABLE IF NOT EXISTS supporter_feedback (
            id            TEXT PRIMARY KEY,
            alert_id      TEXT NOT NULL REFERENCES crisis_alerts(id),
            supporter_id  TEXT NOT NULL REFERENCES profiles(id),
            activator_id  TEXT NOT NULL REFERENCES profiles(id),
            rating        INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            comments      TEXT,
            created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(alert_id, activator_id)
        );

        -- Seed the standard badges
        INSERT OR IGNORE INTO badges (id, name, description, kind, threshold) VALUES
            ('00000000-0000-0000-0000-0000000000b1', 'First Responder',
             'Offered support on a crisis alert.', 'milestone', '1 alert'),
            ('00000000-0000-0000-0000-0000000000b2', 'Steady Hand',
             'Offered support on three crisis alerts.', 'milestone', '3 alerts'),
            ('00000000-0000-0000-0000-0000000000b3', 'Pillar of Support',
             'Offered support on ten crisis alerts.', 'milestone', '10 alerts'),
            ('00000000-0000-0000-0000-0000000000b4', 'Community Champion',
             'Recognised by the admin team.', 'admin', NULL);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
