use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use lifeline_types::models::{Report, ReportCategory};

use crate::models::{parsed, parsed_opt};
use crate::{Database, DbError, Result};

const REPORT_SELECT: &str = "SELECT r.id, r.reporter_id, rp.username, r.reported_user_id, tp.username,
        r.channel_id, r.category, r.comments, r.status, r.handled_by, r.handled_at, r.created_at
     FROM reports r
     JOIN profiles rp ON rp.id = r.reporter_id
     JOIN profiles tp ON tp.id = r.reported_user_id";

impl Database {
    pub fn create_report(
        &self,
        reporter_id: Uuid,
        reported_user_id: Uuid,
        channel_id: Option<Uuid>,
        category: ReportCategory,
        comments: Option<&str>,
    ) -> Result<Report> {
        self.with_conn(|conn| {
            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO reports (id, reporter_id, reported_user_id, channel_id, category, comments)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    reporter_id.to_string(),
                    reported_user_id.to_string(),
                    channel_id.map(|c| c.to_string()),
                    category.as_str(),
                    comments
                ],
            )?;
            query_report(conn, id)?.ok_or(DbError::NotFound("Report"))
        })
    }

    /// Moderation queue, newest first.
    pub fn list_reports(&self) -> Result<Vec<Report>> {
        self.with_conn(|conn| {
            let sql = format!("{REPORT_SELECT} ORDER BY r.created_at DESC, r.rowid DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], report_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        self.with_conn(|conn| query_report(conn, id))
    }

    /// Mark a pending report reviewed. Resolved reports stay resolved.
    pub fn mark_report_reviewed(&self, id: Uuid, handler: Uuid) -> Result<Report> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE reports
                 SET status = 'reviewed', handled_by = ?2,
                     handled_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status != 'resolved'",
                params![id.to_string(), handler.to_string()],
            )?;
            if changed == 0 {
                return Err(DbError::rejected("Report not found or already resolved."));
            }
            query_report(conn, id)?.ok_or(DbError::NotFound("Report"))
        })
    }
}

fn query_report(conn: &Connection, id: Uuid) -> Result<Option<Report>> {
    let sql = format!("{REPORT_SELECT} WHERE r.id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], report_from_row).optional()?)
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: parsed(row, 0)?,
        reporter_id: parsed(row, 1)?,
        reporter_username: row.get(2)?,
        reported_user_id: parsed(row, 3)?,
        reported_username: row.get(4)?,
        channel_id: parsed_opt(row, 5)?,
        category: parsed(row, 6)?,
        comments: row.get(7)?,
        status: parsed(row, 8)?,
        handled_by: parsed_opt(row, 9)?,
        handled_at: parsed_opt(row, 10)?,
        created_at: parsed(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::tests::user;
    use lifeline_types::models::ReportStatus;

    #[test]
    fn report_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let moderator = user(&db, "mod");

        let report = db
            .create_report(alice, bob, None, ReportCategory::Spam, Some("links everywhere"))
            .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.reporter_username, "alice");
        assert_eq!(report.reported_username, "bob");

        let reviewed = db.mark_report_reviewed(report.id, moderator).unwrap();
        assert_eq!(reviewed.status, ReportStatus::Reviewed);
        assert_eq!(reviewed.handled_by, Some(moderator));
        assert!(reviewed.handled_at.is_some());

        assert_eq!(db.list_reports().unwrap().len(), 1);
    }

    #[test]
    fn suspension_resolves_report() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let moderator = user(&db, "mod");
        let report = db
            .create_report(alice, bob, None, ReportCategory::Harassment, None)
            .unwrap();

        // Report must be against the suspended user.
        assert!(db.suspend_user(alice, 7, "x", Some((report.id, moderator))).is_err());
        assert!(db.get_profile(alice).unwrap().unwrap().suspended_until.is_none());

        db.suspend_user(bob, 7, "harassment", Some((report.id, moderator)))
            .unwrap();
        let report = db.get_report(report.id).unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Resolved);

        let err = db.mark_report_reviewed(report.id, moderator).unwrap_err();
        assert!(matches!(err, DbError::Rejected(_)));
    }
}
