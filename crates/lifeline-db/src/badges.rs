use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;
use uuid::Uuid;

use lifeline_types::api::BadgeSummary;
use lifeline_types::models::{Badge, BadgeKind, milestone_threshold};

use crate::alerts::count_responses;
use crate::models::parsed;
use crate::{Database, Result};

impl Database {
    pub fn list_badges(&self) -> Result<Vec<Badge>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, description, kind, threshold FROM badges ORDER BY name")?;
            let rows = stmt
                .query_map([], badge_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_badge(&self, id: Uuid) -> Result<Option<Badge>> {
        self.with_conn(|conn| query_badge(conn, id))
    }

    /// Badges held by a user, in the order they were earned.
    pub fn user_badges(&self, user_id: Uuid) -> Result<Vec<BadgeSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.id, b.name FROM user_badges ub
                 JOIN badges b ON b.id = ub.badge_id
                 WHERE ub.user_id = ?1
                 ORDER BY ub.earned_at ASC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(BadgeSummary {
                        id: parsed(row, 0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Idempotent award. Returns true if the badge was newly granted.
    pub fn award_badge(&self, user_id: Uuid, badge_id: Uuid, awarded_by: Option<Uuid>) -> Result<bool> {
        self.with_conn(|conn| insert_user_badge(conn, user_id, badge_id, awarded_by))
    }

    /// Grant every milestone badge the user's response count qualifies for.
    /// Returns the count and the badges newly awarded.
    pub fn award_milestones(&self, user_id: Uuid) -> Result<(u32, Vec<Badge>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let responses = count_responses(&tx, user_id)?;

            let milestones: Vec<Badge> = {
                let mut stmt = tx.prepare(
                    "SELECT id, name, description, kind, threshold FROM badges WHERE kind = ?1",
                )?;
                let rows = stmt
                    .query_map([BadgeKind::Milestone.as_str()], badge_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            let mut awarded = Vec::new();
            for badge in milestones {
                let eligible = badge
                    .threshold
                    .as_deref()
                    .and_then(milestone_threshold)
                    .is_some_and(|needed| responses >= needed);
                if eligible && insert_user_badge(&tx, user_id, badge.id, None)? {
                    info!("Awarded badge {} to {}", badge.name, user_id);
                    awarded.push(badge);
                }
            }

            tx.commit()?;
            Ok((responses, awarded))
        })
    }
}

fn insert_user_badge(conn: &Connection, user_id: Uuid, badge_id: Uuid, awarded_by: Option<Uuid>) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO user_badges (user_id, badge_id, awarded_by) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, badge_id) DO NOTHING",
        params![user_id.to_string(), badge_id.to_string(), awarded_by.map(|id| id.to_string())],
    )?;
    Ok(changed > 0)
}

fn query_badge(conn: &Connection, id: Uuid) -> Result<Option<Badge>> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, kind, threshold FROM badges WHERE id = ?1",
            [id.to_string()],
            badge_from_row,
        )
        .optional()?)
}

fn badge_from_row(row: &Row<'_>) -> rusqlite::Result<Badge> {
    Ok(Badge {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind: parsed(row, 3)?,
        threshold: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::tests::user;

    #[test]
    fn seeded_badges_exist() {
        let db = Database::open_in_memory().unwrap();
        let badges = db.list_badges().unwrap();
        assert_eq!(badges.len(), 4);
        assert_eq!(
            badges.iter().filter(|b| b.kind == BadgeKind::Milestone).count(),
            3
        );
    }

    #[test]
    fn admin_award_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "alice");
        let admin = user(&db, "admin");
        let champion = db
            .list_badges()
            .unwrap()
            .into_iter()
            .find(|b| b.kind == BadgeKind::Admin)
            .unwrap();

        assert!(db.award_badge(alice, champion.id, Some(admin)).unwrap());
        assert!(!db.award_badge(alice, champion.id, Some(admin)).unwrap());
        let held = db.user_badges(alice).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].name, "Community Champion");
    }

    #[test]
    fn milestones_follow_response_count() {
        let db = Database::open_in_memory().unwrap();
        let helper = user(&db, "helper");

        let (count, awarded) = db.award_milestones(helper).unwrap();
        assert_eq!(count, 0);
        assert!(awarded.is_empty());

        for i in 0..3 {
            let someone = user(&db, &format!("user{i}"));
            let alert = db.create_alert(someone, "help").unwrap();
            db.send_offer(alert.id, helper, "here", 3).unwrap();
        }

        let (count, awarded) = db.award_milestones(helper).unwrap();
        assert_eq!(count, 3);
        let mut names: Vec<_> = awarded.iter().map(|b| b.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["First Responder", "Steady Hand"]);

        // Second run awards nothing new
        let (_, again) = db.award_milestones(helper).unwrap();
        assert!(again.is_empty());
        assert_eq!(db.user_badges(helper).unwrap().len(), 2);
    }
}
