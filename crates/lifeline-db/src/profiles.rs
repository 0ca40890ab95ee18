use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use lifeline_types::models::{Profile, Role, VerificationKind};

use crate::models::{CredentialRow, PROFILE_COLUMNS, ProfileChanges, parsed, profile_from_row};
use crate::{Database, DbError, Result};

/// Default suspension when a moderator gives no duration.
pub const DEFAULT_SUSPENSION_DAYS: u32 = 7;
/// Ten years. Longer terms overflow SQLite's date range.
pub const MAX_SUSPENSION_DAYS: u32 = 3650;

impl Database {
    pub fn create_profile(&self, id: Uuid, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, username, password) VALUES (?1, ?2, ?3)",
                params![id.to_string(), username, password_hash],
            )?;
            Ok(())
        })
    }

    pub fn get_credentials(&self, username: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, username, password, role FROM profiles WHERE username = ?1",
                    [username],
                    |row| {
                        Ok(CredentialRow {
                            id: parsed(row, 0)?,
                            username: row.get(1)?,
                            password: row.get(2)?,
                            role: parsed(row, 3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.id = ?1");
            let profile = conn
                .query_row(&sql, [id.to_string()], profile_from_row)
                .optional()?;
            Ok(profile)
        })
    }

    /// Admin listing: highest role first, then by name.
    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles p
                 ORDER BY CASE p.role
                     WHEN 'super_admin' THEN 4 WHEN 'admin' THEN 3
                     WHEN 'moderator' THEN 2 WHEN 'support' THEN 1 ELSE 0 END DESC,
                   p.username ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply validated changes and return the updated profile.
    pub fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<Profile> {
        if changes.is_empty() {
            return Err(DbError::rejected("No profile fields to update."));
        }

        self.with_conn(|conn| {
            let sets: Vec<String> = changes
                .assignments
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{} = ?{}", column, i + 2))
                .collect();
            let sql = format!(
                "UPDATE profiles SET {}, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
                sets.join(", ")
            );

            let mut values = vec![rusqlite::types::Value::Text(id.to_string())];
            values.extend(changes.assignments.iter().map(|(_, v)| v.clone()));

            if conn.execute(&sql, params_from_iter(values))? == 0 {
                return Err(DbError::NotFound("Profile"));
            }

            let select = format!("SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.id = ?1");
            Ok(conn.query_row(&select, [id.to_string()], profile_from_row)?)
        })
    }

    pub fn set_role(&self, id: Uuid, role: Role) -> Result<()> {
        self.update_one(
            "UPDATE profiles SET role = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
            id,
            role.as_str(),
        )
    }

    pub fn set_verification(&self, id: Uuid, kind: VerificationKind, status: bool) -> Result<()> {
        let sql = match kind {
            VerificationKind::Military => {
                "UPDATE profiles SET military_verified = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1"
            }
            VerificationKind::Professional => {
                "UPDATE profiles SET professional_verified = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1"
            }
        };
        self.update_one(sql, id, status)
    }

    pub fn set_availability(&self, id: Uuid, available: bool) -> Result<()> {
        self.update_one(
            "UPDATE profiles SET is_available_for_support = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
            id,
            available,
        )
    }

    /// Suspend a user for `days` days and, when given, resolve the report that
    /// triggered it. Returns the suspension end.
    pub fn suspend_user(
        &self,
        id: Uuid,
        days: u32,
        reason: &str,
        report: Option<(Uuid, Uuid)>,
    ) -> Result<DateTime<Utc>> {
        if days > MAX_SUSPENSION_DAYS {
            return Err(DbError::rejected(format!(
                "Suspension cannot exceed {MAX_SUSPENSION_DAYS} days."
            )));
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let modifier = format!("+{days} days");
            let until: Option<Option<String>> = tx
                .query_row(
                    "UPDATE profiles
                     SET suspended_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?2),
                         suspension_reason = ?3,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1
                     RETURNING suspended_until",
                    params![id.to_string(), modifier, reason],
                    |row| row.get(0),
                )
                .optional()?;
            let until = until
                .ok_or(DbError::NotFound("Profile"))?
                .ok_or_else(|| DbError::rejected("Suspension end is out of range."))?;

            if let Some((report_id, handler)) = report {
                let changed = tx.execute(
                    "UPDATE reports
                     SET status = 'resolved', handled_by = ?2,
                         handled_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1 AND reported_user_id = ?3",
                    params![report_id.to_string(), handler.to_string(), id.to_string()],
                )?;
                if changed == 0 {
                    return Err(DbError::rejected("Report not found for this user."));
                }
            }

            tx.commit()?;
            until
                .parse()
                .map_err(|e| DbError::Other(anyhow::anyhow!("bad suspended_until '{}': {}", until, e)))
        })
    }

    /// Clear suspensions whose end has passed. Returns the affected users.
    pub fn lift_expired_suspensions(&self) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE profiles
                 SET suspended_until = NULL, suspension_reason = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE suspended_until IS NOT NULL
                   AND suspended_until <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 RETURNING id",
            )?;
            let ids = stmt
                .query_map([], |row| parsed(row, 0))?
                .collect::<std::result::Result<Vec<Uuid>, _>>()?;
            Ok(ids)
        })
    }

    /// Startup bootstrap of the first super admin. Returns false if no such user.
    pub fn promote_username(&self, username: &str, role: Role) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE profiles SET role = ?2 WHERE username = ?1",
                params![username, role.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    fn update_one<V: rusqlite::ToSql>(&self, sql: &str, id: Uuid, value: V) -> Result<()> {
        self.with_conn(|conn| {
            if conn.execute(sql, params![id.to_string(), value])? == 0 {
                return Err(DbError::NotFound("Profile"));
            }
            Ok(())
        })
    }
}
