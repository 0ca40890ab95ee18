//! Row-level helpers. Rows are mapped straight into `lifeline-types` models;
//! only data that never leaves the server gets its own row type here.

use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::{Type, Value};
use uuid::Uuid;

use lifeline_types::api::{AdminProfileUpdate, ProfileUpdate};
use lifeline_types::models::{
    MilitaryBranch, MoodStatus, ParseEnumError, ProfessionalType, Profile, Role,
};

/// Login lookup. Carries the password hash, so it is never serialized.
pub struct CredentialRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// Parse a TEXT column through `FromStr`.
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Like [`parsed`], with NULL and empty strings mapping to `None`.
pub(crate) fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        _ => Ok(None),
    }
}

pub(crate) const PROFILE_COLUMNS: &str = "p.id, p.username, p.role, p.full_name, p.bio, p.avatar_url, \
     p.phone_number, p.age, p.city, p.state_region, p.profession, p.mood_status, \
     p.professional_type, p.professional_verified, p.military_branch, p.military_verified, \
     p.is_available_for_support, p.suspended_until, p.suspension_reason, p.created_at, p.updated_at";

pub(crate) fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: parsed(row, 0)?,
        username: row.get(1)?,
        role: parsed(row, 2)?,
        full_name: row.get(3)?,
        bio: row.get(4)?,
        avatar_url: row.get(5)?,
        phone_number: row.get(6)?,
        age: row.get(7)?,
        city: row.get(8)?,
        state_region: row.get(9)?,
        profession: row.get(10)?,
        mood_status: parsed_opt(row, 11)?,
        professional_type: parsed_opt(row, 12)?,
        professional_verified: row.get(13)?,
        military_branch: parsed_opt(row, 14)?,
        military_verified: row.get(15)?,
        is_available_for_support: row.get(16)?,
        suspended_until: parsed_opt(row, 17)?,
        suspension_reason: row.get(18)?,
        created_at: parsed(row, 19)?,
        updated_at: parsed(row, 20)?,
    })
}

/// Validated column assignments for a profile UPDATE.
#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub(crate) assignments: Vec<(&'static str, Value)>,
}

impl ProfileChanges {
    /// Owner-editable fields. Picker values are checked against their enums.
    pub fn from_update(update: &ProfileUpdate) -> Result<Self, ParseEnumError> {
        let mut changes = Self::default();
        changes.text("username", &update.username);
        changes.text("full_name", &update.full_name);
        changes.text("phone_number", &update.phone_number);
        changes.text("bio", &update.bio);
        changes.text("city", &update.city);
        changes.text("state_region", &update.state_region);
        changes.text("profession", &update.profession);
        changes.text("avatar_url", &update.avatar_url);
        if let Some(age) = update.age {
            changes.assignments.push(("age", Value::Integer(i64::from(age))));
        }
        changes.picker::<MoodStatus>("mood_status", &update.mood_status)?;
        changes.picker::<ProfessionalType>("professional_type", &update.professional_type)?;
        changes.picker::<MilitaryBranch>("military_branch", &update.military_branch)?;
        Ok(changes)
    }

    /// Admin edit: owner fields plus the verification flags.
    pub fn from_admin_update(update: &AdminProfileUpdate) -> Result<Self, ParseEnumError> {
        let mut changes = Self::from_update(&update.fields)?;
        if let Some(v) = update.professional_verified {
            changes.assignments.push(("professional_verified", Value::Integer(v.into())));
        }
        if let Some(v) = update.military_verified {
            changes.assignments.push(("military_verified", Value::Integer(v.into())));
        }
        Ok(changes)
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    fn text(&mut self, column: &'static str, value: &Option<String>) {
        if let Some(v) = value {
            let v = v.trim();
            // Username is NOT NULL; an empty one is caught by validation upstream.
            let value = if v.is_empty() && column != "username" {
                Value::Null
            } else {
                Value::Text(v.to_string())
            };
            self.assignments.push((column, value));
        }
    }

    fn picker<T>(&mut self, column: &'static str, value: &Option<String>) -> Result<(), ParseEnumError>
    where
        T: FromStr<Err = ParseEnumError>,
    {
        if let Some(v) = value {
            if v.is_empty() {
                self.assignments.push((column, Value::Null));
            } else {
                T::from_str(v)?;
                self.assignments.push((column, Value::Text(v.clone())));
            }
        }
        Ok(())
    }
}
