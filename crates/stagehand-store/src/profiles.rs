//! Stored user profiles and their API credentials.

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::StoreError;

/// A remote account the user has logged into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Remote user id.
    pub id: i64,
    /// API credential; `None` when the profile was logged out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Display name.
    pub username: String,
    /// RFC 3339 timestamp of the last write.
    pub updated_at: String,
}

impl Profile {
    /// The credential, if present and non-empty.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Profile queries over a borrowed [`Database`].
pub struct ProfileRepo<'a> {
    db: &'a Database,
}

impl<'a> ProfileRepo<'a> {
    /// Wrap a database handle.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Look up a profile by id.
    pub fn get(&self, id: i64) -> Result<Option<Profile>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, api_key, username, updated_at FROM profiles WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(Profile {
                            id: row.get(0)?,
                            api_key: row.get(1)?,
                            username: row.get(2)?,
                            updated_at: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Insert or replace a profile, stamping `updated_at`.
    pub fn upsert(&self, id: i64, username: &str, api_key: Option<&str>) -> Result<Profile, StoreError> {
        let updated_at = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO profiles (id, api_key, username, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET api_key = excluded.api_key,
                     username = excluded.username, updated_at = excluded.updated_at",
                rusqlite::params![id, api_key, username, updated_at],
            )?;
            Ok(())
        })?;
        Ok(Profile {
            id,
            api_key: api_key.map(str::to_owned),
            username: username.to_owned(),
            updated_at,
        })
    }

    /// All profiles, ordered by id.
    pub fn list(&self) -> Result<Vec<Profile>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, api_key, username, updated_at FROM profiles ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    api_key: row.get(1)?,
                    username: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_profile_is_none() {
        let db = Database::in_memory().unwrap();
        assert!(ProfileRepo::new(&db).get(42).unwrap().is_none());
    }

    #[test]
    fn upsert_then_get() {
        let db = Database::in_memory().unwrap();
        let repo = ProfileRepo::new(&db);
        let _ = repo.upsert(7, "alice", Some("key-1")).unwrap();
        let p = repo.get(7).unwrap().unwrap();
        assert_eq!(p.username, "alice");
        assert_eq!(p.credential(), Some("key-1"));
    }

    #[test]
    fn upsert_replaces_credential() {
        let db = Database::in_memory().unwrap();
        let repo = ProfileRepo::new(&db);
        let _ = repo.upsert(7, "alice", Some("key-1")).unwrap();
        let _ = repo.upsert(7, "alice", None).unwrap();
        let p = repo.get(7).unwrap().unwrap();
        assert_eq!(p.credential(), None);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn empty_key_counts_as_missing() {
        let db = Database::in_memory().unwrap();
        let repo = ProfileRepo::new(&db);
        let p = repo.upsert(1, "bob", Some("")).unwrap();
        assert_eq!(p.credential(), None);
    }

    #[test]
    fn api_key_is_not_serialized() {
        let p = Profile {
            id: 1,
            api_key: Some("secret".into()),
            username: "u".into(),
            updated_at: "t".into(),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("secret"));
    }
}
