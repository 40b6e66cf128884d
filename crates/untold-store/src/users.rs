//! CRUD operations for [`User`] records, pending signups, and bookmarks.
//!
//! Bookmarks live on the user, not the story: the toggle never touches a
//! story row, and a bookmarked story may be deleted out from under the
//! bookmark.  Dangling ids are skipped when the bookmark list is resolved.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{PendingSignup, Story, User};
use crate::stories::parse_timestamp;

impl Database {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a verified user and return the stored record.
    pub fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        self.conn().execute(
            "INSERT INTO users (id, name, email, password_hash, verified, two_fa, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, 0, 0, ?5)",
            params![
                id.to_string(),
                name,
                email,
                password_hash,
                now.to_rfc3339(),
            ],
        )?;

        self.get_user(id)
    }

    /// Fetch a single user by UUID.
    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Look a user up by email.  Returns `None` rather than erroring so
    /// callers can branch on existence.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    /// Store an active OTP and its expiry on a user.
    pub fn set_user_otp(
        &self,
        user_id: Uuid,
        otp: &str,
        expires: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET otp = ?1, otp_expires = ?2 WHERE id = ?3",
            params![otp, expires.to_rfc3339(), user_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Clear any active OTP on a user.
    pub fn clear_user_otp(&self, user_id: Uuid) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET otp = NULL, otp_expires = NULL WHERE id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(())
    }

    /// Replace a user's password hash.
    pub fn set_password(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, user_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pending signups
    // ------------------------------------------------------------------

    /// Insert or replace the pending signup for an email.  A re-requested
    /// OTP simply overwrites the previous one.
    pub fn upsert_pending_signup(&self, pending: &PendingSignup) -> Result<()> {
        self.conn().execute(
            "INSERT INTO pending_signups (email, name, password_hash, otp, otp_expires, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (email)
             DO UPDATE SET name = excluded.name,
                           password_hash = excluded.password_hash,
                           otp = excluded.otp,
                           otp_expires = excluded.otp_expires",
            params![
                pending.email,
                pending.name,
                pending.password_hash,
                pending.otp,
                pending.otp_expires.to_rfc3339(),
                pending.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch the pending signup for an email, if any.
    pub fn get_pending_signup(&self, email: &str) -> Result<Option<PendingSignup>> {
        self.conn()
            .query_row(
                "SELECT email, name, password_hash, otp, otp_expires, created_at
                 FROM pending_signups WHERE email = ?1",
                params![email],
                |row| {
                    let email: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let password_hash: String = row.get(2)?;
                    let otp: String = row.get(3)?;
                    let expires_str: String = row.get(4)?;
                    let created_str: String = row.get(5)?;
                    Ok((email, name, password_hash, otp, expires_str, created_str))
                },
            )
            .optional()?
            .map(
                |(email, name, password_hash, otp, expires_str, created_str)| {
                    Ok(PendingSignup {
                        email,
                        name,
                        password_hash,
                        otp,
                        otp_expires: parse_timestamp(&expires_str)?,
                        created_at: parse_timestamp(&created_str)?,
                    })
                },
            )
            .transpose()
    }

    /// Remove the pending signup for an email (after verification or abort).
    pub fn delete_pending_signup(&self, email: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM pending_signups WHERE email = ?1",
            params![email],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bookmarks
    // ------------------------------------------------------------------

    /// Toggle a story in the user's bookmark set.
    ///
    /// Returns whether the story is bookmarked after the call, plus the full
    /// id set.  The story itself is never touched or even looked up; a
    /// bookmark may point at a story that no longer exists.
    pub fn toggle_bookmark(&self, user_id: Uuid, story_id: Uuid) -> Result<(bool, Vec<Uuid>)> {
        let tx = self.conn().unchecked_transaction()?;
        ensure_user_exists(&tx, user_id)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM bookmarks WHERE user_id = ?1 AND story_id = ?2",
                params![user_id.to_string(), story_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let bookmarked = if exists.is_some() {
            tx.execute(
                "DELETE FROM bookmarks WHERE user_id = ?1 AND story_id = ?2",
                params![user_id.to_string(), story_id.to_string()],
            )?;
            false
        } else {
            tx.execute(
                "INSERT INTO bookmarks (user_id, story_id, created_at) VALUES (?1, ?2, ?3)",
                params![
                    user_id.to_string(),
                    story_id.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            true
        };
        tx.commit()?;

        Ok((bookmarked, self.bookmark_ids(user_id)?))
    }

    /// The user's bookmarked story ids, oldest bookmark first.
    pub fn bookmark_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT story_id FROM bookmarks WHERE user_id = ?1 ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(Uuid::parse_str(&row?)?);
        }
        Ok(ids)
    }

    /// Resolve the user's bookmarks to full stories.
    ///
    /// Bookmarks pointing at deleted stories resolve to "not found" and are
    /// skipped, matching the independent-lifetime rule.
    pub fn bookmarks_for_user(&self, user_id: Uuid) -> Result<Vec<Story>> {
        ensure_user_exists(self.conn(), user_id)?;

        let mut stories = Vec::new();
        for story_id in self.bookmark_ids(user_id)? {
            match self.get_story(story_id) {
                Ok(story) => stories.push(story),
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(stories)
    }
}

const USER_COLS: &str =
    "id, name, email, password_hash, otp, otp_expires, verified, two_fa, is_admin, created_at";

fn ensure_user_exists(conn: &rusqlite::Connection, id: Uuid) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Map a `rusqlite::Row` (in [`USER_COLS`] order) to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let email: String = row.get(2)?;
    let password_hash: String = row.get(3)?;
    let otp: Option<String> = row.get(4)?;
    let otp_expires_str: Option<String> = row.get(5)?;
    let verified: bool = row.get(6)?;
    let two_fa: bool = row.get(7)?;
    let is_admin: bool = row.get(8)?;
    let created_str: String = row.get(9)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let otp_expires: Option<DateTime<Utc>> = otp_expires_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

    Ok(User {
        id,
        name,
        email,
        password_hash,
        otp,
        otp_expires,
        verified,
        two_fa,
        is_admin,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, NewStory};
    use chrono::Duration;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_user(db: &Database, email: &str) -> User {
        db.create_user("dave", email, "$argon2id$hash").unwrap()
    }

    fn make_story(db: &Database, title: &str) -> Uuid {
        db.create_story(&NewStory {
            title: title.into(),
            category: Category::Life,
            content: "words".into(),
            tags: vec![],
            anonymous: false,
            author: None,
        })
        .unwrap()
        .id
    }

    #[test]
    fn create_and_find_by_email() {
        let db = test_db();
        let user = make_user(&db, "dave@example.com");

        assert!(user.verified);
        assert!(!user.is_admin);

        let found = db.find_user_by_email("dave@example.com").unwrap().unwrap();
        assert_eq!(found, user);
        assert!(db.find_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn otp_set_and_clear() {
        let db = test_db();
        let user = make_user(&db, "dave@example.com");
        let expires = Utc::now() + Duration::minutes(10);

        db.set_user_otp(user.id, "424242", expires).unwrap();
        let loaded = db.get_user(user.id).unwrap();
        assert_eq!(loaded.otp.as_deref(), Some("424242"));
        assert!(loaded.otp_expires.is_some());

        db.clear_user_otp(user.id).unwrap();
        let loaded = db.get_user(user.id).unwrap();
        assert!(loaded.otp.is_none());
        assert!(loaded.otp_expires.is_none());
    }

    #[test]
    fn pending_signup_upsert_replaces_otp() {
        let db = test_db();
        let now = Utc::now();
        let mut pending = PendingSignup {
            email: "eve@example.com".into(),
            name: "eve".into(),
            password_hash: "$argon2id$one".into(),
            otp: "111111".into(),
            otp_expires: now + Duration::minutes(10),
            created_at: now,
        };

        db.upsert_pending_signup(&pending).unwrap();
        pending.otp = "222222".into();
        db.upsert_pending_signup(&pending).unwrap();

        let loaded = db.get_pending_signup("eve@example.com").unwrap().unwrap();
        assert_eq!(loaded.otp, "222222");

        db.delete_pending_signup("eve@example.com").unwrap();
        assert!(db.get_pending_signup("eve@example.com").unwrap().is_none());
    }

    #[test]
    fn bookmark_toggle_is_involutive() {
        let db = test_db();
        let user = make_user(&db, "dave@example.com");
        let story = make_story(&db, "Keeper");

        let (bookmarked, ids) = db.toggle_bookmark(user.id, story).unwrap();
        assert!(bookmarked);
        assert_eq!(ids, vec![story]);

        let (bookmarked, ids) = db.toggle_bookmark(user.id, story).unwrap();
        assert!(!bookmarked);
        assert!(ids.is_empty());
    }

    #[test]
    fn bookmark_requires_existing_user() {
        let db = test_db();
        let story = make_story(&db, "Orphan");
        assert!(matches!(
            db.toggle_bookmark(Uuid::new_v4(), story),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn bookmark_survives_story_deletion_and_is_skipped_on_resolve() {
        let db = test_db();
        let user = make_user(&db, "dave@example.com");
        let kept = make_story(&db, "Kept");
        let doomed = make_story(&db, "Doomed");

        db.toggle_bookmark(user.id, kept).unwrap();
        db.toggle_bookmark(user.id, doomed).unwrap();
        db.delete_story(doomed).unwrap();

        // The dangling id is still in the raw set...
        assert_eq!(db.bookmark_ids(user.id).unwrap().len(), 2);

        // ...but resolution skips it.
        let stories = db.bookmarks_for_user(user.id).unwrap();
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].id, kept);
    }

    #[test]
    fn bookmarks_for_missing_user_is_not_found() {
        let db = test_db();
        assert!(matches!(
            db.bookmarks_for_user(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }
}
