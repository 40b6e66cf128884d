//! The reaction ledger: likes, dislikes, reports, views, and the moderation
//! flag.
//!
//! Likes and dislikes are idempotent set-membership toggles over the
//! `reactions` table.  The `(story_id, user_id)` primary key guarantees the
//! two sets stay disjoint, and every toggle runs inside one transaction so
//! concurrent toggles from different users never lose an update.  Counts are
//! always derived from the membership rows, never incremented on their own.

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ReactionKind, ReactionTally, Report, ReportedStory, Story};
use crate::stories::{ensure_story_exists, parse_timestamp};

/// How many times a toggle retries after losing the database lock before
/// surfacing [`StoreError::Conflict`].
const CONFLICT_RETRIES: u32 = 3;

impl Database {
    // ------------------------------------------------------------------
    // Like / dislike toggles
    // ------------------------------------------------------------------

    /// Toggle `user_id`'s membership in the story's liked set.
    ///
    /// Adding a like first evicts any dislike the user holds, so a user is
    /// never in both sets.  `user_id` may be any non-empty identifier; guests
    /// react under whatever stable id their client presents, with no user
    /// lookup.
    pub fn toggle_like(&self, story_id: Uuid, user_id: &str) -> Result<ReactionTally> {
        self.toggle_reaction(story_id, user_id, ReactionKind::Like)
    }

    /// Toggle `user_id`'s membership in the story's disliked set.
    /// Symmetric to [`Database::toggle_like`].
    pub fn toggle_dislike(&self, story_id: Uuid, user_id: &str) -> Result<ReactionTally> {
        self.toggle_reaction(story_id, user_id, ReactionKind::Dislike)
    }

    fn toggle_reaction(
        &self,
        story_id: Uuid,
        user_id: &str,
        kind: ReactionKind,
    ) -> Result<ReactionTally> {
        if user_id.trim().is_empty() {
            return Err(StoreError::InvalidArgument("missing userId".into()));
        }

        for attempt in 0.. {
            match self.try_toggle(story_id, user_id, kind) {
                Err(e) if is_busy(&e) => {
                    if attempt >= CONFLICT_RETRIES {
                        tracing::warn!(
                            story = %story_id,
                            user = user_id,
                            "toggle lost the database lock after retries"
                        );
                        return Err(StoreError::Conflict);
                    }
                    std::thread::sleep(Duration::from_millis(10 << attempt));
                }
                other => return other,
            }
        }
        unreachable!()
    }

    fn try_toggle(
        &self,
        story_id: Uuid,
        user_id: &str,
        kind: ReactionKind,
    ) -> Result<ReactionTally> {
        let tx = self.conn().unchecked_transaction()?;
        ensure_story_exists(&tx, story_id)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT kind FROM reactions WHERE story_id = ?1 AND user_id = ?2",
                params![story_id.to_string(), user_id],
                |row| row.get(0),
            )
            .optional()?;

        if current.as_deref() == Some(kind.as_str()) {
            // Already a member: toggle off.
            tx.execute(
                "DELETE FROM reactions WHERE story_id = ?1 AND user_id = ?2",
                params![story_id.to_string(), user_id],
            )?;
        } else {
            // Toggle on.  The upsert replaces an opposite reaction in the
            // same statement, enforcing mutual exclusion before insertion.
            tx.execute(
                "INSERT INTO reactions (story_id, user_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (story_id, user_id)
                 DO UPDATE SET kind = excluded.kind, created_at = excluded.created_at",
                params![
                    story_id.to_string(),
                    user_id,
                    kind.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        self.reaction_tally(story_id)
    }

    /// The current reaction state of one story: derived counts plus both
    /// membership sets, ordered by when each reaction was recorded.
    pub fn reaction_tally(&self, story_id: Uuid) -> Result<ReactionTally> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, kind FROM reactions
             WHERE story_id = ?1
             ORDER BY created_at ASC, user_id ASC",
        )?;

        let rows = stmt.query_map(params![story_id.to_string()], |row| {
            let user_id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok((user_id, kind))
        })?;

        let mut liked_by = Vec::new();
        let mut disliked_by = Vec::new();
        for row in rows {
            let (user_id, kind) = row?;
            if kind == ReactionKind::Like.as_str() {
                liked_by.push(user_id);
            } else {
                disliked_by.push(user_id);
            }
        }

        Ok(ReactionTally {
            likes: liked_by.len() as u64,
            dislikes: disliked_by.len() as u64,
            liked_by,
            disliked_by,
        })
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    /// Append a report and return the story's new report total.
    ///
    /// Reports are deliberately not deduplicated: they are advisory input to
    /// moderators, not a membership set.
    pub fn report_story(
        &self,
        story_id: Uuid,
        user_id: Option<&str>,
        reason: &str,
        details: Option<&str>,
    ) -> Result<u64> {
        if reason.trim().is_empty() {
            return Err(StoreError::InvalidArgument("missing reason".into()));
        }

        let tx = self.conn().unchecked_transaction()?;
        ensure_story_exists(&tx, story_id)?;

        tx.execute(
            "INSERT INTO reports (id, story_id, user_id, reason, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                story_id.to_string(),
                user_id,
                reason,
                details.unwrap_or(""),
                Utc::now().to_rfc3339(),
            ],
        )?;

        let count: u64 = tx.query_row(
            "SELECT COUNT(*) FROM reports WHERE story_id = ?1",
            params![story_id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(count)
    }

    /// All reports against one story, oldest first.
    pub fn reports_for_story(&self, story_id: Uuid) -> Result<Vec<Report>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, reason, details, created_at
             FROM reports WHERE story_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![story_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let user_id: Option<String> = row.get(1)?;
            let reason: String = row.get(2)?;
            let details: String = row.get(3)?;
            let ts_str: String = row.get(4)?;
            Ok((id_str, user_id, reason, details, ts_str))
        })?;

        let mut reports = Vec::new();
        for row in rows {
            let (id_str, user_id, reason, details, ts_str) = row?;
            reports.push(Report {
                id: Uuid::parse_str(&id_str)?,
                user_id,
                reason,
                details,
                created_at: parse_timestamp(&ts_str)?,
            });
        }
        Ok(reports)
    }

    /// Moderation queue: every story with at least one report, newest story
    /// first, each with its full report sequence.
    pub fn stories_with_reports(&self) -> Result<Vec<ReportedStory>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.id, s.title, s.author, s.created_at
             FROM stories s
             WHERE EXISTS (SELECT 1 FROM reports r WHERE r.story_id = s.id)
             ORDER BY s.created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let title: String = row.get(1)?;
            let author: String = row.get(2)?;
            let ts_str: String = row.get(3)?;
            Ok((id_str, title, author, ts_str))
        })?;

        let mut heads = Vec::new();
        for row in rows {
            heads.push(row?);
        }

        let mut reported = Vec::with_capacity(heads.len());
        for (id_str, title, author, ts_str) in heads {
            let id = Uuid::parse_str(&id_str)?;
            reported.push(ReportedStory {
                id,
                title,
                author,
                created_at: parse_timestamp(&ts_str)?,
                reports: self.reports_for_story(id)?,
            });
        }
        Ok(reported)
    }

    // ------------------------------------------------------------------
    // Moderation flag & views
    // ------------------------------------------------------------------

    /// Set the moderation flag and return the updated story.
    ///
    /// Idempotent; touches no reaction or report data.  Authorization is the
    /// caller's responsibility.
    pub fn set_hidden(&self, story_id: Uuid, hidden: bool) -> Result<Story> {
        let affected = self.conn().execute(
            "UPDATE stories SET hidden = ?1 WHERE id = ?2",
            params![hidden, story_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_story(story_id)
    }

    /// Record one view and return the new total.
    ///
    /// A single in-place increment, so concurrent views never lose updates.
    pub fn record_view(&self, story_id: Uuid) -> Result<u64> {
        self.conn()
            .query_row(
                "UPDATE stories SET views = views + 1 WHERE id = ?1 RETURNING views",
                params![story_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v.max(0) as u64)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

fn is_busy(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(f, _))
            if f.code == rusqlite::ErrorCode::DatabaseBusy
                || f.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
