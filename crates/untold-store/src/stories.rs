//! CRUD and query operations for [`Story`] records.
//!
//! Listing, search, category, sort, and trending queries all exclude hidden
//! stories; only direct-by-id lookup returns them.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Category, Comment, NewStory, SortKey, Story};

/// Column list shared by every story SELECT.  The reaction counts are derived
/// from the `reactions` table on every read; they are never stored.
pub(crate) const STORY_COLS: &str = "\
    s.id, s.title, s.category, s.content, s.tags, s.proofs, \
    s.anonymous, s.author, s.views, s.hidden, s.created_at, \
    (SELECT COUNT(*) FROM reactions r WHERE r.story_id = s.id AND r.kind = 'like') AS likes, \
    (SELECT COUNT(*) FROM reactions r WHERE r.story_id = s.id AND r.kind = 'dislike') AS dislikes";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new story and return the stored record.
    ///
    /// When the anonymous flag is set the author label is forced to
    /// `"Anonymous"` regardless of what the client sent.
    pub fn create_story(&self, new: &NewStory) -> Result<Story> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidArgument("missing title".into()));
        }
        if new.content.trim().is_empty() {
            return Err(StoreError::InvalidArgument("missing content".into()));
        }

        let author = if new.anonymous {
            "Anonymous".to_string()
        } else {
            new.author
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or("Anonymous")
                .to_string()
        };

        let id = Uuid::new_v4();
        let now = Utc::now();

        self.conn().execute(
            "INSERT INTO stories (id, title, category, content, tags, proofs, anonymous, author, views, hidden, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?7, 0, 0, ?8)",
            params![
                id.to_string(),
                title,
                new.category.as_str(),
                new.content,
                serde_json::to_string(&new.tags)?,
                new.anonymous,
                author,
                now.to_rfc3339(),
            ],
        )?;

        self.get_story(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single story by UUID.
    ///
    /// Hidden stories are returned too: hiding only affects listings.
    pub fn get_story(&self, id: Uuid) -> Result<Story> {
        self.conn()
            .query_row(
                &format!("SELECT {STORY_COLS} FROM stories s WHERE s.id = ?1"),
                params![id.to_string()],
                row_to_story,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all visible stories, newest first.
    pub fn list_visible(&self) -> Result<Vec<Story>> {
        self.query_stories(
            &format!(
                "SELECT {STORY_COLS} FROM stories s WHERE s.hidden = 0 ORDER BY s.created_at DESC"
            ),
            params![],
        )
    }

    /// Paginated listing of visible stories, optionally restricted to one
    /// category.  Returns the total number of matching rows alongside the
    /// requested page.
    pub fn list_stories(
        &self,
        category: Option<Category>,
        limit: u32,
        offset: u32,
    ) -> Result<(u64, Vec<Story>)> {
        let (total, stories) = match category {
            Some(cat) => {
                let total: u64 = self.conn().query_row(
                    "SELECT COUNT(*) FROM stories WHERE hidden = 0 AND category = ?1",
                    params![cat.as_str()],
                    |row| row.get(0),
                )?;
                let stories = self.query_stories(
                    &format!(
                        "SELECT {STORY_COLS} FROM stories s
                         WHERE s.hidden = 0 AND s.category = ?1
                         ORDER BY s.created_at DESC LIMIT ?2 OFFSET ?3"
                    ),
                    params![cat.as_str(), limit, offset],
                )?;
                (total, stories)
            }
            None => {
                let total: u64 = self.conn().query_row(
                    "SELECT COUNT(*) FROM stories WHERE hidden = 0",
                    [],
                    |row| row.get(0),
                )?;
                let stories = self.query_stories(
                    &format!(
                        "SELECT {STORY_COLS} FROM stories s
                         WHERE s.hidden = 0
                         ORDER BY s.created_at DESC LIMIT ?1 OFFSET ?2"
                    ),
                    params![limit, offset],
                )?;
                (total, stories)
            }
        };
        Ok((total, stories))
    }

    /// Case-insensitive substring search over title, tags, and content.
    pub fn search_stories(&self, keyword: &str) -> Result<Vec<Story>> {
        let pattern = like_pattern(keyword);
        self.query_stories(
            &format!(
                "SELECT {STORY_COLS} FROM stories s
                 WHERE s.hidden = 0
                   AND (s.title LIKE ?1 ESCAPE '\\'
                     OR s.tags LIKE ?1 ESCAPE '\\'
                     OR s.content LIKE ?1 ESCAPE '\\')
                 ORDER BY s.created_at DESC"
            ),
            params![pattern],
        )
    }

    /// List visible stories in one category, newest first.
    pub fn list_by_category(&self, category: Category) -> Result<Vec<Story>> {
        self.query_stories(
            &format!(
                "SELECT {STORY_COLS} FROM stories s
                 WHERE s.hidden = 0 AND s.category = ?1
                 ORDER BY s.created_at DESC"
            ),
            params![category.as_str()],
        )
    }

    /// List visible stories under the given sort order.
    pub fn sort_stories(&self, key: SortKey) -> Result<Vec<Story>> {
        let order = match key {
            SortKey::Latest => "s.created_at DESC",
            SortKey::Views => "s.views DESC",
            SortKey::Likes => "likes DESC",
        };
        self.query_stories(
            &format!(
                "SELECT {STORY_COLS} FROM stories s WHERE s.hidden = 0 ORDER BY {order}"
            ),
            params![],
        )
    }

    /// Top visible stories ranked by a simple weighted score:
    /// `views + likes * 5`.
    pub fn trending(&self, limit: u32) -> Result<Vec<Story>> {
        self.query_stories(
            &format!(
                "SELECT {STORY_COLS} FROM stories s
                 WHERE s.hidden = 0
                 ORDER BY (s.views + (SELECT COUNT(*) FROM reactions r
                                      WHERE r.story_id = s.id AND r.kind = 'like') * 5) DESC,
                          s.created_at DESC
                 LIMIT ?1"
            ),
            params![limit],
        )
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a story by UUID.  Returns `true` if a row was deleted.
    ///
    /// Reactions, reports, and comments cascade away with the story;
    /// other users' bookmarks are deliberately left dangling.
    pub fn delete_story(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM stories WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    /// Append a comment and return the story's full comment sequence.
    pub fn add_comment(
        &self,
        story_id: Uuid,
        text: &str,
        author: Option<&str>,
        anonymous: bool,
    ) -> Result<Vec<Comment>> {
        if text.trim().is_empty() {
            return Err(StoreError::InvalidArgument("missing text".into()));
        }

        let author = if anonymous {
            "Anonymous"
        } else {
            author
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or("Anonymous")
        };

        let tx = self.conn().unchecked_transaction()?;
        ensure_story_exists(&tx, story_id)?;
        tx.execute(
            "INSERT INTO comments (id, story_id, body, author, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                story_id.to_string(),
                text,
                author,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        self.comments_for_story(story_id)
    }

    /// All comments on a story, oldest first.
    pub fn comments_for_story(&self, story_id: Uuid) -> Result<Vec<Comment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, body, author, created_at
             FROM comments WHERE story_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![story_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let text: String = row.get(1)?;
            let author: String = row.get(2)?;
            let ts_str: String = row.get(3)?;
            Ok((id_str, text, author, ts_str))
        })?;

        let mut comments = Vec::new();
        for row in rows {
            let (id_str, text, author, ts_str) = row?;
            comments.push(Comment {
                id: Uuid::parse_str(&id_str)?,
                text,
                author,
                created_at: parse_timestamp(&ts_str)?,
            });
        }
        Ok(comments)
    }

    // ------------------------------------------------------------------
    // Proof attachments
    // ------------------------------------------------------------------

    /// Append proof references to a story and return the full proof list.
    ///
    /// The references are opaque strings produced by the upload collaborator;
    /// the store never interprets them.
    pub fn append_proofs(&self, story_id: Uuid, refs: &[String]) -> Result<Vec<String>> {
        let tx = self.conn().unchecked_transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT proofs FROM stories WHERE id = ?1",
                params![story_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or(StoreError::NotFound)?;

        let mut proofs: Vec<String> = serde_json::from_str(&raw)?;
        proofs.extend(refs.iter().cloned());

        tx.execute(
            "UPDATE stories SET proofs = ?1 WHERE id = ?2",
            params![serde_json::to_string(&proofs)?, story_id.to_string()],
        )?;
        tx.commit()?;

        Ok(proofs)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn query_stories(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Story>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(args, row_to_story)?;

        let mut stories = Vec::new();
        for row in rows {
            stories.push(row?);
        }
        Ok(stories)
    }
}

/// Fail with [`StoreError::NotFound`] unless the story exists.
pub(crate) fn ensure_story_exists(conn: &rusqlite::Connection, id: Uuid) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM stories WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Escape `%`, `_`, and `\` in a search keyword and wrap it in wildcards.
fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Map a `rusqlite::Row` (in [`STORY_COLS`] order) to a [`Story`].
fn row_to_story(row: &rusqlite::Row<'_>) -> rusqlite::Result<Story> {
    let id_str: String = row.get(0)?;
    let title: String = row.get(1)?;
    let category_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let tags_json: String = row.get(4)?;
    let proofs_json: String = row.get(5)?;
    let anonymous: bool = row.get(6)?;
    let author: String = row.get(7)?;
    let views: i64 = row.get(8)?;
    let hidden: bool = row.get(9)?;
    let ts_str: String = row.get(10)?;
    let likes: i64 = row.get(11)?;
    let dislikes: i64 = row.get(12)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let category: Category = category_str.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown category: {category_str}").into(),
        )
    })?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let proofs: Vec<String> = serde_json::from_str(&proofs_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

    Ok(Story {
        id,
        title,
        category,
        content,
        tags,
        proofs,
        likes: likes.max(0) as u64,
        dislikes: dislikes.max(0) as u64,
        views: views.max(0) as u64,
        hidden,
        anonymous,
        author,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn sample_story(title: &str, category: Category) -> NewStory {
        NewStory {
            title: title.to_string(),
            category,
            content: format!("{title} content"),
            tags: vec!["first".into(), "second".into()],
            anonymous: false,
            author: Some("alice".into()),
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let db = test_db();
        let story = db
            .create_story(&sample_story("The cellar door", Category::Horror))
            .unwrap();

        let fetched = db.get_story(story.id).unwrap();
        assert_eq!(fetched, story);
        assert_eq!(fetched.likes, 0);
        assert_eq!(fetched.views, 0);
        assert_eq!(fetched.author, "alice");
        assert_eq!(fetched.tags, vec!["first", "second"]);
    }

    #[test]
    fn anonymous_story_masks_author() {
        let db = test_db();
        let mut new = sample_story("Nobody knows", Category::Confession);
        new.anonymous = true;

        let story = db.create_story(&new).unwrap();
        assert_eq!(story.author, "Anonymous");
    }

    #[test]
    fn empty_title_rejected() {
        let db = test_db();
        let mut new = sample_story("  ", Category::Life);
        new.title = "   ".into();
        assert!(matches!(
            db.create_story(&new),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn get_missing_story_is_not_found() {
        let db = test_db();
        assert!(matches!(
            db.get_story(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn hidden_excluded_from_listings_but_not_direct_get() {
        let db = test_db();
        let visible = db
            .create_story(&sample_story("Visible", Category::Travel))
            .unwrap();
        let concealed = db
            .create_story(&sample_story("Concealed", Category::Travel))
            .unwrap();
        db.set_hidden(concealed.id, true).unwrap();

        let listed = db.list_visible().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, visible.id);

        let by_cat = db.list_by_category(Category::Travel).unwrap();
        assert_eq!(by_cat.len(), 1);

        let found = db.search_stories("Concealed").unwrap();
        assert!(found.is_empty());

        // Direct-by-id access still works.
        let direct = db.get_story(concealed.id).unwrap();
        assert!(direct.hidden);
    }

    #[test]
    fn pagination_reports_total() {
        let db = test_db();
        for i in 0..5 {
            db.create_story(&sample_story(&format!("Story {i}"), Category::Funny))
                .unwrap();
        }

        let (total, page) = db.list_stories(None, 2, 0).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);

        let (total, page) = db.list_stories(Some(Category::Funny), 10, 4).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);

        let (total, _) = db.list_stories(Some(Category::Crime), 10, 0).unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn search_matches_title_tags_and_content() {
        let db = test_db();
        let mut new = sample_story("Midnight train", Category::Mystery);
        new.tags = vec!["railway".into()];
        new.content = "a conductor vanished".into();
        db.create_story(&new).unwrap();

        assert_eq!(db.search_stories("midnight").unwrap().len(), 1);
        assert_eq!(db.search_stories("RAILWAY").unwrap().len(), 1);
        assert_eq!(db.search_stories("vanished").unwrap().len(), 1);
        assert!(db.search_stories("submarine").unwrap().is_empty());
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let db = test_db();
        db.create_story(&sample_story("Fully 100% true", Category::Success))
            .unwrap();
        db.create_story(&sample_story("Somewhat true", Category::Success))
            .unwrap();

        // A bare "%" must not match everything.
        assert_eq!(db.search_stories("100%").unwrap().len(), 1);
    }

    #[test]
    fn sort_by_views_and_likes() {
        let db = test_db();
        let a = db.create_story(&sample_story("A", Category::Life)).unwrap();
        let b = db.create_story(&sample_story("B", Category::Life)).unwrap();

        db.record_view(b.id).unwrap();
        db.record_view(b.id).unwrap();
        db.toggle_like(a.id, "u1").unwrap();

        let by_views = db.sort_stories(SortKey::Views).unwrap();
        assert_eq!(by_views[0].id, b.id);

        let by_likes = db.sort_stories(SortKey::Likes).unwrap();
        assert_eq!(by_likes[0].id, a.id);
    }

    #[test]
    fn trending_weights_likes_over_views() {
        let db = test_db();
        let viewed = db
            .create_story(&sample_story("Viewed", Category::Life))
            .unwrap();
        let liked = db
            .create_story(&sample_story("Liked", Category::Life))
            .unwrap();

        // 4 views < 1 like * 5
        for _ in 0..4 {
            db.record_view(viewed.id).unwrap();
        }
        db.toggle_like(liked.id, "u1").unwrap();

        let top = db.trending(10).unwrap();
        assert_eq!(top[0].id, liked.id);
        assert_eq!(top[1].id, viewed.id);
    }

    #[test]
    fn delete_cascades_reactions_and_comments() {
        let db = test_db();
        let story = db
            .create_story(&sample_story("Doomed", Category::Crime))
            .unwrap();
        db.toggle_like(story.id, "u1").unwrap();
        db.add_comment(story.id, "gripping", Some("bob"), false)
            .unwrap();
        db.report_story(story.id, Some("u2"), "spam", None).unwrap();

        assert!(db.delete_story(story.id).unwrap());
        assert!(!db.delete_story(story.id).unwrap());

        let reactions: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM reactions", [], |r| r.get(0))
            .unwrap();
        let comments: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))
            .unwrap();
        let reports: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM reports", [], |r| r.get(0))
            .unwrap();
        assert_eq!((reactions, comments, reports), (0, 0, 0));
    }

    #[test]
    fn comments_append_in_order() {
        let db = test_db();
        let story = db
            .create_story(&sample_story("Chatty", Category::Funny))
            .unwrap();

        db.add_comment(story.id, "first!", Some("bob"), false)
            .unwrap();
        let comments = db.add_comment(story.id, "me too", None, true).unwrap();

        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "first!");
        assert_eq!(comments[0].author, "bob");
        assert_eq!(comments[1].author, "Anonymous");
    }

    #[test]
    fn comment_on_missing_story_is_not_found() {
        let db = test_db();
        assert!(matches!(
            db.add_comment(Uuid::new_v4(), "hello", None, false),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn empty_comment_rejected() {
        let db = test_db();
        let story = db
            .create_story(&sample_story("Quiet", Category::Life))
            .unwrap();
        assert!(matches!(
            db.add_comment(story.id, "  ", None, false),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn proofs_accumulate() {
        let db = test_db();
        let story = db
            .create_story(&sample_story("Evidence", Category::Crime))
            .unwrap();

        let proofs = db
            .append_proofs(story.id, &["/uploads/a.png".to_string()])
            .unwrap();
        assert_eq!(proofs, vec!["/uploads/a.png"]);

        let proofs = db
            .append_proofs(
                story.id,
                &["/uploads/b.png".to_string(), "/uploads/c.pdf".to_string()],
            )
            .unwrap();
        assert_eq!(proofs.len(), 3);

        let fetched = db.get_story(story.id).unwrap();
        assert_eq!(fetched.proofs, proofs);
    }

    #[test]
    fn proofs_on_missing_story_is_not_found() {
        let db = test_db();
        assert!(matches!(
            db.append_proofs(Uuid::new_v4(), &["/uploads/x.png".to_string()]),
            Err(StoreError::NotFound)
        ));
    }
}
