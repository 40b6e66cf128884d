//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `stories`, `reactions`, `reports`, `comments`,
//! `users`, `pending_signups`, and `bookmarks`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Stories
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS stories (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    title      TEXT NOT NULL,
    category   TEXT NOT NULL,                 -- fixed enum, validated in code
    content    TEXT NOT NULL,
    tags       TEXT NOT NULL DEFAULT '[]',    -- JSON array of strings
    proofs     TEXT NOT NULL DEFAULT '[]',    -- JSON array of upload refs
    anonymous  INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    author     TEXT NOT NULL DEFAULT 'Anonymous',
    views      INTEGER NOT NULL DEFAULT 0,    -- monotonic counter
    hidden     INTEGER NOT NULL DEFAULT 0,    -- moderation flag
    created_at TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_stories_category ON stories(category, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_stories_created  ON stories(created_at DESC);

-- ----------------------------------------------------------------
-- Reactions (likes / dislikes)
--
-- One row per (story, user).  The primary key is what makes the
-- liked/disliked sets disjoint: a user holds at most one reaction
-- per story, and its `kind` says which set they are in.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    story_id   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL CHECK (kind IN ('like', 'dislike')),
    created_at TEXT NOT NULL,

    PRIMARY KEY (story_id, user_id),
    FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reactions_story_kind ON reactions(story_id, kind);

-- ----------------------------------------------------------------
-- Reports (append-only, deliberately not deduplicated)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reports (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    story_id   TEXT NOT NULL,
    user_id    TEXT,                          -- reporter, may be absent
    reason     TEXT NOT NULL,
    details    TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,

    FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reports_story ON reports(story_id, created_at);

-- ----------------------------------------------------------------
-- Comments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS comments (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    story_id   TEXT NOT NULL,
    body       TEXT NOT NULL,
    author     TEXT NOT NULL DEFAULT 'Anonymous',
    created_at TEXT NOT NULL,

    FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_comments_story ON comments(story_id, created_at);

-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    otp           TEXT,                       -- active one-time code, if any
    otp_expires   TEXT,
    verified      INTEGER NOT NULL DEFAULT 0,
    two_fa        INTEGER NOT NULL DEFAULT 0,
    is_admin      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Pending signups (awaiting OTP verification)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_signups (
    email         TEXT PRIMARY KEY NOT NULL,
    name          TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    otp           TEXT NOT NULL,
    otp_expires   TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Bookmarks
--
-- story_id intentionally carries no foreign key: a bookmark outlives
-- the story it points at, and dangling ids are skipped on lookup.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS bookmarks (
    user_id    TEXT NOT NULL,
    story_id   TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_id, story_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
