//! post_mentions table. Every status change is a guarded update on `status = 'pending'`
//! so concurrent writers resolve to whichever lands first.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{from_millis, not_found, to_millis, StoreResult};
use crate::models::*;

/// Insert unless a mention for (post, user) already exists; returns rows inserted
pub fn insert_mention_if_absent(conn: &Connection, mention: &mut PostMention) -> StoreResult<usize> {
    mention.id = Uuid::new_v4().to_string();

    let rows = conn.execute(
        r#"INSERT INTO post_mentions (id, post_id, mentioned_user_id, mentioner_user_id,
            timeout_seconds, created_at, viewed_at, last_notified_at, status)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, 'pending')
           ON CONFLICT(post_id, mentioned_user_id) DO NOTHING"#,
        params![
            &mention.id,
            &mention.post_id,
            &mention.mentioned_user_id,
            &mention.mentioner_user_id,
            mention.timeout_seconds,
            to_millis(&mention.created_at),
        ],
    )?;
    Ok(rows)
}

pub fn get_mention(conn: &Connection, id: &str) -> StoreResult<PostMention> {
    conn.query_row(
        "SELECT * FROM post_mentions WHERE id = ?1",
        params![id],
        row_to_mention,
    )
    .map_err(not_found(format!("Mention {}", id)))
}

/// Record the user's response (viewed or ignored) on a still-pending mention
pub fn respond_to_mention(
    conn: &Connection,
    id: &str,
    status: MentionStatus,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE post_mentions SET status = ?1, viewed_at = ?2 WHERE id = ?3 AND status = 'pending'",
        params![status, to_millis(&now), id],
    )?;
    Ok(rows)
}

/// Flip a due mention to expired. `notified_at` is recorded only when a notification is sent.
pub fn expire_mention(
    conn: &Connection,
    id: &str,
    notified_at: Option<DateTime<Utc>>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        r#"UPDATE post_mentions
           SET status = 'expired', last_notified_at = COALESCE(?1, last_notified_at)
           WHERE id = ?2 AND status = 'pending' AND viewed_at IS NULL"#,
        params![notified_at.as_ref().map(to_millis), id],
    )?;
    Ok(rows)
}

/// Re-arm a mention with a fresh deadline. Keeps `last_notified_at` so the cool-down survives.
pub fn rearm_mention(
    conn: &Connection,
    id: &str,
    timeout_seconds: i64,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        r#"UPDATE post_mentions
           SET status = 'pending', timeout_seconds = ?1, created_at = ?2, viewed_at = NULL
           WHERE id = ?3"#,
        params![timeout_seconds, to_millis(&now), id],
    )?;
    Ok(rows)
}

/// Pending, unviewed mentions whose deadline is at or before `now`
pub fn due_mentions(conn: &Connection, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<PostMention>> {
    let mut stmt = conn.prepare(
        r#"SELECT * FROM post_mentions
           WHERE status = 'pending' AND viewed_at IS NULL
             AND created_at + timeout_seconds * 1000 <= ?1
           ORDER BY created_at ASC LIMIT ?2"#,
    )?;
    let mentions = stmt
        .query_map(params![to_millis(&now), limit], row_to_mention)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(mentions)
}

pub fn pending_mentions_for(conn: &Connection, user_id: &str) -> StoreResult<Vec<PostMention>> {
    let mut stmt = conn.prepare(
        r#"SELECT * FROM post_mentions
           WHERE mentioned_user_id = ?1 AND status = 'pending'
           ORDER BY created_at + timeout_seconds * 1000 ASC"#,
    )?;
    let mentions = stmt
        .query_map(params![user_id], row_to_mention)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(mentions)
}

fn row_to_mention(row: &Row) -> rusqlite::Result<PostMention> {
    let viewed_at: Option<i64> = row.get("viewed_at")?;
    let last_notified_at: Option<i64> = row.get("last_notified_at")?;

    Ok(PostMention {
        id: row.get("id")?,
        post_id: row.get("post_id")?,
        mentioned_user_id: row.get("mentioned_user_id")?,
        mentioner_user_id: row.get("mentioner_user_id")?,
        timeout_seconds: row.get("timeout_seconds")?,
        created_at: from_millis(row.get("created_at")?),
        viewed_at: viewed_at.map(from_millis),
        last_notified_at: last_notified_at.map(from_millis),
        status: row.get("status")?,
    })
}
