use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{from_millis, not_found, to_millis, StoreResult};
use crate::models::*;

pub fn insert_post(conn: &Connection, post: &mut SpacePost) -> StoreResult<()> {
    post.id = Uuid::new_v4().to_string();

    conn.execute(
        r#"INSERT INTO space_posts (id, space_id, user_id, content, status, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        params![
            &post.id,
            &post.space_id,
            &post.user_id,
            &post.content,
            post.status,
            to_millis(&post.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_post(conn: &Connection, id: &str) -> StoreResult<SpacePost> {
    conn.query_row("SELECT * FROM space_posts WHERE id = ?1", params![id], row_to_post)
        .map_err(not_found(format!("Post {}", id)))
}

pub fn soft_delete_post(conn: &Connection, id: &str) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE space_posts SET status = 'deleted' WHERE id = ?1 AND status = 'normal'",
        params![id],
    )?;
    Ok(rows)
}

/// Newest normal post by `user_id` in `space_id`
pub fn last_post_time(
    conn: &Connection,
    space_id: &str,
    user_id: &str,
) -> StoreResult<Option<DateTime<Utc>>> {
    let latest: Option<i64> = conn.query_row(
        r#"SELECT MAX(created_at) FROM space_posts
           WHERE space_id = ?1 AND user_id = ?2 AND status = 'normal'"#,
        params![space_id, user_id],
        |row| row.get(0),
    )?;
    Ok(latest.map(from_millis))
}

fn row_to_post(row: &Row) -> rusqlite::Result<SpacePost> {
    Ok(SpacePost {
        id: row.get("id")?,
        space_id: row.get("space_id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        status: row.get("status")?,
        created_at: from_millis(row.get("created_at")?),
    })
}
