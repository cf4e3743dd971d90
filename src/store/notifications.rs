use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_millis, to_millis, StoreResult};
use crate::models::Notification;

// ==================== Notification Operations ====================

pub fn insert_notification(conn: &Connection, notification: &Notification) -> StoreResult<()> {
    conn.execute(
        r#"INSERT INTO notifications (id, user_id, notification_type, resource_type, resource_id,
            title, body, read, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            &notification.id,
            &notification.user_id,
            &notification.notification_type,
            &notification.resource_type,
            &notification.resource_id,
            &notification.title,
            &notification.body,
            notification.read,
            to_millis(&notification.created_at),
        ],
    )?;
    Ok(())
}

pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> StoreResult<Vec<Notification>> {
    let mut stmt = conn.prepare(
        r#"SELECT * FROM notifications WHERE user_id = ?1
           ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"#,
    )?;
    let notifications = stmt
        .query_map(params![user_id, limit, offset], row_to_notification)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notifications)
}

pub fn mark_notification_read(conn: &Connection, id: &str, user_id: &str) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    Ok(rows)
}

fn row_to_notification(row: &Row) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        notification_type: row.get("notification_type")?,
        resource_type: row.get("resource_type")?,
        resource_id: row.get("resource_id")?,
        title: row.get("title")?,
        body: row.get("body")?,
        read: row.get("read")?,
        created_at: from_millis(row.get("created_at")?),
    })
}

// ==================== Check-in Cool-down ====================

pub fn checkin_last_notified(conn: &Connection, space_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
    let at: Option<i64> = conn
        .query_row(
            "SELECT last_notified_at FROM checkin_reminders WHERE space_id = ?1",
            params![space_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(at.map(from_millis))
}

/// Claim the space's reminder slot: records `now` unless a reminder was already sent after
/// `cooldown_start`. Returns 1 when the claim succeeded, 0 when still cooling down.
pub fn claim_checkin_reminder(
    conn: &Connection,
    space_id: &str,
    now: DateTime<Utc>,
    cooldown_start: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        r#"INSERT INTO checkin_reminders (space_id, last_notified_at) VALUES (?1, ?2)
           ON CONFLICT(space_id) DO UPDATE SET last_notified_at = excluded.last_notified_at
           WHERE checkin_reminders.last_notified_at <= ?3"#,
        params![space_id, to_millis(&now), to_millis(&cooldown_start)],
    )?;
    Ok(rows)
}
