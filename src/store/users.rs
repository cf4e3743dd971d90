//! Identity tables: users, friend edges and couple requests

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{from_millis, not_found, to_millis, StoreResult};
use crate::models::*;

// ==================== User Operations ====================

pub fn insert_user(conn: &Connection, user: &mut User) -> StoreResult<()> {
    user.id = Uuid::new_v4().to_string();

    conn.execute(
        r#"INSERT INTO users (id, username, display_name, relationship_status, partner_id,
            created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            &user.id,
            &user.username,
            &user.display_name,
            user.relationship_status,
            &user.partner_id,
            to_millis(&user.created_at),
            to_millis(&user.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> StoreResult<User> {
    conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
        .map_err(not_found(format!("User {}", id)))
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> StoreResult<User> {
    conn.query_row(
        "SELECT * FROM users WHERE username = ?1",
        params![username],
        row_to_user,
    )
    .map_err(not_found(format!("User {}", username)))
}

pub fn count_users(conn: &Connection) -> StoreResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(count)
}

/// Pair `user_id` with `partner_id`, or make the user single again when `None`.
/// Status and partner are written in one statement so the row never violates the pairing CHECK.
pub fn set_partner(
    conn: &Connection,
    user_id: &str,
    partner_id: Option<&str>,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let status = match partner_id {
        Some(_) => RelationshipStatus::InRelationship,
        None => RelationshipStatus::Single,
    };
    let rows = conn.execute(
        "UPDATE users SET relationship_status = ?1, partner_id = ?2, updated_at = ?3 WHERE id = ?4",
        params![status, partner_id, to_millis(&now), user_id],
    )?;
    Ok(rows)
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        relationship_status: row.get("relationship_status")?,
        partner_id: row.get("partner_id")?,
        created_at: from_millis(row.get("created_at")?),
        updated_at: from_millis(row.get("updated_at")?),
    })
}

// ==================== Friend Operations ====================

/// Order-independent key for a pair of users
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

pub fn insert_friend(conn: &Connection, friend: &mut Friend) -> StoreResult<()> {
    friend.id = Uuid::new_v4().to_string();

    conn.execute(
        r#"INSERT INTO friends (id, sender_id, receiver_id, pair_key, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            &friend.id,
            &friend.sender_id,
            &friend.receiver_id,
            pair_key(&friend.sender_id, &friend.receiver_id),
            friend.status,
            to_millis(&friend.created_at),
            to_millis(&friend.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_friend(conn: &Connection, id: &str) -> StoreResult<Friend> {
    conn.query_row("SELECT * FROM friends WHERE id = ?1", params![id], row_to_friend)
        .map_err(not_found(format!("Friend request {}", id)))
}

/// The single edge between two users, in whichever direction it was sent
pub fn find_friend_edge(conn: &Connection, a: &str, b: &str) -> StoreResult<Option<Friend>> {
    let friend = conn
        .query_row(
            "SELECT * FROM friends WHERE pair_key = ?1",
            params![pair_key(a, b)],
            row_to_friend,
        )
        .optional()?;
    Ok(friend)
}

/// Transition a pending edge; returns 0 when the edge is no longer pending
pub fn resolve_friend_request(
    conn: &Connection,
    id: &str,
    status: FriendStatus,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE friends SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
        params![status, to_millis(&now), id],
    )?;
    Ok(rows)
}

/// Reuse a rejected edge for a fresh request, possibly in the other direction
pub fn reopen_friend_request(
    conn: &Connection,
    id: &str,
    sender_id: &str,
    receiver_id: &str,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        r#"UPDATE friends SET sender_id = ?1, receiver_id = ?2, status = 'pending', updated_at = ?3
           WHERE id = ?4 AND status = 'rejected'"#,
        params![sender_id, receiver_id, to_millis(&now), id],
    )?;
    Ok(rows)
}

pub fn list_friends(conn: &Connection, user_id: &str) -> StoreResult<Vec<Friend>> {
    let mut stmt = conn.prepare(
        r#"SELECT * FROM friends
           WHERE (sender_id = ?1 OR receiver_id = ?1) AND status = 'accepted'
           ORDER BY updated_at DESC"#,
    )?;
    let friends = stmt
        .query_map(params![user_id], row_to_friend)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(friends)
}

pub fn list_incoming_friend_requests(conn: &Connection, user_id: &str) -> StoreResult<Vec<Friend>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM friends WHERE receiver_id = ?1 AND status = 'pending' ORDER BY created_at DESC",
    )?;
    let friends = stmt
        .query_map(params![user_id], row_to_friend)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(friends)
}

fn row_to_friend(row: &Row) -> rusqlite::Result<Friend> {
    Ok(Friend {
        id: row.get("id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        status: row.get("status")?,
        created_at: from_millis(row.get("created_at")?),
        updated_at: from_millis(row.get("updated_at")?),
    })
}

// ==================== Couple Operations ====================

pub fn insert_couple(conn: &Connection, couple: &mut Couple) -> StoreResult<()> {
    couple.id = Uuid::new_v4().to_string();

    conn.execute(
        r#"INSERT INTO couples (id, requester_id, partner_id, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        params![
            &couple.id,
            &couple.requester_id,
            &couple.partner_id,
            couple.status,
            to_millis(&couple.created_at),
            to_millis(&couple.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_couple(conn: &Connection, id: &str) -> StoreResult<Couple> {
    conn.query_row("SELECT * FROM couples WHERE id = ?1", params![id], row_to_couple)
        .map_err(not_found(format!("Couple request {}", id)))
}

/// Pending request sent by `requester_id` to `partner_id` (one direction only)
pub fn find_pending_couple(
    conn: &Connection,
    requester_id: &str,
    partner_id: &str,
) -> StoreResult<Option<Couple>> {
    let couple = conn
        .query_row(
            r#"SELECT * FROM couples
               WHERE requester_id = ?1 AND partner_id = ?2 AND status = 'pending'
               ORDER BY created_at DESC LIMIT 1"#,
            params![requester_id, partner_id],
            row_to_couple,
        )
        .optional()?;
    Ok(couple)
}

/// Transition a pending couple request; returns 0 when it is no longer pending
pub fn resolve_couple(
    conn: &Connection,
    id: &str,
    status: CoupleStatus,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE couples SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
        params![status, to_millis(&now), id],
    )?;
    Ok(rows)
}

pub fn list_incoming_couples(conn: &Connection, user_id: &str) -> StoreResult<Vec<Couple>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM couples WHERE partner_id = ?1 AND status = 'pending' ORDER BY created_at DESC",
    )?;
    let couples = stmt
        .query_map(params![user_id], row_to_couple)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(couples)
}

fn row_to_couple(row: &Row) -> rusqlite::Result<Couple> {
    Ok(Couple {
        id: row.get("id")?,
        requester_id: row.get("requester_id")?,
        partner_id: row.get("partner_id")?,
        status: row.get("status")?,
        created_at: from_millis(row.get("created_at")?),
        updated_at: from_millis(row.get("updated_at")?),
    })
}
