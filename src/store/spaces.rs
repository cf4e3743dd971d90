//! Space registry tables: spaces and their member rows

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{from_millis, not_found, to_millis, StoreResult};
use crate::models::*;

// ==================== Space Operations ====================

/// Insert a space. Fails with a constraint violation when `invite_code` is taken.
pub fn insert_space(conn: &Connection, space: &mut Space) -> StoreResult<()> {
    if space.id.is_empty() {
        space.id = Uuid::new_v4().to_string();
    }

    conn.execute(
        r#"INSERT INTO spaces (id, name, space_type, invite_code, check_in_interval_seconds, status,
            created_by, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            &space.id,
            &space.name,
            space.space_type,
            &space.invite_code,
            space.check_in_interval_seconds,
            space.status,
            &space.created_by,
            to_millis(&space.created_at),
            to_millis(&space.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_space(conn: &Connection, id: &str) -> StoreResult<Space> {
    conn.query_row("SELECT * FROM spaces WHERE id = ?1", params![id], row_to_space)
        .map_err(not_found(format!("Space {}", id)))
}

pub fn find_space_by_invite_code(conn: &Connection, code: &str) -> StoreResult<Option<Space>> {
    let space = conn
        .query_row(
            "SELECT * FROM spaces WHERE invite_code = ?1",
            params![code],
            row_to_space,
        )
        .optional()?;
    Ok(space)
}

pub fn invite_code_exists(conn: &Connection, code: &str) -> StoreResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM spaces WHERE invite_code = ?1)",
        params![code],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn set_space_status(
    conn: &Connection,
    id: &str,
    status: SpaceStatus,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE spaces SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status, to_millis(&now), id],
    )?;
    Ok(rows)
}

pub fn set_check_in_interval(
    conn: &Connection,
    id: &str,
    seconds: i64,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE spaces SET check_in_interval_seconds = ?1, updated_at = ?2 WHERE id = ?3",
        params![seconds, to_millis(&now), id],
    )?;
    Ok(rows)
}

/// Active spaces where the user holds an active membership
pub fn list_spaces_for_user(conn: &Connection, user_id: &str) -> StoreResult<Vec<Space>> {
    let mut stmt = conn.prepare(
        r#"SELECT s.* FROM spaces s
           JOIN space_members m ON m.space_id = s.id
           WHERE m.user_id = ?1 AND m.status = 'active' AND s.status = 'active'
           ORDER BY s.created_at DESC"#,
    )?;
    let spaces = stmt
        .query_map(params![user_id], row_to_space)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(spaces)
}

/// Active spaces that run a check-in timer
pub fn list_check_in_spaces(conn: &Connection) -> StoreResult<Vec<Space>> {
    let mut stmt = conn.prepare(
        r#"SELECT * FROM spaces
           WHERE status = 'active' AND check_in_interval_seconds > 0
           ORDER BY created_at ASC"#,
    )?;
    let spaces = stmt
        .query_map([], row_to_space)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(spaces)
}

/// The active couple space in which the user is an active member, if any
pub fn active_couple_space_for(conn: &Connection, user_id: &str) -> StoreResult<Option<Space>> {
    let space = conn
        .query_row(
            r#"SELECT s.* FROM spaces s
               JOIN space_members m ON m.space_id = s.id
               WHERE m.user_id = ?1 AND m.status = 'active'
                 AND s.space_type = 'couple' AND s.status = 'active'
               ORDER BY s.created_at ASC LIMIT 1"#,
            params![user_id],
            row_to_space,
        )
        .optional()?;
    Ok(space)
}

/// An active couple space in which both users are active members
pub fn shared_couple_space(conn: &Connection, a: &str, b: &str) -> StoreResult<Option<Space>> {
    let space = conn
        .query_row(
            r#"SELECT s.* FROM spaces s
               JOIN space_members ma ON ma.space_id = s.id AND ma.user_id = ?1 AND ma.status = 'active'
               JOIN space_members mb ON mb.space_id = s.id AND mb.user_id = ?2 AND mb.status = 'active'
               WHERE s.space_type = 'couple' AND s.status = 'active'
               ORDER BY s.created_at ASC LIMIT 1"#,
            params![a, b],
            row_to_space,
        )
        .optional()?;
    Ok(space)
}

fn row_to_space(row: &Row) -> rusqlite::Result<Space> {
    Ok(Space {
        id: row.get("id")?,
        name: row.get("name")?,
        space_type: row.get("space_type")?,
        invite_code: row.get("invite_code")?,
        check_in_interval_seconds: row.get("check_in_interval_seconds")?,
        status: row.get("status")?,
        created_by: row.get("created_by")?,
        created_at: from_millis(row.get("created_at")?),
        updated_at: from_millis(row.get("updated_at")?),
    })
}

// ==================== Member Operations ====================

/// Insert a member row. Fails with a constraint violation when the (space, user) row exists.
pub fn insert_member(conn: &Connection, member: &mut SpaceMember) -> StoreResult<()> {
    member.id = Uuid::new_v4().to_string();

    conn.execute(
        r#"INSERT INTO space_members (id, space_id, user_id, role, status, joined_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            &member.id,
            &member.space_id,
            &member.user_id,
            member.role,
            member.status,
            to_millis(&member.joined_at),
            to_millis(&member.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_member(conn: &Connection, id: &str) -> StoreResult<SpaceMember> {
    conn.query_row(
        "SELECT * FROM space_members WHERE id = ?1",
        params![id],
        row_to_member,
    )
    .map_err(not_found(format!("Member {}", id)))
}

pub fn find_member(
    conn: &Connection,
    space_id: &str,
    user_id: &str,
) -> StoreResult<Option<SpaceMember>> {
    let member = conn
        .query_row(
            "SELECT * FROM space_members WHERE space_id = ?1 AND user_id = ?2",
            params![space_id, user_id],
            row_to_member,
        )
        .optional()?;
    Ok(member)
}

/// Move a member row from `from` to `to`; returns 0 when the row is not in `from`
pub fn transition_member(
    conn: &Connection,
    id: &str,
    from: MemberStatus,
    to: MemberStatus,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE space_members SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to, to_millis(&now), id, from],
    )?;
    Ok(rows)
}

/// Re-activate a left member row, refreshing its join time
pub fn rejoin_member(
    conn: &Connection,
    id: &str,
    to: MemberStatus,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let rows = conn.execute(
        r#"UPDATE space_members SET status = ?1, joined_at = ?2, updated_at = ?2
           WHERE id = ?3 AND status = 'left'"#,
        params![to, to_millis(&now), id],
    )?;
    Ok(rows)
}

pub fn delete_pending_member(conn: &Connection, id: &str) -> StoreResult<usize> {
    let rows = conn.execute(
        "DELETE FROM space_members WHERE id = ?1 AND status = 'pending'",
        params![id],
    )?;
    Ok(rows)
}

/// Mark every remaining member of the space as left
pub fn leave_all_members(conn: &Connection, space_id: &str, now: DateTime<Utc>) -> StoreResult<usize> {
    let rows = conn.execute(
        "UPDATE space_members SET status = 'left', updated_at = ?1 WHERE space_id = ?2 AND status != 'left'",
        params![to_millis(&now), space_id],
    )?;
    Ok(rows)
}

pub fn count_active_members(conn: &Connection, space_id: &str) -> StoreResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM space_members WHERE space_id = ?1 AND status = 'active'",
        params![space_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// All member rows of a space regardless of status
pub fn list_members(conn: &Connection, space_id: &str) -> StoreResult<Vec<SpaceMember>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM space_members WHERE space_id = ?1 ORDER BY joined_at ASC",
    )?;
    let members = stmt
        .query_map(params![space_id], row_to_member)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

pub fn list_active_members(conn: &Connection, space_id: &str) -> StoreResult<Vec<SpaceMember>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM space_members WHERE space_id = ?1 AND status = 'active' ORDER BY joined_at ASC",
    )?;
    let members = stmt
        .query_map(params![space_id], row_to_member)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

fn row_to_member(row: &Row) -> rusqlite::Result<SpaceMember> {
    Ok(SpaceMember {
        id: row.get("id")?,
        space_id: row.get("space_id")?,
        user_id: row.get("user_id")?,
        role: row.get("role")?,
        status: row.get("status")?,
        joined_at: from_millis(row.get("joined_at")?),
        updated_at: from_millis(row.get("updated_at")?),
    })
}
