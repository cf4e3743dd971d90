//! Membership state machine
//!
//! Every transition that touches more than one row (creating a couple space with both
//! owners, dissolving a space, accepting a couple request) runs inside a single
//! [`Store::transaction`], and preconditions such as couple capacity are re-read inside that
//! transaction rather than trusted from an earlier query.
//!
//! Authorization is the caller's job: this module only exposes [`MembershipService::get_role`]
//! and the mechanical transitions.

use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::{spaces, users, Store};

mod couples;
mod friends;
mod posts;
mod space_ops;

pub use couples::CoupleAcceptance;

/// A couple space never holds more than this many active members
pub const COUPLE_CAPACITY: i64 = 2;

/// What `join_by_invite_code` did for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Joined,
    RequestPending,
    AlreadyMember,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub status: JoinStatus,
    pub space: Space,
    pub member: SpaceMember,
}

pub struct MembershipService {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    default_check_in_interval: i64,
}

impl MembershipService {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_check_in_interval: 0,
        }
    }

    /// Check-in interval for couple spaces created by accepting a couple request
    pub fn with_default_check_in_interval(mut self, seconds: i64) -> Self {
        self.default_check_in_interval = seconds.clamp(0, MAX_CHECK_IN_INTERVAL_SECONDS);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ==================== Users ====================

    pub fn create_user(&self, username: &str, display_name: Option<&str>) -> ServiceResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ServiceError::Invalid("username is required".to_string()));
        }

        let now = self.clock.now();
        let mut user = User::new(username, display_name.unwrap_or(username));
        user.created_at = now;
        user.updated_at = now;

        self.store
            .transaction(|tx| {
                if users::get_user_by_username(tx, username).is_ok() {
                    return Err(ServiceError::Conflict(format!(
                        "username {} is taken",
                        username
                    )));
                }
                users::insert_user(tx, &mut user)?;
                Ok(())
            })?;

        log::info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> ServiceResult<User> {
        self.store.read(|c| Ok(users::get_user(c, id)?))
    }

    // ==================== Queries ====================

    /// Role of an active member; `None` for pending, left or unknown users
    pub fn get_role(&self, space_id: &str, user_id: &str) -> ServiceResult<Option<MemberRole>> {
        self.store.read(|c| {
            let member = spaces::find_member(c, space_id, user_id)?;
            Ok(member
                .filter(|m| m.status == MemberStatus::Active)
                .map(|m| m.role))
        })
    }

    pub fn get_space(&self, id: &str) -> ServiceResult<Space> {
        self.store.read(|c| Ok(spaces::get_space(c, id)?))
    }

    pub fn get_member(&self, id: &str) -> ServiceResult<SpaceMember> {
        self.store.read(|c| Ok(spaces::get_member(c, id)?))
    }

    pub fn list_spaces_for_user(&self, user_id: &str) -> ServiceResult<Vec<Space>> {
        self.store.read(|c| Ok(spaces::list_spaces_for_user(c, user_id)?))
    }

    pub fn list_members(&self, space_id: &str) -> ServiceResult<Vec<SpaceMember>> {
        self.store.read(|c| {
            spaces::get_space(c, space_id)?;
            Ok(spaces::list_members(c, space_id)?)
        })
    }

    pub fn count_active_members(&self, space_id: &str) -> ServiceResult<i64> {
        self.store.read(|c| Ok(spaces::count_active_members(c, space_id)?))
    }
}

/// Random 6-digit decimal code in 100000..=999999
pub fn generate_invite_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000u32).to_string()
}

pub fn is_valid_invite_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

/// Couple-space admission rule, evaluated against the current transaction's view:
/// the space has room, the user is in a relationship, and the partner already holds an
/// active seat in this very space.
fn check_couple_gate(conn: &Connection, space: &Space, user_id: &str) -> ServiceResult<()> {
    let active = spaces::count_active_members(conn, &space.id)?;
    if active >= COUPLE_CAPACITY {
        return Err(ServiceError::Conflict(format!(
            "couple space {} is full",
            space.id
        )));
    }

    let user = users::get_user(conn, user_id)?;
    let partner_id = match (user.relationship_status, user.partner_id.as_deref()) {
        (RelationshipStatus::InRelationship, Some(partner_id)) => partner_id,
        _ => {
            return Err(ServiceError::Conflict(format!(
                "user {} is not in a relationship",
                user_id
            )))
        }
    };

    match spaces::find_member(conn, &space.id, partner_id)? {
        Some(m) if m.status == MemberStatus::Active => Ok(()),
        _ => Err(ServiceError::Conflict(format!(
            "partner of user {} is not an active member of space {}",
            user_id, space.id
        ))),
    }
}
