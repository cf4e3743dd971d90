use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{check_couple_gate, generate_invite_code, is_valid_invite_code};
use super::{JoinOutcome, JoinStatus, MembershipService};
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::{spaces, users};

const MAX_INVITE_CODE_ATTEMPTS: usize = 16;

impl MembershipService {
    /// Create a space with the creator as its active owner.
    ///
    /// Couple spaces take the partner as a second active owner in the same transaction.
    pub fn create_space(
        &self,
        name: &str,
        space_type: SpaceType,
        creator_id: &str,
        partner_id: Option<&str>,
        check_in_interval_seconds: i64,
    ) -> ServiceResult<Space> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Invalid("space name is required".to_string()));
        }
        validate_check_in_interval(check_in_interval_seconds)?;
        let partner_id = match (space_type, partner_id) {
            (SpaceType::Couple, Some(p)) if p == creator_id => {
                return Err(ServiceError::Invalid(
                    "cannot create a couple space with yourself".to_string(),
                ))
            }
            (SpaceType::Couple, Some(p)) => Some(p),
            (SpaceType::Couple, None) => {
                return Err(ServiceError::Invalid(
                    "couple spaces require a partner_id".to_string(),
                ))
            }
            (SpaceType::Family, Some(_)) => {
                return Err(ServiceError::Invalid(
                    "partner_id only applies to couple spaces".to_string(),
                ))
            }
            (SpaceType::Family, None) => None,
        };

        let now = self.clock.now();
        let space = self.store.transaction(|tx| {
            users::get_user(tx, creator_id)?;
            create_space_in(
                tx,
                name,
                space_type,
                creator_id,
                partner_id,
                check_in_interval_seconds,
                now,
            )
        })?;

        log::info!(
            "Created {} space {} ({}) for {}",
            space.space_type,
            space.id,
            space.name,
            creator_id
        );
        Ok(space)
    }

    /// Join (or request to join) the space behind `code`.
    ///
    /// Calling this again for the same user never creates a second row: an active row reports
    /// `AlreadyMember` and a pending row reports `RequestPending`.
    pub fn join_by_invite_code(&self, user_id: &str, code: &str) -> ServiceResult<JoinOutcome> {
        let code = code.trim();
        if !is_valid_invite_code(code) {
            return Err(ServiceError::Invalid(
                "invite code must be 6 digits".to_string(),
            ));
        }

        let now = self.clock.now();
        let outcome = self.store.transaction(|tx| {
            users::get_user(tx, user_id)?;
            let space = match spaces::find_space_by_invite_code(tx, code)? {
                Some(space) if space.is_active() => space,
                _ => {
                    return Err(ServiceError::NotFound(format!(
                        "No active space for invite code {}",
                        code
                    )))
                }
            };

            let (status, member) = match spaces::find_member(tx, &space.id, user_id)? {
                Some(m) if m.status == MemberStatus::Active => (JoinStatus::AlreadyMember, m),
                Some(m) if m.status == MemberStatus::Pending => (JoinStatus::RequestPending, m),
                Some(m) => {
                    let (next, status) = match space.space_type {
                        SpaceType::Couple => {
                            check_couple_gate(tx, &space, user_id)?;
                            (MemberStatus::Active, JoinStatus::Joined)
                        }
                        SpaceType::Family => (MemberStatus::Pending, JoinStatus::RequestPending),
                    };
                    spaces::rejoin_member(tx, &m.id, next, now)?;
                    (status, spaces::get_member(tx, &m.id)?)
                }
                None => {
                    let (role, next, status) = match space.space_type {
                        SpaceType::Couple => {
                            check_couple_gate(tx, &space, user_id)?;
                            (MemberRole::Owner, MemberStatus::Active, JoinStatus::Joined)
                        }
                        SpaceType::Family => (
                            MemberRole::Member,
                            MemberStatus::Pending,
                            JoinStatus::RequestPending,
                        ),
                    };
                    let mut member = SpaceMember {
                        id: String::new(),
                        space_id: space.id.clone(),
                        user_id: user_id.to_string(),
                        role,
                        status: next,
                        joined_at: now,
                        updated_at: now,
                    };
                    spaces::insert_member(tx, &mut member)?;
                    (status, member)
                }
            };

            Ok(JoinOutcome {
                status,
                space,
                member,
            })
        })?;

        if outcome.status != JoinStatus::AlreadyMember {
            log::info!(
                "User {} join of space {}: {:?}",
                user_id,
                outcome.space.id,
                outcome.status
            );
        }
        Ok(outcome)
    }

    /// Promote a pending member to active. Couple spaces re-check the admission rule against
    /// the current state before writing.
    pub fn approve_member(&self, member_id: &str) -> ServiceResult<SpaceMember> {
        let now = self.clock.now();
        let (member, changed) = self.store.transaction(|tx| {
            let member = spaces::get_member(tx, member_id)?;
            match member.status {
                MemberStatus::Active => return Ok((member, false)),
                MemberStatus::Left => {
                    return Err(ServiceError::NotFound(format!(
                        "No pending request for member {}",
                        member_id
                    )))
                }
                MemberStatus::Pending => {}
            }

            let space = spaces::get_space(tx, &member.space_id)?;
            if !space.is_active() {
                return Err(ServiceError::Conflict(format!(
                    "Space {} is archived",
                    space.id
                )));
            }
            if space.space_type == SpaceType::Couple {
                check_couple_gate(tx, &space, &member.user_id)?;
            }

            if spaces::transition_member(tx, member_id, MemberStatus::Pending, MemberStatus::Active, now)? == 0 {
                return Err(ServiceError::Conflict(format!(
                    "Member {} is no longer pending",
                    member_id
                )));
            }
            Ok((spaces::get_member(tx, member_id)?, true))
        })?;

        if changed {
            log::info!("Approved member {} in space {}", member.user_id, member.space_id);
        }
        Ok(member)
    }

    /// Delete a pending join request
    pub fn reject_member(&self, member_id: &str) -> ServiceResult<SpaceMember> {
        let member = self.store.transaction(|tx| {
            let member = spaces::get_member(tx, member_id)?;
            if spaces::delete_pending_member(tx, member_id)? == 0 {
                return Err(ServiceError::NotFound(format!(
                    "No pending request for member {}",
                    member_id
                )));
            }
            Ok(member)
        })?;

        log::info!("Rejected join request of {} for space {}", member.user_id, member.space_id);
        Ok(member)
    }

    /// Mark an active member as left. Role checks belong to the caller.
    pub fn remove_member(&self, member_id: &str) -> ServiceResult<SpaceMember> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let member = spaces::get_member(tx, member_id)?;
            mark_left(tx, member, now)
        })
    }

    pub fn leave_space(&self, space_id: &str, user_id: &str) -> ServiceResult<SpaceMember> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let member = spaces::find_member(tx, space_id, user_id)?.ok_or_else(|| {
                ServiceError::NotFound(format!("User {} is not in space {}", user_id, space_id))
            })?;
            mark_left(tx, member, now)
        })
    }

    /// Archive the space and release every member. For couple spaces the members' relationship
    /// fields are cleared in the same transaction.
    pub fn dissolve_space(&self, space_id: &str) -> ServiceResult<Space> {
        let now = self.clock.now();
        let (space, released) = self.store.transaction(|tx| {
            let space = spaces::get_space(tx, space_id)?;
            if !space.is_active() {
                return Ok::<_, ServiceError>((space, None));
            }

            if space.space_type == SpaceType::Couple {
                for member in spaces::list_active_members(tx, space_id)? {
                    let user = users::get_user(tx, &member.user_id)?;
                    if let Some(partner_id) = user.partner_id.as_deref() {
                        users::set_partner(tx, partner_id, None, now)?;
                    }
                    users::set_partner(tx, &user.id, None, now)?;
                }
            }

            spaces::set_space_status(tx, space_id, SpaceStatus::Archived, now)?;
            let released = spaces::leave_all_members(tx, space_id, now)?;
            Ok((spaces::get_space(tx, space_id)?, Some(released)))
        })?;

        if let Some(released) = released {
            log::info!("Dissolved space {} ({} members released)", space.id, released);
        }
        Ok(space)
    }

    pub fn update_check_in_interval(&self, space_id: &str, seconds: i64) -> ServiceResult<Space> {
        validate_check_in_interval(seconds)?;
        let now = self.clock.now();
        self.store.transaction(|tx| {
            spaces::get_space(tx, space_id)?;
            spaces::set_check_in_interval(tx, space_id, seconds, now)?;
            Ok(spaces::get_space(tx, space_id)?)
        })
    }
}

fn validate_check_in_interval(seconds: i64) -> ServiceResult<()> {
    if seconds < 0 {
        return Err(ServiceError::Invalid(
            "check_in_interval_seconds must not be negative".to_string(),
        ));
    }
    if seconds > MAX_CHECK_IN_INTERVAL_SECONDS {
        return Err(ServiceError::Invalid(format!(
            "check_in_interval_seconds must be at most {}",
            MAX_CHECK_IN_INTERVAL_SECONDS
        )));
    }
    Ok(())
}

/// Build a space and its owner rows inside the caller's transaction.
///
/// Couple spaces need the two users to be recorded partners of each other, and neither may
/// already sit in an active couple space. Invite codes are drawn until one is free; the unique
/// index decides, the pre-check only saves a round trip.
pub(super) fn create_space_in(
    conn: &Connection,
    name: &str,
    space_type: SpaceType,
    creator_id: &str,
    partner_id: Option<&str>,
    check_in_interval_seconds: i64,
    now: DateTime<Utc>,
) -> ServiceResult<Space> {
    if let Some(partner_id) = partner_id {
        users::get_user(conn, partner_id)?;
        let creator = users::get_user(conn, creator_id)?;
        if !creator.is_paired_with(partner_id) {
            return Err(ServiceError::Conflict(format!(
                "User {} is not the partner of {}",
                partner_id, creator_id
            )));
        }
        for user_id in [creator_id, partner_id] {
            if let Some(existing) = spaces::active_couple_space_for(conn, user_id)? {
                return Err(ServiceError::Conflict(format!(
                    "User {} already has couple space {}",
                    user_id, existing.id
                )));
            }
        }
    }

    let mut space = Space {
        id: String::new(),
        name: name.to_string(),
        space_type,
        invite_code: String::new(),
        check_in_interval_seconds,
        status: SpaceStatus::Active,
        created_by: creator_id.to_string(),
        created_at: now,
        updated_at: now,
    };
    insert_with_fresh_invite_code(conn, &mut space)?;

    let owners = std::iter::once(creator_id).chain(partner_id);
    for user_id in owners {
        let mut member = SpaceMember {
            id: String::new(),
            space_id: space.id.clone(),
            user_id: user_id.to_string(),
            role: MemberRole::Owner,
            status: MemberStatus::Active,
            joined_at: now,
            updated_at: now,
        };
        spaces::insert_member(conn, &mut member)?;
    }

    Ok(space)
}

fn insert_with_fresh_invite_code(conn: &Connection, space: &mut Space) -> ServiceResult<()> {
    for _ in 0..MAX_INVITE_CODE_ATTEMPTS {
        let code = generate_invite_code();
        if spaces::invite_code_exists(conn, &code)? {
            continue;
        }
        space.invite_code = code;
        match spaces::insert_space(conn, space) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_constraint_violation() => {
                log::debug!("Invite code {} collided, drawing again", space.invite_code);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::StorageUnavailable(
        "could not allocate a free invite code".to_string(),
    ))
}

fn mark_left(conn: &Connection, member: SpaceMember, now: DateTime<Utc>) -> ServiceResult<SpaceMember> {
    match member.status {
        MemberStatus::Left => Ok(member),
        MemberStatus::Pending => Err(ServiceError::Conflict(format!(
            "Member {} is still pending; reject the request instead",
            member.id
        ))),
        MemberStatus::Active => {
            spaces::transition_member(conn, &member.id, MemberStatus::Active, MemberStatus::Left, now)?;
            log::info!("User {} left space {}", member.user_id, member.space_id);
            Ok(spaces::get_member(conn, &member.id)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::Arc;

    fn service() -> MembershipService {
        MembershipService::new(Arc::new(Store::in_memory().unwrap()))
    }

    #[test]
    fn test_family_join_then_approve() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();
        let kid = service.create_user("kid", None).unwrap();
        let space = service
            .create_space("Home", SpaceType::Family, &owner.id, None, 0)
            .unwrap();

        let outcome = service.join_by_invite_code(&kid.id, &space.invite_code).unwrap();
        assert_eq!(outcome.status, JoinStatus::RequestPending);
        assert_eq!(outcome.member.role, MemberRole::Member);

        let approved = service.approve_member(&outcome.member.id).unwrap();
        assert_eq!(approved.status, MemberStatus::Active);

        let again = service.join_by_invite_code(&kid.id, &space.invite_code).unwrap();
        assert_eq!(again.status, JoinStatus::AlreadyMember);
        assert_eq!(again.member.id, outcome.member.id);
    }

    #[test]
    fn test_reject_deletes_pending_row() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();
        let kid = service.create_user("kid", None).unwrap();
        let space = service
            .create_space("Home", SpaceType::Family, &owner.id, None, 0)
            .unwrap();
        let outcome = service.join_by_invite_code(&kid.id, &space.invite_code).unwrap();

        service.reject_member(&outcome.member.id).unwrap();
        assert!(matches!(
            service.get_member(&outcome.member.id).unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            service.reject_member(&outcome.member.id).unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[test]
    fn test_left_family_member_rejoins_as_pending() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();
        let kid = service.create_user("kid", None).unwrap();
        let space = service
            .create_space("Home", SpaceType::Family, &owner.id, None, 0)
            .unwrap();
        let outcome = service.join_by_invite_code(&kid.id, &space.invite_code).unwrap();
        service.approve_member(&outcome.member.id).unwrap();

        let left = service.leave_space(&space.id, &kid.id).unwrap();
        assert_eq!(left.status, MemberStatus::Left);
        // Leaving twice is a no-op
        assert_eq!(service.leave_space(&space.id, &kid.id).unwrap().status, MemberStatus::Left);

        let rejoin = service.join_by_invite_code(&kid.id, &space.invite_code).unwrap();
        assert_eq!(rejoin.status, JoinStatus::RequestPending);
        assert_eq!(rejoin.member.id, outcome.member.id);
        assert_eq!(service.list_members(&space.id).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_pending_member_conflicts() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();
        let kid = service.create_user("kid", None).unwrap();
        let space = service
            .create_space("Home", SpaceType::Family, &owner.id, None, 0)
            .unwrap();
        let outcome = service.join_by_invite_code(&kid.id, &space.invite_code).unwrap();

        assert!(matches!(
            service.remove_member(&outcome.member.id).unwrap_err(),
            ServiceError::Conflict(_)
        ));
    }

    #[test]
    fn test_create_space_validates_input() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();

        let cases = [
            ("", SpaceType::Family, None, 0),
            ("Us", SpaceType::Couple, None, 0),
            ("Us", SpaceType::Couple, Some(owner.id.as_str()), 0),
            ("Home", SpaceType::Family, Some("someone"), 0),
            ("Home", SpaceType::Family, None, -5),
            ("Home", SpaceType::Family, None, i64::MAX),
        ];
        for (name, space_type, partner, interval) in cases {
            let err = service
                .create_space(name, space_type, &owner.id, partner, interval)
                .unwrap_err();
            assert!(matches!(err, ServiceError::Invalid(_)), "{:?}", err);
        }

        let err = service
            .create_space("Home", SpaceType::Family, "ghost", None, 0)
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_couple_space_requires_recorded_partners() {
        let service = service();
        let a = service.create_user("a", None).unwrap();
        let b = service.create_user("b", None).unwrap();

        let err = service
            .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);
        assert!(service.list_spaces_for_user(&b.id).unwrap().is_empty());

        let now = service.clock.now();
        service
            .store()
            .transaction(|tx| {
                users::set_partner(tx, &a.id, Some(&b.id), now)?;
                users::set_partner(tx, &b.id, Some(&a.id), now)
            })
            .unwrap();

        let space = service
            .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
            .unwrap();
        assert_eq!(service.get_role(&space.id, &b.id).unwrap(), Some(MemberRole::Owner));
    }

    #[test]
    fn test_join_with_unknown_or_archived_code() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();
        let kid = service.create_user("kid", None).unwrap();
        let space = service
            .create_space("Home", SpaceType::Family, &owner.id, None, 0)
            .unwrap();

        let unknown = if space.invite_code == "999999" { "100000" } else { "999999" };
        assert!(matches!(
            service.join_by_invite_code(&kid.id, unknown).unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            service.join_by_invite_code(&kid.id, "12ab").unwrap_err(),
            ServiceError::Invalid(_)
        ));

        service.dissolve_space(&space.id).unwrap();
        assert!(matches!(
            service.join_by_invite_code(&kid.id, &space.invite_code).unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[test]
    fn test_update_check_in_interval() {
        let service = service();
        let owner = service.create_user("owner", None).unwrap();
        let space = service
            .create_space("Home", SpaceType::Family, &owner.id, None, 0)
            .unwrap();

        let updated = service.update_check_in_interval(&space.id, 3600).unwrap();
        assert_eq!(updated.check_in_interval_seconds, 3600);
        for seconds in [-1, MAX_CHECK_IN_INTERVAL_SECONDS + 1, i64::MAX] {
            assert!(matches!(
                service.update_check_in_interval(&space.id, seconds).unwrap_err(),
                ServiceError::Invalid(_)
            ));
        }
        assert_eq!(service.get_space(&space.id).unwrap().check_in_interval_seconds, 3600);

        let longest = service
            .update_check_in_interval(&space.id, MAX_CHECK_IN_INTERVAL_SECONDS)
            .unwrap();
        assert_eq!(longest.check_in_interval_seconds, MAX_CHECK_IN_INTERVAL_SECONDS);
    }
}
