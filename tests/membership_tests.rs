use chrono::Utc;
use std::sync::Arc;
use std::thread;

use spaces_vm::error::ServiceError;
use spaces_vm::membership::{JoinStatus, MembershipService};
use spaces_vm::models::*;
use spaces_vm::store::{spaces, users, Store, StoreResult};

fn setup() -> (Arc<Store>, MembershipService) {
    let store = Arc::new(Store::in_memory().unwrap());
    let service = MembershipService::new(store.clone());
    (store, service)
}

fn pair(store: &Store, a: &str, b: &str) {
    store
        .transaction(|tx| {
            users::set_partner(tx, a, Some(b), Utc::now())?;
            users::set_partner(tx, b, Some(a), Utc::now())
        })
        .unwrap();
}

fn unpair(store: &Store, a: &str, b: &str) {
    store
        .transaction(|tx| {
            users::set_partner(tx, a, None, Utc::now())?;
            users::set_partner(tx, b, None, Utc::now())
        })
        .unwrap();
}

fn run_sql(store: &Store, sql: &str) {
    store
        .read(|c| -> StoreResult<()> {
            c.execute_batch(sql)?;
            Ok(())
        })
        .unwrap();
}

fn all_spaces(store: &Store) -> Vec<Space> {
    store
        .read(|c| -> StoreResult<Vec<Space>> {
            let mut stmt = c.prepare("SELECT id FROM spaces")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.iter()
                .map(|id| spaces::get_space(c, id))
                .collect::<Result<Vec<_>, _>>()
        })
        .unwrap()
}

fn assert_relationships_symmetric(service: &MembershipService, ids: &[&str]) {
    for id in ids {
        let user = service.get_user(id).unwrap();
        match (&user.relationship_status, &user.partner_id) {
            (RelationshipStatus::Single, None) => {}
            (RelationshipStatus::InRelationship, Some(partner_id)) => {
                let partner = service.get_user(partner_id).unwrap();
                assert!(partner.is_paired_with(&user.id), "asymmetric pairing for {}", user.id);
            }
            other => panic!("inconsistent relationship fields: {:?}", other),
        }
    }
}

// ==================== Family Spaces ====================

#[test]
fn test_family_join_request_is_pending() {
    let (_store, service) = setup();
    let owner = service.create_user("owner", None).unwrap();
    let u = service.create_user("u", None).unwrap();

    let space = service
        .create_space("Family", SpaceType::Family, &owner.id, None, 0)
        .unwrap();
    assert_eq!(space.invite_code.len(), 6);

    let outcome = service.join_by_invite_code(&u.id, &space.invite_code).unwrap();
    assert_eq!(outcome.status, JoinStatus::RequestPending);
    assert_eq!(outcome.member.space_id, space.id);
    assert_eq!(outcome.member.user_id, u.id);
    assert_eq!(outcome.member.role, MemberRole::Member);
    assert_eq!(outcome.member.status, MemberStatus::Pending);
}

#[test]
fn test_join_is_idempotent() {
    let (_store, service) = setup();
    let owner = service.create_user("owner", None).unwrap();
    let u = service.create_user("u", None).unwrap();
    let space = service
        .create_space("Family", SpaceType::Family, &owner.id, None, 0)
        .unwrap();

    let first = service.join_by_invite_code(&u.id, &space.invite_code).unwrap();
    let second = service.join_by_invite_code(&u.id, &space.invite_code).unwrap();
    assert_eq!(first.status, JoinStatus::RequestPending);
    assert_eq!(second.status, JoinStatus::RequestPending);
    assert_eq!(first.member.id, second.member.id);
    assert_eq!(service.list_members(&space.id).unwrap().len(), 2);

    // Joining your own space reports membership without touching it
    let own = service.join_by_invite_code(&owner.id, &space.invite_code).unwrap();
    assert_eq!(own.status, JoinStatus::AlreadyMember);
    assert_eq!(own.member.role, MemberRole::Owner);
}

#[test]
fn test_concurrent_joins_create_one_row() {
    let (store, service) = setup();
    let owner = service.create_user("owner", None).unwrap();
    let u = service.create_user("u", None).unwrap();
    let space = service
        .create_space("Family", SpaceType::Family, &owner.id, None, 0)
        .unwrap();

    let service = Arc::new(service);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let user_id = u.id.clone();
            let code = space.invite_code.clone();
            thread::spawn(move || service.join_by_invite_code(&user_id, &code).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().status, JoinStatus::RequestPending);
    }
    let rows = store.read(|c| spaces::list_members(c, &space.id)).unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_dissolve_family_space_releases_members() {
    let (_store, service) = setup();
    let owner = service.create_user("owner", None).unwrap();
    let u = service.create_user("u", None).unwrap();
    let space = service
        .create_space("Family", SpaceType::Family, &owner.id, None, 0)
        .unwrap();
    let pending = service.join_by_invite_code(&u.id, &space.invite_code).unwrap();

    let dissolved = service.dissolve_space(&space.id).unwrap();
    assert_eq!(dissolved.status, SpaceStatus::Archived);
    for member in service.list_members(&space.id).unwrap() {
        assert_eq!(member.status, MemberStatus::Left);
    }
    assert!(service.list_spaces_for_user(&owner.id).unwrap().is_empty());

    // A pending request is released too, and approving it afterwards finds nothing to approve
    assert!(matches!(
        service.approve_member(&pending.member.id).unwrap_err(),
        ServiceError::NotFound(_)
    ));

    // Dissolving again is a no-op
    assert_eq!(
        service.dissolve_space(&space.id).unwrap().status,
        SpaceStatus::Archived
    );
}

// ==================== Couple Spaces ====================

#[test]
fn test_couple_space_holds_both_owners_and_refuses_third() {
    let (store, service) = setup();
    let a = service.create_user("a", None).unwrap();
    let b = service.create_user("b", None).unwrap();
    let c = service.create_user("c", None).unwrap();
    pair(&store, &a.id, &b.id);

    let space = service
        .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
        .unwrap();

    let members = service.list_members(&space.id).unwrap();
    assert_eq!(members.len(), 2);
    for member in &members {
        assert_eq!(member.role, MemberRole::Owner);
        assert_eq!(member.status, MemberStatus::Active);
    }

    let err = service.join_by_invite_code(&c.id, &space.invite_code).unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(service.count_active_members(&space.id).unwrap(), 2);
}

#[test]
fn test_second_couple_space_conflicts() {
    let (store, service) = setup();
    let a = service.create_user("a", None).unwrap();
    let b = service.create_user("b", None).unwrap();
    let c = service.create_user("c", None).unwrap();
    pair(&store, &a.id, &b.id);

    service
        .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
        .unwrap();
    let err = service
        .create_space("Again", SpaceType::Couple, &b.id, Some(&a.id), 0)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    // c is not b's partner and cannot make b a co-owner
    let err = service
        .create_space("Ours", SpaceType::Couple, &c.id, Some(&b.id), 0)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(all_spaces(&store).len(), 1);
}

#[test]
fn test_couple_space_needs_a_recorded_partner() {
    let (store, service) = setup();
    let x = service.create_user("x", None).unwrap();
    let y = service.create_user("y", None).unwrap();
    let z = service.create_user("z", None).unwrap();

    let err = service
        .create_space("Us", SpaceType::Couple, &z.id, Some(&y.id), 0)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);
    assert!(all_spaces(&store).is_empty());
    assert!(service.list_spaces_for_user(&y.id).unwrap().is_empty());

    // y stays free to accept a real request
    let request = service.send_couple_request(&x.id, &y.id).unwrap();
    let accepted = service.accept_couple_request(&request.id).unwrap();
    assert!(accepted.space_created);
    assert_relationships_symmetric(&service, &[x.id.as_str(), y.id.as_str(), z.id.as_str()]);
}

#[test]
fn test_couple_create_rolls_back_when_partner_row_fails() {
    let (store, service) = setup();
    let a = service.create_user("a", None).unwrap();
    let b = service.create_user("b", None).unwrap();
    pair(&store, &a.id, &b.id);

    run_sql(
        &store,
        &format!(
            "CREATE TRIGGER block_partner BEFORE INSERT ON space_members \
             WHEN NEW.user_id = '{}' BEGIN SELECT RAISE(ABORT, 'partner row refused'); END;",
            b.id
        ),
    );
    assert!(service
        .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
        .is_err());

    assert!(all_spaces(&store).is_empty());
    assert!(service.list_spaces_for_user(&a.id).unwrap().is_empty());
    let creator_rows = store
        .read(|c| -> StoreResult<i64> {
            Ok(c.query_row(
                "SELECT COUNT(*) FROM space_members WHERE user_id = ?1",
                [&a.id],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(creator_rows, 0);

    run_sql(&store, "DROP TRIGGER block_partner;");
    let space = service
        .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
        .unwrap();
    assert_eq!(service.count_active_members(&space.id).unwrap(), 2);
}

#[test]
fn test_partner_rejoins_couple_space_after_leaving() {
    let (store, service) = setup();
    let a = service.create_user("a", None).unwrap();
    let b = service.create_user("b", None).unwrap();
    let stranger = service.create_user("stranger", None).unwrap();
    pair(&store, &a.id, &b.id);
    let space = service
        .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
        .unwrap();

    service.leave_space(&space.id, &b.id).unwrap();
    assert_eq!(service.count_active_members(&space.id).unwrap(), 1);

    // Someone who is not paired with the remaining member cannot take the seat
    assert!(matches!(
        service.join_by_invite_code(&stranger.id, &space.invite_code).unwrap_err(),
        ServiceError::Conflict(_)
    ));

    let back = service.join_by_invite_code(&b.id, &space.invite_code).unwrap();
    assert_eq!(back.status, JoinStatus::Joined);
    assert_eq!(back.member.status, MemberStatus::Active);
    assert_eq!(back.member.role, MemberRole::Owner);
    assert_eq!(service.count_active_members(&space.id).unwrap(), 2);
}

#[test]
fn test_accept_couple_request_provisions_one_space() {
    let (store, service) = setup();
    let x = service.create_user("x", None).unwrap();
    let y = service.create_user("y", None).unwrap();

    let request = service.send_couple_request(&x.id, &y.id).unwrap();
    let accepted = service.accept_couple_request(&request.id).unwrap();

    let x = service.get_user(&x.id).unwrap();
    let y = service.get_user(&y.id).unwrap();
    assert_eq!(x.partner_id.as_deref(), Some(y.id.as_str()));
    assert_eq!(y.partner_id.as_deref(), Some(x.id.as_str()));
    assert_relationships_symmetric(&service, &[x.id.as_str(), y.id.as_str()]);

    let couple_spaces: Vec<Space> = all_spaces(&store)
        .into_iter()
        .filter(|s| s.space_type == SpaceType::Couple)
        .collect();
    assert_eq!(couple_spaces.len(), 1);
    assert_eq!(couple_spaces[0].id, accepted.space.id);

    for member in service.list_members(&accepted.space.id).unwrap() {
        assert_eq!(member.role, MemberRole::Owner);
        assert_eq!(member.status, MemberStatus::Active);
    }
}

#[test]
fn test_accept_reuses_existing_shared_space() {
    let (store, service) = setup();
    let x = service.create_user("x", None).unwrap();
    let y = service.create_user("y", None).unwrap();

    // The pairing lapsed but the couple space they built is still active
    pair(&store, &x.id, &y.id);
    let existing = service
        .create_space("Ours", SpaceType::Couple, &x.id, Some(&y.id), 0)
        .unwrap();
    unpair(&store, &x.id, &y.id);

    let request = service.send_couple_request(&y.id, &x.id).unwrap();
    let accepted = service.accept_couple_request(&request.id).unwrap();

    assert!(!accepted.space_created);
    assert_eq!(accepted.space.id, existing.id);
}

#[test]
fn test_dissolve_couple_space_clears_relationship() {
    let (_store, service) = setup();
    let x = service.create_user("x", None).unwrap();
    let y = service.create_user("y", None).unwrap();
    let request = service.send_couple_request(&x.id, &y.id).unwrap();
    let space = service.accept_couple_request(&request.id).unwrap().space;

    let dissolved = service.dissolve_space(&space.id).unwrap();
    assert_eq!(dissolved.status, SpaceStatus::Archived);

    for member in service.list_members(&space.id).unwrap() {
        assert_eq!(member.status, MemberStatus::Left);
    }
    for id in [&x.id, &y.id] {
        let user = service.get_user(id).unwrap();
        assert_eq!(user.relationship_status, RelationshipStatus::Single);
        assert!(user.partner_id.is_none());
    }

    // Both are free to pair again
    let again = service.send_couple_request(&y.id, &x.id).unwrap();
    assert!(service.accept_couple_request(&again.id).unwrap().space_created);
}

#[test]
fn test_dissolve_couple_space_rolls_back_when_archive_fails() {
    let (store, service) = setup();
    let x = service.create_user("x", None).unwrap();
    let y = service.create_user("y", None).unwrap();
    let request = service.send_couple_request(&x.id, &y.id).unwrap();
    let space = service.accept_couple_request(&request.id).unwrap().space;

    run_sql(
        &store,
        "CREATE TRIGGER block_archive BEFORE UPDATE OF status ON spaces \
         WHEN NEW.status = 'archived' BEGIN SELECT RAISE(ABORT, 'archive refused'); END;",
    );
    assert!(service.dissolve_space(&space.id).is_err());

    assert_eq!(service.get_space(&space.id).unwrap().status, SpaceStatus::Active);
    let members = service.list_members(&space.id).unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| m.status == MemberStatus::Active));
    assert!(service.get_user(&x.id).unwrap().is_paired_with(&y.id));
    assert!(service.get_user(&y.id).unwrap().is_paired_with(&x.id));

    run_sql(&store, "DROP TRIGGER block_archive;");
    assert_eq!(
        service.dissolve_space(&space.id).unwrap().status,
        SpaceStatus::Archived
    );
    assert!(service.get_user(&x.id).unwrap().is_single());
}

#[test]
fn test_approve_on_couple_space_rechecks_capacity() {
    let (store, service) = setup();
    let a = service.create_user("a", None).unwrap();
    let b = service.create_user("b", None).unwrap();
    let c = service.create_user("c", None).unwrap();
    pair(&store, &a.id, &b.id);
    let space = service
        .create_space("Us", SpaceType::Couple, &a.id, Some(&b.id), 0)
        .unwrap();

    // A pending row can only appear in a couple space through direct writes; the gate still holds
    let mut stray = SpaceMember {
        id: String::new(),
        space_id: space.id.clone(),
        user_id: c.id.clone(),
        role: MemberRole::Member,
        status: MemberStatus::Pending,
        joined_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store
        .transaction(|tx| spaces::insert_member(tx, &mut stray))
        .unwrap();

    let err = service.approve_member(&stray.id).unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(service.get_member(&stray.id).unwrap().status, MemberStatus::Pending);
    assert_eq!(service.count_active_members(&space.id).unwrap(), 2);
}

#[test]
fn test_get_role_reflects_membership_changes() {
    let (_store, service) = setup();
    let owner = service.create_user("owner", None).unwrap();
    let u = service.create_user("u", None).unwrap();
    let space = service
        .create_space("Family", SpaceType::Family, &owner.id, None, 0)
        .unwrap();

    let join = service.join_by_invite_code(&u.id, &space.invite_code).unwrap();
    assert_eq!(service.get_role(&space.id, &u.id).unwrap(), None);

    service.approve_member(&join.member.id).unwrap();
    assert_eq!(service.get_role(&space.id, &u.id).unwrap(), Some(MemberRole::Member));

    service.remove_member(&join.member.id).unwrap();
    assert_eq!(service.get_role(&space.id, &u.id).unwrap(), None);
}
