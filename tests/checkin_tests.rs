use chrono::Duration;
use std::sync::{Arc, Mutex};

use spaces_vm::clock::{Clock, ManualClock};
use spaces_vm::error::ServiceError;
use spaces_vm::membership::MembershipService;
use spaces_vm::models::*;
use spaces_vm::reminders::{CheckInEngine, Notice, NoticeKind, Notifier, NotifyError};
use spaces_vm::store::Store;

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    fn recipients(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .notices
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.user_id.clone())
            .collect();
        users.sort();
        users
    }

    fn clear(&self) {
        self.notices.lock().unwrap().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

struct Setup {
    clock: Arc<ManualClock>,
    membership: MembershipService,
    notifier: Arc<RecordingNotifier>,
    engine: CheckInEngine,
}

fn setup() -> Setup {
    let store = Arc::new(Store::in_memory().unwrap());
    let clock = Arc::new(ManualClock::starting_now());
    let notifier = Arc::new(RecordingNotifier::default());
    let membership = MembershipService::with_clock(store.clone(), clock.clone());
    let engine = CheckInEngine::with_clock(store, notifier.clone(), clock.clone());
    Setup {
        clock,
        membership,
        notifier,
        engine,
    }
}

/// Family space with an approved second member
fn family(s: &Setup, name: &str, interval: i64) -> (Space, User, User) {
    let owner = s
        .membership
        .create_user(&format!("{}-owner", name), None)
        .unwrap();
    let member = s
        .membership
        .create_user(&format!("{}-member", name), None)
        .unwrap();
    let space = s
        .membership
        .create_space(name, SpaceType::Family, &owner.id, None, interval)
        .unwrap();
    let join = s
        .membership
        .join_by_invite_code(&member.id, &space.invite_code)
        .unwrap();
    s.membership.approve_member(&join.member.id).unwrap();
    (space, owner, member)
}

fn sorted(ids: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    ids.sort();
    ids
}

#[test]
fn test_scan_reminds_only_lagging_members() {
    let s = setup();
    let (space, owner, member) = family(&s, "home", 3600);

    s.membership.create_post(&space.id, &owner.id, "morning").unwrap();
    s.clock.advance(Duration::minutes(30));

    // The member never posted; the owner posted 30 minutes ago
    let report = s.engine.scan_once().unwrap();
    assert_eq!(report.spaces_scanned, 1);
    assert_eq!(report.reminders_sent, 1);
    assert_eq!(s.notifier.recipients(), vec![member.id.clone()]);

    let notice = s.notifier.notices.lock().unwrap()[0].clone();
    assert_eq!(notice.kind, NoticeKind::CheckInDue);
    assert_eq!(notice.resource_id, space.id);
}

#[test]
fn test_cooldown_spaces_out_reminders() {
    let s = setup();
    let (space, owner, member) = family(&s, "home", 60);
    let start = s.clock.now();

    assert_eq!(s.engine.scan_once().unwrap().reminders_sent, 2);
    assert_eq!(s.engine.last_reminded_at(&space.id).unwrap(), Some(start));
    assert_eq!(s.notifier.recipients(), sorted(&[&owner.id, &member.id]));
    s.notifier.clear();

    s.clock.advance(Duration::minutes(4));
    let report = s.engine.scan_once().unwrap();
    assert_eq!(report.cooling_down, 1);
    assert_eq!(report.reminders_sent, 0);
    assert!(s.notifier.recipients().is_empty());

    s.clock.advance(Duration::minutes(1));
    assert_eq!(s.engine.scan_once().unwrap().reminders_sent, 2);
    assert_eq!(
        s.engine.last_reminded_at(&space.id).unwrap(),
        Some(start + Duration::minutes(5))
    );
}

#[test]
fn test_posting_resets_the_timer() {
    let s = setup();
    let (space, owner, member) = family(&s, "home", 3600);

    let before = s.engine.status_for_space(&space.id).unwrap();
    assert!(before.iter().all(|status| status.needs_check_in));

    s.membership.create_post(&space.id, &owner.id, "hi").unwrap();
    s.membership.create_post(&space.id, &member.id, "hello").unwrap();
    s.clock.advance(Duration::minutes(10));

    let after = s.engine.status_for_space(&space.id).unwrap();
    assert_eq!(after.len(), 2);
    for status in &after {
        assert!(!status.needs_check_in);
        assert_eq!(status.remaining_seconds, 3000);
    }
    assert_eq!(s.engine.scan_once().unwrap().reminders_sent, 0);

    s.clock.advance(Duration::minutes(55));
    let late = s.engine.status_for_space(&space.id).unwrap();
    assert!(late.iter().all(|status| status.needs_check_in));
    assert!(late.iter().all(|status| status.overdue_seconds == 300));
}

#[test]
fn test_deleted_posts_do_not_count() {
    let s = setup();
    let (space, owner, _member) = family(&s, "home", 3600);

    let post = s.membership.create_post(&space.id, &owner.id, "oops").unwrap();
    s.membership.delete_post(&post.id, &owner.id).unwrap();

    let statuses = s.engine.status_for_space(&space.id).unwrap();
    let mine = statuses.iter().find(|st| st.user_id == owner.id).unwrap();
    assert!(mine.needs_check_in);
    assert!(mine.last_post_at.is_none());
}

#[test]
fn test_untimed_and_dissolved_spaces_are_skipped() {
    let s = setup();
    let (_quiet, _, _) = family(&s, "quiet", 0);
    let (gone, gone_owner, _) = family(&s, "gone", 60);
    let (live, _, _) = family(&s, "live", 60);
    assert_eq!(gone.created_by, gone_owner.id);

    s.membership.dissolve_space(&gone.id).unwrap();

    let report = s.engine.scan_once().unwrap();
    assert_eq!(report.spaces_scanned, 1);
    assert_eq!(report.reminders_sent, 2);
    assert!(s
        .notifier
        .notices
        .lock()
        .unwrap()
        .iter()
        .all(|n| n.resource_id == live.id));
}

#[test]
fn test_pending_and_departed_members_are_not_reminded() {
    let s = setup();
    let (space, owner, member) = family(&s, "home", 60);
    let newcomer = s.membership.create_user("newcomer", None).unwrap();
    s.membership
        .join_by_invite_code(&newcomer.id, &space.invite_code)
        .unwrap();
    s.membership.leave_space(&space.id, &member.id).unwrap();

    s.engine.scan_once().unwrap();
    assert_eq!(s.notifier.recipients(), vec![owner.id.clone()]);
}

#[test]
fn test_interval_update_takes_effect_on_next_scan() {
    let s = setup();
    let (space, _, _) = family(&s, "home", 0);
    assert_eq!(s.engine.scan_once().unwrap().spaces_scanned, 0);

    s.membership.update_check_in_interval(&space.id, 120).unwrap();
    assert_eq!(s.engine.scan_once().unwrap().reminders_sent, 2);
}

#[test]
fn test_oversized_interval_is_refused_and_scan_keeps_running() {
    let s = setup();
    let (space, owner, _member) = family(&s, "home", 60);
    s.membership.create_post(&space.id, &owner.id, "hi").unwrap();

    let err = s
        .membership
        .update_check_in_interval(&space.id, 10_000_000_000_000_000)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Invalid(_)), "{:?}", err);
    let err = s
        .membership
        .create_space("far", SpaceType::Family, &owner.id, None, MAX_CHECK_IN_INTERVAL_SECONDS + 1)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Invalid(_)), "{:?}", err);

    assert_eq!(
        s.membership.get_space(&space.id).unwrap().check_in_interval_seconds,
        60
    );
    let report = s.engine.scan_once().unwrap();
    assert_eq!(report.spaces_scanned, 1);
    assert_eq!(report.reminders_sent, 1);
}
