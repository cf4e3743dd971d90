use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::notifier::{Notice, NoticeKind, Notifier};
use super::spawn_periodic;
use crate::clock::{Clock, SystemClock};
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::{notifications, posts, spaces, Store};

/// Where one member stands against the space's check-in interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInStatus {
    pub user_id: String,
    pub last_post_at: Option<DateTime<Utc>>,
    pub needs_check_in: bool,
    pub remaining_seconds: i64,
    pub overdue_seconds: i64,
}

impl CheckInStatus {
    fn compute(
        user_id: String,
        interval_seconds: i64,
        last_post_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let interval = match Duration::try_seconds(interval_seconds) {
            Some(interval) if interval_seconds > 0 => Some(interval),
            Some(_) => None,
            None => {
                log::warn!(
                    "Check-in interval {}s is out of range, skipping {}",
                    interval_seconds,
                    user_id
                );
                None
            }
        };
        let (needs_check_in, remaining_seconds, overdue_seconds) = match (interval, last_post_at) {
            (None, _) => (false, 0, 0),
            (Some(_), None) => (true, 0, 0),
            (Some(interval), Some(at)) => {
                let elapsed = now - at;
                if elapsed >= interval {
                    (true, 0, (elapsed - interval).num_seconds())
                } else {
                    let remaining = interval.checked_sub(&elapsed).map_or(i64::MAX, |d| d.num_seconds());
                    (false, remaining, 0)
                }
            }
        };
        Self {
            user_id,
            last_post_at,
            needs_check_in,
            remaining_seconds,
            overdue_seconds,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckInReport {
    pub spaces_scanned: usize,
    pub reminders_sent: usize,
    pub cooling_down: usize,
    pub failed: usize,
}

enum SpaceReminder {
    NothingDue,
    CoolingDown,
    Sent { delivered: usize, failed: usize },
}

/// Reminds members of spaces with a check-in interval when they have not posted recently.
/// Reads membership and posts; the only thing it writes is its own per-space cool-down row.
pub struct CheckInEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    cooldown: Duration,
}

impl CheckInEngine {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(store, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            notifier,
            cooldown: Duration::minutes(5),
        }
    }

    pub fn with_cooldown(mut self, cooldown: std::time::Duration) -> Self {
        self.cooldown = Duration::from_std(cooldown).unwrap_or(self.cooldown);
        self
    }

    /// Check-in standing of every active member of the space
    pub fn status_for_space(&self, space_id: &str) -> ServiceResult<Vec<CheckInStatus>> {
        let now = self.clock.now();
        self.store.read(|c| {
            let space = spaces::get_space(c, space_id)?;
            member_statuses(c, &space, now)
        })
    }

    pub fn last_reminded_at(&self, space_id: &str) -> ServiceResult<Option<DateTime<Utc>>> {
        self.store
            .read(|c| Ok(notifications::checkin_last_notified(c, space_id)?))
    }

    /// One pass over every active space with a check-in interval
    pub fn scan_once(&self) -> ServiceResult<CheckInReport> {
        let now = self.clock.now();
        let timed = self.store.read(|c| spaces::list_check_in_spaces(c))?;

        let mut report = CheckInReport {
            spaces_scanned: timed.len(),
            ..CheckInReport::default()
        };

        for space in timed {
            match self.remind_space(&space, now) {
                Ok(SpaceReminder::NothingDue) => {}
                Ok(SpaceReminder::CoolingDown) => report.cooling_down += 1,
                Ok(SpaceReminder::Sent { delivered, failed }) => {
                    report.reminders_sent += delivered;
                    report.failed += failed;
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Check-in scan of space {} failed: {}", space.id, e);
                }
            }
        }

        Ok(report)
    }

    fn remind_space(&self, space: &Space, now: DateTime<Utc>) -> ServiceResult<SpaceReminder> {
        let lagging: Vec<CheckInStatus> = self.store.read(|c| {
            Ok::<_, ServiceError>(
                member_statuses(c, space, now)?
                    .into_iter()
                    .filter(|s| s.needs_check_in)
                    .collect(),
            )
        })?;
        if lagging.is_empty() {
            return Ok(SpaceReminder::NothingDue);
        }

        let cooldown_start = now - self.cooldown;
        let claimed = self.store.transaction(|tx| {
            notifications::claim_checkin_reminder(tx, &space.id, now, cooldown_start)
        })?;
        if claimed == 0 {
            return Ok(SpaceReminder::CoolingDown);
        }

        let (mut delivered, mut failed) = (0, 0);
        for status in &lagging {
            match self.notifier.notify(&check_in_notice(space, status)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    log::warn!(
                        "Failed to deliver check-in reminder to {} for space {}: {}",
                        status.user_id,
                        space.id,
                        e
                    );
                }
            }
        }
        log::info!(
            "Check-in reminders for space {}: {} sent, {} failed",
            space.id,
            delivered,
            failed
        );
        Ok(SpaceReminder::Sent { delivered, failed })
    }

    /// Drive `scan_once` every `period` until shutdown
    pub fn spawn(
        self: Arc<Self>,
        period: std::time::Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        spawn_periodic("check-in reminder", period, shutdown, move || {
            match self.scan_once() {
                Ok(report) if report.reminders_sent > 0 || report.failed > 0 => {
                    log::debug!("Check-in scan: {:?}", report)
                }
                Ok(_) => {}
                Err(e) => log::error!("Check-in scan failed, retrying next tick: {}", e),
            }
        })
    }
}

fn member_statuses(
    conn: &rusqlite::Connection,
    space: &Space,
    now: DateTime<Utc>,
) -> ServiceResult<Vec<CheckInStatus>> {
    let mut statuses = Vec::new();
    for member in spaces::list_active_members(conn, &space.id)? {
        let last = posts::last_post_time(conn, &space.id, &member.user_id)?;
        statuses.push(CheckInStatus::compute(
            member.user_id,
            space.check_in_interval_seconds,
            last,
            now,
        ));
    }
    Ok(statuses)
}

fn check_in_notice(space: &Space, status: &CheckInStatus) -> Notice {
    let body = match status.last_post_at {
        Some(_) => format!(
            "It has been a while since your last post in {} ({}s overdue)",
            space.name, status.overdue_seconds
        ),
        None => format!("You have not posted in {} yet", space.name),
    };
    Notice {
        kind: NoticeKind::CheckInDue,
        user_id: status.user_id.clone(),
        resource_id: space.id.clone(),
        title: format!("Time to check in with {}", space.name),
        body,
    }
}
