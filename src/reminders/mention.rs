use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::notifier::{Notice, NoticeKind, Notifier};
use super::spawn_periodic;
use crate::clock::{Clock, SystemClock};
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::{mentions, posts, spaces, users, Store};

/// Most mentions expired by a single scan; the rest wait for the next tick
const SCAN_BATCH: i64 = 500;

/// A pending mention with the time left before it expires
#[derive(Debug, Clone, Serialize)]
pub struct MentionView {
    #[serde(flatten)]
    pub mention: PostMention,
    pub remaining_seconds: i64,
}

/// Outcome of a view/ignore action. `changed` is false when the mention had already left
/// `pending` (another action or the expiry scan got there first).
#[derive(Debug, Clone, Serialize)]
pub struct MentionResponse {
    pub mention: PostMention,
    pub changed: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub expired: usize,
    pub notified: usize,
    pub failed: usize,
}

enum Expiry {
    /// Someone else resolved the mention between the scan read and the update
    Lost,
    Silent,
    Notify(PostMention),
}

pub struct MentionEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    cooldown: Duration,
}

impl MentionEngine {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(store, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            notifier,
            cooldown: Duration::seconds(120),
        }
    }

    pub fn with_cooldown(mut self, cooldown: std::time::Duration) -> Self {
        self.cooldown = Duration::from_std(cooldown).unwrap_or(self.cooldown);
        self
    }

    /// Mention users in a post. Users already mentioned on the post are skipped; the
    /// returned list holds only newly created mentions.
    pub fn create_mentions(
        &self,
        post_id: &str,
        mentioner_id: &str,
        mentioned_user_ids: &[String],
        timeout_seconds: i64,
    ) -> ServiceResult<Vec<PostMention>> {
        validate_timeout(timeout_seconds)?;

        let now = self.clock.now();
        let created = self.store.transaction(|tx| {
            let post = posts::get_post(tx, post_id)?;
            if post.status != PostStatus::Normal {
                return Err(ServiceError::Invalid(format!("Post {} was deleted", post_id)));
            }
            if !is_active_member(tx, &post.space_id, mentioner_id)? {
                return Err(ServiceError::Forbidden(format!(
                    "User {} is not an active member of space {}",
                    mentioner_id, post.space_id
                )));
            }

            let mut seen = HashSet::new();
            let mut created = Vec::new();
            for user_id in mentioned_user_ids {
                if user_id == mentioner_id || !seen.insert(user_id.as_str()) {
                    continue;
                }
                users::get_user(tx, user_id)?;
                if !is_active_member(tx, &post.space_id, user_id)? {
                    return Err(ServiceError::Invalid(format!(
                        "User {} is not an active member of space {}",
                        user_id, post.space_id
                    )));
                }

                let mut mention = PostMention {
                    id: String::new(),
                    post_id: post_id.to_string(),
                    mentioned_user_id: user_id.clone(),
                    mentioner_user_id: mentioner_id.to_string(),
                    timeout_seconds,
                    created_at: now,
                    viewed_at: None,
                    last_notified_at: None,
                    status: MentionStatus::Pending,
                };
                if mentions::insert_mention_if_absent(tx, &mut mention)? > 0 {
                    created.push(mention);
                }
            }
            Ok(created)
        })?;

        if !created.is_empty() {
            log::info!(
                "Created {} mentions on post {} (timeout {}s)",
                created.len(),
                post_id,
                timeout_seconds
            );
        }
        Ok(created)
    }

    pub fn mark_viewed(&self, mention_id: &str, actor_id: &str) -> ServiceResult<MentionResponse> {
        self.respond(mention_id, actor_id, MentionStatus::Viewed)
    }

    pub fn mark_ignored(&self, mention_id: &str, actor_id: &str) -> ServiceResult<MentionResponse> {
        self.respond(mention_id, actor_id, MentionStatus::Ignored)
    }

    fn respond(
        &self,
        mention_id: &str,
        actor_id: &str,
        status: MentionStatus,
    ) -> ServiceResult<MentionResponse> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let mention = mentions::get_mention(tx, mention_id)?;
            if mention.mentioned_user_id != actor_id {
                return Err(ServiceError::Forbidden(
                    "only the mentioned user can respond to a mention".to_string(),
                ));
            }
            let changed = mentions::respond_to_mention(tx, mention_id, status, now)? > 0;
            Ok(MentionResponse {
                mention: mentions::get_mention(tx, mention_id)?,
                changed,
            })
        })
    }

    /// Re-arm a mention with a new timeout, starting now. Only the mentioner may do this.
    pub fn update_timeout(
        &self,
        mention_id: &str,
        actor_id: &str,
        timeout_seconds: i64,
    ) -> ServiceResult<PostMention> {
        validate_timeout(timeout_seconds)?;

        let now = self.clock.now();
        let mention = self.store.transaction(|tx| {
            let mention = mentions::get_mention(tx, mention_id)?;
            if mention.mentioner_user_id != actor_id {
                return Err(ServiceError::Forbidden(
                    "only the mentioner can change the timeout".to_string(),
                ));
            }
            mentions::rearm_mention(tx, mention_id, timeout_seconds, now)?;
            Ok(mentions::get_mention(tx, mention_id)?)
        })?;

        log::info!("Mention {} re-armed for {}s", mention.id, timeout_seconds);
        Ok(mention)
    }

    pub fn get_mention(&self, mention_id: &str) -> ServiceResult<PostMention> {
        self.store.read(|c| Ok(mentions::get_mention(c, mention_id)?))
    }

    /// Pending mentions addressed to `user_id`, soonest deadline first
    pub fn pending_for(&self, user_id: &str) -> ServiceResult<Vec<MentionView>> {
        let now = self.clock.now();
        let pending = self
            .store
            .read(|c| mentions::pending_mentions_for(c, user_id))?;
        Ok(pending
            .into_iter()
            .map(|mention| MentionView {
                remaining_seconds: mention.remaining_seconds(now),
                mention,
            })
            .collect())
    }

    /// Expire every mention whose deadline has passed.
    ///
    /// Each mention is flipped in its own transaction; the notifier runs after that commit,
    /// and only when no reminder went out for the mention within the cool-down. A failure on
    /// one mention is logged and the scan moves on. Only a failure to list due mentions
    /// fails the whole scan.
    pub fn scan_once(&self) -> ServiceResult<ScanReport> {
        let now = self.clock.now();
        let due = self
            .store
            .read(|c| mentions::due_mentions(c, now, SCAN_BATCH))?;

        let mut report = ScanReport {
            scanned: due.len(),
            ..ScanReport::default()
        };

        for mention in due {
            match self.expire(&mention.id, now) {
                Ok(Expiry::Lost) => {}
                Ok(Expiry::Silent) => report.expired += 1,
                Ok(Expiry::Notify(mention)) => {
                    report.expired += 1;
                    match self.notifier.notify(&expired_notice(&mention)) {
                        Ok(()) => {
                            report.notified += 1;
                            log::info!(
                                "Mention {} expired; reminded {}",
                                mention.id,
                                mention.mentioned_user_id
                            );
                        }
                        Err(e) => {
                            report.failed += 1;
                            log::warn!("Failed to deliver reminder for mention {}: {}", mention.id, e);
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Failed to expire mention {}: {}", mention.id, e);
                }
            }
        }

        Ok(report)
    }

    fn expire(&self, mention_id: &str, now: DateTime<Utc>) -> ServiceResult<Expiry> {
        let cooldown = self.cooldown;
        self.store.transaction(|tx| {
            let mention = mentions::get_mention(tx, mention_id)?;
            if mention.status != MentionStatus::Pending
                || mention.viewed_at.is_some()
                || !mention.is_due(now)
            {
                return Ok(Expiry::Lost);
            }

            let notify = mention
                .last_notified_at
                .map_or(true, |at| now - at >= cooldown);
            let notified_at = if notify { Some(now) } else { None };
            if mentions::expire_mention(tx, mention_id, notified_at)? == 0 {
                return Ok(Expiry::Lost);
            }

            if notify {
                Ok(Expiry::Notify(mentions::get_mention(tx, mention_id)?))
            } else {
                Ok(Expiry::Silent)
            }
        })
    }

    /// Drive `scan_once` every `period` until shutdown
    pub fn spawn(
        self: Arc<Self>,
        period: std::time::Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        spawn_periodic("mention reminder", period, shutdown, move || {
            match self.scan_once() {
                Ok(report) if report.scanned > 0 => log::debug!("Mention scan: {:?}", report),
                Ok(_) => {}
                Err(e) => log::error!("Mention scan failed, retrying next tick: {}", e),
            }
        })
    }
}

fn validate_timeout(timeout_seconds: i64) -> ServiceResult<()> {
    if timeout_seconds <= 0 {
        return Err(ServiceError::Invalid(
            "timeout_seconds must be positive".to_string(),
        ));
    }
    if timeout_seconds > MAX_MENTION_TIMEOUT_SECONDS {
        return Err(ServiceError::Invalid(format!(
            "timeout_seconds must be at most {}",
            MAX_MENTION_TIMEOUT_SECONDS
        )));
    }
    Ok(())
}

fn is_active_member(conn: &rusqlite::Connection, space_id: &str, user_id: &str) -> ServiceResult<bool> {
    Ok(matches!(
        spaces::find_member(conn, space_id, user_id)?,
        Some(m) if m.status == MemberStatus::Active
    ))
}

fn expired_notice(mention: &PostMention) -> Notice {
    Notice {
        kind: NoticeKind::MentionExpired,
        user_id: mention.mentioned_user_id.clone(),
        resource_id: mention.id.clone(),
        title: "A mention is waiting for you".to_string(),
        body: format!(
            "You were mentioned on post {} and have not responded yet",
            mention.post_id
        ),
    }
}
