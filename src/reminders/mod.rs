//! Background reminder loops
//!
//! Both engines expose a synchronous `scan_once` that does one pass over the store, plus a
//! `spawn` that drives it from a tokio interval until the shutdown channel flips. Each item a
//! scan touches is committed in its own transaction, so stopping between ticks never leaves a
//! half-written row.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

mod checkin;
mod mention;
mod notifier;

pub use checkin::{CheckInEngine, CheckInReport, CheckInStatus};
pub use mention::{MentionEngine, MentionResponse, MentionView, ScanReport};
pub use notifier::{Notice, NoticeKind, Notifier, NotifyError, StoreNotifier};

const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Sender flips to `true` once to stop every loop holding a receiver
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Run `tick` every `period` until shutdown is signalled (or the sender is dropped).
///
/// Each tick runs on the blocking pool, so a scan waiting on the store never stalls the
/// runtime. Slow ticks push the schedule back instead of bursting to catch up.
pub fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let period = period.max(MIN_PERIOD);
    let tick = Arc::new(tick);
    tokio::spawn(async move {
        log::info!("{} loop started (every {:?})", name, period);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tick = tick.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
                        log::error!("{} tick aborted: {}", name, e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("{} loop stopped", name);
    })
}
