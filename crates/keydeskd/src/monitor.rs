//! Periodic overdue scan.
//!
//! Every interval the monitor asks the ledger for loans older than the
//! threshold and posts one notice listing all of them. A loan stays in the
//! notice on every tick until it is returned.

use std::sync::Arc;
use std::time::Duration;

use keydesk_core::{ChannelId, Ledger};
use keydesk_protocol::ChatBus;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::name_loans;
use crate::reply;

/// Shortest accepted check interval. `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Posts overdue notices to one channel.
pub struct OverdueMonitor {
    ledger: Arc<Ledger>,
    bus: Arc<dyn ChatBus>,
    channel: ChannelId,
    threshold: chrono::Duration,
    interval: Duration,
}

impl OverdueMonitor {
    pub fn new(
        ledger: Arc<Ledger>,
        bus: Arc<dyn ChatBus>,
        channel: ChannelId,
        threshold: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            bus,
            channel,
            threshold,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Scans the ledger once. Returns the notice text, if anything is overdue.
    pub async fn check_once(&self) -> Option<String> {
        let now = self.ledger.now();
        let overdue = self.ledger.find_overdue(now, self.threshold);
        if overdue.is_empty() {
            debug!("No overdue keys");
            return None;
        }

        info!(count = overdue.len(), "Overdue keys found");
        let loans = name_loans(self.bus.as_ref(), overdue).await;
        reply::overdue_notice(&loans, self.threshold)
    }

    /// One scan plus post. Post failures are logged and the next tick retries.
    pub async fn tick(&self) {
        let Some(notice) = self.check_once().await else {
            return;
        };
        if let Err(e) = self.bus.post_message(&self.channel, &notice).await {
            warn!(channel = %self.channel, error = %e, "Failed to post overdue notice");
        }
    }

    /// Runs the scan loop until `cancel_token` fires.
    ///
    /// The first scan happens one full interval after start.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                channel = %self.channel,
                threshold_hours = self.threshold.num_hours(),
                interval_secs = self.interval.as_secs(),
                "Overdue monitor started"
            );

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => {
                        debug!("Overdue monitor shutting down");
                        break;
                    }

                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use keydesk_core::{KeyId, KeyInventory, ManualClock, UserId};
    use keydesk_protocol::{BusError, BusResult, ChannelInfo, EventReceiver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Records posts; everything else is unused by the monitor.
    struct PostSink {
        posts: mpsc::UnboundedSender<(ChannelId, String)>,
        /// Number of upcoming posts that fail before posts succeed again.
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl ChatBus for PostSink {
        async fn bot_user_id(&self) -> BusResult<UserId> {
            Ok(UserId::new("UBOT"))
        }

        async fn resolve_channel(&self, name: &str) -> BusResult<ChannelId> {
            Err(BusError::ChannelNotFound(name.to_string()))
        }

        async fn join_channel(&self, _channel: &ChannelId) -> BusResult<()> {
            Ok(())
        }

        async fn list_channels(&self) -> BusResult<Vec<ChannelInfo>> {
            Ok(Vec::new())
        }

        async fn connect(&self) -> BusResult<EventReceiver> {
            Err(BusError::Transport("not connected".to_string()))
        }

        async fn post_message(&self, channel: &ChannelId, text: &str) -> BusResult<()> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BusError::Transport("post failed".to_string()));
            }
            let _ = self.posts.send((channel.clone(), text.to_string()));
            Ok(())
        }

        async fn display_name(&self, user: &UserId) -> BusResult<String> {
            Ok(format!("name-{user}"))
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        ledger: Arc<Ledger>,
        posts: mpsc::UnboundedReceiver<(ChannelId, String)>,
        monitor: OverdueMonitor,
    }

    fn fixture(failing_posts: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(Ledger::new(KeyInventory::standard(), clock.clone()));
        let (tx, posts) = mpsc::unbounded_channel();
        let bus = Arc::new(PostSink {
            posts: tx,
            failures_left: AtomicUsize::new(failing_posts),
        });
        let monitor = OverdueMonitor::new(
            ledger.clone(),
            bus,
            ChannelId::new("C1"),
            chrono::Duration::hours(48),
            Duration::from_secs(3600),
        );
        Fixture {
            clock,
            ledger,
            posts,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_check_once_nothing_overdue() {
        let f = fixture(0);
        assert_eq!(f.monitor.check_once().await, None);

        f.ledger.borrow(&KeyId::new("13"), &UserId::new("U1")).unwrap();
        f.clock.advance(chrono::Duration::hours(48));
        // Exactly at the threshold is not overdue yet.
        assert_eq!(f.monitor.check_once().await, None);
    }

    #[tokio::test]
    async fn test_check_once_lists_all_overdue() {
        let f = fixture(0);
        f.ledger.borrow(&KeyId::new("13"), &UserId::new("U1")).unwrap();
        f.ledger.borrow(&KeyId::new("15"), &UserId::new("U2")).unwrap();
        f.clock.advance(chrono::Duration::hours(49));
        f.ledger.borrow(&KeyId::new("14"), &UserId::new("U3")).unwrap();

        let notice = f.monitor.check_once().await.unwrap();
        let lines: Vec<&str> = notice.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("カード番号13") && lines[1].contains("name-U1"));
        assert!(lines[2].contains("カード番号15") && lines[2].contains("name-U2"));
        assert!(!notice.contains("カード番号14"));
    }

    #[tokio::test]
    async fn test_tick_posts_to_channel() {
        let mut f = fixture(0);
        f.ledger.borrow(&KeyId::new("14"), &UserId::new("U1")).unwrap();
        f.clock.advance(chrono::Duration::hours(50));

        f.monitor.tick().await;
        let (channel, text) = f.posts.try_recv().unwrap();
        assert_eq!(channel, ChannelId::new("C1"));
        assert!(text.contains("カード番号14"));

        // Still overdue, so the next tick repeats it.
        f.monitor.tick().await;
        assert!(f.posts.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_next_tick_posts_after_failed_post() {
        let mut f = fixture(1);
        f.ledger.borrow(&KeyId::new("14"), &UserId::new("U1")).unwrap();
        f.clock.advance(chrono::Duration::hours(50));

        f.monitor.tick().await;
        assert!(f.posts.try_recv().is_err());
        assert_eq!(f.ledger.len(), 1);

        f.monitor.tick().await;
        let (_, text) = f.posts.try_recv().unwrap();
        assert!(text.contains("カード番号14"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_waits_one_interval() {
        let Fixture {
            clock,
            ledger,
            mut posts,
            monitor,
        } = fixture(0);
        ledger.borrow(&KeyId::new("13"), &UserId::new("U1")).unwrap();
        clock.advance(chrono::Duration::hours(72));

        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());

        let early = tokio::time::timeout(Duration::from_secs(3599), posts.recv()).await;
        assert!(early.is_err(), "no notice before the first interval");

        let (_, text) = posts.recv().await.unwrap();
        assert!(text.contains("カード番号13"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
