use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::NotificationFeed;
use crate::mutation::FlagBackend;

/// Periodic `refresh` of a notification feed.
pub struct Poller;

impl Poller {
    /// Start polling `feed` every `interval`.
    ///
    /// The first refresh happens one interval after start; hosts load the
    /// feed themselves on start-up. Failures are logged and polling goes on.
    /// Dropping the handle stops the poller at its next wake-up.
    pub fn spawn<B>(feed: NotificationFeed<B>, interval: Duration) -> PollerHandle
    where
        B: FlagBackend + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (unread_tx, unread_rx) = watch::channel(feed.unread_count());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match feed.refresh().await {
                            Ok(_) => {
                                let unread = feed.unread_count();
                                debug!(unread, "Notifications polled");
                                unread_tx.send_replace(unread);
                            }
                            Err(e) => warn!(error = %e, "Notification poll failed, keeping last list"),
                        }

                        let evicted = feed.store().evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "Evicted expired cache entries");
                        }
                    }
                }
            }
            info!("Notification poller stopped");
        });

        PollerHandle {
            shutdown: Some(shutdown_tx),
            unread: unread_rx,
            task,
        }
    }
}

pub struct PollerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    unread: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Unread count after each successful poll.
    pub fn unread(&self) -> watch::Receiver<usize> {
        self.unread.clone()
    }

    /// Stop polling and wait for an in-progress refresh to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Notification poller task failed");
        }
    }
}
