//! Project deadline sweeper.
//!
//! Periodically closes active projects whose `end_time` has passed and tells
//! the owner (and the admins) how the campaign ended. Closing is a guarded
//! `active -> finished` update, so a project that reached its target through
//! a payment in the meantime is never closed twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::error::AppError;
use crate::services::notifier::{Dispatcher, Notification};
use crate::store::PaymentStore;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub struct ProjectSweeper {
    store: Arc<dyn PaymentStore>,
    dispatcher: Dispatcher,
    admin_emails: Vec<String>,
    interval: Duration,
}

impl ProjectSweeper {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        dispatcher: Dispatcher,
        admin_emails: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            admin_emails,
            // `interval` panics on a zero period.
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Main loop; returns once the shutdown flag flips.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "project sweeper started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("shutdown signal received, stopping project sweeper");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        tracing::error!(error = %e, "project sweep failed");
                    }
                }
            }
        }

        tracing::info!("project sweeper stopped");
    }

    /// Close every active project past its deadline as of `now`.
    ///
    /// Returns how many projects were closed by this call.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let closed = self.store.close_expired_projects(now).await?;

        for snapshot in &closed {
            tracing::info!(
                project_id = %snapshot.project.id,
                total_cents = snapshot.total_donations_cents,
                target_cents = snapshot.project.total_target_cents,
                "project closed at deadline"
            );
            self.dispatcher
                .dispatch(Notification::for_closed_project(snapshot, &self.admin_emails))
                .await;
        }

        Ok(closed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::ProjectStatus;
    use crate::services::notifier::{Notifier, NotifyError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn sweeper(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> ProjectSweeper {
        ProjectSweeper::new(
            store,
            Dispatcher::inline(notifier),
            vec!["admin@example.com".to_string()],
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn expired_project_is_closed_and_reported_once() {
        let store = Arc::new(MemoryStore::new());
        let owner = store.add_user("owner", "owner@example.com");
        let expired = store.add_project(
            owner.id,
            "Library",
            10_000,
            Utc::now() - chrono::Duration::hours(1),
        );
        let running = store.add_project(
            owner.id,
            "Clinic",
            10_000,
            Utc::now() + chrono::Duration::days(3),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let sweeper = sweeper(store.clone(), notifier.clone());

        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 0);

        assert_eq!(store.project(expired.id).unwrap().status, ProjectStatus::Finished);
        assert_eq!(store.project(running.id).unwrap().status, ProjectStatus::Active);

        let kinds: Vec<_> = notifier.sent.lock().unwrap().iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, vec!["project_closed", "admin_digest"]);
    }

    #[tokio::test]
    async fn no_admins_means_owner_notice_only() {
        let store = Arc::new(MemoryStore::new());
        let owner = store.add_user("owner", "owner@example.com");
        store.add_project(owner.id, "Library", 10_000, Utc::now() - chrono::Duration::hours(1));
        let notifier = Arc::new(RecordingNotifier::default());
        let sweeper = ProjectSweeper::new(
            store,
            Dispatcher::inline(notifier.clone()),
            Vec::new(),
            Duration::from_secs(300),
        );

        sweeper.sweep_once(Utc::now()).await.unwrap();

        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped_and_still_sweeps() {
        let store = Arc::new(MemoryStore::new());
        let owner = store.add_user("owner", "owner@example.com");
        let expired = store.add_project(
            owner.id,
            "Library",
            10_000,
            Utc::now() - chrono::Duration::hours(1),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let sweeper = Arc::new(ProjectSweeper::new(
            store.clone(),
            Dispatcher::inline(notifier),
            Vec::new(),
            Duration::ZERO,
        ));
        assert_eq!(sweeper.interval, MIN_INTERVAL);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run(shutdown_rx).await }
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown_tx.send(true).unwrap();

        task.await.unwrap();
        assert_eq!(store.project(expired.id).unwrap().status, ProjectStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_signal() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let sweeper = Arc::new(sweeper(store, notifier));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_secs(600)).await;
        shutdown_tx.send(true).unwrap();

        task.await.unwrap();
    }
}
