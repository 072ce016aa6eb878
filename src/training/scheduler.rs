//! Periodic training loop
//!
//! Wakes on a fixed interval, asks the service to sweep every prompt
//! identity, and guarantees passes never overlap. The loop is the only
//! caller of [`TrainingService::run_tick`] in normal operation; the CLI
//! can also drive single passes by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::service::{LoopStatus, TickSummary, TrainingService};

fn default_tick_interval() -> u64 {
    3600
}

/// Loop timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between automatic training passes.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
        }
    }
}

/// Periodic driver for the training service.
#[derive(Clone)]
pub struct TrainingLoop {
    service: Arc<TrainingService>,
    config: ScheduleConfig,
    running: Arc<RwLock<bool>>,
    tick_guard: Arc<Mutex<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TrainingLoop {
    pub fn new(service: Arc<TrainingService>, config: ScheduleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            service,
            config,
            running: Arc::new(RwLock::new(false)),
            tick_guard: Arc::new(Mutex::new(())),
            shutdown_tx,
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run one pass now. Returns None when a previous pass is still in
    /// flight; passes never overlap.
    pub async fn tick(&self, now: DateTime<Utc>) -> Option<TickSummary> {
        let _guard = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous training pass still running; skipping this tick");
                return None;
            }
        };

        let summary = self.service.run_tick(now).await;

        let next = now + chrono::Duration::seconds(self.config.tick_interval_secs as i64);
        self.service
            .set_loop_status(LoopStatus {
                running: *self.running.read().await,
                last_tick_at: Some(now),
                next_tick_at: Some(next),
            })
            .await;

        info!(
            "Training pass complete: {} prompt(s) checked, {} trained, {} promoted, {} failed",
            summary.checked, summary.trained, summary.promoted, summary.failed
        );
        Some(summary)
    }

    /// Start the periodic loop. Returns once the background task is
    /// spawned; the loop runs until [`stop`](Self::stop).
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Training loop already running");
                return;
            }
            *running = true;
        }

        info!(
            "Training loop started (interval: {}s)",
            self.config.tick_interval_secs
        );

        let this = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(this.config.tick_interval_secs.max(1)));
            // a pass can outlast the interval; skip missed ticks
            // instead of bursting to catch up
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Training loop received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if !*this.running.read().await {
                            break;
                        }
                        this.tick(Utc::now()).await;
                    }
                }
            }

            this.service.set_loop_status(LoopStatus::default()).await;
            info!("Training loop stopped");
        });
    }

    /// Stop the loop after the current pass finishes.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::generation::MockTextGenerator;

    async fn test_loop() -> (Arc<TrainingService>, TrainingLoop) {
        let db = Database::open_in_memory().unwrap();
        let generator = Arc::new(MockTextGenerator::new());
        let service = Arc::new(TrainingService::new(Config::default(), &db, generator));
        let looper = TrainingLoop::new(service.clone(), ScheduleConfig::default());
        (service, looper)
    }

    #[tokio::test]
    async fn test_tick_reports_counts_and_updates_status() {
        let (service, looper) = test_loop().await;
        let now = Utc::now();

        let summary = looper.tick(now).await.unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(summary.trained, 0);

        let status = service.loop_status().await;
        assert_eq!(status.last_tick_at, Some(now));
        assert!(status.next_tick_at.unwrap() > now);
    }

    #[tokio::test]
    async fn test_tick_skips_when_previous_pass_running() {
        let (_service, looper) = test_loop().await;

        let _held = looper.tick_guard.lock().await;
        assert!(looper.tick(Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let (_service, looper) = test_loop().await;
        assert!(!looper.is_running().await);
        looper.stop().await;
        assert!(!looper.is_running().await);
    }
}
