//! Periodic stuck-task recovery.
//!
//! Runs the detector on a fixed interval from a background thread and
//! accepts manual triggers through a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use super::detector::StuckTaskDetector;

pub struct RecoveryScheduler {
    detector: Arc<StuckTaskDetector>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl RecoveryScheduler {
    pub fn new(detector: Arc<StuckTaskDetector>, interval: Duration) -> Self {
        Self {
            detector,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the recovery loop in a background thread.
    /// Accepts a trigger receiver for manual runs.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        let detector = Arc::clone(&self.detector);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("stuck-task-recovery".to_string())
            .spawn(move || {
                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.tick().await; // skip immediate first tick

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::info!("Manual stuck-task recovery triggered");
                            },
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        match detector.detect_and_recover().await {
                            Ok(report) if !report.recovered.is_empty() || !report.failed.is_empty() => {
                                log::info!("Stuck-task recovery: {}", report.message());
                            }
                            Err(e) => log::error!(
                                "Stuck-task recovery failed (worker {}): {}",
                                e.worker_id(),
                                e
                            ),
                            _ => {}
                        }
                    }
                });
            })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, task_repo, Database};
    use crate::error::DispatchError;
    use crate::model::{Job, JobStatus, TaskStatus};
    use crate::recovery::dispatch::ContinuationWorker;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingWorker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContinuationWorker for CountingWorker {
        async fn resume(&self, _job_id: &str) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_scheduler_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let detector = Arc::new(StuckTaskDetector::new(
            db,
            Arc::new(CountingWorker::default()),
            chrono::Duration::minutes(10),
        ));
        let scheduler = RecoveryScheduler::new(detector, Duration::from_millis(50));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        // Wake the select loop so it sees the shutdown.
        let _ = trigger_tx.send(());

        handle.join().expect("scheduler thread panicked");
    }

    #[test]
    fn test_manual_trigger_recovers_stuck_job() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        job_repo::insert(
            &db,
            &Job {
                id: "J".to_string(),
                file_name: "J.pdf".to_string(),
                status: JobStatus::Analyzing,
                is_chunked: false,
                consolidated_content: None,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();
        let mut task = task_repo::new_task("J", "Summary", 1, now);
        task.status = TaskStatus::Processing;
        task.lease_started_at = Some(now - chrono::Duration::minutes(30));
        task_repo::insert(&db, &task).unwrap();

        let worker = Arc::new(CountingWorker::default());
        let detector = Arc::new(StuckTaskDetector::new(
            db.clone(),
            worker.clone(),
            chrono::Duration::minutes(10),
        ));
        // Long interval: only the manual trigger can cause a run.
        let scheduler = RecoveryScheduler::new(detector, Duration::from_secs(3600));
        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx).unwrap();

        trigger_tx.send(()).unwrap();
        let mut released = false;
        for _ in 0..100 {
            let stored = task_repo::find_by_id(&db, &task.id).unwrap().unwrap();
            if stored.status == TaskStatus::Pending {
                released = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        scheduler.stop();
        let _ = trigger_tx.send(());
        handle.join().expect("scheduler thread panicked");

        assert!(released);
        assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
    }
}
