//! Daily trading schedule.
//!
//! Four jobs in exchange-local time: the pre-open universe scan, engine
//! start for the NXT pre-session, the regular-session notice, and the
//! post-close settlement. The scheduler only decides *when*; the *what*
//! lives behind [`JobRunner`] so the wiring stays in the binary.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{info, warn};

use kt_broker::ExchangeClock;
use kt_types::{KtError, KtResult};

/// The four daily jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// 08:10 — filter the market into the day's tradable universe.
    UniverseScan,
    /// 08:30 — start the realtime engine (NXT pre-session coverage).
    EngineStart,
    /// 09:00 — informational only; routing switches by itself.
    MarketOpenNotice,
    /// 15:30 — settle the day and write the report.
    Settlement,
}

/// Job times in exchange-local (KST) wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub scan: NaiveTime,
    pub engine_start: NaiveTime,
    pub market_open: NaiveTime,
    pub settlement: NaiveTime,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            scan: NaiveTime::from_hms_opt(8, 10, 0).unwrap(),
            engine_start: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            market_open: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            settlement: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        }
    }
}

impl JobSchedule {
    fn entries(&self) -> [(NaiveTime, JobKind); 4] {
        [
            (self.scan, JobKind::UniverseScan),
            (self.engine_start, JobKind::EngineStart),
            (self.market_open, JobKind::MarketOpenNotice),
            (self.settlement, JobKind::Settlement),
        ]
    }

    /// The next job strictly after `now`, rolling into tomorrow past the
    /// last job of the day.
    pub fn next_job(&self, now: NaiveDateTime) -> (NaiveDateTime, JobKind) {
        let today = now.date();
        let mut entries = self.entries();
        entries.sort_by_key(|(time, _)| *time);

        for (time, kind) in entries {
            let at = today.and_time(time);
            if at > now {
                return (at, kind);
            }
        }

        let (time, kind) = entries[0];
        ((today + Duration::days(1)).and_time(time), kind)
    }
}

/// The side doing the actual work per job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, kind: JobKind);
}

/// Stop handle for the scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    stopped: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.shutdown.notify_waiters();
    }
}

/// Cron-style loop over the job schedule.
pub struct DailyScheduler {
    schedule: JobSchedule,
    clock: ExchangeClock,
    stopped: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl DailyScheduler {
    pub fn new(schedule: JobSchedule, clock: ExchangeClock) -> Self {
        Self {
            schedule,
            clock,
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            stopped: Arc::clone(&self.stopped),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Run until stopped. Jobs run inline; a slow job simply delays the
    /// next wake-up computation, never skips it.
    pub async fn run(&self, runner: Arc<dyn JobRunner>) {
        info!(schedule = ?self.schedule, "daily scheduler started");
        while !self.stopped.load(Ordering::Relaxed) {
            let now = self.clock.now();
            let (when, kind) = self.schedule.next_job(now);
            let wait = (when - now).to_std().unwrap_or_default();
            info!(?kind, at = %when, "next scheduled job");

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("scheduler shut down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    info!(?kind, "running scheduled job");
                    runner.run_job(kind).await;
                }
            }
        }
    }
}

/// The persisted result of the morning universe scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub date: NaiveDate,
    pub symbols: Vec<String>,
}

impl UniverseSnapshot {
    pub fn save(&self, path: &Path) -> KtResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!(?path, symbols = self.symbols.len(), "universe snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> KtResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KtError::Config(format!("universe file unreadable: {e}")))?;
        let snapshot: Self = serde_json::from_str(&raw)?;
        Ok(snapshot)
    }

    /// Load only if the snapshot belongs to `date`.
    pub fn load_for(path: &Path, date: NaiveDate) -> Option<Self> {
        match Self::load(path) {
            Ok(snapshot) if snapshot.date == date => Some(snapshot),
            Ok(snapshot) => {
                warn!(snapshot_date = %snapshot.date, wanted = %date, "stale universe snapshot");
                None
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    #[test]
    fn test_next_job_ordering_within_day() {
        let schedule = JobSchedule::default();
        let day = (2025, 7, 14);

        let (when, kind) = schedule.next_job(at(day, (7, 0)));
        assert_eq!(kind, JobKind::UniverseScan);
        assert_eq!(when.time(), schedule.scan);

        let (_, kind) = schedule.next_job(at(day, (8, 15)));
        assert_eq!(kind, JobKind::EngineStart);

        let (_, kind) = schedule.next_job(at(day, (8, 45)));
        assert_eq!(kind, JobKind::MarketOpenNotice);

        let (_, kind) = schedule.next_job(at(day, (12, 0)));
        assert_eq!(kind, JobKind::Settlement);
    }

    #[test]
    fn test_next_job_rolls_to_tomorrow() {
        let schedule = JobSchedule::default();
        let (when, kind) = schedule.next_job(at((2025, 7, 14), (16, 0)));
        assert_eq!(kind, JobKind::UniverseScan);
        assert_eq!(when.date(), NaiveDate::from_ymd_opt(2025, 7, 15).unwrap());
    }

    #[test]
    fn test_job_time_is_exclusive() {
        let schedule = JobSchedule::default();
        // Exactly at 08:10 the scan has fired; next is the engine start.
        let (_, kind) = schedule.next_job(at((2025, 7, 14), (8, 10)));
        assert_eq!(kind, JobKind::EngineStart);
    }

    #[test]
    fn test_universe_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("universe.json");
        let snapshot = UniverseSnapshot {
            date: NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            symbols: vec!["005930".into(), "000660".into()],
        };
        snapshot.save(&path).unwrap();

        let loaded =
            UniverseSnapshot::load_for(&path, NaiveDate::from_ymd_opt(2025, 7, 14).unwrap())
                .unwrap();
        assert_eq!(loaded, snapshot);

        // A different day refuses the stale snapshot.
        assert!(UniverseSnapshot::load_for(
            &path,
            NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
        )
        .is_none());
    }

    struct Recording {
        kinds: Mutex<Vec<JobKind>>,
        stop_after: usize,
        handle: SchedulerHandle,
    }

    #[async_trait]
    impl JobRunner for Recording {
        async fn run_job(&self, kind: JobKind) {
            let mut kinds = self.kinds.lock();
            kinds.push(kind);
            if kinds.len() >= self.stop_after {
                self.handle.stop();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_fires_and_stops() {
        let scheduler = DailyScheduler::new(JobSchedule::default(), ExchangeClock::new());
        let runner = Arc::new(Recording {
            kinds: Mutex::new(Vec::new()),
            stop_after: 4,
            handle: scheduler.handle(),
        });

        scheduler.run(Arc::clone(&runner) as Arc<dyn JobRunner>).await;
        let kinds = runner.kinds.lock();
        assert_eq!(kinds.len(), 4);
        // One full day covers every job exactly once.
        for kind in [
            JobKind::UniverseScan,
            JobKind::EngineStart,
            JobKind::MarketOpenNotice,
            JobKind::Settlement,
        ] {
            assert_eq!(kinds.iter().filter(|k| **k == kind).count(), 1);
        }
    }
}
