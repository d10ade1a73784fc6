//! Recurring weather refresh job.
//!
//! One job exists per process. It is started and stopped at runtime (the
//! weather service toggles it whenever the API credential appears or goes
//! away); start and stop are idempotent.
//!
//! Architecture:
//! - A spawned task sleeps until the next slot of the fixed schedule, runs
//!   the refresh, and loops
//! - Stopping aborts the task; a refresh in flight is dropped with it
//! - State is in-memory (`Arc<RwLock<SchedulerState>>`) and served by the
//!   status endpoint

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RefreshSchedule {
    /// Every day at 00:00 UTC
    Daily,
    /// Every full hour
    Hourly,
}

impl RefreshSchedule {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Some(RefreshSchedule::Daily),
            "hourly" => Some(RefreshSchedule::Hourly),
            _ => None,
        }
    }

    /// First slot strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            RefreshSchedule::Daily => {
                let tomorrow = now.date_naive() + Duration::days(1);
                DateTime::<Utc>::from_naive_utc_and_offset(
                    tomorrow.and_time(chrono::NaiveTime::MIN),
                    Utc,
                )
            }
            RefreshSchedule::Hourly => floor_to_hour(now) + Duration::hours(1),
        }
    }
}

/// Floor a datetime to the start of its hour.
fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

// ---------------------------------------------------------------------------
// Scheduler state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Scheduler state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerState {
    pub running: bool,
    pub schedule: RefreshSchedule,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<u64>,
    pub total_runs: u64,
    /// Number of start/stop transitions since boot
    pub transitions: u64,
}

impl SchedulerState {
    pub fn new(schedule: RefreshSchedule) -> Self {
        Self {
            running: false,
            schedule,
            next_run_at: None,
            last_run_completed_at: None,
            last_run_duration_ms: None,
            total_runs: 0,
            transitions: 0,
        }
    }
}

/// Shared scheduler state handle.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Work executed on every scheduled slot. Must not fail: implementations log
/// and swallow their own errors.
#[async_trait]
pub trait RefreshJob: Send + Sync + 'static {
    async fn run(&self);
}

pub struct RefreshScheduler {
    schedule: RefreshSchedule,
    state: SharedSchedulerState,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(schedule: RefreshSchedule) -> Self {
        Self {
            schedule,
            state: Arc::new(RwLock::new(SchedulerState::new(schedule))),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SharedSchedulerState {
        self.state.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Start the job. Returns `false` if it was already running.
    pub async fn start(&self, job: Arc<dyn RefreshJob>) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return false;
        }

        {
            let mut s = self.state.write().await;
            s.running = true;
            s.transitions += 1;
        }

        *handle = Some(tokio::spawn(run_scheduler(
            self.schedule,
            job,
            self.state.clone(),
        )));
        tracing::info!("Weather refresh job started ({:?})", self.schedule);
        true
    }

    /// Stop the job. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(handle) = self.handle.lock().await.take() else {
            return false;
        };
        handle.abort();

        {
            let mut s = self.state.write().await;
            s.running = false;
            s.next_run_at = None;
            s.transitions += 1;
        }

        tracing::info!("Weather refresh job stopped");
        true
    }
}

/// Scheduler loop. Runs until the task is aborted.
async fn run_scheduler(schedule: RefreshSchedule, job: Arc<dyn RefreshJob>, state: SharedSchedulerState) {
    loop {
        let next_run = schedule.next_run_after(Utc::now());
        {
            let mut s = state.write().await;
            s.next_run_at = Some(next_run);
        }

        let wait = (next_run - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!("Scheduler: next weather refresh at {}", next_run);
        tokio::time::sleep(wait).await;

        let run_start = Utc::now();
        job.run().await;
        let run_duration_ms = (Utc::now() - run_start).num_milliseconds().max(0) as u64;

        {
            let mut s = state.write().await;
            s.last_run_completed_at = Some(Utc::now());
            s.last_run_duration_ms = Some(run_duration_ms);
            s.total_runs += 1;
        }

        tracing::info!("Scheduler: weather refresh complete in {}ms", run_duration_ms);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
