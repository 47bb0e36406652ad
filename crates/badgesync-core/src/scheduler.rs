//! Recurring-execution scheduler around the orchestration run.
//!
//! One `Scheduler` instance owns the interval, the active timer task, and
//! the last-run status; nothing else mutates that state. A run lock
//! serializes scheduled and manual invocations so they can never overlap
//! and race on the shared "last result".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::orchestrator::{run_sync, SyncContext, SyncResult};

pub const MIN_INTERVAL_MINUTES: u64 = 5;
pub const MAX_INTERVAL_MINUTES: u64 = 120;

/// Delay before the first scheduled run, so a restart loop cannot hammer
/// the portal.
const STARTUP_DELAY: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// ScheduleStatus
// ---------------------------------------------------------------------------

/// Snapshot for the control surface; field names match the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub interval_minutes: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_result: Option<SyncResult>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct State {
    interval_minutes: u64,
    last_sync: Option<DateTime<Utc>>,
    last_result: Option<SyncResult>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

struct Inner {
    ctx: SyncContext,
    /// Serializes runs: a manual trigger waits for an in-flight scheduled
    /// run (and vice versa) instead of overlapping it.
    run_lock: Mutex<()>,
    state: Mutex<State>,
}

impl Inner {
    async fn run_once(&self, debug: bool) -> SyncResult {
        let _guard = self.run_lock.lock().await;
        let started = Utc::now();
        let result = run_sync(&self.ctx, debug).await;

        let mut state = self.state.lock().await;
        state.last_sync = Some(started);
        state.last_result = Some(result.clone());
        result
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(ctx: SyncContext) -> Self {
        let interval_minutes = ctx.config.interval_minutes;
        Self {
            inner: Arc::new(Inner {
                ctx,
                run_lock: Mutex::new(()),
                state: Mutex::new(State {
                    interval_minutes,
                    last_sync: None,
                    last_result: None,
                    timer: None,
                }),
            }),
        }
    }

    /// Begin recurring execution at the configured interval. A no-op when
    /// portal credentials are absent. The first run fires after a short
    /// startup delay, not immediately.
    pub async fn start(&self) {
        if !self.inner.ctx.config.credentials.is_configured() {
            tracing::info!("portal credentials not configured, scheduled sync disabled");
            return;
        }
        let minutes = self.inner.state.lock().await.interval_minutes;
        tracing::info!("scheduled sync every {minutes} min");
        self.spawn_timer(minutes, true).await;
    }

    /// Replace the recurring timer with a new cadence. Values outside
    /// [5, 120] minutes are rejected without touching the running timer.
    pub async fn set_interval(&self, minutes: u64) -> Result<()> {
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
            return Err(SyncError::InvalidInterval(minutes));
        }
        tracing::info!("sync interval changed to {minutes} min");
        self.spawn_timer(minutes, false).await;
        Ok(())
    }

    /// Run the orchestration out-of-band, e.g. from the admin API. Waits
    /// for any in-flight run to finish first.
    pub async fn trigger_now(&self, debug: bool) -> SyncResult {
        self.inner.run_once(debug).await
    }

    pub async fn status(&self) -> ScheduleStatus {
        let state = self.inner.state.lock().await;
        ScheduleStatus {
            interval_minutes: state.interval_minutes,
            last_sync: state.last_sync,
            last_result: state.last_result.clone(),
        }
    }

    /// Cancel the recurring timer. Runs already in flight complete.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    async fn spawn_timer(&self, minutes: u64, with_startup_delay: bool) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            if with_startup_delay {
                tokio::time::sleep(STARTUP_DELAY).await;
                inner.run_once(false).await;
            }
            let mut ticker = tokio::time::interval(Duration::from_secs(minutes * 60));
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.run_once(false).await;
            }
        });

        let mut state = self.inner.state.lock().await;
        if let Some(old) = state.timer.take() {
            old.abort();
        }
        state.timer = Some(handle);
        state.interval_minutes = minutes;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
