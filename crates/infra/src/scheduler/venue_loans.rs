use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use assetflow_core::{Clock, Entity, Outcome, Stamp};
use assetflow_events::EventBus;
use assetflow_loans::VenueLoanId;

use crate::engine::{Engine, EngineError, WorkflowEnvelope};
use crate::store::Store;

/// What one scheduler pass did.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub started: usize,
    pub completed: usize,
    /// Candidates whose guard refused (e.g. completed manually meanwhile).
    pub rejected: usize,
    /// Candidates whose transition failed with an error.
    pub failed: usize,
}

impl TickReport {
    fn record(
        &mut self,
        loan: VenueLoanId,
        op: &'static str,
        result: Result<Outcome, EngineError>,
    ) -> bool {
        match result {
            Ok(outcome) if outcome.is_applied() => true,
            Ok(outcome) => {
                debug!(loan_id = loan.get(), op, reason = outcome.message(), "scheduler transition refused");
                self.rejected += 1;
                false
            }
            Err(e) => {
                warn!(loan_id = loan.get(), op, error = %e, "scheduler transition failed");
                self.failed += 1;
                false
            }
        }
    }
}

impl<S, B, C> Engine<S, B, C>
where
    S: Store,
    B: EventBus<WorkflowEnvelope>,
    C: Clock,
{
    /// One scheduler pass at `now`.
    ///
    /// Starts approved venue loans whose start time has come and completes
    /// active ones whose end time has passed. A failure on one loan does not
    /// stop the scan.
    pub fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let (due, expired) = self.read(|t| {
            let due: Vec<VenueLoanId> = t
                .venue_loans
                .values()
                .filter(|l| l.is_due_to_start(now))
                .map(|l| l.id())
                .collect();
            let expired: Vec<VenueLoanId> = t
                .venue_loans
                .values()
                .filter(|l| l.is_expired(now))
                .map(|l| l.id())
                .collect();
            (due, expired)
        })?;

        let stamp = Stamp::scheduler(now);
        let mut report = TickReport::default();

        for id in due {
            let result = self.start_venue_loan_as(id, stamp);
            if report.record(id, "venue_loan.start", result) {
                report.started += 1;
            }
        }
        for id in expired {
            let result = self.complete_venue_loan_as(id, stamp);
            if report.record(id, "venue_loan.complete", result) {
                report.completed += 1;
            }
        }

        Ok(report)
    }
}

/// Running totals of a scheduler thread.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub started: u64,
    pub completed: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl SchedulerStats {
    fn absorb(&mut self, report: TickReport) {
        self.ticks += 1;
        self.started += report.started as u64;
        self.completed += report.completed as u64;
        self.rejected += report.rejected as u64;
        self.failed += report.failed as u64;
    }
}

/// Handle for the running scheduler (shutdown + stats).
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<()>,
    stats: Arc<Mutex<SchedulerStats>>,
    join: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> SchedulerStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Gracefully stop the scheduler thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Drives [`Engine::run_tick`] from a single timer thread.
#[derive(Debug, Default, Copy, Clone)]
pub struct VenueLoanScheduler;

impl VenueLoanScheduler {
    /// Spawn the scheduler at the engine's configured cadence.
    ///
    /// Returns `Ok(None)` when the scheduler is disabled. A tick runs right
    /// away, then once per interval; a slow tick delays the next one.
    pub fn spawn<S, B, C>(engine: Arc<Engine<S, B, C>>) -> std::io::Result<Option<SchedulerHandle>>
    where
        S: Store + 'static,
        B: EventBus<WorkflowEnvelope> + 'static,
        C: Clock + 'static,
    {
        if !engine.config().scheduler_enabled {
            info!("venue loan scheduler disabled");
            return Ok(None);
        }

        let interval = engine.config().scheduler_interval;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));

        let thread_stats = Arc::clone(&stats);
        let join = thread::Builder::new()
            .name("venue-loan-scheduler".to_string())
            .spawn(move || scheduler_loop(engine, interval, shutdown_rx, thread_stats))?;

        Ok(Some(SchedulerHandle {
            shutdown: shutdown_tx,
            stats,
            join: Some(join),
        }))
    }
}

fn scheduler_loop<S, B, C>(
    engine: Arc<Engine<S, B, C>>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SchedulerStats>>,
) where
    S: Store,
    B: EventBus<WorkflowEnvelope>,
    C: Clock,
{
    info!(interval_ms = interval.as_millis() as u64, "venue loan scheduler started");

    loop {
        let now = engine.clock().now();
        match engine.run_tick(now) {
            Ok(report) => {
                if report.started + report.completed > 0 {
                    info!(
                        started = report.started,
                        completed = report.completed,
                        rejected = report.rejected,
                        failed = report.failed,
                        "venue loan tick"
                    );
                }
                if let Ok(mut s) = stats.lock() {
                    s.absorb(report);
                }
            }
            Err(e) => {
                warn!(error = %e, "venue loan tick failed");
                if let Ok(mut s) = stats.lock() {
                    s.ticks += 1;
                    s.failed_ticks += 1;
                }
            }
        }

        // Shutdown (or a dropped handle) ends the loop; a timeout is the next tick.
        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }

    info!("venue loan scheduler stopped");
}
