//! Fixed-interval job runner.
//!
//! The job list is handed to [`Scheduler::new`] at startup. Each job gets its
//! own task and timer. A job never overlaps itself (missed ticks are skipped),
//! while different jobs run independently of each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::auto_trader::AutoTrader;
use crate::simulator::PriceSimulator;

/// Job intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between price ticks
    pub price_tick_secs: u64,

    /// Seconds between auto-trading cycles
    pub auto_trade_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            price_tick_secs: 5,
            auto_trade_secs: 30,
        }
    }
}

/// Work a job performs on every tick.
pub enum JobTask {
    PriceTick(PriceSimulator),
    AutoTrade(Arc<AutoTrader>),
}

/// A named recurring job.
pub struct Job {
    pub name: String,
    pub interval: Duration,
    pub task: JobTask,
}

impl Job {
    pub fn price_tick(simulator: PriceSimulator, interval: Duration) -> Self {
        Self {
            name: "price_tick".to_string(),
            interval,
            task: JobTask::PriceTick(simulator),
        }
    }

    pub fn auto_trade(trader: Arc<AutoTrader>, interval: Duration) -> Self {
        Self {
            name: "auto_trade".to_string(),
            interval,
            task: JobTask::AutoTrade(trader),
        }
    }

    /// Run the job once to completion.
    async fn run_once(&mut self) -> Result<()> {
        match &mut self.task {
            JobTask::PriceTick(simulator) => {
                let report = simulator.tick_all().await?;
                debug!(ticked = report.ticked.len(), failed = report.failed.len(), "Price tick");
            }
            JobTask::AutoTrade(trader) => {
                trader.run_cycle().await?;
            }
        }
        Ok(())
    }
}

/// Stops a running scheduler. Cheap to clone.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runs a fixed list of jobs until shut down.
pub struct Scheduler {
    jobs: Vec<Job>,
    shutdown: ShutdownHandle,
}

impl Scheduler {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs,
            shutdown: ShutdownHandle::default(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run every job until the shutdown handle is triggered. Jobs finish
    /// their current run before exiting.
    pub async fn run(self) -> Result<()> {
        info!(jobs = self.jobs.len(), "Starting scheduler");

        let handles: Vec<_> = self
            .jobs
            .into_iter()
            .map(|job| tokio::spawn(run_job(job, self.shutdown.clone())))
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Job task panicked");
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

async fn run_job(mut job: Job, shutdown: ShutdownHandle) {
    info!(job = %job.name, interval_ms = job.interval.as_millis() as u64, "Job started");

    let mut ticker = interval(job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !shutdown.is_triggered() {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.notify.notified() => break,
        }

        if shutdown.is_triggered() {
            break;
        }

        if let Err(e) = job.run_once().await {
            error!(job = %job.name, error = %e, "Job run failed");
        }
    }

    info!(job = %job.name, "Job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::simulator::SimulatorConfig;
    use crate::trading::{ExecutionEngine, SignalEngine};

    #[tokio::test]
    async fn test_jobs_run_until_shutdown() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let simulator = PriceSimulator::with_seed(db.clone(), SimulatorConfig::default(), 1);
        let instruments = simulator.bootstrap_instruments().await.unwrap();

        let trader = Arc::new(AutoTrader::new(
            db.clone(),
            Arc::new(SignalEngine::rule_based_only()),
            Arc::new(ExecutionEngine::new(db.clone())),
            100,
        ));

        let scheduler = Scheduler::new(vec![
            Job::price_tick(simulator, Duration::from_millis(20)),
            Job::auto_trade(trader, Duration::from_millis(50)),
        ]);
        let shutdown = scheduler.shutdown_handle();
        let running = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("scheduler did not stop")
            .unwrap()
            .unwrap();

        let ticks = db.count_price_points(instruments[0].id).await.unwrap();
        assert!(ticks >= 2, "expected several ticks, got {ticks}");
    }

    #[tokio::test]
    async fn test_empty_job_list_stops_immediately() {
        let scheduler = Scheduler::new(Vec::new());
        tokio_test::assert_ok!(scheduler.run().await);
    }
}
