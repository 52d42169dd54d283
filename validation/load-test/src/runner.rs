//! Local load runner: turns a workload shape into concurrent driver
//! iterations.
//!
//! Closed-loop shapes run a pool of VU tasks that each call the driver in a
//! loop. Open-loop shapes start iterations on a schedule and hand each one a
//! permit from a bounded VU pool; a scheduled start with no free VU is a
//! dropped iteration.
//!
//! Cancelling a run drops every in-flight iteration. Books created by an
//! abandoned flow are not cleaned up.

use crate::driver::RunDriver;
use crate::metrics::ITERATIONS;
use crate::scenario::{format_duration, Stage, WorkloadShape};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Governor resolution for ramping shapes.
const RAMP_TICK: Duration = Duration::from_millis(100);
/// How often an idle ramping VU re-checks whether it is active.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCompletion {
    /// The shape ran to completion.
    Finished,
    /// The stop signal fired; in-flight iterations were abandoned.
    Cancelled,
    /// The configured run cap elapsed; in-flight iterations were abandoned.
    TimedOut,
}

/// Executes load tests with controlled concurrency.
pub struct LoadRunner {
    driver: Arc<RunDriver>,
    shape: WorkloadShape,
    max_duration: Option<Duration>,
    show_progress: bool,
}

impl LoadRunner {
    /// Create a new load runner.
    pub fn new(driver: Arc<RunDriver>, shape: WorkloadShape) -> Self {
        Self {
            driver,
            shape,
            max_duration: None,
            show_progress: false,
        }
    }

    /// Abandon the run after `max_duration`.
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Show a progress bar on stderr.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Run the shape to completion.
    pub async fn run(&self) -> RunCompletion {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the shape completes or `stop` resolves.
    pub async fn run_until<F>(&self, stop: F) -> RunCompletion
    where
        F: Future<Output = ()>,
    {
        info!(
            executor = self.shape.executor(),
            shape = %self.shape,
            "Starting load"
        );

        let pb = self.progress_bar();
        let ticker = self.spawn_progress(pb.clone());

        let cap = async {
            match self.max_duration {
                Some(d) => sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping `execute` drops its JoinSet, which aborts every iteration.
        let completion = tokio::select! {
            _ = self.execute() => RunCompletion::Finished,
            _ = stop => RunCompletion::Cancelled,
            _ = cap => RunCompletion::TimedOut,
        };

        ticker.abort();
        match completion {
            RunCompletion::Finished => pb.finish_with_message("Complete!"),
            RunCompletion::Cancelled => {
                warn!("Run cancelled; in-flight iterations abandoned");
                pb.abandon_with_message("Cancelled");
            }
            RunCompletion::TimedOut => {
                warn!("Run hit its duration cap; in-flight iterations abandoned");
                pb.abandon_with_message("Timed out");
            }
        }
        completion
    }

    async fn execute(&self) {
        let mut tasks = JoinSet::new();

        match &self.shape {
            WorkloadShape::FixedIterations {
                vus,
                iterations,
                per_vu,
            } => self.fixed_iterations(&mut tasks, *vus, *iterations, *per_vu),
            WorkloadShape::ConstantVus { vus, duration } => {
                self.constant_vus(&mut tasks, *vus, *duration)
            }
            WorkloadShape::RampingVus { start_vus, stages } => {
                self.ramping_vus(&mut tasks, *start_vus, stages).await
            }
            WorkloadShape::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
            } => {
                self.constant_arrival_rate(&mut tasks, *rate, *time_unit, *duration, *pre_allocated_vus)
                    .await
            }
            WorkloadShape::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
            } => {
                self.ramping_arrival_rate(&mut tasks, *start_rate, *time_unit, stages, *pre_allocated_vus)
                    .await
            }
        }

        // Wait for all in-flight iterations to complete
        while tasks.join_next().await.is_some() {}
    }

    fn fixed_iterations(&self, tasks: &mut JoinSet<()>, vus: u32, iterations: u64, per_vu: bool) {
        let remaining = Arc::new(AtomicU64::new(iterations));
        for _ in 0..vus {
            let driver = self.driver.clone();
            let remaining = remaining.clone();
            tasks.spawn(async move {
                if per_vu {
                    for _ in 0..iterations {
                        driver.iterate().await;
                    }
                } else {
                    while claim(&remaining) {
                        driver.iterate().await;
                    }
                }
            });
        }
    }

    fn constant_vus(&self, tasks: &mut JoinSet<()>, vus: u32, duration: Duration) {
        let deadline = Instant::now() + duration;
        for _ in 0..vus {
            let driver = self.driver.clone();
            tasks.spawn(async move {
                while Instant::now() < deadline {
                    driver.iterate().await;
                }
            });
        }
    }

    async fn ramping_vus(&self, tasks: &mut JoinSet<()>, start_vus: u32, stages: &[Stage]) {
        let max_vus = stages.iter().map(|s| s.target).fold(start_vus, u32::max);
        let active = Arc::new(AtomicU32::new(start_vus));
        let done = Arc::new(AtomicBool::new(false));

        for vu in 0..max_vus {
            let driver = self.driver.clone();
            let active = active.clone();
            let done = done.clone();
            tasks.spawn(async move {
                while !done.load(Ordering::Acquire) {
                    if vu < active.load(Ordering::Acquire) {
                        driver.iterate().await;
                    } else {
                        sleep(IDLE_POLL).await;
                    }
                }
            });
        }

        let start = Instant::now();
        let total: Duration = stages.iter().map(|s| s.duration).sum();
        let mut ticker = interval(RAMP_TICK);
        loop {
            ticker.tick().await;
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }
            let target = ramp_value(start_vus as f64, stages, elapsed).round() as u32;
            active.store(target, Ordering::Release);
        }
        done.store(true, Ordering::Release);
    }

    async fn constant_arrival_rate(
        &self,
        tasks: &mut JoinSet<()>,
        rate: u32,
        time_unit: Duration,
        duration: Duration,
        vus: u32,
    ) {
        let pool = Arc::new(Semaphore::new(vus as usize));
        let period = time_unit / rate.max(1);
        let start = Instant::now();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            ticker.tick().await;
            if start.elapsed() >= duration {
                break;
            }
            self.start_iteration(tasks, &pool);
        }
    }

    async fn ramping_arrival_rate(
        &self,
        tasks: &mut JoinSet<()>,
        start_rate: u32,
        time_unit: Duration,
        stages: &[Stage],
        vus: u32,
    ) {
        let pool = Arc::new(Semaphore::new(vus as usize));
        let start = Instant::now();
        let total: Duration = stages.iter().map(|s| s.duration).sum();
        let mut ticker = interval(RAMP_TICK);
        let mut fractional = 0.0;

        loop {
            ticker.tick().await;
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }
            let rate = ramp_value(start_rate as f64, stages, elapsed);
            let (starts, carry) = iterations_for_tick(rate, time_unit, RAMP_TICK, fractional);
            fractional = carry;
            for _ in 0..starts {
                self.start_iteration(tasks, &pool);
            }
        }
    }

    /// Start one scheduled iteration if a VU is free; otherwise drop it.
    fn start_iteration(&self, tasks: &mut JoinSet<()>, pool: &Arc<Semaphore>) {
        match pool.clone().try_acquire_owned() {
            Ok(permit) => {
                let driver = self.driver.clone();
                tasks.spawn(async move {
                    driver.iterate().await;
                    drop(permit);
                });
            }
            Err(_) => self.driver.metrics().record_dropped_iteration(),
        }
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let (len, template) = match (&self.shape, self.shape.planned_duration()) {
            (WorkloadShape::FixedIterations { vus, iterations, per_vu }, _) => {
                let total = if *per_vu { iterations * *vus as u64 } else { *iterations };
                (total, "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} iterations {msg}")
            }
            (_, Some(d)) => (d.as_secs().max(1), "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}"),
            (_, None) => (1, "[{elapsed_precise}] {bar:40.cyan/blue} {msg}"),
        };

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            pb.set_style(style.progress_chars("##-"));
        }
        if let Some(d) = self.shape.planned_duration() {
            pb.set_message(format!("planned {}", format_duration(d)));
        }
        pb
    }

    fn spawn_progress(&self, pb: ProgressBar) -> tokio::task::JoinHandle<()> {
        let metrics = self.driver.metrics().clone();
        let by_iterations = matches!(self.shape, WorkloadShape::FixedIterations { .. });
        tokio::spawn(async move {
            let start = Instant::now();
            loop {
                let pos = if by_iterations {
                    metrics.counter(ITERATIONS).unwrap_or(0)
                } else {
                    start.elapsed().as_secs()
                };
                pb.set_position(pos);
                sleep(Duration::from_millis(250)).await;
            }
        })
    }
}

/// Take one iteration from a shared budget.
fn claim(remaining: &AtomicU64) -> bool {
    remaining
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Value of a staged ramp at `elapsed`, interpolating linearly within each
/// stage. Past the last stage the final target holds.
pub fn ramp_value(start: f64, stages: &[Stage], elapsed: Duration) -> f64 {
    let mut from = start;
    let mut offset = Duration::ZERO;

    for stage in stages {
        let to = stage.target as f64;
        if stage.duration.is_zero() {
            from = to;
            continue;
        }
        let end = offset + stage.duration;
        if elapsed < end {
            let t = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
            return from + (to - from) * t;
        }
        from = to;
        offset = end;
    }
    from
}

/// Iterations to start during one governor tick at `rate` per `time_unit`,
/// carrying the fractional remainder to the next tick.
pub fn iterations_for_tick(rate: f64, time_unit: Duration, tick: Duration, fractional: f64) -> (u64, f64) {
    let per_tick = rate * tick.as_secs_f64() / time_unit.as_secs_f64();
    let total = per_tick + fractional;
    let whole = total.floor().max(0.0);
    (whole as u64, total - whole)
}
