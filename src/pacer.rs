//! The pacer core: dispatcher loop, efficiency sampler, and the handle
//!
//! Three cooperating activities share atomically-guarded state:
//!
//! - the **dispatcher loop** pulls jobs from the input stream in order and
//!   sleeps `1s / current rate` between launches - the sleep is the only
//!   throttling mechanism, in-flight concurrency is unbounded;
//! - each **execution unit** runs the handler for one job, forwards failures
//!   to the error sink, and bumps the completion counters when done;
//! - the **efficiency sampler** swaps the window counter to zero once per
//!   sampling interval and publishes the pre-swap value as the gauge.
//!
//! Pacing is approximate: the sleep is measured between rate reads, so time
//! spent pulling and launching accumulates as pacing error. That is a
//! tolerated property, not a real-time guarantee.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use eyre::Report;
use futures::{Stream, StreamExt};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PacerConfig;
use crate::error::PacerError;
use crate::handler::JobHandler;
use crate::rate::RateLimits;

/// Counters shared by the dispatcher, execution units, and sampler
#[derive(Debug)]
struct Gauges {
    /// Completions within the current sampling window; swapped to zero by the sampler
    window_completions: AtomicU64,
    /// Completions counted in the last fully elapsed window
    efficiency: AtomicU64,
    /// Execution units launched but not yet finished
    in_flight: AtomicU64,
    /// Woken whenever `in_flight` drops to zero
    idle: Notify,
    /// Cumulative jobs pulled from the input and launched
    total_dispatched: AtomicU64,
    /// Cumulative execution units finished, success or failure
    total_completed: AtomicU64,
    /// Cumulative handler failures
    total_failed: AtomicU64,
}

impl Gauges {
    fn new() -> Self {
        Self {
            window_completions: AtomicU64::new(0),
            efficiency: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            idle: Notify::new(),
            total_dispatched: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }
}

/// Point-in-time snapshot of pacer state
#[derive(Debug, Clone)]
pub struct PacerStats {
    pub current_rate: u32,
    pub min_rate: u32,
    pub max_rate: u32,
    pub efficiency: u64,
    pub in_flight: u64,
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// Handle to a running pacer
///
/// Created with [`Pacer::spawn`], which starts the dispatcher loop and the
/// efficiency sampler as background tasks and returns immediately. All
/// methods are safe to call concurrently with the background loops.
///
/// Dropping the handle without calling [`Pacer::shutdown`] also stops both
/// loops (the shutdown channel closes), but does not wait for them.
#[derive(Debug)]
pub struct Pacer {
    rate: Arc<RateLimits>,
    gauges: Arc<Gauges>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    sampler: JoinHandle<()>,
}

impl Pacer {
    /// Start pacing `input` through `handler` at `config.initial_rate` jobs/second
    ///
    /// Handler failures are forwarded to `error_tx`; the sender's capacity is
    /// the caller's backpressure knob (see [`Pacer::drain`] for the
    /// interaction). Must be called from within a tokio runtime.
    pub fn spawn<S, J, H>(
        config: PacerConfig,
        input: S,
        handler: H,
        error_tx: mpsc::Sender<Report>,
    ) -> Result<Self, PacerError>
    where
        S: Stream<Item = J> + Send + Unpin + 'static,
        J: Send + 'static,
        H: JobHandler<J> + 'static,
    {
        config.validate()?;

        let rate = Arc::new(RateLimits::new(
            config.initial_rate,
            config.min_rate,
            config.effective_max(),
        ));
        let gauges = Arc::new(Gauges::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sampler = tokio::spawn(run_sampler(
            config.sample_interval(),
            Arc::clone(&gauges),
            shutdown_rx.clone(),
        ));
        let dispatcher = tokio::spawn(run_dispatcher(
            input,
            Arc::new(handler),
            error_tx,
            Arc::clone(&rate),
            Arc::clone(&gauges),
            shutdown_rx,
        ));

        info!(
            initial_rate = config.initial_rate,
            min_rate = config.min_rate,
            max_rate = config.effective_max(),
            "pacer started"
        );

        Ok(Self {
            rate,
            gauges,
            shutdown_tx,
            dispatcher,
            sampler,
        })
    }

    /// Raise the target rate by one; fails at the upper bound
    pub fn increase(&self) -> bool {
        self.rate.increase()
    }

    /// Lower the target rate by one; fails at the lower bound
    pub fn decrease(&self) -> bool {
        self.rate.decrease()
    }

    /// Set the target rate; fails unless it lies within the bounds
    ///
    /// `set_rate(0)` is legal whenever the lower bound is 0; the dispatcher
    /// then paces as if the rate were 1/second (see [`Pacer::spawn`] docs on
    /// the saturation policy).
    pub fn set_rate(&self, rate: u32) -> bool {
        self.rate.set_rate(rate)
    }

    /// Raise or keep the upper bound; fails below the current rate
    pub fn set_max(&self, max: u32) -> bool {
        self.rate.set_max(max)
    }

    /// Lower or keep the lower bound; fails above the current rate
    pub fn set_min(&self, min: u32) -> bool {
        self.rate.set_min(min)
    }

    /// Current target rate (never blocks)
    pub fn current_rate(&self) -> u32 {
        self.rate.current()
    }

    /// Current lower bound
    pub fn min_rate(&self) -> u32 {
        self.rate.min()
    }

    /// Current upper bound
    pub fn max_rate(&self) -> u32 {
        self.rate.max()
    }

    /// Completions counted in the last fully elapsed sampling window
    ///
    /// A trailing, coarse gauge: readings lag actual throughput by up to one
    /// window and are not synchronized with the dispatcher's pacing clock.
    pub fn efficiency(&self) -> u64 {
        self.gauges.efficiency.load(Ordering::Acquire)
    }

    /// Execution units launched but not yet finished
    ///
    /// Nothing caps this number; a slow handler at a high rate grows it
    /// without bound.
    pub fn in_flight(&self) -> u64 {
        self.gauges.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot of rate state and counters
    pub fn stats(&self) -> PacerStats {
        let (current_rate, min_rate, max_rate) = self.rate.snapshot();
        PacerStats {
            current_rate,
            min_rate,
            max_rate,
            efficiency: self.gauges.efficiency.load(Ordering::Acquire),
            in_flight: self.gauges.in_flight.load(Ordering::Acquire),
            total_dispatched: self.gauges.total_dispatched.load(Ordering::Relaxed),
            total_completed: self.gauges.total_completed.load(Ordering::Relaxed),
            total_failed: self.gauges.total_failed.load(Ordering::Relaxed),
        }
    }

    /// Wait until every launched execution unit has finished
    ///
    /// Does not account for units launched after the call begins, so it is
    /// only meaningful once the input stream has been exhausted or shut down.
    /// An execution unit blocked on a full error sink counts as unfinished
    /// until the sink accepts its report.
    pub async fn drain(&self) {
        debug!("drain: called");
        loop {
            let idle = self.gauges.idle.notified();
            if self.gauges.in_flight.load(Ordering::Acquire) == 0 {
                debug!("drain: in-flight reached zero");
                return;
            }
            idle.await;
        }
    }

    /// Stop both background loops and wait for them to exit
    ///
    /// Jobs not yet pulled from the input are never dispatched. Execution
    /// units already launched keep running; follow with [`Pacer::drain`]
    /// semantics by calling `drain` before `shutdown` if that matters.
    pub async fn shutdown(self) {
        debug!("shutdown: signalling loops");
        let _ = self.shutdown_tx.send(true);
        let _ = self.dispatcher.await;
        let _ = self.sampler.await;
        info!("pacer stopped");
    }
}

/// Dispatcher loop: pull, launch, sleep, repeat
async fn run_dispatcher<S, J, H>(
    mut input: S,
    handler: Arc<H>,
    error_tx: mpsc::Sender<Report>,
    rate: Arc<RateLimits>,
    gauges: Arc<Gauges>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: Stream<Item = J> + Send + Unpin + 'static,
    J: Send + 'static,
    H: JobHandler<J> + 'static,
{
    debug!("dispatcher: starting");

    loop {
        let job = tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("dispatcher: shutdown signal received");
                break;
            }
            maybe_job = input.next() => match maybe_job {
                Some(job) => job,
                None => {
                    info!("dispatcher: input exhausted");
                    break;
                }
            },
        };

        gauges.in_flight.fetch_add(1, Ordering::AcqRel);
        gauges.total_dispatched.fetch_add(1, Ordering::Relaxed);

        let handler = Arc::clone(&handler);
        let error_tx = error_tx.clone();
        let job_gauges = Arc::clone(&gauges);
        tokio::spawn(run_job(handler, job, error_tx, job_gauges));

        // A target of zero is reachable through set_rate(0) when the lower
        // bound is zero; pace at one per second rather than divide by it.
        let current = rate.current().max(1);
        let pause = Duration::from_secs(1) / current;
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("dispatcher: shutdown during pacing sleep");
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!("dispatcher: stopped");
}

/// One execution unit: run the handler, report failure, release counters
async fn run_job<J, H>(handler: Arc<H>, job: J, error_tx: mpsc::Sender<Report>, gauges: Arc<Gauges>)
where
    J: Send + 'static,
    H: JobHandler<J> + 'static,
{
    if let Err(report) = handler.handle(job).await {
        gauges.total_failed.fetch_add(1, Ordering::Relaxed);
        // Awaited send: a full sink delays this unit's completion accounting
        // until the sink drains. A closed sink drops the report.
        if error_tx.send(report).await.is_err() {
            warn!("execution unit: error sink closed, dropping report");
        }
    }

    gauges.total_completed.fetch_add(1, Ordering::Relaxed);
    gauges.window_completions.fetch_add(1, Ordering::AcqRel);
    if gauges.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
        gauges.idle.notify_waiters();
    }
}

/// Efficiency sampler: publish and reset the window counter every interval
async fn run_sampler(interval: Duration, gauges: Arc<Gauges>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(?interval, "sampler: starting");

    // First tick one full interval after start, not immediately.
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("sampler: shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let completed = gauges.window_completions.swap(0, Ordering::AcqRel);
                gauges.efficiency.store(completed, Ordering::Release);
                debug!(completed, "sampler: window published");
            }
        }
    }

    debug!("sampler: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_fn;
    use eyre::eyre;
    use futures::stream;
    use std::sync::Mutex;

    /// Poll a condition under the paused test clock
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_order_matches_input_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_handler = Arc::clone(&seen);
        let (error_tx, _error_rx) = mpsc::channel(8);

        let pacer = Pacer::spawn(
            PacerConfig::new(10),
            stream::iter(0u64..20),
            handler_fn(move |job: u64| {
                let seen = Arc::clone(&seen_handler);
                async move {
                    seen.lock().unwrap().push(job);
                    Ok(())
                }
            }),
            error_tx,
        )
        .unwrap();

        wait_until(|| pacer.stats().total_dispatched == 20).await;
        pacer.drain().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, (0u64..20).collect::<Vec<_>>());
        pacer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_failure_reaches_the_sink_once() {
        // Capacity below the job count so the sink applies backpressure.
        let (error_tx, mut error_rx) = mpsc::channel(4);

        let pacer = Pacer::spawn(
            PacerConfig::new(50),
            stream::iter(0u64..10),
            handler_fn(|job: u64| async move { Err(eyre!("job {} failed", job)) }),
            error_tx,
        )
        .unwrap();

        let mut reports = Vec::new();
        for _ in 0..10 {
            reports.push(error_rx.recv().await.unwrap());
        }

        pacer.drain().await;
        assert!(error_rx.try_recv().is_err(), "no duplicate reports");
        assert_eq!(pacer.stats().total_failed, 10);
        assert_eq!(pacer.stats().total_completed, 10);
        pacer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_slow_handlers() {
        let (error_tx, _error_rx) = mpsc::channel(8);

        let pacer = Pacer::spawn(
            PacerConfig::new(10),
            stream::iter(0u64..3),
            handler_fn(|_job: u64| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
            error_tx,
        )
        .unwrap();

        wait_until(|| pacer.stats().total_dispatched == 3).await;
        assert_eq!(pacer.in_flight(), 3);

        pacer.drain().await;
        assert_eq!(pacer.in_flight(), 0);
        assert_eq!(pacer.stats().total_completed, 3);
        pacer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_dispatch() {
        let dispatched = Arc::new(AtomicU64::new(0));
        let dispatched_handler = Arc::clone(&dispatched);
        let (error_tx, _error_rx) = mpsc::channel(8);

        let pacer = Pacer::spawn(
            PacerConfig::new(10),
            stream::iter(0u64..),
            handler_fn(move |_job: u64| {
                let dispatched = Arc::clone(&dispatched_handler);
                async move {
                    dispatched.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            }),
            error_tx,
        )
        .unwrap();

        wait_until(|| dispatched.load(Ordering::Relaxed) >= 5).await;
        pacer.shutdown().await;

        let after_shutdown = dispatched.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dispatched.load(Ordering::Relaxed), after_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_saturates_to_one_per_second() {
        let (error_tx, _error_rx) = mpsc::channel(8);

        let pacer = Pacer::spawn(
            PacerConfig::new(10),
            stream::iter(0u64..),
            handler_fn(|_job: u64| async move { Ok(()) }),
            error_tx,
        )
        .unwrap();

        // Legal because the default lower bound is 0.
        assert!(pacer.set_rate(0));
        wait_until(|| pacer.current_rate() == 0).await;

        let before = pacer.stats().total_dispatched;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let dispatched = pacer.stats().total_dispatched - before;

        // Saturation policy: roughly one dispatch per second, not a stall
        // and not a division by zero.
        assert!(dispatched >= 1, "dispatch stalled at rate 0");
        assert!(dispatched <= 5, "dispatched {} in 3s at rate 0", dispatched);
        pacer.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_rejects_zero_initial_rate() {
        let (error_tx, _error_rx) = mpsc::channel(8);
        let result = Pacer::spawn(
            PacerConfig::new(0),
            stream::iter(0u64..1),
            handler_fn(|_job: u64| async move { Ok(()) }),
            error_tx,
        );
        assert!(matches!(result, Err(PacerError::ZeroRate)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_exits_when_input_ends() {
        let (error_tx, _error_rx) = mpsc::channel(8);
        let pacer = Pacer::spawn(
            PacerConfig::new(100),
            stream::iter(0u64..5),
            handler_fn(|_job: u64| async move { Ok(()) }),
            error_tx,
        )
        .unwrap();

        wait_until(|| pacer.stats().total_dispatched == 5).await;
        pacer.drain().await;

        // Exhausted input must not keep the dispatcher alive.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pacer.stats().total_dispatched, 5);
        pacer.shutdown().await;
    }
}
