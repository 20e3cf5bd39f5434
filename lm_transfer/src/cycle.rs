//! Cycle scheduler: one bus tick fanned out to every registered worker.
//!
//! - [`CycleBus`] owns the listener registry. Workers [`subscribe`](CycleBus::subscribe)
//!   on start and are removed when their [`CycleSubscription`] is dropped.
//! - [`CycleClock`] is a timing source pacing ticks at the bus cycle time,
//!   running an optional hook (the bus exchange) before each broadcast.
//! - [`CycleStats`] is the O(1) timing record shared by clock and engines.
//!
//! No ordering between workers is guaranteed within one tick.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles recorded.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: u64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: u64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: u64,
    /// Running sum for average computation.
    pub sum_cycle_ns: u64,
    /// Cycles that exceeded the budget.
    pub overruns: u64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: u64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
        }
    }

    /// Record one cycle. Returns `true` if it overran `budget`.
    #[inline]
    pub fn record(&mut self, duration: Duration, budget: Duration) -> bool {
        let ns = duration.as_nanos() as u64;
        self.cycle_count += 1;
        self.last_cycle_ns = ns;
        self.min_cycle_ns = self.min_cycle_ns.min(ns);
        self.max_cycle_ns = self.max_cycle_ns.max(ns);
        self.sum_cycle_ns = self.sum_cycle_ns.saturating_add(ns);
        let overrun = duration > budget;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> u64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count
        }
    }

    /// Rate limit for repeated warnings: the first 10, then every 1000th.
    #[inline]
    pub const fn should_report(count: u64) -> bool {
        count <= 10 || count % 1000 == 0
    }
}

// ─── Bus / Subscriptions ────────────────────────────────────────────

struct Listener {
    latest: Mutex<u64>,
    signal: Condvar,
}

/// Registry of workers waiting for bus ticks.
#[derive(Default)]
pub struct CycleBus {
    tick: AtomicU64,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Arc<Listener>)>>,
}

impl CycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener. It observes ticks after the current one.
    pub fn subscribe(self: &Arc<Self>) -> CycleSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let current = self.current_tick();
        let listener = Arc::new(Listener {
            latest: Mutex::new(current),
            signal: Condvar::new(),
        });
        self.listeners.lock().push((id, Arc::clone(&listener)));
        debug!("Cycle listener {} registered", id);
        CycleSubscription {
            bus: Arc::clone(self),
            id,
            listener,
            seen: current,
            missed: 0,
        }
    }

    /// Broadcast one tick to every listener. Returns the new tick number.
    pub fn tick(&self) -> u64 {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        for (_, listener) in self.listeners.lock().iter() {
            *listener.latest.lock() = tick;
            listener.signal.notify_all();
        }
        tick
    }

    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// A worker's registration on the [`CycleBus`]; deregisters on drop.
pub struct CycleSubscription {
    bus: Arc<CycleBus>,
    id: u64,
    listener: Arc<Listener>,
    seen: u64,
    missed: u64,
}

impl CycleSubscription {
    /// Block until a tick newer than the last one observed, or `timeout`.
    ///
    /// Returns the tick number, `None` on timeout.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.listener.latest.lock();
        while *latest <= self.seen {
            if self
                .listener
                .signal
                .wait_until(&mut latest, deadline)
                .timed_out()
            {
                break;
            }
        }
        let tick = *latest;
        drop(latest);

        if tick <= self.seen {
            return None;
        }
        self.missed += tick - self.seen - 1;
        self.seen = tick;
        Some(tick)
    }

    /// Forget ticks that arrived while not following the bus.
    pub fn resync(&mut self) {
        self.seen = *self.listener.latest.lock();
    }

    /// Ticks skipped between two `wait_next` calls since subscription.
    #[inline]
    pub fn missed(&self) -> u64 {
        self.missed
    }

    #[inline]
    pub fn last_seen(&self) -> u64 {
        self.seen
    }
}

impl Drop for CycleSubscription {
    fn drop(&mut self) {
        self.bus.listeners.lock().retain(|(id, _)| *id != self.id);
        debug!("Cycle listener {} removed", self.id);
    }
}

// ─── Clock ──────────────────────────────────────────────────────────

/// Work run on the clock thread before each broadcast.
pub type CycleHook = Box<dyn FnMut() + Send>;

/// Thread pacing [`CycleBus`] ticks at a fixed period.
pub struct CycleClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<CycleStats>>,
}

impl CycleClock {
    /// Start the clock thread.
    ///
    /// # Errors
    /// Thread spawn failure.
    pub fn start(
        bus: Arc<CycleBus>,
        period: Duration,
        hook: Option<CycleHook>,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("lm-cycle-clock".to_string())
            .spawn(move || run_clock(&bus, period, hook, &flag))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Flag cleared to stop the clock (e.g. from a signal handler).
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stop the clock and return its timing statistics.
    pub fn stop(&mut self) -> Option<CycleStats> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("Cycle clock thread panicked");
                None
            }
        }
    }
}

impl Drop for CycleClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_clock(
    bus: &CycleBus,
    period: Duration,
    mut hook: Option<CycleHook>,
    running: &AtomicBool,
) -> CycleStats {
    info!(
        "Cycle clock started (cycle_time={}us, rt={})",
        period.as_micros(),
        detect_rt_mode()
    );

    let mut stats = CycleStats::new();
    let mut deadline = Instant::now() + period;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        }

        let cycle_start = Instant::now();
        if let Some(hook) = hook.as_mut() {
            hook();
        }
        bus.tick();

        if stats.record(cycle_start.elapsed(), period) && CycleStats::should_report(stats.overruns)
        {
            warn!(
                "Cycle overrun #{}: {}us (target {}us)",
                stats.overruns,
                stats.last_cycle_ns / 1000,
                period.as_micros()
            );
        }

        deadline += period;
        // Fell more than one period behind: restart pacing from now.
        let now = Instant::now();
        if now > deadline + period {
            deadline = now + period;
        }
    }

    info!(
        "Cycle clock stopped after {} cycles (overruns: {}, avg {}us)",
        stats.cycle_count,
        stats.overruns,
        stats.avg_cycle_ns() / 1000
    );
    stats
}

/// Detect if running under a real-time scheduling policy.
pub fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        // SAFETY: sched_getscheduler(0) only queries the calling thread.
        let policy = unsafe { sched_getscheduler(0) };
        policy == SCHED_FIFO || policy == SCHED_RR
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
