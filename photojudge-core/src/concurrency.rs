/// Slot-based concurrency controller with latency and memory feedback.
///
/// A counting semaphore whose capacity can move at runtime. Callers acquire a
/// `Slot`, do one unit of work, report how long it took and release the slot.
/// Waiters are served strictly FIFO; a freed slot is handed straight to the
/// next waiter rather than going back to a pool.
///
/// A `Slot` gives its capacity back when dropped, so a caller cancelled while
/// waiting or while holding a slot never leaks one. Grants are sent to waiters
/// outside the state lock for the same reason: a grant whose receiver is gone
/// is dropped there and released normally.
///
/// When auto-scaling is on, every latency report re-evaluates the limit:
/// memory pressure collapses it to one slot, a slowdown against the baseline
/// drops one slot, and latencies close to baseline add one back.
use crate::constants::{
    DEFAULT_MAX_PARALLEL, DEFAULT_MEMORY_THRESHOLD_MB, DEFAULT_PARALLEL, LATENCY_WINDOW, SCALE_DOWN_RATIO,
    SCALE_UP_RATIO,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Reports the current process's memory use.
pub trait MemoryProbe: Send + Sync {
    fn resident_mb(&self) -> f64;
}

/// Resident set size of this process, from the `VmRSS` line of
/// `/proc/self/status` (reported in kB whatever the page size).
/// Reports 0 on platforms without procfs, which disables the memory guard.
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn resident_mb(&self) -> f64 {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                return parse_vm_rss_kb(&status).map(|kb| kb as f64 / 1024.0).unwrap_or(0.0);
            }
        }
        0.0
    }
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Slots available at start.
    pub initial_slots: usize,
    /// Ceiling for auto-scaling.
    pub max_slots: usize,
    pub auto_scale: bool,
    pub memory_threshold_mb: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            initial_slots: DEFAULT_PARALLEL,
            max_slots: DEFAULT_MAX_PARALLEL,
            auto_scale: false,
            memory_threshold_mb: DEFAULT_MEMORY_THRESHOLD_MB,
        }
    }
}

/// Permission to run one unit of work.
///
/// Release it with `ConcurrencyController::release_slot` or by dropping it;
/// whichever comes first frees the capacity and the other is a no-op.
pub struct Slot {
    id: u64,
    shared: Arc<Mutex<State>>,
    released: AtomicBool,
}

impl Slot {
    fn new(id: u64, shared: Arc<Mutex<State>>) -> Self {
        Slot { id, shared, released: AtomicBool::new(false) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true only for the first release of this slot.
    fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.mark_released() {
            trace!(slot = self.id, "Slot dropped without explicit release");
            release(&self.shared, self.id);
        }
    }
}

/// Point-in-time view of the controller, for logs and progress output.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub active: usize,
    pub max: usize,
    pub waiting: usize,
    pub memory_mb: f64,
    pub avg_latency_ms: f64,
    pub baseline_latency_ms: Option<f64>,
    pub photos_processed: u64,
    pub photos_per_sec: f64,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Slot>,
}

struct State {
    active: usize,
    max: usize,
    waiters: VecDeque<Waiter>,
    baseline_samples: Vec<f64>,
    baseline: Option<f64>,
    recent: VecDeque<f64>,
    latency_total_ms: f64,
    completed: u64,
}

pub struct ConcurrencyController {
    shared: Arc<Mutex<State>>,
    config: ControllerConfig,
    memory: Box<dyn MemoryProbe>,
    next_id: AtomicU64,
    started: Instant,
}

fn lock(shared: &Mutex<State>) -> MutexGuard<'_, State> {
    // Poisoning is ignored: the state is plain counters.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConcurrencyController {
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_memory_probe(config, Box::new(ProcessMemory))
    }

    pub fn with_memory_probe(mut config: ControllerConfig, memory: Box<dyn MemoryProbe>) -> Self {
        config.max_slots = config.max_slots.max(1);
        config.initial_slots = config.initial_slots.clamp(1, config.max_slots);
        ConcurrencyController {
            shared: Arc::new(Mutex::new(State {
                active: 0,
                max: config.initial_slots,
                waiters: VecDeque::new(),
                baseline_samples: Vec::with_capacity(LATENCY_WINDOW),
                baseline: None,
                recent: VecDeque::with_capacity(LATENCY_WINDOW + 1),
                latency_total_ms: 0.0,
                completed: 0,
            })),
            config,
            memory,
            next_id: AtomicU64::new(1),
            started: Instant::now(),
        }
    }

    /// Wait for a slot. Granted immediately while below the limit, otherwise
    /// queued behind earlier callers. Dropping the future at any point gives
    /// back whatever it was granted.
    pub async fn acquire_slot(&self) -> Slot {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let rx = {
                let mut state = lock(&self.shared);
                if state.active < state.max && state.waiters.is_empty() {
                    state.active += 1;
                    trace!(slot = id, active = state.active, max = state.max, "Slot granted");
                    return Slot::new(id, self.shared.clone());
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter { id, tx });
                trace!(slot = id, waiting = state.waiters.len(), "Slot request queued");
                rx
            };

            // Every queued sender is eventually used; requeue if one was not.
            if let Ok(slot) = rx.await {
                return slot;
            }
        }
    }

    /// Give a slot back. Slots already released, or from another
    /// controller, are ignored.
    pub fn release_slot(&self, slot: &Slot) {
        if !Arc::ptr_eq(&slot.shared, &self.shared) {
            warn!(slot = slot.id, "Ignoring release of a slot from another controller");
            return;
        }
        if !slot.mark_released() {
            debug!(slot = slot.id, "Ignoring double release");
            return;
        }
        release(&self.shared, slot.id);
    }

    /// Feed one completed operation's latency into the scaling loop.
    pub fn report_latency(&self, slot: &Slot, latency_ms: f64) {
        let memory_mb = self.config.auto_scale.then(|| self.memory.resident_mb());
        let grants = {
            let mut state = lock(&self.shared);
            state.completed += 1;
            state.latency_total_ms += latency_ms;

            if state.baseline.is_none() {
                state.baseline_samples.push(latency_ms);
                if state.baseline_samples.len() == LATENCY_WINDOW {
                    let baseline = state.baseline_samples.iter().sum::<f64>() / LATENCY_WINDOW as f64;
                    state.baseline = Some(baseline);
                    info!(baseline_ms = baseline, "Latency baseline established");
                }
            }

            state.recent.push_back(latency_ms);
            while state.recent.len() > LATENCY_WINDOW {
                state.recent.pop_front();
            }
            trace!(slot = slot.id, latency_ms, "Latency reported");

            match memory_mb {
                Some(memory_mb) => self.adjust(&mut state, memory_mb),
                None => Vec::new(),
            }
        };
        deliver(&self.shared, grants);
    }

    /// Re-evaluate the limit. Returns waiters granted by a scale-up.
    fn adjust(&self, state: &mut State, memory_mb: f64) -> Vec<Waiter> {
        if memory_mb > self.config.memory_threshold_mb {
            if state.max != 1 {
                warn!(
                    memory_mb,
                    threshold_mb = self.config.memory_threshold_mb,
                    previous_max = state.max,
                    "Memory pressure, dropping to a single slot"
                );
                state.max = 1;
            }
            return Vec::new();
        }

        let Some(baseline) = state.baseline else { return Vec::new() };
        if state.recent.len() < LATENCY_WINDOW {
            return Vec::new();
        }
        let recent_avg = state.recent.iter().sum::<f64>() / state.recent.len() as f64;

        if recent_avg > SCALE_DOWN_RATIO * baseline {
            if state.max > 1 {
                state.max -= 1;
                info!(recent_avg_ms = recent_avg, baseline_ms = baseline, max = state.max, "Latency up, scaling down");
            }
        } else if recent_avg < SCALE_UP_RATIO * baseline && state.max < self.config.max_slots {
            state.max += 1;
            info!(recent_avg_ms = recent_avg, baseline_ms = baseline, max = state.max, "Latency steady, scaling up");
            return take_grants(state);
        }
        Vec::new()
    }

    pub fn max_slots(&self) -> usize {
        lock(&self.shared).max
    }

    pub fn stats(&self) -> ControllerStats {
        let memory_mb = self.memory.resident_mb();
        let state = lock(&self.shared);
        let elapsed = self.started.elapsed().as_secs_f64();
        ControllerStats {
            active: state.active,
            max: state.max,
            waiting: state.waiters.len(),
            memory_mb,
            avg_latency_ms: if state.completed > 0 {
                state.latency_total_ms / state.completed as f64
            } else {
                0.0
            },
            baseline_latency_ms: state.baseline,
            photos_processed: state.completed,
            photos_per_sec: if elapsed > 0.0 { state.completed as f64 / elapsed } else { 0.0 },
        }
    }
}

/// Free one unit of capacity and pass it on to queued callers.
fn release(shared: &Arc<Mutex<State>>, id: u64) {
    let grants = {
        let mut state = lock(shared);
        state.active = state.active.saturating_sub(1);
        trace!(slot = id, active = state.active, "Slot released");
        take_grants(&mut state)
    };
    deliver(shared, grants);
}

/// Reserve free capacity for queued callers, oldest first.
fn take_grants(state: &mut State) -> Vec<Waiter> {
    let mut grants = Vec::new();
    while state.active < state.max {
        let Some(waiter) = state.waiters.pop_front() else { break };
        state.active += 1;
        grants.push(waiter);
    }
    grants
}

/// Send reserved slots. Must run without the state lock held: a slot whose
/// waiter went away comes straight back and is released on drop.
fn deliver(shared: &Arc<Mutex<State>>, grants: Vec<Waiter>) {
    for waiter in grants {
        match waiter.tx.send(Slot::new(waiter.id, shared.clone())) {
            Ok(()) => trace!(slot = waiter.id, "Slot handed to waiter"),
            Err(slot) => {
                trace!(slot = slot.id, "Waiter went away before its grant");
                drop(slot);
            }
        }
    }
}
