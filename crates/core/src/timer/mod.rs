//! Cancellable periodic tasks.
//!
//! A [`TimerHost`] turns a period and a callback into a [`TimerHandle`]. The
//! handle is the only way to stop the task; dropping it cancels too.
//! Cancelling only raises a flag, so it is safe to cancel (and schedule a
//! replacement) from inside the callback itself.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, trace};

use crate::{MetronomeError, Result};

/// Callback invoked on every tick.
pub type TickFn = Arc<dyn Fn() + Send + Sync>;

/// Something that can run a callback repeatedly at a fixed period.
pub trait TimerHost: Send + Sync {
    /// Starts invoking `tick` every `period`, first after one full period.
    fn schedule_repeating(&self, period: Duration, tick: TickFn) -> Result<TimerHandle>;
}

#[derive(Debug, Default)]
struct CancelToken {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for up to `timeout`; returns whether the token was cancelled.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Owner of one running periodic task.
pub struct TimerHandle {
    token: Arc<CancelToken>,
    period: Duration,
}

impl TimerHandle {
    fn new(period: Duration) -> (Self, Arc<CancelToken>) {
        let token = Arc::new(CancelToken::default());
        (
            Self {
                token: Arc::clone(&token),
                period,
            },
            token,
        )
    }

    /// Stops the task. Idempotent. A tick already executing finishes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("period", &self.period)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn check_period(period: Duration) -> Result<()> {
    if period.is_zero() {
        Err(MetronomeError::invalid("timer period must be non-zero"))
    } else {
        Ok(())
    }
}

/// Real-time host running each task on its own background thread.
///
/// Deadlines are absolute (`start + n * period`) so per-tick latency does
/// not accumulate into drift. If the thread falls more than a period behind,
/// the missed ticks are skipped rather than fired in a burst.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl TimerHost for ThreadTimer {
    fn schedule_repeating(&self, period: Duration, tick: TickFn) -> Result<TimerHandle> {
        check_period(period)?;
        let (handle, token) = TimerHandle::new(period);

        thread::Builder::new()
            .name("metronome-timer".to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    if token.wait(wait) {
                        break;
                    }
                    if panic::catch_unwind(AssertUnwindSafe(|| tick())).is_err() {
                        error!(?period, "timer callback panicked, still ticking");
                    }

                    deadline += period;
                    let now = Instant::now();
                    if deadline < now {
                        let behind = now - deadline;
                        trace!(?behind, "timer fell behind, skipping ticks");
                        deadline = now + period;
                    }
                }
                debug!(?period, "timer thread finished");
            })?;

        Ok(handle)
    }
}

/// Virtual-time host driven explicitly by [`ManualTimer::advance`].
///
/// Ticks fire in deadline order on the thread calling `advance`, which makes
/// scheduling deterministic for tests and offline simulation.
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    entries: Vec<ManualEntry>,
}

struct ManualEntry {
    seq: u64,
    period: Duration,
    due: Duration,
    token: Arc<CancelToken>,
    tick: TickFn,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of scheduled tasks that have not been cancelled.
    pub fn active_timers(&self) -> usize {
        let mut state = self.lock();
        state.entries.retain(|entry| !entry.token.is_cancelled());
        state.entries.len()
    }

    /// Moves virtual time forward by `by`, firing every tick that falls due.
    /// Callbacks run without the internal lock held, so they may schedule or
    /// cancel tasks.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now + by;
        loop {
            let tick = {
                let mut state = self.lock();
                state.entries.retain(|entry| !entry.token.is_cancelled());
                let next = state
                    .entries
                    .iter_mut()
                    .filter(|entry| entry.due <= target)
                    .min_by_key(|entry| (entry.due, entry.seq));
                match next {
                    Some(entry) => {
                        let due = entry.due;
                        entry.due += entry.period;
                        let tick = Arc::clone(&entry.tick);
                        state.now = due;
                        tick
                    }
                    None => {
                        state.now = target;
                        break;
                    }
                }
            };
            tick();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimerHost for ManualTimer {
    fn schedule_repeating(&self, period: Duration, tick: TickFn) -> Result<TimerHandle> {
        check_period(period)?;
        let (handle, token) = TimerHandle::new(period);

        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + period;
        state.entries.push(ManualEntry {
            seq,
            period,
            due,
            token,
            tick,
        });
        Ok(handle)
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualTimer")
            .field("now", &state.now)
            .field("entries", &state.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, TickFn) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let tick: TickFn = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, tick)
    }

    #[test]
    fn manual_fires_once_per_elapsed_period() {
        let timer = ManualTimer::new();
        let (count, tick) = counter();
        let _handle = timer
            .schedule_repeating(Duration::from_millis(500), tick)
            .unwrap();

        timer.advance(Duration::from_millis(499));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        timer.advance(Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        timer.advance(Duration::from_millis(1_600));
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(timer.now(), Duration::from_millis(2_100));
    }

    #[test]
    fn manual_stops_after_cancel_and_drop() {
        let timer = ManualTimer::new();
        let (count, tick) = counter();
        let handle = timer.schedule_repeating(Duration::from_secs(1), tick).unwrap();

        timer.advance(Duration::from_secs(1));
        handle.cancel();
        assert!(handle.is_cancelled());
        timer.advance(Duration::from_secs(5));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.active_timers(), 0);

        let (count, tick) = counter();
        drop(timer.schedule_repeating(Duration::from_secs(1), tick).unwrap());
        timer.advance(Duration::from_secs(3));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_callback_can_replace_itself() {
        let timer = ManualTimer::new();
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let fired = Arc::new(AtomicUsize::new(0));

        let (late_count, late_tick) = counter();
        let tick: TickFn = {
            let timer = timer.clone();
            let slot = Arc::clone(&slot);
            let fired = Arc::clone(&fired);
            Arc::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
                let replacement = timer
                    .schedule_repeating(Duration::from_secs(2), Arc::clone(&late_tick))
                    .unwrap();
                // Replacing the handle cancels this very task.
                *slot.lock().unwrap() = Some(replacement);
            })
        };
        *slot.lock().unwrap() = Some(timer.schedule_repeating(Duration::from_secs(1), tick).unwrap());

        timer.advance(Duration::from_secs(5));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 2);
        assert_eq!(timer.active_timers(), 1);
    }

    #[test]
    fn zero_period_is_rejected() {
        let (_, tick) = counter();
        assert!(ManualTimer::new()
            .schedule_repeating(Duration::ZERO, Arc::clone(&tick))
            .is_err());
        assert!(ThreadTimer.schedule_repeating(Duration::ZERO, tick).is_err());
    }

    #[test]
    fn thread_timer_ticks_until_cancelled() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let tick: TickFn = Arc::new(move || {
            let _ = tx.lock().unwrap().send(());
        });

        let handle = ThreadTimer
            .schedule_repeating(Duration::from_millis(10), tick)
            .unwrap();
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        handle.cancel();

        // Let an in-flight tick land, drop the backlog, then expect silence.
        thread::sleep(Duration::from_millis(50));
        rx.try_iter().for_each(drop);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn thread_timer_survives_a_panicking_tick() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let calls = AtomicUsize::new(0);
        let tick: TickFn = Arc::new(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
            let _ = tx.lock().unwrap().send(());
        });

        let handle = ThreadTimer
            .schedule_repeating(Duration::from_millis(10), tick)
            .unwrap();
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        handle.cancel();
    }
}
