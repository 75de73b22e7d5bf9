use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    timeline::{BeatCycle, TimeSignature},
    timer::{TickFn, TimerHandle, TimerHost},
    Result,
};

/// Seconds between beats at `bpm`: `60 / bpm`.
pub fn tick_period(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(bpm.max(1)))
}

/// Outcome of one triggered click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Click {
    /// Beat index that was played.
    pub beat: u32,
    pub accent: bool,
    /// Cycle position after advancing.
    pub next_beat: u32,
}

/// Decides accent vs regular for the current beat, then advances the cycle.
///
/// `signature` must be the one in effect when the tick fires.
pub fn trigger(cycle: &mut BeatCycle, signature: &TimeSignature) -> Click {
    let beat = cycle.current();
    let accent = cycle.is_accent_beat();
    cycle.advance(signature);
    Click {
        beat,
        accent,
        next_beat: cycle.current(),
    }
}

/// Owner of the single repeating beat timer.
///
/// Holds at most one [`TimerHandle`]; installing a new one always cancels the
/// previous. Every timer is stamped with a generation so a callback that was
/// already dequeued when its timer was replaced can recognise itself as stale.
pub struct PlaybackScheduler {
    timers: Arc<dyn TimerHost>,
    active: Option<TimerHandle>,
    generation: u64,
}

impl PlaybackScheduler {
    pub fn new(timers: Arc<dyn TimerHost>) -> Self {
        Self {
            timers,
            active: None,
            generation: 0,
        }
    }

    /// Cancels any running timer and starts a new one ticking every `period`.
    ///
    /// `make_tick` receives the generation of the new timer. On error no
    /// timer is left running.
    pub fn reschedule(
        &mut self,
        period: Duration,
        make_tick: impl FnOnce(u64) -> TickFn,
    ) -> Result<()> {
        self.cancel();
        self.generation += 1;
        let handle = self
            .timers
            .schedule_repeating(period, make_tick(self.generation))?;
        debug!(?period, generation = self.generation, "beat timer scheduled");
        self.active = Some(handle);
        Ok(())
    }

    /// Stops the running timer, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                handle.cancel();
                // Outstanding callbacks of the old timer become stale.
                self.generation += 1;
                true
            }
            None => false,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active.is_some() && self.generation == generation
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Period of the running timer.
    pub fn period(&self) -> Option<Duration> {
        self.active.as_ref().map(TimerHandle::period)
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("active", &self.active)
            .field("generation", &self.generation)
            .finish()
    }
}
