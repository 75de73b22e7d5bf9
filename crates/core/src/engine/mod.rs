//! The metronome engine façade.
//!
//! [`MetronomeEngine`] owns the published state (tempo, playing flag, time
//! signature, beat position) and the command surface. Ticks arrive from the
//! configured [`TimerHost`]; every state change is pushed to subscribers as an
//! [`EngineEvent`].
//!
//! Listeners and audio output are always invoked with no engine lock held, so
//! a listener may issue commands, including from inside a tick. Events raised
//! by such nested commands are queued behind the event being delivered, so
//! every listener observes changes in the order they happened.

use std::{
    collections::VecDeque,
    fmt,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::{
    assets::{AssetCache, CacheLocation, SystemCacheLocation},
    audio::{AudioOutput, ClickSounds, SilentOutput},
    config::EngineConfig,
    events::{EngineEvent, Listener, SubscriptionId, Subscribers},
    scheduler::{self, tick_period, Click, PlaybackScheduler},
    synth::ClickKind,
    timeline::{self, BeatCycle, TimeSignature},
    timer::{ThreadTimer, TimerHost},
    Result,
};

/// Amount [`MetronomeEngine::step_up`] and [`MetronomeEngine::step_down`]
/// move the tempo by.
pub const BPM_STEP: i32 = 1;

/// Serializable view of everything the engine publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub bpm: u32,
    pub playing: bool,
    pub time_signature: TimeSignature,
    pub current_beat: u32,
    pub min_bpm: u32,
    pub max_bpm: u32,
}

/// Assembles a [`MetronomeEngine`]. Defaults: real-time [`ThreadTimer`],
/// [`SilentOutput`], the platform cache directory and default configuration.
pub struct EngineBuilder {
    config: EngineConfig,
    timers: Arc<dyn TimerHost>,
    output: Box<dyn AudioOutput>,
    location: Box<dyn CacheLocation>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            timers: Arc::new(ThreadTimer),
            output: Box::new(SilentOutput),
            location: Box::new(SystemCacheLocation),
        }
    }
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timers(mut self, timers: impl TimerHost + 'static) -> Self {
        self.timers = Arc::new(timers);
        self
    }

    pub fn output(mut self, output: impl AudioOutput + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn cache_location(mut self, location: impl CacheLocation + 'static) -> Self {
        self.location = Box::new(location);
        self
    }

    /// Validates the configuration, activates the audio output and resolves
    /// both click sounds. Audio and cache failures are logged and leave the
    /// engine running silently; only an invalid configuration is an error.
    pub fn build(self) -> Result<MetronomeEngine> {
        let Self {
            config,
            timers,
            output,
            location,
        } = self;
        config.validate()?;

        let audio_ready = match output.activate() {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "audio output unavailable, metronome will tick silently");
                false
            }
        };

        let cache = AssetCache::at_location(location.as_ref(), &config.cache.subdirectory)?;
        let sounds = ClickSounds::load(&cache, &config);
        info!(cache = %cache.root().display(), audio_ready, "metronome engine ready");

        let state = EngineState {
            bpm: config.tempo.default_bpm,
            playing: false,
            signature: TimeSignature::default(),
            cycle: BeatCycle::new(),
            scheduler: PlaybackScheduler::new(timers),
        };

        Ok(MetronomeEngine {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                subscribers: Mutex::new(Subscribers::new()),
                dispatch: Mutex::new(Dispatch::default()),
                sounds,
                cache,
                output,
                audio_ready,
            }),
        })
    }
}

/// Cloneable handle to a running metronome. All clones drive the same
/// engine; the beat timer is cancelled once the last clone is dropped.
///
/// A listener that captures a clone keeps the engine alive until it is
/// unsubscribed.
#[derive(Clone)]
pub struct MetronomeEngine {
    shared: Arc<Shared>,
}

struct Shared {
    config: EngineConfig,
    state: Mutex<EngineState>,
    subscribers: Mutex<Subscribers>,
    dispatch: Mutex<Dispatch>,
    sounds: ClickSounds,
    cache: AssetCache,
    output: Box<dyn AudioOutput>,
    audio_ready: bool,
}

/// Events waiting for delivery, plus whether some thread is delivering.
#[derive(Default)]
struct Dispatch {
    pending: VecDeque<EngineEvent>,
    draining: bool,
}

struct EngineState {
    bpm: u32,
    playing: bool,
    signature: TimeSignature,
    cycle: BeatCycle,
    scheduler: PlaybackScheduler,
}

impl MetronomeEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with every default: real-time timer, silent output, platform
    /// cache directory.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    // --- queries ---

    pub fn bpm(&self) -> u32 {
        self.shared.lock_state().bpm
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock_state().playing
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.shared.lock_state().signature.clone()
    }

    /// Next beat to be played, in `0..time_signature().beats()`.
    pub fn current_beat(&self) -> u32 {
        self.shared.lock_state().cycle.current()
    }

    pub fn min_bpm(&self) -> u32 {
        self.shared.config.tempo.min_bpm
    }

    pub fn max_bpm(&self) -> u32 {
        self.shared.config.tempo.max_bpm
    }

    /// Interval between beats at the current tempo.
    pub fn tick_period(&self) -> Duration {
        tick_period(self.bpm())
    }

    /// Period of the running beat timer, `None` while stopped.
    pub fn timer_period(&self) -> Option<Duration> {
        self.shared.lock_state().scheduler.period()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.shared.lock_state();
        EngineSnapshot {
            bpm: state.bpm,
            playing: state.playing,
            time_signature: state.signature.clone(),
            current_beat: state.cycle.current(),
            min_bpm: self.min_bpm(),
            max_bpm: self.max_bpm(),
        }
    }

    /// Predefined signatures in presentation order.
    pub fn time_signatures(&self) -> &'static [TimeSignature] {
        timeline::catalog()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // --- transport ---

    /// Starts playing: the downbeat clicks immediately, then one click per
    /// tick period. No-op while already playing.
    pub fn start(&self) {
        let click = {
            let mut guard = self.shared.lock_state();
            let state = &mut *guard;
            if state.playing {
                return;
            }
            state.cycle.reset();
            state.playing = true;
            if let Err(err) = schedule_ticks(&self.shared, state) {
                state.playing = false;
                error!(%err, "could not start the beat timer");
                return;
            }
            info!(bpm = state.bpm, signature = %state.signature, "metronome started");
            scheduler::trigger(&mut state.cycle, &state.signature)
        };

        self.shared.emit(vec![EngineEvent::PlayingChanged { playing: true }]);
        self.shared.deliver(click);
    }

    /// Stops playing and rewinds to the downbeat. Idempotent.
    pub fn stop(&self) {
        let events = {
            let mut state = self.shared.lock_state();
            if !state.playing {
                return;
            }
            halt(&mut state)
        };
        info!("metronome stopped");
        self.shared.emit(events);
    }

    pub fn toggle(&self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.start();
        }
    }

    // --- tempo ---

    /// Stores `bpm` clamped into `[min_bpm, max_bpm]`. While playing the beat
    /// timer is replaced with one at the new period; the beat position is
    /// kept.
    ///
    /// When the clamped value equals the current tempo nothing happens: no
    /// event is sent and the running timer keeps its phase.
    pub fn set_bpm(&self, bpm: i32) {
        self.update_bpm(|_| i64::from(bpm));
    }

    pub fn increase_bpm(&self, amount: i32) {
        self.update_bpm(|current| current + i64::from(amount));
    }

    pub fn decrease_bpm(&self, amount: i32) {
        self.update_bpm(|current| current - i64::from(amount));
    }

    /// `increase_bpm(1)`.
    pub fn step_up(&self) {
        self.increase_bpm(BPM_STEP);
    }

    /// `decrease_bpm(1)`.
    pub fn step_down(&self) {
        self.decrease_bpm(BPM_STEP);
    }

    fn update_bpm(&self, target: impl FnOnce(i64) -> i64) {
        let mut events = Vec::new();
        {
            let mut guard = self.shared.lock_state();
            let state = &mut *guard;
            let bpm = self.shared.config.tempo.clamp(target(i64::from(state.bpm)));
            if bpm == state.bpm {
                return;
            }
            state.bpm = bpm;
            events.push(EngineEvent::BpmChanged { bpm });
            debug!(bpm, "tempo changed");

            if state.playing {
                if let Err(err) = schedule_ticks(&self.shared, state) {
                    error!(%err, "could not reschedule the beat timer, stopping");
                    events.extend(halt(state));
                }
            }
        }
        self.shared.emit(events);
    }

    // --- time signature ---

    /// Switches to `signature` and rewinds to the downbeat. While playing,
    /// the beat timer restarts so the next tick is the new downbeat. No-op
    /// when `signature` equals the current one.
    pub fn set_time_signature(&self, signature: TimeSignature) {
        let mut events = Vec::new();
        {
            let mut guard = self.shared.lock_state();
            let state = &mut *guard;
            if state.signature == signature {
                return;
            }
            state.signature = signature.clone();
            events.push(EngineEvent::TimeSignatureChanged { signature });
            if state.cycle.current() != 0 {
                state.cycle.reset();
                events.push(EngineEvent::BeatChanged { beat: 0 });
            }
            debug!(signature = %state.signature, "time signature changed");

            if state.playing {
                if let Err(err) = schedule_ticks(&self.shared, state) {
                    error!(%err, "could not reschedule the beat timer, stopping");
                    events.extend(halt(state));
                }
            }
        }
        self.shared.emit(events);
    }

    // --- notifications ---

    pub fn subscribe(
        &self,
        listener: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let listener: Listener = Arc::new(listener);
        self.shared.lock_subscribers().subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.lock_subscribers().unsubscribe(id)
    }

    // --- sound cache ---

    /// Deletes the cached sound files. Clips already loaded keep playing;
    /// the files are regenerated by [`MetronomeEngine::reload_sounds`] or the
    /// next engine built on this cache.
    pub fn clear_audio_cache(&self) -> Result<()> {
        self.shared.cache.clear().map_err(|err| {
            warn!(%err, "could not clear the audio cache");
            err
        })
    }

    /// Bytes used by the cached sound files.
    pub fn cache_size(&self) -> u64 {
        self.shared.cache.size()
    }

    pub fn cache_dir(&self) -> &Path {
        self.shared.cache.root()
    }

    /// Re-resolves both click sounds, regenerating any missing file.
    pub fn reload_sounds(&self) {
        self.shared.sounds.reload(&self.shared.cache, &self.shared.config);
    }
}

impl fmt::Debug for MetronomeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetronomeEngine")
            .field("state", &self.snapshot())
            .field("cache", &self.shared.cache.root())
            .field("audio_ready", &self.shared.audio_ready)
            .finish()
    }
}

impl Shared {
    // Nothing panics while holding these locks, so a poisoned guard still
    // protects consistent state.
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_tick(&self, generation: u64) {
        let click = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if !state.playing || !state.scheduler.is_current(generation) {
                trace!(generation, "stale tick ignored");
                return;
            }
            scheduler::trigger(&mut state.cycle, &state.signature)
        };
        self.deliver(click);
    }

    /// Plays the clip for `click` and notifies listeners. A missing clip or a
    /// failed playback is logged; the beat cycle has already advanced.
    fn deliver(&self, click: Click) {
        trace!(beat = click.beat, accent = click.accent, "click");
        if self.audio_ready {
            let kind = ClickKind::for_accent(click.accent);
            match self.sounds.get(kind) {
                Some(clip) => {
                    if let Err(err) = self.output.play(&clip) {
                        warn!(%err, beat = click.beat, "click playback failed");
                    }
                }
                None => debug!(?kind, "no clip loaded, click skipped"),
            }
        }

        let mut events = vec![EngineEvent::Click {
            beat: click.beat,
            accent: click.accent,
        }];
        if click.next_beat != click.beat {
            events.push(EngineEvent::BeatChanged {
                beat: click.next_beat,
            });
        }
        self.emit(events);
    }

    fn emit(&self, events: Vec<EngineEvent>) {
        {
            let mut dispatch = self.lock_dispatch();
            dispatch.pending.extend(events);
            if dispatch.draining {
                return;
            }
            dispatch.draining = true;
        }
        let _unwinding = DrainGuard(self);

        loop {
            let event = {
                let mut dispatch = self.lock_dispatch();
                match dispatch.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        dispatch.draining = false;
                        return;
                    }
                }
            };
            let listeners = self.lock_subscribers().snapshot();
            for listener in &listeners {
                listener(&event);
            }
        }
    }
}

/// Hands draining back if a listener panics, so later events still go out.
struct DrainGuard<'a>(&'a Shared);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.lock_dispatch().draining = false;
        }
    }
}

/// Replaces the beat timer with one matching the current tempo.
fn schedule_ticks(shared: &Arc<Shared>, state: &mut EngineState) -> Result<()> {
    let weak = Arc::downgrade(shared);
    state
        .scheduler
        .reschedule(tick_period(state.bpm), move |generation| {
            Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_tick(generation);
                }
            })
        })
}

/// Cancels the beat timer and rewinds; returns the resulting events.
fn halt(state: &mut EngineState) -> Vec<EngineEvent> {
    state.scheduler.cancel();
    state.playing = false;
    let mut events = vec![EngineEvent::PlayingChanged { playing: false }];
    if state.cycle.current() != 0 {
        state.cycle.reset();
        events.push(EngineEvent::BeatChanged { beat: 0 });
    }
    events
}
