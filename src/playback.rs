//! # Playback Engine
//!
//! Timed state machine that walks a virtual traveler from start to end and
//! decides when to surface commentary.
//!
//! ## Lifecycle
//!
//! `Idle -> Running -> Completed | Cancelled`. Starting again from any state
//! begins a new run with a fresh `run_id`; ticks carrying an older id are
//! ignored, so a timer that raced with cancellation cannot mutate state.
//!
//! ## Triggers
//!
//! - **Proximity**: the nearest not-yet-fired sample within the route radius
//!   whose message is not the "nothing" default.
//! - **Scheduled**: a few evenly spaced steps at which the nearest
//!   not-yet-fired sample speaks regardless of its content, so long empty
//!   stretches still get commentary.
//!
//! Both respect the cooldown, and a sample fires at most once per run.
//! Time is passed in by the caller (`now_ms` since the run started), which
//! keeps the engine deterministic; [`crate::ticker`] supplies wall-clock time.

use std::collections::HashSet;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::compose::{sample_key, Embellisher, SampleKey};
use crate::constants::{
    MAX_SCHEDULED_SLOTS, MIN_SCHEDULED_SLOTS, PLAYBACK_MAX_DURATION_MS,
    PLAYBACK_MIN_DURATION_MS, PLAYBACK_SPEED_FACTOR, PLAYBACK_TICK_INTERVAL_MS,
    SCHEDULED_KM_PER_SLOT, TRIGGER_COOLDOWN_MS,
};
use crate::error::{NarratorError, Result};
use crate::features::RouteAnalysis;
use crate::geo_utils::{compass_direction, haversine_distance, initial_bearing, interpolate};
use crate::GpsPoint;

/// Configuration for playback timing and triggering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Playback milliseconds per meter of route. Default: 0.5
    pub speed_factor: f64,
    /// Default: 8000
    pub min_duration_ms: u64,
    /// Default: 60000
    pub max_duration_ms: u64,
    /// Period between ticks. Default: 100
    pub tick_interval_ms: u64,
    /// Minimum gap between fired messages. Default: 3000
    pub cooldown_ms: u64,
    /// Force commentary at evenly spaced steps. Default: true
    pub scheduled_fallback: bool,
    /// Kilometers of route per scheduled slot before clamping. Default: 10
    pub km_per_slot: f64,
    pub min_slots: usize,
    pub max_slots: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed_factor: PLAYBACK_SPEED_FACTOR,
            min_duration_ms: PLAYBACK_MIN_DURATION_MS,
            max_duration_ms: PLAYBACK_MAX_DURATION_MS,
            tick_interval_ms: PLAYBACK_TICK_INTERVAL_MS,
            cooldown_ms: TRIGGER_COOLDOWN_MS,
            scheduled_fallback: true,
            km_per_slot: SCHEDULED_KM_PER_SLOT,
            min_slots: MIN_SCHEDULED_SLOTS,
            max_slots: MAX_SCHEDULED_SLOTS,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| {
            Err(NarratorError::ConfigError {
                message: message.to_string(),
            })
        };
        if self.tick_interval_ms == 0 {
            return fail("tick interval must be positive");
        }
        if self.min_duration_ms == 0 || self.min_duration_ms > self.max_duration_ms {
            return fail("playback duration bounds must satisfy 0 < min <= max");
        }
        if !(self.speed_factor >= 0.0 && self.speed_factor.is_finite()) {
            return fail("speed factor must be a non-negative number");
        }
        if self.min_slots > self.max_slots || !(self.km_per_slot > 0.0) {
            return fail("scheduled slot bounds are inconsistent");
        }
        Ok(())
    }

    /// Playback duration for a route of `distance_meters`.
    pub fn duration_ms(&self, distance_meters: f64) -> u64 {
        let raw = distance_meters * self.speed_factor;
        if raw.is_nan() {
            return self.min_duration_ms;
        }
        (raw.round() as u64).clamp(self.min_duration_ms, self.max_duration_ms)
    }

    /// Number of steps for a playback of `duration_ms`, saturating at `u32::MAX`.
    pub fn total_steps(&self, duration_ms: u64) -> u32 {
        let steps = duration_ms.div_ceil(self.tick_interval_ms.max(1)).max(1);
        u32::try_from(steps).unwrap_or(u32::MAX)
    }

    /// Number of scheduled fallback slots for a route of `distance_meters`.
    pub fn slot_count(&self, distance_meters: f64) -> usize {
        let raw = (distance_meters / 1000.0 / self.km_per_slot).ceil();
        let raw = if raw.is_nan() || raw < 0.0 { 0.0 } else { raw };
        (raw as usize).clamp(self.min_slots, self.max_slots)
    }
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Read-only snapshot of the running playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub run_id: u64,
    /// Next step to evaluate; never exceeds `total_steps`
    pub current_step: u32,
    pub total_steps: u32,
    pub duration_ms: u64,
    pub current_position: GpsPoint,
    /// Initial bearing from start to end in degrees
    pub bearing_degrees: f64,
    /// Compass name of the bearing, e.g. "northeast"
    pub heading: String,
    /// Sample index of the last fired message
    pub last_fired_sample: Option<usize>,
    pub last_fire_ms: Option<u64>,
}

/// What caused a commentary event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Proximity,
    Scheduled,
}

/// Output of a tick, consumed by the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    Position {
        step: u32,
        total_steps: u32,
        position: GpsPoint,
        progress: f64,
    },
    Commentary {
        sample_index: usize,
        key: SampleKey,
        message: String,
        trigger: TriggerKind,
        at_ms: u64,
    },
    Completed {
        message: String,
    },
}

/// Sample data the engine needs, copied out of the analysis at start.
#[derive(Debug, Clone)]
struct PlaybackSample {
    index: usize,
    coordinate: GpsPoint,
    key: SampleKey,
}

#[derive(Debug, Clone)]
struct ScheduledSlot {
    step: u32,
    consumed: bool,
}

#[derive(Debug)]
struct Run {
    state: PlaybackState,
    start: GpsPoint,
    end: GpsPoint,
    radius_meters: f64,
    samples: Vec<PlaybackSample>,
    slots: Vec<ScheduledSlot>,
    fired: HashSet<usize>,
}

impl Run {
    fn cooldown_elapsed(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        self.state
            .last_fire_ms
            .map_or(true, |last| now_ms >= last && now_ms - last >= cooldown_ms)
    }

    /// Nearest unfired interesting sample within the radius.
    fn proximity_candidate(&self, position: &GpsPoint) -> Option<usize> {
        self.samples
            .iter()
            .filter(|s| s.key.is_interesting() && !self.fired.contains(&s.index))
            .map(|s| (s, haversine_distance(position, &s.coordinate)))
            .filter(|(_, d)| *d <= self.radius_meters)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s.index)
    }

    /// Nearest unfired sample anywhere on the route.
    fn nearest_unfired(&self, position: &GpsPoint) -> Option<usize> {
        self.samples
            .iter()
            .filter(|s| !self.fired.contains(&s.index))
            .map(|s| (s, haversine_distance(position, &s.coordinate)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s.index)
    }

    fn has_due_slot(&self) -> bool {
        let step = self.state.current_step;
        self.slots.iter().any(|s| !s.consumed && s.step <= step)
    }

    fn consume_due_slots(&mut self) {
        let step = self.state.current_step;
        for slot in self.slots.iter_mut().filter(|s| s.step <= step) {
            slot.consumed = true;
        }
    }

    fn sample(&self, index: usize) -> Option<&PlaybackSample> {
        self.samples.iter().find(|s| s.index == index)
    }
}

/// The playback state machine.
///
/// Owns the only mutable playback state; callers see it through
/// [`PlaybackEngine::state`] snapshots and tick events.
#[derive(Debug)]
pub struct PlaybackEngine {
    config: PlaybackConfig,
    status: PlaybackStatus,
    next_run_id: u64,
    run: Option<Run>,
    embellisher: Embellisher,
}

impl PlaybackEngine {
    /// Create an engine seeded from OS entropy.
    pub fn new(config: PlaybackConfig) -> Self {
        Self::with_rng(config, Box::new(StdRng::from_entropy()))
    }

    /// Create an engine with an explicit random source for message flourishes.
    pub fn with_rng(config: PlaybackConfig, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            config,
            status: PlaybackStatus::Idle,
            next_run_id: 1,
            run: None,
            embellisher: Embellisher::new(rng),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Snapshot of the current run, if one is in progress.
    pub fn state(&self) -> Option<PlaybackState> {
        self.run.as_ref().map(|r| r.state.clone())
    }

    /// True while `run_id` is the active, running playback.
    pub fn is_running(&self, run_id: u64) -> bool {
        self.status == PlaybackStatus::Running
            && self.run.as_ref().is_some_and(|r| r.state.run_id == run_id)
    }

    /// Start a playback over `analysis`, replacing any current run.
    ///
    /// Fails with [`NarratorError::NoRouteDrawn`] when there is no analysis and
    /// [`NarratorError::NoSamplesAvailable`] when it has no usable samples.
    pub fn start(&mut self, analysis: Option<&RouteAnalysis>) -> Result<u64> {
        let analysis = analysis.ok_or(NarratorError::NoRouteDrawn)?;
        if !analysis.is_playable() {
            return Err(NarratorError::NoSamplesAvailable);
        }

        if self.status == PlaybackStatus::Running {
            debug!("[Playback] Replacing running playback");
        }

        let duration_ms = self.config.duration_ms(analysis.distance_meters);
        let total_steps = self.config.total_steps(duration_ms);
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let bearing_degrees = initial_bearing(&analysis.start, &analysis.end);
        let heading = compass_direction(bearing_degrees);

        let slots = if self.config.scheduled_fallback {
            let count = self.config.slot_count(analysis.distance_meters);
            (1..=count)
                .map(|i| ScheduledSlot {
                    step: (total_steps as f64 * i as f64 / (count + 1) as f64).round() as u32,
                    consumed: false,
                })
                .collect()
        } else {
            Vec::new()
        };

        let samples = analysis
            .samples
            .iter()
            .map(|s| PlaybackSample {
                index: s.index,
                coordinate: s.coordinate,
                key: sample_key(&s.category_flags),
            })
            .collect();

        self.run = Some(Run {
            state: PlaybackState {
                run_id,
                current_step: 0,
                total_steps,
                duration_ms,
                current_position: analysis.start,
                bearing_degrees,
                heading: heading.to_string(),
                last_fired_sample: None,
                last_fire_ms: None,
            },
            start: analysis.start,
            end: analysis.end,
            radius_meters: analysis.radius_meters,
            samples,
            slots,
            fired: HashSet::new(),
        });
        self.status = PlaybackStatus::Running;

        info!(
            "[Playback] Run {} started heading {}: {}ms over {} steps",
            run_id, heading, duration_ms, total_steps
        );
        Ok(run_id)
    }

    /// Stop the current run. Returns false if nothing was running.
    pub fn cancel(&mut self) -> bool {
        if self.status != PlaybackStatus::Running {
            return false;
        }
        if let Some(run) = self.run.take() {
            info!(
                "[Playback] Run {} cancelled at step {}/{}",
                run.state.run_id, run.state.current_step, run.state.total_steps
            );
        }
        self.status = PlaybackStatus::Cancelled;
        true
    }

    /// Advance one step of run `run_id` at `now_ms` since the run started.
    ///
    /// Returns no events when `run_id` is stale or the engine is not running.
    pub fn tick(&mut self, run_id: u64, now_ms: u64) -> Vec<PlaybackEvent> {
        if !self.is_running(run_id) {
            debug!("[Playback] Ignoring tick for inactive run {}", run_id);
            return Vec::new();
        }
        let cooldown_ms = self.config.cooldown_ms;
        let Some(run) = self.run.as_mut() else {
            return Vec::new();
        };

        let step = run.state.current_step;
        let total = run.state.total_steps;
        let progress = step as f64 / total as f64;
        let position = interpolate(&run.start, &run.end, progress);
        run.state.current_position = position;

        let mut events = vec![PlaybackEvent::Position {
            step,
            total_steps: total,
            position,
            progress,
        }];

        if run.cooldown_elapsed(now_ms, cooldown_ms) {
            let choice = match run.proximity_candidate(&position) {
                Some(index) => Some((index, TriggerKind::Proximity)),
                None if run.has_due_slot() => {
                    let nearest = run.nearest_unfired(&position);
                    // A due slot is used up even when every sample already spoke
                    run.consume_due_slots();
                    nearest.map(|index| (index, TriggerKind::Scheduled))
                }
                None => None,
            };

            if let Some((index, trigger)) = choice {
                if let Some(key) = run.sample(index).map(|s| s.key) {
                    run.fired.insert(index);
                    run.consume_due_slots();
                    run.state.last_fired_sample = Some(index);
                    run.state.last_fire_ms = Some(now_ms);

                    let message = self.embellisher.sample_message(key);
                    debug!(
                        "[Playback] Step {}/{}: sample {} fired ({:?})",
                        step, total, index, trigger
                    );
                    events.push(PlaybackEvent::Commentary {
                        sample_index: index,
                        key,
                        message,
                        trigger,
                        at_ms: now_ms,
                    });
                }
            }
        }

        if step >= total {
            let message = self.embellisher.completion_message();
            self.run = None;
            self.status = PlaybackStatus::Completed;
            info!("[Playback] Run {} completed", run_id);
            events.push(PlaybackEvent::Completed { message });
        } else if let Some(run) = self.run.as_mut() {
            run.state.current_step = step + 1;
        }

        events
    }
}
