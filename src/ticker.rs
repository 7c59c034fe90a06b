//! Periodic tick task driving a shared [`PlaybackEngine`].
//!
//! One tokio task per run. Each tick locks the engine, advances it, and
//! forwards the resulting events; ticks never overlap because the task
//! awaits the next interval only after the previous tick returned.
//! Cancellation is cooperative through a [`CancellationToken`], and the
//! engine's run-id guard drops anything that slips through afterwards.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::playback::{PlaybackEngine, PlaybackEvent};

/// Handle to a running tick task.
#[derive(Debug)]
pub struct PlaybackTicker {
    run_id: u64,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PlaybackTicker {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Stop ticking. The task exits before its next tick.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("[Ticker] Run {} task join error: {}", self.run_id, e);
        }
    }
}

/// Spawn a task ticking run `run_id` of `engine` every `tick_interval_ms`.
///
/// Events are sent to `events` in tick order. The task exits when the run
/// completes, is cancelled or replaced, or the receiver is dropped.
/// Must be called from within a tokio runtime.
pub fn spawn_ticker(
    engine: Arc<Mutex<PlaybackEngine>>,
    run_id: u64,
    tick_interval_ms: u64,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) -> PlaybackTicker {
    let cancel_token = CancellationToken::new();
    let task_token = cancel_token.clone();

    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    debug!("[Ticker] Run {} cancelled", run_id);
                    break;
                }
                _ = interval.tick() => {
                    let now_ms = started.elapsed().as_millis() as u64;
                    let (batch, still_running) = match engine.lock() {
                        Ok(mut guard) => {
                            let batch = guard.tick(run_id, now_ms);
                            (batch, guard.is_running(run_id))
                        }
                        Err(_) => {
                            warn!("[Ticker] Engine lock poisoned, stopping run {}", run_id);
                            break;
                        }
                    };

                    for event in batch {
                        if events.send(event).is_err() {
                            debug!("[Ticker] Event receiver dropped, stopping run {}", run_id);
                            return;
                        }
                    }
                    if !still_running {
                        break;
                    }
                }
            }
        }
    });

    PlaybackTicker {
        run_id,
        cancel_token,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::associate::associate;
    use crate::features::{Feature, RouteAnalysis, SamplePoint};
    use crate::playback::{PlaybackConfig, PlaybackStatus};
    use crate::sampler::{compute_sample_plan, SamplerConfig};
    use crate::GpsPoint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    fn short_analysis() -> RouteAnalysis {
        let start = GpsPoint::new(46.0, 7.0);
        let end = GpsPoint::new(46.0, 7.02);
        let plan = compute_sample_plan(&start, &end, &SamplerConfig::default());
        let samples = plan
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| SamplePoint::new(i, *p))
            .collect();
        let features = vec![Feature::node(
            1,
            BTreeMap::from([("leisure".to_string(), "park".to_string())]),
            plan.points[1],
        )];
        let assoc = associate(samples, plan.radius_meters, &features);
        RouteAnalysis {
            start,
            end,
            distance_meters: plan.distance_meters,
            radius_meters: plan.radius_meters,
            global_flags: assoc.global_flags,
            error_flag: false,
            error_message: None,
            samples: assoc.samples,
            raw_features: features,
        }
    }

    fn shared_engine() -> Arc<Mutex<PlaybackEngine>> {
        Arc::new(Mutex::new(PlaybackEngine::with_rng(
            PlaybackConfig::default(),
            Box::new(ChaCha8Rng::seed_from_u64(1)),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_runs_to_completion() {
        let engine = shared_engine();
        let run_id = engine.lock().unwrap().start(Some(&short_analysis())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ticker = spawn_ticker(engine.clone(), run_id, 100, tx);
        ticker.join().await;

        let mut completed = 0;
        let mut commentary = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                PlaybackEvent::Completed { .. } => completed += 1,
                PlaybackEvent::Commentary { .. } => commentary += 1,
                PlaybackEvent::Position { .. } => {}
            }
        }
        assert_eq!(completed, 1);
        assert!(commentary >= 1);
        assert_eq!(engine.lock().unwrap().status(), PlaybackStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let engine = shared_engine();
        let run_id = engine.lock().unwrap().start(Some(&short_analysis())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ticker = spawn_ticker(engine.clone(), run_id, 100, tx);
        tokio::time::sleep(Duration::from_millis(550)).await;
        ticker.cancel();
        assert!(ticker.is_cancelled());
        engine.lock().unwrap().cancel();
        ticker.join().await;

        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, PlaybackEvent::Completed { .. }));
            received += 1;
        }
        assert!(received > 0);

        // Nothing arrives after cancellation
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.lock().unwrap().status(), PlaybackStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_run_stops_old_ticker() {
        let engine = shared_engine();
        let analysis = short_analysis();
        let first = engine.lock().unwrap().start(Some(&analysis)).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let ticker = spawn_ticker(engine.clone(), first, 100, tx);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = engine.lock().unwrap().start(Some(&analysis)).unwrap();
        ticker.join().await;

        // The stale ticker exited without touching the new run
        let state = engine.lock().unwrap().state().unwrap();
        assert_eq!(state.run_id, second);
        assert_eq!(state.current_step, 0);
    }
}
