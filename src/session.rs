//! # Session
//!
//! Owns everything one user interaction produces: the route endpoints, the
//! current [`RouteAnalysis`], its summary line, and the playback engine with
//! its ticker. Each analysis replaces the previous one wholesale and cancels
//! any running playback first, so a stale timer never sees new samples.
//!
//! ```text
//! start/end ──► sampler ──► FeatureSource ──► associate ──► summary
//!                                                  │
//!                                                  └──► playback ──► events
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use rand::RngCore;
use tokio::sync::mpsc;

use crate::associate::associate;
use crate::compose::compose_summary;
use crate::config::NarratorConfig;
use crate::error::{NarratorError, OptionExt, Result};
use crate::features::{Feature, RouteAnalysis, SamplePoint};
use crate::playback::{PlaybackEngine, PlaybackEvent, PlaybackState, PlaybackStatus};
use crate::query::FeatureQuery;
use crate::sampler::{compute_sample_plan, SamplePlan};
use crate::source::{FeatureSource, Geocoder};
use crate::ticker::{spawn_ticker, PlaybackTicker};
use crate::GpsPoint;

/// Build an analysis from a sample plan and the outcome of its feature fetch.
///
/// A failed fetch yields `error_flag = true` with no samples or features.
pub fn build_analysis(
    start: GpsPoint,
    end: GpsPoint,
    plan: SamplePlan,
    fetched: Result<Vec<Feature>>,
) -> RouteAnalysis {
    let features = match fetched.and_then(check_geometry) {
        Ok(features) => features,
        Err(e) => {
            warn!("[Session] Feature fetch failed: {}", e);
            return RouteAnalysis::failed(
                start,
                end,
                plan.distance_meters,
                plan.radius_meters,
                e.to_string(),
            );
        }
    };

    let samples: Vec<SamplePoint> = plan
        .points
        .iter()
        .enumerate()
        .map(|(i, p)| SamplePoint::new(i, *p))
        .collect();
    let association = associate(samples, plan.radius_meters, &features);

    RouteAnalysis {
        start,
        end,
        distance_meters: plan.distance_meters,
        radius_meters: plan.radius_meters,
        global_flags: association.global_flags,
        error_flag: false,
        error_message: None,
        samples: association.samples,
        raw_features: features,
    }
}

/// Reject fetched features carrying coordinates outside the valid range.
fn check_geometry(features: Vec<Feature>) -> Result<Vec<Feature>> {
    for f in &features {
        if let Some(bad) = f.invalid_vertex() {
            return Err(NarratorError::FeatureFetchFailed {
                message: format!(
                    "malformed payload: feature {} has invalid vertex ({}, {})",
                    f.id, bad.latitude, bad.longitude
                ),
            });
        }
    }
    Ok(features)
}

fn validate_endpoints(
    start: Option<GpsPoint>,
    end: Option<GpsPoint>,
) -> Result<(GpsPoint, GpsPoint)> {
    let start = start.ok_or_missing("start")?;
    let end = end.ok_or_missing("end")?;
    for (label, p) in [("start", &start), ("end", &end)] {
        if !p.is_valid() {
            return Err(NarratorError::InvalidCoordinates {
                message: format!("{} ({}, {})", label, p.latitude, p.longitude),
            });
        }
    }
    Ok((start, end))
}

/// State for one narrator session.
pub struct SessionState {
    config: NarratorConfig,
    analysis: Option<RouteAnalysis>,
    summary: Option<String>,
    engine: Arc<Mutex<PlaybackEngine>>,
    ticker: Option<PlaybackTicker>,
}

impl SessionState {
    /// Create a session; the configuration is validated first.
    pub fn new(config: NarratorConfig) -> Result<Self> {
        config.validate()?;
        let engine = PlaybackEngine::new(config.playback.clone());
        Ok(Self::with_engine(config, engine))
    }

    /// Create a session whose playback flourishes draw from `rng`.
    pub fn with_rng(config: NarratorConfig, rng: Box<dyn RngCore + Send>) -> Result<Self> {
        config.validate()?;
        let engine = PlaybackEngine::with_rng(config.playback.clone(), rng);
        Ok(Self::with_engine(config, engine))
    }

    fn with_engine(config: NarratorConfig, engine: PlaybackEngine) -> Self {
        Self {
            config,
            analysis: None,
            summary: None,
            engine: Arc::new(Mutex::new(engine)),
            ticker: None,
        }
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    /// Current analysis, if a route has been drawn.
    pub fn analysis(&self) -> Option<&RouteAnalysis> {
        self.analysis.as_ref()
    }

    /// Summary line for the current analysis.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    fn engine(&self) -> MutexGuard<'_, PlaybackEngine> {
        // Ticks never panic while holding the lock; recover the data if one did
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.engine().status()
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.engine().state()
    }

    /// Cancel the ticker and the engine run, if any.
    fn cancel_playback(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        self.engine().cancel();
    }

    fn install(&mut self, analysis: RouteAnalysis) -> &RouteAnalysis {
        let summary = compose_summary(
            &analysis.global_flags,
            analysis.error_flag,
            analysis.distance_meters,
        );
        info!(
            "[Session] Route analyzed: {:.0}m, {} samples, {} features, error={}",
            analysis.distance_meters,
            analysis.samples.len(),
            analysis.raw_features.len(),
            analysis.error_flag
        );
        self.summary = Some(summary);
        self.analysis.insert(analysis)
    }

    fn plan_for(&mut self, start: &GpsPoint, end: &GpsPoint) -> SamplePlan {
        self.cancel_playback();
        compute_sample_plan(start, end, &self.config.sampler)
    }

    /// Analyze the route using already-fetched features (or the fetch error).
    pub fn analyze_with_features(
        &mut self,
        start: Option<GpsPoint>,
        end: Option<GpsPoint>,
        fetched: Result<Vec<Feature>>,
    ) -> Result<&RouteAnalysis> {
        let (start, end) = validate_endpoints(start, end)?;
        let plan = self.plan_for(&start, &end);
        Ok(self.install(build_analysis(start, end, plan, fetched)))
    }

    /// Sample the route, fetch features from `source` and associate them.
    ///
    /// Input errors are returned before any state changes. A fetch failure is
    /// not an error here: the analysis comes back with `error_flag` set.
    pub async fn analyze<S: FeatureSource>(
        &mut self,
        start: Option<GpsPoint>,
        end: Option<GpsPoint>,
        source: &S,
    ) -> Result<&RouteAnalysis> {
        let (start, end) = validate_endpoints(start, end)?;
        let plan = self.plan_for(&start, &end);
        let query = FeatureQuery::new(plan.points.clone(), plan.radius_meters)
            .with_timeout(self.config.query.timeout_secs);

        let fetched = source.fetch_features(&query).await;
        Ok(self.install(build_analysis(start, end, plan, fetched)))
    }

    /// Geocode both place names concurrently, then [`analyze`](Self::analyze).
    pub async fn analyze_places<G: Geocoder, S: FeatureSource>(
        &mut self,
        start_name: &str,
        end_name: &str,
        geocoder: &G,
        source: &S,
    ) -> Result<&RouteAnalysis> {
        let start_name = Some(start_name.trim())
            .filter(|s| !s.is_empty())
            .ok_or_missing("start")?;
        let end_name = Some(end_name.trim())
            .filter(|s| !s.is_empty())
            .ok_or_missing("end")?;

        let (start, end) =
            futures::try_join!(geocoder.geocode(start_name), geocoder.geocode(end_name))?;
        let start = start.ok_or_not_found(start_name)?;
        let end = end.ok_or_not_found(end_name)?;

        self.analyze(Some(start), Some(end), source).await
    }

    /// Start a playback over the current analysis, to be driven by [`tick`](Self::tick).
    pub fn start_playback(&mut self) -> Result<u64> {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        let analysis = self.analysis.as_ref();
        let mut engine = self.engine.lock().unwrap_or_else(|p| p.into_inner());
        engine.start(analysis)
    }

    /// Advance run `run_id` by one step.
    pub fn tick(&mut self, run_id: u64, now_ms: u64) -> Vec<PlaybackEvent> {
        self.engine().tick(run_id, now_ms)
    }

    /// Start a playback and tick it on a tokio task, sending events to `events`.
    pub fn spawn_playback(&mut self, events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<u64> {
        let run_id = self.start_playback()?;
        let ticker = spawn_ticker(
            Arc::clone(&self.engine),
            run_id,
            self.config.playback.tick_interval_ms,
            events,
        );
        self.ticker = Some(ticker);
        Ok(run_id)
    }

    /// Wait for the spawned playback task, if any, to exit.
    pub async fn wait_playback(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.join().await;
        }
    }

    /// Drop the route and cancel any playback.
    pub fn reset(&mut self) {
        self.cancel_playback();
        self.analysis = None;
        self.summary = None;
        info!("[Session] Reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;
    use crate::sampler::SamplerConfig;
    use crate::source::{FailingFeatureSource, StaticFeatureSource, StaticGeocoder};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    fn session() -> SessionState {
        SessionState::with_rng(NarratorConfig::default(), Box::new(ChaCha8Rng::seed_from_u64(3)))
            .unwrap()
    }

    fn peak_at(p: GpsPoint) -> Feature {
        Feature::node(1, BTreeMap::from([("natural".to_string(), "peak".to_string())]), p)
    }

    #[test]
    fn test_insufficient_input() {
        let mut s = session();
        let err = s
            .analyze_with_features(None, Some(GpsPoint::new(0.0, 0.0)), Ok(vec![]))
            .unwrap_err();
        assert!(matches!(err, NarratorError::InsufficientInput { .. }));
        assert!(s.analysis().is_none());

        let err = s
            .analyze_with_features(
                Some(GpsPoint::new(91.0, 0.0)),
                Some(GpsPoint::new(0.0, 0.0)),
                Ok(vec![]),
            )
            .unwrap_err();
        assert!(matches!(err, NarratorError::InvalidCoordinates { .. }));
    }

    #[test]
    fn test_playback_preconditions() {
        let mut s = session();
        assert_eq!(s.start_playback(), Err(NarratorError::NoRouteDrawn));

        let analysis = s
            .analyze_with_features(
                Some(GpsPoint::new(0.0, 0.0)),
                Some(GpsPoint::new(0.0, 1.0)),
                Err(NarratorError::FeatureFetchFailed {
                    message: "503".to_string(),
                }),
            )
            .unwrap();
        assert!(analysis.error_flag);
        assert!(s.summary().unwrap().starts_with("Couldn't read the terrain"));
        assert_eq!(s.start_playback(), Err(NarratorError::NoSamplesAvailable));
    }

    #[test]
    fn test_invalid_feature_geometry_flags_error() {
        let start = GpsPoint::new(0.0, 0.0);
        let end = GpsPoint::new(0.0, 0.04);
        let plan = compute_sample_plan(&start, &end, &SamplerConfig::default());
        let mut features: Vec<Feature> = (0..40)
            .map(|i| {
                Feature::node(
                    i,
                    BTreeMap::from([("highway".to_string(), "path".to_string())]),
                    GpsPoint::new(0.0001, i as f64 * 0.001),
                )
            })
            .collect();
        features.push(Feature::node(
            40,
            BTreeMap::from([("natural".to_string(), "water".to_string())]),
            GpsPoint::new(f64::NAN, 0.02),
        ));

        let analysis = build_analysis(start, end, plan, Ok(features.clone()));
        assert!(analysis.error_flag);
        assert!(analysis.samples.is_empty());
        assert!(analysis.raw_features.is_empty());
        assert!(analysis
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("malformed payload")));

        let mut s = session();
        s.analyze_with_features(Some(start), Some(end), Ok(features))
            .unwrap();
        assert!(s.summary().unwrap().starts_with("Couldn't read the terrain"));
        assert_eq!(s.start_playback(), Err(NarratorError::NoSamplesAvailable));
    }

    #[test]
    fn test_new_analysis_cancels_playback() {
        let mut s = session();
        let start = GpsPoint::new(46.0, 7.0);
        let end = GpsPoint::new(46.0, 7.05);
        s.analyze_with_features(Some(start), Some(end), Ok(vec![])).unwrap();
        let run_id = s.start_playback().unwrap();
        assert!(!s.tick(run_id, 0).is_empty());
        assert_eq!(s.playback_status(), PlaybackStatus::Running);

        s.analyze_with_features(Some(start), Some(end), Ok(vec![peak_at(start)]))
            .unwrap();
        assert_eq!(s.playback_status(), PlaybackStatus::Cancelled);
        assert!(s.tick(run_id, 100).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut s = session();
        let (start, end) = (GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.01));
        s.analyze_with_features(Some(start), Some(end), Ok(vec![])).unwrap();
        let run_id = s.start_playback().unwrap();
        s.reset();
        assert!(s.analysis().is_none());
        assert!(s.summary().is_none());
        assert!(s.playback_state().is_none());
        assert!(s.tick(run_id, 0).is_empty());
        assert_eq!(s.start_playback(), Err(NarratorError::NoRouteDrawn));
    }

    #[tokio::test]
    async fn test_analyze_with_source() {
        let mut s = session();
        let start = GpsPoint::new(46.0, 7.0);
        let end = GpsPoint::new(46.0, 7.05);
        let plan = compute_sample_plan(&start, &end, &SamplerConfig::default());
        let source = StaticFeatureSource::new(vec![peak_at(plan.points[2])]);

        let analysis = s.analyze(Some(start), Some(end), &source).await.unwrap();
        assert!(analysis.global_flags.contains(Category::Peak));
        assert!(analysis.samples[2].has(Category::Peak));
        assert_eq!(analysis.raw_features.len(), 1);
        assert!(s.summary().unwrap().contains("summit"));

        let failing = FailingFeatureSource::new("timeout");
        let analysis = s.analyze(Some(start), Some(end), &failing).await.unwrap();
        assert!(analysis.error_flag);
        assert!(analysis.samples.is_empty());
        assert!(analysis.raw_features.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_places() {
        let mut s = session();
        let geocoder = StaticGeocoder::new()
            .with_place("Interlaken", GpsPoint::new(46.686, 7.863))
            .with_place("Grindelwald", GpsPoint::new(46.624, 8.041));
        let source = StaticFeatureSource::default();

        let analysis = s
            .analyze_places("Interlaken", "Grindelwald", &geocoder, &source)
            .await
            .unwrap();
        assert!(!analysis.error_flag);
        assert_eq!(analysis.samples.len(), 13);

        // Unresolved names leave the previous analysis untouched
        let err = s
            .analyze_places("Interlaken", "Atlantis", &geocoder, &source)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NarratorError::GeocodeNotFound {
                place: "Atlantis".to_string()
            }
        );
        assert_eq!(s.analysis().unwrap().samples.len(), 13);

        let err = s
            .analyze_places("  ", "Grindelwald", &geocoder, &source)
            .await
            .unwrap_err();
        assert!(matches!(err, NarratorError::InsufficientInput { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_playback() {
        let mut s = session();
        let (start, end) = (GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.02));
        s.analyze_with_features(Some(start), Some(end), Ok(vec![])).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        s.spawn_playback(tx).unwrap();
        s.wait_playback().await;

        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PlaybackEvent::Completed { .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(s.playback_status(), PlaybackStatus::Completed);
    }
}
