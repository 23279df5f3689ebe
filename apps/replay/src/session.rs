use std::sync::Arc;
use parking_lot::Mutex;

use model::FlightSummary;
use analysis as an;
use replay_core::{
    load_trace, CanonicalTrace, ReplayClock, ReplayConfig, ReplayError, SampleSource, SinkError, SinkFanout, TickSink,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no flight loaded")]
    NoFlight,
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("sink setup failed: {0}")]
    SinkSetup(#[from] SinkError),
}

pub struct LoadedFlight {
    pub id: String,
    pub trace: Arc<CanonicalTrace>,
    pub summary: FlightSummary,
}

/// Everything one page load owns: the sample source, the registered sinks,
/// the flight currently shown and the clock replaying it.
pub struct AppSession {
    inner: Mutex<Inner>,
    source: Box<dyn SampleSource>,
    sinks: SinkFanout,
    cfg: ReplayConfig,
    clock: ReplayClock,
}

struct Inner {
    flight: Option<LoadedFlight>,
}

impl AppSession {
    pub fn new(source: Box<dyn SampleSource>, sinks: SinkFanout, cfg: ReplayConfig) -> Self {
        Self {
            inner: Mutex::new(Inner { flight: None }),
            source,
            sinks,
            cfg,
            clock: ReplayClock::new(),
        }
    }

    pub fn clock(&self) -> &ReplayClock { &self.clock }

    /// Fetches, normalizes and shows a flight. Fetch and empty-trace errors
    /// come back before any sink is touched. A running replay of the
    /// previous flight is stopped.
    ///
    /// If a sink fails to take the new trace, the sinks are left half set up,
    /// so no flight stays loaded.
    pub async fn load_flight(&self, flight_id: &str) -> Result<FlightSummary, SessionError> {
        let trace = load_trace(self.source.as_ref(), flight_id).await?;
        let summary = an::summarize(&trace);

        // Held until the swap so a concurrent start sees the old flight or the new one.
        let mut inner = self.inner.lock();
        self.clock.stop();
        if let Err(e) = self.sinks.prepare(&trace) {
            inner.flight = None;
            tracing::warn!(flight = flight_id, error = %e, "sink setup failed, flight unloaded");
            return Err(e.into());
        }
        inner.flight = Some(LoadedFlight {
            id: flight_id.to_string(),
            trace: Arc::new(trace),
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// The replay trigger. `Ok(false)` when a replay is already running.
    pub fn start_replay(&self) -> Result<bool, SessionError> {
        let inner = self.inner.lock();
        let flight = inner.flight.as_ref().ok_or(SessionError::NoFlight)?;
        let sinks: Arc<dyn TickSink> = Arc::new(self.sinks.clone());
        Ok(self.clock.start(flight.trace.clone(), self.cfg.speed, sinks)?)
    }

    pub fn stop_replay(&self) {
        self.clock.stop();
    }

    pub fn with_flight<T>(&self, f: impl FnOnce(&LoadedFlight) -> T) -> Result<T, SessionError> {
        self.inner.lock().flight.as_ref().map(f).ok_or(SessionError::NoFlight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::Timeline;
    use replay_source_fs::{FsSampleSource, FsSourceConfig};
    use model::TelemetryPoint;
    use std::path::Path;

    const SHORT: &str = "time(ms),latitude,longitude,height(m)\n\
        0,48.1,11.5,500\n\
        100,48.2,11.6,510\n";
    const LONG: &str = "time(ms),latitude,longitude,height(m)\n\
        0,48.1,11.5,500\n\
        100,48.2,11.6,510\n\
        200,48.3,11.7,520\n";

    /// Refuses traces longer than two points.
    struct Picky;

    impl TickSink for Picky {
        fn name(&self) -> &str { "picky" }

        fn prepare(&self, trace: &CanonicalTrace) -> Result<(), SinkError> {
            if trace.len() > 2 {
                return Err(SinkError::new("picky", "track too long"));
            }
            Ok(())
        }

        fn on_tick(&self, _point: &TelemetryPoint, _index: usize) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn session(dir: &Path) -> AppSession {
        std::fs::write(dir.join("short.csv"), SHORT).unwrap();
        std::fs::write(dir.join("long.csv"), LONG).unwrap();
        let src = FsSampleSource::new(FsSourceConfig { root: dir.to_path_buf() });
        AppSession::new(Box::new(src), SinkFanout::new().with(Arc::new(Picky)), ReplayConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_setup_unloads_previous_flight() {
        let dir = tempfile::tempdir().unwrap();
        let sess = session(dir.path());
        sess.load_flight("short").await.unwrap();
        assert!(sess.start_replay().unwrap());

        let err = sess.load_flight("long").await.unwrap_err();
        assert!(matches!(err, SessionError::SinkSetup(_)), "{:?}", err);
        assert!(!sess.clock().is_active());
        assert!(matches!(sess.with_flight(|f| f.id.clone()), Err(SessionError::NoFlight)));
        assert!(matches!(sess.start_replay(), Err(SessionError::NoFlight)));
    }

    #[tokio::test(start_paused = true)]
    async fn reload_replaces_flight_and_stops_replay() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.csv"), SHORT.replace("48.", "47.")).unwrap();
        let sess = session(dir.path());
        sess.load_flight("short").await.unwrap();
        sess.start_replay().unwrap();

        sess.load_flight("other").await.unwrap();
        assert!(!sess.clock().is_active());
        assert!(sess.start_replay().unwrap());
        assert_eq!(sess.clock().session().unwrap().cursor, 0);
        assert_eq!(sess.with_flight(|f| f.trace.first().lat).unwrap(), 47.1);
    }
}
