//! Replay engine: sample source seam, tick sinks and the replay clock

pub mod clock;
pub mod sink;

pub use analysis::{normalize, CanonicalTrace, Timeline, TraceError};
pub use clock::{ReplayClock, ReplayConfig, ReplayEnd, ReplayStatus, SessionInfo, DEFAULT_SPEED};
pub use sink::*;

use model::RawSample;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Fetching samples failed; the source's error is passed through as is.
    #[error(transparent)]
    Transport(anyhow::Error),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("speed multiplier must be positive and finite, got {0}")]
    InvalidSpeed(f64),
    #[error("replay clock must be started from within a tokio runtime")]
    NoRuntime,
    #[error("replay task panicked at tick {cursor}")]
    Panicked { cursor: usize },
    #[error("replay aborted at tick {index}: {source}")]
    Sink {
        index: usize,
        #[source]
        source: SinkError,
    },
}

/// Where raw samples for a flight come from (HTTP API, local files, ...).
/// Implementations do not retry.
#[async_trait::async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch_samples(&self, flight_id: &str) -> Result<Vec<RawSample>, ReplayError>;
}

/// Fetches and normalizes one flight.
pub async fn load_trace<S: SampleSource + ?Sized>(
    source: &S,
    flight_id: &str,
) -> Result<CanonicalTrace, ReplayError> {
    let raw = source.fetch_samples(flight_id).await?;
    let trace = normalize(&raw)?;
    tracing::info!(flight = flight_id, raw = raw.len(), points = trace.len(), "flight loaded");
    Ok(trace)
}
