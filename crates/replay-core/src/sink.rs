use std::sync::Arc;

use analysis::{altitude_series, track_points, CanonicalTrace};
use model::*;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("sink {sink}: {message}")]
pub struct SinkError {
    pub sink: String,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self { sink: sink.into(), message: message.into() }
    }
}

/// Anything the replay clock pushes the current point into.
///
/// `on_tick` runs on the clock's task and must return promptly. An error
/// ends the replay session.
pub trait TickSink: Send + Sync {
    fn name(&self) -> &str;

    /// One-off setup with the whole trace, before the first tick.
    fn prepare(&self, _trace: &CanonicalTrace) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_tick(&self, point: &TelemetryPoint, index: usize) -> Result<(), SinkError>;
}

/// Geographic track view.
pub trait MapSurface: Send {
    fn set_position(&mut self, lat: f64, lon: f64) -> anyhow::Result<()>;
    fn fit_to_track(&mut self, points: &[GeoPoint]) -> anyhow::Result<()>;
    fn place_marker_at(&mut self, lat: f64, lon: f64) -> anyhow::Result<()>;
}

/// Time-series view of altitude over replay index.
pub trait ChartSurface: Send {
    fn set_series(&mut self, series: &[AltitudeSample]) -> anyhow::Result<()>;
    fn set_current_point(&mut self, index: usize, value: f64) -> anyhow::Result<()>;
}

pub struct MapSink<M> {
    name: String,
    surface: Mutex<M>,
}

impl<M: MapSurface> MapSink<M> {
    pub fn new(surface: M) -> Self {
        Self { name: "map".into(), surface: Mutex::new(surface) }
    }

    pub fn surface(&self) -> MutexGuard<'_, M> {
        self.surface.lock()
    }

    fn fail(&self, e: anyhow::Error) -> SinkError {
        SinkError::new(self.name.clone(), format!("{:#}", e))
    }
}

impl<M: MapSurface> TickSink for MapSink<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, trace: &CanonicalTrace) -> Result<(), SinkError> {
        let mut s = self.surface.lock();
        s.fit_to_track(&track_points(trace)).map_err(|e| self.fail(e))?;
        let start = trace.first();
        s.place_marker_at(start.lat, start.lon).map_err(|e| self.fail(e))
    }

    fn on_tick(&self, point: &TelemetryPoint, _index: usize) -> Result<(), SinkError> {
        self.surface
            .lock()
            .set_position(point.lat, point.lon)
            .map_err(|e| self.fail(e))
    }
}

pub struct ChartSink<C> {
    name: String,
    surface: Mutex<C>,
}

impl<C: ChartSurface> ChartSink<C> {
    pub fn new(surface: C) -> Self {
        Self { name: "chart".into(), surface: Mutex::new(surface) }
    }

    pub fn surface(&self) -> MutexGuard<'_, C> {
        self.surface.lock()
    }

    fn fail(&self, e: anyhow::Error) -> SinkError {
        SinkError::new(self.name.clone(), format!("{:#}", e))
    }
}

impl<C: ChartSurface> TickSink for ChartSink<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, trace: &CanonicalTrace) -> Result<(), SinkError> {
        self.surface
            .lock()
            .set_series(&altitude_series(trace))
            .map_err(|e| self.fail(e))
    }

    fn on_tick(&self, point: &TelemetryPoint, index: usize) -> Result<(), SinkError> {
        self.surface
            .lock()
            .set_current_point(index, point.alt)
            .map_err(|e| self.fail(e))
    }
}

/// Delivers every tick to each registered sink, in registration order.
/// The first failing sink aborts the tick.
#[derive(Default, Clone)]
pub struct SinkFanout {
    sinks: Vec<Arc<dyn TickSink>>,
}

impl SinkFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TickSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn TickSink>) {
        self.sinks.push(sink);
    }
}

impl TickSink for SinkFanout {
    fn name(&self) -> &str {
        "fanout"
    }

    fn prepare(&self, trace: &CanonicalTrace) -> Result<(), SinkError> {
        for s in &self.sinks {
            s.prepare(trace)?;
        }
        Ok(())
    }

    fn on_tick(&self, point: &TelemetryPoint, index: usize) -> Result<(), SinkError> {
        for s in &self.sinks {
            s.on_tick(point, index)?;
        }
        Ok(())
    }
}

/// Closure-backed sink.
pub struct FnSink<F> {
    name: String,
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&TelemetryPoint, usize) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> TickSink for FnSink<F>
where
    F: Fn(&TelemetryPoint, usize) -> Result<(), SinkError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_tick(&self, point: &TelemetryPoint, index: usize) -> Result<(), SinkError> {
        (self.f)(point, index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub index: usize,
    pub point: TelemetryPoint,
}

pub type TickTx = crossbeam_channel::Sender<TickEvent>;
pub type TickRx = crossbeam_channel::Receiver<TickEvent>;

pub fn channel() -> (TickTx, TickRx) {
    crossbeam_channel::unbounded()
}

/// Forwards ticks to a consumer on another thread. Fails once the
/// receiving side is gone.
pub struct ChannelSink {
    tx: TickTx,
}

impl ChannelSink {
    pub fn new(tx: TickTx) -> Self {
        Self { tx }
    }
}

impl TickSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn on_tick(&self, point: &TelemetryPoint, index: usize) -> Result<(), SinkError> {
        self.tx
            .send(TickEvent { index, point: *point })
            .map_err(|_| SinkError::new("channel", "receiver disconnected"))
    }
}
