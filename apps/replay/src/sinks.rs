use std::{io::Write, thread};

use model::{AltitudeSample, GeoPoint};
use replay_core::{ChartSurface, MapSurface, TickRx};
use tracing::{info, warn};

/// Map view for a terminal: remembers the track bounds and reports the
/// marker position relative to them.
#[derive(Default)]
pub struct TerminalMap {
    bounds: Option<(GeoPoint, GeoPoint)>,
    pub marker: Option<GeoPoint>,
}

impl MapSurface for TerminalMap {
    fn set_position(&mut self, lat: f64, lon: f64) -> anyhow::Result<()> {
        self.marker = Some(GeoPoint { lat, lon });
        let (north, east) = match self.bounds {
            Some((min, max)) => (rel(lat, min.lat, max.lat), rel(lon, min.lon, max.lon)),
            None => (0.0, 0.0),
        };
        info!(target: "map", lat, lon, north_pct = north, east_pct = east, "marker");
        Ok(())
    }

    fn fit_to_track(&mut self, points: &[GeoPoint]) -> anyhow::Result<()> {
        let mut min = GeoPoint { lat: f64::INFINITY, lon: f64::INFINITY };
        let mut max = GeoPoint { lat: f64::NEG_INFINITY, lon: f64::NEG_INFINITY };
        for p in points {
            min.lat = min.lat.min(p.lat);
            min.lon = min.lon.min(p.lon);
            max.lat = max.lat.max(p.lat);
            max.lon = max.lon.max(p.lon);
        }
        if points.is_empty() {
            anyhow::bail!("cannot fit an empty track");
        }
        info!(target: "map", south = min.lat, west = min.lon, north = max.lat, east = max.lon, "fit to track");
        self.bounds = Some((min, max));
        Ok(())
    }

    fn place_marker_at(&mut self, lat: f64, lon: f64) -> anyhow::Result<()> {
        self.marker = Some(GeoPoint { lat, lon });
        info!(target: "map", lat, lon, "marker placed");
        Ok(())
    }
}

/// Altitude chart for a terminal: one bar per tick, scaled to the series.
#[derive(Default)]
pub struct TerminalChart {
    range: Option<(f64, f64)>,
    pub current: Option<(usize, f64)>,
}

const BAR_WIDTH: f64 = 40.0;

impl ChartSurface for TerminalChart {
    fn set_series(&mut self, series: &[AltitudeSample]) -> anyhow::Result<()> {
        let lo = series.iter().map(|s| s.altitude).fold(f64::INFINITY, f64::min);
        let hi = series.iter().map(|s| s.altitude).fold(f64::NEG_INFINITY, f64::max);
        self.range = (lo <= hi).then_some((lo, hi));
        info!(target: "chart", points = series.len(), min_alt = lo, max_alt = hi, "series loaded");
        Ok(())
    }

    fn set_current_point(&mut self, index: usize, value: f64) -> anyhow::Result<()> {
        self.current = Some((index, value));
        let pct = self.range.map_or(0.0, |(lo, hi)| rel(value, lo, hi));
        let bar = "#".repeat((pct / 100.0 * BAR_WIDTH).round() as usize);
        info!(target: "chart", index, alt = value, "{:<40}|", bar);
        Ok(())
    }
}

fn rel(v: f64, lo: f64, hi: f64) -> f64 {
    if hi > lo { ((v - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0) } else { 0.0 }
}

/// Writes tick events as NDJSON to stdout until the sending side is gone.
pub fn spawn_event_writer(rx: TickRx) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdout = std::io::stdout();
        for ev in rx.iter() {
            let Ok(line) = serde_json::to_string(&ev) else { continue };
            let mut out = stdout.lock();
            if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    })
}

/// Waits for the writer to drain. Returns false if it panicked.
pub fn join_event_writer(handle: thread::JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            warn!("event writer thread panicked; some ticks may be missing from stdout");
            false
        }
    }
}
