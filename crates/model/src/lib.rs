use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record as delivered by the sample feed. Nothing about the field
/// types is trusted: numbers may arrive as strings, fields may be missing.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct RawSample {
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub latitude: Value,
    #[serde(default)]
    pub longitude: Value,
    #[serde(default)]
    pub altitude: Value,
    #[serde(default)]
    pub speed: Value,
    #[serde(default)]
    pub battery: Value,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct TelemetryPoint {
    /// epoch millis
    pub ts: f64,
    pub lat: f64,
    pub lon: f64,
    /// meters above ground
    pub alt: f64,
    /// horizontal speed, m/s
    pub speed: f64,
    /// percent
    pub battery: f64,
}

impl TelemetryPoint {
    pub fn position(&self) -> GeoPoint {
        GeoPoint { lat: self.lat, lon: self.lon }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct AltitudeSample {
    pub index: usize,
    pub altitude: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FlightSummary {
    pub samples: usize,
    pub start_ts: f64,
    pub end_ts: f64,
    pub duration_ms: f64,
    pub distance_m: f64,
    pub max_altitude_m: f64,
    pub min_battery_pct: f64,
}
