use model::*;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TraceError {
    #[error("flight has no usable samples")]
    EmptyTrace,
    #[error("timeline index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Position-addressed view over a flight. The replay clock only talks to
/// this, so a time-interpolating timeline can stand in for the plain trace.
pub trait Timeline: Send + Sync {
    fn len(&self) -> usize;
    fn at(&self, index: usize) -> Result<TelemetryPoint, TraceError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trimmed, typed and immutable sample sequence for one flight.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTrace {
    points: Vec<TelemetryPoint>,
}

impl CanonicalTrace {
    pub fn points(&self) -> &[TelemetryPoint] {
        &self.points
    }

    pub fn first(&self) -> &TelemetryPoint {
        // non-empty by construction
        &self.points[0]
    }

    pub fn last(&self) -> &TelemetryPoint {
        &self.points[self.points.len() - 1]
    }
}

impl Timeline for CanonicalTrace {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn at(&self, index: usize) -> Result<TelemetryPoint, TraceError> {
        self.points
            .get(index)
            .copied()
            .ok_or(TraceError::IndexOutOfRange { index, len: self.points.len() })
    }
}

/// Turns the raw feed into a canonical trace.
///
/// Every field is coerced to a finite number; anything unparseable becomes
/// 0. The leading run of samples without a usable fix (lat or lon exactly 0)
/// is dropped. If no sample has a fix at all the sequence is kept as is.
pub fn normalize(raw: &[RawSample]) -> Result<CanonicalTrace, TraceError> {
    let points: Vec<TelemetryPoint> = raw.iter().map(coerce_sample).collect();

    let first_fix = points.iter().position(|p| p.lat != 0.0 && p.lon != 0.0);
    let points = match first_fix {
        Some(k) if k > 0 => {
            tracing::debug!(dropped = k, total = points.len(), "trimmed leading samples without fix");
            points[k..].to_vec()
        }
        Some(_) => points,
        None => {
            if !points.is_empty() {
                tracing::debug!(total = points.len(), "no sample has a position fix, keeping all");
            }
            points
        }
    };

    if points.is_empty() {
        return Err(TraceError::EmptyTrace);
    }
    Ok(CanonicalTrace { points })
}

fn coerce_sample(s: &RawSample) -> TelemetryPoint {
    TelemetryPoint {
        ts: coerce_timestamp(&s.timestamp),
        lat: coerce_number(&s.latitude),
        lon: coerce_number(&s.longitude),
        alt: coerce_number(&s.altitude),
        speed: coerce_number(&s.speed),
        battery: coerce_number(&s.battery),
    }
}

/// Lenient numeric coercion: numbers pass through, numeric strings are
/// parsed, booleans map to 1/0, everything else (and NaN/inf) is 0.
pub fn coerce_number(v: &Value) -> f64 {
    let n = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    };
    finite_or_zero(n)
}

/// Like [`coerce_number`], but also accepts RFC 3339 strings, which are
/// converted to epoch millis.
pub fn coerce_timestamp(v: &Value) -> f64 {
    if let Value::String(s) = v {
        let s = s.trim();
        if s.parse::<f64>().is_err() {
            if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
                return (dt.unix_timestamp_nanos() / 1_000_000) as f64;
            }
        }
    }
    coerce_number(v)
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

pub fn summarize(trace: &CanonicalTrace) -> FlightSummary {
    let pts = trace.points();
    let distance_m = pts
        .windows(2)
        .map(|w| haversine_m(w[0].position(), w[1].position()))
        .sum();
    let max_altitude_m = pts.iter().map(|p| p.alt).fold(f64::NEG_INFINITY, f64::max);
    let min_battery_pct = pts.iter().map(|p| p.battery).fold(f64::INFINITY, f64::min);
    let (start_ts, end_ts) = (trace.first().ts, trace.last().ts);

    FlightSummary {
        samples: pts.len(),
        start_ts,
        end_ts,
        duration_ms: (end_ts - start_ts).max(0.0),
        distance_m,
        max_altitude_m,
        min_battery_pct,
    }
}

/// The flight path as a GeoJSON LineString (`[lon, lat]` pairs).
pub fn track_geojson(trace: &CanonicalTrace) -> Value {
    let coords: Vec<Value> = trace.points().iter().map(|p| json!([p.lon, p.lat])).collect();
    json!({
        "type": "LineString",
        "coordinates": coords
    })
}

pub fn track_points(trace: &CanonicalTrace) -> Vec<GeoPoint> {
    trace.points().iter().map(TelemetryPoint::position).collect()
}

pub fn altitude_series(trace: &CanonicalTrace) -> Vec<AltitudeSample> {
    trace
        .points()
        .iter()
        .enumerate()
        .map(|(index, p)| AltitudeSample { index, altitude: p.alt })
        .collect()
}

/// Renders an epoch-millis timestamp as RFC 3339, if it is in range.
pub fn format_ts(ts_ms: f64) -> Option<String> {
    let nanos = (ts_ms as i128).checked_mul(1_000_000)?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ts: i64, lat: f64, lon: f64, alt: f64) -> RawSample {
        RawSample {
            timestamp: json!(ts),
            latitude: json!(lat),
            longitude: json!(lon),
            altitude: json!(alt),
            speed: json!(10.0),
            battery: json!(80),
        }
    }

    fn scenario() -> Vec<RawSample> {
        vec![
            RawSample {
                timestamp: json!(0),
                latitude: json!(0),
                longitude: json!(0),
                ..Default::default()
            },
            RawSample {
                timestamp: json!(1),
                latitude: json!(48.1),
                longitude: json!(11.5),
                altitude: json!(500),
                speed: json!(40),
                battery: json!(90),
            },
            RawSample {
                timestamp: json!(2),
                latitude: json!(48.2),
                longitude: json!(11.6),
                altitude: json!(510),
                speed: json!(42),
                battery: json!(89),
            },
        ]
    }

    #[test]
    fn scenario_trims_leading_zero_fix() {
        let trace = normalize(&scenario()).unwrap();
        assert_eq!(trace.len(), 2);
        let first = trace.at(0).unwrap();
        assert_eq!((first.lat, first.lon, first.alt), (48.1, 11.5, 500.0));
        assert_eq!(first.ts, 1.0);
    }

    #[test]
    fn trims_exactly_the_leading_run() {
        let mut samples = vec![raw(0, 0.0, 0.0, 0.0), raw(1, 0.0, 0.0, 0.0), raw(2, 0.0, 0.0, 0.0)];
        samples.push(raw(3, 47.0, 8.0, 100.0));
        samples.push(raw(4, 0.0, 0.0, 0.0)); // mid-sequence dropout stays
        samples.push(raw(5, 47.1, 8.1, 110.0));

        let trace = normalize(&samples).unwrap();
        assert_eq!(trace.len(), samples.len() - 3);
        assert_eq!(trace.first().ts, 3.0);
        assert_eq!(trace.at(1).unwrap().lat, 0.0);
    }

    #[test]
    fn half_fix_counts_as_invalid() {
        let samples = vec![raw(0, 47.0, 0.0, 0.0), raw(1, 0.0, 8.0, 0.0), raw(2, 47.0, 8.0, 0.0)];
        let trace = normalize(&samples).unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.first().ts, 2.0);
    }

    #[test]
    fn all_zero_is_kept_untrimmed() {
        let samples = vec![raw(0, 0.0, 0.0, 1.0), raw(1, 0.0, 0.0, 2.0), raw(2, 0.0, 0.0, 3.0)];
        let trace = normalize(&samples).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.last().alt, 3.0);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(normalize(&[]), Err(TraceError::EmptyTrace));
    }

    #[test]
    fn malformed_fields_degrade_to_zero() {
        let s = RawSample {
            timestamp: json!("2024-05-01T10:00:00Z"),
            latitude: json!(" 48.5 "),
            longitude: json!("11.25"),
            altitude: json!("high"),
            speed: Value::Null,
            battery: json!({"pct": 50}),
        };
        let trace = normalize(&[s]).unwrap();
        let p = trace.at(0).unwrap();
        assert_eq!(p.ts, 1_714_557_600_000.0);
        assert_eq!((p.lat, p.lon), (48.5, 11.25));
        assert_eq!((p.alt, p.speed, p.battery), (0.0, 0.0, 0.0));
    }

    #[test]
    fn non_finite_strings_are_zeroed() {
        assert_eq!(coerce_number(&json!("NaN")), 0.0);
        assert_eq!(coerce_number(&json!("inf")), 0.0);
        assert_eq!(coerce_number(&json!(true)), 1.0);
        assert_eq!(coerce_number(&json!("-3.5e2")), -350.0);
    }

    #[test]
    fn deserializes_missing_fields() {
        let s: RawSample = serde_json::from_str(r#"{"latitude": 1.5}"#).unwrap();
        assert_eq!(s.longitude, Value::Null);
        assert_eq!(coerce_number(&s.latitude), 1.5);
    }

    #[test]
    fn at_out_of_range() {
        let trace = normalize(&scenario()).unwrap();
        assert_eq!(trace.at(2), Err(TraceError::IndexOutOfRange { index: 2, len: 2 }));
    }

    #[test]
    fn summary_over_trace() {
        let trace = normalize(&scenario()).unwrap();
        let s = summarize(&trace);
        assert_eq!(s.samples, 2);
        assert_eq!(s.duration_ms, 1.0);
        assert_eq!(s.max_altitude_m, 510.0);
        assert_eq!(s.min_battery_pct, 89.0);
        // 0.1 deg lat + 0.1 deg lon around 48N is roughly 13.4 km
        assert!(s.distance_m > 13_000.0 && s.distance_m < 14_000.0, "{}", s.distance_m);
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_m(GeoPoint { lat: 0.0, lon: 0.0 }, GeoPoint { lat: 1.0, lon: 0.0 });
        assert!((d - 111_195.0).abs() < 1.0, "{}", d);
    }

    #[test]
    fn geojson_uses_lon_lat_order() {
        let trace = normalize(&scenario()).unwrap();
        let g = track_geojson(&trace);
        assert_eq!(g["type"], "LineString");
        assert_eq!(g["coordinates"][0], json!([11.5, 48.1]));
        assert_eq!(g["coordinates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn altitude_series_is_indexed_by_position() {
        let trace = normalize(&scenario()).unwrap();
        let series = altitude_series(&trace);
        assert_eq!(series[1], AltitudeSample { index: 1, altitude: 510.0 });
    }

    #[test]
    fn formats_epoch_millis() {
        assert_eq!(format_ts(1_714_557_600_000.0).as_deref(), Some("2024-05-01T10:00:00Z"));
    }
}
