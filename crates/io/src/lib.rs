use anyhow::{Context, Result};
use serde_json::Value;
use std::{fs::File, io::{BufRead, BufReader, Read, Write}, path::Path};
use model::*;

// Accepted header spellings per field, first match wins. The first entry is
// what the drone log exporter writes.
const TIME_COLS: &[&str] = &["time(ms)", "timestamp", "ts"];
const LAT_COLS: &[&str] = &["latitude", "lat"];
const LON_COLS: &[&str] = &["longitude", "lon", "lng"];
const ALT_COLS: &[&str] = &["height(m)", "altitude", "alt"];
const SPEED_COLS: &[&str] = &["velocity(m/s)", "speed"];
const BATTERY_COLS: &[&str] = &["battery(%)", "battery"];

/// Reads a drone flight log. Cells are kept as raw strings; coercion and
/// validation happen in the normalizer, so a bad cell never fails the file.
pub fn import_csv(path: &Path) -> Result<Vec<RawSample>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    read_csv(f).with_context(|| format!("read {}", path.display()))
}

pub fn read_csv<R: Read>(rdr: R) -> Result<Vec<RawSample>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(rdr);
    let headers = rdr.headers()?.clone();
    let col = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let (t, lat, lon, alt, spd, batt) = (
        col(TIME_COLS), col(LAT_COLS), col(LON_COLS),
        col(ALT_COLS), col(SPEED_COLS), col(BATTERY_COLS),
    );

    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| rec.get(i))
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null)
        };
        out.push(RawSample {
            timestamp: cell(t),
            latitude: cell(lat),
            longitude: cell(lon),
            altitude: cell(alt),
            speed: cell(spd),
            battery: cell(batt),
        });
    }
    Ok(out)
}

/// Reads the samples endpoint payload: a JSON array of sample objects.
pub fn import_json(path: &Path) -> Result<Vec<RawSample>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let samples = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(samples)
}

pub fn import_ndjson(path: &Path) -> Result<Vec<TelemetryPoint>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let rdr = BufReader::new(f);
    let mut points = vec![];
    for (n, line) in rdr.lines().enumerate() {
        let s = line?;
        if s.trim().is_empty() { continue; }
        let p: TelemetryPoint = serde_json::from_str(&s)
            .with_context(|| format!("{}:{}", path.display(), n + 1))?;
        points.push(p);
    }
    Ok(points)
}

pub fn export_ndjson(points: &[TelemetryPoint], path: &Path) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = std::io::BufWriter::new(f);
    for p in points {
        let s = serde_json::to_string(p)?;
        writeln!(w, "{}", s)?;
    }
    w.flush()?;
    Ok(())
}

pub fn export_csv(points: &[TelemetryPoint], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for p in points {
        w.serialize(p)?;
    }
    w.flush()?;
    Ok(())
}
