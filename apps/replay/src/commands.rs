// apps/replay/src/commands.rs
// One function per user action. Errors come back as display strings.
use std::path::Path;

use model::FlightSummary;
use analysis as an;
use replay_core::{ReplayEnd, ReplayStatus};
use replay_source_fs::FsSampleSource;
use serde::Serialize;

use crate::session::AppSession;

fn show(e: impl std::fmt::Display) -> String {
    format!("{:#}", e)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct StatusView {
    pub flight: Option<String>,
    pub active: bool,
    pub cursor: Option<usize>,
    pub len: Option<usize>,
    pub state: String,
}

pub async fn list_flights(source: &FsSampleSource) -> Result<Vec<String>, String> {
    source.list_flights().await.map_err(show)
}

pub async fn load_flight(sess: &AppSession, flight_id: &str) -> Result<FlightSummary, String> {
    sess.load_flight(flight_id).await.map_err(show)
}

pub fn start_replay(sess: &AppSession) -> Result<bool, String> {
    sess.start_replay().map_err(show)
}

pub fn stop_replay(sess: &AppSession) -> Result<(), String> {
    sess.stop_replay();
    Ok(())
}

pub fn replay_status(sess: &AppSession) -> StatusView {
    let info = sess.clock().session();
    let state = match sess.clock().status() {
        ReplayStatus::Idle => "idle".to_string(),
        ReplayStatus::Running { .. } => "running".to_string(),
        ReplayStatus::Finished { end: ReplayEnd::Completed { .. }, .. } => "completed".to_string(),
        ReplayStatus::Finished { end: ReplayEnd::Stopped { .. }, .. } => "stopped".to_string(),
        ReplayStatus::Finished { end: ReplayEnd::SinkFailed { error, .. }, .. } => format!("failed: {}", error),
        ReplayStatus::Finished { end: ReplayEnd::TimelineFailed(e), .. } => format!("failed: {}", e),
        ReplayStatus::Finished { end: ReplayEnd::Panicked { .. }, .. } => "failed: replay task panicked".to_string(),
    };
    StatusView {
        flight: sess.with_flight(|f| f.id.clone()).ok(),
        active: info.map_or(false, |i| i.active),
        cursor: info.map(|i| i.cursor),
        len: info.map(|i| i.len),
        state,
    }
}

pub fn flight_summary(sess: &AppSession) -> Result<FlightSummary, String> {
    sess.with_flight(|f| f.summary.clone()).map_err(show)
}

pub fn flight_track(sess: &AppSession) -> Result<serde_json::Value, String> {
    sess.with_flight(|f| an::track_geojson(&f.trace)).map_err(show)
}

pub fn export_flight(sess: &AppSession, dest: &Path) -> Result<String, String> {
    let trace = sess.with_flight(|f| f.trace.clone()).map_err(show)?;
    let res = match dest.extension().and_then(|e| e.to_str()) {
        Some("csv") => iox::export_csv(trace.points(), dest),
        _ => iox::export_ndjson(trace.points(), dest),
    };
    res.map_err(show)?;
    Ok(dest.display().to_string())
}
