use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use serde_json::json;
use model::{RawSample, TelemetryPoint};
use replay_core::{ReplayError, SampleSource};

#[derive(Clone, Debug)]
pub struct FsSourceConfig {
    /// Directory holding `<flight id>.json|.csv|.ndjson` files
    pub root: PathBuf,
}

impl Default for FsSourceConfig {
    fn default() -> Self {
        Self { root: PathBuf::from("flights") }
    }
}

/// Lookup order when several files exist for one flight.
const EXTENSIONS: [&str; 3] = ["json", "csv", "ndjson"];

pub struct FsSampleSource {
    cfg: FsSourceConfig,
}

impl FsSampleSource {
    pub fn new(cfg: FsSourceConfig) -> Self { Self { cfg } }

    fn locate(&self, flight_id: &str) -> anyhow::Result<PathBuf> {
        let bad = flight_id.is_empty()
            || flight_id.contains(|c: char| c == '/' || c == '\\')
            || flight_id.starts_with('.');
        if bad {
            return Err(anyhow!("invalid flight id {:?}", flight_id));
        }
        EXTENSIONS
            .iter()
            .map(|ext| self.cfg.root.join(format!("{}.{}", flight_id, ext)))
            .find(|p| p.is_file())
            .ok_or_else(|| anyhow!("flight {} not found in {}", flight_id, self.cfg.root.display()))
    }

    /// Flight ids available under the root, sorted.
    pub async fn list_flights(&self) -> anyhow::Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.cfg.root).await
            .with_context(|| format!("read dir {}", self.cfg.root.display()))?;
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let known = path.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| EXTENSIONS.contains(&e));
            if !known { continue; }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl SampleSource for FsSampleSource {
    async fn fetch_samples(&self, flight_id: &str) -> Result<Vec<RawSample>, ReplayError> {
        let path = self.locate(flight_id).map_err(ReplayError::Transport)?;
        tracing::debug!(flight = flight_id, path = %path.display(), "reading samples");
        let samples = tokio::task::spawn_blocking(move || read_samples(&path))
            .await
            .context("sample reader task failed")
            .and_then(|r| r)
            .map_err(ReplayError::Transport)?;
        Ok(samples)
    }
}

fn read_samples(path: &Path) -> anyhow::Result<Vec<RawSample>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => flight_io::import_csv(path),
        Some("ndjson") => Ok(flight_io::import_ndjson(path)?.iter().map(to_raw).collect()),
        _ => flight_io::import_json(path),
    }
}

fn to_raw(p: &TelemetryPoint) -> RawSample {
    RawSample {
        timestamp: json!(p.ts),
        latitude: json!(p.lat),
        longitude: json!(p.lon),
        altitude: json!(p.alt),
        speed: json!(p.speed),
        battery: json!(p.battery),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::{load_trace, Timeline};

    fn source(dir: &Path) -> FsSampleSource {
        FsSampleSource::new(FsSourceConfig { root: dir.to_path_buf() })
    }

    #[tokio::test]
    async fn reads_csv_flight() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("12.csv"),
            "time(ms),latitude,longitude,height(m),velocity(m/s),battery(%)\n\
             0,0,0,0,0,100\n\
             100,48.1,11.5,500,40,90\n",
        ).unwrap();
        let trace = load_trace(&source(dir.path()), "12").await.unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.at(0).unwrap().alt, 500.0);
    }

    #[tokio::test]
    async fn reads_ndjson_flight() {
        let dir = tempfile::tempdir().unwrap();
        let pts = [TelemetryPoint { ts: 5.0, lat: 1.0, lon: 2.0, alt: 3.0, speed: 4.0, battery: 5.0 }];
        flight_io::export_ndjson(&pts, &dir.path().join("a.ndjson")).unwrap();
        let raw = source(dir.path()).fetch_samples("a").await.unwrap();
        assert_eq!(raw, vec![to_raw(&pts[0])]);
    }

    #[tokio::test]
    async fn missing_flight_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = source(dir.path()).fetch_samples("404").await.unwrap_err();
        assert!(matches!(err, ReplayError::Transport(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["../etc/passwd", "a/b", "", ".hidden"] {
            let err = source(dir.path()).fetch_samples(id).await.unwrap_err();
            assert!(err.to_string().contains("invalid flight id"), "{}", id);
        }
    }

    #[tokio::test]
    async fn lists_known_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["b.csv", "a.json", "a.csv", "notes.txt"] {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        let ids = source(dir.path()).list_flights().await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
