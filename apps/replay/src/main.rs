mod commands;
mod session;
mod sinks;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::*;
use replay_core::{channel, ChannelSink, ChartSink, MapSink, ReplayConfig, SinkFanout, DEFAULT_SPEED};
use replay_source_fs::{FsSampleSource, FsSourceConfig};
use session::AppSession;
use sinks::{join_event_writer, spawn_event_writer, TerminalChart, TerminalMap};

/// Replays a recorded flight on a terminal map and altitude chart.
#[derive(Parser, Debug)]
#[command(name = "flight-replay", version)]
struct Cli {
    /// Flight id: file stem of a .json, .csv or .ndjson file in the data dir
    flight: Option<String>,
    /// Directory with flight files
    #[arg(long, env = "FLIGHT_REPLAY_DATA")]
    data: Option<PathBuf>,
    /// Multiple of real time
    #[arg(long, env = "FLIGHT_REPLAY_SPEED", default_value_t = DEFAULT_SPEED)]
    speed: f64,
    /// List available flights and exit
    #[arg(long)]
    list: bool,
    /// Print the flight summary as JSON before replaying
    #[arg(long)]
    summary: bool,
    /// Print the flight path as GeoJSON before replaying
    #[arg(long)]
    track: bool,
    /// Also write every tick as NDJSON to stdout
    #[arg(long)]
    events: bool,
    /// Write the normalized trace (.ndjson or .csv) and exit
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data.clone().unwrap_or_else(|| {
        dirs_next::data_dir()
            .map(|d| d.join("flight-replay").join("flights"))
            .unwrap_or_else(|| FsSourceConfig::default().root)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = FsSourceConfig { root: data_dir(&cli) };
    tracing::debug!(root = %cfg.root.display(), "using flight directory");

    if cli.list {
        for id in list_flights(&FsSampleSource::new(cfg)).await.map_err(|e| anyhow!(e))? {
            println!("{}", id);
        }
        return Ok(());
    }
    let flight = cli.flight.as_deref().context("no flight id given (see --list)")?;

    let mut fanout = SinkFanout::new()
        .with(Arc::new(MapSink::new(TerminalMap::default())))
        .with(Arc::new(ChartSink::new(TerminalChart::default())));
    let mut writer = None;
    if cli.events {
        let (tx, rx) = channel();
        fanout.push(Arc::new(ChannelSink::new(tx)));
        writer = Some(spawn_event_writer(rx));
    }

    let sess = AppSession::new(Box::new(FsSampleSource::new(cfg)), fanout, ReplayConfig { speed: cli.speed });
    let summary = load_flight(&sess, flight).await.map_err(|e| anyhow!(e))?;
    tracing::info!(
        flight,
        samples = summary.samples,
        start = %analysis::format_ts(summary.start_ts).unwrap_or_default(),
        duration_s = summary.duration_ms / 1000.0,
        distance_m = summary.distance_m.round(),
        max_alt_m = summary.max_altitude_m,
        min_battery = summary.min_battery_pct,
        "flight summary"
    );

    if cli.summary {
        let summary = flight_summary(&sess).map_err(|e| anyhow!(e))?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    if cli.track {
        println!("{}", flight_track(&sess).map_err(|e| anyhow!(e))?);
    }
    if let Some(dest) = &cli.export {
        let written = export_flight(&sess, dest).map_err(|e| anyhow!(e))?;
        tracing::info!(path = %written, "trace exported");
        return Ok(());
    }

    start_replay(&sess).map_err(|e| anyhow!(e))?;
    let outcome = tokio::select! {
        r = sess.clock().wait() => r,
        _ = tokio::signal::ctrl_c() => {
            stop_replay(&sess).map_err(|e| anyhow!(e))?;
            sess.clock().wait().await
        }
    };
    let status = replay_status(&sess);
    tracing::info!(state = %status.state, cursor = ?status.cursor, "replay finished");

    // closes the event channel so the writer drains and exits
    drop(sess);
    if let Some(w) = writer {
        join_event_writer(w);
    }
    outcome?;
    Ok(())
}
