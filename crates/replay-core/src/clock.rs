use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{ReplayError, SinkError, TickSink, Timeline, TraceError};

pub const DEFAULT_SPEED: f64 = 10.0;

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Multiple of real time; one sample is consumed every `1000 / speed` ms.
    pub speed: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { speed: DEFAULT_SPEED }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEnd {
    /// Every point was delivered.
    Completed { ticks: usize },
    /// `stop()` was called; `cursor` is the next index that would have played.
    Stopped { cursor: usize },
    SinkFailed { index: usize, error: SinkError },
    TimelineFailed(TraceError),
    /// The session task panicked; `cursor` is where it was.
    Panicked { cursor: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStatus {
    Idle,
    Running { session: Uuid },
    Finished { session: Uuid, end: ReplayEnd },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub cursor: usize,
    pub len: usize,
    pub speed: f64,
    pub active: bool,
}

struct ReplaySession {
    id: Uuid,
    timeline: Arc<dyn Timeline>,
    sink: Arc<dyn TickSink>,
    speed: f64,
    cursor: usize,
    active: bool,
    // Taken exactly once, by whoever ends the session.
    task: Option<JoinHandle<()>>,
}

struct Shared {
    // Current session, or the last one once it has ended.
    session: Mutex<Option<ReplaySession>>,
    status: watch::Sender<ReplayStatus>,
}

impl Shared {
    fn finish(&self, s: &mut ReplaySession, end: ReplayEnd) {
        s.active = false;
        // Dropping the handle of our own task just detaches it.
        drop(s.task.take());
        self.status.send_replace(ReplayStatus::Finished { session: s.id, end });
    }
}

/// Drives one replay at a time over a [`Timeline`], pushing each point into
/// a [`TickSink`].
///
/// `start` while a session is running is ignored. Ticks of a session never
/// overlap: the sink call for index `i` returns before the wait for `i + 1`
/// begins. Dropping the clock stops any running session.
pub struct ReplayClock {
    shared: Arc<Shared>,
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayClock {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ReplayStatus::Idle);
        Self { shared: Arc::new(Shared { session: Mutex::new(None), status }) }
    }

    /// Starts a session at `speed` times real time. Returns `Ok(false)`
    /// without touching anything if a session is already active.
    ///
    /// The first tick fires one period after this call.
    pub fn start(
        &self,
        timeline: Arc<dyn Timeline>,
        speed: f64,
        sink: Arc<dyn TickSink>,
    ) -> Result<bool, ReplayError> {
        let mut slot = self.shared.session.lock();
        if let Some(s) = slot.as_ref().filter(|s| s.active) {
            debug!(session = %s.id, "replay already running, start ignored");
            return Ok(false);
        }

        if !(speed.is_finite() && speed > 0.0) {
            return Err(ReplayError::InvalidSpeed(speed));
        }
        let period = Duration::try_from_secs_f64(1.0 / speed)
            .ok()
            .filter(|p| !p.is_zero())
            .ok_or(ReplayError::InvalidSpeed(speed))?;
        let first = Instant::now()
            .checked_add(period)
            .ok_or(ReplayError::InvalidSpeed(speed))?;
        if timeline.is_empty() {
            return Err(TraceError::EmptyTrace.into());
        }
        let rt = Handle::try_current().map_err(|_| ReplayError::NoRuntime)?;

        let id = Uuid::new_v4();
        let len = timeline.len();
        // The task blocks on the session lock until the slot below is filled.
        let task = rt.spawn(run_session(self.shared.clone(), id, first, period));
        *slot = Some(ReplaySession {
            id,
            timeline,
            sink,
            speed,
            cursor: 0,
            active: true,
            task: Some(task),
        });
        self.shared.status.send_replace(ReplayStatus::Running { session: id });
        info!(session = %id, points = len, speed, period_ms = period.as_secs_f64() * 1000.0, "replay started");
        Ok(true)
    }

    /// Cancels the running session, keeping its cursor. No-op when idle.
    pub fn stop(&self) {
        let mut slot = self.shared.session.lock();
        let Some(s) = slot.as_mut().filter(|s| s.active) else {
            return;
        };
        if let Some(task) = s.task.take() {
            task.abort();
        }
        let cursor = s.cursor;
        s.active = false;
        self.shared
            .status
            .send_replace(ReplayStatus::Finished { session: s.id, end: ReplayEnd::Stopped { cursor } });
        info!(session = %s.id, cursor, "replay stopped");
    }

    pub fn is_active(&self) -> bool {
        self.shared.session.lock().as_ref().map_or(false, |s| s.active)
    }

    /// Snapshot of the current or most recent session.
    pub fn session(&self) -> Option<SessionInfo> {
        self.shared.session.lock().as_ref().map(|s| SessionInfo {
            id: s.id,
            cursor: s.cursor,
            len: s.timeline.len(),
            speed: s.speed,
            active: s.active,
        })
    }

    pub fn status(&self) -> ReplayStatus {
        self.shared.status.borrow().clone()
    }

    /// Waits until no session is running and reports how the last one
    /// ended. `Ok(None)` if nothing was ever started. A failed sink or
    /// timeline surfaces as an error here.
    pub async fn wait(&self) -> Result<Option<ReplayEnd>, ReplayError> {
        let mut rx = self.shared.status.subscribe();
        let status = match rx.wait_for(|s| !matches!(s, ReplayStatus::Running { .. })).await {
            Ok(s) => s.clone(),
            // the sender lives as long as `self`
            Err(_) => return Ok(None),
        };
        match status {
            ReplayStatus::Idle | ReplayStatus::Running { .. } => Ok(None),
            ReplayStatus::Finished { end, .. } => match end {
                ReplayEnd::SinkFailed { index, error } => Err(ReplayError::Sink { index, source: error }),
                ReplayEnd::TimelineFailed(e) => Err(e.into()),
                ReplayEnd::Panicked { cursor } => Err(ReplayError::Panicked { cursor }),
                end => Ok(Some(end)),
            },
        }
    }
}

impl Drop for ReplayClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ends the session if the task unwinds without having finished it.
struct PanicGuard {
    shared: Arc<Shared>,
    id: Uuid,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut slot = self.shared.session.lock();
        if let Some(s) = slot.as_mut().filter(|s| s.id == self.id && s.active) {
            let cursor = s.cursor;
            error!(session = %self.id, cursor, "replay task panicked");
            self.shared.finish(s, ReplayEnd::Panicked { cursor });
        }
    }
}

async fn run_session(shared: Arc<Shared>, id: Uuid, first: Instant, period: Duration) {
    let _guard = PanicGuard { shared: shared.clone(), id };
    let mut ticker = time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let (point, index, sink) = {
            let mut slot = shared.session.lock();
            let Some(s) = slot.as_mut().filter(|s| s.id == id && s.active) else {
                return;
            };
            if s.cursor >= s.timeline.len() {
                let ticks = s.cursor;
                info!(session = %id, ticks, "replay completed");
                shared.finish(s, ReplayEnd::Completed { ticks });
                return;
            }
            let index = s.cursor;
            let looked_up = s.timeline.at(index);
            match looked_up {
                Ok(p) => (p, index, s.sink.clone()),
                Err(e) => {
                    error!(session = %id, index, error = %e, "timeline lookup failed");
                    shared.finish(s, ReplayEnd::TimelineFailed(e));
                    return;
                }
            }
        };

        // Sinks run without the lock held so they may call back into the clock.
        let outcome = catch_unwind(AssertUnwindSafe(|| sink.on_tick(&point, index)))
            .unwrap_or_else(|_| Err(SinkError::new(sink.name(), "panicked during tick")));

        let mut slot = shared.session.lock();
        let Some(s) = slot.as_mut().filter(|s| s.id == id && s.active) else {
            return;
        };
        match outcome {
            Ok(()) => s.cursor = index + 1,
            Err(e) => {
                error!(session = %id, index, sink = %e.sink, error = %e.message, "sink failed, ending replay");
                shared.finish(s, ReplayEnd::SinkFailed { index, error: e });
                return;
            }
        }
    }
}
