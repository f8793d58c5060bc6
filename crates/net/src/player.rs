//! Background replay playback.
//!
//! One worker thread reads frames and posts the decoded packets to the owner
//! over a channel; it never touches game state. The worker sleeps on a
//! condition variable until the next frame is due (scaled by the playback
//! speed) and is woken early by start, stop, speed changes and fast-forward.
//!
//! Every `start`/`stop` bumps a session counter. Events carry the session they
//! were produced for, so anything still queued from an old session is dropped
//! by [`ReplayPlayer::drain`].

use crate::packet::Packet;
use crate::replay::{ReplayError, ReplayFrame, ReplayHeader, ReplayReader, ReplaySummary};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a playback session ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Every frame was delivered.
    EndOfReplay,
    /// A frame could not be read or decoded.
    Failed(String),
}

/// Message from the worker to the owning thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A recorded packet is due.
    Packet {
        /// Session the packet belongs to.
        session: u64,
        /// Decoded packet.
        packet: Packet,
    },
    /// The session ended; the owner should disconnect and reset.
    Finished {
        /// Session that ended.
        session: u64,
        /// Why it ended.
        reason: FinishReason,
    },
}

impl PlaybackEvent {
    /// Session the event belongs to.
    pub fn session(&self) -> u64 {
        match self {
            PlaybackEvent::Packet { session, .. } | PlaybackEvent::Finished { session, .. } => {
                *session
            }
        }
    }
}

/// Scaled playback position.
///
/// Position advances at `speed` replay-seconds per wall-clock second. All
/// methods take the current instant so the clock is deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    position_nanos: f64,
    anchor: Instant,
    speed: f32,
}

impl PlaybackClock {
    /// Clock at position zero.
    pub fn new(speed: f32, now: Instant) -> Self {
        Self {
            position_nanos: 0.0,
            anchor: now,
            speed: sanitize_speed(speed),
        }
    }

    /// Current speed multiplier.
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Position at `now`, in nanoseconds.
    pub fn position_nanos(&self, now: Instant) -> f64 {
        let wall = now.saturating_duration_since(self.anchor).as_nanos() as f64;
        self.position_nanos + wall * f64::from(self.speed)
    }

    /// Position at `now`.
    pub fn position(&self, now: Instant) -> Duration {
        Duration::from_nanos(self.position_nanos(now).max(0.0) as u64)
    }

    /// Change speed without moving the position.
    pub fn set_speed(&mut self, speed: f32, now: Instant) {
        self.position_nanos = self.position_nanos(now);
        self.anchor = now;
        self.speed = sanitize_speed(speed);
    }

    /// Jump forward.
    pub fn skip(&mut self, by: Duration) {
        self.position_nanos += by.as_nanos() as f64;
    }

    /// Wall-clock instant at which the position reaches `target_nanos`.
    ///
    /// `None` while paused.
    pub fn deadline(&self, target_nanos: i64, now: Instant) -> Option<Instant> {
        if self.speed <= 0.0 {
            return None;
        }
        let remaining = target_nanos as f64 - self.position_nanos(now);
        if remaining <= 0.0 {
            return Some(now);
        }
        let wall = remaining / f64::from(self.speed);
        Some(now + Duration::from_nanos(wall.ceil().min(u64::MAX as f64) as u64))
    }
}

fn sanitize_speed(speed: f32) -> f32 {
    if speed.is_finite() {
        speed.max(0.0)
    } else {
        0.0
    }
}

struct PlayState {
    session: u64,
    // A file is attached; stays set while the worker reads with the lock released.
    active: bool,
    reader: Option<ReplayReader>,
    pending: Option<ReplayFrame>,
    clock: PlaybackClock,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PlayState>,
    wake: Condvar,
}

/// Plays replay files back on a background worker.
pub struct ReplayPlayer {
    shared: Arc<Shared>,
    events: Receiver<PlaybackEvent>,
    worker: Option<JoinHandle<()>>,
    summary: Option<ReplaySummary>,
}

impl ReplayPlayer {
    /// Spawn the worker. It idles until [`ReplayPlayer::start`].
    pub fn new() -> Result<Self, ReplayError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PlayState {
                session: 0,
                active: false,
                reader: None,
                pending: None,
                clock: PlaybackClock::new(1.0, Instant::now()),
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let (tx, events) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("replay-player".into())
            .spawn(move || run_worker(&worker_shared, &tx))?;

        Ok(Self {
            shared,
            events,
            worker: Some(worker),
            summary: None,
        })
    }

    /// Begin playing `path` from the start.
    ///
    /// The file is read once for [`ReplaySummary`], then reopened for
    /// playback. Returns the header so the caller can synthesize the
    /// session's connect packet before the first frame is handled.
    pub fn start(&mut self, path: impl AsRef<Path>) -> Result<ReplayHeader, ReplayError> {
        let path = path.as_ref();
        let summary = ReplaySummary::scan(path)?;
        let reader = ReplayReader::open(path)?;
        let header = reader.header().clone();

        let mut state = self.shared.state.lock();
        state.session += 1;
        state.active = true;
        state.reader = Some(reader);
        state.pending = None;
        let speed = state.clock.speed();
        state.clock = PlaybackClock::new(speed, Instant::now());
        let session = state.session;
        drop(state);
        self.shared.wake.notify_all();

        info!(
            ?path,
            session,
            frames = summary.frames,
            duration = ?summary.duration(),
            "replay playback started"
        );
        self.summary = Some(summary);
        Ok(header)
    }

    /// Detach the current file. Idempotent.
    pub fn stop(&mut self) {
        let mut state = self.shared.state.lock();
        let was_active = state.active;
        state.session += 1;
        state.active = false;
        state.reader = None;
        state.pending = None;
        drop(state);
        self.shared.wake.notify_all();
        if was_active {
            debug!("replay playback stopped");
        }
    }

    /// Whether a file is attached.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Current session number.
    pub fn session(&self) -> u64 {
        self.shared.state.lock().session
    }

    /// Set the speed multiplier. `0` pauses; negative or non-finite values pause.
    pub fn set_speed(&self, speed: f32) {
        self.shared.state.lock().clock.set_speed(speed, Instant::now());
        self.shared.wake.notify_all();
    }

    /// Current speed multiplier.
    pub fn speed(&self) -> f32 {
        self.shared.state.lock().clock.speed()
    }

    /// Move the playback position forward; frames skipped over are delivered
    /// immediately, in order.
    pub fn fast_forward(&self, by: Duration) {
        self.shared.state.lock().clock.skip(by);
        self.shared.wake.notify_all();
    }

    /// Replay time reached.
    pub fn elapsed(&self) -> Duration {
        self.shared.state.lock().clock.position(Instant::now())
    }

    /// Summary of the file passed to the last successful `start`.
    pub fn summary(&self) -> Option<&ReplaySummary> {
        self.summary.as_ref()
    }

    /// Take every queued event of the current session.
    pub fn drain(&self) -> Vec<PlaybackEvent> {
        let session = self.session();
        self.events
            .try_iter()
            .filter(|event| event.session() == session)
            .collect()
    }

    /// Wait up to `timeout` for the next event of the current session.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PlaybackEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok(event) if event.session() == self.session() => return Some(event),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }
}

impl Drop for ReplayPlayer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.active = false;
            state.reader = None;
            state.pending = None;
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("replay worker panicked");
            }
        }
    }
}

fn run_worker(shared: &Shared, tx: &Sender<PlaybackEvent>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        if state.reader.is_none() && state.pending.is_none() {
            shared.wake.wait(&mut state);
            continue;
        }

        if state.pending.is_none() {
            if !fetch_next(&mut state, tx) {
                break;
            }
            continue;
        }

        let now = Instant::now();
        let due = match &state.pending {
            Some(frame) => frame.elapsed_nanos,
            None => continue,
        };
        if state.clock.position_nanos(now) >= due as f64 {
            let session = state.session;
            let Some(frame) = state.pending.take() else {
                continue;
            };
            let event = match frame.packet() {
                Ok(packet) => PlaybackEvent::Packet { session, packet },
                Err(err) => finish(&mut state, FinishReason::Failed(err.to_string())),
            };
            if tx.send(event).is_err() {
                break;
            }
            continue;
        }

        match state.clock.deadline(due, now) {
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
            None => shared.wake.wait(&mut state),
        }
    }
}

/// Read the next frame with the lock released. Returns `false` when the
/// owner has gone away.
fn fetch_next(state: &mut MutexGuard<'_, PlayState>, tx: &Sender<PlaybackEvent>) -> bool {
    let session = state.session;
    let Some(mut reader) = state.reader.take() else {
        return true;
    };
    let result = MutexGuard::unlocked(state, || reader.next_frame());

    if state.session != session || state.shutdown {
        // Stopped or restarted while reading; the reader is stale.
        return true;
    }

    let event = match result {
        Ok(Some(frame)) => {
            state.reader = Some(reader);
            state.pending = Some(frame);
            return true;
        }
        Ok(None) => finish(state, FinishReason::EndOfReplay),
        Err(err) => {
            warn!(%err, "replay read failed");
            finish(state, FinishReason::Failed(err.to_string()))
        }
    };
    tx.send(event).is_ok()
}

fn finish(state: &mut PlayState, reason: FinishReason) -> PlaybackEvent {
    state.active = false;
    state.reader = None;
    state.pending = None;
    info!(session = state.session, ?reason, "replay playback finished");
    PlaybackEvent::Finished {
        session: state.session,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_scales_with_speed() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(2.0, t0);
        let t1 = t0 + Duration::from_millis(100);
        assert_eq!(clock.position(t1), Duration::from_millis(200));

        clock.set_speed(0.0, t1);
        let t2 = t1 + Duration::from_secs(10);
        assert_eq!(clock.position(t2), Duration::from_millis(200));
        assert!(clock.deadline(300_000_000, t2).is_none());

        clock.set_speed(1.0, t2);
        let deadline = clock.deadline(300_000_000, t2).unwrap();
        assert_eq!(deadline - t2, Duration::from_millis(100));
    }

    #[test]
    fn test_clock_skip_and_past_deadline() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(1.0, t0);
        clock.skip(Duration::from_secs(5));
        assert_eq!(clock.position(t0), Duration::from_secs(5));
        assert_eq!(clock.deadline(1_000, t0), Some(t0));
    }

    #[test]
    fn test_bad_speed_pauses() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(f32::NAN, t0);
        assert_eq!(clock.speed(), 0.0);
        clock.set_speed(-3.0, t0);
        assert_eq!(clock.speed(), 0.0);
    }

    #[test]
    fn test_idle_player_shuts_down() {
        let mut player = ReplayPlayer::new().unwrap();
        assert!(!player.is_active());
        player.stop();
        assert!(player.drain().is_empty());
        drop(player);
    }
}
