//! Control surface: start, stop, status and progress
//!
//! [`Conductor`] owns the single playback slot. `start` spawns one worker
//! thread per session and rejects a second start while a session exists;
//! `status` and `progress` read a small session record under an `RwLock`;
//! `stop` cancels the worker and halts the board over the serial link even
//! when nothing is playing.
//!
//! At most one connection is open at a time. The worker holds the link
//! lock from connect to exit; a stop either borrows the session's link or,
//! with no session, takes the lock and connects itself.

use crate::config::TimingConfig;
use crate::library::SongLibrary;
use crate::playback::{
    perform, stop_and_reset, CancelToken, PlaybackError, SessionPhase, SessionReport,
};
use crossbeam::channel::{Receiver, Sender};
use fretbot_core::{Arrangement, Calibration, CommandCatalog, ACTUATOR_COUNT};
use fretbot_link::{Connector, Link};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

/// How often a stop re-checks for a link while a session is connecting
const LINK_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { song: String },
    /// Another session holds the link; nothing was queued
    AlreadyPlaying { song: String },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping { song: String },
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Playing { song: String, phase: SessionPhase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Idle,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub state: ProgressState,
    /// Share of the song played, in `0.0..=1.0`
    pub fraction: f64,
}

struct Session {
    id: u64,
    song: String,
    phase: SessionPhase,
    /// Host time the SYNC packet went out
    synced_at: Option<Instant>,
    estimate_ms: u32,
    link: Option<Link>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    library: SongLibrary,
    catalog: CommandCatalog,
    neutral: [i16; ACTUATOR_COUNT],
    config: TimingConfig,
    session: RwLock<Option<Session>>,
    cancel: CancelToken,
    stop_lock: Mutex<()>,
    /// Held by whoever has a connection open
    link_lock: Mutex<()>,
    next_id: AtomicU64,
    reports_tx: Sender<SessionReport>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }

    fn own_link(&self) -> MutexGuard<'_, ()> {
        self.link_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_own_link(&self) -> Option<MutexGuard<'_, ()>> {
        match self.link_lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Apply `f` to the session if it is still the one with `id`
    fn update(&self, id: u64, f: impl FnOnce(&mut Session)) {
        if let Some(session) = self.write().as_mut().filter(|s| s.id == id) {
            f(session);
        }
    }
}

/// Clears the session slot when the worker exits, whichever way it exits
struct SessionGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut slot = self.shared.write();
        if slot.as_ref().is_some_and(|s| s.id == self.id) {
            *slot = None;
        }
    }
}

pub struct Conductor {
    shared: Arc<Shared>,
    reports_rx: Receiver<SessionReport>,
}

impl Conductor {
    pub fn new(
        connector: Arc<dyn Connector>,
        calibration: &Calibration,
        library: SongLibrary,
        config: TimingConfig,
    ) -> Self {
        let (reports_tx, reports_rx) = crossbeam::channel::unbounded();
        let shared = Shared {
            connector,
            library,
            catalog: CommandCatalog::from_calibration(calibration),
            neutral: calibration.neutral_angles(),
            config,
            session: RwLock::new(None),
            cancel: CancelToken::new(),
            stop_lock: Mutex::new(()),
            link_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            reports_tx,
        };
        Self {
            shared: Arc::new(shared),
            reports_rx,
        }
    }

    /// Receives one report per finished session
    pub fn reports(&self) -> Receiver<SessionReport> {
        self.reports_rx.clone()
    }

    /// Start playing `name` in the background
    ///
    /// # Errors
    /// A song that fails to parse or resolve is reported here, before any
    /// serial traffic; so is a failure to spawn the worker.
    pub fn start(&self, name: &str) -> Result<StartOutcome, PlaybackError> {
        let mut slot = self.shared.write();
        if let Some(active) = slot.as_ref() {
            log::info!("[play] Rejected '{}': '{}' is playing", name, active.song);
            return Ok(StartOutcome::AlreadyPlaying {
                song: active.song.clone(),
            });
        }

        let Some(song) = self.shared.library.load(name)? else {
            return Ok(StartOutcome::NotFound);
        };

        let config = &self.shared.config;
        let estimate_ms = Arrangement::new(&song, &self.shared.catalog, config.timing())?
            .estimate_duration_ms(config.sync_delay_ms, config.end_slack_ms);

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.cancel.clear();
        *slot = Some(Session {
            id,
            song: name.to_string(),
            phase: SessionPhase::Syncing,
            synced_at: None,
            estimate_ms,
            link: None,
        });

        let shared = Arc::clone(&self.shared);
        let song_name = name.to_string();
        let spawned = thread::Builder::new()
            .name("fretbot-session".into())
            .spawn(move || {
                let owner = shared.own_link();
                let guard = SessionGuard {
                    shared: Arc::clone(&shared),
                    id,
                };

                let result = shared
                    .connector
                    .connect()
                    .map_err(PlaybackError::from)
                    .and_then(|link| {
                        shared.update(id, |s| s.link = Some(link.clone()));
                        perform(
                            &song,
                            &link,
                            &shared.catalog,
                            &shared.config,
                            &shared.cancel,
                            &mut |phase| {
                                shared.update(id, |s| {
                                    if phase == SessionPhase::Streaming {
                                        s.synced_at = Some(Instant::now());
                                    }
                                    if s.phase != SessionPhase::Stopping {
                                        s.phase = phase;
                                    }
                                })
                            },
                        )
                    });

                match &result {
                    Ok(outcome) => log::info!("[play] '{}' finished: {:?}", song_name, outcome),
                    Err(e) => log::error!("[play] '{}' failed: {}", song_name, e),
                }

                drop(guard);
                drop(owner);
                let _ = shared.reports_tx.send(SessionReport {
                    song: song_name,
                    result,
                });
            });

        if let Err(e) = spawned {
            *slot = None;
            return Err(PlaybackError::Spawn(e));
        }

        log::info!("[play] Started '{}' (estimated {} ms)", name, estimate_ms);
        Ok(StartOutcome::Started {
            song: name.to_string(),
        })
    }

    /// Cancel the active session, if any, and halt the board
    ///
    /// STOP and RESET go out whether or not a session is active. Failing to
    /// reach the board is logged, not returned.
    pub fn stop(&self) -> StopOutcome {
        let _exclusive = match self.shared.stop_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("[stop] Stop already in progress");
                return self.stop_outcome();
            }
        };

        let shared = &self.shared;
        let mut song = None;
        let halted = loop {
            let link = match self.mark_stopping() {
                Some((active, link)) => {
                    song = Some(active);
                    link
                }
                None => None,
            };
            if let Some(link) = link {
                break stop_and_reset(&link, shared.neutral, &shared.config);
            }
            if shared.read().is_none() {
                if let Some(_owner) = shared.try_own_link() {
                    break shared
                        .connector
                        .connect()
                        .and_then(|link| stop_and_reset(&link, shared.neutral, &shared.config));
                }
            }
            // A session is connecting or its worker is releasing the link
            thread::sleep(LINK_POLL);
        };
        if let Err(e) = halted {
            log::error!("[stop] Could not send STOP/RESET to controller: {}", e);
        }

        match song {
            Some(song) => StopOutcome::Stopping { song },
            None => StopOutcome::Idle,
        }
    }

    /// Cancel the active session and hand back its name and link
    fn mark_stopping(&self) -> Option<(String, Option<Link>)> {
        let mut slot = self.shared.write();
        let session = slot.as_mut()?;
        self.shared.cancel.cancel();
        session.phase = SessionPhase::Stopping;
        Some((session.song.clone(), session.link.clone()))
    }

    fn stop_outcome(&self) -> StopOutcome {
        match self.shared.read().as_ref() {
            Some(session) => StopOutcome::Stopping {
                song: session.song.clone(),
            },
            None => StopOutcome::Idle,
        }
    }

    pub fn status(&self) -> Status {
        match self.shared.read().as_ref() {
            Some(session) => Status::Playing {
                song: session.song.clone(),
                phase: session.phase,
            },
            None => Status::Idle,
        }
    }

    /// Elapsed share of the pre-flight duration estimate
    ///
    /// Stays at 0 until the sync delay has passed after SYNC went out.
    pub fn progress(&self) -> Progress {
        let slot = self.shared.read();
        let Some(session) = slot.as_ref() else {
            return Progress {
                state: ProgressState::Idle,
                fraction: 0.0,
            };
        };

        let fraction = session
            .synced_at
            .map(|at| {
                progress_fraction(
                    at.elapsed().as_secs_f64() * 1000.0,
                    self.shared.config.sync_delay_ms,
                    session.estimate_ms,
                )
            })
            .unwrap_or(0.0);

        Progress {
            state: ProgressState::Playing,
            fraction,
        }
    }
}

fn progress_fraction(elapsed_ms: f64, sync_delay_ms: u32, estimate_ms: u32) -> f64 {
    let sync_delay = f64::from(sync_delay_ms);
    if elapsed_ms < sync_delay {
        return 0.0;
    }
    let span = f64::from(estimate_ms) - sync_delay;
    if span <= 0.0 {
        return 1.0;
    }
    ((elapsed_ms - sync_delay) / span).clamp(0.0, 1.0)
}
