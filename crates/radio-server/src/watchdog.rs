//! Session liveness registry and reaper.
//!
//! Each session holds a lease renewed on every successful delivery. The reaper is the
//! only thing that revokes leases of sessions that stopped renewing; revocation is
//! idempotent, so a session closing gracefully may race it freely.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

pub type SessionId = Uuid;

pub const DEFAULT_DEATH_THRESHOLD: Duration = Duration::from_secs(100);
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("lease for session {0} was already removed")]
    AlreadyRemoved(SessionId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Heartbeat {
    /// Registered, nothing delivered yet. Presumed alive.
    NotStarted,
    At(Instant),
}

pub struct Watchdog {
    leases: Mutex<HashMap<SessionId, Heartbeat>>,
    death_threshold: Duration,
}

impl Watchdog {
    pub fn new(death_threshold: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            death_threshold,
        }
    }

    pub fn death_threshold(&self) -> Duration {
        self.death_threshold
    }

    fn leases(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Heartbeat>> {
        self.leases.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn register(&self, id: SessionId) {
        self.leases().insert(id, Heartbeat::NotStarted);
    }

    /// Renew the lease. Returns `false` if it was already revoked.
    pub fn heartbeat(&self, id: SessionId) -> bool {
        match self.leases().get_mut(&id) {
            Some(beat) => {
                *beat = Heartbeat::At(Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, id: SessionId) -> bool {
        self.is_alive_at(id, Instant::now())
    }

    pub fn is_alive_at(&self, id: SessionId, now: Instant) -> bool {
        let beat = self.leases().get(&id).copied();
        beat.is_some_and(|beat| self.fresh(beat, now))
    }

    fn fresh(&self, beat: Heartbeat, now: Instant) -> bool {
        match beat {
            Heartbeat::NotStarted => true,
            Heartbeat::At(at) => now.saturating_duration_since(at) <= self.death_threshold,
        }
    }

    pub fn remove(&self, id: SessionId) -> Result<(), LeaseError> {
        self.leases()
            .remove(&id)
            .map(|_| ())
            .ok_or(LeaseError::AlreadyRemoved(id))
    }

    pub fn len(&self) -> usize {
        self.leases().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One reaper sweep. Returns the revoked session ids.
    pub fn reap(&self) -> Vec<SessionId> {
        self.reap_at(Instant::now())
    }

    /// Snapshot under the lock, judge outside it, then revoke one by one under the lock.
    ///
    /// A lease renewed between the snapshot and its revocation is left alone.
    pub fn reap_at(&self, now: Instant) -> Vec<SessionId> {
        let snapshot: Vec<(SessionId, Heartbeat)> =
            self.leases().iter().map(|(id, beat)| (*id, *beat)).collect();
        let stale: Vec<SessionId> = snapshot
            .into_iter()
            .filter(|(_, beat)| !self.fresh(*beat, now))
            .map(|(id, _)| id)
            .collect();

        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            let mut leases = self.leases();
            let still_stale = leases
                .get(&id)
                .is_some_and(|beat| !self.fresh(*beat, now));
            if still_stale {
                leases.remove(&id);
                drop(leases);
                tracing::warn!(session = %id, "session missed heartbeat deadline; reaped");
                reaped.push(id);
            }
        }
        reaped
    }

    /// Sweep every `interval` until `running` is cleared.
    pub fn run_reaper(&self, running: &AtomicBool, interval: Duration) {
        let ticker = crossbeam_channel::tick(interval);
        while running.load(Ordering::Relaxed) {
            if ticker.recv().is_err() {
                break;
            }
            self.reap();
        }
        tracing::debug!("reaper stopped");
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_DEATH_THRESHOLD)
    }
}
