use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{RescanError, Result};

pub const DEFAULT_PENDING_MAX_AGE: Duration = Duration::from_secs(600);

/// What started the rescan holding the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RescanKind {
    Rescan,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RescanPhase {
    /// Importing a key, discovering address usage or settling.
    Preparing,
    /// The wallet's rescan stream is open and feeding the hub.
    Streaming,
    /// Blocking JSON-RPC rescan; progress only visible in the wallet log.
    Polling,
}

impl RescanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RescanPhase::Preparing => "preparing",
            RescanPhase::Streaming => "streaming",
            RescanPhase::Polling => "polling",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRescan {
    pub id: Uuid,
    pub kind: RescanKind,
    pub begin_height: i64,
    pub phase: RescanPhase,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRescan {
    pub since: DateTime<Utc>,
    pub grace_seconds: u32,
}

/// Process-wide rescan bookkeeping: the single active slot and the pending
/// flag. Callers guard it with a short mutex.
#[derive(Debug, Clone)]
pub struct RescanState {
    active: Option<ActiveRescan>,
    pending: Option<PendingRescan>,
    pending_max_age: chrono::Duration,
}

impl Default for RescanState {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_MAX_AGE)
    }
}

impl RescanState {
    pub fn new(pending_max_age: Duration) -> Self {
        Self {
            active: None,
            pending: None,
            pending_max_age: chrono::Duration::from_std(pending_max_age)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Claims the slot, or fails if another rescan holds it.
    pub fn reserve(
        &mut self,
        kind: RescanKind,
        begin_height: i64,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        if self.active.is_some() {
            return Err(RescanError::AlreadyRunning);
        }

        let id = Uuid::now_v7();
        self.active = Some(ActiveRescan {
            id,
            kind,
            begin_height,
            phase: RescanPhase::Preparing,
            started_at: now,
        });
        Ok(id)
    }

    /// Moves the slot to `phase` if `id` still owns it.
    pub fn set_phase(&mut self, id: Uuid, phase: RescanPhase) -> bool {
        match self.active.as_mut() {
            Some(active) if active.id == id => {
                active.phase = phase;
                true
            }
            _ => false,
        }
    }

    /// Frees the slot if `id` still owns it.
    pub fn release(&mut self, id: Uuid) -> bool {
        if self.active.as_ref().is_some_and(|active| active.id == id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn active(&self) -> Option<&ActiveRescan> {
        self.active.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.phase == RescanPhase::Streaming)
    }

    pub fn mark_pending(&mut self, grace_seconds: u32, now: DateTime<Utc>) {
        self.pending = Some(PendingRescan {
            since: now,
            grace_seconds,
        });
    }

    pub fn clear_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// The pending flag as seen at `now`. Flags older than the ceiling are
    /// dropped so a lost task cannot pin them.
    pub fn pending_at(&mut self, now: DateTime<Utc>) -> Option<PendingRescan> {
        let pending = self.pending?;
        if now.signed_duration_since(pending.since) > self.pending_max_age {
            self.pending = None;
            return None;
        }
        Some(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_reservation_is_rejected() {
        let mut state = RescanState::default();
        let now = Utc::now();

        let id = state.reserve(RescanKind::Rescan, 0, now).unwrap();
        assert!(matches!(
            state.reserve(RescanKind::Import, 0, now),
            Err(RescanError::AlreadyRunning)
        ));

        assert!(state.release(id));
        assert!(state.reserve(RescanKind::Import, 0, now).is_ok());
    }

    #[test]
    fn stale_owner_cannot_touch_new_slot() {
        let mut state = RescanState::default();
        let now = Utc::now();

        let old = state.reserve(RescanKind::Rescan, 10, now).unwrap();
        state.release(old);
        let new = state.reserve(RescanKind::Rescan, 20, now).unwrap();

        assert!(!state.set_phase(old, RescanPhase::Streaming));
        assert!(!state.release(old));
        assert!(state.set_phase(new, RescanPhase::Streaming));
        assert!(state.is_streaming());
        assert_eq!(state.active().map(|a| a.begin_height), Some(20));
    }

    #[test]
    fn pending_flag_expires_after_ceiling() {
        let mut state = RescanState::new(Duration::from_secs(60));
        let start = Utc::now();

        state.mark_pending(30, start);
        assert_eq!(
            state.pending_at(start + chrono::Duration::seconds(59)),
            Some(PendingRescan {
                since: start,
                grace_seconds: 30
            })
        );
        assert_eq!(state.pending_at(start + chrono::Duration::seconds(61)), None);
        assert!(!state.clear_pending());
    }
}
