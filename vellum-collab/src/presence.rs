//! Presence: the local idle state machine and remote collaborator tracking.
//!
//! Local side: pointer-movement and visibility signals drive
//! `Active → Idle → Away`; each transition is broadcast best-effort so
//! peers can grey out inactive cursors. Cursor positions are rate-limited
//! before they hit the wire.
//!
//! Remote side: a per-session collaborator map (pointer, selection, status)
//! keyed by participant id — owned by one session, cleared on teardown.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{ParticipantId, PresenceStatus};

/// Local participant's presence state machine.
#[derive(Debug)]
pub struct PresenceTracker {
    status: PresenceStatus,
    last_input: Instant,
    hidden: bool,
    idle_after: Duration,
}

impl PresenceTracker {
    pub fn new(idle_after: Duration) -> Self {
        Self {
            status: PresenceStatus::Active,
            last_input: Instant::now(),
            hidden: false,
            idle_after,
        }
    }

    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    /// Record pointer input. Returns the new status if it transitioned.
    pub fn pointer_input(&mut self) -> Option<PresenceStatus> {
        self.last_input = Instant::now();
        if self.hidden {
            // Stays Away until the view is visible again.
            return None;
        }
        self.transition(PresenceStatus::Active)
    }

    /// Record a visibility change. Returns the new status if it transitioned.
    pub fn visibility_changed(&mut self, hidden: bool) -> Option<PresenceStatus> {
        self.hidden = hidden;
        if hidden {
            self.transition(PresenceStatus::Away)
        } else if self.last_input.elapsed() >= self.idle_after {
            self.transition(PresenceStatus::Idle)
        } else {
            self.transition(PresenceStatus::Active)
        }
    }

    /// Periodic check: no input for the idle threshold demotes Active → Idle.
    pub fn tick(&mut self) -> Option<PresenceStatus> {
        if self.hidden || self.status != PresenceStatus::Active {
            return None;
        }
        if self.last_input.elapsed() >= self.idle_after {
            self.transition(PresenceStatus::Idle)
        } else {
            None
        }
    }

    fn transition(&mut self, next: PresenceStatus) -> Option<PresenceStatus> {
        if self.status == next {
            return None;
        }
        self.status = next;
        Some(next)
    }
}

/// Rate limiter for outgoing cursor broadcasts.
#[derive(Debug)]
pub struct CursorThrottle {
    last: Instant,
    interval: Duration,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            // Allow an immediate first broadcast.
            last: Instant::now() - interval,
            interval,
        }
    }

    /// Whether a cursor update may go out now; advances the limiter if so.
    pub fn allow(&mut self) -> bool {
        if self.last.elapsed() < self.interval {
            return false;
        }
        self.last = Instant::now();
        true
    }
}

/// One remote participant as seen by the local session.
#[derive(Debug, Clone)]
pub struct Collaborator {
    pub participant: ParticipantId,
    pub username: String,
    pub pointer: Option<(f32, f32)>,
    pub selected_ids: Vec<String>,
    pub status: PresenceStatus,
    pub last_seen: Instant,
}

/// Remote collaborator state, scoped to one session.
#[derive(Debug, Default)]
pub struct CollaboratorMap {
    map: HashMap<ParticipantId, Collaborator>,
}

impl CollaboratorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_mouse(
        &mut self,
        participant: ParticipantId,
        x: f32,
        y: f32,
        selected_ids: Vec<String>,
        username: String,
    ) {
        let entry = self.entry(participant, username);
        entry.pointer = Some((x, y));
        entry.selected_ids = selected_ids;
        entry.last_seen = Instant::now();
    }

    pub fn apply_idle(
        &mut self,
        participant: ParticipantId,
        status: PresenceStatus,
        username: String,
    ) {
        let entry = self.entry(participant, username);
        entry.status = status;
        entry.last_seen = Instant::now();
    }

    fn entry(&mut self, participant: ParticipantId, username: String) -> &mut Collaborator {
        let collaborator = self.map.entry(participant).or_insert_with(|| Collaborator {
            participant,
            username: username.clone(),
            pointer: None,
            selected_ids: Vec::new(),
            status: PresenceStatus::Active,
            last_seen: Instant::now(),
        });
        if !username.is_empty() {
            collaborator.username = username;
        }
        collaborator
    }

    /// Drop everyone not in the authoritative membership list.
    pub fn retain_participants(&mut self, participants: &[ParticipantId]) {
        self.map.retain(|id, _| participants.contains(id));
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<&Collaborator> {
        self.map.get(participant)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_idle_after_threshold() {
        let mut tracker = PresenceTracker::new(Duration::from_millis(0));
        // Zero threshold: any tick demotes.
        assert_eq!(tracker.tick(), Some(PresenceStatus::Idle));
        assert_eq!(tracker.status(), PresenceStatus::Idle);
        // Already idle: no repeat transition.
        assert_eq!(tracker.tick(), None);
    }

    #[test]
    fn test_pointer_input_reactivates() {
        let mut tracker = PresenceTracker::new(Duration::from_millis(0));
        tracker.tick();
        assert_eq!(tracker.pointer_input(), Some(PresenceStatus::Active));
        assert_eq!(tracker.pointer_input(), None);
    }

    #[test]
    fn test_hidden_view_goes_away_and_back() {
        let mut tracker = PresenceTracker::new(Duration::from_secs(60));
        assert_eq!(tracker.visibility_changed(true), Some(PresenceStatus::Away));
        // Pointer input while hidden does not resurface.
        assert_eq!(tracker.pointer_input(), None);
        assert_eq!(tracker.status(), PresenceStatus::Away);
        // Recent input: visible again means Active.
        assert_eq!(tracker.visibility_changed(false), Some(PresenceStatus::Active));
    }

    #[test]
    fn test_visible_after_long_idle_is_idle() {
        let mut tracker = PresenceTracker::new(Duration::from_millis(0));
        tracker.visibility_changed(true);
        assert_eq!(tracker.visibility_changed(false), Some(PresenceStatus::Idle));
    }

    #[test]
    fn test_cursor_throttle() {
        let mut throttle = CursorThrottle::new(Duration::from_secs(3600));
        assert!(throttle.allow());
        assert!(!throttle.allow());
    }

    #[test]
    fn test_collaborator_map_updates_and_membership() {
        let mut map = CollaboratorMap::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        map.apply_mouse(alice, 1.0, 2.0, vec!["r1".to_string()], "alice".to_string());
        map.apply_idle(bob, PresenceStatus::Idle, "bob".to_string());
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&alice).unwrap().pointer, Some((1.0, 2.0)));
        assert_eq!(map.get(&bob).unwrap().status, PresenceStatus::Idle);

        // Bob left the room.
        map.retain_participants(&[alice]);
        assert_eq!(map.len(), 1);
        assert!(map.get(&bob).is_none());

        map.clear();
        assert!(map.is_empty());
    }
}
