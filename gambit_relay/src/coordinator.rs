// Matchmaking and session state for the relay.
//
// `Coordinator` owns the three structures that must change together: the
// waiting queue, the registry of activated sessions, and the resume index
// (client key -> session + color). It does no I/O and holds no locks; the
// hub's single main-loop thread owns it, so every call runs to completion
// before the next event is handled.
//
// Matchmaking (`request_session`) checks, in order:
// 1. Resume: the key is bound to an active session -> rebuild its descriptor
//    (same ID, same color, full history and position).
// 2. Already queued: return the pending entry unchanged.
// 3. Empty queue: mint a session ID, seat the key as white, enqueue.
// 4. Otherwise pop the oldest entry (FIFO), seat the key in the other color,
//    and commit the session record plus both resume entries together.
//
// Teardown removes the record and both resume entries in one step. With no
// idle TTL configured, a session lives until one participant leaves.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use gambit_protocol::message::SessionDescriptor;
use gambit_protocol::types::{ClientKey, Color, SessionId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::RelayError;

const SESSION_ID_LEN: usize = 22;
const SESSION_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Pairing coordinator: waiting queue, session registry and resume index.
pub struct Coordinator {
    waiting: VecDeque<QueueEntry>,
    sessions: BTreeMap<SessionId, SessionRecord>,
    resume_index: BTreeMap<ClientKey, ResumeEntry>,
    rng: StdRng,
}

/// A session with one participant, waiting for a second.
struct QueueEntry {
    descriptor: SessionDescriptor,
    queued_at: Instant,
}

/// An activated two-player session.
struct SessionRecord {
    /// Milliseconds since the Unix epoch.
    created: u64,
    started: u64,
    history: Vec<String>,
    fen: Option<String>,
    seats: [Seat; 2],
    last_activity: Instant,
}

struct Seat {
    key: ClientKey,
    color: Color,
}

struct ResumeEntry {
    session_id: SessionId,
    color: Color,
}

/// Counters for the diagnostics endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub waiting: usize,
    pub active_sessions: usize,
    pub indexed_players: usize,
}

impl SessionRecord {
    fn is_participant(&self, key: &ClientKey) -> bool {
        self.seats.iter().any(|seat| &seat.key == key)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    /// Coordinator with an entropy-seeded session ID generator.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Coordinator whose session IDs are reproducible for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            waiting: VecDeque::new(),
            sessions: BTreeMap::new(),
            resume_index: BTreeMap::new(),
            rng,
        }
    }

    /// Place `key` in a session: resume, existing queue entry, new queue
    /// entry, or a fresh pairing with the longest-waiting player.
    pub fn request_session(&mut self, key: &ClientKey) -> SessionDescriptor {
        if let Some(descriptor) = self.resume(key) {
            return descriptor;
        }

        if let Some(entry) = self
            .waiting
            .iter()
            .find(|entry| &entry.descriptor.client_key == key)
        {
            debug!(%key, session = %entry.descriptor.id, "repeat request while queued");
            return entry.descriptor.clone();
        }

        match self.waiting.pop_front() {
            None => self.enqueue(key),
            Some(proposer) => self.activate(proposer, key),
        }
    }

    /// True once the second participant has joined.
    pub fn is_session_ready(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Append a move and overwrite the position snapshot. Moves are not
    /// checked for legality.
    pub fn record_move(
        &mut self,
        session_id: &SessionId,
        mv: String,
        fen: String,
    ) -> Result<(), RelayError> {
        let record = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RelayError::StaleSession(session_id.clone()))?;
        record.history.push(mv);
        record.fen = Some(fen);
        record.last_activity = Instant::now();
        Ok(())
    }

    /// Tear down `session_id` on behalf of one of its participants. Anyone
    /// else, and any ID not in the registry (including a session that is
    /// still queued), is refused and nothing changes.
    pub fn leave_session(
        &mut self,
        key: &ClientKey,
        session_id: &SessionId,
    ) -> Result<(), RelayError> {
        let record = self
            .sessions
            .get(session_id)
            .ok_or_else(|| RelayError::StaleSession(session_id.clone()))?;
        if !record.is_participant(key) {
            return Err(not_participant(key, session_id));
        }
        self.tear_down(session_id);
        info!(%key, session = %session_id, "session left");
        Ok(())
    }

    /// Read-only: is `key` bound to an activated session?
    pub fn has_ongoing_session(&self, key: &ClientKey) -> bool {
        self.resume_index.contains_key(key)
    }

    /// Drop sessions idle for at least `ttl`, and queue entries that have
    /// waited that long. Returns the IDs of torn-down sessions so their rooms
    /// can be told.
    pub fn evict_idle(&mut self, now: Instant, ttl: Duration) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.last_activity) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.tear_down(id);
        }

        let before = self.waiting.len();
        self.waiting
            .retain(|entry| now.saturating_duration_since(entry.queued_at) < ttl);
        let withdrawn = before - self.waiting.len();

        if !expired.is_empty() || withdrawn > 0 {
            info!(
                sessions = expired.len(),
                queued = withdrawn,
                "evicted idle entries"
            );
        }
        expired
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            waiting: self.waiting.len(),
            active_sessions: self.sessions.len(),
            indexed_players: self.resume_index.len(),
        }
    }

    fn resume(&mut self, key: &ClientKey) -> Option<SessionDescriptor> {
        let entry = self.resume_index.get(key)?;
        let record = self.sessions.get_mut(&entry.session_id)?;
        record.last_activity = Instant::now();
        debug!(
            %key,
            session = %entry.session_id,
            started = record.started,
            moves = record.history.len(),
            "resuming session"
        );
        Some(SessionDescriptor {
            id: entry.session_id.clone(),
            created: Some(record.created),
            color_allocated: entry.color,
            client_key: key.clone(),
            history: Some(record.history.clone()),
            fen: record.fen.clone(),
        })
    }

    fn enqueue(&mut self, key: &ClientKey) -> SessionDescriptor {
        let descriptor = SessionDescriptor {
            id: self.fresh_session_id(),
            created: Some(now_millis()),
            color_allocated: Color::White,
            client_key: key.clone(),
            history: None,
            fen: None,
        };
        info!(%key, session = %descriptor.id, "queued");
        self.waiting.push_back(QueueEntry {
            descriptor: descriptor.clone(),
            queued_at: Instant::now(),
        });
        descriptor
    }

    /// Seat `key` opposite the proposer and commit the record together with
    /// both resume entries.
    fn activate(&mut self, proposer: QueueEntry, key: &ClientKey) -> SessionDescriptor {
        let pending = proposer.descriptor;
        let color = pending.color_allocated.opposite();
        let record = SessionRecord {
            created: pending.created.unwrap_or_else(now_millis),
            started: now_millis(),
            history: Vec::new(),
            fen: None,
            seats: [
                Seat {
                    key: pending.client_key.clone(),
                    color: pending.color_allocated,
                },
                Seat {
                    key: key.clone(),
                    color,
                },
            ],
            last_activity: Instant::now(),
        };

        for seat in &record.seats {
            self.resume_index.insert(
                seat.key.clone(),
                ResumeEntry {
                    session_id: pending.id.clone(),
                    color: seat.color,
                },
            );
        }
        self.sessions.insert(pending.id.clone(), record);
        info!(
            session = %pending.id,
            first = %pending.client_key,
            second = %key,
            "paired"
        );

        SessionDescriptor {
            id: pending.id,
            created: pending.created,
            color_allocated: color,
            client_key: key.clone(),
            history: None,
            fen: None,
        }
    }

    fn tear_down(&mut self, session_id: &SessionId) {
        if let Some(record) = self.sessions.remove(session_id) {
            for seat in &record.seats {
                self.resume_index.remove(&seat.key);
            }
        }
    }

    fn fresh_session_id(&mut self) -> SessionId {
        loop {
            let rng = &mut self.rng;
            let id = SessionId(
                (0..SESSION_ID_LEN)
                    .map(|_| {
                        char::from(SESSION_ID_ALPHABET[rng.gen_range(0..SESSION_ID_ALPHABET.len())])
                    })
                    .collect(),
            );
            let in_use = self.sessions.contains_key(&id)
                || self.waiting.iter().any(|entry| entry.descriptor.id == id);
            if !in_use {
                return id;
            }
        }
    }
}

fn not_participant(key: &ClientKey, session_id: &SessionId) -> RelayError {
    RelayError::NotParticipant {
        key: key.clone(),
        session_id: session_id.clone(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ClientKey {
        ClientKey::from(s)
    }

    /// Queue `a`, pair `b` against it, return (a's descriptor, b's).
    fn pair(
        coordinator: &mut Coordinator,
        a: &str,
        b: &str,
    ) -> (SessionDescriptor, SessionDescriptor) {
        let first = coordinator.request_session(&key(a));
        let second = coordinator.request_session(&key(b));
        (first, second)
    }

    #[test]
    fn first_requester_is_queued_as_white() {
        let mut coordinator = Coordinator::with_seed(1);
        let descriptor = coordinator.request_session(&key("p1"));

        assert_eq!(descriptor.color_allocated, Color::White);
        assert_eq!(descriptor.client_key, key("p1"));
        assert!(descriptor.created.is_some());
        assert!(descriptor.history.is_none());
        assert_eq!(descriptor.id.0.len(), SESSION_ID_LEN);
        assert!(
            descriptor
                .id
                .0
                .bytes()
                .all(|b| SESSION_ID_ALPHABET.contains(&b))
        );
        assert_eq!(coordinator.stats().waiting, 1);
        assert!(!coordinator.is_session_ready(&descriptor.id));
    }

    #[test]
    fn second_requester_is_paired_as_black_in_same_session() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, b) = pair(&mut coordinator, "A", "B");

        assert_eq!(a.id, b.id);
        assert_eq!(a.color_allocated, Color::White);
        assert_eq!(b.color_allocated, Color::Black);
        assert_eq!(b.created, a.created);
        assert!(coordinator.is_session_ready(&a.id));
        assert_eq!(
            coordinator.stats(),
            CoordinatorStats {
                waiting: 0,
                active_sessions: 1,
                indexed_players: 2,
            }
        );
    }

    #[test]
    fn repeated_request_while_queued_is_idempotent() {
        let mut coordinator = Coordinator::with_seed(1);
        let first = coordinator.request_session(&key("A"));
        let again = coordinator.request_session(&key("A"));

        assert_eq!(first, again);
        assert_eq!(coordinator.stats().waiting, 1);
        assert_eq!(coordinator.stats().active_sessions, 0);
    }

    #[test]
    fn queue_is_first_in_first_out() {
        let mut coordinator = Coordinator::with_seed(7);
        let (a, b) = pair(&mut coordinator, "A", "B");
        let (c, d) = pair(&mut coordinator, "C", "D");
        assert_eq!(a.id, b.id);
        assert_eq!(c.id, d.id);
        assert_ne!(a.id, c.id);

        // A lone waiter is matched before anyone who arrives later.
        let e = coordinator.request_session(&key("E"));
        let f = coordinator.request_session(&key("F"));
        let g = coordinator.request_session(&key("G"));
        assert_eq!(f.id, e.id);
        assert_eq!(f.color_allocated, Color::Black);
        assert_ne!(g.id, e.id);
        assert_eq!(g.color_allocated, Color::White);
        assert_eq!(coordinator.stats().waiting, 1);
    }

    #[test]
    fn ongoing_status_only_after_activation() {
        let mut coordinator = Coordinator::with_seed(1);
        coordinator.request_session(&key("A"));
        assert!(!coordinator.has_ongoing_session(&key("A")));
        assert!(!coordinator.has_ongoing_session(&key("B")));

        coordinator.request_session(&key("B"));
        assert!(coordinator.has_ongoing_session(&key("A")));
        assert!(coordinator.has_ongoing_session(&key("B")));
        assert!(!coordinator.has_ongoing_session(&key("C")));
    }

    #[test]
    fn resume_returns_history_position_and_seat_color() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");
        coordinator
            .record_move(&a.id, "e4".into(), "fen-1".into())
            .unwrap();
        coordinator
            .record_move(&a.id, "e5".into(), "fen-2".into())
            .unwrap();

        let resumed_a = coordinator.request_session(&key("A"));
        assert_eq!(resumed_a.id, a.id);
        assert_eq!(resumed_a.color_allocated, Color::White);
        assert_eq!(resumed_a.created, a.created);
        assert_eq!(
            resumed_a.history,
            Some(vec!["e4".to_string(), "e5".to_string()])
        );
        assert_eq!(resumed_a.fen.as_deref(), Some("fen-2"));

        let resumed_b = coordinator.request_session(&key("B"));
        assert_eq!(resumed_b.id, a.id);
        assert_eq!(resumed_b.color_allocated, Color::Black);

        // Idempotent, and never re-enters matchmaking.
        assert_eq!(coordinator.request_session(&key("A")), resumed_a);
        assert_eq!(coordinator.stats().waiting, 0);
        assert_eq!(coordinator.stats().active_sessions, 1);
    }

    #[test]
    fn resume_of_fresh_session_has_empty_history() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");
        let resumed = coordinator.request_session(&key("A"));
        assert_eq!(resumed.id, a.id);
        assert_eq!(resumed.history, Some(Vec::new()));
        assert_eq!(resumed.fen, None);
    }

    #[test]
    fn bound_player_is_never_paired_against_itself() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");
        let c = coordinator.request_session(&key("C"));
        assert_ne!(c.id, a.id);

        // A is bound: asking again resumes instead of pairing with C.
        let again = coordinator.request_session(&key("A"));
        assert_eq!(again.id, a.id);
        assert_eq!(coordinator.stats().waiting, 1);
    }

    #[test]
    fn record_move_on_unknown_session_is_stale() {
        let mut coordinator = Coordinator::with_seed(1);
        let err = coordinator
            .record_move(&SessionId::from("nope"), "e4".into(), "fen".into())
            .unwrap_err();
        assert_eq!(err, RelayError::StaleSession(SessionId::from("nope")));
    }

    #[test]
    fn record_move_on_queued_session_is_stale() {
        let mut coordinator = Coordinator::with_seed(1);
        let a = coordinator.request_session(&key("A"));
        assert!(
            coordinator
                .record_move(&a.id, "e4".into(), "fen".into())
                .is_err()
        );
    }

    #[test]
    fn non_participant_cannot_leave() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");

        let err = coordinator.leave_session(&key("C"), &a.id).unwrap_err();
        assert!(matches!(err, RelayError::NotParticipant { .. }));
        assert!(coordinator.is_session_ready(&a.id));
        assert!(coordinator.has_ongoing_session(&key("A")));
        assert!(coordinator.has_ongoing_session(&key("B")));
    }

    #[test]
    fn participant_leave_tears_down_both_bindings() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");

        coordinator.leave_session(&key("A"), &a.id).unwrap();
        assert!(!coordinator.is_session_ready(&a.id));
        assert!(!coordinator.has_ongoing_session(&key("A")));
        assert!(!coordinator.has_ongoing_session(&key("B")));
        assert_eq!(coordinator.stats(), CoordinatorStats::default());

        // A second leave is stale.
        assert_eq!(
            coordinator.leave_session(&key("B"), &a.id),
            Err(RelayError::StaleSession(a.id.clone()))
        );
    }

    #[test]
    fn players_can_be_paired_again_after_leaving() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");
        coordinator.leave_session(&key("B"), &a.id).unwrap();

        let (b2, a2) = pair(&mut coordinator, "B", "A");
        assert_ne!(b2.id, a.id);
        assert_eq!(b2.color_allocated, Color::White);
        assert_eq!(a2.color_allocated, Color::Black);
    }

    #[test]
    fn leave_on_a_queued_session_is_refused() {
        let mut coordinator = Coordinator::with_seed(1);
        let a = coordinator.request_session(&key("A"));

        for who in ["A", "B"] {
            assert_eq!(
                coordinator.leave_session(&key(who), &a.id),
                Err(RelayError::StaleSession(a.id.clone()))
            );
        }
        assert_eq!(coordinator.stats().waiting, 1);

        // The entry is still there: B pairs with A as usual.
        let b = coordinator.request_session(&key("B"));
        assert_eq!(b.id, a.id);
        assert_eq!(b.color_allocated, Color::Black);
    }

    #[test]
    fn evict_idle_drops_quiet_sessions_and_stale_queue_entries() {
        let mut coordinator = Coordinator::with_seed(1);
        let (a, _) = pair(&mut coordinator, "A", "B");
        coordinator.request_session(&key("C"));

        let ttl = Duration::from_secs(60);
        assert!(coordinator.evict_idle(Instant::now(), ttl).is_empty());
        assert_eq!(coordinator.stats().active_sessions, 1);

        let later = Instant::now() + ttl + Duration::from_secs(1);
        let evicted = coordinator.evict_idle(later, ttl);
        assert_eq!(evicted, vec![a.id]);
        assert!(!coordinator.has_ongoing_session(&key("A")));
        assert!(!coordinator.has_ongoing_session(&key("B")));
        assert_eq!(coordinator.stats(), CoordinatorStats::default());
    }

    #[test]
    fn seeded_coordinators_mint_the_same_ids() {
        let mut one = Coordinator::with_seed(42);
        let mut two = Coordinator::with_seed(42);
        assert_eq!(
            one.request_session(&key("A")).id,
            two.request_session(&key("Z")).id
        );
    }
}
