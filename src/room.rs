//! Session Room: the broadcast fabric for one session's listener
//! connections. Applies per-participant ingress rate limiting on the way in
//! and drops rather than blocks on the way out to a slow listener (§4.8).

use crate::ids::ConnectionId;
use crate::messages::ServerMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Per-connection ingress throttle: at most 100 frames/sec, and never two
/// frames closer together than 10ms.
pub struct RateLimiter {
    last_frame_at: Option<Instant>,
    window_start: Instant,
    frames_in_window: u32,
    min_gap: Duration,
    max_per_second: u32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32, min_gap: Duration) -> Self {
        Self {
            last_frame_at: None,
            window_start: Instant::now(),
            frames_in_window: 0,
            min_gap,
            max_per_second,
        }
    }

    /// Returns true if a frame arriving now should be accepted.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_frame_at {
            if now.duration_since(last) < self.min_gap {
                return false;
            }
        }
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.frames_in_window = 0;
        }
        if self.frames_in_window >= self.max_per_second {
            return false;
        }
        self.frames_in_window += 1;
        self.last_frame_at = Some(now);
        true
    }
}

/// Outbound queue depth per listener connection. Chosen generously above the
/// seed-test scenario's 10-message burst so normal traffic never drops; a
/// listener that falls behind by this many messages is genuinely stalled.
const LISTENER_QUEUE_CAPACITY: usize = 32;

struct Listener {
    participant_id: String,
    sender: mpsc::Sender<ServerMessage>,
    dropped: u64,
}

struct Inner {
    listeners: HashMap<ConnectionId, Listener>,
    rate_limiters: HashMap<String, RateLimiter>,
}

/// One Session Room per active session, created lazily on first join and
/// torn down once its last listener disconnects.
pub struct SessionRoom {
    pub session_id: String,
    inner: Mutex<Inner>,
    ingress_min_frame_gap: Duration,
}

impl SessionRoom {
    pub fn new(session_id: String, ingress_min_frame_gap: Duration) -> Self {
        Self {
            session_id,
            inner: Mutex::new(Inner {
                listeners: HashMap::new(),
                rate_limiters: HashMap::new(),
            }),
            ingress_min_frame_gap,
        }
    }

    pub fn join(&self, connection_id: ConnectionId, participant_id: String) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(LISTENER_QUEUE_CAPACITY);
        self.inner.lock().listeners.insert(
            connection_id,
            Listener {
                participant_id,
                sender: tx,
                dropped: 0,
            },
        );
        rx
    }

    pub fn leave(&self, connection_id: ConnectionId) {
        self.inner.lock().listeners.remove(&connection_id);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().listeners.is_empty()
    }

    /// Sends `message` to every listener. A listener whose outbound queue is
    /// full gets the message dropped for it alone — the broadcaster never
    /// blocks on a slow connection (§4.8).
    pub fn broadcast(&self, message: ServerMessage) {
        let mut inner = self.inner.lock();
        for listener in inner.listeners.values_mut() {
            if let Err(mpsc::error::TrySendError::Full(_)) = listener.sender.try_send(message.clone()) {
                listener.dropped += 1;
                tracing::warn!(
                    participant_id = %listener.participant_id,
                    dropped = listener.dropped,
                    "listener outbound queue full, dropping broadcast message"
                );
            }
        }
    }

    /// Checks and records one ingress frame against `participant_id`'s rate
    /// limiter, creating one on first use.
    pub fn allow_ingress_frame(&self, participant_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let limiter = inner
            .rate_limiters
            .entry(participant_id.to_string())
            .or_insert_with(|| RateLimiter::new(100, self.ingress_min_frame_gap));
        limiter.allow()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Registry of rooms, keyed by session id. Created lazily; torn down once a
/// room has no listeners left.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<SessionRoom>>>,
    ingress_min_frame_gap: Duration,
}

impl RoomRegistry {
    pub fn new(ingress_min_frame_gap: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            ingress_min_frame_gap,
        }
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionRoom> {
        let mut rooms = self.rooms.lock();
        rooms
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionRoom::new(session_id.to_string(), self.ingress_min_frame_gap)))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionRoom>> {
        self.rooms.lock().get(session_id).cloned()
    }

    /// Drops a room once it's empty, called after a listener leaves.
    pub fn drop_if_empty(&self, session_id: &str) {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get(session_id) {
            if room.is_empty() {
                rooms.remove(session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_rejects_frames_closer_than_min_gap() {
        let mut limiter = RateLimiter::new(100, Duration::from_millis(10));
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn rate_limiter_caps_at_max_per_second() {
        let mut limiter = RateLimiter::new(2, Duration::from_nanos(1));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_listener() {
        let room = SessionRoom::new("s1".to_string(), Duration::from_millis(10));
        let mut rx1 = room.join(ConnectionId::new(), "p1".to_string());
        let mut rx2 = room.join(ConnectionId::new(), "p2".to_string());
        room.broadcast(ServerMessage::ParticipantJoined {
            participant_id: "p3".to_string(),
            name: "Carol".to_string(),
        });
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn slow_listener_drops_once_its_queue_is_full_but_fast_listener_gets_all() {
        let room = SessionRoom::new("s1".to_string(), Duration::from_millis(10));
        let mut fast = room.join(ConnectionId::new(), "fast".to_string());
        let mut slow = room.join(ConnectionId::new(), "slow".to_string());

        let filler = |i: usize| ServerMessage::ParticipantJoined {
            participant_id: format!("filler{i}"),
            name: "Carol".to_string(),
        };
        for i in 0..LISTENER_QUEUE_CAPACITY {
            room.broadcast(filler(i));
        }
        // Drain only the fast listener, leaving `slow`'s queue saturated.
        for _ in 0..LISTENER_QUEUE_CAPACITY {
            assert!(fast.try_recv().is_ok());
        }

        for i in 0..10 {
            room.broadcast(ServerMessage::ParticipantJoined {
                participant_id: format!("p{i}"),
                name: "Dave".to_string(),
            });
        }

        let mut fast_count = 0;
        while fast.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, 10);

        let mut slow_count = 0;
        while slow.try_recv().is_ok() {
            slow_count += 1;
        }
        assert_eq!(slow_count, 0);
    }

    #[test]
    fn room_leaves_empty_after_last_listener_departs() {
        let room = SessionRoom::new("s1".to_string(), Duration::from_millis(10));
        let id = ConnectionId::new();
        room.join(id, "p1".to_string());
        assert!(!room.is_empty());
        room.leave(id);
        assert!(room.is_empty());
    }

    #[test]
    fn registry_drops_empty_rooms() {
        let registry = RoomRegistry::new(Duration::from_millis(10));
        let room = registry.get_or_create("s1");
        let id = ConnectionId::new();
        room.join(id, "p1".to_string());
        room.leave(id);
        registry.drop_if_empty("s1");
        assert!(registry.get("s1").is_none());
    }
}
