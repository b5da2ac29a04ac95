use crate::auth::AuthUser;
use crate::metrics::Metrics;
use crate::outbox::EventRecord;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

use super::protocol::Envelope;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Per-socket state. The writer half is an unbounded channel drained by a
/// dedicated task; a closed channel marks the socket dead for the sweeper.
pub struct ConnState {
    pub id: u64,
    pub user: Mutex<Option<AuthUser>>,
    pub subscriptions: Mutex<HashSet<String>>,
    sender: mpsc::UnboundedSender<String>,
}

impl ConnState {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            user: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            sender,
        })
    }

    /// Identity used by the request ledger before the connection has
    /// authenticated.
    pub fn anon_id(&self) -> String {
        format!("anon:{}", self.id)
    }

    pub fn ledger_user_id(&self) -> String {
        self.user
            .lock()
            .expect("conn user mutex")
            .as_ref()
            .map(|u| u.id.clone())
            .unwrap_or_else(|| self.anon_id())
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().expect("conn user mutex").clone()
    }

    pub fn set_user(&self, user: Option<AuthUser>) {
        *self.user.lock().expect("conn user mutex") = user;
    }

    pub fn subscribe(&self, tag: &str) {
        self.subscriptions
            .lock()
            .expect("conn subs mutex")
            .insert(tag.to_string());
    }

    pub fn unsubscribe(&self, tag: &str) {
        self.subscriptions
            .lock()
            .expect("conn subs mutex")
            .remove(tag);
    }

    /// False when the socket writer is gone.
    pub fn send(&self, frame: String) -> bool {
        self.sender.send(frame).is_ok()
    }

    fn wants(&self, event: &EventRecord) -> bool {
        if let Some(target) = &event.user_id {
            return self
                .current_user()
                .map(|u| u.id == *target)
                .unwrap_or(false);
        }
        let subs = self.subscriptions.lock().expect("conn subs mutex");
        subs.contains("*")
            || subs.contains(&event.aggregate_type)
            || subs.contains(&event.event_type)
    }
}

/// All live connections, the broadcast fan-out target.
#[derive(Default)]
pub struct Registry {
    conns: RwLock<HashMap<u64, Arc<ConnState>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, conn: Arc<ConnState>) {
        self.conns
            .write()
            .expect("registry lock")
            .insert(conn.id, conn);
    }

    pub fn remove(&self, conn_id: u64) {
        self.conns.write().expect("registry lock").remove(&conn_id);
    }

    pub fn online_count(&self) -> usize {
        self.conns.read().expect("registry lock").len()
    }

    /// Deliver a bus event to matching sockets; dead sockets found along
    /// the way are swept out.
    pub fn broadcast_event(&self, event: &EventRecord, metrics: &Metrics) {
        let frame = Envelope::event(event).to_json();
        let mut dead: Vec<u64> = Vec::new();
        {
            let conns = self.conns.read().expect("registry lock");
            for conn in conns.values() {
                if !conn.wants(event) {
                    continue;
                }
                if conn.send(frame.clone()) {
                    metrics
                        .events_broadcast
                        .fetch_add(1, Ordering::Relaxed);
                } else {
                    dead.push(conn.id);
                }
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    /// Push one frame to every live socket (presence updates).
    pub fn broadcast_all(&self, frame: &str) {
        let mut dead: Vec<u64> = Vec::new();
        {
            let conns = self.conns.read().expect("registry lock");
            for conn in conns.values() {
                if !conn.send(frame.to_string()) {
                    dead.push(conn.id);
                }
            }
        }
        for id in dead {
            self.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> (Arc<ConnState>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnState::new(tx), rx)
    }

    fn event(user_id: Option<&str>, aggregate: &str, event_type: &str) -> EventRecord {
        EventRecord {
            event_id: "e".into(),
            event_type: event_type.into(),
            aggregate_type: aggregate.into(),
            aggregate_id: "1".into(),
            version: 1,
            user_id: user_id.map(String::from),
            payload: serde_json::Value::Null,
            created_at: 0,
        }
    }

    #[test]
    fn test_subscription_matching() {
        let (conn, _rx) = test_conn();
        assert!(!conn.wants(&event(None, "crash", "crash.tick")));

        conn.subscribe("crash");
        assert!(conn.wants(&event(None, "crash", "crash.tick")));
        assert!(!conn.wants(&event(None, "wheel", "wheel.roll")));

        conn.subscribe("wheel.roll");
        assert!(conn.wants(&event(None, "wheel", "wheel.roll")));

        conn.unsubscribe("crash");
        conn.subscribe("*");
        assert!(conn.wants(&event(None, "crash", "crash.tick")));
    }

    #[test]
    fn test_user_targeted_events() {
        let (conn, _rx) = test_conn();
        conn.subscribe("*");
        // Wildcard never matches a user-targeted event for the wrong user.
        assert!(!conn.wants(&event(Some("u1"), "wallet", "wallet.balance.updated")));

        conn.set_user(Some(crate::auth::AuthUser {
            id: "u1".into(),
            username: "alice".into(),
            roles: vec!["user".into()],
        }));
        assert!(conn.wants(&event(Some("u1"), "wallet", "wallet.balance.updated")));
        assert!(!conn.wants(&event(Some("u2"), "wallet", "wallet.balance.updated")));
    }

    #[test]
    fn test_registry_sweeps_dead_sockets() {
        let registry = Registry::new();
        let (conn, rx) = test_conn();
        conn.subscribe("*");
        registry.add(conn);
        assert_eq!(registry.online_count(), 1);

        drop(rx); // socket gone
        let metrics = Metrics::new();
        registry.broadcast_event(&event(None, "crash", "crash.tick"), &metrics);
        assert_eq!(registry.online_count(), 0);
    }
}
