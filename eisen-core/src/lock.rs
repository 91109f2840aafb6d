/// Soft edit locks: ephemeral per-card claims with a fixed TTL.
///
/// Expiry is evaluated at read time against wall-clock time, so a lock
/// past `expires_at` is absent for every reader without anyone having to
/// run a sweep or send an explicit release. Only explicit activity
/// (acquire/renew) extends a lock; reads never do.
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Fixed lock lifetime.
pub const LOCK_TTL_SECONDS: i64 = 300;

/// An ephemeral claim on a card for exclusive editing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub card_id: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What the edit-intent boundary needs to render lock affordances
/// without reimplementing expiry math.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    pub locked: bool,
    pub locked_by_self: bool,
    pub remaining_ttl_seconds: i64,
}

/// Result of an acquire attempt. Contention is a normal negative result,
/// not an error: `granted: false` carries the competing lock.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    pub granted: bool,
    pub lock: Lock,
}

pub struct LockManager {
    /// card id -> lock (possibly expired; filtered at read time)
    locks: RwLock<HashMap<String, Lock>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Try to claim a card. Granted when no unexpired lock exists or the
    /// existing holder is the caller (idempotent re-acquire, which renews
    /// the TTL but keeps the original acquisition time).
    pub fn acquire(&self, card_id: &str, holder_id: &str) -> AcquireOutcome {
        self.acquire_at(card_id, holder_id, Utc::now())
    }

    fn acquire_at(&self, card_id: &str, holder_id: &str, now: DateTime<Utc>) -> AcquireOutcome {
        let mut locks = self.locks.write().unwrap();
        let existing = locks.get(card_id).cloned();

        if let Some(lock) = &existing {
            if !lock.is_expired_at(now) && lock.holder_id != holder_id {
                return AcquireOutcome {
                    granted: false,
                    lock: lock.clone(),
                };
            }
        }

        let acquired_at = match &existing {
            Some(lock) if lock.holder_id == holder_id && !lock.is_expired_at(now) => {
                lock.acquired_at
            }
            _ => now,
        };
        let lock = Lock {
            card_id: card_id.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at,
            expires_at: now + Duration::seconds(LOCK_TTL_SECONDS),
        };
        locks.insert(card_id.to_string(), lock.clone());
        AcquireOutcome {
            granted: true,
            lock,
        }
    }

    /// Release a card. No-op unless the caller is the current holder, so
    /// a stale release arriving late cannot clobber a newer legitimate
    /// lock. Returns whether a lock was removed.
    pub fn release(&self, card_id: &str, holder_id: &str) -> bool {
        let mut locks = self.locks.write().unwrap();
        match locks.get(card_id) {
            Some(lock) if lock.holder_id == holder_id => {
                locks.remove(card_id);
                true
            }
            _ => false,
        }
    }

    /// Whether another participant currently holds an unexpired lock.
    pub fn is_locked_by_other(&self, card_id: &str, self_id: &str) -> bool {
        self.is_locked_by_other_at(card_id, self_id, Utc::now())
    }

    fn is_locked_by_other_at(&self, card_id: &str, self_id: &str, now: DateTime<Utc>) -> bool {
        self.locks
            .read()
            .unwrap()
            .get(card_id)
            .is_some_and(|lock| !lock.is_expired_at(now) && lock.holder_id != self_id)
    }

    /// Visibility surface for the edit-intent boundary.
    pub fn view(&self, card_id: &str, self_id: &str) -> LockView {
        self.view_at(card_id, self_id, Utc::now())
    }

    fn view_at(&self, card_id: &str, self_id: &str, now: DateTime<Utc>) -> LockView {
        match self.locks.read().unwrap().get(card_id) {
            Some(lock) if !lock.is_expired_at(now) => LockView {
                locked: true,
                locked_by_self: lock.holder_id == self_id,
                remaining_ttl_seconds: (lock.expires_at - now).num_seconds().max(0),
            },
            _ => LockView {
                locked: false,
                locked_by_self: false,
                remaining_ttl_seconds: 0,
            },
        }
    }

    /// Apply a lock record learned from outside the engine (another
    /// participant's edit-start relayed by the integration layer). Last
    /// write wins; remote releases surface as expiry.
    pub fn observe(&self, lock: Lock) {
        self.locks
            .write()
            .unwrap()
            .insert(lock.card_id.clone(), lock);
    }

    /// Drop expired entries (housekeeping only; reads never see them
    /// either way). Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut locks = self.locks.write().unwrap();
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired_at(now));
        let removed = before - locks.len();
        if removed > 0 {
            log::debug!("[eisen.lock.cleanup] Dropped {} expired locks", removed);
        }
        removed
    }

    /// Drop every lock. Used on project switch.
    pub fn clear(&self) {
        self.locks.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn after(now: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
        now + Duration::seconds(seconds)
    }

    #[test]
    fn test_acquire_then_contention() {
        let manager = LockManager::new();
        let now = Utc::now();

        let first = manager.acquire_at("c1", "alice", now);
        assert!(first.granted);

        let second = manager.acquire_at("c1", "bob", after(now, 10));
        assert!(!second.granted);
        assert_eq!(second.lock.holder_id, "alice");
    }

    #[test]
    fn test_reacquire_renews_and_keeps_acquired_at() {
        let manager = LockManager::new();
        let now = Utc::now();

        let first = manager.acquire_at("c1", "alice", now);
        let renewed = manager.acquire_at("c1", "alice", after(now, 100));
        assert!(renewed.granted);
        assert_eq!(renewed.lock.acquired_at, first.lock.acquired_at);
        assert_eq!(
            renewed.lock.expires_at,
            after(now, 100 + LOCK_TTL_SECONDS)
        );
    }

    #[test]
    fn test_expiry_without_release() {
        let manager = LockManager::new();
        let now = Utc::now();
        manager.acquire_at("c1", "alice", now);

        // One second before expiry: still held.
        assert!(manager.is_locked_by_other_at("c1", "bob", after(now, LOCK_TTL_SECONDS - 1)));
        // At and past expiry: absent for every reader, no release needed.
        assert!(!manager.is_locked_by_other_at("c1", "bob", after(now, LOCK_TTL_SECONDS)));
        let takeover = manager.acquire_at("c1", "bob", after(now, LOCK_TTL_SECONDS + 5));
        assert!(takeover.granted);
    }

    #[test]
    fn test_release_checks_holder() {
        let manager = LockManager::new();
        let now = Utc::now();
        manager.acquire_at("c1", "alice", now);

        assert!(!manager.release("c1", "bob"));
        assert!(manager.is_locked_by_other_at("c1", "bob", after(now, 1)));
        assert!(manager.release("c1", "alice"));
        assert!(!manager.is_locked_by_other_at("c1", "bob", after(now, 1)));
    }

    #[test]
    fn test_stale_release_does_not_clobber_new_holder() {
        let manager = LockManager::new();
        let now = Utc::now();
        manager.acquire_at("c1", "alice", now);

        // Alice's lock expires, Bob takes over, then Alice's late release
        // arrives.
        let takeover = manager.acquire_at("c1", "bob", after(now, LOCK_TTL_SECONDS + 1));
        assert!(takeover.granted);
        assert!(!manager.release("c1", "alice"));
        assert!(manager.is_locked_by_other_at("c1", "alice", after(now, LOCK_TTL_SECONDS + 2)));
    }

    #[test]
    fn test_view_exposes_expiry_math() {
        let manager = LockManager::new();
        let now = Utc::now();
        manager.acquire_at("c1", "alice", now);

        let own = manager.view_at("c1", "alice", after(now, 60));
        assert!(own.locked && own.locked_by_self);
        assert_eq!(own.remaining_ttl_seconds, LOCK_TTL_SECONDS - 60);

        let other = manager.view_at("c1", "bob", after(now, 60));
        assert!(other.locked && !other.locked_by_self);

        let expired = manager.view_at("c1", "bob", after(now, LOCK_TTL_SECONDS + 1));
        assert_eq!(
            expired,
            LockView {
                locked: false,
                locked_by_self: false,
                remaining_ttl_seconds: 0
            }
        );
    }

    #[test]
    fn test_observed_remote_lock_gates_reads() {
        let manager = LockManager::new();
        let now = Utc::now();
        manager.observe(Lock {
            card_id: "c1".to_string(),
            holder_id: "bob".to_string(),
            acquired_at: now,
            expires_at: after(now, LOCK_TTL_SECONDS),
        });

        assert!(manager.is_locked_by_other_at("c1", "alice", after(now, 1)));
        assert!(!manager.acquire_at("c1", "alice", after(now, 1)).granted);
        // Expires like any local lock.
        assert!(!manager.is_locked_by_other_at("c1", "alice", after(now, LOCK_TTL_SECONDS + 1)));
    }

    #[test]
    fn test_cleanup_expired_only() {
        let manager = LockManager::new();
        let now = Utc::now();
        manager.acquire_at("c1", "alice", now);
        manager.acquire_at("c2", "bob", after(now, 200));

        assert_eq!(manager.cleanup_expired_at(after(now, LOCK_TTL_SECONDS + 1)), 1);
        assert!(manager.is_locked_by_other_at("c2", "alice", after(now, LOCK_TTL_SECONDS + 1)));
    }
}
