//! Lending ledger: which keys are out, with whom, since when.
//!
//! The ledger is the single source of truth for loans. Every operation takes
//! the same mutex for its whole duration, so a check-then-insert in
//! [`Ledger::borrow`] can never interleave with another borrow, return or
//! scan. The map holds at most a handful of entries and no operation awaits
//! while holding the lock.
//!
//! # Panic-Free Guarantees
//!
//! A poisoned lock is recovered with [`PoisonError::into_inner`]: every
//! operation performs at most one insert or remove, so the map is consistent
//! even if a previous holder panicked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{Clock, KeyId, KeyInventory, SystemClock, UserId};

// ============================================================================
// Key Record
// ============================================================================

/// One outstanding loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: KeyId,

    /// Who holds the card. An opaque id, never a display name.
    pub borrower: UserId,

    /// When the card was handed out. Never changes after insert.
    pub borrowed_at: DateTime<Utc>,
}

impl KeyRecord {
    /// How long the card has been out as of `now`.
    pub fn held_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.borrowed_at
    }

    /// True if the loan is strictly longer than `threshold`.
    pub fn is_overdue(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.held_for(now) > threshold
    }
}

// ============================================================================
// Ledger Errors
// ============================================================================

/// Expected outcomes of a rejected borrow or return.
///
/// None of these are bugs; the session controller turns each one into a
/// chat reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The key is not part of the inventory.
    #[error("invalid key: {key}")]
    InvalidKey { key: KeyId },

    /// Someone already holds the key.
    #[error("key {key} is already borrowed by {current_borrower}")]
    AlreadyBorrowed {
        key: KeyId,
        current_borrower: UserId,
    },

    /// Nobody holds the key.
    #[error("key {key} is not borrowed")]
    NotBorrowed { key: KeyId },

    /// The key is held by someone other than the requester.
    #[error("key {key} is borrowed by {actual_borrower}, not the requester")]
    WrongBorrower { key: KeyId, actual_borrower: UserId },
}

// ============================================================================
// Ledger
// ============================================================================

/// In-memory map of outstanding loans guarded by one coarse lock.
pub struct Ledger {
    inventory: KeyInventory,
    records: Mutex<HashMap<KeyId, KeyRecord>>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Creates an empty ledger over `inventory`, stamping loans with `clock`.
    pub fn new(inventory: KeyInventory, clock: Arc<dyn Clock>) -> Self {
        Self {
            inventory,
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Creates an empty ledger over the standard inventory and real time.
    pub fn with_defaults() -> Self {
        Self::new(KeyInventory::standard(), Arc::new(SystemClock))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<KeyId, KeyRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks out `key` to `user`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidKey` if `key` is not in the inventory
    /// - `LedgerError::AlreadyBorrowed` if someone holds `key`
    pub fn borrow(&self, key: &KeyId, user: &UserId) -> Result<KeyRecord, LedgerError> {
        if !self.inventory.contains(key) {
            return Err(LedgerError::InvalidKey { key: key.clone() });
        }

        let mut records = self.lock();
        if let Some(existing) = records.get(key) {
            return Err(LedgerError::AlreadyBorrowed {
                key: key.clone(),
                current_borrower: existing.borrower.clone(),
            });
        }

        let record = KeyRecord {
            key_id: key.clone(),
            borrower: user.clone(),
            borrowed_at: self.clock.now(),
        };
        records.insert(key.clone(), record.clone());
        debug!(key = %key, user = %user, "Key borrowed");
        Ok(record)
    }

    /// Checks `key` back in on behalf of `user`.
    ///
    /// Only the borrower may return a key. Returns the removed record.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotBorrowed` if nobody holds `key`
    /// - `LedgerError::WrongBorrower` if `user` is not the borrower
    pub fn return_key(&self, key: &KeyId, user: &UserId) -> Result<KeyRecord, LedgerError> {
        let mut records = self.lock();
        match records.get(key) {
            None => Err(LedgerError::NotBorrowed { key: key.clone() }),
            Some(existing) if existing.borrower != *user => Err(LedgerError::WrongBorrower {
                key: key.clone(),
                actual_borrower: existing.borrower.clone(),
            }),
            Some(_) => {
                let removed = records
                    .remove(key)
                    .ok_or_else(|| LedgerError::NotBorrowed { key: key.clone() })?;
                debug!(key = %key, user = %user, "Key returned");
                Ok(removed)
            }
        }
    }

    /// Point-in-time copy of every outstanding loan, ordered by key.
    pub fn snapshot(&self) -> Vec<KeyRecord> {
        let records = self.lock();
        let mut out: Vec<KeyRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        out
    }

    /// Every loan held strictly longer than `threshold` as of `now`.
    pub fn find_overdue(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<KeyRecord> {
        let records = self.lock();
        let mut out: Vec<KeyRecord> = records
            .values()
            .filter(|record| record.is_overdue(now, threshold))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        out
    }

    /// Current time according to the ledger's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn inventory(&self) -> &KeyInventory {
        &self.inventory
    }

    /// Number of keys currently out.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("inventory", &self.inventory)
            .field("outstanding", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
    }

    fn test_ledger() -> (Ledger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = Ledger::new(KeyInventory::standard(), clock.clone());
        (ledger, clock)
    }

    fn key(id: &str) -> KeyId {
        KeyId::new(id)
    }

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn test_borrow_creates_record() {
        let (ledger, _) = test_ledger();

        let record = ledger.borrow(&key("13"), &user("U1")).unwrap();

        assert_eq!(record.key_id, key("13"));
        assert_eq!(record.borrower, user("U1"));
        assert_eq!(record.borrowed_at, t0());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_borrow_invalid_key() {
        let (ledger, _) = test_ledger();

        let result = ledger.borrow(&key("99"), &user("U1"));

        assert_eq!(result, Err(LedgerError::InvalidKey { key: key("99") }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_borrow_twice_names_current_borrower() {
        let (ledger, clock) = test_ledger();
        ledger.borrow(&key("13"), &user("U1")).unwrap();
        clock.advance(Duration::minutes(1));

        let result = ledger.borrow(&key("13"), &user("U2"));

        assert_eq!(
            result,
            Err(LedgerError::AlreadyBorrowed {
                key: key("13"),
                current_borrower: user("U1"),
            })
        );
        // Original loan is untouched
        assert_eq!(ledger.snapshot()[0].borrowed_at, t0());
    }

    #[test]
    fn test_same_user_cannot_borrow_twice() {
        let (ledger, _) = test_ledger();
        ledger.borrow(&key("14"), &user("U1")).unwrap();

        assert!(matches!(
            ledger.borrow(&key("14"), &user("U1")),
            Err(LedgerError::AlreadyBorrowed { .. })
        ));
    }

    #[test]
    fn test_return_not_borrowed() {
        let (ledger, _) = test_ledger();

        let result = ledger.return_key(&key("13"), &user("U1"));

        assert_eq!(result, Err(LedgerError::NotBorrowed { key: key("13") }));
    }

    #[test]
    fn test_return_unknown_key_is_not_borrowed() {
        let (ledger, _) = test_ledger();

        assert_eq!(
            ledger.return_key(&key("99"), &user("U1")),
            Err(LedgerError::NotBorrowed { key: key("99") })
        );
    }

    #[test]
    fn test_return_wrong_borrower_keeps_record() {
        let (ledger, _) = test_ledger();
        ledger.borrow(&key("13"), &user("U1")).unwrap();

        let result = ledger.return_key(&key("13"), &user("U2"));

        assert_eq!(
            result,
            Err(LedgerError::WrongBorrower {
                key: key("13"),
                actual_borrower: user("U1"),
            })
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_borrow_then_return_round_trip() {
        let (ledger, _) = test_ledger();
        ledger.borrow(&key("15"), &user("U1")).unwrap();

        let removed = ledger.return_key(&key("15"), &user("U1")).unwrap();

        assert_eq!(removed.key_id, key("15"));
        assert!(ledger.is_empty());
        // Available again
        assert!(ledger.borrow(&key("15"), &user("U2")).is_ok());
    }

    #[test]
    fn test_snapshot_empty() {
        let (ledger, _) = test_ledger();
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let (ledger, _) = test_ledger();
        ledger.borrow(&key("13"), &user("U1")).unwrap();

        let snapshot = ledger.snapshot();
        ledger.return_key(&key("13"), &user("U1")).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn test_find_overdue_strictly_greater() {
        let (ledger, _) = test_ledger();
        ledger.borrow(&key("13"), &user("U1")).unwrap();
        let threshold = Duration::hours(48);

        assert!(ledger.find_overdue(t0() + threshold, threshold).is_empty());

        let later = t0() + threshold + Duration::seconds(1);
        let overdue = ledger.find_overdue(later, threshold);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].key_id, key("13"));
    }

    #[test]
    fn test_find_overdue_mixed() {
        let (ledger, clock) = test_ledger();
        ledger.borrow(&key("13"), &user("U1")).unwrap();
        clock.advance(Duration::hours(30));
        ledger.borrow(&key("14"), &user("U2")).unwrap();

        let now = t0() + Duration::hours(50);
        let overdue = ledger.find_overdue(now, Duration::hours(48));

        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].borrower, user("U1"));
    }

    #[test]
    fn test_scenario_borrow_conflict_return() {
        let (ledger, clock) = test_ledger();

        let record = ledger.borrow(&key("13"), &user("U1")).unwrap();
        assert_eq!(record.key_id.as_str(), "13");

        clock.advance(Duration::minutes(1));
        assert!(matches!(
            ledger.borrow(&key("13"), &user("U2")),
            Err(LedgerError::AlreadyBorrowed { current_borrower, .. }) if current_borrower == user("U1")
        ));
        assert!(matches!(
            ledger.return_key(&key("13"), &user("U2")),
            Err(LedgerError::WrongBorrower { .. })
        ));
        assert!(ledger.return_key(&key("13"), &user("U1")).is_ok());
        assert!(ledger.is_empty());

        let later = t0() + Duration::hours(49);
        assert!(ledger.find_overdue(later, Duration::hours(48)).is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::WrongBorrower {
            key: key("13"),
            actual_borrower: user("U1"),
        };
        assert!(err.to_string().contains("U1"));
        assert!(err.to_string().contains("13"));
    }

    #[test]
    fn test_held_for() {
        let record = KeyRecord {
            key_id: key("13"),
            borrower: user("U1"),
            borrowed_at: t0(),
        };
        assert_eq!(record.held_for(t0() + Duration::hours(3)), Duration::hours(3));
        assert!(!record.is_overdue(t0() + Duration::hours(3), Duration::hours(3)));
    }
}
