//! In-memory card store with row-level exclusive locks
//!
//! Behaves like a relational store running `SELECT ... FOR UPDATE`: a
//! transaction that locks a row keeps it until commit or rollback, other
//! transactions wait for it (bounded by the lock timeout), and staged writes
//! only become visible on commit. Used by tests and by embedders that keep
//! cards in process.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};

use crate::domain::result::{Error, Result};
use crate::domain::{Card, CardId, CardStatus, NewCard, Owner, OwnerId};
use crate::ports::{CardStore, CardTransaction, OwnerDirectory};

use super::DEFAULT_LOCK_TIMEOUT;

type TxId = u64;

#[derive(Default)]
struct StoreState {
    cards: BTreeMap<CardId, Card>,
    last_id: CardId,
    owners: BTreeMap<OwnerId, Owner>,
    /// Row id -> transaction holding its exclusive lock
    row_locks: HashMap<CardId, TxId>,
}

impl StoreState {
    fn number_taken(&self, number_encrypted: &str, except: CardId) -> bool {
        self.cards
            .values()
            .any(|c| c.id != except && c.number_encrypted == number_encrypted)
    }
}

/// In-memory card store
pub struct InMemoryCardStore {
    state: Mutex<StoreState>,
    released: Condvar,
    lock_timeout: Duration,
    next_tx: AtomicU64,
}

impl Default for InMemoryCardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store whose lock waits give up after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            released: Condvar::new(),
            lock_timeout,
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Register an owner
    pub fn add_owner(&self, owner: Owner) -> Result<()> {
        let mut state = self.state()?;
        state.owners.insert(owner.id, owner);
        Ok(())
    }

    pub fn list_owners(&self) -> Result<Vec<Owner>> {
        Ok(self.state()?.owners.values().cloned().collect())
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| Error::database("in-memory store mutex poisoned"))
    }

    /// Block until none of `rows` is locked by a transaction other than
    /// `tx_id`, or fail with `LockTimeout` naming the row still held.
    fn wait_for_rows<'a>(
        &'a self,
        mut state: MutexGuard<'a, StoreState>,
        tx_id: Option<TxId>,
        rows: impl Fn(&StoreState) -> Vec<CardId>,
    ) -> Result<MutexGuard<'a, StoreState>> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            let held_elsewhere = rows(&state).into_iter().find(|id| match state.row_locks.get(id) {
                Some(holder) => Some(*holder) != tx_id,
                None => false,
            });

            let Some(id) = held_elsewhere else {
                return Ok(state);
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout(id));
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::database("in-memory store mutex poisoned"))?;
            state = guard;
        }
    }
}

impl OwnerDirectory for InMemoryCardStore {
    fn owner_exists(&self, owner_id: OwnerId) -> Result<bool> {
        Ok(self.state()?.owners.contains_key(&owner_id))
    }
}

impl CardStore for InMemoryCardStore {
    fn find_by_id(&self, id: CardId) -> Result<Option<Card>> {
        Ok(self.state()?.cards.get(&id).cloned())
    }

    fn find_by_encrypted_number(&self, number_encrypted: &str) -> Result<Option<Card>> {
        Ok(self
            .state()?
            .cards
            .values()
            .find(|c| c.number_encrypted == number_encrypted)
            .cloned())
    }

    fn find_by_encrypted_number_and_owner(
        &self,
        number_encrypted: &str,
        owner_id: OwnerId,
    ) -> Result<Option<Card>> {
        Ok(self
            .state()?
            .cards
            .values()
            .find(|c| c.number_encrypted == number_encrypted && c.owner_id == owner_id)
            .cloned())
    }

    fn list_all(&self) -> Result<Vec<Card>> {
        Ok(self.state()?.cards.values().cloned().collect())
    }

    fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Card>> {
        Ok(self
            .state()?
            .cards
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn insert(&self, card: NewCard) -> Result<Card> {
        let mut state = self.state()?;
        if state.number_taken(&card.number_encrypted, CardId::MIN) {
            return Err(Error::CardNumberTaken);
        }
        state.last_id += 1;
        let card = card.into_card(state.last_id);
        state.cards.insert(card.id, card.clone());
        Ok(card)
    }

    fn delete(&self, id: CardId) -> Result<bool> {
        let state = self.state()?;
        let mut state = self.wait_for_rows(state, None, |_| vec![id])?;
        Ok(state.cards.remove(&id).is_some())
    }

    fn begin(&self) -> Result<Box<dyn CardTransaction + '_>> {
        Ok(Box::new(InMemoryTransaction {
            store: self,
            tx_id: self.next_tx.fetch_add(1, Ordering::Relaxed),
            held: BTreeSet::new(),
            staged: BTreeMap::new(),
        }))
    }

    fn bulk_mark_expired(&self, from: &[CardStatus], to: CardStatus, today: NaiveDate) -> Result<u64> {
        let qualifies = |c: &Card| from.contains(&c.status) && c.valid_until < today;

        // All-or-nothing: wait until no qualifying row is locked, then flip them together
        let state = self.state()?;
        let mut state = self.wait_for_rows(state, None, |s| {
            s.cards.values().filter(|c| qualifies(c)).map(|c| c.id).collect()
        })?;

        let now = Utc::now();
        let mut changed = 0u64;
        for card in state.cards.values_mut().filter(|c| qualifies(c)) {
            card.status = to;
            card.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }
}

/// Transaction over [`InMemoryCardStore`]
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryCardStore,
    tx_id: TxId,
    held: BTreeSet<CardId>,
    staged: BTreeMap<CardId, Card>,
}

impl InMemoryTransaction<'_> {
    fn lock_where(&mut self, id: CardId, filter: impl Fn(&Card) -> bool) -> Result<Option<Card>> {
        if self.held.contains(&id) {
            let current = match self.staged.get(&id) {
                Some(card) => Some(card.clone()),
                None => self.store.state()?.cards.get(&id).cloned(),
            };
            return Ok(current.filter(|c| filter(c)));
        }

        let state = self.store.state()?;
        let mut state = self.store.wait_for_rows(state, Some(self.tx_id), |_| vec![id])?;

        let Some(card) = state.cards.get(&id).filter(|c| filter(c)).cloned() else {
            return Ok(None);
        };
        state.row_locks.insert(id, self.tx_id);
        self.held.insert(id);
        Ok(Some(card))
    }

    fn apply_staged(&mut self) -> Result<()> {
        let mut state = self.store.state()?;
        for card in self.staged.values() {
            let clash = state.cards.values().any(|other| {
                other.id != card.id
                    && !self.staged.contains_key(&other.id)
                    && other.number_encrypted == card.number_encrypted
            }) || self
                .staged
                .values()
                .any(|other| other.id != card.id && other.number_encrypted == card.number_encrypted);
            if clash {
                return Err(Error::CardNumberTaken);
            }
        }
        for (id, card) in std::mem::take(&mut self.staged) {
            // A row deleted meanwhile stays deleted
            if let Some(slot) = state.cards.get_mut(&id) {
                *slot = card;
            }
        }
        Ok(())
    }
}

impl CardTransaction for InMemoryTransaction<'_> {
    fn lock_by_id_owner_and_status(
        &mut self,
        id: CardId,
        owner_id: OwnerId,
        status: CardStatus,
    ) -> Result<Option<Card>> {
        self.lock_where(id, |c| c.owner_id == owner_id && c.status == status)
    }

    fn lock_by_id(&mut self, id: CardId) -> Result<Option<Card>> {
        self.lock_where(id, |_| true)
    }

    fn save(&mut self, card: &Card) -> Result<Card> {
        if !self.held.contains(&card.id) {
            return Err(Error::database(format!(
                "card id = {} is not locked by this transaction",
                card.id
            )));
        }
        card.validate().map_err(Error::validation)?;

        let mut saved = card.clone();
        saved.updated_at = Utc::now();
        self.staged.insert(saved.id, saved.clone());
        Ok(saved)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        // Locks are released by Drop whether or not applying succeeded
        self.apply_staged()
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let mut state = self
            .store
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in &self.held {
            if state.row_locks.get(id) == Some(&self.tx_id) {
                state.row_locks.remove(id);
            }
        }
        drop(state);
        self.store.released.notify_all();
    }
}
