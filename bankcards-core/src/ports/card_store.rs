//! Card store port - transactional card persistence with row locking

use chrono::NaiveDate;

use crate::domain::result::Result;
use crate::domain::{Card, CardId, CardStatus, NewCard, OwnerId};

/// Card persistence abstraction
///
/// Plain reads (`find_*`, `list_*`) see committed state and take no locks.
/// Every mutation of an existing card goes through a [`CardTransaction`]
/// obtained from [`CardStore::begin`], except the expiry sweep which is a
/// single bulk statement.
pub trait CardStore: Send + Sync {
    // === Reads ===

    /// Get card by internal id
    fn find_by_id(&self, id: CardId) -> Result<Option<Card>>;

    /// Get card by encrypted number, regardless of owner
    fn find_by_encrypted_number(&self, number_encrypted: &str) -> Result<Option<Card>>;

    /// Get card by encrypted number, only if it belongs to `owner_id`.
    ///
    /// A card owned by someone else is reported as absent, never as a
    /// permission problem.
    fn find_by_encrypted_number_and_owner(
        &self,
        number_encrypted: &str,
        owner_id: OwnerId,
    ) -> Result<Option<Card>>;

    /// Get all cards, ordered by id
    fn list_all(&self) -> Result<Vec<Card>>;

    /// Get cards of one owner, ordered by id
    fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Card>>;

    // === Writes ===

    /// Insert a new card; fails with `CardNumberTaken` on a duplicate ciphertext
    fn insert(&self, card: NewCard) -> Result<Card>;

    /// Delete a card, returning whether it existed
    fn delete(&self, id: CardId) -> Result<bool>;

    /// Start a transaction
    fn begin(&self) -> Result<Box<dyn CardTransaction + '_>>;

    /// Move every card whose status is in `from` and whose validity ended
    /// before `today` to `to`, atomically. Returns the number of cards changed.
    fn bulk_mark_expired(&self, from: &[CardStatus], to: CardStatus, today: NaiveDate) -> Result<u64>;
}

/// A unit of work holding exclusive row locks until commit or drop
///
/// Dropping a transaction without calling [`CardTransaction::commit`] rolls
/// it back and releases every lock it holds.
pub trait CardTransaction {
    /// Lock the card with `id` if it belongs to `owner_id` and has `status`.
    ///
    /// Waits while another transaction holds the row, up to the store's lock
    /// timeout (`LockTimeout`). Returns `None` without holding a lock when the
    /// row is missing or fails the filter.
    fn lock_by_id_owner_and_status(
        &mut self,
        id: CardId,
        owner_id: OwnerId,
        status: CardStatus,
    ) -> Result<Option<Card>>;

    /// Lock the card with `id`, with no filter
    fn lock_by_id(&mut self, id: CardId) -> Result<Option<Card>>;

    /// Stage an update for a row this transaction has locked
    fn save(&mut self, card: &Card) -> Result<Card>;

    /// Make staged updates visible and release all locks
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Owner lookup used before touching any card
pub trait OwnerDirectory: Send + Sync {
    fn owner_exists(&self, owner_id: OwnerId) -> Result<bool>;
}
