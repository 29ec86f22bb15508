//! Transfer service - moves money between two cards of one owner
//!
//! Both rows are locked lower id first, whichever side of the transfer they
//! are on, so two transfers over the same pair can never wait on each other
//! in a cycle. Every failure before the balances are written leaves both
//! cards untouched; the uncommitted transaction is rolled back on drop.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::money::normalize_amount;
use crate::domain::result::{Error, Result};
use crate::domain::{Card, CardId, CardStatus, OwnerId, TransferReceipt, TransferRequest};
use crate::ports::{CardStore, OwnerDirectory};
use crate::services::crypto::{mask_number, CardCipher};

/// Funds-transfer engine
pub struct TransferService {
    cards: Arc<dyn CardStore>,
    owners: Arc<dyn OwnerDirectory>,
    cipher: Arc<CardCipher>,
}

/// A resolved side of the transfer: its id and the mask used in errors
struct Party {
    id: CardId,
    masked: String,
}

impl TransferService {
    pub fn new(cards: Arc<dyn CardStore>, owners: Arc<dyn OwnerDirectory>, cipher: Arc<CardCipher>) -> Self {
        Self { cards, owners, cipher }
    }

    /// Transfer `amount` from card `from_number` to card `to_number`
    pub fn transfer_between(
        &self,
        owner_id: OwnerId,
        from_number: &str,
        to_number: &str,
        amount: Decimal,
    ) -> Result<TransferReceipt> {
        self.transfer(&TransferRequest {
            owner_id,
            from_number: from_number.to_string(),
            to_number: to_number.to_string(),
            amount,
        })
    }

    /// Execute a transfer request
    ///
    /// Never retries. A `LockTimeout` may be resubmitted unchanged by the caller.
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        // Validation touches nothing
        let amount = Self::validated_amount(request.amount)?;
        if request.from_number == request.to_number {
            return Err(Error::SameAccount);
        }

        if !self.owners.owner_exists(request.owner_id)? {
            return Err(Error::OwnerNotFound(request.owner_id));
        }

        let source = self.resolve(request.owner_id, &request.from_number)?;
        let destination = self.resolve(request.owner_id, &request.to_number)?;

        let (first, second) = if source.id < destination.id {
            (&source, &destination)
        } else {
            (&destination, &source)
        };
        tracing::debug!(first = first.id, second = second.id, "locking cards");

        let mut tx = self.cards.begin()?;
        let first_card = tx
            .lock_by_id_owner_and_status(first.id, request.owner_id, CardStatus::Active)?
            .ok_or_else(|| Error::AccountNotFound(first.masked.clone()))?;
        let second_card = tx
            .lock_by_id_owner_and_status(second.id, request.owner_id, CardStatus::Active)?
            .ok_or_else(|| Error::AccountNotFound(second.masked.clone()))?;

        // Locks were taken in id order; map them back to their roles
        let (mut from_card, mut to_card): (Card, Card) = if first_card.id == source.id {
            (first_card, second_card)
        } else {
            (second_card, first_card)
        };

        if from_card.balance < amount {
            return Err(Error::InsufficientFunds(source.masked));
        }

        from_card.balance = from_card
            .balance
            .checked_sub(amount)
            .ok_or_else(|| Error::validation("balance underflow"))?;
        to_card.balance = to_card
            .balance
            .checked_add(amount)
            .ok_or_else(|| Error::validation("balance overflow"))?;

        let from_card = tx.save(&from_card)?;
        let to_card = tx.save(&to_card)?;
        tx.commit()?;

        tracing::info!(
            owner_id = request.owner_id,
            from = %source.masked,
            to = %destination.masked,
            %amount,
            "transfer committed"
        );

        Ok(TransferReceipt {
            amount,
            from_masked: source.masked,
            to_masked: destination.masked,
            from_balance: from_card.balance,
            to_balance: to_card.balance,
        })
    }

    /// Normalize to scale 2 and require a strictly positive result
    fn validated_amount(amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount);
        }
        let amount = normalize_amount(amount);
        if amount.is_zero() {
            return Err(Error::InvalidAmount);
        }
        Ok(amount)
    }

    /// Look a card up by number within the owner's cards. A card owned by
    /// someone else is indistinguishable from a missing one.
    fn resolve(&self, owner_id: OwnerId, number: &str) -> Result<Party> {
        let masked = mask_number(number);
        let encrypted = self.cipher.encrypt(number)?;
        match self.cards.find_by_encrypted_number_and_owner(&encrypted, owner_id)? {
            Some(card) => Ok(Party { id: card.id, masked }),
            None => Err(Error::AccountNotFound(masked)),
        }
    }
}
