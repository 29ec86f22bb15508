//! Card service - administrative card operations
//!
//! Every change to an existing card happens under its row lock inside a
//! store transaction. Lookups that must see other rows (owner existence,
//! number uniqueness) run before the transaction starts; the store's unique
//! index catches anything that races in between.

use std::sync::Arc;

use chrono::{Months, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::domain::money::normalize_amount;
use crate::domain::result::{Error, Result};
use crate::domain::{Card, CardId, CardStatus, CardView, NewCard, OwnerId};
use crate::ports::{CardStore, OwnerDirectory};
use crate::services::crypto::{mask_number, CardCipher};

/// Digits in a card number
pub const CARD_NUMBER_LENGTH: usize = 16;

/// Field changes for [`CardService::update`]; `None` leaves the field alone
#[derive(Debug, Clone, Default)]
pub struct CardUpdate {
    pub owner_id: Option<OwnerId>,
    pub valid_until: Option<NaiveDate>,
    pub balance: Option<Decimal>,
    pub status: Option<CardStatus>,
    /// Clear-text number
    pub number: Option<String>,
}

impl CardUpdate {
    pub fn is_empty(&self) -> bool {
        self.owner_id.is_none()
            && self.valid_until.is_none()
            && self.balance.is_none()
            && self.status.is_none()
            && self.number.is_none()
    }
}

/// Validate a clear-text card number and return it trimmed
pub fn validate_card_number(number: &str) -> Result<&str> {
    let number = number.trim();
    if number.len() != CARD_NUMBER_LENGTH || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::validation(format!(
            "card number must be exactly {} digits",
            CARD_NUMBER_LENGTH
        )));
    }
    Ok(number)
}

pub struct CardService {
    cards: Arc<dyn CardStore>,
    owners: Arc<dyn OwnerDirectory>,
    cipher: Arc<CardCipher>,
    validity_months: u32,
}

impl CardService {
    pub fn new(
        cards: Arc<dyn CardStore>,
        owners: Arc<dyn OwnerDirectory>,
        cipher: Arc<CardCipher>,
        validity_months: u32,
    ) -> Self {
        Self {
            cards,
            owners,
            cipher,
            validity_months,
        }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Display projection; the number is masked, never decrypted in full
    pub fn view(&self, card: &Card) -> CardView {
        CardView {
            id: card.id,
            owner_id: card.owner_id,
            masked_number: self.cipher.mask(&card.number_encrypted),
            status: card.status,
            valid_until: card.valid_until,
            balance: card.balance,
        }
    }

    fn ensure_owner(&self, owner_id: OwnerId) -> Result<()> {
        if self.owners.owner_exists(owner_id)? {
            Ok(())
        } else {
            Err(Error::OwnerNotFound(owner_id))
        }
    }

    /// Encrypt `number` and make sure no card other than `except` holds it
    fn encrypt_free_number(&self, number: &str, except: Option<CardId>) -> Result<String> {
        let encrypted = self.cipher.encrypt(validate_card_number(number)?)?;
        match self.cards.find_by_encrypted_number(&encrypted)? {
            Some(existing) if Some(existing.id) != except => Err(Error::CardNumberTaken),
            _ => Ok(encrypted),
        }
    }

    /// Issue a new card: Active, zero balance, valid for the configured months
    pub fn create(&self, owner_id: OwnerId, number: &str) -> Result<CardView> {
        let today = Self::today();
        let valid_until = today
            .checked_add_months(Months::new(self.validity_months))
            .ok_or_else(|| Error::validation("card validity date is out of range"))?;

        let number_encrypted = self.encrypt_free_number(number, None)?;
        self.ensure_owner(owner_id)?;

        let card = self.cards.insert(NewCard {
            owner_id,
            number_encrypted,
            valid_until,
        })?;

        tracing::info!(card_id = card.id, owner_id, number = %mask_number(number.trim()), "card created");
        Ok(self.view(&card))
    }

    pub fn get(&self, id: CardId) -> Result<CardView> {
        let card = self.cards.find_by_id(id)?.ok_or(Error::CardNotFound(id))?;
        Ok(self.view(&card))
    }

    pub fn list_all(&self) -> Result<Vec<CardView>> {
        Ok(self.cards.list_all()?.iter().map(|c| self.view(c)).collect())
    }

    pub fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<CardView>> {
        self.ensure_owner(owner_id)?;
        Ok(self.cards.list_by_owner(owner_id)?.iter().map(|c| self.view(c)).collect())
    }

    /// Apply the fields of `update` that differ from the stored card
    pub fn update(&self, id: CardId, update: CardUpdate) -> Result<CardView> {
        let today = Self::today();

        // Checks that need other rows run before any lock is taken
        if let Some(owner_id) = update.owner_id {
            self.ensure_owner(owner_id)?;
        }
        let number_encrypted = match &update.number {
            Some(number) => Some(self.encrypt_free_number(number, Some(id))?),
            None => None,
        };
        if let Some(valid_until) = update.valid_until {
            if valid_until <= today {
                return Err(Error::validation("card validity date must be in the future"));
            }
        }
        let balance = match update.balance {
            Some(balance) if balance < Decimal::ZERO => {
                return Err(Error::validation("card balance cannot be negative"));
            }
            Some(balance) => Some(normalize_amount(balance)),
            None => None,
        };

        let mut tx = self.cards.begin()?;
        let mut card = tx.lock_by_id(id)?.ok_or(Error::CardNotFound(id))?;
        let original = card.clone();

        if let Some(owner_id) = update.owner_id {
            card.owner_id = owner_id;
        }
        if let Some(valid_until) = update.valid_until {
            card.valid_until = valid_until;
        }
        if let Some(balance) = balance {
            card.balance = balance;
        }
        if let Some(number_encrypted) = number_encrypted {
            card.number_encrypted = number_encrypted;
        }
        // Status last, so a new validity date is taken into account
        if let Some(status) = update.status {
            card.transition_to(status, today)?;
        }

        if card == original {
            return Ok(self.view(&card));
        }

        let saved = tx.save(&card)?;
        tx.commit()?;
        tracing::info!(card_id = id, "card updated");
        Ok(self.view(&saved))
    }

    /// Remove a card
    pub fn delete(&self, id: CardId) -> Result<()> {
        if !self.cards.delete(id)? {
            return Err(Error::CardNotFound(id));
        }
        tracing::info!(card_id = id, "card deleted");
        Ok(())
    }

    pub fn block(&self, id: CardId) -> Result<CardView> {
        self.change_status(id, None, CardStatus::Blocked)
    }

    pub fn activate(&self, id: CardId) -> Result<CardView> {
        self.change_status(id, None, CardStatus::Active)
    }

    /// Block a card on its owner's behalf
    pub fn block_by_owner(&self, id: CardId, owner_id: OwnerId) -> Result<CardView> {
        self.change_status(id, Some(owner_id), CardStatus::Blocked)
    }

    fn change_status(&self, id: CardId, owner_id: Option<OwnerId>, next: CardStatus) -> Result<CardView> {
        let mut tx = self.cards.begin()?;
        let mut card = tx.lock_by_id(id)?.ok_or(Error::CardNotFound(id))?;

        if let Some(owner_id) = owner_id {
            if card.owner_id != owner_id {
                return Err(Error::NotCardOwner { card_id: id, owner_id });
            }
        }

        if card.status == next {
            return Ok(self.view(&card));
        }
        let previous = card.status;
        card.transition_to(next, Self::today())?;

        let saved = tx.save(&card)?;
        tx.commit()?;
        tracing::info!(card_id = id, from = %previous, to = %next, "card status changed");
        Ok(self.view(&saved))
    }
}
