//! Card domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::owner::OwnerId;
use super::result::{Error, Result};

/// Internal numeric card id. Lock ordering compares these.
pub type CardId = i64;

/// Card lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Active,
    Blocked,
    Expired,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "ACTIVE",
            CardStatus::Blocked => "BLOCKED",
            CardStatus::Expired => "EXPIRED",
        }
    }

    /// Check whether `from -> to` is a legal move for a card valid through `valid_until`.
    ///
    /// Expired is terminal. Expiry is only reachable once the validity date has
    /// passed, and Active/Blocked only toggle while the card is still valid.
    /// Staying in the same state is always allowed.
    pub fn check_transition(
        from: CardStatus,
        to: CardStatus,
        valid_until: NaiveDate,
        today: NaiveDate,
    ) -> Result<()> {
        let still_valid = valid_until >= today;
        let allowed = match (from, to) {
            _ if from == to => true,
            (CardStatus::Expired, _) => false,
            (_, CardStatus::Expired) => !still_valid,
            (CardStatus::Active, CardStatus::Blocked) | (CardStatus::Blocked, CardStatus::Active) => {
                still_valid
            }
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::InvalidStatusTransition { from, to })
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => Ok(CardStatus::Active),
            "BLOCKED" => Ok(CardStatus::Blocked),
            "EXPIRED" => Ok(CardStatus::Expired),
            other => Err(Error::validation(format!("unknown card status: {}", other))),
        }
    }
}

/// A balance-bearing card owned by a single owner
///
/// The card number is only ever held encrypted. Equal numbers produce equal
/// ciphertexts, which is what makes `number_encrypted` usable as a unique,
/// searchable column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub owner_id: OwnerId,
    pub number_encrypted: String,
    pub status: CardStatus,
    /// Last day the card is valid (inclusive)
    pub valid_until: NaiveDate,
    /// Non-negative, scale 2
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// True once the validity date lies strictly before `today`
    pub fn is_past_validity(&self, today: NaiveDate) -> bool {
        self.valid_until < today
    }

    /// Move to `next`, enforcing the lifecycle rules
    pub fn transition_to(&mut self, next: CardStatus, today: NaiveDate) -> Result<()> {
        CardStatus::check_transition(self.status, next, self.valid_until, today)?;
        self.status = next;
        Ok(())
    }

    /// Validate card data before it is persisted
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.number_encrypted.trim().is_empty() {
            return Err("card number cannot be empty");
        }
        if self.balance < Decimal::ZERO {
            return Err("card balance cannot be negative");
        }
        Ok(())
    }
}

/// Insert payload for a new card; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewCard {
    pub owner_id: OwnerId,
    pub number_encrypted: String,
    pub valid_until: NaiveDate,
}

impl NewCard {
    /// Materialize the stored row: zero balance, Active
    pub fn into_card(self, id: CardId) -> Card {
        let now = Utc::now();
        Card {
            id,
            owner_id: self.owner_id,
            number_encrypted: self.number_encrypted,
            status: CardStatus::Active,
            valid_until: self.valid_until,
            balance: Decimal::new(0, 2),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Display projection of a card. Carries the masked number only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub id: CardId,
    pub owner_id: OwnerId,
    pub masked_number: String,
    pub status: CardStatus,
    pub valid_until: NaiveDate,
    pub balance: Decimal,
}
