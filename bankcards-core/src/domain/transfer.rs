//! Transfer domain models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::owner::OwnerId;

/// A request to move money between two cards of the same owner.
///
/// Card numbers are in clear text as received from the caller. They are
/// encrypted for lookup and masked for reporting; neither form is stored here
/// beyond the lifetime of the request.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub owner_id: OwnerId,
    pub from_number: String,
    pub to_number: String,
    pub amount: Decimal,
}

/// Outcome of a committed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    /// Amount actually moved, after normalization
    pub amount: Decimal,
    pub from_masked: String,
    pub to_masked: String,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}
