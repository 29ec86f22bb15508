//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod card;
pub mod money;
mod owner;
pub mod result;
mod transfer;

pub use card::{Card, CardId, CardStatus, CardView, NewCard};
pub use owner::{Owner, OwnerId};
pub use transfer::{TransferReceipt, TransferRequest};
