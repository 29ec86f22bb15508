//! Service layer - business logic orchestration
//!
//! Services coordinate domain rules and port interactions. The transfer
//! engine, administrative card operations and the expiry sweeper all share
//! the same store and codec instances.

mod card;
pub mod crypto;
pub mod migration;
mod sweeper;
mod transfer;

pub use card::{validate_card_number, CardService, CardUpdate, CARD_NUMBER_LENGTH};
pub use crypto::{mask_number, CardCipher, CipherTransformation, CryptoKey};
pub use migration::{MigrationResult, MigrationService};
pub use sweeper::{ExpirySweeper, DEFAULT_SWEEP_INTERVAL};
pub use transfer::TransferService;
