//! BankCards Core - card storage, number codec and funds transfers
//!
//! This crate follows a hexagonal layout:
//!
//! - **domain**: Cards, owners, money rules and the error taxonomy
//! - **ports**: Store traits the services depend on
//! - **services**: Transfers, card administration, expiry sweeps, the codec
//! - **adapters**: DuckDB and in-memory stores

pub mod adapters;
pub mod config;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbCardStore;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{Card, CardId, CardStatus, CardView, Owner, OwnerId, TransferReceipt, TransferRequest};

/// Database file inside the data directory
pub const DB_FILENAME: &str = "bankcards.duckdb";

/// Main context for card operations
///
/// Built once per process: configuration is read, the store opened and
/// migrated, the key derived, and every service wired to the same store and
/// cipher.
pub struct BankCardsContext {
    pub config: Config,
    pub store: Arc<DuckDbCardStore>,
    pub cipher: Arc<CardCipher>,
    pub card_service: CardService,
    pub transfer_service: TransferService,
    pub sweeper: Arc<ExpirySweeper>,
}

impl BankCardsContext {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir)?;

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let store = Arc::new(DuckDbCardStore::new(&data_dir.join(DB_FILENAME))?.with_lock_timeout(config.lock_timeout()));
        store.ensure_schema()?;

        let cipher = Arc::new(CardCipher::from_config(
            config.crypto_key()?,
            config.crypto_transformation.as_deref(),
        )?);
        tracing::debug!(transformation = %cipher.transformation().as_str(), "card cipher ready");

        let card_service = CardService::new(
            store.clone(),
            store.clone(),
            Arc::clone(&cipher),
            config.validity_months(),
        );
        let transfer_service = TransferService::new(store.clone(), store.clone(), Arc::clone(&cipher));
        let sweeper = Arc::new(ExpirySweeper::new(store.clone()));

        Ok(Self {
            config,
            store,
            cipher,
            card_service,
            transfer_service,
            sweeper,
        })
    }
}
