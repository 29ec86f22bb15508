//! CLI command implementations

pub mod card;
pub mod init;
pub mod owner;
pub mod sweep;
pub mod transfer;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use bankcards_core::BankCardsContext;

/// Get the data directory from the environment or the default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("BANKCARDS_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".bankcards"))
        .ok_or_else(|| anyhow!("Could not find home directory; set BANKCARDS_DIR"))
}

/// Open the data directory and wire up all services
pub fn get_context() -> Result<BankCardsContext> {
    let data_dir = get_data_dir()?;
    BankCardsContext::new(&data_dir)
        .with_context(|| format!("Failed to open card store in {}", data_dir.display()))
}
