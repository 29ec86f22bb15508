//! Init command - create the data directory and an encryption key

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bankcards_core::config::Config;
use bankcards_core::services::CipherTransformation;
use colored::Colorize;
use dialoguer::Confirm;
use rand::RngCore;

use super::{get_context, get_data_dir};
use crate::output;

pub fn run(transformation: Option<&str>, force: bool) -> Result<()> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    // Only the file is edited here; environment overrides must not be persisted
    let mut config = Config::load_with_env(&data_dir, |_| None)?;

    if config.crypto_key.is_some() {
        if !force {
            bail!(
                "A card encryption key already exists in {}. Use --force to replace it.",
                data_dir.display()
            );
        }
        println!(
            "\n{}",
            "Replacing the key makes every stored card number unreadable.".yellow()
        );
        if !Confirm::new().with_prompt("Are you sure?").default(false).interact()? {
            println!("{}\n", "Cancelled".dimmed());
            return Ok(());
        }
    }

    if let Some(t) = transformation {
        let parsed: CipherTransformation = t.parse()?;
        config.crypto_transformation = Some(parsed.as_str().to_string());
    }

    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    config.crypto_key = Some(format!("base64:{}", STANDARD.encode(key)));
    config.save(&data_dir)?;

    // Creates the database and runs migrations
    let ctx = get_context()?;

    output::success(&format!("Initialized {}", data_dir.display()));
    output::info(&format!("Cipher: {}", ctx.cipher.transformation()));
    Ok(())
}
