//! Card commands - issue, inspect, update and remove cards

use anyhow::{anyhow, Result};
use bankcards_core::services::CardUpdate;
use bankcards_core::CardStatus;
use chrono::NaiveDate;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::{Confirm, Input};
use rust_decimal::Decimal;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum CardCommands {
    /// Issue a new card
    New {
        /// Owner ID
        #[arg(long)]
        owner: i64,
        /// 16-digit card number (prompted if omitted)
        #[arg(long)]
        number: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List cards
    List {
        /// Only cards of this owner
        #[arg(long)]
        owner: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one card
    Show {
        /// Card ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Block a card
    Block {
        /// Card ID
        id: i64,
        /// Block on behalf of this owner (must own the card)
        #[arg(long)]
        owner: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-activate a blocked card
    Activate {
        /// Card ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change card fields
    Update {
        /// Card ID
        id: i64,
        /// New owner ID
        #[arg(long)]
        owner: Option<i64>,
        /// New validity date (YYYY-MM-DD)
        #[arg(long)]
        valid_until: Option<String>,
        /// New balance
        #[arg(long)]
        balance: Option<String>,
        /// New status (ACTIVE, BLOCKED, EXPIRED)
        #[arg(long)]
        status: Option<String>,
        /// New 16-digit card number
        #[arg(long)]
        number: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a card
    Remove {
        /// Card ID
        id: i64,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

pub fn run(command: CardCommands) -> Result<()> {
    let ctx = get_context()?;
    let cards = &ctx.card_service;

    match command {
        CardCommands::New { owner, number, json } => {
            let number = match number {
                Some(n) => n,
                None => Input::new().with_prompt("Card number").interact_text()?,
            };
            let card = cards.create(owner, &number)?;
            if json {
                return output::json(&card);
            }
            output::success(&format!("Card {} issued with ID {}", card.masked_number, card.id));
            output::card_details(&card);
        }
        CardCommands::List { owner, json } => {
            let list = match owner {
                Some(owner_id) => cards.list_by_owner(owner_id)?,
                None => cards.list_all()?,
            };
            if json {
                return output::json(&list);
            }
            if list.is_empty() {
                output::warning("No cards found.");
                return Ok(());
            }
            println!("{}", output::card_table(&list));
        }
        CardCommands::Show { id, json } => {
            let card = cards.get(id)?;
            if json {
                return output::json(&card);
            }
            output::card_details(&card);
        }
        CardCommands::Block { id, owner, json } => {
            let card = match owner {
                Some(owner_id) => cards.block_by_owner(id, owner_id)?,
                None => cards.block(id)?,
            };
            if json {
                return output::json(&card);
            }
            output::success(&format!("Card {} is {}", card.masked_number, card.status));
        }
        CardCommands::Activate { id, json } => {
            let card = cards.activate(id)?;
            if json {
                return output::json(&card);
            }
            output::success(&format!("Card {} is {}", card.masked_number, card.status));
        }
        CardCommands::Update {
            id,
            owner,
            valid_until,
            balance,
            status,
            number,
            json,
        } => {
            let update = CardUpdate {
                owner_id: owner,
                valid_until: valid_until
                    .map(|d| {
                        NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                            .map_err(|_| anyhow!("Invalid date format. Use YYYY-MM-DD"))
                    })
                    .transpose()?,
                balance: balance
                    .map(|b| b.trim().parse::<Decimal>().map_err(|_| anyhow!("Invalid balance amount")))
                    .transpose()?,
                status: status.map(|s| s.parse::<CardStatus>()).transpose()?,
                number,
            };
            if update.is_empty() {
                output::warning("Nothing to update.");
                return Ok(());
            }
            let card = cards.update(id, update)?;
            if json {
                return output::json(&card);
            }
            output::success(&format!("Card {} updated", card.id));
            output::card_details(&card);
        }
        CardCommands::Remove { id, force } => {
            let card = cards.get(id)?;
            if !force {
                println!(
                    "\n{}",
                    format!("This will delete card {} (balance {}).", card.masked_number, card.balance).yellow()
                );
                if !Confirm::new().with_prompt("Are you sure?").default(false).interact()? {
                    println!("{}\n", "Cancelled".dimmed());
                    return Ok(());
                }
            }
            cards.delete(id)?;
            output::success(&format!("Card {} removed", card.masked_number));
        }
    }

    Ok(())
}
