//! Output formatting utilities

use bankcards_core::{CardStatus, CardView};
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use serde::Serialize;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    eprintln!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Print any serializable value as pretty JSON
pub fn json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn status(status: CardStatus) -> ColoredString {
    match status {
        CardStatus::Active => status.as_str().green(),
        CardStatus::Blocked => status.as_str().yellow(),
        CardStatus::Expired => status.as_str().dimmed(),
    }
}

/// Render cards as a table
pub fn card_table(cards: &[CardView]) -> Table {
    let mut table = create_table();
    table.set_header(vec!["ID", "Owner", "Number", "Status", "Valid Until", "Balance"]);
    for card in cards {
        table.add_row(vec![
            card.id.to_string(),
            card.owner_id.to_string(),
            card.masked_number.clone(),
            status(card.status).to_string(),
            card.valid_until.to_string(),
            card.balance.to_string(),
        ]);
    }
    table
}

/// Print a single card as key-value rows
pub fn card_details(card: &CardView) {
    let mut table = create_table();
    table.add_row(vec!["ID".to_string(), card.id.to_string()]);
    table.add_row(vec!["Owner".to_string(), card.owner_id.to_string()]);
    table.add_row(vec!["Number".to_string(), card.masked_number.clone()]);
    table.add_row(vec!["Status".to_string(), status(card.status).to_string()]);
    table.add_row(vec!["Valid Until".to_string(), card.valid_until.to_string()]);
    table.add_row(vec!["Balance".to_string(), card.balance.to_string()]);
    println!("{}", table);
}
