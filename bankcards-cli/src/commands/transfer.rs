//! Transfer command - move money between two cards of one owner

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;

use super::get_context;
use crate::output;

pub fn run(owner_id: i64, from: &str, to: &str, amount: &str, json: bool) -> Result<()> {
    let amount: Decimal = amount
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid amount '{}'", amount))?;

    let ctx = get_context()?;
    let receipt = ctx.transfer_service.transfer_between(owner_id, from, to, amount)?;

    if json {
        return output::json(&receipt);
    }

    output::success(&format!(
        "Transferred {} from {} to {}",
        receipt.amount, receipt.from_masked, receipt.to_masked
    ));
    let mut table = output::create_table();
    table.set_header(vec!["Card", "New Balance"]);
    table.add_row(vec![receipt.from_masked.clone(), receipt.from_balance.to_string()]);
    table.add_row(vec![receipt.to_masked.clone(), receipt.to_balance.to_string()]);
    println!("{}", table);

    Ok(())
}
