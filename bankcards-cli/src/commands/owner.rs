//! Owner commands - register and list card owners

use anyhow::Result;
use clap::Subcommand;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum OwnerCommands {
    /// Register a new owner
    Add {
        /// Unique username
        username: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List owners
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: OwnerCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        OwnerCommands::Add { username, json } => {
            let owner = ctx.store.add_owner(&username)?;
            if json {
                return output::json(&owner);
            }
            output::success(&format!("Owner '{}' added with ID {}", owner.username, owner.id));
        }
        OwnerCommands::List { json } => {
            let owners = ctx.store.list_owners()?;
            if json {
                return output::json(&owners);
            }
            if owners.is_empty() {
                output::warning("No owners yet. Use 'cards owner add <username>'.");
                return Ok(());
            }
            let mut table = output::create_table();
            table.set_header(vec!["ID", "Username"]);
            for owner in &owners {
                table.add_row(vec![owner.id.to_string(), owner.username.clone()]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
