//! Sweep command - expire cards past their validity date

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use super::get_context;
use crate::output;

pub fn run(watch: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;

    if !watch {
        let today = Utc::now().date_naive();
        let expired = ctx.sweeper.run_once(today)?;
        if json {
            return output::json(&serde_json::json!({ "date": today, "expired": expired }));
        }
        output::success(&format!("{} card(s) expired", expired));
        return Ok(());
    }

    let interval = ctx.config.sweep_interval();
    output::info(&format!(
        "Sweeping every {}s, press Ctrl-C to stop",
        interval.as_secs()
    ));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let handle = Arc::clone(&ctx.sweeper).spawn(interval);
        let stopped = tokio::signal::ctrl_c().await;
        handle.abort();
        stopped
    })?;

    output::info("Sweeper stopped");
    Ok(())
}
