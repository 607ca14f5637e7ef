//! Runs command - list or delete stored runs

use super::parse_run_id;
use crate::display;
use anyhow::Result;
use colored::*;
use schedscope_core::{RunStore, ScopeConfig};

pub fn run_runs(config: ScopeConfig, delete: Option<String>, json: bool) -> Result<()> {
    let store = RunStore::with_base_dir(config.store.dir.clone());

    if let Some(id) = delete {
        let run_id = parse_run_id(&id)?;
        store.delete_run(run_id)?;
        println!("{} run {}", "Deleted".green(), run_id);
        return Ok(());
    }

    let runs = store.list_runs()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs stored in {}", store.base_dir().display());
        return Ok(());
    }

    println!(
        "{} ({} in {})",
        "Stored runs".cyan().bold(),
        runs.len(),
        store.base_dir().display().to_string().dimmed()
    );
    for run in &runs {
        println!("  {}", display::render_run_line(run));
    }
    Ok(())
}
