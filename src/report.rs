//! Ledger export for the reporting view

use crate::error::Result;
use crate::ledger::ActivityLedger;
use crate::models::ActivityLogEntry;
use std::path::Path;
use tracing::info;

/// Writes the ledger rows (newest first) as pretty JSON
pub fn export(ledger: &ActivityLedger, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&ledger.entries())?;
    std::fs::write(output_path, json)?;
    info!("Ledger saved to {}", output_path.display());
    Ok(())
}

/// Loads a previously exported ledger
pub fn load(input_path: &Path) -> Result<ActivityLedger> {
    let content = std::fs::read_to_string(input_path)?;
    let entries: Vec<ActivityLogEntry> = serde_json::from_str(&content)?;
    Ok(ActivityLedger::from_entries(entries))
}
