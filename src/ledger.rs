//! Forensic activity ledger
//!
//! Records what the interceptor saw and did, keyed by packet id. A packet
//! logged twice keeps a single row that accrues detail (intercepted, then
//! modified). Rows are never removed; order is newest insertion first.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::models::{ActivityLogEntry, LogStatus, NewActivity};

/// Aggregates consumed by the reporting view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: usize,
    pub modified: usize,
}

/// Thread-safe activity ledger shared by the guided and sandbox flows
#[derive(Debug, Clone, Default)]
pub struct ActivityLedger {
    entries: Arc<Mutex<Vec<ActivityLogEntry>>>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger from previously exported rows (newest first)
    pub fn from_entries(entries: Vec<ActivityLogEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Inserts a new row, or merges into the row with the same id.
    ///
    /// On merge every field of `activity` wins except an absent
    /// `outgoing_payload`, which keeps the earlier value. The timestamp is
    /// refreshed either way.
    pub fn upsert(&self, activity: NewActivity) -> ActivityLogEntry {
        let now = Local::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = entries.iter_mut().find(|e| e.id == activity.id) {
            let outgoing = activity
                .outgoing_payload
                .clone()
                .or_else(|| existing.outgoing_payload.take());
            *existing = activity.into_entry(now);
            existing.outgoing_payload = outgoing;
            debug!("Ledger row {} updated to {}", existing.id, existing.status);
            return existing.clone();
        }

        let entry = activity.into_entry(now);
        debug!("Ledger row {} added as {}", entry.id, entry.status);
        entries.insert(0, entry.clone());
        entry
    }

    /// All rows, newest first
    pub fn entries(&self) -> Vec<ActivityLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    pub fn get(&self, id: &str) -> Option<ActivityLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().find(|e| e.id == id).cloned()
    }

    pub fn stats(&self) -> LedgerStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        LedgerStats {
            total: entries.len(),
            modified: entries
                .iter()
                .filter(|e| e.status == LogStatus::Modified)
                .count(),
        }
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
