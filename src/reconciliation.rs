// ⚖️ Inventory Reconciler - merge detected changes into item state
//
// One scan = one unit of work:
//   scan row + item mutations + change records commit together or not at all.
//
// Adds increment (or create), removes decrement with a fuzzy fallback,
// quantity changes are logged only.

use crate::db::{self, ChangeKind, Item, NewScan};
use crate::error::PantryResult;
use crate::extractor::ChangeSet;
use crate::normalizer::normalize_item_name;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// MATCH POLICY
// ============================================================================

/// How a removal picks among several fuzzy (substring) candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyMatchPolicy {
    /// Take the candidate seen most recently (ties: newest item)
    #[default]
    MostRecentlySeen,

    /// Refuse to guess when more than one candidate matches
    RejectAmbiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Item state after an add or remove was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub name: String,
    pub item_id: i64,
    pub quantity: i64,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoveOutcome {
    Removed {
        applied: AppliedChange,
        match_kind: MatchKind,
        candidates: usize,
    },

    /// Nothing matched; the removal is dropped
    NotFound,

    /// Several fuzzy candidates and the policy refuses to pick one
    Ambiguous { candidates: Vec<String> },
}

impl RemoveOutcome {
    pub fn is_removed(&self) -> bool {
        matches!(self, RemoveOutcome::Removed { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scan_id: i64,
    pub added: Vec<AppliedChange>,
    pub removed: Vec<AppliedChange>,
    pub changed: Vec<String>,
    pub unmatched: Vec<String>,
    pub ambiguous: Vec<String>,
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    pub fn summary(&self) -> String {
        format!(
            "scan {}: {} added, {} removed, {} changed, {} unmatched, {} ambiguous",
            self.scan_id,
            self.added.len(),
            self.removed.len(),
            self.changed.len(),
            self.unmatched.len(),
            self.ambiguous.len()
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct InventoryReconciler {
    pub policy: FuzzyMatchPolicy,
}

impl InventoryReconciler {
    pub fn new() -> Self {
        InventoryReconciler {
            policy: FuzzyMatchPolicy::default(),
        }
    }

    pub fn with_policy(policy: FuzzyMatchPolicy) -> Self {
        InventoryReconciler { policy }
    }

    /// Record a comparison scan and apply its parsed changes in one transaction
    pub fn record_comparison(
        &self,
        conn: &mut Connection,
        scan: &NewScan,
        changes: &ChangeSet,
        at: DateTime<Utc>,
    ) -> PantryResult<ReconcileReport> {
        self.in_transaction(conn, scan, at, |this, tx, report| {
            for description in &changes.added {
                this.apply_add(tx, report, description, description, at)?;
            }
            for description in &changes.removed {
                this.apply_remove(tx, report, description, at)?;
            }
            for description in &changes.changed {
                this.apply_quantity_change(tx, report, description, at)?;
            }
            Ok(())
        })
    }

    /// Record the first-run listing: every listed item counts as added
    pub fn record_initial_inventory(
        &self,
        conn: &mut Connection,
        scan: &NewScan,
        items: &[String],
        at: DateTime<Utc>,
    ) -> PantryResult<ReconcileReport> {
        self.in_transaction(conn, scan, at, |this, tx, report| {
            for description in items {
                let details = format!("Initial scan: {}", description);
                this.apply_add(tx, report, description, &details, at)?;
            }
            Ok(())
        })
    }

    /// Scan insert plus `body`, committed together. Dropping an uncommitted
    /// transaction rolls it back, so every error path leaves the database untouched.
    fn in_transaction<F>(
        &self,
        conn: &mut Connection,
        scan: &NewScan,
        at: DateTime<Utc>,
        body: F,
    ) -> PantryResult<ReconcileReport>
    where
        F: FnOnce(&Self, &Connection, &mut ReconcileReport) -> PantryResult<()>,
    {
        let tx = conn.transaction()?;

        let result = {
            let unit: &Connection = &tx;
            db::insert_scan(unit, scan, at).and_then(|scan_id| {
                let mut report = ReconcileReport {
                    scan_id,
                    ..Default::default()
                };
                body(self, unit, &mut report)?;
                Ok(report)
            })
        };

        match result {
            Ok(report) => {
                tx.commit()?;
                info!(
                    scan_id = report.scan_id,
                    added = report.added.len(),
                    removed = report.removed.len(),
                    changed = report.changed.len(),
                    unmatched = report.unmatched.len(),
                    "scan reconciled"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "reconciliation failed, rolling back scan");
                Err(e)
            }
        }
    }

    /// Increment an exact (case-insensitive) match or create the item
    fn apply_add(
        &self,
        conn: &Connection,
        report: &mut ReconcileReport,
        description: &str,
        details: &str,
        at: DateTime<Utc>,
    ) -> PantryResult<()> {
        let name = normalize_item_name(description);
        if name.is_empty() {
            warn!(description, "skipping added entry with empty name");
            report.skipped.push(description.to_string());
            return Ok(());
        }

        let applied = match db::find_item_by_name(conn, &name)? {
            Some(item) => {
                let quantity = db::increment_item(conn, item.id, at)?;
                AppliedChange {
                    name: item.name,
                    item_id: item.id,
                    quantity,
                    created: false,
                }
            }
            None => {
                let item_id = db::insert_item(conn, &name, None, at)?;
                AppliedChange {
                    name: name.clone(),
                    item_id,
                    quantity: 1,
                    created: true,
                }
            }
        };

        db::insert_change(conn, report.scan_id, &name, ChangeKind::Added, Some(details), at)?;
        report.added.push(applied);
        Ok(())
    }

    fn apply_remove(
        &self,
        conn: &Connection,
        report: &mut ReconcileReport,
        description: &str,
        at: DateTime<Utc>,
    ) -> PantryResult<()> {
        let name = normalize_item_name(description);
        if name.is_empty() {
            warn!(description, "skipping removed entry with empty name");
            report.skipped.push(description.to_string());
            return Ok(());
        }

        match self.remove_item(conn, &name, at)? {
            RemoveOutcome::Removed {
                applied,
                match_kind,
                candidates,
            } => {
                if match_kind == MatchKind::Fuzzy {
                    info!(query = %name, matched = %applied.name, candidates, "fuzzy matched removal");
                }
                db::insert_change(
                    conn,
                    report.scan_id,
                    &name,
                    ChangeKind::Removed,
                    Some(description),
                    at,
                )?;
                report.removed.push(applied);
            }
            RemoveOutcome::NotFound => {
                warn!(name = %name, "item not found for removal");
                report.unmatched.push(name);
            }
            RemoveOutcome::Ambiguous { candidates } => {
                warn!(name = %name, ?candidates, "ambiguous removal left unapplied");
                report.ambiguous.push(name);
            }
        }

        Ok(())
    }

    /// Logged only; stored quantity is left alone
    fn apply_quantity_change(
        &self,
        conn: &Connection,
        report: &mut ReconcileReport,
        description: &str,
        at: DateTime<Utc>,
    ) -> PantryResult<()> {
        let name = normalize_item_name(description);
        if name.is_empty() {
            report.skipped.push(description.to_string());
            return Ok(());
        }

        db::insert_change(
            conn,
            report.scan_id,
            &name,
            ChangeKind::QuantityChanged,
            Some(description),
            at,
        )?;
        report.changed.push(name);
        Ok(())
    }

    /// Decrement the item `name` refers to: exact match first, then fuzzy over active items
    pub fn remove_item(
        &self,
        conn: &Connection,
        name: &str,
        at: DateTime<Utc>,
    ) -> PantryResult<RemoveOutcome> {
        let (item, match_kind, candidates) = match db::find_item_by_name(conn, name)? {
            Some(item) => (item, MatchKind::Exact, 1),
            None => {
                let candidates = db::find_active_items_containing(conn, name)?;
                match self.pick_fuzzy(candidates) {
                    Ok(Some((item, count))) => (item, MatchKind::Fuzzy, count),
                    Ok(None) => return Ok(RemoveOutcome::NotFound),
                    Err(names) => return Ok(RemoveOutcome::Ambiguous { candidates: names }),
                }
            }
        };

        let quantity = db::decrement_item(conn, item.id, at)?;
        Ok(RemoveOutcome::Removed {
            applied: AppliedChange {
                name: item.name,
                item_id: item.id,
                quantity,
                created: false,
            },
            match_kind,
            candidates,
        })
    }

    /// Candidates arrive ordered by last-seen (newest first)
    fn pick_fuzzy(&self, candidates: Vec<Item>) -> Result<Option<(Item, usize)>, Vec<String>> {
        let count = candidates.len();
        if count > 1 && self.policy == FuzzyMatchPolicy::RejectAmbiguous {
            return Err(candidates.into_iter().map(|item| item.name).collect());
        }
        Ok(candidates.into_iter().next().map(|item| (item, count)))
    }
}

impl Default for InventoryReconciler {
    fn default() -> Self {
        Self::new()
    }
}
