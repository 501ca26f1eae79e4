use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{PantryError, PantryResult};

// ============================================================================
// CHANGE KIND
// ============================================================================

/// Kind of a detected inventory change (stored as lowercase text)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    QuantityChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::QuantityChanged => "quantity_changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = PantryError;

    fn from_str(s: &str) -> PantryResult<Self> {
        match s {
            "added" => Ok(ChangeKind::Added),
            "removed" => Ok(ChangeKind::Removed),
            "quantity_changed" => Ok(ChangeKind::QuantityChanged),
            other => Err(PantryError::InvalidData(format!("unknown change kind: {}", other))),
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// One comparison run. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub scanned_at: DateTime<Utc>,
    pub image_ref: Option<String>,
    pub raw_analysis: String,
    pub api_cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Scan fields supplied by the caller; id and timestamp come from the recorder
#[derive(Debug, Clone, Default)]
pub struct NewScan {
    pub image_ref: Option<String>,
    pub raw_analysis: String,
    pub api_cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Tracked inventory entity. Never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub quantity: i64,
    pub active: bool,
}

impl Item {
    /// Whole days since the item was first seen
    pub fn days_in_pantry(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_seen).num_days().max(0)
    }
}

/// Append-only audit entry for one detected change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub scan_id: i64,
    pub item_name: String,
    pub kind: ChangeKind,
    pub details: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Change record joined with the date of its owning scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemHistoryEntry {
    pub kind: ChangeKind,
    pub details: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub scan_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_scans: i64,
    pub active_items: i64,
    pub total_api_cost: f64,
    pub changes_last_week: i64,
    pub change_breakdown: HashMap<String, i64>,
}

// ============================================================================
// TIME ENCODING
// ============================================================================

/// Fixed-precision UTC text, so lexical order in SQL is chronological order
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn change_kind_column(idx: usize, raw: &str) -> rusqlite::Result<ChangeKind> {
    raw.parse::<ChangeKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Lookup key used for case-insensitive name matching
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> PantryResult<()> {
    // WAL keeps the dashboard readable while a scan writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scanned_at TEXT NOT NULL,
            image_ref TEXT,
            raw_analysis TEXT NOT NULL,
            api_cost REAL NOT NULL DEFAULT 0,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            category TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 0),
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id INTEGER NOT NULL REFERENCES scans(id),
            item_name TEXT NOT NULL,
            item_key TEXT NOT NULL,
            change_kind TEXT NOT NULL,
            details TEXT,
            detected_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_name_key ON items(name_key)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_changes_scan ON changes(scan_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_changes_item_key ON changes(item_key)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_changes_detected_at ON changes(detected_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scans_scanned_at ON scans(scanned_at)",
        [],
    )?;

    debug!("schema ready");
    Ok(())
}

/// Drop every table and recreate an empty schema
pub fn reset_database(conn: &Connection) -> PantryResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS changes;
         DROP TABLE IF EXISTS items;
         DROP TABLE IF EXISTS scans;",
    )?;

    setup_database(conn)?;
    info!("database reset");
    Ok(())
}

// ============================================================================
// SCAN RECORDER
// ============================================================================

/// Persist one scan and return its id
pub fn insert_scan(conn: &Connection, scan: &NewScan, at: DateTime<Utc>) -> PantryResult<i64> {
    conn.execute(
        "INSERT INTO scans (scanned_at, image_ref, raw_analysis, api_cost, input_tokens, output_tokens)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            to_db_time(at),
            scan.image_ref,
            scan.raw_analysis,
            scan.api_cost,
            scan.input_tokens,
            scan.output_tokens,
        ],
    )?;

    let scan_id = conn.last_insert_rowid();
    debug!(scan_id, "scan recorded");
    Ok(scan_id)
}

fn scan_from_row(row: &Row) -> rusqlite::Result<Scan> {
    let scanned_at: String = row.get(1)?;
    Ok(Scan {
        id: row.get(0)?,
        scanned_at: parse_db_time(1, &scanned_at)?,
        image_ref: row.get(2)?,
        raw_analysis: row.get(3)?,
        api_cost: row.get(4)?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
    })
}

pub fn get_recent_scans(conn: &Connection, limit: usize) -> PantryResult<Vec<Scan>> {
    let mut stmt = conn.prepare(
        "SELECT id, scanned_at, image_ref, raw_analysis, api_cost, input_tokens, output_tokens
         FROM scans
         ORDER BY scanned_at DESC, id DESC
         LIMIT ?1",
    )?;

    let scans = stmt
        .query_map([limit as i64], scan_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(scans)
}

pub fn count_scans(conn: &Connection) -> PantryResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// ITEMS
// ============================================================================

const ITEM_COLUMNS: &str = "id, name, category, first_seen, last_seen, quantity, active";

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    let first_seen: String = row.get(3)?;
    let last_seen: String = row.get(4)?;
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        first_seen: parse_db_time(3, &first_seen)?,
        last_seen: parse_db_time(4, &last_seen)?,
        quantity: row.get(5)?,
        active: row.get(6)?,
    })
}

pub fn get_item(conn: &Connection, item_id: i64) -> PantryResult<Option<Item>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
            [item_id],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

/// Exact case-insensitive lookup over all items, newest sighting first
pub fn find_item_by_name(conn: &Connection, name: &str) -> PantryResult<Option<Item>> {
    let item = conn
        .query_row(
            &format!(
                "SELECT {} FROM items WHERE name_key = ?1 ORDER BY last_seen DESC, id DESC LIMIT 1",
                ITEM_COLUMNS
            ),
            [name_key(name)],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

/// Active items whose name contains `fragment` (case-insensitive), newest sighting first
pub fn find_active_items_containing(conn: &Connection, fragment: &str) -> PantryResult<Vec<Item>> {
    let needle = name_key(fragment);
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {}, name_key FROM items WHERE active = 1 ORDER BY last_seen DESC, id DESC",
        ITEM_COLUMNS
    ))?;

    let mut matches = Vec::new();
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(7)?;
        Ok((item_from_row(row)?, key))
    })?;
    for row in rows {
        let (item, key) = row?;
        if key.contains(&needle) {
            matches.push(item);
        }
    }

    Ok(matches)
}

pub fn insert_item(
    conn: &Connection,
    name: &str,
    category: Option<&str>,
    at: DateTime<Utc>,
) -> PantryResult<i64> {
    let now = to_db_time(at);
    conn.execute(
        "INSERT INTO items (name, name_key, category, first_seen, last_seen, quantity, active)
         VALUES (?1, ?2, ?3, ?4, ?4, 1, 1)",
        params![name, name_key(name), category, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Add one unit, reactivate, refresh last-seen. Returns the new quantity.
pub fn increment_item(conn: &Connection, item_id: i64, at: DateTime<Utc>) -> PantryResult<i64> {
    let quantity = conn.query_row(
        "UPDATE items
         SET quantity = quantity + 1, active = 1, last_seen = ?1
         WHERE id = ?2
         RETURNING quantity",
        params![to_db_time(at), item_id],
        |row| row.get(0),
    )?;
    Ok(quantity)
}

/// Remove one unit floored at zero; active follows quantity. Returns the new quantity.
pub fn decrement_item(conn: &Connection, item_id: i64, at: DateTime<Utc>) -> PantryResult<i64> {
    let quantity = conn.query_row(
        "UPDATE items
         SET quantity = MAX(quantity - 1, 0),
             active = CASE WHEN quantity - 1 > 0 THEN 1 ELSE 0 END,
             last_seen = ?1
         WHERE id = ?2
         RETURNING quantity",
        params![to_db_time(at), item_id],
        |row| row.get(0),
    )?;
    Ok(quantity)
}

/// Active items ordered by name
pub fn get_current_inventory(conn: &Connection) -> PantryResult<Vec<Item>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM items WHERE active = 1 ORDER BY name COLLATE NOCASE",
        ITEM_COLUMNS
    ))?;

    let items = stmt
        .query_map([], item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

// ============================================================================
// CHANGE LOG
// ============================================================================

pub fn insert_change(
    conn: &Connection,
    scan_id: i64,
    item_name: &str,
    kind: ChangeKind,
    details: Option<&str>,
    at: DateTime<Utc>,
) -> PantryResult<i64> {
    conn.execute(
        "INSERT INTO changes (scan_id, item_name, item_key, change_kind, details, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![scan_id, item_name, name_key(item_name), kind.as_str(), details, to_db_time(at)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_changes_for_scan(conn: &Connection, scan_id: i64) -> PantryResult<Vec<ChangeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, scan_id, item_name, change_kind, details, detected_at
         FROM changes
         WHERE scan_id = ?1
         ORDER BY id",
    )?;

    let changes = stmt
        .query_map([scan_id], |row| {
            let kind: String = row.get(3)?;
            let detected_at: String = row.get(5)?;
            Ok(ChangeRecord {
                id: row.get(0)?,
                scan_id: row.get(1)?,
                item_name: row.get(2)?,
                kind: change_kind_column(3, &kind)?,
                details: row.get(4)?,
                detected_at: parse_db_time(5, &detected_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(changes)
}

/// Item by id together with its change history; `ItemNotFound` if the id is unknown
pub fn get_item_with_history(
    conn: &Connection,
    item_id: i64,
) -> PantryResult<(Item, Vec<ItemHistoryEntry>)> {
    let item = get_item(conn, item_id)?.ok_or(PantryError::ItemNotFound(item_id))?;
    let history = get_item_history(conn, &item.name)?;
    Ok((item, history))
}

/// History for a name (case-insensitive), newest first
pub fn get_item_history(conn: &Connection, item_name: &str) -> PantryResult<Vec<ItemHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT c.change_kind, c.details, c.detected_at, s.scanned_at
         FROM changes c
         JOIN scans s ON c.scan_id = s.id
         WHERE c.item_key = ?1
         ORDER BY c.detected_at DESC, c.id DESC",
    )?;

    let history = stmt
        .query_map([name_key(item_name)], |row| {
            let kind: String = row.get(0)?;
            let detected_at: String = row.get(2)?;
            let scan_date: String = row.get(3)?;
            Ok(ItemHistoryEntry {
                kind: change_kind_column(0, &kind)?,
                details: row.get(1)?,
                detected_at: parse_db_time(2, &detected_at)?,
                scan_date: parse_db_time(3, &scan_date)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(history)
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Change counts per kind detected after `since`
pub fn get_change_breakdown(conn: &Connection, since: DateTime<Utc>) -> PantryResult<HashMap<String, i64>> {
    let mut stmt = conn.prepare(
        "SELECT change_kind, COUNT(*)
         FROM changes
         WHERE detected_at > ?1
         GROUP BY change_kind",
    )?;

    let breakdown = stmt
        .query_map([to_db_time(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<HashMap<String, i64>, _>>()?;

    Ok(breakdown)
}

pub fn get_statistics(conn: &Connection, now: DateTime<Utc>) -> PantryResult<Statistics> {
    let week_ago = now - Duration::days(7);

    let total_scans = count_scans(conn)?;
    let active_items: i64 =
        conn.query_row("SELECT COUNT(*) FROM items WHERE active = 1", [], |row| row.get(0))?;
    let total_api_cost: f64 = conn.query_row(
        "SELECT COALESCE(SUM(api_cost), 0.0) FROM scans",
        [],
        |row| row.get(0),
    )?;
    let changes_last_week: i64 = conn.query_row(
        "SELECT COUNT(*) FROM changes WHERE detected_at > ?1",
        [to_db_time(week_ago)],
        |row| row.get(0),
    )?;
    let change_breakdown = get_change_breakdown(conn, week_ago)?;

    Ok(Statistics {
        total_scans,
        active_items,
        total_api_cost,
        changes_last_week,
        change_breakdown,
    })
}
