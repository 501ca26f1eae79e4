// Pantry Monitor - Core Library
// Exposes all modules for use in CLI, dashboard server, and tests

pub mod config;
pub mod db;
pub mod error;
pub mod extractor;      // Analysis text -> added / removed / changed lists
pub mod images;         // Capture sources + image directory
pub mod normalizer;     // Verbose description -> canonical item name
pub mod reconciliation; // Change set -> item state, one transaction per scan
pub mod scanner;        // Capture / compare / record cycle
pub mod vision;         // Vision model client + cost accounting

// Re-export commonly used types
pub use config::Config;
pub use db::{
    ChangeKind, ChangeRecord, Item, ItemHistoryEntry, NewScan, Scan, Statistics,
    setup_database, reset_database, insert_scan, get_recent_scans, count_scans,
    get_current_inventory, get_item_with_history, get_item_history, get_statistics,
};
pub use error::{PantryError, PantryResult};
pub use extractor::{ChangeSet, extract_changes, parse_inventory_listing};
pub use images::{CommandImageSource, FileImageSource, ImageSource, ImageStore, LatestImage};
pub use normalizer::normalize_item_name;
pub use reconciliation::{
    FuzzyMatchPolicy, InventoryReconciler, ReconcileReport, RemoveOutcome, MatchKind,
};
pub use scanner::{ScanOutcome, Scanner};
pub use vision::{AnthropicClient, TokenUsage, VisionModel, VisionResponse};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
