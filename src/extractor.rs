// Change Extractor
// Best-effort parser for the free-form text a vision model returns.
// Never fails: unexpected output yields empty or partial lists.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Section of the analysis text currently being read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Section {
    Added,
    Removed,
    Changed,
}

/// Free-text item descriptions grouped by change kind, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    fn push(&mut self, section: Section, item: String) {
        match section {
            Section::Added => self.added.push(item),
            Section::Removed => self.removed.push(item),
            Section::Changed => self.changed.push(item),
        }
    }
}

/// Entries the model writes when a section has nothing in it
const NO_CHANGE_PHRASES: &[&str] = &["none", "none detected", "no changes detected"];

fn numbered_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.").expect("valid numbered-list regex"))
}

fn bullet_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-*•\d.]+\s*").expect("valid bullet regex"))
}

// ============================================================================
// LINE CLASSIFICATION
// ============================================================================

/// Header keywords switch the section; headings and summaries close it.
///
/// Returns `Some(new_section)` when the line is a header or a reset line,
/// `None` when the line should be judged as content.
fn classify_header(line: &str) -> Option<Option<Section>> {
    let upper = line.to_uppercase();

    if upper.contains("ADDED") && upper.contains("ITEM") {
        return Some(Some(Section::Added));
    }
    if upper.contains("REMOVED") && upper.contains("ITEM") {
        return Some(Some(Section::Removed));
    }
    if upper.contains("QUANTITY") && upper.contains("CHANGED") {
        return Some(Some(Section::Changed));
    }
    if line.starts_with('#') || line.contains("Summary") || line.contains("Items Unchanged") {
        return Some(None);
    }

    None
}

fn is_item_line(line: &str) -> bool {
    line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('•')
        || numbered_prefix().is_match(line)
}

/// Strip bullet / numbering and emphasis; `None` for empty or "nothing here" entries
fn clean_item(line: &str) -> Option<String> {
    let stripped = bullet_prefix().replace(line, "");
    let item = stripped.replace("**", "");
    let item = item.trim();

    if item.is_empty() {
        return None;
    }

    let lowered = item.to_lowercase();
    if NO_CHANGE_PHRASES.contains(&lowered.as_str()) {
        return None;
    }

    Some(item.to_string())
}

// ============================================================================
// PARSERS
// ============================================================================

/// Split a comparison analysis into added / removed / quantity-changed lists
pub fn extract_changes(analysis: &str) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut current: Option<Section> = None;

    for raw_line in analysis.lines() {
        let line = raw_line.trim();

        if let Some(next) = classify_header(line) {
            current = next;
            continue;
        }

        let Some(section) = current else {
            continue;
        };

        if line.is_empty() || !is_item_line(line) {
            continue;
        }

        if let Some(item) = clean_item(line) {
            changes.push(section, item);
        }
    }

    changes
}

/// Parse a first-run listing: every dash-prefixed line is one item
pub fn parse_inventory_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('-'))
        .map(|line| line.trim_start_matches(|c| c == '-' || c == ' ').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_and_removed_sections() {
        let text = "ADDED ITEMS:\n\
                    - Kellogg's Froot Loops\n\
                    - Poland Spring water bottle\n\
                    - Germ-X hand sanitizer\n\
                    REMOVED ITEMS:\n\
                    - Coke can";

        let changes = extract_changes(text);

        assert_eq!(changes.added.len(), 3);
        assert_eq!(changes.removed, vec!["Coke can".to_string()]);
        assert!(changes.changed.is_empty());
        assert_eq!(changes.len(), 4);
    }

    #[test]
    fn test_none_detected_is_suppressed() {
        let text = "ADDED ITEMS:\n- Kellogg's Froot Loops\nREMOVED ITEMS:\n- none detected";

        let changes = extract_changes(text);

        assert_eq!(changes.added, vec!["Kellogg's Froot Loops".to_string()]);
        assert!(changes.removed.is_empty());
        assert!(changes.changed.is_empty());
    }

    #[test]
    fn test_no_change_phrases_are_case_insensitive() {
        let text = "ADDED ITEMS\n- None\n- NO CHANGES DETECTED\n- **none**";
        assert!(extract_changes(text).is_empty());
    }

    #[test]
    fn test_markdown_report_with_numbering_and_bold() {
        let text = "## Pantry Comparison\n\
                    \n\
                    **ADDED ITEMS:**\n\
                    1. **Cheerios** - 1 box (yellow)\n\
                    2. Barilla spaghetti\n\
                    \n\
                    **QUANTITY CHANGED:**\n\
                    • Eggs - carton now half full\n\
                    \n\
                    **Items Unchanged:**\n\
                    - Rice\n\
                    - Olive oil\n\
                    \n\
                    **Summary:** two new boxes on the top shelf.";

        let changes = extract_changes(text);

        assert_eq!(
            changes.added,
            vec![
                "Cheerios - 1 box (yellow)".to_string(),
                "Barilla spaghetti".to_string()
            ]
        );
        assert_eq!(changes.changed, vec!["Eggs - carton now half full".to_string()]);
        assert!(changes.removed.is_empty(), "unchanged items must not leak");
    }

    #[test]
    fn test_heading_resets_section() {
        let text = "REMOVED ITEMS:\n- Coke\n# Notes\n- lighting was different";

        let changes = extract_changes(text);

        assert_eq!(changes.removed, vec!["Coke".to_string()]);
    }

    #[test]
    fn test_lines_outside_sections_are_ignored() {
        let text = "Looking at both images:\n- a shelf\n- a wall\n\nNothing else to report.";
        assert!(extract_changes(text).is_empty());
    }

    #[test]
    fn test_prose_inside_section_is_ignored() {
        let text = "ADDED ITEMS:\nI can see a new box on the left.\n- Ritz crackers";

        let changes = extract_changes(text);

        assert_eq!(changes.added, vec!["Ritz crackers".to_string()]);
    }

    #[test]
    fn test_garbage_input_yields_empty() {
        assert!(extract_changes("").is_empty());
        assert!(extract_changes("\n\n   \n").is_empty());
        assert!(extract_changes("- \n* \n1.").is_empty());
    }

    #[test]
    fn test_parse_inventory_listing() {
        let listing = "Here is what I can see:\n\
                       - Kellogg's Froot Loops\n\
                       -   Poland Spring water bottle\n\
                       * not a dash line\n\
                       -\n\
                       - Germ-X hand sanitizer";

        let items = parse_inventory_listing(listing);

        assert_eq!(
            items,
            vec![
                "Kellogg's Froot Loops".to_string(),
                "Poland Spring water bottle".to_string(),
                "Germ-X hand sanitizer".to_string(),
            ]
        );
    }
}
