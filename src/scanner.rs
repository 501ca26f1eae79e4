// 🔍 Scanner - one capture/compare/record cycle
//
// First run:  capture -> save as current + previous -> (empty db) list inventory
// Later runs: capture -> compare with previous -> archive -> record -> rotate previous

use crate::db::{self, NewScan};
use crate::error::PantryResult;
use crate::extractor::{extract_changes, parse_inventory_listing};
use crate::images::{ImageSource, ImageStore};
use crate::reconciliation::{InventoryReconciler, ReconcileReport};
use crate::vision::{VisionModel, VisionResponse};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::{info, warn};

/// Image reference stored on the scan created by the first-run inventory listing
pub const INITIAL_SCAN_REF: &str = "initial_scan";

#[derive(Debug)]
pub enum ScanOutcome {
    /// No previous image existed; the capture became the baseline
    Baseline { initial: Option<ReconcileReport> },

    Compared {
        report: ReconcileReport,
        analysis: String,
        api_cost: f64,
    },
}

fn scan_record(response: &VisionResponse, image_ref: &str) -> NewScan {
    NewScan {
        image_ref: Some(image_ref.to_string()),
        raw_analysis: response.text.clone(),
        api_cost: response.usage.cost_usd(),
        input_tokens: response.usage.input_tokens as i64,
        output_tokens: response.usage.output_tokens as i64,
    }
}

pub struct Scanner<V, S> {
    vision: V,
    source: S,
    store: ImageStore,
    reconciler: InventoryReconciler,
}

impl<V: VisionModel, S: ImageSource> Scanner<V, S> {
    pub fn new(vision: V, source: S, store: ImageStore, reconciler: InventoryReconciler) -> Self {
        Scanner {
            vision,
            source,
            store,
            reconciler,
        }
    }

    pub fn run(&self, conn: &mut Connection, now: DateTime<Utc>) -> PantryResult<ScanOutcome> {
        self.store.ensure_dir()?;

        match self.store.load_previous()? {
            None => self.run_baseline(conn, now),
            Some(previous) => self.run_comparison(conn, &previous, now),
        }
    }

    fn run_baseline(&self, conn: &mut Connection, now: DateTime<Utc>) -> PantryResult<ScanOutcome> {
        info!("no previous image found, capturing baseline");
        let frame = self.source.capture()?;
        self.store.save_current(&frame)?;
        self.store.save_previous(&frame)?;

        let stats = db::get_statistics(conn, now)?;
        if stats.total_scans > 0 || stats.active_items > 0 {
            info!("database already populated, skipping initial inventory");
            return Ok(ScanOutcome::Baseline { initial: None });
        }

        info!("first-time setup detected, listing initial inventory");
        // A failed listing leaves a usable baseline; the next run compares against it
        let response = match self.vision.list_inventory(&frame) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "initial inventory analysis failed");
                return Ok(ScanOutcome::Baseline { initial: None });
            }
        };

        let items = parse_inventory_listing(&response.text);
        if items.is_empty() {
            warn!("initial inventory listing contained no items");
            return Ok(ScanOutcome::Baseline { initial: None });
        }

        let report = self.reconciler.record_initial_inventory(
            conn,
            &scan_record(&response, INITIAL_SCAN_REF),
            &items,
            now,
        )?;
        Ok(ScanOutcome::Baseline {
            initial: Some(report),
        })
    }

    fn run_comparison(
        &self,
        conn: &mut Connection,
        previous: &[u8],
        now: DateTime<Utc>,
    ) -> PantryResult<ScanOutcome> {
        let frame = self.source.capture()?;
        self.store.save_current(&frame)?;

        let response = self.vision.compare(previous, &frame)?;
        let archive = self.store.archive(&frame, now)?;

        let changes = extract_changes(&response.text);
        let report =
            self.reconciler
                .record_comparison(conn, &scan_record(&response, &archive), &changes, now)?;

        if let Err(e) = self.store.cleanup() {
            warn!(error = %e, "image cleanup failed");
        }

        // Rotated last: any earlier failure keeps the old baseline for the retry
        self.store.save_previous(&frame)?;
        info!(summary = %report.summary(), "scan complete");

        Ok(ScanOutcome::Compared {
            api_cost: response.usage.cost_usd(),
            analysis: response.text,
            report,
        })
    }
}

/// Capture one frame to the test image so the camera angle can be checked
pub fn test_camera<S: ImageSource>(source: &S, store: &ImageStore) -> PantryResult<PathBuf> {
    store.ensure_dir()?;
    let frame = source.capture()?;
    let path = store.save_test(&frame)?;
    info!(path = %path.display(), bytes = frame.len(), "camera test image saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PantryError;
    use crate::vision::TokenUsage;
    use chrono::Duration;
    use std::cell::Cell;
    use std::fs;

    struct FakeVision {
        comparison: Option<String>,
        listing: String,
        compare_calls: Cell<usize>,
        list_calls: Cell<usize>,
    }

    impl FakeVision {
        fn new(comparison: Option<&str>, listing: &str) -> Self {
            FakeVision {
                comparison: comparison.map(str::to_string),
                listing: listing.to_string(),
                compare_calls: Cell::new(0),
                list_calls: Cell::new(0),
            }
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            input_tokens: 3000,
            output_tokens: 400,
        }
    }

    impl VisionModel for FakeVision {
        fn compare(&self, _previous: &[u8], _current: &[u8]) -> PantryResult<VisionResponse> {
            self.compare_calls.set(self.compare_calls.get() + 1);
            match &self.comparison {
                Some(text) => Ok(VisionResponse {
                    text: text.clone(),
                    usage: usage(),
                }),
                None => Err(PantryError::Vision("HTTP 529: overloaded".to_string())),
            }
        }

        fn list_inventory(&self, _jpeg: &[u8]) -> PantryResult<VisionResponse> {
            self.list_calls.set(self.list_calls.get() + 1);
            Ok(VisionResponse {
                text: self.listing.clone(),
                usage: usage(),
            })
        }
    }

    /// Each capture yields a distinct frame
    struct FakeCamera {
        shots: Cell<u8>,
    }

    impl ImageSource for FakeCamera {
        fn capture(&self) -> PantryResult<Vec<u8>> {
            let n = self.shots.get() + 1;
            self.shots.set(n);
            Ok(vec![0xFF, 0xD8, n])
        }
    }

    fn setup(vision: FakeVision) -> (tempfile::TempDir, Connection, Scanner<FakeVision, FakeCamera>) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let scanner = Scanner::new(
            vision,
            FakeCamera { shots: Cell::new(0) },
            ImageStore::new(dir.path()),
            InventoryReconciler::new(),
        );
        (dir, conn, scanner)
    }

    const LISTING: &str = "Here is what I can see:\n- Kellogg's Froot Loops\n- Germ-X hand sanitizer - 1 bottle\n";

    const COMPARISON: &str = "ADDED ITEMS:\n- Ritz crackers (new box)\n\nREMOVED ITEMS:\n- Froot Loops\n\nQUANTITY CHANGED:\n- None detected\n";

    #[test]
    fn test_first_run_records_initial_inventory() {
        let (dir, mut conn, scanner) = setup(FakeVision::new(None, LISTING));

        let outcome = scanner.run(&mut conn, Utc::now()).unwrap();

        let report = match outcome {
            ScanOutcome::Baseline { initial: Some(report) } => report,
            other => panic!("expected initial inventory, got {:?}", other),
        };
        assert_eq!(report.added.len(), 2);
        assert!(dir.path().join("current.jpg").exists());
        assert!(dir.path().join("previous.jpg").exists());

        let scans = db::get_recent_scans(&conn, 10).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].image_ref.as_deref(), Some(INITIAL_SCAN_REF));
        assert!(scans[0].api_cost > 0.0);

        let changes = db::get_changes_for_scan(&conn, scans[0].id).unwrap();
        assert!(changes
            .iter()
            .any(|c| c.details.as_deref() == Some("Initial scan: Germ-X hand sanitizer - 1 bottle")));
        assert_eq!(scanner.vision.compare_calls.get(), 0);
    }

    #[test]
    fn test_baseline_skips_listing_when_db_has_history() {
        let (_dir, mut conn, scanner) = setup(FakeVision::new(None, LISTING));
        db::insert_scan(&conn, &NewScan::default(), Utc::now()).unwrap();

        let outcome = scanner.run(&mut conn, Utc::now()).unwrap();

        assert!(matches!(outcome, ScanOutcome::Baseline { initial: None }));
        assert_eq!(scanner.vision.list_calls.get(), 0);
    }

    #[test]
    fn test_second_run_compares_and_rotates_previous() {
        let (dir, mut conn, scanner) = setup(FakeVision::new(Some(COMPARISON), LISTING));
        let now = Utc::now();
        scanner.run(&mut conn, now).unwrap();

        let outcome = scanner.run(&mut conn, now + Duration::days(1)).unwrap();

        let report = match outcome {
            ScanOutcome::Compared { report, api_cost, .. } => {
                assert!((api_cost - 0.015).abs() < 1e-9);
                report
            }
            other => panic!("expected comparison, got {:?}", other),
        };
        assert_eq!(report.added[0].name, "Ritz crackers");
        assert_eq!(report.removed.len(), 1, "fuzzy match on Kellogg's Froot Loops");
        assert!(report.changed.is_empty());

        assert_eq!(fs::read(dir.path().join("previous.jpg")).unwrap(), vec![0xFF, 0xD8, 2]);
        let latest = &db::get_recent_scans(&conn, 1).unwrap()[0];
        assert!(latest.image_ref.as_deref().unwrap().starts_with("pantry_"));
        assert_eq!(db::count_scans(&conn).unwrap(), 2);
    }

    #[test]
    fn test_failed_comparison_keeps_baseline() {
        let (dir, mut conn, scanner) = setup(FakeVision::new(None, ""));
        scanner.run(&mut conn, Utc::now()).unwrap();

        let err = scanner.run(&mut conn, Utc::now()).unwrap_err();

        assert!(matches!(err, PantryError::Vision(_)));
        assert_eq!(fs::read(dir.path().join("previous.jpg")).unwrap(), vec![0xFF, 0xD8, 1]);
        assert_eq!(fs::read(dir.path().join("current.jpg")).unwrap(), vec![0xFF, 0xD8, 2]);
        assert_eq!(db::count_scans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_camera_writes_test_image() {
        let (dir, _conn, scanner) = setup(FakeVision::new(None, ""));

        let path = test_camera(&scanner.source, &scanner.store).unwrap();

        assert_eq!(path, dir.path().join("test_capture.jpg"));
        assert!(!dir.path().join("previous.jpg").exists());
    }
}
