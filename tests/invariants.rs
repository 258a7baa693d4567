//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees of a batch run.

use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use labelbatch_core::layout::{FillOrder, LayoutGrid, PaperSize};
use labelbatch_core::source::{DataSource, Delimiter, Record, SourceKind, SourceOpener};
use labelbatch_core::surface::PreviewSurface;
use labelbatch_core::{
    canonical_json, BatchJob, BatchPrinter, Binding, Element, ElementKind, ErrorKind, JobError, JobState, Rect, Scene,
    Size, SourceConfig, SourceDescriptor, SourceError, Symbology,
};

fn scene() -> Scene {
    Scene::new(Size::new(60.0, 40.0))
        .with_element(Element::text("name", Rect::new(2.0, 2.0, 56.0, 8.0), ""))
        .with_element(Element::barcode("sku", Rect::new(2.0, 12.0, 56.0, 20.0), Symbology::Code128, "0"))
        .with_element(Element::new(
            "logo",
            Rect::new(50.0, 32.0, 8.0, 6.0),
            ElementKind::Image { source: None },
        ))
}

fn inline(id: &str, rows: &[&str]) -> SourceConfig {
    SourceConfig::new(
        id,
        SourceDescriptor::InlineTable {
            text: rows.join("\n"),
            delimiter: Delimiter::Newline,
            field_separator: Some(";".into()),
            header: false,
        },
    )
}

/// Source whose rows are generated on demand and whose handles count closes.
struct CountingSource {
    rows: usize,
    columns: Vec<String>,
    closed: Arc<AtomicUsize>,
}

impl DataSource for CountingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DatabaseQuery
    }

    fn record_count(&self) -> usize {
        self.rows
    }

    fn record_at(&self, index: usize) -> Result<Record, SourceError> {
        if index >= self.rows {
            return Err(SourceError::OutOfRange { index, count: self.rows });
        }
        Ok(Record::new(self.columns.clone().into(), vec![format!("item-{}", index + 1)]))
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingOpener {
    rows: usize,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl CountingOpener {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SourceOpener for CountingOpener {
    fn open(&self, _config: &SourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSource {
            rows: self.rows,
            columns: vec!["name".into()],
            closed: Arc::clone(&self.closed),
        }))
    }
}

fn counted_job() -> BatchJob {
    BatchJob::new()
        .with_source(SourceConfig::new(
            "db",
            SourceDescriptor::DatabaseQuery {
                connection: ":memory:".into(),
                table: "items".into(),
                columns: vec![],
                filter: None,
            },
        ))
        .with_binding(Binding::new("name", "db", "name"))
}

#[test]
fn invariant_no_sources_is_not_configured() {
    let job = BatchJob::new().with_binding(Binding::new("name", "missing", 0usize));
    let mut preview = PreviewSurface::new();

    let err = BatchPrinter::default()
        .run(&job, &scene(), Some(&mut preview), |_| {})
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("not configured"));
    assert_eq!(preview.jobs_started(), 0);
    assert!(preview.pages().is_empty());
}

#[test]
fn invariant_mismatched_counts_render_nothing() {
    let job = BatchJob::new()
        .with_source(inline("a", &["1", "2", "3", "4", "5"]))
        .with_source(inline("b", &["x", "y", "z"]))
        .with_binding(Binding::new("name", "a", 0usize))
        .with_binding(Binding::new("sku", "b", 0usize));
    let mut preview = PreviewSurface::new();

    let err = BatchPrinter::default()
        .run(&job, &scene(), Some(&mut preview), |_| {})
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Consistency);
    assert!(err.to_string().contains("record counts mismatch across data sources"));
    assert_eq!(preview.jobs_started(), 0);
    assert!(preview.pages().is_empty());
}

#[test]
fn invariant_one_page_per_record_with_record_content() {
    let rows = ["Hex bolt;HB-100", "Wing nut;WN-200", "Flat washer;FW-300", "Lock pin;LP-400"];
    let job = BatchJob::new()
        .with_source(inline("parts", &rows))
        .with_binding(Binding::new("name", "parts", 0usize))
        .with_binding(Binding::new("sku", "parts", 1usize));
    let mut preview = PreviewSurface::new();

    let report = BatchPrinter::default()
        .run(&job, &scene(), Some(&mut preview), |_| {})
        .unwrap();

    assert_eq!(report.pages, rows.len());
    assert_eq!(preview.pages().len(), rows.len());
    for (i, row) in rows.iter().enumerate() {
        let (name, sku) = row.split_once(';').unwrap();
        let page = &preview.pages()[i];
        assert_eq!(page.tag.record, Some(i + 1));
        assert!(page.texts().contains(&name), "page {} lacks {}", i + 1, name);
        assert!(page.texts().contains(&sku), "page {} lacks {}", i + 1, sku);
    }
}

#[test]
fn invariant_unsupported_element_rejected_at_validation() {
    let job = BatchJob::new()
        .with_source(inline("parts", &["a", "b"]))
        .with_binding(Binding::new("logo", "parts", 0usize));
    let printer = BatchPrinter::default();

    let result = printer.validate(&job, &scene()).unwrap();
    assert!(!result.valid);
    assert_eq!(
        result.first_error().map(|v| v.message.as_str()),
        Some("element type image does not support data application")
    );

    let mut preview = PreviewSurface::new();
    let err = printer.run(&job, &scene(), Some(&mut preview), |_| {}).unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
    assert_eq!(err.record(), None);
    assert_eq!(preview.jobs_started(), 0);
}

#[test]
fn invariant_cancel_stops_after_current_record_and_releases_sources() {
    let opener = CountingOpener::new(10);
    let (opened, closed) = (Arc::clone(&opener.opened), Arc::clone(&opener.closed));
    let printer = BatchPrinter::new(Arc::new(opener));
    let token = printer.cancel_token();
    let mut preview = PreviewSurface::new();

    let err = printer
        .run(&counted_job(), &scene(), Some(&mut preview), |p| {
            if p.position == 3 {
                token.cancel();
            }
        })
        .unwrap_err();

    assert!(matches!(err, JobError::Cancelled { completed: 3, total: 10 }));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(preview.pages().len(), 3);
    assert_eq!(preview.jobs_aborted(), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn invariant_sources_released_after_record_failure() {
    let opener = CountingOpener::new(3);
    let closed = Arc::clone(&opener.closed);
    let printer = BatchPrinter::new(Arc::new(opener));
    let scene = Scene::new(Size::new(60.0, 40.0)).with_element(Element::barcode(
        "name",
        Rect::new(2.0, 2.0, 56.0, 20.0),
        Symbology::Ean13,
        "400638133393",
    ));
    let mut preview = PreviewSurface::new();

    let err = printer
        .run(&counted_job(), &scene, Some(&mut preview), |_| {})
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Record);
    assert_eq!(err.record(), Some(1));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(preview.pages().is_empty());
}

#[test]
fn invariant_finalize_failure_aborts_and_releases_sources() {
    let opener = CountingOpener::new(3);
    let closed = Arc::clone(&opener.closed);
    let printer = BatchPrinter::new(Arc::new(opener));
    let mut preview = PreviewSurface::failing_on_finish();

    let err = printer
        .run(&counted_job(), &scene(), Some(&mut preview), |_| {})
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Adapter);
    assert_eq!(err.record(), None);
    assert_eq!(printer.last_state(), JobState::Aborted);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(preview.jobs_finished(), 0);
}

#[test]
fn invariant_invalid_grid_rejected_before_sources_open() {
    let opener = CountingOpener::new(4);
    let opened = Arc::clone(&opener.opened);
    let printer = BatchPrinter::new(Arc::new(opener));
    let arrangement = serde_json::from_str(r#"{"mode": "tiled", "rows": 0, "columns": 3, "startRow": 9}"#).unwrap();
    let job = counted_job().with_arrangement(arrangement);
    let mut preview = PreviewSurface::new();

    let err = printer.run(&job, &scene(), Some(&mut preview), |_| {}).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("page arrangement invalid"));
    assert_eq!(opened.load(Ordering::SeqCst), 0);
    assert_eq!(preview.jobs_started(), 0);
}

#[test]
fn invariant_runs_on_worker_thread() {
    let printer = Arc::new(BatchPrinter::new(Arc::new(CountingOpener::new(4))));
    let worker = {
        let printer = Arc::clone(&printer);
        std::thread::spawn(move || {
            let mut preview = PreviewSurface::new();
            printer
                .run(&counted_job(), &scene(), Some(&mut preview), |_| {})
                .map(|report| report.pages)
                .map_err(|e| e.to_string())
        })
    };
    assert_eq!(worker.join().unwrap(), Ok(4));
}

#[test]
fn invariant_layout_idempotent_and_fill_order_preserves_cells() {
    let grid = LayoutGrid::new(3, 4, PaperSize::A4)
        .unwrap()
        .with_spacing(2.0, 2.0)
        .with_start(1, 2)
        .unwrap();
    let label = Size::new(40.0, 30.0);

    let first = grid.plan(label, 30).unwrap();
    let second = grid.plan(label, 30).unwrap();
    assert_eq!(first, second);

    let vertical = grid.clone().with_fill_order(FillOrder::Vertical).plan(label, 30).unwrap();
    let cells = |plan: &labelbatch_core::LayoutPlan| -> BTreeSet<(usize, u32, u32)> {
        plan.placements().map(|p| (p.page, p.row, p.column)).collect()
    };
    let order = |plan: &labelbatch_core::LayoutPlan| -> Vec<(usize, u32, u32)> {
        plan.placements().map(|p| (p.page, p.row, p.column)).collect()
    };
    assert_eq!(cells(&first), cells(&vertical));
    assert_ne!(order(&first), order(&vertical));
}

#[test]
fn invariant_starting_offset_reduces_first_page() {
    let grid = LayoutGrid::new(3, 3, PaperSize::A4).unwrap().with_start(1, 0).unwrap();
    let plan = grid.plan(Size::new(50.0, 50.0), 20).unwrap();

    assert_eq!(plan.pages[0].placements.len(), 6);
    assert!(plan.pages[0].placements.iter().all(|p| p.row >= 1));
    assert_eq!(plan.pages[1].placements.len(), 9);
}

#[test]
fn invariant_job_hash_stable_across_runs() {
    let job = BatchJob::new()
        .with_source(inline("parts", &["a;A1", "b;B2"]))
        .with_binding(Binding::new("name", "parts", 0usize));
    let printer = BatchPrinter::default();

    let mut first = PreviewSurface::new();
    let mut second = PreviewSurface::new();
    let r1 = printer.run(&job, &scene(), Some(&mut first), |_| {}).unwrap();
    let r2 = printer.run(&job, &scene(), Some(&mut second), |_| {}).unwrap();

    assert_eq!(r1.job_hash, r2.job_hash);
    assert_ne!(r1.run_id, r2.run_id);
    assert_eq!(first.pages(), second.pages());
}

#[test]
fn invariant_canonical_json_deterministic() {
    use serde_json::json;

    let obj1 = json!({"z": 1, "a": 2, "m": {"b": 1, "a": 2}});
    let obj2 = json!({"a": 2, "m": {"a": 2, "b": 1}, "z": 1});

    assert_eq!(canonical_json(&obj1).unwrap(), canonical_json(&obj2).unwrap());
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_run_calls_validate() {
    use labelbatch_core::pipeline::{get_validation_call_count, reset_validation_call_count};

    reset_validation_call_count();
    let job = BatchJob::new()
        .with_source(inline("parts", &["a"]))
        .with_binding(Binding::new("name", "parts", 0usize));
    let mut preview = PreviewSurface::new();
    BatchPrinter::default()
        .run(&job, &scene(), Some(&mut preview), |_| {})
        .unwrap();

    assert!(get_validation_call_count() >= 1);
}
