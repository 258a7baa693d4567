//! Batch Pipeline - single entry point for print and export runs
//!
//! CRITICAL: every run validates first. There is no path from a job to a
//! render surface that skips the validator.
//!
//! A run moves through `Idle -> Validating -> Rendering -> Completed`, or
//! ends in `Aborted` from either of the middle states. The first failure
//! stops the run; records after it are never touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::binder::{BindError, RecordBinder};
use crate::hashing::{compute_job_hash, compute_manifest_hash};
use crate::job::{Arrangement, BatchJob};
use crate::layout::{LayoutError, LayoutPlan};
use crate::scene::{Scene, Size};
use crate::source::{AcquireError, DefaultOpener, Record, SourceError, SourceOpener, SourcePool};
use crate::surface::{OutputFile, PageSetup, PageTag, RenderSurface, SurfaceError, SurfaceJob};
use crate::validation::{ValidationInput, ValidationResult, Validator, ViolationCategory};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::AtomicU32;

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

fn note_validation() {
    #[cfg(feature = "test-hooks")]
    VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Validating,
    Rendering,
    Completed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Aborted)
    }

    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Validating) | (Validating, Rendering) | (Validating, Aborted) | (Rendering, Completed) | (Rendering, Aborted)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::Validating => "validating",
            JobState::Rendering => "rendering",
            JobState::Completed => "completed",
            JobState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Tracks the states a run has passed through.
#[derive(Debug)]
struct JobMachine {
    history: Vec<JobState>,
}

impl JobMachine {
    fn new() -> Self {
        Self { history: vec![JobState::Idle] }
    }

    fn state(&self) -> JobState {
        self.history.last().copied().unwrap_or(JobState::Idle)
    }

    fn advance(&mut self, next: JobState) {
        let from = self.state();
        debug_assert!(from.can_advance_to(next), "illegal transition {} -> {}", from, next);
        info!(from = %from, to = %next, "job state");
        self.history.push(next);
    }

    fn abort(&mut self, error: &JobError) {
        if self.state().is_terminal() {
            return;
        }
        warn!(kind = ?error.kind(), record = ?error.record(), %error, "job aborted");
        self.history.push(JobState::Aborted);
    }
}

/// Cooperative cancellation flag, checked before each record.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// "record i / total" for display. `record` is the 1-based source record
/// when the instance came from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub position: usize,
    pub total: usize,
    pub record: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Consistency,
    Source,
    Record,
    Adapter,
    Cancelled,
}

fn at_record(record: &Option<usize>) -> String {
    record.map(|r| format!(" at record {}", r)).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("no render surface attached")]
    NoSurface,

    #[error("render surface '{surface}' is not ready: {error}")]
    SurfaceNotReady {
        surface: String,
        #[source]
        error: SurfaceError,
    },

    #[error("validation failed: {}", .0.summary())]
    Validation(ValidationResult),

    #[error(transparent)]
    SourceUnavailable(#[from] AcquireError),

    #[error("failed reading record {record} from '{source_id}': {error}")]
    RecordRead {
        record: usize,
        source_id: String,
        #[source]
        error: SourceError,
    },

    #[error("failed applying record {record}: {error}")]
    Record {
        record: usize,
        #[source]
        error: BindError,
    },

    #[error("render surface error{}: {error}", at_record(.record))]
    Surface {
        record: Option<usize>,
        #[source]
        error: SurfaceError,
    },

    #[error("job cancelled after {completed} of {total} instances")]
    Cancelled { completed: usize, total: usize },

    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("copy count must be at least 1")]
    InvalidCopies,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::NoSurface
            | JobError::SurfaceNotReady { .. }
            | JobError::Layout(_)
            | JobError::InvalidCopies
            | JobError::Serialization(_) => ErrorKind::Configuration,
            JobError::Validation(result) => match result.first_error().map(|v| v.category) {
                Some(ViolationCategory::Consistency) => ErrorKind::Consistency,
                _ => ErrorKind::Configuration,
            },
            JobError::SourceUnavailable(e) if matches!(e.error, SourceError::NotConfigured) => ErrorKind::Configuration,
            JobError::SourceUnavailable(_) | JobError::RecordRead { .. } => ErrorKind::Source,
            JobError::Record { .. } => ErrorKind::Record,
            JobError::Surface { .. } => ErrorKind::Adapter,
            JobError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// 1-based record index the failure is attributed to.
    pub fn record(&self) -> Option<usize> {
        match self {
            JobError::RecordRead { record, .. } | JobError::Record { record, .. } => Some(*record),
            JobError::Surface { record, .. } => *record,
            _ => None,
        }
    }

    pub fn to_render_result(&self) -> RenderResult {
        RenderResult::Failure {
            record: self.record(),
            kind: self.kind(),
            reason: self.to_string(),
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RenderResult {
    Success { pages: usize, records: usize },
    Failure { record: Option<usize>, kind: ErrorKind, reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub job_hash: String,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub surface: String,
    pub pages: usize,
    pub records_rendered: usize,
    pub instances: usize,
    pub outputs: Vec<OutputFile>,
    pub validation: ValidationResult,
    pub states: Vec<JobState>,
    pub manifest_hash: String,
}

impl RunReport {
    pub fn result(&self) -> RenderResult {
        RenderResult::Success {
            pages: self.pages,
            records: self.records_rendered,
        }
    }
}

/// Supplies the scene to paint for each instance of a run.
trait Instances {
    fn total(&self) -> usize;

    /// 1-based source record behind an instance, if any.
    fn record_index(&self, instance: usize) -> Option<usize>;

    fn prepare(&mut self, instance: usize) -> Result<&Scene, JobError>;
}

/// Records `start..=end`, bound into a working copy of the scene.
struct BoundRecords<'a> {
    job: &'a BatchJob,
    pool: &'a SourcePool,
    binder: RecordBinder,
    working: Scene,
    source_ids: Vec<&'a str>,
    start: usize,
    end: usize,
}

impl<'a> BoundRecords<'a> {
    fn new(job: &'a BatchJob, pool: &'a SourcePool, binder: RecordBinder, scene: &Scene, start: usize, end: usize) -> Self {
        let mut source_ids: Vec<&str> = job.bindings.iter().map(|b| b.source.as_str()).collect();
        source_ids.sort_unstable();
        source_ids.dedup();
        Self {
            job,
            pool,
            binder,
            working: scene.clone(),
            source_ids,
            start,
            end,
        }
    }
}

impl Instances for BoundRecords<'_> {
    fn total(&self) -> usize {
        self.end + 1 - self.start
    }

    fn record_index(&self, instance: usize) -> Option<usize> {
        Some(self.start + instance)
    }

    fn prepare(&mut self, instance: usize) -> Result<&Scene, JobError> {
        let record = self.start + instance;
        let mut rows: BTreeMap<&str, Record> = BTreeMap::new();
        for &id in &self.source_ids {
            let read_error = |error| JobError::RecordRead {
                record,
                source_id: id.to_string(),
                error,
            };
            let source = self.pool.get(id).ok_or_else(|| read_error(SourceError::NotConfigured))?;
            rows.insert(id, source.record_at(record - 1).map_err(read_error)?);
        }

        self.binder
            .apply_all(&self.job.bindings, |id| rows.get(id), &mut self.working)
            .map_err(|error| JobError::Record { record, error })?;
        debug!(record, "record bound");
        Ok(&self.working)
    }
}

/// The same scene, `copies` times.
struct StaticCopies<'a> {
    scene: &'a Scene,
    copies: usize,
}

impl Instances for StaticCopies<'_> {
    fn total(&self) -> usize {
        self.copies
    }

    fn record_index(&self, _instance: usize) -> Option<usize> {
        None
    }

    fn prepare(&mut self, _instance: usize) -> Result<&Scene, JobError> {
        Ok(self.scene)
    }
}

struct Examined {
    result: ValidationResult,
    pool: SourcePool,
}

struct Rendered {
    pages: usize,
    instances: usize,
    outputs: Vec<OutputFile>,
}

struct Outcome {
    surface: String,
    validation: ValidationResult,
    records: usize,
    rendered: Rendered,
}

fn ready_surface(surface: Option<&mut dyn RenderSurface>) -> Result<&mut dyn RenderSurface, JobError> {
    let surface = surface.ok_or(JobError::NoSurface)?;
    surface.preflight().map_err(|error| JobError::SurfaceNotReady {
        surface: surface.name().to_string(),
        error,
    })?;
    Ok(surface)
}

/// Drives batch print and export runs.
pub struct BatchPrinter {
    opener: Arc<dyn SourceOpener>,
    validator: Validator,
    binder: RecordBinder,
    cancel: CancelToken,
    last_state: Mutex<JobState>,
}

impl BatchPrinter {
    pub fn new(opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            opener,
            validator: Validator::new(),
            binder: RecordBinder::new(),
            cancel: CancelToken::new(),
            last_state: Mutex::new(JobState::Idle),
        }
    }

    /// Terminal state of the most recent run, `Idle` before the first one.
    pub fn last_state(&self) -> JobState {
        self.last_state.lock().map(|state| *state).unwrap_or(JobState::Idle)
    }

    fn settle(&self, machine: &JobMachine) {
        if let Ok(mut state) = self.last_state.lock() {
            *state = machine.state();
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle that cancels runs of this printer from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Validate a job without rendering. Sources are opened to count their
    /// records and released before returning.
    ///
    /// This is the ONLY validation entry point; `run` calls it too.
    pub fn validate(&self, job: &BatchJob, scene: &Scene) -> Result<ValidationResult, JobError> {
        let Examined { result, pool } = self.examine(job, scene)?;
        drop(pool);
        Ok(result)
    }

    fn examine(&self, job: &BatchJob, scene: &Scene) -> Result<Examined, JobError> {
        note_validation();

        let preflight = self.validator.preflight(&ValidationInput::new(job, scene));
        if !preflight.valid {
            return Ok(Examined { result: preflight, pool: SourcePool::empty() });
        }

        let pool = SourcePool::acquire(self.opener.as_ref(), job.referenced_sources())?;
        let consistency = self
            .validator
            .consistency(&ValidationInput::new(job, scene).with_pool(&pool));
        Ok(Examined {
            result: preflight.merge(consistency),
            pool,
        })
    }

    /// Bind and render every selected record.
    ///
    /// `surface: None` stands for "no renderer attached" and fails before
    /// any data is touched.
    #[instrument(skip_all, fields(bindings = job.bindings.len(), sources = job.sources.len()))]
    pub fn run<F>(
        &self,
        job: &BatchJob,
        scene: &Scene,
        surface: Option<&mut dyn RenderSurface>,
        mut progress: F,
    ) -> Result<RunReport, JobError>
    where
        F: FnMut(Progress),
    {
        let started_at = Utc::now();
        let mut machine = JobMachine::new();
        machine.advance(JobState::Validating);

        let outcome = self.execute_records(job, scene, surface, &mut machine, &mut progress);
        self.finish(machine, started_at, compute_job_hash(job, scene, ENGINE_VERSION), outcome)
    }

    /// Render a static scene `copies` times, with no data sources involved.
    #[instrument(skip_all, fields(copies = copies))]
    pub fn run_copies<F>(
        &self,
        scene: &Scene,
        copies: u32,
        arrangement: &Arrangement,
        surface: Option<&mut dyn RenderSurface>,
        mut progress: F,
    ) -> Result<RunReport, JobError>
    where
        F: FnMut(Progress),
    {
        let started_at = Utc::now();
        let mut machine = JobMachine::new();
        machine.advance(JobState::Validating);

        let fingerprint = serde_json::json!({ "copies": copies, "arrangement": arrangement });
        let outcome = self.execute_copies(scene, copies, arrangement, surface, &mut machine, &mut progress);
        self.finish(machine, started_at, compute_job_hash(&fingerprint, scene, ENGINE_VERSION), outcome)
    }

    fn execute_records(
        &self,
        job: &BatchJob,
        scene: &Scene,
        surface: Option<&mut dyn RenderSurface>,
        machine: &mut JobMachine,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Outcome, JobError> {
        let surface = ready_surface(surface)?;
        let surface_name = surface.name().to_string();

        let Examined { result, mut pool } = self.examine(job, scene)?;
        if !result.valid {
            return Err(JobError::Validation(result));
        }
        let bounds = result.record_count().and_then(|count| job.range.resolve(count));
        let Some((start, end)) = bounds else {
            return Err(JobError::Validation(result));
        };

        machine.advance(JobState::Rendering);
        info!(start, end, sources = pool.len(), "rendering records");

        let mut instances = BoundRecords::new(job, &pool, self.binder, scene, start, end);
        let rendered = self.render(&mut instances, scene.size, &job.arrangement, surface, progress);
        drop(instances);
        pool.release();
        let rendered = rendered?;

        Ok(Outcome {
            surface: surface_name,
            validation: result,
            records: rendered.instances,
            rendered,
        })
    }

    fn execute_copies(
        &self,
        scene: &Scene,
        copies: u32,
        arrangement: &Arrangement,
        surface: Option<&mut dyn RenderSurface>,
        machine: &mut JobMachine,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Outcome, JobError> {
        let surface = ready_surface(surface)?;
        let surface_name = surface.name().to_string();

        note_validation();
        if copies == 0 {
            return Err(JobError::InvalidCopies);
        }

        machine.advance(JobState::Rendering);
        let mut instances = StaticCopies { scene, copies: copies as usize };
        let rendered = self.render(&mut instances, scene.size, arrangement, surface, progress)?;

        Ok(Outcome {
            surface: surface_name,
            validation: ValidationResult::success(BTreeMap::new()),
            records: 0,
            rendered,
        })
    }

    fn render(
        &self,
        instances: &mut dyn Instances,
        label: Size,
        arrangement: &Arrangement,
        surface: &mut dyn RenderSurface,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Rendered, JobError> {
        let total = instances.total();
        let plan = arrangement.plan(label, total)?;
        let per_record = !arrangement.is_tiled();

        let last_index = if per_record {
            total
                .checked_sub(1)
                .and_then(|last| instances.record_index(last))
                .unwrap_or(total)
        } else {
            plan.page_count()
        };
        let setup = PageSetup {
            page_size: plan.page_size,
            pages: plan.page_count(),
            last_index,
        };

        let mut job = surface
            .begin_job(&setup)
            .map_err(|error| JobError::Surface { record: None, error })?;

        let painted = self.paint_plan(instances, &plan, per_record, job.as_mut(), progress);
        match painted {
            Ok(()) => {
                let outputs = job
                    .end_job()
                    .map_err(|error| JobError::Surface { record: None, error })?;
                Ok(Rendered {
                    pages: plan.page_count(),
                    instances: total,
                    outputs,
                })
            }
            Err(error) => {
                job.abort();
                Err(error)
            }
        }
    }

    fn paint_plan(
        &self,
        instances: &mut dyn Instances,
        plan: &LayoutPlan,
        per_record: bool,
        job: &mut (dyn SurfaceJob + '_),
        progress: &mut dyn FnMut(Progress),
    ) -> Result<(), JobError> {
        let total = instances.total();

        for page in plan.pages.iter().filter(|p| !p.placements.is_empty()) {
            let last_slot = page.placements.len() - 1;
            let mut pending = None;

            for (slot, placement) in page.placements.iter().enumerate() {
                let instance = placement.instance;
                if self.cancel.is_cancelled() {
                    return Err(JobError::Cancelled { completed: instance, total });
                }

                let record = instances.record_index(instance);
                let scene = instances.prepare(instance)?;
                let surface_error = |error| JobError::Surface { record, error };

                if slot == 0 {
                    let tag = PageTag {
                        number: page.index + 1,
                        record: if per_record { record } else { None },
                    };
                    job.begin_page(tag).map_err(surface_error)?;
                }
                job.paint(scene, placement.rect).map_err(surface_error)?;

                let step = Progress { position: instance + 1, total, record };
                if slot == last_slot {
                    pending = Some(step);
                } else {
                    progress(step);
                }
            }

            job.end_page().map_err(|error| JobError::Surface { record: None, error })?;
            debug!(page = page.index + 1, "page emitted");
            if let Some(step) = pending {
                progress(step);
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        mut machine: JobMachine,
        started_at: DateTime<Utc>,
        job_hash: Result<String, serde_json::Error>,
        outcome: Result<Outcome, JobError>,
    ) -> Result<RunReport, JobError> {
        let outcome = outcome.and_then(|o| Ok((o, job_hash?)));
        let (outcome, job_hash) = match outcome {
            Ok(done) => done,
            Err(error) => {
                machine.abort(&error);
                self.settle(&machine);
                return Err(error);
            }
        };

        machine.advance(JobState::Completed);
        self.settle(&machine);
        let mut report = RunReport {
            run_id: Uuid::new_v4().to_string(),
            job_hash,
            engine_version: ENGINE_VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            surface: outcome.surface,
            pages: outcome.rendered.pages,
            records_rendered: outcome.records,
            instances: outcome.rendered.instances,
            outputs: outcome.rendered.outputs,
            validation: outcome.validation,
            states: machine.history,
            manifest_hash: String::new(), // Computed after
        };
        report.manifest_hash = compute_manifest_hash(&report)?;

        info!(run_id = %report.run_id, pages = report.pages, files = report.outputs.len(), "job completed");
        Ok(report)
    }
}

impl Default for BatchPrinter {
    fn default() -> Self {
        Self::new(Arc::new(DefaultOpener::new()))
    }
}
