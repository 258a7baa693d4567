//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations. The validator runs them in order and
//! stops after the first rule that reports an error, so a job is judged on
//! the earliest thing wrong with it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::job::BatchJob;
use crate::scene::Scene;
use crate::source::SourcePool;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

/// Configuration problems are found without touching data; consistency
/// problems need the opened sources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    Configuration,
    Consistency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub category: ViolationCategory,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ValidationViolation {
    fn new(rule: &dyn ValidationRule, severity: ViolationSeverity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.name().to_string(),
            severity,
            category: rule.stage().category(),
            message: message.into(),
            expected: None,
            actual: None,
            remediation: vec![],
            element: None,
            source: None,
        }
    }

    fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    fn actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    fn remedy(mut self, remediation: impl Into<String>) -> Self {
        self.remediation.push(remediation.into());
        self
    }

    fn element(mut self, element: &str) -> Self {
        self.element = Some(element.to_string());
        self
    }

    fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    /// Usable record count per opened source.
    #[serde(default)]
    pub record_counts: BTreeMap<String, usize>,
}

impl ValidationResult {
    pub fn success(record_counts: BTreeMap<String, usize>) -> Self {
        Self {
            valid: true,
            violations: vec![],
            record_counts,
        }
    }

    pub fn failure(violations: Vec<ValidationViolation>) -> Self {
        Self {
            valid: false,
            violations,
            record_counts: BTreeMap::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn first_error(&self) -> Option<&ValidationViolation> {
        self.violations.iter().find(|v| v.severity == ViolationSeverity::Error)
    }

    /// `rule: message` for every error, joined.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Fold a later stage's result into this one.
    pub fn merge(mut self, later: ValidationResult) -> Self {
        self.valid = self.valid && later.valid;
        self.violations.extend(later.violations);
        if !later.record_counts.is_empty() {
            self.record_counts = later.record_counts;
        }
        self
    }

    /// Common record count when every opened source agrees.
    pub fn record_count(&self) -> Option<usize> {
        let counts: BTreeSet<usize> = self.record_counts.values().copied().collect();
        match counts.len() {
            1 => counts.into_iter().next(),
            _ => None,
        }
    }
}

/// What a rule looks at.
#[derive(Clone, Copy)]
pub struct ValidationInput<'a> {
    pub job: &'a BatchJob,
    pub scene: &'a Scene,
    /// Opened sources; absent during the configuration stage.
    pub pool: Option<&'a SourcePool>,
}

impl<'a> ValidationInput<'a> {
    pub fn new(job: &'a BatchJob, scene: &'a Scene) -> Self {
        Self { job, scene, pool: None }
    }

    pub fn with_pool(mut self, pool: &'a SourcePool) -> Self {
        self.pool = Some(pool);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    Configuration,
    Consistency,
}

impl ValidationStage {
    fn category(self) -> ViolationCategory {
        match self {
            ValidationStage::Configuration => ViolationCategory::Configuration,
            ValidationStage::Consistency => ViolationCategory::Consistency,
        }
    }
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn stage(&self) -> ValidationStage;
    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation>;
}

// --- Configuration rules ---

pub struct SourcesAttachedRule;

impl ValidationRule for SourcesAttachedRule {
    fn name(&self) -> &'static str { "sources_attached" }

    fn stage(&self) -> ValidationStage { ValidationStage::Configuration }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        use ViolationSeverity::*;

        let job = input.job;
        if job.sources.is_empty() {
            return vec![ValidationViolation::new(self, Error, "data source invalid or not configured")
                .expected("at least one data source")
                .actual("none attached")
                .remedy("Attach and configure a data source")];
        }

        let mut violations = vec![];
        let mut seen = BTreeSet::new();
        for source in &job.sources {
            if !seen.insert(source.id.as_str()) {
                violations.push(
                    ValidationViolation::new(self, Error, "data source attached more than once")
                        .source(&source.id)
                        .remedy("Give every data source a unique id"),
                );
            }
            if !job.is_referenced(&source.id) {
                violations.push(
                    ValidationViolation::new(self, Info, "data source is not bound to any element")
                        .source(&source.id),
                );
            } else if !source.is_configured() {
                violations.push(
                    ValidationViolation::new(self, Error, "data source invalid or not configured")
                        .source(&source.id)
                        .remedy("Choose a source kind and fill in its location"),
                );
            }
        }

        for binding in &job.bindings {
            if job.source(&binding.source).is_none() {
                violations.push(
                    ValidationViolation::new(self, Error, "binding references a data source that is not attached")
                        .element(&binding.element)
                        .source(&binding.source),
                );
            }
        }
        violations
    }
}

pub struct BindingTargetsRule;

impl ValidationRule for BindingTargetsRule {
    fn name(&self) -> &'static str { "binding_targets" }

    fn stage(&self) -> ValidationStage { ValidationStage::Configuration }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        use ViolationSeverity::*;

        if input.job.bindings.is_empty() {
            return vec![ValidationViolation::new(self, Error, "no element is bound to a data field")
                .remedy("Map at least one field to a text, barcode or QR code element")];
        }

        let mut violations = vec![];
        let mut bound = BTreeSet::new();
        for binding in &input.job.bindings {
            let Some(element) = input.scene.element(&binding.element) else {
                violations.push(
                    ValidationViolation::new(self, Error, "bound element does not exist in the scene")
                        .element(&binding.element),
                );
                continue;
            };
            if !element.capability().accepts_data() {
                violations.push(
                    ValidationViolation::new(
                        self,
                        Error,
                        format!("element type {} does not support data application", element.type_name()),
                    )
                    .expected("text, barcode or qrcode")
                    .actual(element.capability().to_string())
                    .element(&binding.element)
                    .remedy("Remove the binding or bind a text, barcode or QR code element"),
                );
            }
            if !bound.insert(binding.element.as_str()) {
                violations.push(
                    ValidationViolation::new(self, Warning, "element is bound more than once; the last binding wins")
                        .element(&binding.element),
                );
            }
        }
        violations
    }
}

pub struct ArrangementRule;

impl ValidationRule for ArrangementRule {
    fn name(&self) -> &'static str { "arrangement" }

    fn stage(&self) -> ValidationStage { ValidationStage::Configuration }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        match input.job.arrangement.check(input.scene.size) {
            Ok(()) => vec![],
            Err(error) => vec![ValidationViolation::new(self, ViolationSeverity::Error, "page arrangement invalid")
                .actual(error.to_string())
                .remedy("Use at least one row and column, with the starting cell inside the grid")],
        }
    }
}

// --- Consistency rules ---

pub struct NonEmptySourcesRule;

impl ValidationRule for NonEmptySourcesRule {
    fn name(&self) -> &'static str { "non_empty_sources" }

    fn stage(&self) -> ValidationStage { ValidationStage::Consistency }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let Some(pool) = input.pool else { return vec![] };
        pool.counts()
            .into_iter()
            .filter(|(_, count)| *count == 0)
            .map(|(id, _)| {
                ValidationViolation::new(self, ViolationSeverity::Error, "source contains no usable records")
                    .expected("at least 1 record")
                    .actual("0 records")
                    .source(&id)
                    .remedy("Check the row bounds, filter or delimiter of the source")
            })
            .collect()
    }
}

pub struct LockstepCountsRule;

impl ValidationRule for LockstepCountsRule {
    fn name(&self) -> &'static str { "lockstep_counts" }

    fn stage(&self) -> ValidationStage { ValidationStage::Consistency }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let Some(pool) = input.pool else { return vec![] };
        let counts = pool.counts();
        let distinct: BTreeSet<usize> = counts.values().copied().collect();
        if distinct.len() <= 1 {
            return vec![];
        }
        let actual = counts
            .iter()
            .map(|(id, n)| format!("{}={}", id, n))
            .collect::<Vec<_>>()
            .join(", ");
        vec![ValidationViolation::new(self, ViolationSeverity::Error, "record counts mismatch across data sources")
            .expected("equal record counts")
            .actual(actual)
            .remedy("Make every bound source yield the same number of records")]
    }
}

pub struct RecordRangeRule;

impl ValidationRule for RecordRangeRule {
    fn name(&self) -> &'static str { "record_range" }

    fn stage(&self) -> ValidationStage { ValidationStage::Consistency }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let Some(pool) = input.pool else { return vec![] };
        let Some(min) = pool.counts().values().copied().min() else { return vec![] };
        let range = input.job.range;
        if range.resolve(min).is_some() {
            return vec![];
        }
        let end = range.end.map_or_else(|| "last".to_string(), |e| e.to_string());
        vec![ValidationViolation::new(self, ViolationSeverity::Error, "selected record range invalid")
            .expected(format!("1..={}", min))
            .actual(format!("{}..={}", range.start, end))
            .remedy("Choose a start and end within the available records")]
    }
}

pub struct FieldSelectorsRule;

impl ValidationRule for FieldSelectorsRule {
    fn name(&self) -> &'static str { "field_selectors" }

    fn stage(&self) -> ValidationStage { ValidationStage::Consistency }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let Some(pool) = input.pool else { return vec![] };
        input
            .job
            .bindings
            .iter()
            .filter_map(|binding| {
                let source = pool.get(&binding.source)?;
                if binding.field.resolve(source.columns()).is_some() {
                    return None;
                }
                Some(
                    ValidationViolation::new(self, ViolationSeverity::Error, "bound field does not exist in the data source")
                        .expected(source.columns().join(", "))
                        .actual(binding.field.to_string())
                        .element(&binding.element)
                        .source(&binding.source),
                )
            })
            .collect()
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(SourcesAttachedRule),
                Box::new(BindingTargetsRule),
                Box::new(ArrangementRule),
                Box::new(NonEmptySourcesRule),
                Box::new(LockstepCountsRule),
                Box::new(RecordRangeRule),
                Box::new(FieldSelectorsRule),
            ],
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Checks that need no data.
    pub fn preflight(&self, input: &ValidationInput<'_>) -> ValidationResult {
        self.run(ValidationStage::Configuration, input)
    }

    /// Checks against the opened sources.
    pub fn consistency(&self, input: &ValidationInput<'_>) -> ValidationResult {
        let mut result = self.run(ValidationStage::Consistency, input);
        if let Some(pool) = input.pool {
            result.record_counts = pool.counts();
        }
        result
    }

    fn run(&self, stage: ValidationStage, input: &ValidationInput<'_>) -> ValidationResult {
        let mut all_violations = vec![];

        for rule in self.rules.iter().filter(|r| r.stage() == stage) {
            let violations = rule.validate(input);
            let blocking = violations.iter().any(|v| v.severity == ViolationSeverity::Error);
            all_violations.extend(violations);
            if blocking {
                return ValidationResult::failure(all_violations);
            }
        }

        ValidationResult {
            valid: true,
            violations: all_violations,
            record_counts: BTreeMap::new(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Binding;
    use crate::job::{Arrangement, RecordRange};
    use crate::layout::{LayoutGrid, PaperSize};
    use crate::scene::{Element, ElementKind, Rect, ShapeKind, Size};
    use crate::source::{DefaultOpener, Delimiter, SourceConfig, SourceDescriptor};

    fn scene() -> Scene {
        Scene::new(Size::new(60.0, 40.0))
            .with_element(Element::text("title", Rect::new(0.0, 0.0, 60.0, 10.0), ""))
            .with_element(Element::new(
                "frame",
                Rect::new(0.0, 0.0, 60.0, 40.0),
                ElementKind::Shape { shape: ShapeKind::Rectangle, filled: false },
            ))
    }

    fn inline(id: &str, text: &str) -> SourceConfig {
        SourceConfig::new(
            id,
            SourceDescriptor::InlineTable {
                text: text.into(),
                delimiter: Delimiter::Newline,
                field_separator: None,
                header: false,
            },
        )
    }

    fn pool(job: &BatchJob) -> SourcePool {
        SourcePool::acquire(&DefaultOpener::new(), job.referenced_sources()).unwrap()
    }

    #[test]
    fn test_no_sources_not_configured() {
        let job = BatchJob::new().with_binding(Binding::new("title", "a", 0usize));
        let result = Validator::new().preflight(&ValidationInput::new(&job, &scene()));
        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].message, "data source invalid or not configured");
        assert_eq!(result.violations[0].category, ViolationCategory::Configuration);
    }

    #[test]
    fn test_unconfigured_bound_source() {
        let job = BatchJob::new()
            .with_source(SourceConfig::unconfigured("a"))
            .with_binding(Binding::new("title", "a", 0usize));
        let result = Validator::new().preflight(&ValidationInput::new(&job, &scene()));
        let error = result.first_error().unwrap();
        assert_eq!(error.message, "data source invalid or not configured");
        assert_eq!(error.source.as_deref(), Some("a"));
    }

    #[test]
    fn test_unsupported_element_rejected() {
        let job = BatchJob::new()
            .with_source(inline("a", "x"))
            .with_binding(Binding::new("frame", "a", 0usize));
        let result = Validator::new().preflight(&ValidationInput::new(&job, &scene()));
        let error = result.first_error().unwrap();
        assert_eq!(error.rule, "binding_targets");
        assert_eq!(error.message, "element type shape does not support data application");
        assert_eq!(error.element.as_deref(), Some("frame"));
    }

    #[test]
    fn test_fail_fast_stops_at_first_failing_rule() {
        let job = BatchJob::new()
            .with_source(SourceConfig::unconfigured("a"))
            .with_binding(Binding::new("frame", "a", 0usize));
        let result = Validator::new().preflight(&ValidationInput::new(&job, &scene()));
        assert!(result.violations.iter().all(|v| v.rule == "sources_attached"));
    }

    #[test]
    fn test_grid_outside_bounds_rejected_before_sources() {
        let mut grid = LayoutGrid::new(3, 3, PaperSize::A4).unwrap();
        grid.start_column = 5;
        let job = BatchJob::new()
            .with_source(inline("a", "x"))
            .with_binding(Binding::new("title", "a", 0usize))
            .with_arrangement(Arrangement::Tiled(grid));
        let result = Validator::new().preflight(&ValidationInput::new(&job, &scene()));
        let error = result.first_error().unwrap();
        assert_eq!(error.rule, "arrangement");
        assert_eq!(error.category, ViolationCategory::Configuration);
        assert_eq!(error.message, "page arrangement invalid");
    }

    #[test]
    fn test_mismatched_counts() {
        let job = BatchJob::new()
            .with_source(inline("a", "1\n2\n3\n4\n5"))
            .with_source(inline("b", "1\n2\n3"))
            .with_binding(Binding::new("title", "a", 0usize))
            .with_binding(Binding::new("title", "b", 0usize));
        let pool = pool(&job);
        let scene = scene();
        let result = Validator::new().consistency(&ValidationInput::new(&job, &scene).with_pool(&pool));
        let error = result.first_error().unwrap();
        assert_eq!(error.message, "record counts mismatch across data sources");
        assert_eq!(error.actual.as_deref(), Some("a=5, b=3"));
        assert_eq!(result.record_count(), None);
    }

    #[test]
    fn test_empty_source() {
        let job = BatchJob::new()
            .with_source(inline("a", "\n \n"))
            .with_binding(Binding::new("title", "a", 0usize));
        let pool = pool(&job);
        let scene = scene();
        let result = Validator::new().consistency(&ValidationInput::new(&job, &scene).with_pool(&pool));
        assert_eq!(result.first_error().unwrap().message, "source contains no usable records");
    }

    #[test]
    fn test_range_outside_records() {
        let job = BatchJob::new()
            .with_source(inline("a", "1\n2\n3"))
            .with_binding(Binding::new("title", "a", 0usize))
            .with_range(RecordRange::new(2, 4));
        let pool = pool(&job);
        let scene = scene();
        let result = Validator::new().consistency(&ValidationInput::new(&job, &scene).with_pool(&pool));
        let error = result.first_error().unwrap();
        assert_eq!(error.message, "selected record range invalid");
        assert_eq!(error.expected.as_deref(), Some("1..=3"));
        assert_eq!(error.actual.as_deref(), Some("2..=4"));
    }

    #[test]
    fn test_unknown_field_name() {
        let job = BatchJob::new()
            .with_source(inline("a", "1\n2"))
            .with_binding(Binding::new("title", "a", "sku"));
        let pool = pool(&job);
        let scene = scene();
        let result = Validator::new().consistency(&ValidationInput::new(&job, &scene).with_pool(&pool));
        assert_eq!(result.first_error().unwrap().rule, "field_selectors");
    }

    #[test]
    fn test_valid_job_reports_counts() {
        let job = BatchJob::new()
            .with_source(inline("a", "1\n2"))
            .with_source(SourceConfig::unconfigured("spare"))
            .with_binding(Binding::new("title", "a", 0usize));
        let scene = scene();
        let validator = Validator::new();
        let preflight = validator.preflight(&ValidationInput::new(&job, &scene));
        assert!(preflight.valid);
        assert!(preflight.violations.iter().any(|v| v.severity == ViolationSeverity::Info));

        let pool = pool(&job);
        let result = preflight.merge(validator.consistency(&ValidationInput::new(&job, &scene).with_pool(&pool)));
        assert!(result.valid);
        assert!(!result.has_errors());
        assert_eq!(result.record_count(), Some(2));
    }
}
