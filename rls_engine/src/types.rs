//! Core type definitions shared by the static analyzer and the live harness.
//!
//! - [`Severity`] and [`RuleCategory`] classify findings
//! - [`Diagnostic`] is the atomic unit of static-analysis output
//! - [`Operation`], [`ExpectedOutcome`], [`Outcome`] describe a live probe
//! - [`TestResult`] is the atomic unit of harness output
//! - [`Report`] aggregates both and owns the pass/fail verdict

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a diagnostic.
///
/// The derived ordering puts the most severe level first, so sorting
/// ascending yields "severity descending" output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Must be fixed; causes a non-zero exit.
    Error,
    /// Should be addressed but does not block.
    Warning,
    /// Informational notice, no action required.
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// Which part of the system produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCategory {
    /// Statement the scanner could not classify (SCAN001).
    Scanner,
    /// Identifier naming conventions (NAME001-NAME006).
    Naming,
    /// Primary key, foreign key and check constraints (CON001-CON004).
    Constraints,
    /// Index coverage and index method (IDX001-IDX003).
    Indexes,
    /// Row-level security coverage and policy shape (RLS001-RLS006).
    RowLevelSecurity,
    /// Live harness bookkeeping: skipped scenarios, missing tables (DYN001-DYN003).
    Harness,
    /// A checker panicked.
    Internal,
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scanner => write!(f, "Scanner"),
            Self::Naming => write!(f, "Naming"),
            Self::Constraints => write!(f, "Constraints"),
            Self::Indexes => write!(f, "Indexes"),
            Self::RowLevelSecurity => write!(f, "RowLevelSecurity"),
            Self::Harness => write!(f, "Harness"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// A single finding produced by a rule.
///
/// Every diagnostic must carry a specific `rule_id`, an actionable `message`
/// and the right `severity`. Diagnostics are never mutated after the engine
/// has applied configuration overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Rule identifier, e.g. `"RLS001"`.
    pub rule_id: String,

    /// Human-readable explanation of the finding.
    pub message: String,

    /// Severity level.
    pub severity: Severity,

    /// Rule family.
    pub category: RuleCategory,

    /// Source file (forward slashes), or empty for live-harness findings.
    pub file_path: String,

    /// 1-based source line (0 if not applicable).
    pub line: u32,

    /// 1-based column (0 if not applicable).
    pub column: u32,

    /// Table the finding is attributed to, if any.
    pub table: Option<String>,

    /// Offending text (max 120 chars), if available.
    pub snippet: Option<String>,

    /// Suggested fix, if one exists.
    pub suggestion: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic with no location, table, snippet or suggestion.
    #[must_use]
    pub fn new(
        rule_id: &str,
        severity: Severity,
        category: RuleCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.to_owned(),
            message: message.into(),
            severity,
            category,
            file_path: String::new(),
            line: 0,
            column: 0,
            table: None,
            snippet: None,
            suggestion: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn at(mut self, file_path: &str, line: u32) -> Self {
        self.file_path = file_path.to_owned();
        self.line = line;
        self
    }

    /// Attribute the diagnostic to a table.
    #[must_use]
    pub fn on_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_owned());
        self
    }

    /// Attach an offending snippet, truncated to 120 characters.
    #[must_use]
    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = Some(truncate_snippet(snippet));
        self
    }

    /// Attach a suggested fix.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Total order used for deterministic output:
    /// `(file, line, severity desc, rule_id, message)`.
    #[must_use]
    pub fn sort_key_cmp(&self, other: &Self) -> Ordering {
        self.file_path
            .cmp(&other.file_path)
            .then(self.line.cmp(&other.line))
            .then(self.severity.cmp(&other.severity))
            .then(self.rule_id.cmp(&other.rule_id))
            .then(self.column.cmp(&other.column))
            .then(self.message.cmp(&other.message))
    }
}

/// Collapse whitespace and cap a snippet at 120 characters.
fn truncate_snippet(snippet: &str) -> String {
    let collapsed = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= 120 {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(117).collect();
        cut.push_str("...");
        cut
    }
}

// ---------------------------------------------------------------------------
// Live probe vocabulary
// ---------------------------------------------------------------------------

/// A data operation a probe attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// All four CRUD operations in canonical order.
    pub const ALL: [Operation; 4] = [
        Operation::Select,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
    ];

    /// Parse a case-insensitive SQL verb.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Why a probe was classified as denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// The database raised an insufficient-privilege error (SQLSTATE 42501),
    /// which includes RLS `WITH CHECK` violations.
    PermissionDenied { code: String, message: String },
    /// A SELECT for the seeded row id returned zero rows.
    NoRowsVisible,
    /// An UPDATE/DELETE for the seeded row id affected zero rows.
    NoRowsAffected,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied { code, message } => {
                write!(f, "permission denied ({code}): {message}")
            }
            Self::NoRowsVisible => write!(f, "seeded row not visible"),
            Self::NoRowsAffected => write!(f, "no rows affected"),
        }
    }
}

/// What a probe actually observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Denied { detail: DenialReason },
    Allowed { rows: u64 },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Denied { detail } => write!(f, "Denied ({detail})"),
            Self::Allowed { rows } => write!(f, "Allowed ({rows} row(s))"),
        }
    }
}

/// What a scenario expects the probe to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "expect", content = "rows", rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Denied,
    Allowed,
    RowCountEquals(u64),
}

impl ExpectedOutcome {
    /// Whether an observed outcome satisfies this expectation.
    #[must_use]
    pub fn is_satisfied_by(&self, actual: &Outcome) -> bool {
        match (self, actual) {
            (Self::Denied, Outcome::Denied { .. }) => true,
            (Self::Allowed, Outcome::Allowed { .. }) => true,
            (Self::RowCountEquals(n), Outcome::Allowed { rows }) => rows == n,
            // Zero visible rows is how RLS denies a SELECT.
            (Self::RowCountEquals(0), Outcome::Denied { detail }) => {
                matches!(detail, DenialReason::NoRowsVisible | DenialReason::NoRowsAffected)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Denied => write!(f, "Denied"),
            Self::Allowed => write!(f, "Allowed"),
            Self::RowCountEquals(n) => write!(f, "Allowed with exactly {n} row(s)"),
        }
    }
}

/// Final classification of one scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    /// Identity established and the isolation invariant held.
    Passed,
    /// Identity established but the invariant did not hold: a security defect.
    Failed,
    /// The test itself could not run as designed (identity, fixture,
    /// connection or timeout). Never a pass and never a security failure.
    HarnessError,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "FAILED"),
            Self::HarnessError => write!(f, "harness error"),
        }
    }
}

/// Outcome of one scenario instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Scenario name, e.g. `"user_isolation.select"`.
    pub scenario: String,
    /// Schema-qualified table under test.
    pub table: String,
    /// Operation the probe attempted.
    pub operation: Operation,
    /// Human-readable description of the probing identity.
    pub identity: String,
    /// What the scenario expected.
    pub expected: ExpectedOutcome,
    /// What was observed; `None` for harness errors.
    pub actual: Option<Outcome>,
    /// Final classification.
    pub status: TestStatus,
    /// Convenience flag, `status == Passed`.
    pub passed: bool,
    /// Wall-clock duration of the scenario session.
    pub duration_ms: u64,
    /// Harness error text or extra failure context.
    pub error_detail: Option<String>,
}

impl TestResult {
    /// Explain the result in one sentence; never just "failed".
    #[must_use]
    pub fn explanation(&self) -> String {
        match self.status {
            TestStatus::Passed => format!(
                "{} on {} as {}: expected {}, observed {}",
                self.operation,
                self.table,
                self.identity,
                self.expected,
                self.actual
                    .as_ref()
                    .map_or_else(|| "nothing".to_owned(), ToString::to_string),
            ),
            TestStatus::Failed => format!(
                "ISOLATION VIOLATED: {} on {} as {} was expected to be {} but was {}",
                self.operation,
                self.table,
                self.identity,
                self.expected,
                self.actual
                    .as_ref()
                    .map_or_else(|| "nothing".to_owned(), ToString::to_string),
            ),
            TestStatus::HarnessError => format!(
                "test could not run ({} on {} as {}): {}",
                self.operation,
                self.table,
                self.identity,
                self.error_detail.as_deref().unwrap_or("unknown harness error"),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Overall verdict of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Passed,
    PassedWithWarnings,
    Failed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "Passed"),
            Self::PassedWithWarnings => write!(f, "PassedWithWarnings"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// One entry in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportItem {
    Diagnostic(Diagnostic),
    Test(TestResult),
}

/// What a report source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Table,
}

/// Per-input attribution, preserved across merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub kind: SourceKind,
    /// File path or schema-qualified table name.
    pub name: String,
    /// SHA-256 of file content (files only).
    pub content_hash: Option<String>,
    /// Statements scanned (files) or scenarios run (tables).
    pub units: u32,
}

/// Top-level artifact of an analyzer or harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub status: ReportStatus,
    pub errors: u32,
    pub warnings: u32,
    pub infos: u32,
    pub passed: u32,
    pub failed: u32,
    pub harness_errors: u32,
    /// Warnings counted above but dropped from `items` by truncation.
    #[serde(default)]
    pub omitted_warnings: u32,
    /// Infos counted above but dropped from `items` by truncation.
    #[serde(default)]
    pub omitted_infos: u32,
    pub items: Vec<ReportItem>,
    pub sources: Vec<SourceSummary>,
    pub elapsed_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            status: ReportStatus::Passed,
            errors: 0,
            warnings: 0,
            infos: 0,
            passed: 0,
            failed: 0,
            harness_errors: 0,
            omitted_warnings: 0,
            omitted_infos: 0,
            items: Vec::new(),
            sources: Vec::new(),
            elapsed_ms: 0,
            generated_at: Utc::now(),
        }
    }
}

impl Report {
    /// Build a report from static diagnostics.
    #[must_use]
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>, sources: Vec<SourceSummary>) -> Self {
        let mut report = Self {
            items: diagnostics.into_iter().map(ReportItem::Diagnostic).collect(),
            sources,
            ..Self::default()
        };
        report.normalize();
        report
    }

    /// Build a report from harness results plus harness diagnostics.
    #[must_use]
    pub fn from_results(
        results: Vec<TestResult>,
        diagnostics: Vec<Diagnostic>,
        sources: Vec<SourceSummary>,
    ) -> Self {
        let mut items: Vec<ReportItem> =
            diagnostics.into_iter().map(ReportItem::Diagnostic).collect();
        items.extend(results.into_iter().map(ReportItem::Test));
        let mut report = Self {
            items,
            sources,
            ..Self::default()
        };
        report.normalize();
        report
    }

    /// Merge another report into this one, keeping every item's attribution.
    pub fn merge(&mut self, other: Report) {
        self.items.extend(other.items);
        for source in other.sources {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
        self.elapsed_ms += other.elapsed_ms;
        self.omitted_warnings += other.omitted_warnings;
        self.omitted_infos += other.omitted_infos;
        self.normalize();
    }

    /// Sort items deterministically and recompute counts and status.
    ///
    /// Diagnostics come first, ordered by `(file, line, severity desc)`;
    /// test results follow, ordered by `(table, scenario, operation)`.
    pub fn normalize(&mut self) {
        let (mut diags, mut tests): (Vec<ReportItem>, Vec<ReportItem>) = self
            .items
            .drain(..)
            .partition(|i| matches!(i, ReportItem::Diagnostic(_)));
        diags.sort_by(|a, b| match (a, b) {
            (ReportItem::Diagnostic(x), ReportItem::Diagnostic(y)) => {
                x.sort_key_cmp(y).then_with(|| x.table.cmp(&y.table))
            }
            _ => Ordering::Equal,
        });
        tests.sort_by(|a, b| match (a, b) {
            (ReportItem::Test(x), ReportItem::Test(y)) => x
                .table
                .cmp(&y.table)
                .then_with(|| x.scenario.cmp(&y.scenario))
                .then_with(|| x.operation.cmp(&y.operation)),
            _ => Ordering::Equal,
        });
        self.items = diags;
        self.items.extend(tests);
        self.sources.sort_by(|a, b| a.name.cmp(&b.name));
        self.recount();
    }

    /// Iterate over the diagnostics in this report.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter_map(|i| match i {
            ReportItem::Diagnostic(d) => Some(d),
            ReportItem::Test(_) => None,
        })
    }

    /// Iterate over the test results in this report.
    pub fn results(&self) -> impl Iterator<Item = &TestResult> {
        self.items.iter().filter_map(|i| match i {
            ReportItem::Test(t) => Some(t),
            ReportItem::Diagnostic(_) => None,
        })
    }

    /// Keep at most `max` diagnostics (0 = unlimited).
    ///
    /// Errors are never dropped, even past `max`. The remaining budget goes
    /// to warnings, then infos, in report order. Counts and status still
    /// reflect every diagnostic found.
    pub fn truncate_diagnostics(&mut self, max: usize) {
        let total = self.diagnostics().count();
        if max == 0 || total <= max {
            return;
        }
        let count = |sev: Severity| self.diagnostics().filter(|d| d.severity == sev).count();
        let errors = count(Severity::Error);
        let warnings = count(Severity::Warning);
        let keep_warnings = max.saturating_sub(errors).min(warnings);
        let keep_infos = max.saturating_sub(errors + keep_warnings);

        let (mut seen_warnings, mut seen_infos) = (0, 0);
        let (mut dropped_warnings, mut dropped_infos) = (0u32, 0u32);
        self.items.retain(|item| match item {
            ReportItem::Diagnostic(d) => match d.severity {
                Severity::Error => true,
                Severity::Warning => {
                    seen_warnings += 1;
                    let keep = seen_warnings <= keep_warnings;
                    dropped_warnings += u32::from(!keep);
                    keep
                }
                Severity::Info => {
                    seen_infos += 1;
                    let keep = seen_infos <= keep_infos;
                    dropped_infos += u32::from(!keep);
                    keep
                }
            },
            ReportItem::Test(_) => true,
        });
        log::info!(
            "Truncated {total} diagnostics to max_diagnostics={max} ({dropped_warnings} warning(s), \
             {dropped_infos} info(s) omitted)"
        );
        self.omitted_warnings += dropped_warnings;
        self.omitted_infos += dropped_infos;
        self.recount();
    }

    /// Process exit code: 0 = clean, 1 = errors or security failures.
    #[must_use]
    pub fn exit_code(&self, fail_on_warnings: bool) -> i32 {
        match self.status {
            ReportStatus::Failed => 1,
            ReportStatus::PassedWithWarnings if fail_on_warnings => 1,
            _ => 0,
        }
    }

    fn recount(&mut self) {
        let (mut errors, mut warnings, mut infos) = (0, 0, 0);
        let (mut passed, mut failed, mut harness_errors) = (0, 0, 0);
        for item in &self.items {
            match item {
                ReportItem::Diagnostic(d) => match d.severity {
                    Severity::Error => errors += 1,
                    Severity::Warning => warnings += 1,
                    Severity::Info => infos += 1,
                },
                ReportItem::Test(t) => match t.status {
                    TestStatus::Passed => passed += 1,
                    TestStatus::Failed => failed += 1,
                    TestStatus::HarnessError => harness_errors += 1,
                },
            }
        }
        self.errors = errors;
        self.warnings = warnings + self.omitted_warnings;
        self.infos = infos + self.omitted_infos;
        self.passed = passed;
        self.failed = failed;
        self.harness_errors = harness_errors;
        self.status = if errors > 0 || failed > 0 {
            ReportStatus::Failed
        } else if self.warnings > 0 || harness_errors > 0 {
            ReportStatus::PassedWithWarnings
        } else {
            ReportStatus::Passed
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(rule: &str, severity: Severity, file: &str, line: u32) -> Diagnostic {
        Diagnostic::new(rule, severity, RuleCategory::Naming, "msg").at(file, line)
    }

    fn result(table: &str, status: TestStatus) -> TestResult {
        TestResult {
            scenario: "user_isolation.select".to_owned(),
            table: table.to_owned(),
            operation: Operation::Select,
            identity: "user B".to_owned(),
            expected: ExpectedOutcome::Denied,
            actual: Some(Outcome::Denied {
                detail: DenialReason::NoRowsVisible,
            }),
            status,
            passed: status == TestStatus::Passed,
            duration_ms: 3,
            error_detail: None,
        }
    }

    #[test]
    fn test_status_failed_iff_errors() {
        let report = Report::from_diagnostics(
            vec![diag("RLS001", Severity::Error, "a.sql", 1)],
            Vec::new(),
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.exit_code(false), 1);

        let report = Report::from_diagnostics(
            vec![diag("NAME003", Severity::Warning, "a.sql", 1)],
            Vec::new(),
        );
        assert_eq!(report.status, ReportStatus::PassedWithWarnings);
        assert_eq!(report.exit_code(false), 0);
        assert_eq!(report.exit_code(true), 1);
    }

    #[test]
    fn test_info_only_passes() {
        let report =
            Report::from_diagnostics(vec![diag("RLS003", Severity::Info, "a.sql", 1)], Vec::new());
        assert_eq!(report.status, ReportStatus::Passed);
        assert_eq!(report.infos, 1);
    }

    #[test]
    fn test_failed_result_fails_report() {
        let report = Report::from_results(
            vec![result("public.orders", TestStatus::Failed)],
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_harness_error_is_not_failure() {
        let report = Report::from_results(
            vec![
                result("public.orders", TestStatus::Passed),
                result("public.orders", TestStatus::HarnessError),
            ],
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(report.failed, 0);
        assert_eq!(report.harness_errors, 1);
        assert_eq!(report.status, ReportStatus::PassedWithWarnings);
    }

    #[test]
    fn test_diagnostics_sorted_by_line_then_severity() {
        let report = Report::from_diagnostics(
            vec![
                diag("NAME003", Severity::Warning, "a.sql", 5),
                diag("CON001", Severity::Error, "a.sql", 5),
                diag("RLS001", Severity::Error, "a.sql", 2),
            ],
            Vec::new(),
        );
        let ids: Vec<&str> = report.diagnostics().map(|d| d.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["RLS001", "CON001", "NAME003"]);
    }

    #[test]
    fn test_merge_keeps_attribution() {
        let mut a = Report::from_diagnostics(
            vec![diag("RLS001", Severity::Error, "a.sql", 1)],
            vec![SourceSummary {
                kind: SourceKind::File,
                name: "a.sql".to_owned(),
                content_hash: None,
                units: 1,
            }],
        );
        let b = Report::from_results(
            vec![result("public.orders", TestStatus::Passed)],
            Vec::new(),
            vec![SourceSummary {
                kind: SourceKind::Table,
                name: "public.orders".to_owned(),
                content_hash: None,
                units: 1,
            }],
        );
        a.merge(b);
        assert_eq!(a.items.len(), 2);
        assert_eq!(a.sources.len(), 2);
        assert_eq!(a.errors, 1);
        assert_eq!(a.passed, 1);
        assert_eq!(a.status, ReportStatus::Failed);
        assert!(matches!(a.items[0], ReportItem::Diagnostic(_)));
        assert!(matches!(a.items[1], ReportItem::Test(_)));
    }

    #[test]
    fn test_truncation_never_drops_errors() {
        let mut diags: Vec<Diagnostic> = (1..=10)
            .map(|line| diag("NAME001", Severity::Warning, "a.sql", line))
            .collect();
        diags.push(diag("RLS003", Severity::Info, "a.sql", 1));
        diags.push(diag("RLS001", Severity::Error, "b.sql", 1));
        let mut report = Report::from_diagnostics(diags, Vec::new());
        report.truncate_diagnostics(3);

        let kept: Vec<&str> = report.diagnostics().map(|d| d.rule_id.as_str()).collect();
        assert_eq!(kept.len(), 3);
        assert!(kept.contains(&"RLS001"));
        assert!(!kept.contains(&"RLS003"));
        assert_eq!(report.errors, 1);
        assert_eq!(report.warnings, 10);
        assert_eq!(report.infos, 1);
        assert_eq!(report.omitted_warnings, 8);
        assert_eq!(report.omitted_infos, 1);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.exit_code(false), 1);
    }

    #[test]
    fn test_truncation_keeps_errors_past_the_limit() {
        let diags = (1..=4)
            .map(|line| diag("CON001", Severity::Error, "a.sql", line))
            .chain(std::iter::once(diag("NAME001", Severity::Warning, "a.sql", 9)))
            .collect();
        let mut report = Report::from_diagnostics(diags, Vec::new());
        report.truncate_diagnostics(2);
        assert_eq!(report.diagnostics().count(), 4);
        assert_eq!(report.errors, 4);
        assert_eq!(report.warnings, 1);

        // Counts survive a merge with another truncated report.
        let other = report.clone();
        report.merge(other);
        assert_eq!(report.errors, 8);
        assert_eq!(report.warnings, 2);
    }

    #[test]
    fn test_expected_outcome_matching() {
        let denied = Outcome::Denied {
            detail: DenialReason::NoRowsVisible,
        };
        let one = Outcome::Allowed { rows: 1 };
        assert!(ExpectedOutcome::Denied.is_satisfied_by(&denied));
        assert!(!ExpectedOutcome::Denied.is_satisfied_by(&one));
        assert!(ExpectedOutcome::RowCountEquals(1).is_satisfied_by(&one));
        assert!(!ExpectedOutcome::RowCountEquals(2).is_satisfied_by(&one));
        assert!(ExpectedOutcome::RowCountEquals(0).is_satisfied_by(&denied));
        assert!(ExpectedOutcome::Allowed.is_satisfied_by(&one));
        assert!(!ExpectedOutcome::Allowed.is_satisfied_by(&denied));
    }

    #[test]
    fn test_failed_explanation_names_expected_and_actual() {
        let mut r = result("public.orders", TestStatus::Failed);
        r.actual = Some(Outcome::Allowed { rows: 1 });
        let text = r.explanation();
        assert!(text.contains("ISOLATION VIOLATED"));
        assert!(text.contains("Denied"));
        assert!(text.contains("Allowed (1 row(s))"));
    }

    #[test]
    fn test_snippet_truncated() {
        let long = "x".repeat(300);
        let d = Diagnostic::new("X", Severity::Info, RuleCategory::Scanner, "m").with_snippet(&long);
        assert_eq!(d.snippet.unwrap().chars().count(), 120);
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("select"), Some(Operation::Select));
        assert_eq!(Operation::parse(" DELETE "), Some(Operation::Delete));
        assert_eq!(Operation::parse("merge"), None);
    }

    #[test]
    fn test_json_status_strings() {
        let report = Report::default();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"Passed\""));
    }
}
