//! Report rendering: text, Markdown, JSON and SARIF.
//!
//! 1. **Text**: one line per item plus a summary, for terminals.
//! 2. **Markdown**: summary and tables, for PR comments and CI job summaries.
//! 3. **JSON**: native format via `serde_json` serialization of [`Report`].
//! 4. **SARIF v2.1.0**: Static Analysis Results Interchange Format, compatible
//!    with GitHub Code Scanning. Only diagnostics are emitted; live test
//!    results have no source location.
//!
//! ## SARIF Field Mapping
//!
//! | Diagnostic field | SARIF location |
//! |---|---|
//! | `rule_id` | `result.ruleId` |
//! | `message` | `result.message.text` |
//! | `severity` | `result.level` (Error→error, Warning→warning, Info→note) |
//! | `file_path` | `result.locations[0].physicalLocation.artifactLocation.uri` |
//! | `line` | `result.locations[0].physicalLocation.region.startLine` |
//! | `suggestion` | `result.fixes[0].description.text` |
//! | `snippet` | `result.locations[0].physicalLocation.contextRegion.snippet.text` |
//! | `table` | `result.properties.table` |

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::types::{Diagnostic, Report, ReportItem, Severity, TestStatus};

/// Engine version for SARIF tool metadata.
const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// SARIF schema URL.
const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json";

/// Errors raised while rendering or writing a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("unknown report format '{0}' (expected text, markdown, json or sarif)")]
    UnknownFormat(String),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write report to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Output format of a rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    Json,
    Sarif,
}

impl FromStr for OutputFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "sarif" => Ok(Self::Sarif),
            other => Err(ReportError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Render a report in the given format.
///
/// # Errors
///
/// Returns [`ReportError::Serialize`] if JSON serialization fails.
pub fn render(report: &Report, format: OutputFormat) -> Result<String, ReportError> {
    match format {
        OutputFormat::Text => Ok(to_text(report)),
        OutputFormat::Markdown => Ok(to_markdown(report)),
        OutputFormat::Json => to_json(report),
        OutputFormat::Sarif => to_sarif(report),
    }
}

/// Write rendered output to `path`.
///
/// # Errors
///
/// Returns [`ReportError::Write`] on I/O failure.
pub fn write_report(path: &Path, rendered: &str) -> Result<(), ReportError> {
    std::fs::write(path, rendered).map_err(|source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Print the report to `out` and, when `path` is set, also write it there.
///
/// The file gets `format`; the terminal always gets text unless no file
/// was requested, in which case `format` goes to `out` as well.
///
/// # Errors
///
/// Returns [`ReportError`] when rendering or either write fails.
pub fn publish(
    report: &Report,
    format: OutputFormat,
    path: Option<&Path>,
    out: &mut impl std::io::Write,
) -> Result<(), ReportError> {
    let terminal = match path {
        Some(path) => {
            write_report(path, &render(report, format)?)?;
            to_text(report)
        }
        None => render(report, format)?,
    };
    out.write_all(terminal.as_bytes())
        .map_err(|source| ReportError::Write {
            path: PathBuf::from("<stdout>"),
            source,
        })
}

// ---------------------------------------------------------------------------
// Text output
// ---------------------------------------------------------------------------

fn location(diag: &Diagnostic) -> String {
    match (diag.file_path.is_empty(), diag.line) {
        (true, _) => diag.table.clone().unwrap_or_else(|| "<database>".to_owned()),
        (false, 0) => diag.file_path.clone(),
        (false, line) => format!("{}:{line}", diag.file_path),
    }
}

/// Render a report for a terminal.
#[must_use]
pub fn to_text(report: &Report) -> String {
    let mut out = String::new();
    for item in &report.items {
        match item {
            ReportItem::Diagnostic(d) => {
                let _ = writeln!(out, "{}: {} [{}] {}", location(d), d.severity, d.rule_id, d.message);
                if let Some(ref snippet) = d.snippet {
                    let _ = writeln!(out, "    | {snippet}");
                }
                if let Some(ref suggestion) = d.suggestion {
                    let _ = writeln!(out, "    = help: {suggestion}");
                }
            }
            ReportItem::Test(t) => {
                let tag = match t.status {
                    TestStatus::Passed => "PASS",
                    TestStatus::Failed => "FAIL",
                    TestStatus::HarnessError => "ERROR",
                };
                let _ = writeln!(
                    out,
                    "{tag:<5} {} {} ({}ms): {}",
                    t.table,
                    t.scenario,
                    t.duration_ms,
                    t.explanation()
                );
            }
        }
    }
    if !report.items.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{}: {} error(s), {} warning(s), {} info(s); {} passed, {} failed, {} harness error(s) in {}ms",
        report.status,
        report.errors,
        report.warnings,
        report.infos,
        report.passed,
        report.failed,
        report.harness_errors,
        report.elapsed_ms
    );
    let omitted = report.omitted_warnings + report.omitted_infos;
    if omitted > 0 {
        let _ = writeln!(out, "({omitted} lower-severity diagnostic(s) omitted by max_diagnostics)");
    }
    out
}

// ---------------------------------------------------------------------------
// Markdown output
// ---------------------------------------------------------------------------

/// Escape pipes and newlines for a Markdown table cell.
fn md_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render a report as Markdown.
#[must_use]
pub fn to_markdown(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# RLS compliance report\n");
    let _ = writeln!(
        out,
        "**Status:** {}  \n**Generated:** {}\n",
        report.status,
        report.generated_at.to_rfc3339()
    );
    let _ = writeln!(out, "| Errors | Warnings | Infos | Passed | Failed | Harness errors |");
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | {} |\n",
        report.errors,
        report.warnings,
        report.infos,
        report.passed,
        report.failed,
        report.harness_errors
    );

    let diags: Vec<&Diagnostic> = report.diagnostics().collect();
    if !diags.is_empty() {
        let _ = writeln!(out, "## Diagnostics\n");
        let _ = writeln!(out, "| Severity | Rule | Location | Table | Message |");
        let _ = writeln!(out, "|---|---|---|---|---|");
        for d in diags {
            let _ = writeln!(
                out,
                "| {} | `{}` | {} | {} | {} |",
                d.severity,
                d.rule_id,
                md_cell(&location(d)),
                md_cell(d.table.as_deref().unwrap_or("")),
                md_cell(&d.message)
            );
        }
        out.push('\n');
    }

    let mut results = report.results().peekable();
    if results.peek().is_some() {
        let _ = writeln!(out, "## Isolation tests\n");
        let _ = writeln!(out, "| Status | Table | Scenario | Identity | Expected | Actual |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        for t in results {
            let actual = match (&t.actual, &t.error_detail) {
                (Some(outcome), _) => outcome.to_string(),
                (None, Some(detail)) => detail.clone(),
                (None, None) => String::new(),
            };
            let _ = writeln!(
                out,
                "| {} | {} | `{}` | {} | {} | {} |",
                t.status,
                md_cell(&t.table),
                t.scenario,
                md_cell(&t.identity),
                t.expected,
                md_cell(&actual)
            );
        }
        out.push('\n');
    }

    if !report.sources.is_empty() {
        let _ = writeln!(out, "<details><summary>Sources ({})</summary>\n", report.sources.len());
        for s in &report.sources {
            let _ = writeln!(out, "- `{}`: {} unit(s)", s.name, s.units);
        }
        let _ = writeln!(out, "\n</details>");
    }
    out
}

// ---------------------------------------------------------------------------
// JSON output
// ---------------------------------------------------------------------------

/// Serialize a [`Report`] to pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for valid data).
pub fn to_json(report: &Report) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

// ---------------------------------------------------------------------------
// SARIF output
// ---------------------------------------------------------------------------

/// Serialize a [`Report`]'s diagnostics to SARIF v2.1.0 JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_sarif(report: &Report) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(&build_sarif_log(report))?)
}

fn build_sarif_log(report: &Report) -> SarifLog {
    // BTreeMap keeps rules sorted by ID.
    let mut rule_map: BTreeMap<String, SarifRule> = BTreeMap::new();

    for diag in report.diagnostics() {
        rule_map
            .entry(diag.rule_id.clone())
            .or_insert_with(|| SarifRule {
                id: diag.rule_id.clone(),
                name: rule_id_to_name(&diag.rule_id),
                short_description: SarifMessage {
                    text: rule_id_to_short_description(&diag.rule_id),
                },
                default_configuration: SarifDefaultConfiguration {
                    level: severity_to_sarif_level(diag.severity),
                },
            });
    }

    let results: Vec<SarifResult> = report.diagnostics().map(build_sarif_result).collect();

    SarifLog {
        schema: SARIF_SCHEMA.to_owned(),
        version: "2.1.0".to_owned(),
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "rlsguard".to_owned(),
                    version: ENGINE_VERSION.to_owned(),
                    rules: rule_map.into_values().collect(),
                },
            },
            results,
        }],
    }
}

fn build_sarif_result(diag: &Diagnostic) -> SarifResult {
    let mut location = SarifPhysicalLocation {
        artifact_location: SarifArtifactLocation {
            uri: diag.file_path.clone(),
        },
        region: None,
        context_region: None,
    };

    if diag.line > 0 {
        location.region = Some(SarifRegion {
            start_line: diag.line,
            start_column: (diag.column > 0).then_some(diag.column),
        });
    }

    if let Some(ref snippet) = diag.snippet {
        location.context_region = Some(SarifContextRegion {
            snippet: SarifMessage {
                text: snippet.clone(),
            },
        });
    }

    let locations = if diag.file_path.is_empty() {
        Vec::new()
    } else {
        vec![SarifLocation {
            physical_location: location,
        }]
    };

    let fixes = diag.suggestion.as_ref().map(|suggestion| {
        vec![SarifFix {
            description: SarifMessage {
                text: suggestion.clone(),
            },
        }]
    });

    SarifResult {
        rule_id: diag.rule_id.clone(),
        level: severity_to_sarif_level(diag.severity),
        message: SarifMessage {
            text: diag.message.clone(),
        },
        locations,
        fixes,
        properties: diag.table.as_ref().map(|table| SarifProperties {
            table: table.clone(),
        }),
    }
}

fn severity_to_sarif_level(severity: Severity) -> String {
    match severity {
        Severity::Error => "error".to_owned(),
        Severity::Warning => "warning".to_owned(),
        Severity::Info => "note".to_owned(),
    }
}

/// Derive a PascalCase rule name from a rule ID.
fn rule_id_to_name(rule_id: &str) -> String {
    let split = rule_id
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(rule_id.len());
    let (prefix, number) = rule_id.split_at(split);

    match prefix {
        "SCAN" => format!("Scanner{number}"),
        "NAME" => format!("NamingConvention{number}"),
        "CON" => format!("Constraint{number}"),
        "IDX" => format!("Index{number}"),
        "RLS" => format!("RowLevelSecurity{number}"),
        "DYN" => format!("LiveHarness{number}"),
        "INTERNAL" => "InternalError".to_owned(),
        _ => rule_id.to_owned(),
    }
}

fn rule_id_to_short_description(rule_id: &str) -> String {
    match rule_id {
        "SCAN001" => "Unrecognized statement".to_owned(),
        "NAME001" => "Identifier contains uppercase letters".to_owned(),
        "NAME002" => "Identifier contains whitespace".to_owned(),
        "NAME003" => "Identifier is camelCase".to_owned(),
        "NAME004" => "Constraint name lacks a kind prefix".to_owned(),
        "NAME005" => "Index name lacks an idx_/uidx_ prefix".to_owned(),
        "NAME006" => "Identifier is not snake_case".to_owned(),
        "CON001" => "Table has no primary key".to_owned(),
        "CON002" => "Foreign key has no explicit name".to_owned(),
        "CON003" => "Foreign key has no ON DELETE/ON UPDATE action".to_owned(),
        "CON004" => "CHECK constraint has no explicit name".to_owned(),
        "IDX001" => "Foreign key column is not indexed".to_owned(),
        "IDX002" => "Container column in a non-GIN index".to_owned(),
        "IDX003" => "Duplicate index".to_owned(),
        "RLS001" => "Row level security not enabled".to_owned(),
        "RLS002" => "Row level security enabled without policies".to_owned(),
        "RLS003" => "Operation has no permissive policy".to_owned(),
        "RLS004" => "Write policy without WITH CHECK".to_owned(),
        "RLS005" => "Policy predicate column is not indexed".to_owned(),
        "RLS006" => "Policy predicate is constant true".to_owned(),
        "RLS007" => "Row level security not forced for the table owner".to_owned(),
        "DYN001" => "Scenario skipped for a missing prerequisite".to_owned(),
        "DYN002" => "Requested table does not exist".to_owned(),
        "DYN003" => "Row level security disabled at runtime".to_owned(),
        "INTERNAL" => "Internal rule failure".to_owned(),
        _ => format!("Rule {rule_id}"),
    }
}

// ---------------------------------------------------------------------------
// SARIF v2.1.0 data structures
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SarifLog {
    #[serde(rename = "$schema")]
    schema: String,
    version: String,
    runs: Vec<SarifRun>,
}

#[derive(Debug, Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Debug, Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifDriver {
    name: String,
    version: String,
    rules: Vec<SarifRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRule {
    id: String,
    name: String,
    short_description: SarifMessage,
    default_configuration: SarifDefaultConfiguration,
}

#[derive(Debug, Serialize)]
struct SarifDefaultConfiguration {
    level: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: String,
    level: String,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixes: Option<Vec<SarifFix>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<SarifProperties>,
}

#[derive(Debug, Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    physical_location: SarifPhysicalLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: SarifArtifactLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<SarifRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_region: Option<SarifContextRegion>,
}

#[derive(Debug, Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    start_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_column: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SarifContextRegion {
    snippet: SarifMessage,
}

#[derive(Debug, Serialize)]
struct SarifFix {
    description: SarifMessage,
}

#[derive(Debug, Serialize)]
struct SarifProperties {
    table: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
