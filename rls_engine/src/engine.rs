//! Static analysis engine, the main entry point for the `analyze` tool.
//!
//! Coordinates file discovery, statement scanning, schema folding, rule
//! dispatch and report assembly. Each file is an independent analysis unit
//! checked in parallel with rayon; with `merge` enabled every file is folded
//! into one schema so a table created in one migration and secured in a later
//! one is judged as a whole.
//!
//! Every rule dispatch is wrapped in `catch_unwind` so that a panic in one
//! rule family emits an `INTERNAL` diagnostic instead of aborting the run.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;

use crate::checkers::{build_rule_registry, Rule};
use crate::config::CheckConfig;
use crate::discovery::{discover, SourceFile};
use crate::scanner::{scan, ScanOutput, SchemaStatement};
use crate::schema::fold;
use crate::types::{Diagnostic, Report, RuleCategory, Severity, SourceKind, SourceSummary};

/// The static analysis engine.
///
/// Holds the configuration and the rule registry; stateless across runs.
pub struct AnalysisEngine {
    config: CheckConfig,
    rules: Vec<Box<dyn Rule>>,
}

/// One scanned file.
struct ScannedFile<'a> {
    source: &'a SourceFile,
    output: ScanOutput,
}

impl AnalysisEngine {
    /// Create an engine with the given configuration.
    #[must_use]
    pub fn new(config: CheckConfig) -> Self {
        Self {
            config,
            rules: build_rule_registry(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Analyze a file or a directory of migrations.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when `path` does not exist or a single-file
    /// target cannot be read.
    pub fn analyze(&self, path: &Path) -> io::Result<Report> {
        let files = discover(path, &self.config)?;
        if files.is_empty() {
            log::warn!("No SQL files found under {}", path.display());
        }
        Ok(self.analyze_sources(&files))
    }

    /// Analyze several files or directories as one run.
    ///
    /// With `merge` every discovered file is folded into a single schema;
    /// otherwise each path is analyzed on its own and the reports combined.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error raised by discovery.
    pub fn analyze_all(&self, paths: &[impl AsRef<Path>]) -> io::Result<Report> {
        if self.config.merge {
            let mut files = Vec::new();
            for path in paths {
                files.extend(discover(path.as_ref(), &self.config)?);
            }
            return Ok(self.analyze_sources(&files));
        }
        let mut combined = Report::default();
        for path in paths {
            combined.merge(self.analyze(path.as_ref())?);
        }
        combined.truncate_diagnostics(self.config.max_diagnostics);
        Ok(combined)
    }

    /// Analyze already-loaded sources.
    #[must_use]
    pub fn analyze_sources(&self, files: &[SourceFile]) -> Report {
        let start = Instant::now();
        log::debug!(
            "Analyzing {} file(s), merge={}, config {}",
            files.len(),
            self.config.merge,
            self.config.config_hash()
        );

        // 1. Scan every file in parallel.
        let scanned: Vec<ScannedFile<'_>> = files
            .par_iter()
            .map(|source| ScannedFile {
                source,
                output: scan(&source.rel_path, &source.content),
            })
            .collect();

        // 2. Parse warnings, per file.
        let mut all_diags: Vec<Diagnostic> = scanned
            .iter()
            .flat_map(|f| f.output.warnings.iter())
            .filter_map(|w| self.configure_parse_warning(w.to_diagnostic()))
            .collect();

        // 3. Fold and check each unit.
        if self.config.merge {
            let statements: Vec<SchemaStatement> = scanned
                .iter()
                .flat_map(|f| f.output.statements.iter().cloned())
                .collect();
            all_diags.extend(self.check_unit("", &statements));
        } else {
            let per_file: Vec<Vec<Diagnostic>> = scanned
                .par_iter()
                .map(|f| self.check_unit(&f.source.rel_path, &f.output.statements))
                .collect();
            all_diags.extend(per_file.into_iter().flatten());
        }

        // 4. Sort. Truncation happens on the report so counts see everything.
        all_diags.sort_by(Diagnostic::sort_key_cmp);

        let sources = scanned
            .iter()
            .map(|f| SourceSummary {
                kind: SourceKind::File,
                name: f.source.rel_path.clone(),
                content_hash: Some(f.source.content_hash.clone()),
                units: f.output.statement_count(),
            })
            .collect();

        let mut report = Report::from_diagnostics(all_diags, sources);
        report.truncate_diagnostics(self.config.max_diagnostics);
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Analysis finished: {} error(s), {} warning(s), {} info in {}ms",
            report.errors,
            report.warnings,
            report.infos,
            report.elapsed_ms
        );
        report
    }

    /// Apply select/exclude filters and severity overrides to a SCAN001 diagnostic.
    fn configure_parse_warning(&self, mut diag: Diagnostic) -> Option<Diagnostic> {
        if !self
            .config
            .is_rule_enabled_for_path(&diag.rule_id, &diag.file_path, true)
        {
            return None;
        }
        diag.severity =
            self.config
                .effective_severity_for_path(&diag.rule_id, &diag.file_path, diag.severity);
        Some(diag)
    }

    /// Fold one unit's statements and run every rule family, wrapped in catch_unwind.
    fn check_unit(&self, unit: &str, statements: &[SchemaStatement]) -> Vec<Diagnostic> {
        let tables = fold(statements, &self.config.target_schema);
        log::debug!(
            "Unit '{}': {} statement(s), {} table(s)",
            unit,
            statements.len(),
            tables.len()
        );

        let mut diags = Vec::new();
        for rule in &self.rules {
            let result = catch_unwind(AssertUnwindSafe(|| {
                rule.check(&tables, statements, &self.config)
            }));

            match result {
                Ok(rule_diags) => diags.extend(rule_diags),
                Err(panic_info) => {
                    let panic_msg = if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_owned()
                    } else {
                        "unknown panic".to_owned()
                    };
                    log::error!("Rule family '{}' panicked on '{}': {}", rule.name(), unit, panic_msg);

                    diags.push(
                        Diagnostic::new(
                            "INTERNAL",
                            Severity::Warning,
                            RuleCategory::Internal,
                            format!(
                                "Internal error in rule family '{}': {}. Please report it.",
                                rule.name(),
                                panic_msg
                            ),
                        )
                        .at(unit, 0)
                        .with_suggestion(
                            "This unit was skipped by this rule family due to an internal error.",
                        ),
                    );
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReportStatus;
    use indoc::indoc;
    use std::fs;
    use tempfile::tempdir;

    const SECURED: &str = indoc! {r#"
        CREATE TABLE public.orders (
          id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
          user_id uuid NOT NULL,
          CONSTRAINT fk_orders_user FOREIGN KEY (user_id) REFERENCES auth.users (id) ON DELETE CASCADE
        );
        CREATE INDEX idx_orders_user_id ON public.orders (user_id);
        ALTER TABLE public.orders ENABLE ROW LEVEL SECURITY;
        CREATE POLICY orders_select ON public.orders FOR SELECT USING (auth.uid() = user_id);
        CREATE POLICY orders_insert ON public.orders FOR INSERT WITH CHECK (auth.uid() = user_id);
        CREATE POLICY orders_update ON public.orders FOR UPDATE
          USING (auth.uid() = user_id) WITH CHECK (auth.uid() = user_id);
        CREATE POLICY orders_delete ON public.orders FOR DELETE USING (auth.uid() = user_id);
    "#};

    struct PanickingRule;

    impl Rule for PanickingRule {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn check(&self, _: &[crate::schema::Table], _: &[SchemaStatement], _: &CheckConfig) -> Vec<Diagnostic> {
            panic!("boom")
        }
    }

    fn analyze_one(sql: &str) -> Report {
        AnalysisEngine::new(CheckConfig::default()).analyze_sources(&[SourceFile::new("schema.sql", sql)])
    }

    #[test]
    fn test_fully_secured_schema_passes() {
        let report = analyze_one(SECURED);
        assert_eq!(report.errors, 0, "{:?}", report.items);
        assert_eq!(report.warnings, 0, "{:?}", report.items);
        assert_eq!(report.status, ReportStatus::Passed);
        assert_eq!(report.exit_code(false), 0);
    }

    #[test]
    fn test_missing_rls_fails() {
        let report = analyze_one(
            "CREATE TABLE orders (id uuid PRIMARY KEY, user_id uuid NOT NULL);",
        );
        assert!(report.diagnostics().any(|d| d.rule_id == "RLS001"));
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.exit_code(false), 1);
    }

    #[test]
    fn test_uppercase_table_without_pk_reports_two_errors() {
        let report = analyze_one("CREATE TABLE Users (email text);");
        assert!(report.errors >= 2);
        let rules: Vec<&str> = report.diagnostics().map(|d| d.rule_id.as_str()).collect();
        assert!(rules.contains(&"NAME001"));
        assert!(rules.contains(&"CON001"));
        assert_eq!(report.exit_code(false), 1);
    }

    #[test]
    fn test_unrecognized_statement_is_info() {
        let report = analyze_one("FROBNICATE everything;\nCREATE TABLE t (id int PRIMARY KEY);");
        let scan: Vec<&Diagnostic> = report.diagnostics().filter(|d| d.rule_id == "SCAN001").collect();
        assert_eq!(scan.len(), 1);
        assert_eq!(scan[0].severity, Severity::Info);
        assert_eq!(scan[0].line, 1);
    }

    #[test]
    fn test_scan_warning_can_be_excluded() {
        let mut config = CheckConfig::default();
        config.exclude_rules = Some("SCAN".to_owned());
        let report = AnalysisEngine::new(config)
            .analyze_sources(&[SourceFile::new("a.sql", "FROBNICATE everything;")]);
        assert_eq!(report.infos, 0);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let files = vec![
            SourceFile::new("b.sql", "CREATE TABLE Beta (id int);"),
            SourceFile::new("a.sql", SECURED),
            SourceFile::new("c.sql", "CREATE TABLE gamma (id int PRIMARY KEY);\nALTER TABLE gamma ENABLE ROW LEVEL SECURITY;"),
        ];
        let engine = AnalysisEngine::new(CheckConfig::default());
        let first = engine.analyze_sources(&files);
        let second = engine.analyze_sources(&files);
        assert_eq!(first.items, second.items);
        assert_eq!(first.sources, second.sources);
        let paths: Vec<&str> = first.diagnostics().map(|d| d.file_path.as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort_unstable();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_merge_folds_across_files() {
        let files = vec![
            SourceFile::new("001_tables.sql", "CREATE TABLE notes (id int PRIMARY KEY, owner_id uuid);"),
            SourceFile::new(
                "002_rls.sql",
                "ALTER TABLE notes ENABLE ROW LEVEL SECURITY;\nCREATE POLICY notes_all ON notes USING (true) WITH CHECK (true);",
            ),
        ];

        let split = AnalysisEngine::new(CheckConfig::default()).analyze_sources(&files);
        assert!(split.diagnostics().any(|d| d.rule_id == "RLS001"));

        let mut config = CheckConfig::default();
        config.merge = true;
        let merged = AnalysisEngine::new(config).analyze_sources(&files);
        assert!(!merged.diagnostics().any(|d| d.rule_id == "RLS001"));
        assert!(merged.diagnostics().any(|d| d.rule_id == "RLS006"));
        let rls006 = merged.diagnostics().find(|d| d.rule_id == "RLS006").unwrap();
        assert_eq!(rls006.file_path, "002_rls.sql");
    }

    #[test]
    fn test_sources_carry_hash_and_statement_count() {
        let report = analyze_one("CREATE TABLE t (id int PRIMARY KEY);\nGRANT SELECT ON t TO anon;");
        assert_eq!(report.sources.len(), 1);
        let source = &report.sources[0];
        assert_eq!(source.kind, SourceKind::File);
        assert_eq!(source.units, 2);
        assert!(source.content_hash.as_deref().unwrap().starts_with("sha256:"));
    }

    #[test]
    fn test_max_diagnostics_never_drops_errors() {
        let mut config = CheckConfig::default();
        config.max_diagnostics = 3;
        let files: Vec<SourceFile> = (0..5)
            .map(|i| SourceFile::new(format!("{i}.sql"), format!("CREATE TABLE t{i} (x int);")))
            .collect();
        let full = AnalysisEngine::new(CheckConfig::default()).analyze_sources(&files);
        let report = AnalysisEngine::new(config).analyze_sources(&files);
        assert!(full.errors > 3);
        assert_eq!(report.errors, full.errors);
        assert_eq!(report.warnings, full.warnings);
        assert_eq!(report.diagnostics().count(), full.errors as usize);
        assert_eq!(report.status, ReportStatus::Failed);
    }

    #[test]
    fn test_warning_flood_keeps_missing_rls_error() {
        let columns: String = (0..520).map(|i| format!(",\n  colName{i} int")).collect();
        let wide = SECURED.replace("user_id uuid NOT NULL,", &format!("user_id uuid NOT NULL{columns},"));
        let files = [
            SourceFile::new("a.sql", wide),
            SourceFile::new("b.sql", "CREATE TABLE notes (id int PRIMARY KEY);"),
        ];
        let report = AnalysisEngine::new(CheckConfig::default()).analyze_sources(&files);

        assert!(report.diagnostics().any(|d| d.rule_id == "RLS001"), "RLS001 truncated away");
        assert!(report.errors >= 1);
        assert!(report.warnings >= 520);
        assert!(report.omitted_warnings > 0);
        assert!(report.diagnostics().count() <= 500);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.exit_code(false), 1);
    }

    #[test]
    fn test_fail_on_warnings_exit_code() {
        let report = analyze_one(indoc! {r#"
            CREATE TABLE t (id int PRIMARY KEY, qty int CHECK (qty > 0));
            ALTER TABLE t ENABLE ROW LEVEL SECURITY;
            CREATE POLICY t_read ON t FOR SELECT USING (auth.role() = 'authenticated');
        "#});
        assert_eq!(report.errors, 0, "{:?}", report.items);
        assert!(report.warnings > 0);
        assert_eq!(report.exit_code(false), 0);
        assert_eq!(report.exit_code(true), 1);
    }

    #[test]
    fn test_panicking_rule_reports_internal() {
        let engine = AnalysisEngine {
            config: CheckConfig::default(),
            rules: vec![Box::new(PanickingRule)],
        };
        let report = engine.analyze_sources(&[SourceFile::new("a.sql", "CREATE TABLE t (id int);")]);
        let internal: Vec<&Diagnostic> = report.diagnostics().filter(|d| d.rule_id == "INTERNAL").collect();
        assert_eq!(internal.len(), 1);
        assert_eq!(internal[0].severity, Severity::Warning);
        assert!(internal[0].message.contains("boom"));
    }

    #[test]
    fn test_analyze_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("001.sql"), SECURED).unwrap();
        fs::write(dir.path().join("notes.txt"), "CREATE TABLE Bad (x int);").unwrap();

        let report = AnalysisEngine::new(CheckConfig::default()).analyze(dir.path()).unwrap();
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.status, ReportStatus::Passed);
    }

    #[test]
    fn test_analyze_all_combines_paths() {
        let dir = tempdir().unwrap();
        let secured = dir.path().join("secured");
        fs::create_dir(&secured).unwrap();
        fs::write(secured.join("001.sql"), SECURED).unwrap();
        let open = dir.path().join("notes.sql");
        fs::write(&open, "CREATE TABLE notes (id int PRIMARY KEY);").unwrap();

        let engine = AnalysisEngine::new(CheckConfig::default());
        let report = engine.analyze_all(&[secured.clone(), open.clone()]).unwrap();
        assert_eq!(report.sources.len(), 2);
        assert!(report.diagnostics().any(|d| d.rule_id == "RLS001"));
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.errors, engine.analyze(&open).unwrap().errors);

        let merged = AnalysisEngine::new(CheckConfig {
            merge: true,
            ..CheckConfig::default()
        });
        let report = merged.analyze_all(&[secured, open]).unwrap();
        assert_eq!(report.sources.len(), 2);
        assert!(report.diagnostics().any(|d| d.rule_id == "RLS001"));

        assert!(engine.analyze_all(&[dir.path().join("missing.sql")]).is_err());
    }
}
