//! Test suite orchestration.
//!
//! Resolves the tables under test, instantiates their scenarios, runs them
//! on a bounded worker pool and assembles one [`Report`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::config::HarnessConfig;
use crate::harness::executor::{ProbeBackend, TableInfo};
use crate::harness::scenario::{catalog, profile_escalation, skip_diagnostic, Plan, Scenario};
use crate::harness::HarnessError;
use crate::types::{
    Diagnostic, Report, RuleCategory, Severity, SourceKind, SourceSummary, TestResult, TestStatus,
};

/// Runs the scenario library against a [`ProbeBackend`].
pub struct Orchestrator {
    backend: Arc<dyn ProbeBackend>,
    config: HarnessConfig,
}

struct Job {
    scenario: Scenario,
    table: Arc<TableInfo>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(backend: Arc<dyn ProbeBackend>, config: HarnessConfig) -> Self {
        Self { backend, config }
    }

    /// Run every applicable scenario and report.
    ///
    /// # Errors
    ///
    /// Returns an error only when the run cannot start: invalid
    /// configuration or a failure while reading table metadata. Failures of
    /// individual scenarios are recorded in the report.
    pub async fn run(&self) -> Result<Report, HarnessError> {
        let started = Instant::now();
        self.config
            .validate("harness configuration")
            .map_err(|e| HarnessError::Config(e.to_string()))?;

        let (tables, mut diagnostics) = self.resolve_tables().await?;
        let mut sources = Vec::new();
        let mut jobs = Vec::new();

        for table in tables {
            let table = Arc::new(table);
            let qualified = table.qualified();
            if !table.rls_enabled {
                diagnostics.push(
                    Diagnostic::new(
                        "DYN003",
                        Severity::Error,
                        RuleCategory::Harness,
                        format!("Table '{qualified}' does not have row level security enabled."),
                    )
                    .on_table(&qualified)
                    .with_suggestion(format!(
                        "ALTER TABLE {} ENABLE ROW LEVEL SECURITY;",
                        table.sql_name()
                    )),
                );
            }
            let plan = catalog(&table, &self.config);
            sources.push(table_source(&qualified, plan.scenarios.len()));
            self.queue(plan, &table, &mut jobs, &mut diagnostics);
        }

        if let Some(ref profile) = self.config.fixtures.profile {
            let live = self.backend.describe_table(&profile.table).await?;
            let plan = profile_escalation(live.as_ref(), &self.config);
            if let Some(table) = live {
                let table = Arc::new(table);
                let qualified = table.qualified();
                let added = plan.scenarios.len();
                match sources.iter_mut().find(|s| s.name == qualified) {
                    Some(source) => source.units += u32::try_from(added).unwrap_or(0),
                    None => sources.push(table_source(&qualified, added)),
                }
                self.queue(plan, &table, &mut jobs, &mut diagnostics);
            } else {
                diagnostics.extend(plan.skipped);
            }
        }

        log::info!(
            "Running {} scenario(s) on {} table(s) with {} worker(s)",
            jobs.len(),
            sources.len(),
            self.config.workers
        );
        let results = self.execute(jobs, &mut diagnostics).await;

        let mut report = Report::from_results(results, diagnostics, sources);
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::info!(
            "Harness finished: {} passed, {} failed, {} harness error(s)",
            report.passed,
            report.failed,
            report.harness_errors
        );
        Ok(report)
    }

    fn queue(
        &self,
        plan: Plan,
        table: &Arc<TableInfo>,
        jobs: &mut Vec<Job>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        diagnostics.extend(plan.skipped);
        jobs.extend(plan.scenarios.into_iter().map(|scenario| Job {
            scenario,
            table: Arc::clone(table),
        }));
    }

    /// Explicit tables when configured, otherwise every table in the schema
    /// with an owner or tenant column.
    async fn resolve_tables(&self) -> Result<(Vec<TableInfo>, Vec<Diagnostic>), HarnessError> {
        let mut diagnostics = Vec::new();

        if self.config.tables.is_empty() {
            let tables: Vec<TableInfo> = self
                .backend
                .describe_tables(&self.config.schema)
                .await?
                .into_iter()
                .filter(|t| {
                    t.first_column_of(&self.config.owner_columns).is_some()
                        || t.first_column_of(&self.config.tenant_columns).is_some()
                })
                .collect();
            log::info!(
                "Discovered {} candidate table(s) in schema {}",
                tables.len(),
                self.config.schema
            );
            return Ok((tables, diagnostics));
        }

        let mut tables = Vec::new();
        for name in &self.config.tables {
            let qualified = if name.contains('.') {
                name.clone()
            } else {
                format!("{}.{name}", self.config.schema)
            };
            match self.backend.describe_table(&qualified).await? {
                Some(table) => tables.push(table),
                None => {
                    log::warn!("Table {qualified} not found");
                    diagnostics.push(
                        Diagnostic::new(
                            "DYN002",
                            Severity::Error,
                            RuleCategory::Harness,
                            format!("Table '{qualified}' does not exist."),
                        )
                        .on_table(&qualified),
                    );
                }
            }
        }
        Ok((tables, diagnostics))
    }

    /// Run jobs with at most `workers` in flight. Results flow to a single
    /// collector task.
    async fn execute(&self, jobs: Vec<Job>, diagnostics: &mut Vec<Diagnostic>) -> Vec<TestResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel::<TestResult>(self.config.workers * 2);

        let collector = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                results.push(result);
            }
            results
        });

        let mut tasks = JoinSet::new();
        for job in jobs {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if stop.load(Ordering::SeqCst) {
                diagnostics.push(skip_diagnostic(
                    &job.scenario.table,
                    &job.scenario.name,
                    "fail-fast stopped the run after an isolation failure",
                ));
                continue;
            }
            let backend = Arc::clone(&self.backend);
            let stop = Arc::clone(&stop);
            let tx = tx.clone();
            let fail_fast = self.config.fail_fast;
            tasks.spawn(async move {
                let _permit = permit;
                let result = run_one(backend.as_ref(), &job.scenario, &job.table).await;
                if fail_fast && result.status == TestStatus::Failed {
                    stop.store(true, Ordering::SeqCst);
                }
                if tx.send(result).await.is_err() {
                    log::error!("Result collector closed before {} finished", job.scenario.name);
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Scenario task failed: {e}");
            }
        }
        match collector.await {
            Ok(results) => results,
            Err(e) => {
                log::error!("Result collector failed: {e}");
                Vec::new()
            }
        }
    }
}

fn table_source(qualified: &str, scenarios: usize) -> SourceSummary {
    SourceSummary {
        kind: SourceKind::Table,
        name: qualified.to_owned(),
        content_hash: None,
        units: u32::try_from(scenarios).unwrap_or(u32::MAX),
    }
}

async fn run_one(backend: &dyn ProbeBackend, scenario: &Scenario, table: &TableInfo) -> TestResult {
    let started = Instant::now();
    let outcome = backend.run_scenario(scenario, table).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (actual, status, error_detail) = match outcome {
        Ok(actual) if scenario.expected.is_satisfied_by(&actual) => {
            (Some(actual), TestStatus::Passed, None)
        }
        Ok(actual) => (Some(actual), TestStatus::Failed, None),
        Err(e) => (None, TestStatus::HarnessError, Some(e.to_string())),
    };

    let result = TestResult {
        scenario: scenario.name.clone(),
        table: scenario.table.clone(),
        operation: scenario.operation,
        identity: scenario.probe_context.label.clone(),
        expected: scenario.expected,
        actual,
        status,
        passed: status == TestStatus::Passed,
        duration_ms,
        error_detail,
    };
    match status {
        TestStatus::Passed => log::debug!("PASS {} {}", result.table, result.scenario),
        TestStatus::Failed | TestStatus::HarnessError => {
            log::warn!("{} {}: {}", status, result.table, result.explanation());
        }
    }
    result
}
