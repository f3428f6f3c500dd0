//! Index rules: IDX001 through IDX003.
//!
//! Rules:
//! - **IDX001** (warning, enabled): Foreign key column is not the leading
//!   column of any index, primary key or unique constraint
//! - **IDX002** (warning, enabled): JSONB, array or tsvector column in a
//!   non-GIN index
//! - **IDX003** (info, enabled): Index duplicates an earlier index over the
//!   same columns
//!
//! Partial indexes are excluded from IDX003 since their predicates may differ.

use crate::checkers::Rule;
use crate::config::CheckConfig;
use crate::scanner::SchemaStatement;
use crate::schema::{ConstraintKind, Index, Table};
use crate::types::{Diagnostic, RuleCategory, Severity};

/// Index rules implementing IDX001 through IDX003.
pub struct IndexRules;

fn index_label(index: &Index) -> String {
    index
        .name
        .clone()
        .unwrap_or_else(|| format!("<unnamed> ({})", index.columns.join(", ")))
}

// ---------------------------------------------------------------------------
// IDX001: Unindexed foreign key
// ---------------------------------------------------------------------------

fn check_idx001(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    let table_name = table.name.qualified();
    let mut seen: Vec<&str> = Vec::new();

    for fk in table
        .constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::ForeignKey)
    {
        let Some(leading) = fk.columns.first() else {
            continue;
        };
        if seen.contains(&leading.as_str()) || table.is_leading_indexed(leading) {
            continue;
        }
        seen.push(leading);
        if !config.is_rule_enabled_for_path("IDX001", &fk.file_path, true) {
            continue;
        }
        diags.push(
            Diagnostic::new(
                "IDX001",
                config.effective_severity_for_path("IDX001", &fk.file_path, Severity::Warning),
                RuleCategory::Indexes,
                format!(
                    "Foreign key column '{leading}' on '{table_name}' is not covered by an index."
                ),
            )
            .at(&fk.file_path, fk.line)
            .on_table(&table_name)
            .with_suggestion(format!(
                "CREATE INDEX idx_{}_{} ON {table_name} ({});",
                table.name.name,
                fk.columns.join("_"),
                fk.columns.join(", ")
            )),
        );
    }
}

// ---------------------------------------------------------------------------
// IDX002: Container column in a non-GIN index
// ---------------------------------------------------------------------------

fn check_idx002(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    let table_name = table.name.qualified();
    for index in table.indexes.iter().filter(|i| i.method != "gin") {
        if !config.is_rule_enabled_for_path("IDX002", &index.file_path, true) {
            continue;
        }
        for col in index.columns.iter().filter_map(|c| table.column(c)) {
            let kind = if col.is_jsonb {
                "jsonb"
            } else if col.is_array {
                "array"
            } else if col.is_tsvector {
                "tsvector"
            } else {
                continue;
            };
            diags.push(
                Diagnostic::new(
                    "IDX002",
                    config.effective_severity_for_path(
                        "IDX002",
                        &index.file_path,
                        Severity::Warning,
                    ),
                    RuleCategory::Indexes,
                    format!(
                        "Index {} on '{table_name}' uses {} for {kind} column '{}'.",
                        index_label(index),
                        index.method,
                        col.name
                    ),
                )
                .at(&index.file_path, index.line)
                .on_table(&table_name)
                .with_suggestion("Use `USING GIN` for containment and full-text lookups."),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// IDX003: Duplicate index
// ---------------------------------------------------------------------------

fn check_idx003(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    let table_name = table.name.qualified();
    let full: Vec<&Index> = table.indexes.iter().filter(|i| !i.partial).collect();

    for (pos, index) in full.iter().enumerate() {
        let Some(earlier) = full[..pos]
            .iter()
            .find(|e| e.columns == index.columns && e.method == index.method)
        else {
            continue;
        };
        if !config.is_rule_enabled_for_path("IDX003", &index.file_path, true) {
            continue;
        }
        diags.push(
            Diagnostic::new(
                "IDX003",
                config.effective_severity_for_path("IDX003", &index.file_path, Severity::Info),
                RuleCategory::Indexes,
                format!(
                    "Index {} on '{table_name}' duplicates {} over ({}).",
                    index_label(index),
                    index_label(earlier),
                    index.columns.join(", ")
                ),
            )
            .at(&index.file_path, index.line)
            .on_table(&table_name)
            .with_suggestion("Drop one of the indexes."),
        );
    }
}

impl Rule for IndexRules {
    fn name(&self) -> &'static str {
        "indexes"
    }

    fn check(
        &self,
        tables: &[Table],
        _statements: &[SchemaStatement],
        config: &CheckConfig,
    ) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for table in tables {
            check_idx001(table, config, &mut diags);
            check_idx002(table, config, &mut diags);
            check_idx003(table, config, &mut diags);
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
