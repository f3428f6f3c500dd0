//! Constraint rules: CON001 through CON004.
//!
//! Rules:
//! - **CON001** (error, enabled): Table has no primary key
//! - **CON002** (warning, enabled): Foreign key has no explicit name
//! - **CON003** (warning, enabled): Foreign key declares neither ON DELETE nor ON UPDATE
//! - **CON004** (warning, enabled): CHECK constraint has no explicit name
//!
//! Tables created without a column list (`CREATE TABLE ... AS`, `PARTITION
//! OF`) are not judged by CON001.

use crate::checkers::Rule;
use crate::config::CheckConfig;
use crate::scanner::SchemaStatement;
use crate::schema::{Constraint, ConstraintKind, Table};
use crate::types::{Diagnostic, RuleCategory, Severity};

/// Constraint rules implementing CON001 through CON004.
pub struct ConstraintRules;

// ---------------------------------------------------------------------------
// CON001: Missing primary key
// ---------------------------------------------------------------------------

fn check_con001(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    if table.columns.is_empty() || table.has_primary_key() {
        return;
    }
    if !config.is_rule_enabled_for_path("CON001", &table.file_path, true) {
        return;
    }
    let name = table.name.qualified();
    let suggestion = match table.column("id") {
        Some(_) => "Declare `id` as PRIMARY KEY.".to_owned(),
        None => format!(
            "Add a primary key, e.g. `ALTER TABLE {name} ADD CONSTRAINT pk_{} PRIMARY KEY (...)`.",
            table.name.name
        ),
    };
    diags.push(
        Diagnostic::new(
            "CON001",
            config.effective_severity_for_path("CON001", &table.file_path, Severity::Error),
            RuleCategory::Constraints,
            format!("Table '{name}' has no primary key."),
        )
        .at(&table.file_path, table.line)
        .on_table(&name)
        .with_suggestion(suggestion),
    );
}

// ---------------------------------------------------------------------------
// CON002 / CON003: Foreign key naming and actions
// ---------------------------------------------------------------------------

fn check_foreign_key(
    table: &Table,
    fk: &Constraint,
    config: &CheckConfig,
    diags: &mut Vec<Diagnostic>,
) {
    let table_name = table.name.qualified();
    let target = fk
        .references
        .as_ref()
        .map_or_else(|| "?".to_owned(), |r| r.table.qualified());
    let columns = fk.columns.join(", ");

    if fk.name.is_none() && config.is_rule_enabled_for_path("CON002", &fk.file_path, true) {
        diags.push(
            Diagnostic::new(
                "CON002",
                config.effective_severity_for_path("CON002", &fk.file_path, Severity::Warning),
                RuleCategory::Constraints,
                format!(
                    "Foreign key ({columns}) on '{table_name}' referencing '{target}' has no explicit name."
                ),
            )
            .at(&fk.file_path, fk.line)
            .on_table(&table_name)
            .with_suggestion(format!(
                "Use `CONSTRAINT fk_{}_{} FOREIGN KEY ...`.",
                table.name.name,
                fk.columns.join("_")
            )),
        );
    }

    let no_actions = fk
        .references
        .as_ref()
        .is_some_and(|r| r.on_delete.is_none() && r.on_update.is_none());
    if no_actions && config.is_rule_enabled_for_path("CON003", &fk.file_path, true) {
        diags.push(
            Diagnostic::new(
                "CON003",
                config.effective_severity_for_path("CON003", &fk.file_path, Severity::Warning),
                RuleCategory::Constraints,
                format!(
                    "Foreign key ({columns}) on '{table_name}' referencing '{target}' declares no \
                     ON DELETE or ON UPDATE action."
                ),
            )
            .at(&fk.file_path, fk.line)
            .on_table(&table_name)
            .with_suggestion("State the intended behavior, e.g. ON DELETE CASCADE or ON DELETE RESTRICT."),
        );
    }
}

// ---------------------------------------------------------------------------
// CON004: Unnamed CHECK
// ---------------------------------------------------------------------------

fn check_con004(table: &Table, check: &Constraint, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    if check.name.is_some() || !config.is_rule_enabled_for_path("CON004", &check.file_path, true) {
        return;
    }
    let table_name = table.name.qualified();
    let expr = check.expression.as_deref().unwrap_or("");
    diags.push(
        Diagnostic::new(
            "CON004",
            config.effective_severity_for_path("CON004", &check.file_path, Severity::Warning),
            RuleCategory::Constraints,
            format!("CHECK constraint on '{table_name}' has no explicit name."),
        )
        .at(&check.file_path, check.line)
        .on_table(&table_name)
        .with_snippet(&format!("CHECK ({expr})"))
        .with_suggestion(format!(
            "Use `CONSTRAINT ck_{}_<rule> CHECK (...)`.",
            table.name.name
        )),
    );
}

impl Rule for ConstraintRules {
    fn name(&self) -> &'static str {
        "constraints"
    }

    fn check(
        &self,
        tables: &[Table],
        _statements: &[SchemaStatement],
        config: &CheckConfig,
    ) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for table in tables {
            check_con001(table, config, &mut diags);
            for constraint in &table.constraints {
                match constraint.kind {
                    ConstraintKind::ForeignKey => {
                        check_foreign_key(table, constraint, config, &mut diags);
                    }
                    ConstraintKind::Check => check_con004(table, constraint, config, &mut diags),
                    ConstraintKind::PrimaryKey | ConstraintKind::Unique => {}
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
    use crate::checkers::test_support::{count_rule, has_rule, run};
    use indoc::indoc;

    #[test]
    fn test_missing_primary_key_is_error() {
        let diags = run(&ConstraintRules, "CREATE TABLE Users (id int, email text);");
        assert_eq!(count_rule(&diags, "CON001"), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].table.as_deref(), Some("users"));
        assert_eq!(
            diags[0].suggestion.as_deref(),
            Some("Declare `id` as PRIMARY KEY.")
        );
    }

    #[test]
    fn test_primary_key_via_alter_satisfies_con001() {
        let diags = run(
            &ConstraintRules,
            "CREATE TABLE t (id int);\nALTER TABLE t ADD CONSTRAINT pk_t PRIMARY KEY (id);",
        );
        assert!(!has_rule(&diags, "CON001"));
    }

    #[test]
    fn test_create_table_as_not_judged() {
        let diags = run(&ConstraintRules, "CREATE TABLE snapshot AS SELECT * FROM t;");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_unnamed_fk_without_actions() {
        let diags = run(
            &ConstraintRules,
            indoc! {r#"
                CREATE TABLE orders (
                  id uuid PRIMARY KEY,
                  user_id uuid REFERENCES users (id)
                );
            "#},
        );
        assert_eq!(count_rule(&diags, "CON002"), 1);
        assert_eq!(count_rule(&diags, "CON003"), 1);
        let con002 = diags.iter().find(|d| d.rule_id == "CON002").unwrap();
        assert_eq!(con002.line, 3);
        assert!(con002.message.contains("'users'"));
    }

    #[test]
    fn test_named_fk_with_action_is_clean() {
        let diags = run(
            &ConstraintRules,
            indoc! {r#"
                CREATE TABLE orders (
                  id uuid PRIMARY KEY,
                  user_id uuid,
                  CONSTRAINT fk_orders_user FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
                );
            "#},
        );
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn test_on_update_alone_satisfies_con003() {
        let diags = run(
            &ConstraintRules,
            "CREATE TABLE t (id int PRIMARY KEY, p int CONSTRAINT fk_t_p REFERENCES p ON UPDATE CASCADE);",
        );
        assert!(!has_rule(&diags, "CON003"));
    }

    #[test]
    fn test_unnamed_check() {
        let diags = run(
            &ConstraintRules,
            "CREATE TABLE t (id int PRIMARY KEY, qty int CHECK (qty > 0), CONSTRAINT ck_t_id CHECK (id > 0));",
        );
        assert_eq!(count_rule(&diags, "CON004"), 1);
        let d = diags.iter().find(|d| d.rule_id == "CON004").unwrap();
        assert_eq!(d.snippet.as_deref(), Some("CHECK (qty > 0)"));
    }
}
