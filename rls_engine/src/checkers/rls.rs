//! Row-level security rules: RLS001 through RLS007.
//!
//! Rules:
//! - **RLS001** (error, enabled): Table does not enable row level security
//! - **RLS002** (error, enabled): RLS is enabled but the table has no policies
//! - **RLS003** (info, enabled): An operation has no permissive policy, so
//!   it is denied for every role subject to RLS
//! - **RLS004** (warning, enabled): INSERT/UPDATE/ALL policy without `WITH CHECK`
//! - **RLS005** (warning, enabled): Column read by a policy predicate is not
//!   the leading column of an index
//! - **RLS006** (warning/info, enabled): Predicate is the constant `true`;
//!   warning for commands that modify rows, info for SELECT
//! - **RLS007** (info, disabled): RLS is enabled but not forced, so the
//!   table owner bypasses every policy
//!
//! Only tables in the target schema are checked (unqualified names count as
//! the target schema). Tables listed in `rls.exempt_tables` are skipped.

use crate::checkers::Rule;
use crate::config::CheckConfig;
use crate::scanner::SchemaStatement;
use crate::schema::{Policy, PolicyCommand, Table};
use crate::types::{Diagnostic, Operation, RuleCategory, Severity};

/// RLS rules implementing RLS001 through RLS007.
pub struct RlsRules;

fn in_scope(table: &Table, config: &CheckConfig) -> bool {
    let schema = table.name.schema_or(&config.target_schema);
    schema.eq_ignore_ascii_case(&config.target_schema)
        && !config.rls_exempt(schema, &table.name.name)
}

// ---------------------------------------------------------------------------
// RLS001 / RLS002: RLS enablement
// ---------------------------------------------------------------------------

fn check_enablement(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    let name = table.name.qualified();

    if !table.rls_enabled {
        if config.is_rule_enabled_for_path("RLS001", &table.file_path, true) {
            diags.push(
                Diagnostic::new(
                    "RLS001",
                    config.effective_severity_for_path("RLS001", &table.file_path, Severity::Error),
                    RuleCategory::RowLevelSecurity,
                    format!("Table '{name}' does not enable row level security."),
                )
                .at(&table.file_path, table.line)
                .on_table(&name)
                .with_suggestion(format!("ALTER TABLE {name} ENABLE ROW LEVEL SECURITY;")),
            );
        }
        return;
    }

    if table.policies.is_empty() && config.is_rule_enabled_for_path("RLS002", &table.file_path, true)
    {
        diags.push(
            Diagnostic::new(
                "RLS002",
                config.effective_severity_for_path("RLS002", &table.file_path, Severity::Error),
                RuleCategory::RowLevelSecurity,
                format!(
                    "Table '{name}' enables row level security but defines no policies; \
                     every row is hidden from non-owner roles."
                ),
            )
            .at(&table.file_path, table.line)
            .on_table(&name)
            .with_suggestion(format!("CREATE POLICY ... ON {name} FOR SELECT USING (...);")),
        );
    }

    if !table.rls_forced && config.is_rule_enabled_for_path("RLS007", &table.file_path, false) {
        diags.push(
            Diagnostic::new(
                "RLS007",
                config.effective_severity_for_path("RLS007", &table.file_path, Severity::Info),
                RuleCategory::RowLevelSecurity,
                format!(
                    "Table '{name}' does not force row level security; its owner bypasses every policy."
                ),
            )
            .at(&table.file_path, table.line)
            .on_table(&name)
            .with_suggestion(format!("ALTER TABLE {name} FORCE ROW LEVEL SECURITY;")),
        );
    }
}

// ---------------------------------------------------------------------------
// RLS003: Operation without a permissive policy
// ---------------------------------------------------------------------------

fn check_rls003(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    if !table.rls_enabled
        || table.policies.is_empty()
        || !config.is_rule_enabled_for_path("RLS003", &table.file_path, true)
    {
        return;
    }
    let name = table.name.qualified();
    for op in Operation::ALL {
        if table.permissive_policies_for(op).next().is_some() {
            continue;
        }
        diags.push(
            Diagnostic::new(
                "RLS003",
                config.effective_severity_for_path("RLS003", &table.file_path, Severity::Info),
                RuleCategory::RowLevelSecurity,
                format!("Table '{name}' has no permissive {op} policy; {op} is always denied."),
            )
            .at(&table.file_path, table.line)
            .on_table(&name),
        );
    }
}

// ---------------------------------------------------------------------------
// RLS004 / RLS006: Policy predicates
// ---------------------------------------------------------------------------

/// Whether a predicate is the literal `true`, ignoring case and wrapping parens.
fn is_constant_true(predicate: &str) -> bool {
    let mut p = predicate.trim();
    while let Some(inner) = p.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        p = inner.trim();
    }
    p.eq_ignore_ascii_case("true")
}

fn check_policy(table_name: &str, policy: &Policy, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    let file = policy.file_path.as_str();

    if policy.command.writes()
        && policy.with_check.is_none()
        && config.is_rule_enabled_for_path("RLS004", file, true)
    {
        let detail = if policy.command == PolicyCommand::Insert {
            "new rows are not validated"
        } else {
            "new rows are validated only by USING"
        };
        diags.push(
            Diagnostic::new(
                "RLS004",
                config.effective_severity_for_path("RLS004", file, Severity::Warning),
                RuleCategory::RowLevelSecurity,
                format!(
                    "Policy '{}' on '{table_name}' ({}) has no WITH CHECK clause; {detail}.",
                    policy.name, policy.command
                ),
            )
            .at(file, policy.line)
            .on_table(table_name)
            .with_suggestion("Add WITH CHECK (...) mirroring the ownership predicate."),
        );
    }

    let constant = [&policy.using, &policy.with_check]
        .into_iter()
        .flatten()
        .any(|p| is_constant_true(p));
    if constant && config.is_rule_enabled_for_path("RLS006", file, true) {
        let default = if policy.command == PolicyCommand::Select {
            Severity::Info
        } else {
            Severity::Warning
        };
        diags.push(
            Diagnostic::new(
                "RLS006",
                config.effective_severity_for_path("RLS006", file, default),
                RuleCategory::RowLevelSecurity,
                format!(
                    "Policy '{}' on '{table_name}' ({}) uses a constant true predicate; \
                     it grants every row.",
                    policy.name, policy.command
                ),
            )
            .at(file, policy.line)
            .on_table(table_name),
        );
    }
}

// ---------------------------------------------------------------------------
// RLS005: Unindexed predicate column
// ---------------------------------------------------------------------------

fn check_rls005(table: &Table, config: &CheckConfig, diags: &mut Vec<Diagnostic>) {
    let name = table.name.qualified();
    let mut reported: Vec<&str> = Vec::new();

    for policy in &table.policies {
        for col in &policy.referenced_columns {
            if reported.contains(&col.as_str()) || table.is_leading_indexed(col) {
                continue;
            }
            reported.push(col);
            if !config.is_rule_enabled_for_path("RLS005", &policy.file_path, true) {
                continue;
            }
            diags.push(
                Diagnostic::new(
                    "RLS005",
                    config.effective_severity_for_path(
                        "RLS005",
                        &policy.file_path,
                        Severity::Warning,
                    ),
                    RuleCategory::RowLevelSecurity,
                    format!(
                        "Column '{col}' used by policy '{}' on '{name}' is not indexed; \
                         the predicate is evaluated for every row.",
                        policy.name
                    ),
                )
                .at(&policy.file_path, policy.line)
                .on_table(&name)
                .with_suggestion(format!(
                    "CREATE INDEX idx_{}_{col} ON {name} ({col});",
                    table.name.name
                )),
            );
        }
    }
}

impl Rule for RlsRules {
    fn name(&self) -> &'static str {
        "rls"
    }

    fn check(
        &self,
        tables: &[Table],
        _statements: &[SchemaStatement],
        config: &CheckConfig,
    ) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for table in tables.iter().filter(|t| in_scope(t, config)) {
            check_enablement(table, config, &mut diags);
            check_rls003(table, config, &mut diags);
            let name = table.name.qualified();
            for policy in &table.policies {
                check_policy(&name, policy, config, &mut diags);
            }
            check_rls005(table, config, &mut diags);
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
    use crate::checkers::test_support::{count_rule, has_rule, run, run_with};
    use indoc::indoc;

    const SECURED_ORDERS: &str = indoc! {r#"
        CREATE TABLE orders (id uuid PRIMARY KEY, user_id uuid NOT NULL);
        CREATE INDEX idx_orders_user_id ON orders (user_id);
        ALTER TABLE orders ENABLE ROW LEVEL SECURITY;
        CREATE POLICY orders_select ON orders FOR SELECT USING (auth.uid() = user_id);
        CREATE POLICY orders_insert ON orders FOR INSERT WITH CHECK (auth.uid() = user_id);
        CREATE POLICY orders_update ON orders FOR UPDATE
          USING (auth.uid() = user_id) WITH CHECK (auth.uid() = user_id);
        CREATE POLICY orders_delete ON orders FOR DELETE USING (auth.uid() = user_id);
    "#};

    #[test]
    fn test_fully_policied_table_is_clean() {
        let diags = run(&RlsRules, SECURED_ORDERS);
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn test_missing_rls_is_error() {
        let diags = run(&RlsRules, "CREATE TABLE orders (id int PRIMARY KEY);");
        assert_eq!(count_rule(&diags, "RLS001"), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].line, 1);
    }

    #[test]
    fn test_unforced_rls_is_opt_in() {
        assert!(!has_rule(&run(&RlsRules, SECURED_ORDERS), "RLS007"));

        let mut config = CheckConfig::default();
        config.select = Some("RLS007".to_owned());
        let diags = run_with(&RlsRules, SECURED_ORDERS, &config);
        assert_eq!(count_rule(&diags, "RLS007"), 1);
        assert_eq!(diags[0].severity, Severity::Info);

        let forced = format!("{SECURED_ORDERS}ALTER TABLE orders FORCE ROW LEVEL SECURITY;\n");
        assert!(run_with(&RlsRules, &forced, &config).is_empty());
    }

    #[test]
    fn test_rls_without_policies_is_error() {
        let diags = run(
            &RlsRules,
            "CREATE TABLE t (id int);\nALTER TABLE t ENABLE ROW LEVEL SECURITY;",
        );
        assert_eq!(count_rule(&diags, "RLS002"), 1);
        assert!(!has_rule(&diags, "RLS001"));
        assert!(!has_rule(&diags, "RLS003"));
    }

    #[test]
    fn test_uncovered_operations_are_info() {
        let diags = run(
            &RlsRules,
            indoc! {r#"
                CREATE TABLE t (id int, user_id uuid);
                CREATE INDEX idx_t_user ON t (user_id);
                ALTER TABLE t ENABLE ROW LEVEL SECURITY;
                CREATE POLICY t_read ON t FOR SELECT USING (user_id = auth.uid());
                CREATE POLICY t_deny ON t AS RESTRICTIVE FOR DELETE USING (false);
            "#},
        );
        assert_eq!(count_rule(&diags, "RLS003"), 3);
        assert!(diags
            .iter()
            .filter(|d| d.rule_id == "RLS003")
            .all(|d| d.severity == Severity::Info));
        assert!(diags.iter().any(|d| d.message.contains("DELETE")));
    }

    #[test]
    fn test_write_policy_without_with_check() {
        let diags = run(
            &RlsRules,
            indoc! {r#"
                CREATE TABLE t (id int, user_id uuid PRIMARY KEY);
                ALTER TABLE t ENABLE ROW LEVEL SECURITY;
                CREATE POLICY t_all ON t USING (user_id = auth.uid());
                CREATE POLICY t_del ON t FOR DELETE USING (user_id = auth.uid());
            "#},
        );
        assert_eq!(count_rule(&diags, "RLS004"), 1);
        let d = diags.iter().find(|d| d.rule_id == "RLS004").unwrap();
        assert!(d.message.contains("'t_all'"));
        assert_eq!(d.line, 3);
    }

    #[test]
    fn test_unindexed_predicate_column_reported_once() {
        let diags = run(
            &RlsRules,
            indoc! {r#"
                CREATE TABLE docs (id int PRIMARY KEY, owner_id uuid);
                ALTER TABLE docs ENABLE ROW LEVEL SECURITY;
                CREATE POLICY d_sel ON docs FOR SELECT USING (owner_id = auth.uid());
                CREATE POLICY d_upd ON docs FOR UPDATE USING (owner_id = auth.uid())
                  WITH CHECK (owner_id = auth.uid());
            "#},
        );
        assert_eq!(count_rule(&diags, "RLS005"), 1);
        let d = diags.iter().find(|d| d.rule_id == "RLS005").unwrap();
        assert_eq!(
            d.suggestion.as_deref(),
            Some("CREATE INDEX idx_docs_owner_id ON docs (owner_id);")
        );
    }

    #[test]
    fn test_constant_true_severity_by_command() {
        let diags = run(
            &RlsRules,
            indoc! {r#"
                CREATE TABLE t (id int PRIMARY KEY);
                ALTER TABLE t ENABLE ROW LEVEL SECURITY;
                CREATE POLICY t_read ON t FOR SELECT USING (true);
                CREATE POLICY t_write ON t FOR INSERT WITH CHECK ((TRUE));
            "#},
        );
        let found: Vec<Severity> = diags
            .iter()
            .filter(|d| d.rule_id == "RLS006")
            .map(|d| d.severity)
            .collect();
        assert_eq!(found, vec![Severity::Info, Severity::Warning]);
    }

    #[test]
    fn test_other_schema_and_exempt_tables_skipped() {
        let mut config = CheckConfig::default();
        config.rls.exempt_tables = vec!["countries".to_owned()];
        let diags = run_with(
            &RlsRules,
            "CREATE TABLE countries (code text PRIMARY KEY);\nCREATE TABLE audit.log (id int);\nCREATE TABLE public.notes (id int);",
            &config,
        );
        assert_eq!(count_rule(&diags, "RLS001"), 1);
        assert_eq!(diags[0].table.as_deref(), Some("public.notes"));
    }

    #[test]
    fn test_is_constant_true() {
        assert!(is_constant_true(" ( true ) "));
        assert!(!is_constant_true("true AND user_id = auth.uid()"));
        assert!(!is_constant_true("(a) = (b)"));
    }
}
