//! Naming convention rules: NAME001 through NAME006.
//!
//! Applies to tables, columns, constraints, indexes and user-defined types
//! (including composite type attributes). Names are judged as written, so
//! `CREATE TABLE Users` is flagged even though Postgres folds it to `users`.
//!
//! Rules:
//! - **NAME001** (error, enabled): Identifier contains uppercase letters
//! - **NAME002** (error, enabled): Identifier contains whitespace
//! - **NAME003** (warning, enabled): Identifier is camelCase
//! - **NAME004** (warning, enabled): Named constraint lacks a `pk_`/`fk_`/`uq_`/`ck_` prefix
//! - **NAME005** (warning, enabled): Index lacks an `idx_`/`uidx_` prefix
//! - **NAME006** (warning, enabled): Identifier is otherwise not snake_case
//!
//! camelCase identifiers get NAME003 instead of NAME001. NAME006 only fires
//! when none of NAME001-NAME003 did.

use regex::Regex;

use crate::checkers::Rule;
use crate::config::CheckConfig;
use crate::scanner::{SchemaStatement, StatementKind};
use crate::schema::{self, ConstraintKind, Table};
use crate::types::{Diagnostic, RuleCategory, Severity};

/// Naming convention rules implementing NAME001 through NAME006.
pub struct NamingRules;

/// What kind of object an identifier names, for messages.
#[derive(Debug, Clone, Copy)]
enum ObjectKind {
    Table,
    Column,
    Constraint,
    Index,
    Type,
    Attribute,
}

impl ObjectKind {
    fn label(self) -> &'static str {
        match self {
            Self::Table => "Table",
            Self::Column => "Column",
            Self::Constraint => "Constraint",
            Self::Index => "Index",
            Self::Type => "Type",
            Self::Attribute => "Type attribute",
        }
    }
}

/// One identifier to judge.
struct Subject<'a> {
    kind: ObjectKind,
    raw: &'a str,
    file_path: &'a str,
    line: u32,
    table: Option<String>,
}

/// Precompiled case patterns.
struct CasePatterns {
    camel: Regex,
    snake: Regex,
}

impl CasePatterns {
    fn new() -> Option<Self> {
        Some(Self {
            camel: Regex::new(r"^[a-z][a-z0-9]*([A-Z][a-z0-9]*)+$").ok()?,
            snake: Regex::new(r"^[a-z_][a-z0-9_$]*$").ok()?,
        })
    }
}

/// Convert an identifier to snake_case for suggestions.
fn to_snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else if c.is_whitespace() || c == '-' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out.trim_matches('_').to_owned()
}

fn make_diag(
    rule_id: &str,
    default: Severity,
    subject: &Subject<'_>,
    message: String,
    suggestion: String,
    config: &CheckConfig,
) -> Diagnostic {
    let severity = config.effective_severity_for_path(rule_id, subject.file_path, default);
    let mut diag = Diagnostic::new(rule_id, severity, RuleCategory::Naming, message)
        .at(subject.file_path, subject.line)
        .with_snippet(subject.raw)
        .with_suggestion(suggestion);
    diag.table.clone_from(&subject.table);
    diag
}

// ---------------------------------------------------------------------------
// NAME001-NAME003, NAME006: identifier case
// ---------------------------------------------------------------------------

/// Check the case rules for one identifier.
///
/// Whitespace (NAME002) and uppercase (NAME001) are independent; camelCase
/// (NAME003) replaces NAME001; NAME006 covers whatever else is not snake_case.
fn check_case(
    subject: &Subject<'_>,
    patterns: &CasePatterns,
    config: &CheckConfig,
    diags: &mut Vec<Diagnostic>,
) {
    let raw = subject.raw;
    let label = subject.kind.label();
    let enabled = |rule_id: &str| config.is_rule_enabled_for_path(rule_id, subject.file_path, true);
    let mut fired = false;

    if raw.chars().any(char::is_whitespace) {
        fired = true;
        if enabled("NAME002") {
            diags.push(make_diag(
                "NAME002",
                Severity::Error,
                subject,
                format!("{label} name '{raw}' contains whitespace."),
                format!("Rename to '{}'.", to_snake_case(raw)),
                config,
            ));
        }
    }

    if patterns.camel.is_match(raw) {
        fired = true;
        if enabled("NAME003") {
            diags.push(make_diag(
                "NAME003",
                Severity::Warning,
                subject,
                format!("{label} name '{raw}' is camelCase; use snake_case."),
                format!("Rename to '{}'.", to_snake_case(raw)),
                config,
            ));
        }
    } else if raw.chars().any(char::is_uppercase) {
        fired = true;
        if enabled("NAME001") {
            diags.push(make_diag(
                "NAME001",
                Severity::Error,
                subject,
                format!(
                    "{label} name '{raw}' contains uppercase letters; it must be quoted \
                     everywhere or it silently folds to lowercase."
                ),
                format!("Rename to '{}'.", to_snake_case(raw)),
                config,
            ));
        }
    }

    if !fired && !patterns.snake.is_match(raw) && enabled("NAME006") {
        diags.push(make_diag(
            "NAME006",
            Severity::Warning,
            subject,
            format!("{label} name '{raw}' is not snake_case."),
            format!(
                "Rename to '{}'.",
                to_snake_case(raw).replace(|c: char| !c.is_alphanumeric() && c != '_', "_")
            ),
            config,
        ));
    }
}

// ---------------------------------------------------------------------------
// NAME004: constraint prefix
// ---------------------------------------------------------------------------

/// Check NAME004: explicitly named constraints carry a kind prefix.
fn check_name004(
    subject: &Subject<'_>,
    constraint_kind: ConstraintKind,
    config: &CheckConfig,
    diags: &mut Vec<Diagnostic>,
) {
    if !config.is_rule_enabled_for_path("NAME004", subject.file_path, true) {
        return;
    }
    let lower = subject.raw.to_lowercase();
    if config
        .naming
        .constraint_prefixes
        .iter()
        .any(|p| lower.starts_with(&p.to_lowercase()))
    {
        return;
    }
    let expected = match constraint_kind {
        ConstraintKind::PrimaryKey => "pk_",
        ConstraintKind::ForeignKey => "fk_",
        ConstraintKind::Unique => "uq_",
        ConstraintKind::Check => "ck_",
    };
    diags.push(make_diag(
        "NAME004",
        Severity::Warning,
        subject,
        format!(
            "Constraint '{}' does not start with a kind prefix ({}).",
            subject.raw,
            config.naming.constraint_prefixes.join(", ")
        ),
        format!("Rename to '{expected}{lower}'."),
        config,
    ));
}

// ---------------------------------------------------------------------------
// NAME005: index prefix
// ---------------------------------------------------------------------------

/// Check NAME005: indexes are named with an index prefix. Unnamed indexes
/// get a generated name without one, so they are flagged too.
fn check_name005(
    subject: &Subject<'_>,
    unique: bool,
    table_name: &str,
    columns: &[String],
    config: &CheckConfig,
    diags: &mut Vec<Diagnostic>,
) {
    if !config.is_rule_enabled_for_path("NAME005", subject.file_path, true) {
        return;
    }
    let lower = subject.raw.to_lowercase();
    if !lower.is_empty()
        && config
            .naming
            .index_prefixes
            .iter()
            .any(|p| lower.starts_with(&p.to_lowercase()))
    {
        return;
    }
    let prefix = if unique { "uidx_" } else { "idx_" };
    let plain_columns: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| c.chars().all(|ch| ch.is_alphanumeric() || ch == '_'))
        .collect();
    let proposed = format!("{prefix}{table_name}_{}", plain_columns.join("_"));
    let message = if lower.is_empty() {
        format!(
            "Index on '{table_name}' has no explicit name; the generated name lacks an index prefix."
        )
    } else {
        format!(
            "Index '{}' does not start with an index prefix ({}).",
            subject.raw,
            config.naming.index_prefixes.join(", ")
        )
    };
    diags.push(make_diag(
        "NAME005",
        Severity::Warning,
        subject,
        message,
        format!("Name it '{}'.", proposed.trim_end_matches('_')),
        config,
    ));
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

fn check_table<'t>(
    table: &'t Table,
    patterns: &CasePatterns,
    config: &CheckConfig,
    diags: &mut Vec<Diagnostic>,
) {
    let table_name = table.name.qualified();
    let subject = |kind: ObjectKind, raw: &'t str, file_path: &'t str, line: u32| Subject {
        kind,
        raw,
        file_path,
        line,
        table: Some(table_name.clone()),
    };

    if !config.naming_allowed(&table.name.raw) {
        check_case(
            &subject(
                ObjectKind::Table,
                table.name.raw.as_str(),
                table.file_path.as_str(),
                table.line,
            ),
            patterns,
            config,
            diags,
        );
    }

    for column in &table.columns {
        if config.naming_allowed(&column.raw_name) {
            continue;
        }
        check_case(
            &subject(
                ObjectKind::Column,
                column.raw_name.as_str(),
                column.file_path.as_str(),
                column.line,
            ),
            patterns,
            config,
            diags,
        );
    }

    for constraint in &table.constraints {
        let Some(name) = constraint.name.as_deref() else {
            continue;
        };
        if config.naming_allowed(name) {
            continue;
        }
        let s = subject(
            ObjectKind::Constraint,
            name,
            constraint.file_path.as_str(),
            constraint.line,
        );
        check_case(&s, patterns, config, diags);
        check_name004(&s, constraint.kind, config, diags);
    }

    for index in &table.indexes {
        let name = index.name.as_deref().unwrap_or("");
        if !name.is_empty() && config.naming_allowed(name) {
            continue;
        }
        let s = subject(ObjectKind::Index, name, index.file_path.as_str(), index.line);
        if !name.is_empty() {
            check_case(&s, patterns, config, diags);
        }
        check_name005(&s, index.unique, &table.name.name, &index.columns, config, diags);
    }
}

fn check_types(
    statements: &[SchemaStatement],
    patterns: &CasePatterns,
    config: &CheckConfig,
    diags: &mut Vec<Diagnostic>,
) {
    for def in statements
        .iter()
        .filter(|s| s.kind == StatementKind::CreateType)
        .filter_map(schema::parse_type)
    {
        if !config.naming_allowed(&def.name.raw) {
            let s = Subject {
                kind: ObjectKind::Type,
                raw: &def.name.raw,
                file_path: &def.file_path,
                line: def.line,
                table: None,
            };
            check_case(&s, patterns, config, diags);
        }
        for attr in &def.attributes {
            if config.naming_allowed(&attr.raw_name) {
                continue;
            }
            let s = Subject {
                kind: ObjectKind::Attribute,
                raw: &attr.raw_name,
                file_path: &def.file_path,
                line: attr.line,
                table: None,
            };
            check_case(&s, patterns, config, diags);
        }
    }
}

impl Rule for NamingRules {
    fn name(&self) -> &'static str {
        "naming"
    }

    fn check(
        &self,
        tables: &[Table],
        statements: &[SchemaStatement],
        config: &CheckConfig,
    ) -> Vec<Diagnostic> {
        let Some(patterns) = CasePatterns::new() else {
            return Vec::new();
        };
        let mut diags = Vec::new();
        for table in tables {
            check_table(table, &patterns, config, &mut diags);
        }
        check_types(statements, &patterns, config, &mut diags);
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
    use crate::config::RuleSeverityOverride;
    use indoc::indoc;

    #[test]
    fn test_snake_case_schema_is_clean() {
        let diags = run(
            &NamingRules,
            indoc! {r#"
                CREATE TABLE order_items (
                  id uuid,
                  order_id uuid,
                  CONSTRAINT pk_order_items PRIMARY KEY (id),
                  CONSTRAINT fk_order_items_order FOREIGN KEY (order_id) REFERENCES orders (id)
                );
                CREATE INDEX idx_order_items_order_id ON order_items (order_id);
                CREATE UNIQUE INDEX uidx_order_items_id ON order_items (id);
            "#},
        );
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn test_uppercase_table_is_error() {
        let diags = run(&NamingRules, "CREATE TABLE Users (id int);");
        assert_eq!(count_rule(&diags, "NAME001"), 1);
        let d = diags.iter().find(|d| d.rule_id == "NAME001").unwrap();
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.table.as_deref(), Some("users"));
        assert_eq!(d.suggestion.as_deref(), Some("Rename to 'users'."));
    }

    #[test]
    fn test_quoted_identifier_with_space() {
        let diags = run(&NamingRules, r#"CREATE TABLE "order items" (id int);"#);
        assert!(has_rule(&diags, "NAME002"));
        assert!(!has_rule(&diags, "NAME001"));
        assert!(!has_rule(&diags, "NAME006"));
    }

    #[test]
    fn test_space_and_uppercase_both_fire() {
        let diags = run(&NamingRules, r#"CREATE TABLE "Order Items" (id int);"#);
        assert!(has_rule(&diags, "NAME002"));
        assert!(has_rule(&diags, "NAME001"));
    }

    #[test]
    fn test_camel_case_column_is_warning() {
        let diags = run(&NamingRules, "CREATE TABLE t (\n  userId uuid\n);");
        assert_eq!(count_rule(&diags, "NAME003"), 1);
        assert!(!has_rule(&diags, "NAME001"));
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.line, 2);
        assert_eq!(d.suggestion.as_deref(), Some("Rename to 'user_id'."));
    }

    #[test]
    fn test_pascal_case_is_uppercase_error() {
        let diags = run(&NamingRules, "CREATE TABLE t (UserId uuid);");
        assert!(has_rule(&diags, "NAME001"));
        assert!(!has_rule(&diags, "NAME003"));
    }

    #[test]
    fn test_hyphen_and_leading_digit_are_name006() {
        let diags = run(
            &NamingRules,
            r#"CREATE TABLE "order-items" ("1st_choice" int);"#,
        );
        assert_eq!(count_rule(&diags, "NAME006"), 2);
    }

    #[test]
    fn test_constraint_prefix() {
        let diags = run(
            &NamingRules,
            indoc! {r#"
                CREATE TABLE t (
                  id int CONSTRAINT t_pkey PRIMARY KEY,
                  qty int CONSTRAINT ck_t_qty CHECK (qty > 0),
                  CONSTRAINT only_once UNIQUE (qty)
                );
            "#},
        );
        assert_eq!(count_rule(&diags, "NAME004"), 2);
        let unique = diags
            .iter()
            .find(|d| d.snippet.as_deref() == Some("only_once"))
            .unwrap();
        assert_eq!(unique.suggestion.as_deref(), Some("Rename to 'uq_only_once'."));
    }

    #[test]
    fn test_unnamed_constraints_not_name004() {
        let diags = run(&NamingRules, "CREATE TABLE t (id int PRIMARY KEY, n int UNIQUE);");
        assert!(!has_rule(&diags, "NAME004"));
    }

    #[test]
    fn test_index_prefix() {
        let diags = run(
            &NamingRules,
            indoc! {r#"
                CREATE TABLE t (a int, b int);
                CREATE INDEX t_a_idx ON t (a);
                CREATE UNIQUE INDEX ON t (b);
                CREATE INDEX idx_t_ab ON t (a, b);
            "#},
        );
        assert_eq!(count_rule(&diags, "NAME005"), 2);
        let unnamed = diags
            .iter()
            .find(|d| d.rule_id == "NAME005" && d.message.contains("no explicit name"))
            .unwrap();
        assert_eq!(unnamed.suggestion.as_deref(), Some("Name it 'uidx_t_b'."));
    }

    #[test]
    fn test_types_and_attributes_checked() {
        let diags = run(
            &NamingRules,
            "CREATE TYPE \"OrderStatus\" AS ENUM ('Open');\nCREATE TYPE addr AS (streetName text);",
        );
        assert!(has_rule(&diags, "NAME001"));
        assert!(has_rule(&diags, "NAME003"));
        // Enum labels are data, not identifiers.
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn test_allow_list_and_rule_off() {
        let mut config = CheckConfig::default();
        config.naming.allow = vec!["LegacyTable".to_owned()];
        config
            .rules
            .insert("NAME003".to_owned(), RuleSeverityOverride::Off);
        let diags = run_with(
            &NamingRules,
            "CREATE TABLE LegacyTable (someColumn int);",
            &config,
        );
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn test_severity_override_applies() {
        let mut config = CheckConfig::default();
        config
            .rules
            .insert("NAME001".to_owned(), RuleSeverityOverride::Warning);
        let diags = run_with(&NamingRules, "CREATE TABLE Users (id int);", &config);
        assert_eq!(diags[0].severity, Severity::Warning);
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("Order Items"), "order_items");
        assert_eq!(to_snake_case("HTTPStatus"), "httpstatus");
        assert_eq!(to_snake_case("created-at"), "created_at");
    }
}
