//! Rule trait definition and rule registry.
//!
//! Every rule family implements the [`Rule`] trait. Rules are stateless:
//! all context (folded tables, the raw statements, configuration) is passed
//! via parameters, and no rule suppresses another.
//!
//! The registry function [`build_rule_registry`] returns all rule families
//! in a fixed order.

pub mod constraints;
pub mod indexes;
pub mod naming;
pub mod rls;

use crate::config::CheckConfig;
use crate::scanner::SchemaStatement;
use crate::schema::Table;
use crate::types::Diagnostic;

/// Every rule family implements this trait.
///
/// Rules must be `Send + Sync` to support parallel execution via rayon.
pub trait Rule: Send + Sync {
    /// Unique name for this rule family (used in logs).
    fn name(&self) -> &'static str;

    /// Run the family's checks against one analysis unit.
    ///
    /// `tables` is the schema folded from `statements`; rules that look at
    /// objects outside tables (e.g. types) read the statements directly.
    fn check(
        &self,
        tables: &[Table],
        statements: &[SchemaStatement],
        config: &CheckConfig,
    ) -> Vec<Diagnostic>;
}

/// Build the rule registry containing all available rule families.
#[must_use]
pub fn build_rule_registry() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(naming::NamingRules),
        Box::new(constraints::ConstraintRules),
        Box::new(indexes::IndexRules),
        Box::new(rls::RlsRules),
    ]
}

/// Shared test helpers for rule modules.
#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::CheckConfig;
    use crate::scanner::scan;
    use crate::schema::fold;
    use crate::types::Diagnostic;

    use super::Rule;

    /// Scan, fold and run one rule family with `config`.
    pub fn run_with(rule: &dyn Rule, sql: &str, config: &CheckConfig) -> Vec<Diagnostic> {
        let out = scan("schema.sql", sql);
        let tables = fold(&out.statements, &config.target_schema);
        rule.check(&tables, &out.statements, config)
    }

    /// Scan, fold and run one rule family with the default config.
    pub fn run(rule: &dyn Rule, sql: &str) -> Vec<Diagnostic> {
        run_with(rule, sql, &CheckConfig::default())
    }

    /// Check if a specific rule fired in the diagnostics.
    pub fn has_rule(diags: &[Diagnostic], rule_id: &str) -> bool {
        diags.iter().any(|d| d.rule_id == rule_id)
    }

    /// Count diagnostics with a specific rule ID.
    pub fn count_rule(diags: &[Diagnostic], rule_id: &str) -> usize {
        diags.iter().filter(|d| d.rule_id == rule_id).count()
    }
}
